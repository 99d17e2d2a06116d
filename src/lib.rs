//! # litejob
//!
//! Durable job queue on a single SQLite file.
//!
//! Producers enqueue calls to named functions ([`client::Client`]); any
//! number of worker processes poll the same file and execute them
//! ([`worker::Worker`]). The claim protocol in [`db`] guarantees each pending
//! job is handed to exactly one worker, and every claimed job ends in a
//! terminal status with its return value or failure detail recorded.

pub mod client;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod registry;
pub mod telemetry;
pub mod worker;

pub use client::Client;
pub use codec::{Arguments, Failure, FailureKind, Value};
pub use db::Db;
pub use error::{Error, Result};
pub use model::{Job, JobId, JobResult, Queue, Status};
pub use registry::Registry;
pub use worker::{Worker, WorkerConfig};
