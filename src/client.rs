//! Producer API: enqueue jobs and read their results.
//!
//! A producer never needs the worker's registry. Function names are stored
//! as-is and only resolved when a worker executes the job, possibly in a
//! different process with a differently built registry.

use std::sync::Arc;

use tracing::info;

use crate::codec::{self, Arguments, Failure, Payload, Value};
use crate::db::Db;
use crate::error::Result;
use crate::model::{Job, JobId, JobResult, Status};

/// Handle for submitting jobs and fetching results.
#[derive(Debug, Clone)]
pub struct Client {
    db: Arc<Db>,
    default_queue: String,
}

impl Client {
    pub fn new(db: Arc<Db>, default_queue: impl Into<String>) -> Self {
        Self {
            db,
            default_queue: default_queue.into(),
        }
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// Enqueue a call to `function` on the default queue.
    pub async fn enqueue(&self, function: &str, arguments: Arguments) -> Result<JobId> {
        self.enqueue_to(&self.default_queue, function, arguments)
            .await
    }

    /// Enqueue a call to `function` on `queue`, creating the queue if needed.
    ///
    /// Only writes a pending row; nothing runs until a worker claims it.
    pub async fn enqueue_to(
        &self,
        queue: &str,
        function: &str,
        arguments: Arguments,
    ) -> Result<JobId> {
        let payload = codec::encode(&Payload::new(function, arguments))?;
        let job = self.db.insert_job(queue, payload).await?;
        info!(job_id = %job.id, queue, function, "job enqueued");
        Ok(job.id)
    }

    /// Current status of a job and, once terminal, its value or failure.
    ///
    /// Reads only; calling it repeatedly on a finished job returns the same
    /// answer every time.
    pub async fn get_result(&self, id: JobId) -> Result<JobResult> {
        let job = self.db.get_job(id).await?;
        decode_result(&job)
    }

    /// The raw job record.
    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        self.db.get_job(id).await
    }
}

/// Interpret a job's stored result according to its status.
pub fn decode_result(job: &Job) -> Result<JobResult> {
    let result = job.result.as_deref();
    match (job.status, result) {
        (Status::Pending, _) => Ok(JobResult::Pending),
        (Status::Running, _) => Ok(JobResult::Running),
        (Status::Completed, Some(bytes)) => Ok(JobResult::Completed(codec::decode::<Value>(bytes)?)),
        (Status::Failed, Some(bytes)) => Ok(JobResult::Failed(codec::decode::<Failure>(bytes)?)),
        (status, None) => Err(crate::error::Error::Deserialization(format!(
            "job {} is {status} but has no stored result",
            job.id
        ))),
    }
}
