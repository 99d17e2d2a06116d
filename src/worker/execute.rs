//! Job execution: decode the payload, resolve the function, run it.
//!
//! Never returns an error. Every way a job can go wrong (bad payload, unknown
//! function, error return, panic) comes back as a [`Failure`] so the caller
//! can always write a terminal status.

use std::any::Any;
use std::time::{Duration, Instant};

use tracing::{Span, debug, warn};

use crate::codec::{self, Arguments, Failure, FailureKind, Payload, Value};
use crate::registry::{JobFn, Registry};
use crate::telemetry::job::record_function;

/// Result of running one job's function.
pub(crate) struct Execution {
    /// Function name, if the payload could be decoded.
    pub function: Option<String>,
    pub outcome: Result<Value, Failure>,
    pub duration: Duration,
}

impl Execution {
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

pub(crate) async fn execute(registry: &Registry, payload: &[u8], span: &Span) -> Execution {
    let start = Instant::now();

    let payload: Payload = match codec::decode(payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "undecodable job payload");
            return Execution {
                function: None,
                outcome: Err(Failure::from(&e)),
                duration: start.elapsed(),
            };
        }
    };

    let (function, arguments) = payload.into_call();
    record_function(span, &function);

    let outcome = match registry.resolve(&function) {
        Ok(handler) => {
            debug!(function = %function, args = arguments.len(), "invoking");
            invoke(handler, arguments).await
        }
        Err(e) => {
            warn!(function = %function, "function not registered");
            Err(Failure::from(&e))
        }
    };

    Execution {
        function: Some(function),
        outcome,
        duration: start.elapsed(),
    }
}

/// Run the handler on the blocking pool. A panic is caught at the join.
async fn invoke(handler: JobFn, arguments: Arguments) -> Result<Value, Failure> {
    match tokio::task::spawn_blocking(move || handler(arguments)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Failure::execution(&err)),
        Err(join) if join.is_panic() => Err(Failure::new(
            FailureKind::Panic,
            panic_message(join.into_panic().as_ref()),
        )),
        Err(join) => Err(Failure::new(
            FailureKind::Execution,
            format!("job task aborted: {join}"),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
