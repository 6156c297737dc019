//! Worker spawner running each connection worker as its own tokio task

use super::{channel, WorkerContext, WorkerData, WorkerHandle, WorkerSpawner};
use crate::error::{GatewayError, WorkerError};
use std::future::Future;
use tracing::{debug, warn};

/// Exit code reported when a worker returned an error, panicked, or was terminated
pub const EXIT_FAILURE: i32 = 1;

/// Spawns `run(data, context)` on the tokio runtime for every worker.
///
/// Lifecycle reporting:
/// - `Online` before the worker is first polled
/// - `Exit(0)` when `run` returns `Ok`
/// - `Error` then `Exit(1)` when `run` returns `Err` or panics
/// - `Exit(1)` when the worker is terminated
pub struct TaskSpawner<F> {
    run: F,
}

impl<F, Fut> TaskSpawner<F>
where
    F: Fn(WorkerData, WorkerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    pub fn new(run: F) -> Self {
        Self { run }
    }
}

impl<F, Fut> WorkerSpawner for TaskSpawner<F>
where
    F: Fn(WorkerData, WorkerContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    fn spawn(&self, data: WorkerData) -> Result<WorkerHandle, GatewayError> {
        let [shard_id, _] = data.options.shard();
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| GatewayError::WorkerSpawn {
            shard_id,
            reason: e.to_string(),
        })?;

        let (handle, context) = channel();
        let reporter = context.reporter();
        reporter.online();

        let worker = runtime.spawn((self.run)(data, context));
        let abort = worker.abort_handle();

        runtime.spawn(async move {
            let code = match worker.await {
                Ok(Ok(())) => 0,
                Ok(Err(error)) => {
                    warn!(shard_id, error = %error, "Worker returned an error");
                    reporter.error(error);
                    EXIT_FAILURE
                }
                Err(join) if join.is_panic() => {
                    warn!(shard_id, "Worker panicked");
                    reporter.error(WorkerError::Panicked);
                    EXIT_FAILURE
                }
                Err(_) => {
                    debug!(shard_id, "Worker terminated");
                    EXIT_FAILURE
                }
            };
            reporter.exit(code);
        });

        Ok(handle.with_abort(abort))
    }
}
