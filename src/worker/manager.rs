use std::fmt;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use tokio::runtime::Handle;
use tokio::sync::mpsc as async_mpsc;

use super::channel::{BackgroundCommand, ForegroundCommand};
use super::dispatcher::{run_background_worker, run_foreground_loop};
use crate::error::OdbcMiddlewareError;
use crate::query::Query;

/// Moves queries between a fixed set of blocking worker threads and one foreground task.
///
/// Dropping the scheduler stops both sides. Queries still in flight are dropped, which returns
/// their connections; their callers see a connection error.
pub struct QueryScheduler {
    background: Sender<BackgroundCommand>,
    foreground: async_mpsc::UnboundedSender<ForegroundCommand>,
    worker_count: usize,
}

impl fmt::Debug for QueryScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryScheduler")
            .field("worker_count", &self.worker_count)
            .finish()
    }
}

impl QueryScheduler {
    /// Spawn `worker_count` worker threads and the foreground task on the current runtime.
    ///
    /// # Errors
    /// Returns `ConfigError` outside a tokio runtime or for zero workers, and
    /// `ConnectionError` if a worker thread cannot be spawned.
    pub fn start(worker_count: usize) -> Result<Self, OdbcMiddlewareError> {
        if worker_count == 0 {
            return Err(OdbcMiddlewareError::ConfigError(
                "at least one worker thread is required".into(),
            ));
        }
        let handle = Handle::try_current().map_err(|_| {
            OdbcMiddlewareError::ConfigError(
                "query scheduler must be started inside a tokio runtime".into(),
            )
        })?;

        let (background, background_rx) = mpsc::channel::<BackgroundCommand>();
        let (foreground, foreground_rx) = async_mpsc::unbounded_channel::<ForegroundCommand>();
        let shared_rx = Arc::new(Mutex::new(background_rx));

        let scheduler = Self {
            background: background.clone(),
            foreground: foreground.clone(),
            worker_count,
        };

        for index in 0..worker_count {
            let receiver = Arc::clone(&shared_rx);
            let to_foreground = foreground.clone();
            let runtime = handle.clone();
            thread::Builder::new()
                .name(format!("odbc-worker-{index}"))
                .spawn(move || {
                    let runtime_guard = runtime.enter();
                    tracing::debug!(worker = index, "worker thread started");
                    run_background_worker(&receiver, &to_foreground);
                    tracing::debug!(worker = index, "worker thread stopped");
                    drop(runtime_guard);
                })
                .map_err(|err| {
                    OdbcMiddlewareError::ConnectionError(format!(
                        "failed to spawn ODBC worker thread: {err}"
                    ))
                })?;
        }

        handle.spawn(run_foreground_loop(foreground_rx, background));
        Ok(scheduler)
    }

    /// Hand a freshly created query to the workers.
    ///
    /// # Errors
    /// Returns `ConnectionError` if the scheduler has stopped; the query is dropped and its
    /// connection returned.
    pub fn submit(&self, query: Query) -> Result<(), OdbcMiddlewareError> {
        tracing::trace!(query = query.id(), "submitting query");
        self.background
            .send(BackgroundCommand::Run(Box::new(query)))
            .map_err(|_| OdbcMiddlewareError::ConnectionError("query scheduler is stopped".into()))
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

impl Drop for QueryScheduler {
    fn drop(&mut self) {
        for _ in 0..self.worker_count {
            let _ = self.background.send(BackgroundCommand::Shutdown);
        }
        let _ = self.foreground.send(ForegroundCommand::Shutdown);
    }
}
