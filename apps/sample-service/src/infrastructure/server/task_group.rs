//! Listener task tracking.

use std::future::Future;
use std::net::SocketAddr;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::error::{Listener, TaskError};

/// Serve loops running under one lifetime context.
///
/// A loop that fails is logged with its address and cancels the context;
/// [`wait`](Self::wait) joins every loop and reports the first failure.
#[derive(Debug)]
pub struct TaskGroup {
    tasks: Mutex<JoinSet<Result<(), TaskError>>>,
    context: CancellationToken,
}

impl TaskGroup {
    /// Group cancelling `context` when a member fails.
    #[must_use]
    pub fn new(context: CancellationToken) -> Self {
        Self {
            tasks: Mutex::new(JoinSet::new()),
            context,
        }
    }

    /// Run the serve loop for `listener` bound on `address`.
    pub fn spawn<F, E>(&self, listener: Listener, address: SocketAddr, serve: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.tasks.lock().spawn(async move {
            match serve.await {
                Ok(()) => {
                    tracing::debug!(%listener, %address, "Listener exited");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(%listener, %address, error = %e, "Listener failed");
                    context.cancel();
                    Err(TaskError::Serve {
                        listener,
                        address,
                        source: Box::new(e),
                    })
                }
            }
        });
    }

    /// Number of loops not yet joined.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no loops are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Join every loop spawned so far.
    ///
    /// # Errors
    ///
    /// Returns the first failure in completion order; later failures are
    /// only logged.
    pub async fn wait(&self) -> Result<(), TaskError> {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let mut first = None;

        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(TaskError::from).and_then(|r| r);
            if let Err(e) = result {
                if first.is_none() {
                    first = Some(e);
                } else {
                    tracing::debug!(error = %e, "Additional listener failure");
                }
            }
        }

        first.map_or(Ok(()), Err)
    }
}
