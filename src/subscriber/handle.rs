use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::SubscriberState;
use crate::utils::error::Result;

/// Owner's side of a spawned subscriber.
///
/// Dropping the handle also stops the worker, since a dropped stop sender
/// counts as a stop request.
#[derive(Debug)]
pub struct SubscriberHandle {
    stop: watch::Sender<bool>,
    state: watch::Receiver<SubscriberState>,
    task: JoinHandle<Result<()>>,
}

impl SubscriberHandle {
    pub(super) fn new(
        stop: watch::Sender<bool>,
        state: watch::Receiver<SubscriberState>,
        task: JoinHandle<Result<()>>,
    ) -> Self {
        Self { stop, state, task }
    }

    /// Requests a stop. Returns immediately; use [`join`](Self::join) to wait.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn state(&self) -> watch::Receiver<SubscriberState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the worker to return and yields its outcome.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Ok(()),
        }
    }

    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }
}
