//! Single deferred refresh timer

use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// At most one timer is armed at any time; re-arming cancels the previous
/// one so duplicate proactive refreshes cannot fire.
#[derive(Default)]
pub struct RefreshScheduler {
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any armed timer, then schedule `task` to run after `delay`.
    pub async fn arm<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut timer = self.timer.lock().await;
        if let Some(handle) = timer.take() {
            handle.abort();
        }
        debug!("Arming refresh timer to fire in {delay:?}");
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
    }

    /// Cancel the armed timer, if any. Idempotent.
    pub async fn cancel(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
    }
}
