//! Delayed ring-timeout tasks keyed by call id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use palaver_shared::CallId;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

#[derive(Clone, Default)]
pub struct RingTimeouts {
    tasks: Arc<Mutex<HashMap<CallId, AbortHandle>>>,
}

impl RingTimeouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fire` after `delay` unless [`cancel`](Self::cancel) gets there
    /// first. Rescheduling a call replaces its pending task.
    pub async fn schedule<F>(&self, id: CallId, delay: Duration, fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Held across the spawn so the task cannot deregister before it is
        // registered.
        let mut tasks = self.tasks.lock().await;
        let registry = self.tasks.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            registry.lock().await.remove(&id);
            fire.await;
        });
        if let Some(previous) = tasks.insert(id, handle.abort_handle()) {
            previous.abort();
        }
        debug!(call = %id, delay_ms = delay.as_millis() as u64, "Ring timeout scheduled");
    }

    /// Abort the pending timeout for `id`. Returns `false` if none was pending
    /// (already fired or never scheduled).
    pub async fn cancel(&self, id: CallId) -> bool {
        match self.tasks.lock().await.remove(&id) {
            Some(handle) => {
                handle.abort();
                debug!(call = %id, "Ring timeout cancelled");
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }
}
