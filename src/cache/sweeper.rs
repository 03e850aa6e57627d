use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use super::store::ResponseCache;

/// Background task that periodically drops expired cache entries.
///
/// The task is aborted when the handle is dropped.
pub struct CacheSweeper {
    handle: JoinHandle<()>,
}

impl CacheSweeper {
    pub fn spawn<V>(cache: Arc<ResponseCache<V>>, every: Duration) -> Self
    where
        V: Clone + Send + Sync + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await; // Skip the first immediate tick
            loop {
                interval.tick().await;
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, remaining = cache.len(), "swept expired cache entries");
                }
            }
        });
        Self { handle }
    }

    /// Stop the sweep loop and wait for it to wind down.
    pub async fn shutdown(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
