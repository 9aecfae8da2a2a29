//! Work that outlives the request that started it.
//!
//! Background refreshes are registered here so shutdown can wait for them to
//! finish before the process exits.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `fut` on the runtime, tracked until it completes.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock();
        // Reap whatever already finished so the set does not grow unbounded.
        while let Some(res) = set.try_join_next() {
            if let Err(e) = res {
                warn!(error = %e, "background task panicked");
            }
        }
        set.spawn(fut);
    }

    /// Tasks still tracked (finished ones are counted until reaped).
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Wait for every task spawned so far.
    pub async fn drain(&self) {
        let mut set = std::mem::take(&mut *self.lock());
        if !set.is_empty() {
            debug!(tasks = set.len(), "waiting for background tasks");
        }
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "background task panicked");
            }
        }
    }
}
