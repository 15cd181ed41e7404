use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{EngineError, EngineResult};

/// Caps how many sandboxes exist at once. A job waits for a slot at most
/// `acquire_timeout`, then fails instead of queueing forever.
#[derive(Debug, Clone)]
pub struct SandboxPool {
    semaphore: Arc<Semaphore>,
    size: usize,
    acquire_timeout: Duration,
}

impl SandboxPool {
    pub fn new(size: usize, acquire_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
            acquire_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Reserve one slot; released when the permit drops.
    pub async fn acquire(&self) -> EngineResult<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(self.acquire_timeout, permit).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(EngineError::Internal("sandbox pool closed".into())),
            Err(_) => Err(EngineError::PoolExhausted(self.acquire_timeout)),
        }
    }
}
