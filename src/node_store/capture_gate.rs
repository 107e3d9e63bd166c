//! CaptureGate - per-node camera exclusivity
//!
//! One lease at a time; further callers wait in line (no timeout, no queue
//! limit). Dropping the lease releases the camera.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes access to the node's camera
pub struct CaptureGate {
    node_id: String,
    lock: Arc<Mutex<()>>,
    waiting: AtomicUsize,
}

impl CaptureGate {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            lock: Arc::new(Mutex::new(())),
            waiting: AtomicUsize::new(0),
        }
    }

    /// Wait for the camera
    pub async fn acquire(&self) -> CaptureLease {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        let guard = self.lock.clone().lock_owned().await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);

        tracing::debug!(node_id = %self.node_id, "Camera lease acquired");
        CaptureLease {
            node_id: self.node_id.clone(),
            _guard: guard,
        }
    }

    /// Callers currently waiting for the lease
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }
}

/// Camera lease - released on Drop
pub struct CaptureLease {
    node_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for CaptureLease {
    fn drop(&mut self) {
        tracing::debug!(node_id = %self.node_id, "Camera lease released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_acquire_release() {
        let gate = CaptureGate::new("node_1");
        let lease = gate.acquire().await;
        assert!(gate.is_busy());
        drop(lease);
        assert!(!gate.is_busy());
        let _again = gate.acquire().await;
        assert!(gate.is_busy());
    }

    #[tokio::test]
    async fn test_second_caller_waits_instead_of_failing() {
        let gate = Arc::new(CaptureGate::new("node_1"));
        let lease = gate.acquire().await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _lease = gate.acquire().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(gate.waiting(), 1);
        assert!(!waiter.is_finished());

        drop(lease);
        waiter.await.unwrap();
        assert_eq!(gate.waiting(), 0);
    }
}
