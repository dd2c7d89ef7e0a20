use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::error::{PoolError, Result};

/// Bounded pool of worker slot ids `0..n_workers`.
///
/// Every id starts in the pool. A starting worker takes one with
/// [`acquire`](SlotPool::acquire) and holds the returned [`SlotToken`] for as
/// long as it lives; dropping the token puts the id back. Since the channel
/// holds exactly `n_workers` ids, no two live tokens ever share an id.
#[derive(Debug, Clone)]
pub struct SlotPool {
    tx: mpsc::Sender<usize>,
    rx: Arc<Mutex<mpsc::Receiver<usize>>>,
    n_workers: usize,
}

impl SlotPool {
    pub fn new(n_workers: usize) -> Self {
        let (tx, rx) = mpsc::channel(n_workers.max(1));
        for slot in 0..n_workers {
            // Capacity is n_workers, so this never fails.
            tx.try_send(slot).expect("slot channel has room for every slot id");
        }
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            n_workers,
        }
    }

    /// Take a free slot, waiting at most `timeout`.
    pub async fn acquire(&self, timeout: Duration) -> Result<SlotToken> {
        let received = tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        })
        .await;

        match received {
            Ok(Some(slot)) => {
                tracing::debug!(slot, "Slot acquired");
                Ok(SlotToken {
                    slot,
                    tx: self.tx.clone(),
                })
            }
            Ok(None) => Err(PoolError::Internal("slot channel closed".to_string())),
            Err(_) => Err(PoolError::SlotAcquisitionTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Slot ids currently waiting in the pool.
    pub fn available(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn n_workers(&self) -> usize {
        self.n_workers
    }
}

/// Exclusive claim on one slot id.
#[derive(Debug)]
pub struct SlotToken {
    slot: usize,
    tx: mpsc::Sender<usize>,
}

impl SlotToken {
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl Drop for SlotToken {
    fn drop(&mut self) {
        // A closed channel means the pool itself is gone.
        if let Err(mpsc::error::TrySendError::Full(slot)) = self.tx.try_send(self.slot) {
            tracing::warn!(slot, "Slot pool already full, slot not returned");
        }
    }
}
