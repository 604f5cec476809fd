//! Operation Queues (C8): a per-(transport, operation-kind) FIFO ticket
//! system. Operations of the same kind run strictly serially; different
//! kinds interleave freely (spec §4.8).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use transfer_types::TransportKind;

/// Identifies one queue: a transport plus the operation kind running on it
/// (e.g. `Ftp`/`"list"`, `Http`/`"download"`). Stream uploads never key
/// into this map at all: they pass `manage_active: false` and bypass the
/// queue entirely so a long upload never blocks a short listing.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueueKey {
    pub transport: TransportKind,
    pub operation: &'static str,
}

impl QueueKey {
    pub fn new(transport: TransportKind, operation: &'static str) -> Self {
        Self { transport, operation }
    }
}

struct Lane {
    // A oneshot is used per waiter rather than a semaphore so the queue can
    // release the next ticket explicitly on drop, preserving FIFO order
    // even if a ticket holder panics mid-operation.
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

/// Holds one active "turn" in a queue lane. Dropping it (including via
/// early return or panic unwind) releases the next waiter.
pub struct Ticket {
    _release: Option<oneshot::Sender<()>>,
}

#[derive(Clone, Default)]
pub struct OperationQueue {
    lanes: Arc<Mutex<HashMap<QueueKey, Arc<Lane>>>>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the lane for `key` and wait for a turn. The returned [`Ticket`]
    /// holds the turn open until dropped.
    pub async fn acquire(&self, key: QueueKey) -> Ticket {
        let lane = {
            let mut lanes = self.lanes.lock().await;
            lanes
                .entry(key)
                .or_insert_with(|| Arc::new(Lane { tail: Mutex::new(None) }))
                .clone()
        };

        let mut tail = lane.tail.lock().await;
        if let Some(previous) = tail.take() {
            let _ = previous.await;
        }

        let (release_tx, release_rx) = oneshot::channel();
        *tail = Some(release_rx);
        Ticket { _release: Some(release_tx) }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Some(release) = self._release.take() {
            let _ = release.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_kind_operations_run_strictly_serially() {
        let queue = OperationQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let key = QueueKey::new(TransportKind::Ftp, "list");

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue = queue.clone();
            let order = order.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                let _ticket = queue.acquire(key).await;
                tokio::time::sleep(Duration::from_millis(5)).await;
                order.lock().await.push(i);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn different_kinds_do_not_block_each_other() {
        let queue = OperationQueue::new();
        let counter = Arc::new(AtomicU32::new(0));

        let slow_queue = queue.clone();
        let slow_counter = counter.clone();
        let slow = tokio::spawn(async move {
            let _ticket = slow_queue.acquire(QueueKey::new(TransportKind::Ftp, "download")).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            slow_counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let fast_ticket = queue.acquire(QueueKey::new(TransportKind::Ftp, "list")).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        drop(fast_ticket);

        slow.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
