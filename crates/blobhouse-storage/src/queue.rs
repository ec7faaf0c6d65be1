//! Bounded Work Queues
//!
//! The flow-control seam between the ingest layer and the disk writers:
//! `push` blocks while the queue is full, so a slow disk throttles its
//! producers instead of buffering without bound. `take` blocks while empty.
//!
//! Built on `Mutex<VecDeque>` plus two `Notify` handles rather than an mpsc
//! channel because shutdown needs `is_empty`: `stop` drains the write
//! queue, then the replication queue, polling until both report empty.

use crate::storage_file::{ReplicationFile, StorageFile};
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

/// Queue feeding one disk's writer.
pub type WriteQueue = BoundedQueue<StorageFile>;

/// Queue feeding the node's replication writer.
pub type ReplicationQueue = BoundedQueue<ReplicationFile>;

pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Enqueue, waiting for space if the queue is full.
    pub async fn push(&self, item: T) {
        let mut item = Some(item);
        loop {
            {
                let mut items = self.items.lock().await;
                if items.len() < self.capacity {
                    items.push_back(item.take().expect("item consumed twice"));
                    self.not_empty.notify_one();
                    return;
                }
            }
            self.not_full.notified().await;
        }
    }

    /// Dequeue, waiting for an item if the queue is empty.
    pub async fn take(&self) -> T {
        loop {
            {
                let mut items = self.items.lock().await;
                if let Some(item) = items.pop_front() {
                    self.not_full.notify_one();
                    if !items.is_empty() {
                        // Cascade so additional waiting consumers wake too.
                        self.not_empty.notify_one();
                    }
                    return item;
                }
            }
            self.not_empty.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}
