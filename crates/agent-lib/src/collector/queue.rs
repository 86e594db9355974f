//! Bounded queue for network flow records
//!
//! Producers push flow records as they are observed; the orchestrator
//! drains the whole queue once per reporting cycle. Capacity pressure
//! is resolved by policy rather than by unbounded growth.

use crate::models::FlowRecord;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// What to do with a push into a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Suspend the producer until a drain frees space
    Block,
    /// Evict the oldest record and accept the new one
    DropOldest,
}

/// Bounded FIFO of flow records shared between producers and the
/// reporting loop
pub struct FlowQueue {
    records: Mutex<VecDeque<FlowRecord>>,
    capacity: usize,
    policy: OverflowPolicy,
    drained: Notify,
}

impl FlowQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        assert!(capacity > 0, "flow queue capacity must be positive");
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            policy,
            drained: Notify::new(),
        }
    }

    /// Push one record, applying the overflow policy when full.
    ///
    /// Under `Block` this awaits a drain; under `DropOldest` it always
    /// completes immediately.
    pub async fn push(&self, record: FlowRecord) {
        loop {
            // Register for the wakeup before re-checking capacity, so
            // a drain between the check and the await is not missed.
            let notified = self.drained.notified();

            {
                let mut records = self.records.lock().await;
                if records.len() < self.capacity {
                    records.push_back(record);
                    return;
                }

                match self.policy {
                    OverflowPolicy::DropOldest => {
                        records.pop_front();
                        records.push_back(record);
                        debug!("flow queue full, dropped oldest record");
                        return;
                    }
                    OverflowPolicy::Block => {}
                }
            }

            notified.await;
        }
    }

    /// Remove and return every queued record in arrival order.
    ///
    /// The swap happens under the lock, so records pushed concurrently
    /// land wholly in this batch or wholly in the next.
    pub async fn drain(&self) -> Vec<FlowRecord> {
        let batch: Vec<FlowRecord> = {
            let mut records = self.records.lock().await;
            records.drain(..).collect()
        };

        if !batch.is_empty() {
            self.drained.notify_waiters();
        }

        batch
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}
