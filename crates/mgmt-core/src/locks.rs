//! Lineage locks
//!
//! Writers on addresses in an ancestor/descendant relationship run one at
//! a time, in arrival order. Writers on unrelated subtrees do not wait for
//! each other.

use mgmt_model::Address;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

#[derive(Debug, Default)]
struct Queue {
    next_ticket: u64,
    // Ordered by ticket
    entries: Vec<(u64, Address)>,
}

impl Queue {
    fn blocked(&self, ticket: u64, address: &Address) -> bool {
        self.entries
            .iter()
            .take_while(|(t, _)| *t < ticket)
            .any(|(_, held)| held.overlaps(address))
    }
}

#[derive(Debug, Default)]
struct Inner {
    queue: Mutex<Queue>,
    released: Notify,
}

/// FIFO lock table keyed by address lineage
#[derive(Debug, Clone, Default)]
pub struct LineageLocks {
    inner: Arc<Inner>,
}

impl LineageLocks {
    /// Empty lock table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no earlier request overlaps `address`
    ///
    /// The request joins the queue immediately; dropping the returned
    /// future before it resolves leaves the queue.
    pub async fn acquire(&self, address: Address) -> LineageGuard {
        let guard = {
            let mut queue = self.inner.queue.lock();
            let ticket = queue.next_ticket;
            queue.next_ticket += 1;
            queue.entries.push((ticket, address.clone()));
            LineageGuard {
                inner: Arc::clone(&self.inner),
                ticket,
                address,
            }
        };

        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.inner.queue.lock().blocked(guard.ticket, &guard.address) {
                trace!(address = %guard.address, ticket = guard.ticket, "lineage lock acquired");
                return guard;
            }
            released.await;
        }
    }

    /// Requests queued or holding
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().entries.len()
    }
}

/// Held lineage lock, released on drop
#[derive(Debug)]
pub struct LineageGuard {
    inner: Arc<Inner>,
    ticket: u64,
    address: Address,
}

impl LineageGuard {
    /// Locked address
    #[inline]
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl Drop for LineageGuard {
    fn drop(&mut self) {
        self.inner
            .queue
            .lock()
            .entries
            .retain(|(ticket, _)| *ticket != self.ticket);
        self.inner.released.notify_waiters();
    }
}
