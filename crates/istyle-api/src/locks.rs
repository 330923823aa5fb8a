//! # Listing Write Locks
//!
//! Handlers that change a listing or one of its transactions hold that
//! listing's lock from validation through the database write to the
//! in-memory commit. Database writes for one listing therefore land in the
//! same order as the commits they mirror, and a prepared change cannot be
//! overtaken between the two.
//!
//! Async counterpart of [`istyle_market::KeyedLocks`]: the guard may be held
//! across `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use istyle_core::ListingId;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<ListingId, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Clone, Default)]
pub struct ListingWriteLocks {
    slots: Slots,
}

impl ListingWriteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock on `listing`.
    pub async fn lock(&self, listing: ListingId) -> ListingWriteGuard {
        let slot = Arc::clone(self.slots.lock().entry(listing).or_default());
        let guard = Arc::clone(&slot).lock_owned().await;
        ListingWriteGuard {
            slots: Arc::clone(&self.slots),
            listing,
            slot,
            guard: Some(guard),
        }
    }

    /// Number of listings currently locked or awaited.
    pub fn active(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Held lock on one listing. Released on drop.
#[must_use = "the listing is unlocked as soon as the guard is dropped"]
pub struct ListingWriteGuard {
    slots: Slots,
    listing: ListingId,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl std::fmt::Debug for ListingWriteGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListingWriteGuard")
            .field("listing", &self.listing)
            .finish()
    }
}

impl Drop for ListingWriteGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.slots.lock();
        // The map and this guard hold the only references: nobody waits.
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.listing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_listing_waits_for_release() {
        let locks = ListingWriteLocks::new();
        let listing = ListingId::new();
        let guard = locks.lock(listing).await;

        let contender = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = contender.lock(listing).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn different_listings_do_not_contend() {
        let locks = ListingWriteLocks::new();
        let _a = locks.lock(ListingId::new()).await;
        let _b = locks.lock(ListingId::new()).await;
        assert_eq!(locks.active(), 2);
    }
}
