//! # In-Memory Stores
//!
//! Process-local implementations of the store contracts, built on a
//! generic [`Store`]. These are the primary stores of a running node; the
//! optional database layer writes through behind them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use istyle_core::{ListingId, TransactionId, UserId};
use istyle_state::{Listing, ListingStatus, Rating, Transaction};
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::store::{ListingFilter, ListingStore, PartyFilter, RatingStore, TransactionStore};

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// Synchronous on purpose: the `parking_lot` lock is never held across an
/// `.await`, and it does not poison when a writer panics.
#[derive(Debug)]
pub struct Store<K, T> {
    data: Arc<RwLock<HashMap<K, T>>>,
}

impl<K, T> Clone for Store<K, T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<K: Eq + Hash + Copy, T: Clone> Store<K, T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, key: K, value: T) -> Option<T> {
        self.data.write().insert(key, value)
    }

    pub fn get(&self, key: &K) -> Option<T> {
        self.data.read().get(key).cloned()
    }

    /// Records matching `pred`.
    pub fn filter(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.data
            .read()
            .values()
            .filter(|v| pred(v))
            .cloned()
            .collect()
    }

    /// Atomically read-validate-update a record.
    ///
    /// The closure runs under the write lock. Returns `None` if the key is
    /// absent, otherwise the closure's result.
    pub fn try_update<R, E>(
        &self,
        key: &K,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        self.data.write().get_mut(key).map(f)
    }

    /// Run `f` with exclusive access to the whole map.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut HashMap<K, T>) -> R) -> R {
        f(&mut self.data.write())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.data.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Eq + Hash + Copy, T: Clone> Default for Store<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Listings -----------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryListingStore {
    inner: Store<ListingId, Listing>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListingStore for MemoryListingStore {
    fn get(&self, id: ListingId) -> Result<Option<Listing>, StoreError> {
        Ok(self.inner.get(&id))
    }

    fn insert(&self, listing: Listing) -> Result<(), StoreError> {
        self.inner.with_write(|map| {
            if map.contains_key(&listing.id) {
                return Err(StoreError::Conflict {
                    entity: "listing",
                    reason: format!("{} already exists", listing.id),
                });
            }
            map.insert(listing.id, listing);
            Ok(())
        })
    }

    fn update(&self, listing: Listing) -> Result<(), StoreError> {
        let id = listing.id;
        self.inner
            .try_update(&id, |current| {
                *current = listing;
                Ok(())
            })
            .unwrap_or_else(|| Err(listing_not_found(id)))
    }

    fn set_status(&self, id: ListingId, status: ListingStatus) -> Result<Listing, StoreError> {
        self.inner
            .try_update(&id, |current| {
                current.set_status(status);
                Ok(current.clone())
            })
            .unwrap_or_else(|| Err(listing_not_found(id)))
    }

    fn list(&self, filter: &ListingFilter) -> Result<Vec<Listing>, StoreError> {
        let mut out = self.inner.filter(|l| filter.matches(l));
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

fn listing_not_found(id: ListingId) -> StoreError {
    StoreError::NotFound {
        entity: "listing",
        id: id.to_string(),
    }
}

// -- Transactions -------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryTransactionStore {
    inner: Store<TransactionId, Transaction>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut txs: Vec<Transaction>) -> Vec<Transaction> {
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        txs
    }
}

impl TransactionStore for MemoryTransactionStore {
    fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.inner.get(&id))
    }

    fn insert(&self, tx: Transaction) -> Result<(), StoreError> {
        self.inner.with_write(|map| {
            if map.contains_key(&tx.id) {
                return Err(StoreError::Conflict {
                    entity: "transaction",
                    reason: format!("{} already exists", tx.id),
                });
            }
            if tx.is_open()
                && map
                    .values()
                    .any(|other| other.listing_id == tx.listing_id && other.is_open())
            {
                return Err(StoreError::Conflict {
                    entity: "transaction",
                    reason: format!("{} already has an open transaction", tx.listing_id),
                });
            }
            map.insert(tx.id, tx);
            Ok(())
        })
    }

    fn compare_and_swap(&self, expected_version: u64, next: Transaction) -> Result<(), StoreError> {
        let id = next.id;
        self.inner
            .try_update(&id, |current| {
                if current.version != expected_version {
                    return Err(StoreError::VersionMismatch {
                        id: id.to_string(),
                        expected: expected_version,
                        actual: current.version,
                    });
                }
                *current = next;
                Ok(())
            })
            .unwrap_or_else(|| {
                Err(StoreError::NotFound {
                    entity: "transaction",
                    id: id.to_string(),
                })
            })
    }

    fn list_for_party(
        &self,
        user: UserId,
        filter: PartyFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        Ok(Self::sorted(self.inner.filter(|tx| filter.matches(user, tx))))
    }

    fn list_for_listing(&self, listing: ListingId) -> Result<Vec<Transaction>, StoreError> {
        Ok(Self::sorted(self.inner.filter(|tx| tx.listing_id == listing)))
    }

    fn open_for_listing(&self, listing: ListingId) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .inner
            .filter(|tx| tx.listing_id == listing && tx.is_open())
            .into_iter()
            .next())
    }
}

// -- Ratings ------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MemoryRatingStore {
    inner: Store<(TransactionId, UserId), Rating>,
}

impl MemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RatingStore for MemoryRatingStore {
    fn insert_if_absent(&self, rating: Rating) -> Result<bool, StoreError> {
        let key = (rating.transaction_id, rating.rater_id);
        Ok(self.inner.with_write(|map| {
            if map.contains_key(&key) {
                false
            } else {
                map.insert(key, rating);
                true
            }
        }))
    }

    fn exists(&self, transaction: TransactionId, rater: UserId) -> Result<bool, StoreError> {
        Ok(self.inner.contains(&(transaction, rater)))
    }

    fn remove(&self, transaction: TransactionId, rater: UserId) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .with_write(|map| map.remove(&(transaction, rater)).is_some()))
    }

    fn list_for_user(&self, user: UserId) -> Result<Vec<Rating>, StoreError> {
        let mut out = self.inner.filter(|r| r.rated_user_id == user);
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use istyle_state::{CancellationPolicy, ListingKind, RatingScore, TransitionCommand};

    fn listing() -> Listing {
        Listing::new(UserId::new(), "Linen shirt", "", ListingKind::Sale, None).unwrap()
    }

    #[test]
    fn store_try_update_runs_under_lock() {
        let store: Store<u32, i32> = Store::new();
        store.insert(1, 10);
        let r: Option<Result<i32, ()>> = store.try_update(&1, |v| {
            *v += 5;
            Ok(*v)
        });
        assert_eq!(r, Some(Ok(15)));
        assert_eq!(store.get(&1), Some(15));
        assert!(store.try_update::<(), ()>(&2, |_| Ok(())).is_none());
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }

    #[test]
    fn store_clone_shares_data() {
        let a: Store<u32, &str> = Store::new();
        let b = a.clone();
        a.insert(7, "x");
        assert_eq!(b.get(&7), Some("x"));
    }

    #[test]
    fn listing_filters() {
        let store = MemoryListingStore::new();
        let a = listing();
        let mut b = Listing::new(UserId::new(), "Swap", "", ListingKind::Exchange, None).unwrap();
        b.set_status(ListingStatus::Unavailable);
        store.insert(a.clone()).unwrap();
        store.insert(b.clone()).unwrap();

        let all = store.list(&ListingFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        let available = store
            .list(&ListingFilter {
                status: Some(ListingStatus::Available),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(available, vec![a.clone()]);
        let by_owner = store
            .list(&ListingFilter {
                owner_id: Some(b.owner_id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_owner, vec![b]);
    }

    #[test]
    fn listing_duplicate_insert_conflicts_and_missing_update_fails() {
        let store = MemoryListingStore::new();
        let l = listing();
        store.insert(l.clone()).unwrap();
        assert!(matches!(
            store.insert(l.clone()),
            Err(StoreError::Conflict { .. })
        ));
        assert!(matches!(
            store.update(listing()),
            Err(StoreError::NotFound { .. })
        ));
        let updated = store.set_status(l.id, ListingStatus::Unavailable).unwrap();
        assert_eq!(updated.status, ListingStatus::Unavailable);
    }

    #[test]
    fn transaction_insert_refuses_second_open_for_listing() {
        let store = MemoryTransactionStore::new();
        let l = listing();
        let first = Transaction::initiate(&l, UserId::new(), None).unwrap();
        let second = Transaction::initiate(&l, UserId::new(), None).unwrap();
        store.insert(first.clone()).unwrap();
        assert!(matches!(
            store.insert(second),
            Err(StoreError::Conflict { .. })
        ));
        assert_eq!(store.open_for_listing(l.id).unwrap(), Some(first));
    }

    #[test]
    fn compare_and_swap_rejects_stale_version() {
        let store = MemoryTransactionStore::new();
        let l = listing();
        let tx = Transaction::initiate(&l, UserId::new(), None).unwrap();
        store.insert(tx.clone()).unwrap();

        let mut next = tx.clone();
        let buyer = next.buyer_id;
        next.apply(buyer, TransitionCommand::Cancel { reason: None }, CancellationPolicy::default())
            .unwrap();
        store.compare_and_swap(tx.version, next.clone()).unwrap();

        let err = store.compare_and_swap(tx.version, next).unwrap_err();
        assert_eq!(
            err,
            StoreError::VersionMismatch {
                id: tx.id.to_string(),
                expected: 1,
                actual: 2,
            }
        );
        assert_eq!(store.open_for_listing(l.id).unwrap(), None);
    }

    #[test]
    fn party_filters() {
        let store = MemoryTransactionStore::new();
        let user = UserId::new();
        let bought = Transaction::initiate(&listing(), user, None).unwrap();
        let mut own = listing();
        own.owner_id = user;
        let sold = Transaction::initiate(&own, UserId::new(), None).unwrap();
        store.insert(bought.clone()).unwrap();
        store.insert(sold.clone()).unwrap();
        store
            .insert(Transaction::initiate(&listing(), UserId::new(), None).unwrap())
            .unwrap();

        assert_eq!(store.list_for_party(user, PartyFilter::All).unwrap().len(), 2);
        assert_eq!(
            store.list_for_party(user, PartyFilter::Buying).unwrap(),
            vec![bought]
        );
        assert_eq!(
            store.list_for_party(user, PartyFilter::Selling).unwrap(),
            vec![sold]
        );
    }

    #[test]
    fn ratings_insert_once_and_average() {
        let store = MemoryRatingStore::new();
        let seller = UserId::new();
        let rating = |score: i64| Rating {
            transaction_id: TransactionId::new(),
            rater_id: UserId::new(),
            rated_user_id: seller,
            score: RatingScore::new(score).unwrap(),
            comment: None,
            created_at: istyle_core::Timestamp::now(),
        };
        let first = rating(4);
        assert!(store.insert_if_absent(first.clone()).unwrap());
        assert!(!store.insert_if_absent(first.clone()).unwrap());
        assert!(store.exists(first.transaction_id, first.rater_id).unwrap());
        assert!(store.insert_if_absent(rating(5)).unwrap());

        assert_eq!(store.list_for_user(seller).unwrap().len(), 2);
        assert_eq!(store.average_for_user(seller).unwrap(), Some(4.5));
        assert_eq!(store.average_for_user(UserId::new()).unwrap(), None);
    }
}
