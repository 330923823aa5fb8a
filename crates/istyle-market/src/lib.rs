//! # istyle-market — Marketplace Engine
//!
//! Binds the transaction state machine from `istyle-state` to its
//! collaborators and makes every mutation atomic.
//!
//! ## Collaborators
//!
//! - [`ListingStore`], [`TransactionStore`], [`RatingStore`]: persistence
//!   contracts, with in-memory implementations in [`memory`].
//! - [`ProofStorage`]: accepts the uploaded payment proof and returns an
//!   opaque [`ProofRef`](istyle_core::ProofRef).
//! - [`EventSink`]: receives [`MarketEvent`]s (the initiation message
//!   is forwarded to the messaging subsystem this way).
//!
//! ## Atomicity
//!
//! - **Creation** runs under a per-listing lock ([`KeyedLocks`]) spanning
//!   the availability check and the insert. The in-memory transaction
//!   store additionally refuses a second open transaction per listing.
//! - **Transitions** read, validate on a copy, then
//!   [`TransactionStore::compare_and_swap`] on the `version` token. The
//!   losing writer gets `InvalidTransition` and is never retried.
//! - **Two-phase use**: every mutation splits into `prepare_*`, which
//!   validates and returns the next state, and `apply_*`, which commits it
//!   under the same checks. Nothing is visible between the two.
//!
//! All locks are `parking_lot` and are never held across `.await`.

pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod locks;
pub mod memory;
pub mod proof;
pub mod store;

pub use engine::{
    concurrent_modification, ListingUpdate, Marketplace, NewListing, PendingRating,
    PendingTransition, RatingSummary,
};
pub use error::{MarketError, ProofStorageError, StoreError};
pub use events::{EventSink, MarketEvent, MemoryEventLog, NoopEventSink};
pub use gate::ListingGate;
pub use locks::KeyedLocks;
pub use memory::{MemoryListingStore, MemoryRatingStore, MemoryTransactionStore, Store};
pub use proof::{
    discard_proof, LocalProofStorage, MemoryProofStorage, ProofFormat, ProofStorage,
    MAX_PROOF_BYTES,
};
pub use store::{ListingFilter, ListingStore, PartyFilter, RatingStore, TransactionStore};
