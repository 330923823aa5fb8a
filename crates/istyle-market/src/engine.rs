//! # Marketplace Engine
//!
//! [`Marketplace`] owns the stores and applies every lifecycle operation
//! as one atomic check-and-set:
//!
//! 1. read the current record,
//! 2. validate and apply on a copy ([`Transaction::apply`]),
//! 3. [`TransactionStore::compare_and_swap`] against the version read.
//!
//! Creation, delivery and cancellation additionally run under the
//! listing's lock so the availability gate cannot be observed half-moved.
//! Side effects on the listing happen after the swap commits; events and
//! metrics after that.
//!
//! Each mutation is also available as a `prepare_*` / `apply_*` pair. The
//! prepared value is the validated next state; nothing is visible until it
//! is applied, and applying fails the same way a lost race does if the
//! record moved in between. Callers that must persist elsewhere first (the
//! HTTP binding writes Postgres ahead of memory) sit between the two.

use std::sync::Arc;

use istyle_core::{ListingId, ProofRef, TransactionId, UserId};
use istyle_state::{
    CancellationPolicy, Listing, ListingKind, ListingStatus, PartyRole, Rating, Transaction,
    TransactionAction, TransactionError, TransactionStatus, TransitionCommand, TransitionRecord,
};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, StoreError};
use crate::events::{EventSink, MarketEvent, NoopEventSink};
use crate::gate::ListingGate;
use crate::memory::{MemoryListingStore, MemoryRatingStore, MemoryTransactionStore};
use crate::proof::{discard_proof, ProofFormat, ProofStorage};
use crate::store::{ListingFilter, ListingStore, PartyFilter, RatingStore, TransactionStore};

/// Input for [`Marketplace::create_listing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewListing {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: ListingKind,
    #[serde(default)]
    pub price: Option<String>,
}

/// Owner edits. `None` leaves a field as is; a blank price clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub status: Option<ListingStatus>,
}

/// Ratings a user has received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingSummary {
    pub user_id: UserId,
    pub count: usize,
    pub average: Option<f64>,
    pub ratings: Vec<Rating>,
}

/// A validated transition that has not been committed.
///
/// `next.version` is `current.version + 1`; applying succeeds only while
/// the stored transaction is still at `current.version`.
#[derive(Debug, Clone)]
pub struct PendingTransition {
    pub actor: UserId,
    pub current: Transaction,
    pub next: Transaction,
    pub record: TransitionRecord,
}

impl PendingTransition {
    /// Whether committing this transition closes the listing.
    pub fn closes_listing(&self) -> bool {
        self.next.status == TransactionStatus::Delivered
    }
}

/// A validated rating that has not been committed.
#[derive(Debug, Clone)]
pub struct PendingRating {
    pub current: Transaction,
    pub next: Transaction,
    pub rating: Rating,
}

#[derive(Clone)]
pub struct Marketplace {
    listings: Arc<dyn ListingStore>,
    transactions: Arc<dyn TransactionStore>,
    ratings: Arc<dyn RatingStore>,
    events: Arc<dyn EventSink>,
    gate: ListingGate,
    policy: CancellationPolicy,
}

impl std::fmt::Debug for Marketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marketplace")
            .field("policy", &self.policy)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl Marketplace {
    pub fn new(
        listings: Arc<dyn ListingStore>,
        transactions: Arc<dyn TransactionStore>,
        ratings: Arc<dyn RatingStore>,
    ) -> Self {
        let gate = ListingGate::new(Arc::clone(&listings), Arc::clone(&transactions));
        Self {
            listings,
            transactions,
            ratings,
            events: Arc::new(NoopEventSink),
            gate,
            policy: CancellationPolicy::default(),
        }
    }

    /// A marketplace backed by fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryListingStore::new()),
            Arc::new(MemoryTransactionStore::new()),
            Arc::new(MemoryRatingStore::new()),
        )
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_policy(mut self, policy: CancellationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> CancellationPolicy {
        self.policy
    }

    // ── Listings ───────────────────────────────────────────────────────

    pub fn create_listing(&self, owner: UserId, new: NewListing) -> Result<Listing, MarketError> {
        let listing = self.prepare_listing(owner, new)?;
        self.publish_listing(listing)
    }

    /// Validate a new listing without storing it.
    pub fn prepare_listing(&self, owner: UserId, new: NewListing) -> Result<Listing, MarketError> {
        Ok(Listing::new(owner, new.title, new.description, new.kind, new.price)?)
    }

    /// Store a listing built by [`Marketplace::prepare_listing`].
    pub fn publish_listing(&self, listing: Listing) -> Result<Listing, MarketError> {
        self.listings.insert(listing.clone())?;
        tracing::info!(
            listing_id = %listing.id,
            owner_id = %listing.owner_id,
            kind = %listing.kind,
            "listing created"
        );
        Ok(listing)
    }

    /// Apply an owner's edit. Open transactions keep the seller they were
    /// created with.
    pub fn update_listing(
        &self,
        actor: UserId,
        id: ListingId,
        update: ListingUpdate,
    ) -> Result<Listing, MarketError> {
        self.gate.with_listing_lock(id, || {
            let listing = self.prepare_listing_update(actor, id, update)?;
            self.apply_listing_update(listing)
        })
    }

    /// The listing as `update` would leave it, without storing it.
    pub fn prepare_listing_update(
        &self,
        actor: UserId,
        id: ListingId,
        update: ListingUpdate,
    ) -> Result<Listing, MarketError> {
        let mut listing = self.get_listing(id)?;
        if listing.owner_id != actor {
            return Err(MarketError::NotListingOwner {
                listing_id: id,
                actor,
            });
        }
        if let Some(title) = update.title {
            listing.set_title(title)?;
        }
        if let Some(description) = update.description {
            listing.set_description(description)?;
        }
        if let Some(price) = update.price {
            listing.set_price(Some(price))?;
        }
        if let Some(status) = update.status {
            listing.set_status(status);
        }
        Ok(listing)
    }

    /// Store a listing edited by [`Marketplace::prepare_listing_update`].
    pub fn apply_listing_update(&self, listing: Listing) -> Result<Listing, MarketError> {
        self.listings.update(listing.clone())?;
        tracing::info!(listing_id = %listing.id, status = %listing.status, "listing updated");
        Ok(listing)
    }

    pub fn get_listing(&self, id: ListingId) -> Result<Listing, MarketError> {
        Ok(self
            .listings
            .get(id)?
            .ok_or_else(|| TransactionError::listing_not_found(id))?)
    }

    pub fn list_listings(&self, filter: &ListingFilter) -> Result<Vec<Listing>, MarketError> {
        Ok(self.listings.list(filter)?)
    }

    /// Advisory availability check; see [`ListingGate::can_initiate`].
    pub fn can_initiate(&self, listing_id: ListingId) -> Result<bool, MarketError> {
        self.gate.can_initiate(listing_id)
    }

    // ── Transactions ───────────────────────────────────────────────────

    /// Open a transaction for `buyer` on `listing_id`.
    ///
    /// Of two concurrent calls for the same listing exactly one succeeds;
    /// the other fails with `ListingUnavailable`.
    pub fn initiate(
        &self,
        buyer: UserId,
        listing_id: ListingId,
        message: Option<String>,
    ) -> Result<Transaction, MarketError> {
        let result = self.gate.with_listing_lock(listing_id, || {
            let tx = self.open_transaction(buyer, listing_id, message)?;
            self.insert_transaction(tx)
        });
        self.finish_initiation(buyer, listing_id, result)
    }

    /// Validate an initiation without storing it.
    pub fn prepare_initiation(
        &self,
        buyer: UserId,
        listing_id: ListingId,
        message: Option<String>,
    ) -> Result<Transaction, MarketError> {
        let result = self
            .gate
            .with_listing_lock(listing_id, || self.open_transaction(buyer, listing_id, message));
        if let Err(err) = &result {
            record_rejection(TransactionAction::Initiate, buyer, err);
        }
        result
    }

    /// Store a transaction built by [`Marketplace::prepare_initiation`].
    /// The availability gate is checked again under the listing lock.
    pub fn apply_initiation(&self, tx: Transaction) -> Result<Transaction, MarketError> {
        let (buyer, listing_id) = (tx.buyer_id, tx.listing_id);
        let result = self.gate.with_listing_lock(listing_id, || {
            let listing = self.get_listing(listing_id)?;
            self.gate.admit(&listing)?;
            self.insert_transaction(tx)
        });
        self.finish_initiation(buyer, listing_id, result)
    }

    fn open_transaction(
        &self,
        buyer: UserId,
        listing_id: ListingId,
        message: Option<String>,
    ) -> Result<Transaction, MarketError> {
        let listing = self.get_listing(listing_id)?;
        let tx = Transaction::initiate(&listing, buyer, message)?;
        self.gate.admit(&listing)?;
        Ok(tx)
    }

    fn insert_transaction(&self, tx: Transaction) -> Result<Transaction, MarketError> {
        let listing_id = tx.listing_id;
        self.transactions
            .insert(tx.clone())
            .map_err(|err| match err {
                StoreError::Conflict { reason, .. } => {
                    MarketError::from(TransactionError::ListingUnavailable { listing_id, reason })
                }
                other => other.into(),
            })?;
        Ok(tx)
    }

    fn finish_initiation(
        &self,
        buyer: UserId,
        listing_id: ListingId,
        result: Result<Transaction, MarketError>,
    ) -> Result<Transaction, MarketError> {
        match &result {
            Ok(tx) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    listing_id = %listing_id,
                    buyer_id = %buyer,
                    seller_id = %tx.seller_id,
                    "transaction initiated"
                );
                metrics::counter!(
                    "istyle_transitions_total",
                    "action" => TransactionAction::Initiate.as_str(),
                    "status" => TransactionStatus::PendingPayment.as_str()
                )
                .increment(1);
                self.events.publish(MarketEvent::TransactionCreated {
                    transaction_id: tx.id,
                    listing_id,
                    buyer_id: buyer,
                    seller_id: tx.seller_id,
                    message: tx.initiation_message.clone(),
                });
            }
            Err(err) => record_rejection(TransactionAction::Initiate, buyer, err),
        }
        result
    }

    pub fn upload_payment_proof(
        &self,
        actor: UserId,
        id: TransactionId,
        proof_ref: ProofRef,
    ) -> Result<Transaction, MarketError> {
        self.transition(
            actor,
            id,
            TransitionCommand::UploadPaymentProof {
                proof_ref: Some(proof_ref),
            },
        )
    }

    /// Store an uploaded proof and move the transaction to `PAYMENT_SENT`.
    ///
    /// The actor's right to upload is checked before any bytes are written,
    /// and the stored proof is removed again if the transition does not
    /// commit.
    pub fn submit_payment_proof(
        &self,
        actor: UserId,
        id: TransactionId,
        storage: &dyn ProofStorage,
        format: ProofFormat,
        bytes: &[u8],
    ) -> Result<Transaction, MarketError> {
        let pending = self.prepare_payment_proof(actor, id, storage, format, bytes)?;
        let proof = pending.next.payment_proof_ref.clone();
        self.apply_transition(pending).inspect_err(|_| {
            if let Some(proof) = &proof {
                discard_proof(storage, proof);
            }
        })
    }

    /// Store an uploaded proof and prepare the `PAYMENT_SENT` transition
    /// that references it. The proof is removed if preparation fails; once
    /// this returns `Ok`, the caller discards it if the transition is not
    /// applied.
    pub fn prepare_payment_proof(
        &self,
        actor: UserId,
        id: TransactionId,
        storage: &dyn ProofStorage,
        format: ProofFormat,
        bytes: &[u8],
    ) -> Result<PendingTransition, MarketError> {
        self.check(actor, id, TransactionAction::UploadPaymentProof)?;
        let proof = storage.store(id, format, bytes)?;
        self.prepare_transition(
            actor,
            id,
            TransitionCommand::UploadPaymentProof {
                proof_ref: Some(proof.clone()),
            },
        )
        .inspect_err(|_| discard_proof(storage, &proof))
    }

    pub fn confirm_payment(&self, actor: UserId, id: TransactionId) -> Result<Transaction, MarketError> {
        self.transition(actor, id, TransitionCommand::ConfirmPayment)
    }

    pub fn mark_shipped(
        &self,
        actor: UserId,
        id: TransactionId,
        tracking_info: Option<String>,
    ) -> Result<Transaction, MarketError> {
        self.transition(actor, id, TransitionCommand::MarkShipped { tracking_info })
    }

    pub fn confirm_delivery(&self, actor: UserId, id: TransactionId) -> Result<Transaction, MarketError> {
        self.transition(actor, id, TransitionCommand::ConfirmDelivery)
    }

    pub fn cancel(
        &self,
        actor: UserId,
        id: TransactionId,
        reason: Option<String>,
    ) -> Result<Transaction, MarketError> {
        self.transition(actor, id, TransitionCommand::Cancel { reason })
    }

    /// Apply any transition command atomically.
    pub fn transition(
        &self,
        actor: UserId,
        id: TransactionId,
        command: TransitionCommand,
    ) -> Result<Transaction, MarketError> {
        let action = command.action();
        let result = self.load_transaction(id).and_then(|current| {
            self.with_gate_lock(action, current.listing_id, || {
                let pending = self.stage(actor, id, command)?;
                self.commit(pending)
            })
        });
        self.finish_transition(actor, action, result)
    }

    /// Validate a transition command without committing it.
    pub fn prepare_transition(
        &self,
        actor: UserId,
        id: TransactionId,
        command: TransitionCommand,
    ) -> Result<PendingTransition, MarketError> {
        let action = command.action();
        let result = self.stage(actor, id, command);
        if let Err(err) = &result {
            record_rejection(action, actor, err);
        }
        result
    }

    /// Commit a transition from [`Marketplace::prepare_transition`].
    pub fn apply_transition(&self, pending: PendingTransition) -> Result<Transaction, MarketError> {
        let (actor, action) = (pending.actor, pending.record.action);
        let listing_id = pending.next.listing_id;
        let result = self.with_gate_lock(action, listing_id, || self.commit(pending));
        self.finish_transition(actor, action, result)
    }

    fn with_gate_lock<R>(
        &self,
        action: TransactionAction,
        listing_id: ListingId,
        f: impl FnOnce() -> R,
    ) -> R {
        if matches!(
            action,
            TransactionAction::ConfirmDelivery | TransactionAction::Cancel
        ) {
            self.gate.with_listing_lock(listing_id, f)
        } else {
            f()
        }
    }

    fn stage(
        &self,
        actor: UserId,
        id: TransactionId,
        command: TransitionCommand,
    ) -> Result<PendingTransition, MarketError> {
        let current = self.load_transaction(id)?;
        let mut next = current.clone();
        let record = next.apply(actor, command, self.policy)?;
        Ok(PendingTransition {
            actor,
            current,
            next,
            record,
        })
    }

    fn commit(
        &self,
        pending: PendingTransition,
    ) -> Result<(Transaction, TransitionRecord), MarketError> {
        let closes_listing = pending.closes_listing();
        let PendingTransition {
            current,
            next,
            record,
            ..
        } = pending;
        self.swap(&current, next.clone(), record.action, record.actor_role)?;
        if closes_listing {
            self.listings
                .set_status(next.listing_id, ListingStatus::Unavailable)?;
            tracing::info!(listing_id = %next.listing_id, "listing closed after delivery");
        }
        Ok((next, record))
    }

    fn finish_transition(
        &self,
        actor: UserId,
        action: TransactionAction,
        result: Result<(Transaction, TransitionRecord), MarketError>,
    ) -> Result<Transaction, MarketError> {
        match result {
            Ok((tx, record)) => {
                tracing::info!(
                    transaction_id = %tx.id,
                    from = ?record.from_state,
                    to = %record.to_state,
                    action = %action,
                    actor = %actor,
                    role = %record.actor_role,
                    "transaction transition committed"
                );
                metrics::counter!(
                    "istyle_transitions_total",
                    "action" => action.as_str(),
                    "status" => record.to_state.as_str()
                )
                .increment(1);
                if let Some(from) = record.from_state {
                    self.events.publish(MarketEvent::StatusChanged {
                        transaction_id: tx.id,
                        listing_id: tx.listing_id,
                        from,
                        to: record.to_state,
                        action,
                        actor,
                        actor_role: record.actor_role,
                    });
                }
                Ok(tx)
            }
            Err(err) => {
                record_rejection(action, actor, &err);
                Err(err)
            }
        }
    }

    /// Rate the seller of a delivered transaction.
    pub fn rate(
        &self,
        actor: UserId,
        id: TransactionId,
        score: i64,
        comment: Option<String>,
    ) -> Result<Rating, MarketError> {
        let result = self
            .stage_rating(actor, id, score, comment)
            .and_then(|pending| self.commit_rating(pending));
        self.finish_rating(actor, id, result)
    }

    /// Validate a rating without committing it.
    pub fn prepare_rating(
        &self,
        actor: UserId,
        id: TransactionId,
        score: i64,
        comment: Option<String>,
    ) -> Result<PendingRating, MarketError> {
        let result = self.stage_rating(actor, id, score, comment);
        if let Err(err) = &result {
            record_rejection(TransactionAction::Rate, actor, err);
        }
        result
    }

    /// Commit a rating from [`Marketplace::prepare_rating`].
    pub fn apply_rating(&self, pending: PendingRating) -> Result<Rating, MarketError> {
        let (actor, id) = (pending.rating.rater_id, pending.rating.transaction_id);
        let result = self.commit_rating(pending);
        self.finish_rating(actor, id, result)
    }

    fn stage_rating(
        &self,
        actor: UserId,
        id: TransactionId,
        score: i64,
        comment: Option<String>,
    ) -> Result<PendingRating, MarketError> {
        let current = self.load_transaction(id)?;
        let mut next = current.clone();
        let rating = next.finalize_rating(actor, score, comment)?;
        if self.ratings.exists(id, actor)? {
            return Err(TransactionError::AlreadyRated { transaction_id: id }.into());
        }
        Ok(PendingRating {
            current,
            next,
            rating,
        })
    }

    /// The rating row goes in before the transaction is marked rated, and
    /// is withdrawn if that swap fails, so a committed `rated` flag always
    /// has its rating.
    fn commit_rating(&self, pending: PendingRating) -> Result<Rating, MarketError> {
        let PendingRating {
            current,
            next,
            rating,
        } = pending;
        let (id, rater) = (rating.transaction_id, rating.rater_id);
        if !self.ratings.insert_if_absent(rating.clone())? {
            return Err(TransactionError::AlreadyRated { transaction_id: id }.into());
        }
        if let Err(err) = self.swap(&current, next, TransactionAction::Rate, PartyRole::Buyer) {
            if let Err(remove_err) = self.ratings.remove(id, rater) {
                tracing::error!(
                    transaction_id = %id,
                    rater_id = %rater,
                    error = %remove_err,
                    "failed to withdraw rating after the transaction update was rejected"
                );
            }
            return Err(err);
        }
        Ok(rating)
    }

    fn finish_rating(
        &self,
        actor: UserId,
        id: TransactionId,
        result: Result<Rating, MarketError>,
    ) -> Result<Rating, MarketError> {
        match &result {
            Ok(rating) => {
                tracing::info!(
                    transaction_id = %id,
                    rater_id = %actor,
                    rated_user_id = %rating.rated_user_id,
                    score = rating.score.value(),
                    "transaction rated"
                );
                metrics::counter!(
                    "istyle_transitions_total",
                    "action" => TransactionAction::Rate.as_str(),
                    "status" => TransactionStatus::Delivered.as_str()
                )
                .increment(1);
                self.events.publish(MarketEvent::Rated {
                    transaction_id: id,
                    rater_id: actor,
                    rated_user_id: rating.rated_user_id,
                    score: rating.score.value(),
                });
            }
            Err(err) => record_rejection(TransactionAction::Rate, actor, err),
        }
        result
    }

    /// Whether `actor` may attempt `action` on the transaction right now.
    pub fn check(
        &self,
        actor: UserId,
        id: TransactionId,
        action: TransactionAction,
    ) -> Result<PartyRole, MarketError> {
        let tx = self.load_transaction(id)?;
        Ok(tx.check(actor, action, self.policy)?)
    }

    /// The transaction as seen by `viewer`. Non-parties get `NotFound`, so
    /// the existence of other people's transactions is not disclosed.
    pub fn get_for(&self, viewer: UserId, id: TransactionId) -> Result<Transaction, MarketError> {
        let tx = self.load_transaction(id)?;
        if !tx.is_party(viewer) {
            return Err(TransactionError::transaction_not_found(id).into());
        }
        Ok(tx)
    }

    /// The transaction regardless of who asks. For administrative reads.
    pub fn get_transaction(&self, id: TransactionId) -> Result<Transaction, MarketError> {
        self.load_transaction(id)
    }

    pub fn list_for_user(
        &self,
        user: UserId,
        filter: PartyFilter,
    ) -> Result<Vec<Transaction>, MarketError> {
        Ok(self.transactions.list_for_party(user, filter)?)
    }

    pub fn transactions_for_listing(
        &self,
        listing_id: ListingId,
    ) -> Result<Vec<Transaction>, MarketError> {
        Ok(self.transactions.list_for_listing(listing_id)?)
    }

    pub fn ratings_for(&self, user: UserId) -> Result<RatingSummary, MarketError> {
        let ratings = self.ratings.list_for_user(user)?;
        let average = self.ratings.average_for_user(user)?;
        Ok(RatingSummary {
            user_id: user,
            count: ratings.len(),
            average,
            ratings,
        })
    }

    fn load_transaction(&self, id: TransactionId) -> Result<Transaction, MarketError> {
        Ok(self
            .transactions
            .get(id)?
            .ok_or_else(|| TransactionError::transaction_not_found(id))?)
    }

    /// Commit `next` iff the stored version still equals `current.version`.
    fn swap(
        &self,
        current: &Transaction,
        next: Transaction,
        action: TransactionAction,
        role: PartyRole,
    ) -> Result<(), MarketError> {
        match self.transactions.compare_and_swap(current.version, next) {
            Ok(()) => Ok(()),
            Err(StoreError::VersionMismatch { .. }) => Err(self.lost_race(current, action, role)),
            Err(other) => Err(other.into()),
        }
    }

    fn lost_race(
        &self,
        current: &Transaction,
        action: TransactionAction,
        role: PartyRole,
    ) -> MarketError {
        let latest = match self.transactions.get(current.id) {
            Ok(Some(latest)) => latest,
            _ => current.clone(),
        };
        if action == TransactionAction::Rate && latest.rated {
            return TransactionError::AlreadyRated {
                transaction_id: current.id,
            }
            .into();
        }
        concurrent_modification(&latest, action, role).into()
    }
}

/// The rejection for a write that found the transaction moved past the
/// version it was validated against.
pub fn concurrent_modification(
    latest: &Transaction,
    action: TransactionAction,
    role: PartyRole,
) -> TransactionError {
    TransactionError::InvalidTransition {
        status: latest.status,
        action,
        role,
        reason: "concurrent modification: the transaction changed while this request was processed"
            .to_string(),
    }
}

fn record_rejection(action: TransactionAction, actor: UserId, err: &MarketError) {
    let code = match err {
        MarketError::Transaction(e) => e.code(),
        MarketError::NotListingOwner { .. } => "FORBIDDEN",
        MarketError::Validation(_) => "VALIDATION_ERROR",
        MarketError::Store(_) => "STORE_ERROR",
        MarketError::Proof(_) => "PROOF_STORAGE_ERROR",
    };
    metrics::counter!(
        "istyle_transition_rejections_total",
        "action" => action.as_str(),
        "code" => code
    )
    .increment(1);
    match err {
        MarketError::Store(_) | MarketError::Proof(_) => {
            tracing::error!(action = %action, actor = %actor, error = %err, "transaction operation failed");
        }
        _ => {
            tracing::debug!(action = %action, actor = %actor, code, error = %err, "transaction operation rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventLog;
    use crate::proof::MemoryProofStorage;
    use istyle_state::ErrorKind;

    fn market() -> (Marketplace, MemoryEventLog) {
        let log = MemoryEventLog::new();
        let m = Marketplace::in_memory().with_events(Arc::new(log.clone()));
        (m, log)
    }

    fn sale(m: &Marketplace) -> Listing {
        m.create_listing(
            UserId::new(),
            NewListing {
                title: "Leather boots".into(),
                description: "Size 41".into(),
                kind: ListingKind::Sale,
                price: Some("80".into()),
            },
        )
        .unwrap()
    }

    #[test]
    fn initiate_emits_created_event_with_message() {
        let (m, log) = market();
        let l = sale(&m);
        let tx = m
            .initiate(UserId::new(), l.id, Some("Can you ship today?".into()))
            .unwrap();
        let events = log.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            MarketEvent::TransactionCreated {
                transaction_id,
                seller_id,
                message,
                ..
            } => {
                assert_eq!(*transaction_id, tx.id);
                assert_eq!(*seller_id, l.owner_id);
                assert_eq!(message.as_deref(), Some("Can you ship today?"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let (m, _) = market();
        let err = m.initiate(UserId::new(), ListingId::new(), None).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
        let err = m.confirm_payment(UserId::new(), TransactionId::new()).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
    }

    #[test]
    fn non_party_read_is_hidden() {
        let (m, _) = market();
        let l = sale(&m);
        let buyer = UserId::new();
        let tx = m.initiate(buyer, l.id, None).unwrap();
        assert_eq!(m.get_for(buyer, tx.id).unwrap().id, tx.id);
        assert_eq!(m.get_for(l.owner_id, tx.id).unwrap().id, tx.id);
        let err = m.get_for(UserId::new(), tx.id).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
        assert_eq!(m.get_transaction(tx.id).unwrap().id, tx.id);
    }

    #[test]
    fn proof_is_not_stored_for_wrong_actor() {
        let (m, _) = market();
        let l = sale(&m);
        let tx = m.initiate(UserId::new(), l.id, None).unwrap();
        let storage = MemoryProofStorage::new();
        let err = m
            .submit_payment_proof(l.owner_id, tx.id, &storage, ProofFormat::Png, b"png")
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Forbidden));
        assert!(storage.is_empty());

        let sent = m
            .submit_payment_proof(tx.buyer_id, tx.id, &storage, ProofFormat::Png, b"png")
            .unwrap();
        assert_eq!(sent.status, TransactionStatus::PaymentSent);
        let proof = sent.payment_proof_ref.unwrap();
        assert_eq!(storage.get(&proof).unwrap(), b"png".to_vec());
    }

    #[test]
    fn only_owner_edits_listing() {
        let (m, _) = market();
        let l = sale(&m);
        let err = m
            .update_listing(UserId::new(), l.id, ListingUpdate::default())
            .unwrap_err();
        assert!(matches!(err, MarketError::NotListingOwner { .. }));
        assert_eq!(err.kind(), Some(ErrorKind::Forbidden));

        let updated = m
            .update_listing(
                l.owner_id,
                l.id,
                ListingUpdate {
                    title: Some("Leather boots (worn twice)".into()),
                    price: Some("".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.title, "Leather boots (worn twice)");
        assert_eq!(updated.price, None);
        assert_eq!(m.get_listing(l.id).unwrap(), updated);
    }

    #[test]
    fn ratings_summary_averages() {
        let (m, _) = market();
        let seller = UserId::new();
        for score in [3, 4] {
            let l = m
                .create_listing(
                    seller,
                    NewListing {
                        title: "Tee".into(),
                        description: String::new(),
                        kind: ListingKind::Sale,
                        price: None,
                    },
                )
                .unwrap();
            let buyer = UserId::new();
            let tx = m.initiate(buyer, l.id, None).unwrap();
            m.upload_payment_proof(buyer, tx.id, ProofRef::new("/uploads/p.png").unwrap())
                .unwrap();
            m.confirm_payment(seller, tx.id).unwrap();
            m.mark_shipped(seller, tx.id, None).unwrap();
            m.confirm_delivery(buyer, tx.id).unwrap();
            m.rate(buyer, tx.id, score, None).unwrap();
        }
        let summary = m.ratings_for(seller).unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.average, Some(3.5));
    }

    fn deliver(m: &Marketplace, l: &Listing) -> (UserId, TransactionId) {
        let buyer = UserId::new();
        let tx = m.initiate(buyer, l.id, None).unwrap();
        m.upload_payment_proof(buyer, tx.id, ProofRef::new("/uploads/p.png").unwrap())
            .unwrap();
        m.confirm_payment(l.owner_id, tx.id).unwrap();
        m.mark_shipped(l.owner_id, tx.id, None).unwrap();
        m.confirm_delivery(buyer, tx.id).unwrap();
        (buyer, tx.id)
    }

    #[test]
    fn prepared_transition_is_invisible_until_applied() {
        let (m, log) = market();
        let l = sale(&m);
        let buyer = UserId::new();
        let tx = m.initiate(buyer, l.id, None).unwrap();

        let pending = m
            .prepare_transition(buyer, tx.id, TransitionCommand::Cancel { reason: None })
            .unwrap();
        assert_eq!(pending.next.version, tx.version + 1);
        assert_eq!(m.get_transaction(tx.id).unwrap().status, TransactionStatus::PendingPayment);
        assert!(!m.can_initiate(l.id).unwrap());
        assert_eq!(log.len(), 1);

        let cancelled = m.apply_transition(pending).unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Cancelled);
        assert!(m.can_initiate(l.id).unwrap());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn stale_prepared_transition_is_rejected() {
        let (m, _) = market();
        let l = sale(&m);
        let buyer = UserId::new();
        let tx = m.initiate(buyer, l.id, None).unwrap();

        let pending = m
            .prepare_transition(buyer, tx.id, TransitionCommand::Cancel { reason: None })
            .unwrap();
        m.upload_payment_proof(buyer, tx.id, ProofRef::new("/uploads/p.png").unwrap())
            .unwrap();

        let err = m.apply_transition(pending).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidTransition));
        assert_eq!(m.get_transaction(tx.id).unwrap().status, TransactionStatus::PaymentSent);
    }

    #[test]
    fn applying_initiation_rechecks_the_gate() {
        let (m, _) = market();
        let l = sale(&m);
        let first = m.prepare_initiation(UserId::new(), l.id, None).unwrap();
        let second = m.prepare_initiation(UserId::new(), l.id, None).unwrap();
        assert!(m.transactions_for_listing(l.id).unwrap().is_empty());

        m.apply_initiation(first).unwrap();
        let err = m.apply_initiation(second).unwrap_err();
        assert!(matches!(
            err,
            MarketError::Transaction(TransactionError::ListingUnavailable { .. })
        ));
        assert_eq!(m.transactions_for_listing(l.id).unwrap().len(), 1);
    }

    #[test]
    fn delivery_closes_listing_and_cancel_reopens_it() {
        let (m, _) = market();
        let l = sale(&m);
        let tx = m.initiate(UserId::new(), l.id, None).unwrap();
        m.cancel(l.owner_id, tx.id, None).unwrap();
        assert_eq!(m.get_listing(l.id).unwrap().status, ListingStatus::Available);
        assert!(m.can_initiate(l.id).unwrap());

        deliver(&m, &l);
        assert_eq!(m.get_listing(l.id).unwrap().status, ListingStatus::Unavailable);
        assert!(!m.can_initiate(l.id).unwrap());
    }

    struct BrokenRatings;

    impl RatingStore for BrokenRatings {
        fn insert_if_absent(&self, _rating: Rating) -> Result<bool, StoreError> {
            Err(StoreError::Backend("ratings table unavailable".into()))
        }
        fn exists(&self, _: TransactionId, _: UserId) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn remove(&self, _: TransactionId, _: UserId) -> Result<bool, StoreError> {
            Ok(false)
        }
        fn list_for_user(&self, _: UserId) -> Result<Vec<Rating>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn failed_rating_insert_leaves_transaction_unrated() {
        let m = Marketplace::new(
            Arc::new(MemoryListingStore::new()),
            Arc::new(MemoryTransactionStore::new()),
            Arc::new(BrokenRatings),
        );
        let l = sale(&m);
        let (buyer, id) = deliver(&m, &l);

        let err = m.rate(buyer, id, 5, None).unwrap_err();
        assert!(matches!(err, MarketError::Store(StoreError::Backend(_))));
        let tx = m.get_transaction(id).unwrap();
        assert!(!tx.rated);
        assert_eq!(tx.version, 5);
    }

    #[derive(Default)]
    struct FrozenTransactions {
        inner: MemoryTransactionStore,
        frozen: std::sync::atomic::AtomicBool,
    }

    impl TransactionStore for FrozenTransactions {
        fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
            self.inner.get(id)
        }
        fn insert(&self, tx: Transaction) -> Result<(), StoreError> {
            self.inner.insert(tx)
        }
        fn compare_and_swap(&self, expected: u64, next: Transaction) -> Result<(), StoreError> {
            if self.frozen.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StoreError::VersionMismatch {
                    id: next.id.to_string(),
                    expected,
                    actual: expected + 1,
                });
            }
            self.inner.compare_and_swap(expected, next)
        }
        fn list_for_party(
            &self,
            user: UserId,
            filter: PartyFilter,
        ) -> Result<Vec<Transaction>, StoreError> {
            self.inner.list_for_party(user, filter)
        }
        fn list_for_listing(&self, listing: ListingId) -> Result<Vec<Transaction>, StoreError> {
            self.inner.list_for_listing(listing)
        }
        fn open_for_listing(&self, listing: ListingId) -> Result<Option<Transaction>, StoreError> {
            self.inner.open_for_listing(listing)
        }
    }

    #[test]
    fn rejected_rating_swap_withdraws_the_rating() {
        let transactions = Arc::new(FrozenTransactions::default());
        let ratings = Arc::new(MemoryRatingStore::new());
        let m = Marketplace::new(
            Arc::new(MemoryListingStore::new()),
            transactions.clone(),
            ratings.clone(),
        );
        let l = sale(&m);
        let (buyer, id) = deliver(&m, &l);

        transactions
            .frozen
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let err = m.rate(buyer, id, 4, None).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidTransition));
        assert!(!ratings.exists(id, buyer).unwrap());
        assert_eq!(m.ratings_for(l.owner_id).unwrap().count, 0);

        transactions
            .frozen
            .store(false, std::sync::atomic::Ordering::SeqCst);
        m.rate(buyer, id, 4, None).unwrap();
        assert!(m.get_transaction(id).unwrap().rated);
        assert_eq!(m.ratings_for(l.owner_id).unwrap().count, 1);
    }
}
