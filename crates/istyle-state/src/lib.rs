//! # istyle-state — Transaction Lifecycle State Machine
//!
//! The purchase workflow of the marketplace, as a single validated
//! state machine:
//!
//! ```text
//! PENDING_PAYMENT ──▶ PAYMENT_SENT ──▶ PAYMENT_CONFIRMED ──▶ SHIPPED ──▶ DELIVERED
//!   (buyer: proof)    (seller: confirm)   (seller: ship)     (buyer: delivered)
//!        │                  │                   │                │
//!        └──────────────────┴───────────────────┴────────────────┴──▶ CANCELLED
//! ```
//!
//! - **Transaction** ([`transaction`]): status enum, transition table,
//!   cancellation policy, and the [`Transaction`] record with its
//!   append-only transition log.
//! - **Listing** ([`listing`]): the listing model the transaction reads at
//!   creation (kind, availability, owner).
//! - **Rating** ([`rating`]): the single post-delivery rating.
//! - **Errors** ([`error`]): every rejection carries current status,
//!   attempted action and actor role.
//!
//! ## Design
//!
//! States are an enum validated at runtime rather than typestates: the
//! acting role is only known per request, and a transaction is loaded from
//! a store in whatever state it happens to be in. Every mutation goes
//! through [`Transaction::apply`] or [`Transaction::finalize_rating`];
//! the fields are public for reading and persistence, not for mutation.

pub mod error;
pub mod listing;
pub mod rating;
pub mod transaction;

pub use error::{ErrorKind, TransactionError};
pub use listing::{Listing, ListingKind, ListingStatus};
pub use rating::{Rating, RatingScore};
pub use transaction::{
    allowed_roles, target_status, CancellationPolicy, PartyRole, Transaction, TransactionAction,
    TransactionStatus, TransitionCommand, TransitionRecord, TransitionRule, TRANSITION_TABLE,
};
