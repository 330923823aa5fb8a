//! # istyle-core — Foundational Types for the InfinitiStyle Marketplace
//!
//! Leaf crate of the workspace. Defines the primitives every other crate
//! speaks in, so that a listing id can never be handed to a function that
//! expects a transaction id.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `UserId`, `ListingId` and
//!    `TransactionId` wrap a UUID each. No bare `Uuid`s cross crate seams.
//!
//! 2. **UTC-only timestamps.** [`Timestamp`] is UTC with seconds precision,
//!    which is what the transition log records.
//!
//! 3. **Opaque proof references.** [`ProofRef`] is whatever the payment
//!    proof storage returned. The core stores it and never looks inside.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `istyle-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod proof;
pub mod temporal;

pub use error::ValidationError;
pub use identity::{ListingId, TransactionId, UserId};
pub use proof::ProofRef;
pub use temporal::Timestamp;
