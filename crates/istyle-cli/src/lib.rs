//! # istyle-cli: command-line tools for the transaction core
//!
//! ## Subcommands
//!
//! - `table`: print the lifecycle transition table and who may cancel
//!   under each cancellation policy.
//! - `replay`: run a YAML lifecycle script against an in-memory
//!   marketplace and check every step's outcome.
//!
//! Argument parsing lives here; the lifecycle rules live in
//! `istyle-state` and `istyle-market`.

pub mod replay;
pub mod table;
