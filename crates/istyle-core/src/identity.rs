//! # Identifier Newtypes
//!
//! Users, listings and transactions each get their own UUID-backed type.
//! Passing a `ListingId` where a `TransactionId` is expected is a compile
//! error.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Identifier of an authenticated marketplace user (buyer, seller, or both).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

/// Identifier of a garment listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(pub Uuid);

/// Identifier of a purchase or exchange transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl UserId {
    /// Generate a new random user identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl ListingId {
    /// Generate a new random listing identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl TransactionId {
    /// Generate a new random transaction identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ListingId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

impl std::fmt::Display for ListingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listing:{}", self.0)
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transaction:{}", self.0)
    }
}

/// Parse an identifier, accepting either the bare UUID or the prefixed
/// `Display` form (`listing:<uuid>`).
fn parse_prefixed(kind: &'static str, s: &str) -> Result<Uuid, ValidationError> {
    let raw = s
        .strip_prefix(kind)
        .and_then(|rest| rest.strip_prefix(':'))
        .unwrap_or(s);
    Uuid::parse_str(raw.trim()).map_err(|_| ValidationError::InvalidIdentifier {
        kind,
        value: s.to_string(),
    })
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed("user", s).map(Self)
    }
}

impl FromStr for ListingId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed("listing", s).map(Self)
    }
}

impl FromStr for TransactionId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_prefixed("transaction", s).map(Self)
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<Uuid> for ListingId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<Uuid> for TransactionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(UserId::new(), UserId::new());
        assert_ne!(ListingId::new(), ListingId::new());
        assert_ne!(TransactionId::new(), TransactionId::new());
    }

    #[test]
    fn display_carries_namespace_prefix() {
        let id = Uuid::nil();
        assert_eq!(
            UserId(id).to_string(),
            "user:00000000-0000-0000-0000-000000000000"
        );
        assert!(ListingId(id).to_string().starts_with("listing:"));
        assert!(TransactionId(id).to_string().starts_with("transaction:"));
    }

    #[test]
    fn parse_accepts_bare_and_prefixed_forms() {
        let id = TransactionId::new();
        let bare: TransactionId = id.as_uuid().to_string().parse().unwrap();
        let prefixed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(bare, id);
        assert_eq!(prefixed, id);
    }

    #[test]
    fn parse_rejects_foreign_prefix() {
        let listing = ListingId::new();
        let err = listing.to_string().parse::<TransactionId>().unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidIdentifier { kind: "transaction", .. }
        ));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<UserId>().is_err());
        assert!("".parse::<ListingId>().is_err());
    }

    #[test]
    fn serde_is_transparent() {
        let id = UserId(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
