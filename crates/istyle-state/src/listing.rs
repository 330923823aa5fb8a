//! # Listing Model
//!
//! The listing is owned by the listing store; the transaction lifecycle
//! only reads it at creation (kind, availability, owner) and closes it on
//! delivery. Kinds and statuses accept the legacy Spanish labels
//! (`Venta`, `Intercambio`, `Disponible`, `No Disponible`) on input.

use std::str::FromStr;

use istyle_core::{ListingId, Timestamp, UserId, ValidationError};
use serde::{Deserialize, Serialize};

/// Maximum listing title length, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// Maximum listing description length, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 5000;

/// Whether a listing is offered for money or for a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingKind {
    /// Offered for sale (`Venta`).
    #[serde(alias = "Venta")]
    Sale,
    /// Offered for exchange (`Intercambio`). Initiation requires a message.
    #[serde(alias = "Intercambio")]
    Exchange,
}

impl ListingKind {
    /// Canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::Exchange => "EXCHANGE",
        }
    }
}

impl std::fmt::Display for ListingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "SALE" | "sale" | "Venta" => Ok(Self::Sale),
            "EXCHANGE" | "exchange" | "Intercambio" => Ok(Self::Exchange),
            other => Err(ValidationError::InvalidValue {
                field: "listing kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Listing availability as set by its owner or by a delivered transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingStatus {
    /// Accepting new transactions (`Disponible`).
    #[serde(alias = "Disponible")]
    Available,
    /// Closed to new transactions (`No Disponible`).
    #[serde(alias = "No Disponible")]
    Unavailable,
}

impl ListingStatus {
    /// Canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "AVAILABLE" | "available" | "Disponible" => Ok(Self::Available),
            "UNAVAILABLE" | "unavailable" | "No Disponible" => Ok(Self::Unavailable),
            other => Err(ValidationError::InvalidValue {
                field: "listing status",
                value: other.to_string(),
            }),
        }
    }
}

/// A garment offered on the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    pub kind: ListingKind,
    pub status: ListingStatus,
    /// Asking price as a non-negative decimal string with at most two
    /// fractional digits. Exchange listings usually leave it empty.
    pub price: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Listing {
    /// Create a new, available listing.
    pub fn new(
        owner_id: UserId,
        title: impl Into<String>,
        description: impl Into<String>,
        kind: ListingKind,
        price: Option<String>,
    ) -> Result<Self, ValidationError> {
        let title = validate_title(title.into())?;
        let description = validate_description(description.into())?;
        let price = price.map(validate_price).transpose()?.flatten();
        let now = Timestamp::now();
        Ok(Self {
            id: ListingId::new(),
            owner_id,
            title,
            description,
            kind,
            status: ListingStatus::Available,
            price,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether the listing's own status admits new transactions.
    ///
    /// The open-transaction half of the availability gate lives with the
    /// transaction store.
    pub fn is_available(&self) -> bool {
        self.status == ListingStatus::Available
    }

    /// Replace the title, keeping the validation rules of [`Listing::new`].
    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), ValidationError> {
        self.title = validate_title(title.into())?;
        self.touch();
        Ok(())
    }

    /// Replace the description.
    pub fn set_description(&mut self, description: impl Into<String>) -> Result<(), ValidationError> {
        self.description = validate_description(description.into())?;
        self.touch();
        Ok(())
    }

    /// Replace or clear the price. A blank string clears it.
    pub fn set_price(&mut self, price: Option<String>) -> Result<(), ValidationError> {
        self.price = price.map(validate_price).transpose()?.flatten();
        self.touch();
        Ok(())
    }

    /// Set the availability status.
    pub fn set_status(&mut self, status: ListingStatus) {
        self.status = status;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }
}

fn validate_title(title: String) -> Result<String, ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ValidationError::EmptyField("title"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ValidationError::TooLong {
            field: "title",
            max: MAX_TITLE_LEN,
        });
    }
    Ok(title.to_string())
}

fn validate_description(description: String) -> Result<String, ValidationError> {
    let description = description.trim();
    if description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::TooLong {
            field: "description",
            max: MAX_DESCRIPTION_LEN,
        });
    }
    Ok(description.to_string())
}

/// Validate a decimal price string. Blank input means "no price".
fn validate_price(price: String) -> Result<Option<String>, ValidationError> {
    let price = price.trim();
    if price.is_empty() {
        return Ok(None);
    }
    let invalid = || ValidationError::InvalidValue {
        field: "price",
        value: price.to_string(),
    };
    let (whole, fraction) = match price.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (price, None),
    };
    if whole.is_empty() || whole.len() > 12 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if let Some(f) = fraction {
        if f.is_empty() || f.len() > 2 || !f.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
    }
    Ok(Some(price.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(kind: ListingKind) -> Listing {
        Listing::new(UserId::new(), "Denim jacket", "Size M", kind, None).unwrap()
    }

    #[test]
    fn new_listing_is_available() {
        let l = listing(ListingKind::Sale);
        assert!(l.is_available());
        assert_eq!(l.status, ListingStatus::Available);
        assert_eq!(l.created_at, l.updated_at);
    }

    #[test]
    fn title_is_trimmed_and_required() {
        let l = Listing::new(UserId::new(), "  Boots ", "", ListingKind::Sale, None).unwrap();
        assert_eq!(l.title, "Boots");
        let err = Listing::new(UserId::new(), "   ", "", ListingKind::Sale, None).unwrap_err();
        assert_eq!(err, ValidationError::EmptyField("title"));
    }

    #[test]
    fn overlong_title_rejected() {
        let title = "x".repeat(MAX_TITLE_LEN + 1);
        let err = Listing::new(UserId::new(), title, "", ListingKind::Sale, None).unwrap_err();
        assert!(matches!(err, ValidationError::TooLong { field: "title", .. }));
    }

    #[test]
    fn price_validation() {
        for ok in ["0", "15", "15.5", "15.50", "  20.00 "] {
            assert!(validate_price(ok.to_string()).unwrap().is_some(), "{ok}");
        }
        for bad in ["-1", "1.234", "abc", ".5", "5.", "1,50", "1e3"] {
            assert!(validate_price(bad.to_string()).is_err(), "{bad}");
        }
        assert_eq!(validate_price("  ".to_string()).unwrap(), None);
    }

    #[test]
    fn set_price_blank_clears() {
        let mut l = listing(ListingKind::Sale);
        l.set_price(Some("25.00".to_string())).unwrap();
        assert_eq!(l.price.as_deref(), Some("25.00"));
        l.set_price(Some(" ".to_string())).unwrap();
        assert_eq!(l.price, None);
    }

    #[test]
    fn set_status_closes_listing() {
        let mut l = listing(ListingKind::Exchange);
        l.set_status(ListingStatus::Unavailable);
        assert!(!l.is_available());
    }

    #[test]
    fn legacy_labels_parse() {
        assert_eq!("Venta".parse::<ListingKind>().unwrap(), ListingKind::Sale);
        assert_eq!(
            "Intercambio".parse::<ListingKind>().unwrap(),
            ListingKind::Exchange
        );
        assert_eq!(
            "No Disponible".parse::<ListingStatus>().unwrap(),
            ListingStatus::Unavailable
        );
        assert!("Rental".parse::<ListingKind>().is_err());
    }

    #[test]
    fn serde_accepts_legacy_aliases() {
        let kind: ListingKind = serde_json::from_str("\"Intercambio\"").unwrap();
        assert_eq!(kind, ListingKind::Exchange);
        let status: ListingStatus = serde_json::from_str("\"Disponible\"").unwrap();
        assert_eq!(status, ListingStatus::Available);
        assert_eq!(
            serde_json::to_string(&ListingKind::Sale).unwrap(),
            "\"SALE\""
        );
    }
}
