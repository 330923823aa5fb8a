//! # Transaction Lifecycle
//!
//! A transaction records one buyer's purchase (or swap) of one listing and
//! moves forward along a fixed table:
//!
//! | From                | Action               | Actor  | To                  |
//! |---------------------|----------------------|--------|---------------------|
//! | (none)              | `initiate`           | buyer  | `PENDING_PAYMENT`   |
//! | `PENDING_PAYMENT`   | `upload_payment_proof` | buyer | `PAYMENT_SENT`     |
//! | `PAYMENT_SENT`      | `confirm_payment`    | seller | `PAYMENT_CONFIRMED` |
//! | `PAYMENT_CONFIRMED` | `mark_shipped`       | seller | `SHIPPED`           |
//! | `SHIPPED`           | `confirm_delivery`   | buyer  | `DELIVERED`         |
//! | any non-terminal    | `cancel`             | per [`CancellationPolicy`] | `CANCELLED` |
//!
//! `DELIVERED` and `CANCELLED` are terminal. Every committed step appends a
//! [`TransitionRecord`] and bumps `version`, the optimistic concurrency
//! token stores compare against.
//!
//! ## Check order
//!
//! Every rejection is decided before anything is written, in this order:
//! caller not a party, terminal status, wrong role, action not applicable
//! to the current status, missing or malformed action data.

use std::str::FromStr;

use istyle_core::{ListingId, ProofRef, Timestamp, TransactionId, UserId, ValidationError};
use serde::{Deserialize, Serialize};

use crate::error::TransactionError;
use crate::listing::{Listing, ListingKind};
use crate::rating::{Rating, RatingScore, MAX_COMMENT_LEN};

/// Maximum initiation message length, in characters.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Maximum tracking information length, in characters.
pub const MAX_TRACKING_LEN: usize = 200;

/// Maximum cancellation reason length, in characters.
pub const MAX_REASON_LEN: usize = 1000;

// ── Transaction Status ─────────────────────────────────────────────────

/// The status of a transaction.
///
/// Terminal states: `Delivered`, `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Created; waiting for the buyer's payment proof.
    #[serde(alias = "PENDIENTE_PAGO")]
    PendingPayment,
    /// Proof uploaded; waiting for the seller to confirm receipt.
    #[serde(alias = "PAGO_ENVIADO")]
    PaymentSent,
    /// Seller confirmed the payment; waiting for shipment.
    #[serde(alias = "PAGO_CONFIRMADO")]
    PaymentConfirmed,
    /// Seller shipped the item.
    #[serde(alias = "ENVIADO")]
    Shipped,
    /// Buyer confirmed delivery. Terminal state.
    #[serde(alias = "ENTREGADO")]
    Delivered,
    /// Cancelled by a party. Terminal state.
    #[serde(alias = "CANCELADO")]
    Cancelled,
}

impl TransactionStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::PendingPayment,
        Self::PaymentSent,
        Self::PaymentConfirmed,
        Self::Shipped,
        Self::Delivered,
        Self::Cancelled,
    ];

    /// Whether this status is terminal (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// The canonical string name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::PaymentSent => "PAYMENT_SENT",
            Self::PaymentConfirmed => "PAYMENT_CONFIRMED",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "PENDING_PAYMENT" | "PENDIENTE_PAGO" => Ok(Self::PendingPayment),
            "PAYMENT_SENT" | "PAGO_ENVIADO" => Ok(Self::PaymentSent),
            "PAYMENT_CONFIRMED" | "PAGO_CONFIRMADO" => Ok(Self::PaymentConfirmed),
            "SHIPPED" | "ENVIADO" => Ok(Self::Shipped),
            "DELIVERED" | "ENTREGADO" => Ok(Self::Delivered),
            "CANCELLED" | "CANCELADO" => Ok(Self::Cancelled),
            other => Err(ValidationError::InvalidValue {
                field: "transaction status",
                value: other.to_string(),
            }),
        }
    }
}

// ── Roles and Actions ──────────────────────────────────────────────────

/// The acting party's role on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyRole {
    Buyer,
    Seller,
}

impl PartyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
        }
    }
}

impl std::fmt::Display for PartyRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operations a party can attempt on a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionAction {
    Initiate,
    UploadPaymentProof,
    ConfirmPayment,
    MarkShipped,
    ConfirmDelivery,
    Cancel,
    Rate,
}

impl TransactionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiate => "initiate",
            Self::UploadPaymentProof => "upload_payment_proof",
            Self::ConfirmPayment => "confirm_payment",
            Self::MarkShipped => "mark_shipped",
            Self::ConfirmDelivery => "confirm_delivery",
            Self::Cancel => "cancel",
            Self::Rate => "rate",
        }
    }
}

impl std::fmt::Display for TransactionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const BUYER_ONLY: &[PartyRole] = &[PartyRole::Buyer];
const SELLER_ONLY: &[PartyRole] = &[PartyRole::Seller];
const EITHER_PARTY: &[PartyRole] = &[PartyRole::Buyer, PartyRole::Seller];
const NO_PARTY: &[PartyRole] = &[];

fn only(role: PartyRole) -> &'static [PartyRole] {
    match role {
        PartyRole::Buyer => BUYER_ONLY,
        PartyRole::Seller => SELLER_ONLY,
    }
}

// ── Cancellation Policy ────────────────────────────────────────────────

/// Who may cancel a non-terminal transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Either party while the payment is unconfirmed
    /// (`PENDING_PAYMENT`, `PAYMENT_SENT`); only the seller afterwards.
    #[default]
    BeforeConfirmation,
    /// Either party in any non-terminal state.
    EitherParty,
    /// Only the seller, in any non-terminal state.
    SellerOnly,
}

impl CancellationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeConfirmation => "before_confirmation",
            Self::EitherParty => "either_party",
            Self::SellerOnly => "seller_only",
        }
    }

    /// Roles allowed to cancel a transaction in `status`.
    pub fn allowed_roles(&self, status: TransactionStatus) -> &'static [PartyRole] {
        if status.is_terminal() {
            return NO_PARTY;
        }
        match self {
            Self::EitherParty => EITHER_PARTY,
            Self::SellerOnly => SELLER_ONLY,
            Self::BeforeConfirmation => match status {
                TransactionStatus::PendingPayment | TransactionStatus::PaymentSent => EITHER_PARTY,
                _ => SELLER_ONLY,
            },
        }
    }

    /// Whether `role` may cancel a transaction in `status`.
    pub fn permits(&self, status: TransactionStatus, role: PartyRole) -> bool {
        self.allowed_roles(status).contains(&role)
    }
}

impl std::fmt::Display for CancellationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CancellationPolicy {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "before_confirmation" => Ok(Self::BeforeConfirmation),
            "either_party" => Ok(Self::EitherParty),
            "seller_only" => Ok(Self::SellerOnly),
            _ => Err(ValidationError::InvalidValue {
                field: "cancellation policy",
                value: s.to_string(),
            }),
        }
    }
}

// ── Transition Table ───────────────────────────────────────────────────

/// One forward step of the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: TransactionStatus,
    pub action: TransactionAction,
    pub role: PartyRole,
    pub to: TransactionStatus,
}

/// The forward steps. Initiation and cancellation are handled separately.
pub const TRANSITION_TABLE: [TransitionRule; 4] = [
    TransitionRule {
        from: TransactionStatus::PendingPayment,
        action: TransactionAction::UploadPaymentProof,
        role: PartyRole::Buyer,
        to: TransactionStatus::PaymentSent,
    },
    TransitionRule {
        from: TransactionStatus::PaymentSent,
        action: TransactionAction::ConfirmPayment,
        role: PartyRole::Seller,
        to: TransactionStatus::PaymentConfirmed,
    },
    TransitionRule {
        from: TransactionStatus::PaymentConfirmed,
        action: TransactionAction::MarkShipped,
        role: PartyRole::Seller,
        to: TransactionStatus::Shipped,
    },
    TransitionRule {
        from: TransactionStatus::Shipped,
        action: TransactionAction::ConfirmDelivery,
        role: PartyRole::Buyer,
        to: TransactionStatus::Delivered,
    },
];

/// The status `action` leads to from `status`, if it applies at all.
pub fn target_status(
    status: TransactionStatus,
    action: TransactionAction,
) -> Option<TransactionStatus> {
    match action {
        TransactionAction::Cancel => (!status.is_terminal()).then_some(TransactionStatus::Cancelled),
        TransactionAction::Initiate | TransactionAction::Rate => None,
        _ => TRANSITION_TABLE
            .iter()
            .find(|rule| rule.from == status && rule.action == action)
            .map(|rule| rule.to),
    }
}

/// Roles allowed to attempt `action` on a transaction in `status`.
///
/// Forward steps are owned by one role regardless of status, so a buyer
/// confirming payment is refused as the wrong role even before the proof
/// arrives.
pub fn allowed_roles(
    status: TransactionStatus,
    action: TransactionAction,
    policy: CancellationPolicy,
) -> &'static [PartyRole] {
    match action {
        TransactionAction::Initiate | TransactionAction::Rate => BUYER_ONLY,
        TransactionAction::Cancel => policy.allowed_roles(status),
        _ => TRANSITION_TABLE
            .iter()
            .find(|rule| rule.action == action)
            .map_or(NO_PARTY, |rule| only(rule.role)),
    }
}

// ── Commands and Records ───────────────────────────────────────────────

/// A requested transition with the data it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TransitionCommand {
    UploadPaymentProof {
        #[serde(default)]
        proof_ref: Option<ProofRef>,
    },
    ConfirmPayment,
    MarkShipped {
        #[serde(default)]
        tracking_info: Option<String>,
    },
    ConfirmDelivery,
    Cancel {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl TransitionCommand {
    pub fn action(&self) -> TransactionAction {
        match self {
            Self::UploadPaymentProof { .. } => TransactionAction::UploadPaymentProof,
            Self::ConfirmPayment => TransactionAction::ConfirmPayment,
            Self::MarkShipped { .. } => TransactionAction::MarkShipped,
            Self::ConfirmDelivery => TransactionAction::ConfirmDelivery,
            Self::Cancel { .. } => TransactionAction::Cancel,
        }
    }
}

/// A record of a committed status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// `None` for the creation record.
    pub from_state: Option<TransactionStatus>,
    pub to_state: TransactionStatus,
    pub action: TransactionAction,
    pub actor: UserId,
    pub actor_role: PartyRole,
    pub timestamp: Timestamp,
    /// Tracking info or cancellation reason, when the step carried one.
    pub note: Option<String>,
}

// ── Transaction ────────────────────────────────────────────────────────

/// A purchase of one listing by one buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    /// The listing owner at creation time. Later ownership edits on the
    /// listing do not move it.
    pub seller_id: UserId,
    pub listing_kind: ListingKind,
    pub status: TransactionStatus,
    pub payment_proof_ref: Option<ProofRef>,
    pub tracking_info: Option<String>,
    pub initiation_message: Option<String>,
    pub rated: bool,
    pub cancellation_reason: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Incremented on every committed mutation, starting at 1.
    pub version: u64,
    pub transitions: Vec<TransitionRecord>,
}

impl Transaction {
    /// Create a `PENDING_PAYMENT` transaction for `buyer` against `listing`.
    ///
    /// Checks the listing-local half of the availability gate (status and
    /// ownership). Whether another open transaction exists is the caller's
    /// concern, under the same lock as the insert.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::Forbidden`] when the buyer owns the listing.
    /// - [`TransactionError::ListingUnavailable`] when the listing is closed.
    /// - [`TransactionError::PreconditionFailed`] when an exchange listing
    ///   gets no message, or the message is too long.
    pub fn initiate(
        listing: &Listing,
        buyer: UserId,
        message: Option<String>,
    ) -> Result<Self, TransactionError> {
        let action = TransactionAction::Initiate;
        if buyer == listing.owner_id {
            return Err(TransactionError::Forbidden {
                action,
                actor: buyer,
                role: None,
                reason: "a user cannot buy their own listing".to_string(),
            });
        }
        if !listing.is_available() {
            return Err(TransactionError::ListingUnavailable {
                listing_id: listing.id,
                reason: format!("listing status is {}", listing.status),
            });
        }
        let message = normalize_text(message, "initiation message", MAX_MESSAGE_LEN, action)?;
        if listing.kind == ListingKind::Exchange && message.is_none() {
            return Err(TransactionError::PreconditionFailed {
                action,
                reason: "exchange listings require a non-empty initiation message".to_string(),
            });
        }

        let now = Timestamp::now();
        Ok(Self {
            id: TransactionId::new(),
            listing_id: listing.id,
            buyer_id: buyer,
            seller_id: listing.owner_id,
            listing_kind: listing.kind,
            status: TransactionStatus::PendingPayment,
            payment_proof_ref: None,
            tracking_info: None,
            initiation_message: message,
            rated: false,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            version: 1,
            transitions: vec![TransitionRecord {
                from_state: None,
                to_state: TransactionStatus::PendingPayment,
                action,
                actor: buyer,
                actor_role: PartyRole::Buyer,
                timestamp: now,
                note: None,
            }],
        })
    }

    /// The role `user` holds on this transaction, if any.
    pub fn role_of(&self, user: UserId) -> Option<PartyRole> {
        if user == self.buyer_id {
            Some(PartyRole::Buyer)
        } else if user == self.seller_id {
            Some(PartyRole::Seller)
        } else {
            None
        }
    }

    pub fn is_party(&self, user: UserId) -> bool {
        self.role_of(user).is_some()
    }

    /// Whether the transaction still holds its listing's gate.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Decide whether `actor` may attempt `action` right now, without
    /// looking at action data. Returns the actor's role.
    pub fn check(
        &self,
        actor: UserId,
        action: TransactionAction,
        policy: CancellationPolicy,
    ) -> Result<PartyRole, TransactionError> {
        let role = self.require_party(actor, action)?;
        match action {
            TransactionAction::Initiate => Err(TransactionError::InvalidTransition {
                status: self.status,
                action,
                role,
                reason: "transaction has already been initiated".to_string(),
            }),
            TransactionAction::Rate => self.check_rating(actor, role),
            _ => self.check_transition(actor, role, action, policy),
        }
    }

    /// Apply a transition. On error the transaction is left untouched.
    pub fn apply(
        &mut self,
        actor: UserId,
        command: TransitionCommand,
        policy: CancellationPolicy,
    ) -> Result<TransitionRecord, TransactionError> {
        let action = command.action();
        let role = self.check(actor, action, policy)?;
        let to = target_status(self.status, action).ok_or_else(|| {
            self.invalid_transition(role, action, "action does not apply to the current status")
        })?;

        let note = match command {
            TransitionCommand::UploadPaymentProof { proof_ref } => {
                let proof = proof_ref.ok_or(TransactionError::PreconditionFailed {
                    action,
                    reason: "a payment proof reference is required".to_string(),
                })?;
                self.payment_proof_ref = Some(proof);
                None
            }
            TransitionCommand::MarkShipped { tracking_info } => {
                let tracking =
                    normalize_text(tracking_info, "tracking info", MAX_TRACKING_LEN, action)?;
                self.tracking_info = tracking.clone();
                tracking
            }
            TransitionCommand::Cancel { reason } => {
                let reason = normalize_text(reason, "cancellation reason", MAX_REASON_LEN, action)?;
                self.cancellation_reason = reason.clone();
                reason
            }
            TransitionCommand::ConfirmPayment | TransitionCommand::ConfirmDelivery => None,
        };

        let record = TransitionRecord {
            from_state: Some(self.status),
            to_state: to,
            action,
            actor,
            actor_role: role,
            timestamp: Timestamp::now(),
            note,
        };
        self.status = to;
        self.updated_at = record.timestamp;
        self.version += 1;
        self.transitions.push(record.clone());
        Ok(record)
    }

    /// Record the buyer's rating of the seller and mark the transaction
    /// rated. On error the transaction is left untouched.
    pub fn finalize_rating(
        &mut self,
        actor: UserId,
        score: i64,
        comment: Option<String>,
    ) -> Result<Rating, TransactionError> {
        let action = TransactionAction::Rate;
        let role = self.require_party(actor, action)?;
        self.check_rating(actor, role)?;
        let score = RatingScore::new(score)?;
        let comment = normalize_text(comment, "comment", MAX_COMMENT_LEN, action)?;

        let now = Timestamp::now();
        self.rated = true;
        self.updated_at = now;
        self.version += 1;
        Ok(Rating {
            transaction_id: self.id,
            rater_id: actor,
            rated_user_id: self.seller_id,
            score,
            comment,
            created_at: now,
        })
    }

    fn require_party(
        &self,
        actor: UserId,
        action: TransactionAction,
    ) -> Result<PartyRole, TransactionError> {
        self.role_of(actor).ok_or_else(|| TransactionError::Forbidden {
            action,
            actor,
            role: None,
            reason: "not a party to this transaction".to_string(),
        })
    }

    fn check_transition(
        &self,
        actor: UserId,
        role: PartyRole,
        action: TransactionAction,
        policy: CancellationPolicy,
    ) -> Result<PartyRole, TransactionError> {
        if self.status.is_terminal() {
            return Err(self.invalid_transition(role, action, "transaction is in a terminal state"));
        }
        let allowed = allowed_roles(self.status, action, policy);
        if !allowed.contains(&role) {
            return Err(TransactionError::Forbidden {
                action,
                actor,
                role: Some(role),
                reason: format!(
                    "{action} in {} requires the {}",
                    self.status,
                    describe_roles(allowed)
                ),
            });
        }
        if target_status(self.status, action).is_none() {
            return Err(self.invalid_transition(
                role,
                action,
                "action does not apply to the current status",
            ));
        }
        Ok(role)
    }

    fn check_rating(&self, actor: UserId, role: PartyRole) -> Result<PartyRole, TransactionError> {
        let action = TransactionAction::Rate;
        if role != PartyRole::Buyer {
            return Err(TransactionError::Forbidden {
                action,
                actor,
                role: Some(role),
                reason: "only the buyer rates a transaction".to_string(),
            });
        }
        if self.status != TransactionStatus::Delivered {
            return Err(self.invalid_transition(role, action, "only delivered transactions can be rated"));
        }
        if self.rated {
            return Err(TransactionError::AlreadyRated {
                transaction_id: self.id,
            });
        }
        Ok(role)
    }

    fn invalid_transition(
        &self,
        role: PartyRole,
        action: TransactionAction,
        reason: &str,
    ) -> TransactionError {
        TransactionError::InvalidTransition {
            status: self.status,
            action,
            role,
            reason: reason.to_string(),
        }
    }
}

fn describe_roles(roles: &[PartyRole]) -> String {
    match roles {
        [] => "no party".to_string(),
        [one] => one.to_string(),
        _ => roles
            .iter()
            .map(PartyRole::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
    }
}

/// Trim optional free text; blank becomes `None`.
fn normalize_text(
    value: Option<String>,
    field: &str,
    max: usize,
    action: TransactionAction,
) -> Result<Option<String>, TransactionError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > max {
        return Err(TransactionError::PreconditionFailed {
            action,
            reason: format!("{field} must not exceed {max} characters"),
        });
    }
    Ok(Some(trimmed.to_string()))
}
