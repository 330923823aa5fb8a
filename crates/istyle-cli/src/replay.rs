//! # Replay Subcommand
//!
//! Runs a YAML lifecycle script against a fresh in-memory marketplace.
//! Users and listings are declared by name; every step names an actor and
//! an action, and may state the expected outcome: `ok` (default), the
//! resulting status (e.g. `SHIPPED`), or an error code (e.g. `FORBIDDEN`).
//!
//! ```yaml
//! policy: before_confirmation
//! users: [ana, luis]
//! listings:
//!   - { name: jacket, owner: ana, title: Denim jacket, kind: SALE, price: "45.00" }
//! steps:
//!   - { actor: luis, action: initiate, listing: jacket, as: t1 }
//!   - { actor: ana, action: confirm_payment, transaction: t1, expect: INVALID_TRANSITION }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Deserialize;

use istyle_core::{ListingId, TransactionId, UserId};
use istyle_market::{
    ListingUpdate, MarketError, MarketEvent, Marketplace, MemoryEventLog, MemoryProofStorage,
    NewListing, ProofFormat,
};
use istyle_state::{CancellationPolicy, ListingKind, ListingStatus};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Path to the YAML script.
    pub script: PathBuf,

    /// Override the script's cancellation policy.
    #[arg(long)]
    pub policy: Option<CancellationPolicy>,

    /// Print the recorded events as JSON lines after the run.
    #[arg(long)]
    pub events: bool,
}

// ── Script format ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default)]
    pub policy: Option<CancellationPolicy>,
    pub users: Vec<String>,
    #[serde(default)]
    pub listings: Vec<ScriptListing>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptListing {
    pub name: String,
    pub owner: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: ListingKind,
    #[serde(default)]
    pub price: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Step {
    pub actor: String,
    #[serde(flatten)]
    pub operation: Operation,
    /// `ok`, a status name, or an error code. Defaults to `ok`.
    #[serde(default)]
    pub expect: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Operation {
    Initiate {
        listing: String,
        /// Name later steps use for the new transaction.
        #[serde(rename = "as")]
        alias: String,
        #[serde(default)]
        message: Option<String>,
    },
    UploadPaymentProof {
        transaction: String,
        #[serde(default = "default_file_type")]
        file_type: String,
    },
    ConfirmPayment {
        transaction: String,
    },
    MarkShipped {
        transaction: String,
        #[serde(default)]
        tracking_info: Option<String>,
    },
    ConfirmDelivery {
        transaction: String,
    },
    Cancel {
        transaction: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Rate {
        transaction: String,
        score: i64,
        #[serde(default)]
        comment: Option<String>,
    },
    UpdateListing {
        listing: String,
        #[serde(default)]
        status: Option<ListingStatus>,
        #[serde(default)]
        price: Option<String>,
    },
}

fn default_file_type() -> String {
    "png".to_string()
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initiate { .. } => "initiate",
            Self::UploadPaymentProof { .. } => "upload_payment_proof",
            Self::ConfirmPayment { .. } => "confirm_payment",
            Self::MarkShipped { .. } => "mark_shipped",
            Self::ConfirmDelivery { .. } => "confirm_delivery",
            Self::Cancel { .. } => "cancel",
            Self::Rate { .. } => "rate",
            Self::UpdateListing { .. } => "update_listing",
        }
    }
}

// ── Execution ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub index: usize,
    pub actor: String,
    pub action: &'static str,
    /// `ok`-style outcome: the resulting status, `RATED`, or the error code.
    pub outcome: String,
    pub expected: String,
    pub matched: bool,
}

#[derive(Debug)]
pub struct Report {
    pub steps: Vec<StepOutcome>,
    pub events: Vec<MarketEvent>,
}

impl Report {
    pub fn failures(&self) -> usize {
        self.steps.iter().filter(|s| !s.matched).count()
    }
}

struct Names {
    users: HashMap<String, UserId>,
    listings: HashMap<String, ListingId>,
    transactions: HashMap<String, TransactionId>,
}

impl Names {
    fn user(&self, name: &str) -> Result<UserId> {
        self.users
            .get(name)
            .copied()
            .with_context(|| format!("unknown user {name:?}"))
    }

    fn listing(&self, name: &str) -> Result<ListingId> {
        self.listings
            .get(name)
            .copied()
            .with_context(|| format!("unknown listing {name:?}"))
    }

    fn transaction(&self, name: &str) -> Result<TransactionId> {
        self.transactions
            .get(name)
            .copied()
            .with_context(|| format!("unknown transaction {name:?}"))
    }
}

/// Run `script` and collect one outcome per step. Script errors (unknown
/// names, listings that fail to publish) abort the run; lifecycle
/// rejections are outcomes.
pub fn run_script(script: &Script, policy: Option<CancellationPolicy>) -> Result<Report> {
    let events = Arc::new(MemoryEventLog::new());
    let market = Marketplace::in_memory()
        .with_policy(policy.or(script.policy).unwrap_or_default())
        .with_events(events.clone());
    let proofs = MemoryProofStorage::new();

    let mut names = Names {
        users: script
            .users
            .iter()
            .map(|name| (name.clone(), UserId::new()))
            .collect(),
        listings: HashMap::new(),
        transactions: HashMap::new(),
    };

    for listing in &script.listings {
        let owner = names.user(&listing.owner)?;
        let created = market
            .create_listing(
                owner,
                NewListing {
                    title: listing.title.clone(),
                    description: listing.description.clone(),
                    kind: listing.kind,
                    price: listing.price.clone(),
                },
            )
            .with_context(|| format!("publishing listing {:?}", listing.name))?;
        names.listings.insert(listing.name.clone(), created.id);
    }

    let mut steps = Vec::with_capacity(script.steps.len());
    for (index, step) in script.steps.iter().enumerate() {
        let actor = names.user(&step.actor)?;
        let result = execute(&market, &proofs, &mut names, actor, &step.operation)
            .with_context(|| format!("step {}", index + 1))?;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) => err.code().to_string(),
        };
        let expected = step.expect.clone().unwrap_or_else(|| "ok".to_string());
        let matched = expected == outcome
            || (expected.eq_ignore_ascii_case("ok") && !is_error_code(&outcome));
        tracing::info!(
            step = index + 1,
            actor = %step.actor,
            action = step.operation.name(),
            %outcome,
            matched,
            "replayed step"
        );
        steps.push(StepOutcome {
            index: index + 1,
            actor: step.actor.clone(),
            action: step.operation.name(),
            outcome,
            expected,
            matched,
        });
    }

    Ok(Report {
        steps,
        events: events.events(),
    })
}

fn is_error_code(outcome: &str) -> bool {
    matches!(
        outcome,
        "NOT_FOUND"
            | "FORBIDDEN"
            | "INVALID_TRANSITION"
            | "LISTING_UNAVAILABLE"
            | "PRECONDITION_FAILED"
            | "ALREADY_RATED"
            | "INVALID_RATING"
            | "VALIDATION_ERROR"
            | "STORE_ERROR"
            | "INVALID_PROOF"
            | "PROOF_STORAGE_ERROR"
    )
}

/// The outer `Result` is a script error; the inner one is the marketplace's
/// answer.
fn execute(
    market: &Marketplace,
    proofs: &MemoryProofStorage,
    names: &mut Names,
    actor: UserId,
    operation: &Operation,
) -> Result<Result<String, MarketError>> {
    let status = |tx: istyle_state::Transaction| tx.status.as_str().to_string();
    Ok(match operation {
        Operation::Initiate {
            listing,
            alias,
            message,
        } => {
            if names.transactions.contains_key(alias) {
                bail!("transaction name {alias:?} is already taken");
            }
            let listing = names.listing(listing)?;
            market.initiate(actor, listing, message.clone()).map(|tx| {
                names.transactions.insert(alias.clone(), tx.id);
                status(tx)
            })
        }
        Operation::UploadPaymentProof {
            transaction,
            file_type,
        } => {
            let id = names.transaction(transaction)?;
            match ProofFormat::from_extension(file_type) {
                Ok(format) => market
                    .submit_payment_proof(actor, id, proofs, format, b"replayed payment proof")
                    .map(status),
                Err(e) => Err(e.into()),
            }
        }
        Operation::ConfirmPayment { transaction } => market
            .confirm_payment(actor, names.transaction(transaction)?)
            .map(status),
        Operation::MarkShipped {
            transaction,
            tracking_info,
        } => market
            .mark_shipped(actor, names.transaction(transaction)?, tracking_info.clone())
            .map(status),
        Operation::ConfirmDelivery { transaction } => market
            .confirm_delivery(actor, names.transaction(transaction)?)
            .map(status),
        Operation::Cancel {
            transaction,
            reason,
        } => market
            .cancel(actor, names.transaction(transaction)?, reason.clone())
            .map(status),
        Operation::Rate {
            transaction,
            score,
            comment,
        } => market
            .rate(actor, names.transaction(transaction)?, *score, comment.clone())
            .map(|_| "RATED".to_string()),
        Operation::UpdateListing {
            listing,
            status: listing_status,
            price,
        } => market
            .update_listing(
                actor,
                names.listing(listing)?,
                ListingUpdate {
                    status: *listing_status,
                    price: price.clone(),
                    ..ListingUpdate::default()
                },
            )
            .map(|l| l.status.as_str().to_string()),
    })
}

pub fn load_script(path: &Path) -> Result<Script> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn run_replay(args: &ReplayArgs) -> Result<u8> {
    let script = load_script(&args.script)?;
    let report = run_script(&script, args.policy)?;

    for step in &report.steps {
        let mark = if step.matched { "ok  " } else { "FAIL" };
        println!(
            "[{mark}] {:>3} {:<8} {:<22} -> {}{}",
            step.index,
            step.actor,
            step.action,
            step.outcome,
            if step.matched {
                String::new()
            } else {
                format!(" (expected {})", step.expected)
            }
        );
    }
    if args.events {
        for event in &report.events {
            println!("{}", serde_json::to_string(event)?);
        }
    }

    let failures = report.failures();
    println!("{} steps, {} failed", report.steps.len(), failures);
    Ok(if failures == 0 { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Script {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn bundled_sale_demo_passes() {
        let script = parse(include_str!("../../../demos/sale_lifecycle.yaml"));
        let report = run_script(&script, None).unwrap();
        let failed: Vec<_> = report.steps.iter().filter(|s| !s.matched).collect();
        assert!(failed.is_empty(), "{failed:#?}");
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, MarketEvent::Rated { score: 4, .. })));
    }

    #[test]
    fn mismatched_expectation_is_reported() {
        let script = parse(
            r#"
users: [ana, luis]
listings:
  - { name: bag, owner: ana, title: Leather bag, kind: SALE, price: "80" }
steps:
  - { actor: luis, action: initiate, listing: bag, as: t1 }
  - { actor: luis, action: confirm_payment, transaction: t1 }
"#,
        );
        let report = run_script(&script, None).unwrap();
        assert_eq!(report.steps[0].outcome, "PENDING_PAYMENT");
        assert!(report.steps[0].matched);
        assert_eq!(report.steps[1].outcome, "FORBIDDEN");
        assert!(!report.steps[1].matched);
        assert_eq!(report.failures(), 1);
    }

    #[test]
    fn policy_override_applies() {
        let script = parse(
            r#"
policy: either_party
users: [ana, luis]
listings:
  - { name: bag, owner: ana, title: Leather bag, kind: SALE }
steps:
  - { actor: luis, action: initiate, listing: bag, as: t1 }
  - { actor: luis, action: upload_payment_proof, transaction: t1, file_type: pdf }
  - { actor: ana, action: confirm_payment, transaction: t1 }
  - { actor: luis, action: cancel, transaction: t1, expect: FORBIDDEN }
"#,
        );
        let report = run_script(&script, Some(CancellationPolicy::SellerOnly)).unwrap();
        assert_eq!(report.failures(), 0, "{:#?}", report.steps);
    }

    #[test]
    fn unknown_names_abort_the_run() {
        let script = parse(
            r#"
users: [ana]
steps:
  - { actor: ana, action: confirm_payment, transaction: nope }
"#,
        );
        let err = run_script(&script, None).unwrap_err();
        assert!(format!("{err:#}").contains("unknown transaction"));
    }

    #[test]
    fn load_script_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.yaml");
        std::fs::write(&path, "users: [ana]\nsteps: []\n").unwrap();
        let script = load_script(&path).unwrap();
        assert_eq!(script.users, vec!["ana".to_string()]);
        assert!(script.steps.is_empty());
    }
}
