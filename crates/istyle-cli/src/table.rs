//! # Table Subcommand
//!
//! Prints the forward transitions and, for every cancellation policy, the
//! roles allowed to cancel in each non-terminal status.

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde::Serialize;

use istyle_state::{CancellationPolicy, TransactionAction, TransactionStatus, TRANSITION_TABLE};

#[derive(Args, Debug)]
pub struct TableArgs {
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TransitionRow {
    pub from: TransactionStatus,
    pub action: TransactionAction,
    pub role: String,
    pub to: TransactionStatus,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CancelRow {
    pub policy: CancellationPolicy,
    pub status: TransactionStatus,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct LifecycleTable {
    pub transitions: Vec<TransitionRow>,
    pub cancellation: Vec<CancelRow>,
}

const POLICIES: [CancellationPolicy; 3] = [
    CancellationPolicy::BeforeConfirmation,
    CancellationPolicy::EitherParty,
    CancellationPolicy::SellerOnly,
];

pub fn lifecycle_table() -> LifecycleTable {
    let transitions = TRANSITION_TABLE
        .iter()
        .map(|rule| TransitionRow {
            from: rule.from,
            action: rule.action,
            role: rule.role.as_str().to_string(),
            to: rule.to,
        })
        .collect();

    let cancellation = POLICIES
        .iter()
        .flat_map(|policy| {
            TransactionStatus::ALL
                .iter()
                .filter(|status| !status.is_terminal())
                .map(move |status| CancelRow {
                    policy: *policy,
                    status: *status,
                    roles: policy
                        .allowed_roles(*status)
                        .iter()
                        .map(|r| r.as_str().to_string())
                        .collect(),
                })
        })
        .collect();

    LifecycleTable {
        transitions,
        cancellation,
    }
}

pub fn render_text(table: &LifecycleTable) -> String {
    let mut out = String::from("Transitions\n");
    for row in &table.transitions {
        out.push_str(&format!(
            "  {:<18} --{}[{}]--> {}\n",
            row.from.as_str(),
            row.action.as_str(),
            row.role,
            row.to.as_str()
        ));
    }
    out.push_str("\nCancellation\n");
    for row in &table.cancellation {
        out.push_str(&format!(
            "  {:<20} {:<18} {}\n",
            row.policy.as_str(),
            row.status.as_str(),
            row.roles.join(", ")
        ));
    }
    out
}

pub fn run_table(args: &TableArgs) -> Result<u8> {
    let table = lifecycle_table();
    match args.format {
        OutputFormat::Text => print!("{}", render_text(&table)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&table)?),
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_forward_path() {
        let table = lifecycle_table();
        assert_eq!(table.transitions.len(), TRANSITION_TABLE.len());
        assert_eq!(table.transitions[0].from, TransactionStatus::PendingPayment);
        assert_eq!(table.transitions[0].role, "buyer");
        assert_eq!(
            table.transitions.last().map(|r| r.to),
            Some(TransactionStatus::Delivered)
        );
    }

    #[test]
    fn cancellation_rows_skip_terminal_statuses() {
        let table = lifecycle_table();
        assert_eq!(table.cancellation.len(), 3 * 4);
        assert!(table
            .cancellation
            .iter()
            .all(|row| !row.status.is_terminal()));
        let seller_only_pending = table
            .cancellation
            .iter()
            .find(|row| {
                row.policy == CancellationPolicy::SellerOnly
                    && row.status == TransactionStatus::PendingPayment
            })
            .unwrap();
        assert_eq!(seller_only_pending.roles, vec!["seller".to_string()]);
    }

    #[test]
    fn text_rendering_mentions_every_status() {
        let text = render_text(&lifecycle_table());
        for status in ["PENDING_PAYMENT", "PAYMENT_SENT", "PAYMENT_CONFIRMED", "SHIPPED", "DELIVERED"] {
            assert!(text.contains(status), "missing {status}");
        }
    }
}
