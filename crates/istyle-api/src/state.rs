//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! The marketplace engine runs over in-memory stores. When a database pool
//! is configured, handlers write every change to Postgres before committing
//! it in memory, and the stores are hydrated from it on startup.

use std::path::PathBuf;
use std::sync::Arc;

use istyle_market::{
    EventSink, Marketplace, MemoryListingStore, MemoryProofStorage, MemoryRatingStore,
    MemoryTransactionStore, ProofStorage,
};
use istyle_state::CancellationPolicy;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use thiserror::Error;

use crate::events::TracingEventSink;
use crate::locks::ListingWriteLocks;

// -- Configuration ------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid PORT value {0:?}")]
    Port(String),
    #[error("invalid ISTYLE_CANCEL_POLICY value {0:?}")]
    CancelPolicy(String),
}

/// Application configuration.
///
/// Custom `Debug` redacts the `auth_secret` to prevent credential leakage in logs.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Shared bearer secret. If `None`, tokens are trusted as user ids.
    pub auth_secret: Option<String>,
    /// Directory receiving payment proof uploads.
    pub upload_dir: PathBuf,
    pub cancel_policy: CancellationPolicy,
}

impl AppConfig {
    /// Read `PORT`, `ISTYLE_AUTH_SECRET`, `ISTYLE_UPLOAD_DIR` and
    /// `ISTYLE_CANCEL_POLICY`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(port) = lookup("PORT") {
            config.port = port.parse().map_err(|_| ConfigError::Port(port))?;
        }
        config.auth_secret = lookup("ISTYLE_AUTH_SECRET").filter(|s| !s.is_empty());
        if let Some(dir) = lookup("ISTYLE_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(policy) = lookup("ISTYLE_CANCEL_POLICY") {
            config.cancel_policy = policy
                .parse()
                .map_err(|_| ConfigError::CancelPolicy(policy))?;
        }
        Ok(config)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "auth_secret",
                &self.auth_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("upload_dir", &self.upload_dir)
            .field("cancel_policy", &self.cancel_policy)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_secret: None,
            upload_dir: PathBuf::from("./uploads"),
            cancel_policy: CancellationPolicy::default(),
        }
    }
}

// -- Application State --------------------------------------------------------

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub market: Marketplace,
    pub listings: Arc<MemoryListingStore>,
    pub transactions: Arc<MemoryTransactionStore>,
    pub ratings: Arc<MemoryRatingStore>,
    pub proofs: Arc<dyn ProofStorage>,
    /// Serializes changes per listing across the database write.
    pub write_locks: ListingWriteLocks,
    /// PostgreSQL pool, written ahead of memory. `None` runs in-memory only.
    pub db_pool: Option<PgPool>,
    /// Prometheus handle backing `GET /metrics`.
    pub metrics: Option<PrometheusHandle>,
    pub config: AppConfig,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("market", &self.market)
            .field("db_pool", &self.db_pool.is_some())
            .field("metrics", &self.metrics.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl AppState {
    /// In-memory state with default configuration and in-memory proof storage.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let listings = Arc::new(MemoryListingStore::new());
        let transactions = Arc::new(MemoryTransactionStore::new());
        let ratings = Arc::new(MemoryRatingStore::new());
        let market = Marketplace::new(
            listings.clone(),
            transactions.clone(),
            ratings.clone(),
        )
        .with_policy(config.cancel_policy)
        .with_events(Arc::new(TracingEventSink));
        Self {
            market,
            listings,
            transactions,
            ratings,
            proofs: Arc::new(MemoryProofStorage::new()),
            write_locks: ListingWriteLocks::new(),
            db_pool: None,
            metrics: None,
            config,
        }
    }

    pub fn with_proof_storage(mut self, proofs: Arc<dyn ProofStorage>) -> Self {
        self.proofs = proofs;
        self
    }

    pub fn with_db_pool(mut self, pool: PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.market = self.market.with_events(events);
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.auth_secret.is_none());
        assert_eq!(config.upload_dir, PathBuf::from("./uploads"));
        assert_eq!(config.cancel_policy, CancellationPolicy::BeforeConfirmation);
    }

    #[test]
    fn reads_every_variable() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PORT", "9090"),
            ("ISTYLE_AUTH_SECRET", "s3cret"),
            ("ISTYLE_UPLOAD_DIR", "/var/istyle/uploads"),
            ("ISTYLE_CANCEL_POLICY", "seller_only"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.auth_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.upload_dir, PathBuf::from("/var/istyle/uploads"));
        assert_eq!(config.cancel_policy, CancellationPolicy::SellerOnly);
    }

    #[test]
    fn empty_secret_disables_auth() {
        let config = AppConfig::from_lookup(lookup(&[("ISTYLE_AUTH_SECRET", "")])).unwrap();
        assert!(config.auth_secret.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("PORT", "eighty")])),
            Err(ConfigError::Port(_))
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("ISTYLE_CANCEL_POLICY", "never")])),
            Err(ConfigError::CancelPolicy(_))
        ));
    }

    #[test]
    fn debug_redacts_secret() {
        let config = AppConfig {
            auth_secret: Some("super-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn state_applies_cancel_policy() {
        let state = AppState::with_config(AppConfig {
            cancel_policy: CancellationPolicy::EitherParty,
            ..AppConfig::default()
        });
        assert_eq!(state.market.policy(), CancellationPolicy::EitherParty);
    }
}
