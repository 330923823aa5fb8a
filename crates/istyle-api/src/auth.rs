//! # Authentication
//!
//! Bearer token middleware. Every authenticated request gets a
//! [`CallerIdentity`] injected into the request extensions; handlers extract
//! it via the `FromRequestParts` impl and pass the resolved user id to the
//! marketplace as a trusted input.
//!
//! ## Token Format
//!
//! ```text
//! Bearer {user_id}:{secret}         — member
//! Bearer admin:{user_id}:{secret}   — administrator
//! ```
//!
//! When no shared secret is configured the [`DevIdentityProvider`] accepts
//! `Bearer {user_id}` and `Bearer admin:{user_id}` without verification.

use std::sync::Arc;

use axum::extract::Request;
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use istyle_core::UserId;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use utoipa::ToSchema;

use crate::error::{AppError, ErrorBody, ErrorDetail};

// ── Role ────────────────────────────────────────────────────────────────────

/// Caller roles. `Admin` may read any transaction; it grants no lifecycle
/// permissions, which stay with the buyer and seller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// Identity of the authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: UserId,
    pub role: Role,
}

impl CallerIdentity {
    pub fn member(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Member,
        }
    }

    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Extracts the identity that the auth middleware injected into extensions.
/// Returns 401 if no identity is present.
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .copied()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

// ── Identity providers ──────────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid bearer token")]
    InvalidToken,
    #[error("invalid token format: expected {expected}")]
    Malformed { expected: &'static str },
    #[error("invalid user id: {0}")]
    InvalidUserId(String),
}

/// Resolves a bearer credential to an authenticated identity.
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, credential: &str) -> Result<CallerIdentity, AuthError>;
}

fn parse_user_id(value: &str) -> Result<UserId, AuthError> {
    value
        .parse::<UserId>()
        .map_err(|_| AuthError::InvalidUserId(value.to_string()))
}

/// Constant-time comparison of bearer secrets.
///
/// When lengths differ, performs a dummy comparison so the timing does not
/// depend on whether the lengths matched.
fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

/// Verifies `{user_id}:{secret}` and `admin:{user_id}:{secret}` tokens
/// against a shared secret held by the server.
#[derive(Clone)]
pub struct SharedSecretIdentityProvider {
    secret: String,
}

impl SharedSecretIdentityProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for SharedSecretIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretIdentityProvider")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl IdentityProvider for SharedSecretIdentityProvider {
    fn resolve(&self, credential: &str) -> Result<CallerIdentity, AuthError> {
        const EXPECTED: &str = "{user_id}:{secret} or admin:{user_id}:{secret}";

        // The secret may itself contain ':' so only the prefix is split.
        let (role, rest) = match credential.strip_prefix("admin:") {
            Some(rest) => (Role::Admin, rest),
            None => (Role::Member, credential),
        };
        let (user, secret) = rest
            .split_once(':')
            .ok_or(AuthError::Malformed { expected: EXPECTED })?;

        if !constant_time_token_eq(secret, &self.secret) {
            return Err(AuthError::InvalidToken);
        }
        let user_id = parse_user_id(user)?;
        Ok(CallerIdentity { user_id, role })
    }
}

/// Trusts the bearer value as a user id. Development only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DevIdentityProvider;

impl IdentityProvider for DevIdentityProvider {
    fn resolve(&self, credential: &str) -> Result<CallerIdentity, AuthError> {
        match credential.strip_prefix("admin:") {
            Some(user) => Ok(CallerIdentity::admin(parse_user_id(user)?)),
            None => Ok(CallerIdentity::member(parse_user_id(credential)?)),
        }
    }
}

// ── Auth Configuration ──────────────────────────────────────────────────────

/// Auth configuration injected into request extensions.
#[derive(Clone)]
pub struct AuthConfig {
    pub provider: Arc<dyn IdentityProvider>,
}

impl AuthConfig {
    /// Shared-secret verification when a secret is configured, otherwise
    /// the development provider.
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) => Self {
                provider: Arc::new(SharedSecretIdentityProvider::new(secret)),
            },
            None => {
                tracing::warn!(
                    "no auth secret configured: bearer tokens are trusted as user ids"
                );
                Self {
                    provider: Arc::new(DevIdentityProvider),
                }
            }
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("provider", &"[REDACTED]")
            .finish()
    }
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Extract the Bearer token from the Authorization header, resolve it through
/// the configured [`IdentityProvider`], and inject the [`CallerIdentity`].
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let Some(config) = request.extensions().get::<AuthConfig>().cloned() else {
        tracing::error!("auth middleware running without an AuthConfig extension");
        return unauthorized_response("authentication is not configured");
    };

    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let resolved = match auth_header {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(token) => config.provider.resolve(token.trim()),
            None => {
                tracing::warn!("authentication failed: non-Bearer authorization scheme");
                return unauthorized_response("authorization header must use Bearer scheme");
            }
        },
        None => {
            tracing::warn!("authentication failed: missing authorization header");
            return unauthorized_response("missing authorization header");
        }
    };

    match resolved {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(reason = %err, "authentication failed");
            unauthorized_response(&err.to_string())
        }
    }
}

fn unauthorized_response(message: &str) -> Response {
    let body = ErrorBody {
        error: ErrorDetail {
            code: "UNAUTHORIZED".to_string(),
            message: message.to_string(),
            details: None,
        },
    };
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::middleware::from_fn;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app(secret: Option<&str>) -> Router {
        Router::new()
            .route(
                "/whoami",
                get(|caller: CallerIdentity| async move {
                    format!("{}:{}", caller.role.as_str(), caller.user_id)
                }),
            )
            .layer(from_fn(auth_middleware))
            .layer(axum::Extension(AuthConfig::from_secret(secret)))
    }

    async fn send(app: Router, auth: Option<String>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/whoami");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn valid_member_token_accepted() {
        let user = UserId::new();
        let (status, body) = send(
            test_app(Some("s3cret")),
            Some(format!("Bearer {}:s3cret", user.as_uuid())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("member:{user}"));
    }

    #[tokio::test]
    async fn valid_admin_token_accepted() {
        let user = UserId::new();
        let (status, body) = send(
            test_app(Some("s3cret")),
            Some(format!("Bearer admin:{}:s3cret", user.as_uuid())),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with("admin:"));
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let (status, body) = send(
            test_app(Some("s3cret")),
            Some(format!("Bearer {}:guess", UserId::new().as_uuid())),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let err: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(err["error"]["code"], "UNAUTHORIZED");
        assert!(err["error"]["message"].as_str().unwrap().contains("invalid"));
    }

    #[tokio::test]
    async fn missing_header_rejected() {
        let (status, body) = send(test_app(Some("s3cret")), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("missing"));
    }

    #[tokio::test]
    async fn non_bearer_scheme_rejected() {
        let (status, body) = send(
            test_app(Some("s3cret")),
            Some("Basic dXNlcjpwYXNz".to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Bearer"));
    }

    #[tokio::test]
    async fn dev_provider_trusts_user_id() {
        let user = UserId::new();
        let (status, body) = send(test_app(None), Some(format!("Bearer {}", user.as_uuid()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("member:{user}"));
    }

    #[tokio::test]
    async fn dev_provider_rejects_garbage() {
        let (status, _) = send(test_app(None), Some("Bearer not-a-uuid".to_string())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn secret_may_contain_colons() {
        let provider = SharedSecretIdentityProvider::new("a:b:c");
        let user = UserId::new();
        let identity = provider
            .resolve(&format!("{}:a:b:c", user.as_uuid()))
            .unwrap();
        assert_eq!(identity, CallerIdentity::member(user));
    }

    #[test]
    fn malformed_token_rejected() {
        let provider = SharedSecretIdentityProvider::new("s3cret");
        assert!(matches!(
            provider.resolve("no-separator"),
            Err(AuthError::Malformed { .. })
        ));
    }

    #[test]
    fn constant_time_eq_behaviour() {
        assert!(constant_time_token_eq("abc", "abc"));
        assert!(!constant_time_token_eq("abc", "abd"));
        assert!(!constant_time_token_eq("abc", "abcd"));
    }

    #[test]
    fn debug_redacts_secret() {
        let provider = SharedSecretIdentityProvider::new("super-secret");
        let debug = format!("{provider:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
