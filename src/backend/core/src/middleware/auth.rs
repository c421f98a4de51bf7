//! Session authentication.
//!
//! Resolves the session token carried by a request into a live session.
//! The token is read from the session cookie, or from an
//! `Authorization: Bearer` header for non-browser clients. Sessions are
//! stored under the hex SHA-256 of their token, never the token itself.
//!
//! # Example
//!
//! ```rust,ignore
//! use gatehouse_core::middleware::auth::{SessionVerifier, StoreSessionVerifier};
//!
//! let verifier = StoreSessionVerifier::new(store.clone(), config.auth.clone());
//! if let Some(verified) = verifier.verify(request.headers()).await? {
//!     println!("user {}", verified.session.user_id);
//! }
//! ```

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::rbac::models::{Session, SessionId};
use crate::rbac::store::RbacStore;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Session authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Name of the cookie carrying the session token
    #[serde(default = "default_session_cookie")]
    pub session_cookie_name: String,

    /// Accept `Authorization: Bearer <token>` in addition to the cookie
    #[serde(default = "default_allow_bearer")]
    pub allow_bearer: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_cookie_name: default_session_cookie(),
            allow_bearer: default_allow_bearer(),
        }
    }
}

fn default_session_cookie() -> String {
    "p_session_token".to_string()
}

fn default_allow_bearer() -> bool {
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// Verified Session
// ═══════════════════════════════════════════════════════════════════════════════

/// Where the session token was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Cookie,
    Bearer,
}

impl TokenSource {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Cookie => "cookie",
            Self::Bearer => "bearer",
        }
    }
}

/// A live session resolved from request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSession {
    pub session: Session,
    pub source: TokenSource,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Verifier
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves request headers into a session.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    /// `Ok(None)` when the request carries no valid session. Errors are
    /// reserved for store failures.
    async fn verify(&self, headers: &HeaderMap) -> Result<Option<VerifiedSession>>;
}

/// Hash a session token into the identifier it is stored under.
pub fn session_id_for_token(token: &str) -> SessionId {
    SessionId::new(hex::encode(Sha256::digest(token.as_bytes())))
}

/// Session verifier backed by the RBAC store's session table.
#[derive(Clone)]
pub struct StoreSessionVerifier {
    store: Arc<dyn RbacStore>,
    config: AuthConfig,
}

impl StoreSessionVerifier {
    pub fn new(store: Arc<dyn RbacStore>, config: AuthConfig) -> Self {
        Self { store, config }
    }

    /// Extract the raw session token. The cookie wins over the header.
    pub fn extract_token(&self, headers: &HeaderMap) -> Option<(String, TokenSource)> {
        if let Some(token) = self.cookie_token(headers) {
            return Some((token, TokenSource::Cookie));
        }
        if self.config.allow_bearer {
            return bearer_token(headers).map(|t| (t, TokenSource::Bearer));
        }
        None
    }

    fn cookie_token(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.config.session_cookie_name)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").or_else(|| s.strip_prefix("bearer ")))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl SessionVerifier for StoreSessionVerifier {
    async fn verify(&self, headers: &HeaderMap) -> Result<Option<VerifiedSession>> {
        let Some((token, source)) = self.extract_token(headers) else {
            return Ok(None);
        };

        let session_id = session_id_for_token(&token);
        let Some(session) = self.store.get_session(&session_id).await? else {
            debug!(source = source.as_str(), "Unknown session");
            return Ok(None);
        };

        if session.is_expired() {
            debug!(user_id = %session.user_id, "Session expired");
            counter!("gatehouse_auth_sessions_total", "result" => "expired").increment(1);
            return Ok(None);
        }

        counter!(
            "gatehouse_auth_sessions_total",
            "result" => "valid",
            "source" => source.as_str()
        )
        .increment(1);

        Ok(Some(VerifiedSession { session, source }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::memory::InMemoryStore;
    use crate::rbac::models::UserId;
    use axum::http::HeaderValue;
    use chrono::{Duration, Utc};

    fn store_with_session(token: &str, ttl: Duration) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store.insert_session(Session {
            session_id: session_id_for_token(token),
            user_id: UserId::new("alice"),
            expires_at: Utc::now() + ttl,
        });
        store
    }

    #[test]
    fn test_session_id_is_hex_sha256() {
        let id = session_id_for_token("abc");
        assert_eq!(
            id.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_cookie_token_verifies() {
        let store = store_with_session("tok", Duration::hours(1));
        let verifier = StoreSessionVerifier::new(store, AuthConfig::default());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; p_session_token=tok"),
        );

        let verified = verifier.verify(&headers).await.unwrap().unwrap();
        assert_eq!(verified.source, TokenSource::Cookie);
        assert_eq!(verified.session.user_id.as_str(), "alice");
    }

    #[tokio::test]
    async fn test_bearer_token_verifies() {
        let store = store_with_session("tok", Duration::hours(1));
        let verifier = StoreSessionVerifier::new(store, AuthConfig::default());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));

        let verified = verifier.verify(&headers).await.unwrap().unwrap();
        assert_eq!(verified.source, TokenSource::Bearer);
    }

    #[tokio::test]
    async fn test_bearer_disabled() {
        let store = store_with_session("tok", Duration::hours(1));
        let config = AuthConfig {
            allow_bearer: false,
            ..Default::default()
        };
        let verifier = StoreSessionVerifier::new(store, config);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert!(verifier.verify(&headers).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_and_unknown_sessions() {
        let store = store_with_session("old", Duration::minutes(-5));
        let verifier = StoreSessionVerifier::new(store, AuthConfig::default());

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("p_session_token=old"));
        assert!(verifier.verify(&headers).await.unwrap().is_none());

        headers.insert(header::COOKIE, HeaderValue::from_static("p_session_token=nope"));
        assert!(verifier.verify(&headers).await.unwrap().is_none());

        assert!(verifier.verify(&HeaderMap::new()).await.unwrap().is_none());
    }
}
