//! Permission evaluation.
//!
//! Answers "may the caller of this request perform action A in
//! organization O?". Checks run strictly in order and stop at the first
//! failure: session, user record, verified email, then the grant.

use axum::http::HeaderMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::catalog::Action;
use super::models::{OrgId, RoleId, Session, User};
use super::store::RbacStore;
use crate::error::{ErrorCode, GatehouseError, Result};
use crate::middleware::auth::SessionVerifier;
use crate::telemetry::metrics::RbacMetrics;

pub const USER_NOT_FOUND_MESSAGE: &str = "User does not exist";
pub const EMAIL_NOT_VERIFIED_MESSAGE: &str = "Email is not verified";
pub const FORBIDDEN_MESSAGE: &str = "User does not have permission to perform this action";

// ═══════════════════════════════════════════════════════════════════════════════
// Identity
// ═══════════════════════════════════════════════════════════════════════════════

/// The verified caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user: User,
    pub session: Session,
    /// Set when the request was checked against an organization.
    pub org_id: Option<OrgId>,
    /// Roles the user holds in `org_id`.
    pub role_ids: Vec<RoleId>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Decision
// ═══════════════════════════════════════════════════════════════════════════════

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// No valid session on the request.
    Unauthenticated,
    /// The session's user has no user record.
    UnknownUser,
    /// The user has not verified their email.
    Unverified(Box<User>),
    /// The user holds no role granting the action in the organization.
    Forbidden(Box<Identity>),
    Authorized(Box<Identity>),
}

impl AccessDecision {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }

    /// Label used for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::UnknownUser => "unknown_user",
            Self::Unverified(_) => "unverified",
            Self::Forbidden(_) => "forbidden",
            Self::Authorized(_) => "authorized",
        }
    }

    /// The error a denied request is answered with.
    pub fn into_identity(self) -> Result<Identity> {
        match self {
            Self::Authorized(identity) => Ok(*identity),
            Self::Unauthenticated => Err(GatehouseError::unauthorized("Unauthorized")),
            Self::UnknownUser => Err(GatehouseError::new(
                ErrorCode::UserNotFound,
                USER_NOT_FOUND_MESSAGE,
            )),
            Self::Unverified(_) => Err(GatehouseError::new(
                ErrorCode::EmailNotVerified,
                EMAIL_NOT_VERIFIED_MESSAGE,
            )),
            Self::Forbidden(_) => Err(GatehouseError::forbidden(FORBIDDEN_MESSAGE)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Checker
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluates access decisions against the session verifier and grant store.
///
/// Read-only: never writes to the store.
#[derive(Clone)]
pub struct PermissionChecker {
    store: Arc<dyn RbacStore>,
    sessions: Arc<dyn SessionVerifier>,
}

impl PermissionChecker {
    pub fn new(store: Arc<dyn RbacStore>, sessions: Arc<dyn SessionVerifier>) -> Self {
        Self { store, sessions }
    }

    /// Establish who the caller is, without any grant check.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AccessDecision> {
        let decision = self.identify(headers).await?;
        RbacMetrics::record_access_decision(decision.outcome());
        Ok(decision)
    }

    /// Decide whether the caller may perform `action` within `org_id`.
    pub async fn evaluate(
        &self,
        headers: &HeaderMap,
        action: Action,
        org_id: &OrgId,
    ) -> Result<AccessDecision> {
        self.evaluate_scoped(headers, action, async { Ok(org_id.clone()) })
            .await
    }

    /// Like [`evaluate`](Self::evaluate), but `org_id` is only awaited once
    /// the caller is identified. Identity denials win over a failure to
    /// resolve the organization.
    pub async fn evaluate_scoped<F>(
        &self,
        headers: &HeaderMap,
        action: Action,
        org_id: F,
    ) -> Result<AccessDecision>
    where
        F: Future<Output = Result<OrgId>>,
    {
        let decision = match self.identify(headers).await? {
            AccessDecision::Authorized(identity) => {
                let org_id = org_id.await?;
                self.check_grant(*identity, action, &org_id).await?
            }
            denied => denied,
        };

        debug!(
            action = %action,
            outcome = decision.outcome(),
            "Access decision"
        );
        RbacMetrics::record_access_decision(decision.outcome());
        Ok(decision)
    }

    async fn identify(&self, headers: &HeaderMap) -> Result<AccessDecision> {
        let Some(verified) = self.sessions.verify(headers).await? else {
            return Ok(AccessDecision::Unauthenticated);
        };

        let Some(user) = self.store.get_user(&verified.session.user_id).await? else {
            return Ok(AccessDecision::UnknownUser);
        };

        if !user.email_verified {
            return Ok(AccessDecision::Unverified(Box::new(user)));
        }

        Ok(AccessDecision::Authorized(Box::new(Identity {
            user,
            session: verified.session,
            org_id: None,
            role_ids: Vec::new(),
        })))
    }

    async fn check_grant(
        &self,
        mut identity: Identity,
        action: Action,
        org_id: &OrgId,
    ) -> Result<AccessDecision> {
        let role_ids = self
            .store
            .user_role_ids(&identity.user.user_id, org_id)
            .await?;

        let allowed = !role_ids.is_empty()
            && self
                .store
                .has_grant(&role_ids, &action.id(), org_id)
                .await?;

        identity.org_id = Some(org_id.clone());
        identity.role_ids = role_ids;

        Ok(if allowed {
            AccessDecision::Authorized(Box::new(identity))
        } else {
            AccessDecision::Forbidden(Box::new(identity))
        })
    }
}
