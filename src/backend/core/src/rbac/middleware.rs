//! Axum authorization middleware that enforces RBAC permissions on requests.
//!
//! Apply per route, so that path parameters are already matched:
//!
//! ```rust,ignore
//! use gatehouse_core::rbac::{Action, AccessLayer};
//!
//! let app = Router::new().route(
//!     "/api/v1/orgs/:org_id/roles",
//!     get(list_roles).layer(AccessLayer::action(checker.clone(), Action::ListRoles)),
//! );
//! ```
//!
//! On success the resolved [`Identity`] is inserted into request extensions
//! and can be taken as a handler argument.

use axum::{
    body::Body,
    extract::{FromRequestParts, RawPathParams, Request},
    http::request::Parts,
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::catalog::Action;
use super::models::OrgId;
use super::policy::{AccessDecision, Identity, PermissionChecker};
use crate::error::{GatehouseError, Result};

/// Path parameter naming the organization a request is scoped to.
pub const ORG_ID_PARAM: &str = "org_id";

// ═══════════════════════════════════════════════════════════════════════════════
// Identity extractor
// ═══════════════════════════════════════════════════════════════════════════════

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = GatehouseError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        parts.extensions.get::<Identity>().cloned().ok_or_else(|| {
            GatehouseError::internal("Identity requested on a route without an AccessLayer")
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Layer
// ═══════════════════════════════════════════════════════════════════════════════

/// What a request must satisfy to reach the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// A live session for an existing user with a verified email.
    VerifiedUser,
    /// A verified user holding `Action` in the path organization.
    Action(Action),
}

#[derive(Clone)]
pub struct AccessLayer {
    checker: Arc<PermissionChecker>,
    requirement: Requirement,
}

impl AccessLayer {
    pub fn verified_user(checker: Arc<PermissionChecker>) -> Self {
        Self {
            checker,
            requirement: Requirement::VerifiedUser,
        }
    }

    pub fn action(checker: Arc<PermissionChecker>, action: Action) -> Self {
        Self {
            checker,
            requirement: Requirement::Action(action),
        }
    }

    pub fn requirement(&self) -> Requirement {
        self.requirement
    }
}

impl<S> Layer<S> for AccessLayer {
    type Service = AccessService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessService {
            inner,
            checker: self.checker.clone(),
            requirement: self.requirement,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tower Service
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AccessService<S> {
    inner: S,
    checker: Arc<PermissionChecker>,
    requirement: Requirement,
}

impl<S> Service<Request<Body>> for AccessService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let checker = self.checker.clone();
        let requirement = self.requirement;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();

            let decision = match decide(&checker, requirement, &mut parts).await {
                Ok(decision) => decision,
                Err(e) => return Ok(e.into_response()),
            };

            if !decision.is_authorized() {
                warn!(
                    path = %parts.uri.path(),
                    requirement = ?requirement,
                    outcome = decision.outcome(),
                    "Access denied"
                );
            }

            let identity = match decision.into_identity() {
                Ok(identity) => identity,
                Err(e) => return Ok(e.into_response()),
            };

            parts.extensions.insert(identity);
            inner.call(Request::from_parts(parts, body)).await
        })
    }
}

async fn decide(
    checker: &PermissionChecker,
    requirement: Requirement,
    parts: &mut Parts,
) -> Result<AccessDecision> {
    match requirement {
        Requirement::VerifiedUser => checker.authenticate(&parts.headers).await,
        Requirement::Action(action) => {
            let headers = parts.headers.clone();
            checker
                .evaluate_scoped(&headers, action, path_org_id(parts))
                .await
        }
    }
}

/// Read the organization from the matched path.
async fn path_org_id(parts: &mut Parts) -> Result<OrgId> {
    let missing = || GatehouseError::invalid_field(ORG_ID_PARAM, "Organization ID is required");
    let params = RawPathParams::from_request_parts(parts, &())
        .await
        .map_err(|_| missing())?;

    params
        .iter()
        .find(|(key, _)| *key == ORG_ID_PARAM)
        .map(|(_, value)| OrgId::new(value))
        .filter(|org_id| !org_id.as_str().is_empty())
        .ok_or_else(missing)
}
