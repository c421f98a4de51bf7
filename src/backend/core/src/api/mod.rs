//! HTTP API for Gatehouse.
//!
//! Every response, success or failure, uses the same JSON envelope:
//! `{ data, success, error, message, status }`.

pub mod handlers;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::borrow::Cow;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ServerConfig;
use crate::db::Database;
use crate::error::GatehouseError;
use crate::middleware::auth::SessionVerifier;
use crate::middleware::tracing::RequestLoggingLayer;
use crate::rbac::{AccessLayer, Action, PermissionChecker, RbacStore, SuperuserProvisioner};
use crate::telemetry::MetricsRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RbacStore>,
    pub checker: Arc<PermissionChecker>,
    pub provisioner: SuperuserProvisioner,
    pub metrics: MetricsRegistry,
    /// Present when backed by Postgres; used by the health check.
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RbacStore>,
        sessions: Arc<dyn SessionVerifier>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            checker: Arc::new(PermissionChecker::new(store.clone(), sessions)),
            provisioner: SuperuserProvisioner::new(store.clone()),
            store,
            metrics,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}

/// Build the API router. An empty `server.cors_origins` allows any origin.
pub fn build_router(state: AppState, server: &ServerConfig) -> Router {
    let cors = cors_layer(&server.cors_origins);

    let checker = state.checker.clone();
    let verified = || AccessLayer::verified_user(checker.clone());
    let requires = |action: Action| AccessLayer::action(checker.clone(), action);

    let api_routes = Router::new()
        .route("/actions", get(handlers::list_actions).layer(verified()))
        .route("/orgs", post(handlers::create_org).layer(verified()))
        .route(
            "/orgs/:org_id/roles",
            get(handlers::list_roles)
                .layer(requires(Action::ListRoles))
                .merge(post(handlers::create_role).layer(requires(Action::CreateRole))),
        )
        .route(
            "/orgs/:org_id/roles/:role_id",
            delete(handlers::delete_role).layer(requires(Action::DeleteRole)),
        )
        .route(
            "/orgs/:org_id/roles/:role_id/actions",
            get(handlers::list_role_actions)
                .layer(requires(Action::ListRoleActions))
                .merge(post(handlers::add_role_action).layer(requires(Action::AddRoleAction))),
        )
        .route(
            "/orgs/:org_id/roles/:role_id/actions/:action_id",
            delete(handlers::remove_role_action).layer(requires(Action::RemoveRoleAction)),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api_routes)
        .fallback(handlers::not_found)
        .layer(RequestLoggingLayer::new(server.request_logging.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Response envelope
// ═══════════════════════════════════════════════════════════════════════════════

/// Standard API response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub success: bool,
    pub error: bool,
    pub message: Cow<'static, str>,
    pub status: u16,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_status(StatusCode::OK, data, message)
    }

    pub fn created(data: T, message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_status(StatusCode::CREATED, data, message)
    }

    /// A successful response with `data: null`.
    pub fn message(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            data: None,
            success: true,
            error: false,
            message: message.into(),
            status: StatusCode::OK.as_u16(),
        }
    }

    fn with_status(status: StatusCode, data: T, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            data: Some(data),
            success: true,
            error: false,
            message: message.into(),
            status: status.as_u16(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

/// JSON body extractor whose rejections use the error envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = GatehouseError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(rejection)),
        }
    }
}

fn json_rejection(rejection: JsonRejection) -> GatehouseError {
    GatehouseError::validation(rejection.body_text())
        .with_internal_message(format!("Rejected JSON body: {}", rejection))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let body = serde_json::to_value(ApiResponse::created(
            serde_json::json!({"role_id": "r1"}),
            "Role created successfully",
        ))
        .unwrap();

        assert_eq!(body["data"]["role_id"], "r1");
        assert_eq!(body["success"], true);
        assert_eq!(body["error"], false);
        assert_eq!(body["message"], "Role created successfully");
        assert_eq!(body["status"], 201);
    }
}
