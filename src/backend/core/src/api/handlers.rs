//! API request handlers.
//!
//! Handlers return `Result<impl IntoResponse, GatehouseError>`; access checks
//! have already run in the route's `AccessLayer` by the time they execute.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{error, info};

use super::{ApiJson, ApiResponse, AppState};
use crate::error::{ErrorCode, ErrorDetails, GatehouseError};
use crate::rbac::{
    ActionId, Identity, NewRole, OrgId, Organization, Role, RoleAction, RoleId,
};
use crate::telemetry::RbacMetrics;

const MAX_NAME_LEN: usize = 255;
const MAX_ORG_ID_LEN: usize = 32;

/// Lowercase alphanumeric segments joined by single hyphens.
fn is_valid_org_id(org_id: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").ok())
        .as_ref()
        .map_or(false, |pattern| pattern.is_match(org_id))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health and metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.database {
        None => None,
        Some(db) => Some(match db.check_connectivity().await {
            Ok(latency) => serde_json::json!({
                "status": "healthy",
                "latency_ms": latency.as_millis() as u64,
            }),
            Err(e) => {
                error!(error = %e, "Database health check failed");
                serde_json::json!({ "status": "unhealthy" })
            }
        }),
    };

    let healthy = database
        .as_ref()
        .map_or(true, |db| db["status"] == "healthy");
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "database": database,
        })),
    )
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

pub async fn not_found() -> GatehouseError {
    GatehouseError::new(ErrorCode::RecordNotFound, "Route not found")
}

// ═══════════════════════════════════════════════════════════════════════════════
// Actions
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
pub struct ListActionsResponse {
    pub actions: Vec<ActionId>,
}

pub async fn list_actions(
    State(state): State<AppState>,
    _identity: Identity,
) -> Result<impl IntoResponse, GatehouseError> {
    let actions = state.store.list_actions().await?;
    Ok(ApiResponse::ok(
        ListActionsResponse { actions },
        "Actions retrieved successfully",
    ))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Organizations
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct CreateOrgRequest {
    pub org_id: String,
    pub name: String,
}

impl CreateOrgRequest {
    fn validate(&self) -> Result<(), GatehouseError> {
        let mut details = ErrorDetails::new();

        if self.org_id.is_empty() || self.org_id.len() > MAX_ORG_ID_LEN {
            details = details.with_field(
                "org_id",
                format!("must be between 1 and {} characters", MAX_ORG_ID_LEN),
            );
        } else if !is_valid_org_id(&self.org_id) {
            details = details.with_field(
                "org_id",
                "may only contain lowercase letters, digits and single hyphens",
            );
        }
        validate_name(&self.name, &mut details);

        reject_invalid(details)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateOrgResponse {
    pub org_id: OrgId,
    pub name: String,
    pub superuser_role_id: RoleId,
}

/// Create an organization, provision its superuser role and make the caller
/// a member of it, in one atomic store write.
pub async fn create_org(
    State(state): State<AppState>,
    identity: Identity,
    ApiJson(req): ApiJson<CreateOrgRequest>,
) -> Result<impl IntoResponse, GatehouseError> {
    req.validate()?;

    let org = Organization::new(req.org_id, req.name.trim());
    let role_id = state
        .provisioner
        .provision_org(&org, &identity.user.user_id)
        .await?
        .role
        .role_id;

    info!(
        org_id = %org.org_id,
        user_id = %identity.user.user_id,
        role_id = %role_id,
        "Organization created"
    );

    Ok(ApiResponse::created(
        CreateOrgResponse {
            org_id: org.org_id,
            name: org.name,
            superuser_role_id: role_id,
        },
        "Organization created successfully",
    ))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roles
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
pub struct ListRolesResponse {
    pub roles: Vec<Role>,
}

pub async fn list_roles(
    State(state): State<AppState>,
    Path(org_id): Path<OrgId>,
) -> Result<impl IntoResponse, GatehouseError> {
    let roles = state.store.list_roles(&org_id).await?;
    Ok(ApiResponse::ok(
        ListRolesResponse { roles },
        "Roles retrieved successfully",
    ))
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
}

pub async fn create_role(
    State(state): State<AppState>,
    Path(org_id): Path<OrgId>,
    ApiJson(req): ApiJson<CreateRoleRequest>,
) -> Result<impl IntoResponse, GatehouseError> {
    let mut details = ErrorDetails::new();
    validate_name(&req.name, &mut details);
    reject_invalid(details)?;

    if state.store.get_org(&org_id).await?.is_none() {
        return Err(GatehouseError::not_found("Organization", org_id.as_str()));
    }

    let mut role = NewRole::new(org_id, req.name.trim());
    if let Some(description) = req.description.filter(|d| !d.trim().is_empty()) {
        role = role.with_description(description);
    }

    let role = state.store.insert_role(role, &[]).await?;
    info!(org_id = %role.org_id, role_id = %role.role_id, "Role created");

    Ok(ApiResponse::created(role, "Role created successfully"))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Path((org_id, role_id)): Path<(OrgId, RoleId)>,
) -> Result<impl IntoResponse, GatehouseError> {
    let role = role_in_org(&state, &org_id, &role_id).await?;

    if role.is_superuser_role {
        return Err(GatehouseError::validation(
            "The superuser role cannot be deleted",
        ));
    }

    if !state.store.delete_role(&role_id).await? {
        return Err(GatehouseError::not_found("Role", role_id.as_str()));
    }
    info!(org_id = %org_id, role_id = %role_id, "Role deleted");

    Ok(ApiResponse::<()>::message("Role deleted successfully"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Role actions
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
pub struct RoleActionsResponse {
    pub role_id: RoleId,
    pub actions: Vec<ActionId>,
}

pub async fn list_role_actions(
    State(state): State<AppState>,
    Path((org_id, role_id)): Path<(OrgId, RoleId)>,
) -> Result<impl IntoResponse, GatehouseError> {
    role_in_org(&state, &org_id, &role_id).await?;
    let actions = state.store.list_role_actions(&role_id).await?;

    Ok(ApiResponse::ok(
        RoleActionsResponse { role_id, actions },
        "Role actions retrieved successfully",
    ))
}

#[derive(Debug, Deserialize)]
pub struct AddRoleActionRequest {
    pub action_id: String,
}

pub async fn add_role_action(
    State(state): State<AppState>,
    Path((org_id, role_id)): Path<(OrgId, RoleId)>,
    ApiJson(req): ApiJson<AddRoleActionRequest>,
) -> Result<impl IntoResponse, GatehouseError> {
    if req.action_id.trim().is_empty() {
        return Err(GatehouseError::invalid_field("action_id", "must not be empty"));
    }

    let role = role_in_org(&state, &org_id, &role_id).await?;
    let action_id = ActionId::new(req.action_id);
    if !state.store.action_exists(&action_id).await? {
        return Err(GatehouseError::not_found("Action", action_id.as_str()));
    }

    let grant = RoleAction::for_role(&role, action_id);
    let added = state.store.add_role_action(&grant).await?;
    if added {
        RbacMetrics::record_grant_change(true);
        info!(
            org_id = %grant.org_id,
            role_id = %grant.role_id,
            action_id = %grant.action_id,
            "Action added to role"
        );
    }

    Ok(ApiResponse::ok(grant, "Action added to role successfully"))
}

pub async fn remove_role_action(
    State(state): State<AppState>,
    Path((org_id, role_id, action_id)): Path<(OrgId, RoleId, ActionId)>,
) -> Result<impl IntoResponse, GatehouseError> {
    role_in_org(&state, &org_id, &role_id).await?;

    if !state.store.remove_role_action(&role_id, &action_id).await? {
        return Err(GatehouseError::new(
            ErrorCode::RecordNotFound,
            format!(
                "Action with ID {} not found for role with ID {}",
                action_id, role_id
            ),
        ));
    }

    RbacMetrics::record_grant_change(false);
    info!(
        org_id = %org_id,
        role_id = %role_id,
        action_id = %action_id,
        "Action removed from role"
    );

    Ok(ApiResponse::<()>::message("Action removed from role successfully"))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════════════

/// Load a role, treating roles of other organizations as missing.
async fn role_in_org(
    state: &AppState,
    org_id: &OrgId,
    role_id: &RoleId,
) -> Result<Role, GatehouseError> {
    state
        .store
        .get_role(role_id)
        .await?
        .filter(|role| role.org_id == *org_id)
        .ok_or_else(|| GatehouseError::not_found("Role", role_id.as_str()))
}

fn validate_name(name: &str, details: &mut ErrorDetails) {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_NAME_LEN {
        *details = std::mem::take(details).with_field(
            "name",
            format!("must be between 1 and {} characters", MAX_NAME_LEN),
        );
    }
}

fn reject_invalid(details: ErrorDetails) -> Result<(), GatehouseError> {
    if details.is_empty() {
        return Ok(());
    }
    Err(GatehouseError::validation("Invalid request body").with_details(details))
}
