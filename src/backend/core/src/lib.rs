#![allow(clippy::result_large_err)]
//! # Gatehouse Core
//!
//! Administration backend for tunnels and resources, centred on role-based
//! access control.
//!
//! ## Architecture
//!
//! - **Action Catalog**: the compiled set of permission identifiers
//! - **Reconciler**: syncs stored actions with the catalog at startup
//! - **Superuser Provisioner**: creates each organization's all-actions role
//! - **Access Middleware**: per-route session, verification and grant checks
//! - **Store**: Postgres via sqlx, plus an in-memory implementation
//! - **Telemetry**: structured logging and Prometheus metrics

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod rbac;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, GatehouseError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{build_router, ApiResponse, AppState};
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, GatehouseError, Result};
    pub use crate::middleware::{AuthConfig, SessionVerifier, StoreSessionVerifier};
    pub use crate::rbac::{
        AccessDecision, AccessLayer, Action, ActionCatalog, ActionId, ActionReconciler,
        Identity, InMemoryStore, OrgId, PermissionChecker, RbacStore, Role, RoleId,
        SuperuserProvisioner,
    };
}
