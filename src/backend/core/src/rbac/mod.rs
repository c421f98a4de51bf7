//! Role-Based Access Control (RBAC).
//!
//! This module provides:
//! - **Catalog**: the compiled set of actions a role can be granted
//! - **Store**: the persistence seam for actions, roles and grants, with an
//!   in-memory implementation
//! - **Reconciler**: brings the stored actions in line with the catalog at
//!   startup and grants new actions to every superuser role
//! - **Provisioner**: creates an organization's superuser role
//! - **Policy**: evaluates whether a request may perform an action
//! - **Middleware**: tower layer enforcing a policy per route
//!
//! # Usage
//!
//! ```rust,ignore
//! use gatehouse_core::rbac::{ActionCatalog, ActionReconciler, InMemoryStore};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let reconciler = ActionReconciler::new(ActionCatalog::builtin(), store.clone());
//! let report = reconciler.run_once().await?;
//! ```

pub mod catalog;
pub mod memory;
pub mod middleware;
pub mod models;
pub mod policy;
pub mod provision;
pub mod reconcile;
pub mod store;

pub use catalog::{Action, ActionCatalog, UnknownAction};
pub use memory::InMemoryStore;
pub use middleware::{AccessLayer, AccessService, Requirement};
pub use models::{
    ActionId, NewRole, OrgId, Organization, ProvisionedRole, Role, RoleAction, RoleId, Session,
    SessionId, User, UserId, SUPERUSER_ROLE_DESCRIPTION, SUPERUSER_ROLE_NAME,
};
pub use policy::{AccessDecision, Identity, PermissionChecker};
pub use provision::SuperuserProvisioner;
pub use reconcile::{ActionReconciler, ReconcilePlan, ReconcileReport};
pub use store::RbacStore;
