//! Persistence seam for actions, roles, grants, and the identities the access
//! checks consume.
//!
//! Implementations must make every multi-row operation documented as atomic
//! all-or-nothing. Action inserts and superuser role inserts must also be
//! serialized against each other, so an action is never present without a
//! grant to every superuser role.

use async_trait::async_trait;

use super::models::{
    ActionId, NewRole, OrgId, Organization, ProvisionedRole, Role, RoleAction, RoleId, Session,
    SessionId, User, UserId,
};
use crate::error::Result;

#[async_trait]
pub trait RbacStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Every persisted action identifier.
    async fn list_actions(&self) -> Result<Vec<ActionId>>;

    async fn action_exists(&self, action_id: &ActionId) -> Result<bool>;

    /// Insert an action and grant it to every superuser role across all
    /// organizations, atomically.
    ///
    /// Returns the number of grants written, or `None` when the action
    /// already existed.
    async fn add_action(&self, action_id: &ActionId) -> Result<Option<u64>>;

    /// Delete an action and every grant referencing it across all
    /// organizations, atomically. Returns the number of grants removed.
    async fn remove_action(&self, action_id: &ActionId) -> Result<u64>;

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    /// Superuser roles across every organization.
    async fn list_superuser_roles(&self) -> Result<Vec<Role>>;

    /// Insert an ordinary role and grant it `actions` in its organization,
    /// atomically. Superuser roles are rejected with a validation error.
    async fn insert_role(&self, role: NewRole, actions: &[ActionId]) -> Result<Role>;

    /// Insert `org_id`'s superuser role granted every stored action.
    ///
    /// The action set is read in the same atomic unit as the insert and is
    /// serialized with [`add_action`](Self::add_action). Fails with
    /// `DuplicateRecord` when the organization already has a superuser role.
    async fn insert_superuser_role(&self, org_id: &OrgId) -> Result<ProvisionedRole>;

    async fn get_role(&self, role_id: &RoleId) -> Result<Option<Role>>;

    async fn list_roles(&self, org_id: &OrgId) -> Result<Vec<Role>>;

    /// Delete a role with its grants and memberships. Returns `false` if absent.
    async fn delete_role(&self, role_id: &RoleId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────────

    async fn list_role_actions(&self, role_id: &RoleId) -> Result<Vec<ActionId>>;

    /// Returns `false` when the grant already existed.
    async fn add_role_action(&self, grant: &RoleAction) -> Result<bool>;

    /// Returns `false` when no grant was removed.
    async fn remove_role_action(&self, role_id: &RoleId, action_id: &ActionId) -> Result<bool>;

    /// Whether any of `role_ids` holds `action_id` within `org_id`.
    async fn has_grant(&self, role_ids: &[RoleId], action_id: &ActionId, org_id: &OrgId)
        -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Organizations and identities
    // ─────────────────────────────────────────────────────────────────────────

    /// Fails with `DuplicateRecord` when the organization exists.
    async fn create_org(&self, org: &Organization) -> Result<()>;

    /// Create an organization, its superuser role and `owner`'s membership in
    /// that role as one atomic unit. Nothing is written when any step fails.
    async fn create_org_with_superuser(
        &self,
        org: &Organization,
        owner: &UserId,
    ) -> Result<ProvisionedRole>;

    async fn get_org(&self, org_id: &OrgId) -> Result<Option<Organization>>;

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>>;

    /// Roles held by `user_id` within `org_id`.
    async fn user_role_ids(&self, user_id: &UserId, org_id: &OrgId) -> Result<Vec<RoleId>>;

    async fn assign_user_role(&self, user_id: &UserId, role_id: &RoleId, org_id: &OrgId)
        -> Result<()>;
}
