//! In-process `RbacStore`.
//!
//! All state lives behind one `RwLock`, so every trait operation is atomic
//! with respect to every other. Used by tests and by local development
//! without a database.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};

use super::models::{
    ActionId, NewRole, OrgId, Organization, ProvisionedRole, Role, RoleAction, RoleId, Session,
    SessionId, User, UserId,
};
use super::store::RbacStore;
use crate::error::{GatehouseError, Result};

#[derive(Debug, Default)]
struct State {
    actions: BTreeSet<ActionId>,
    roles: Vec<Role>,
    grants: BTreeSet<RoleAction>,
    orgs: HashMap<OrgId, Organization>,
    users: HashMap<UserId, User>,
    sessions: HashMap<SessionId, Session>,
    memberships: BTreeSet<(UserId, RoleId, OrgId)>,
    failing_actions: HashSet<ActionId>,
}

impl State {
    fn role(&self, role_id: &RoleId) -> Option<&Role> {
        self.roles.iter().find(|r| &r.role_id == role_id)
    }

    fn check_grant(&self, grant: &RoleAction) -> Result<()> {
        if !self.actions.contains(&grant.action_id) {
            return Err(GatehouseError::not_found("Action", grant.action_id.as_str()));
        }
        match self.role(&grant.role_id) {
            Some(role) if role.org_id == grant.org_id => Ok(()),
            _ => Err(GatehouseError::not_found("Role", grant.role_id.as_str())),
        }
    }

    fn check_no_superuser(&self, org_id: &OrgId) -> Result<()> {
        if self
            .roles
            .iter()
            .any(|r| r.is_superuser_role && &r.org_id == org_id)
        {
            return Err(GatehouseError::duplicate(format!(
                "Organization {} already has a superuser role",
                org_id
            )));
        }
        Ok(())
    }

    /// Callers check `check_no_superuser` first.
    fn push_superuser_role(&mut self, org_id: &OrgId) -> ProvisionedRole {
        let role = NewRole::superuser(org_id.clone()).into_role(RoleId::generate());
        let actions: Vec<ActionId> = self.actions.iter().cloned().collect();
        for action_id in &actions {
            self.grants
                .insert(RoleAction::for_role(&role, action_id.clone()));
        }
        self.roles.push(role.clone());
        ProvisionedRole { role, actions }
    }

    fn check_writable(&self, action_id: &ActionId) -> Result<()> {
        if self.failing_actions.contains(action_id) {
            return Err(GatehouseError::internal(format!(
                "injected write failure for action {}",
                action_id
            )));
        }
        Ok(())
    }
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the action table directly, bypassing reconciliation.
    pub fn with_actions<I, T>(self, actions: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ActionId>,
    {
        self.state
            .write()
            .actions
            .extend(actions.into_iter().map(Into::into));
        self
    }

    pub fn insert_user(&self, user: User) {
        self.state.write().users.insert(user.user_id.clone(), user);
    }

    pub fn insert_session(&self, session: Session) {
        self.state
            .write()
            .sessions
            .insert(session.session_id.clone(), session);
    }

    /// Insert a grant without validating it.
    pub fn insert_grant_unchecked(&self, grant: RoleAction) {
        self.state.write().grants.insert(grant);
    }

    /// Snapshot of every grant, ordered.
    pub fn grants(&self) -> Vec<RoleAction> {
        self.state.read().grants.iter().cloned().collect()
    }

    /// Snapshot of every role.
    pub fn roles(&self) -> Vec<Role> {
        self.state.read().roles.clone()
    }

    /// Make every write touching `action_id` fail, for exercising error paths.
    pub fn fail_action_writes(&self, action_id: impl Into<ActionId>) {
        self.state.write().failing_actions.insert(action_id.into());
    }

    pub fn restore_action_writes(&self) {
        self.state.write().failing_actions.clear();
    }
}

#[async_trait]
impl RbacStore for InMemoryStore {
    async fn list_actions(&self) -> Result<Vec<ActionId>> {
        Ok(self.state.read().actions.iter().cloned().collect())
    }

    async fn action_exists(&self, action_id: &ActionId) -> Result<bool> {
        Ok(self.state.read().actions.contains(action_id))
    }

    async fn add_action(&self, action_id: &ActionId) -> Result<Option<u64>> {
        let mut state = self.state.write();
        state.check_writable(action_id)?;

        if !state.actions.insert(action_id.clone()) {
            return Ok(None);
        }
        let grants: Vec<RoleAction> = state
            .roles
            .iter()
            .filter(|r| r.is_superuser_role)
            .map(|r| RoleAction::for_role(r, action_id.clone()))
            .collect();
        let granted = grants.len() as u64;
        state.grants.extend(grants);
        Ok(Some(granted))
    }

    async fn remove_action(&self, action_id: &ActionId) -> Result<u64> {
        let mut state = self.state.write();
        state.check_writable(action_id)?;

        state.actions.remove(action_id);
        let before = state.grants.len();
        state.grants.retain(|g| &g.action_id != action_id);
        Ok((before - state.grants.len()) as u64)
    }

    async fn list_superuser_roles(&self) -> Result<Vec<Role>> {
        Ok(self
            .state
            .read()
            .roles
            .iter()
            .filter(|r| r.is_superuser_role)
            .cloned()
            .collect())
    }

    async fn insert_role(&self, role: NewRole, actions: &[ActionId]) -> Result<Role> {
        if role.is_superuser_role {
            return Err(GatehouseError::validation(
                "Superuser roles are created through insert_superuser_role",
            ));
        }

        let mut state = self.state.write();
        if let Some(missing) = actions.iter().find(|a| !state.actions.contains(*a)) {
            return Err(GatehouseError::not_found("Action", missing.as_str()));
        }

        let role = role.into_role(RoleId::generate());
        for action_id in actions {
            state
                .grants
                .insert(RoleAction::for_role(&role, action_id.clone()));
        }
        state.roles.push(role.clone());
        Ok(role)
    }

    async fn insert_superuser_role(&self, org_id: &OrgId) -> Result<ProvisionedRole> {
        let mut state = self.state.write();
        state.check_no_superuser(org_id)?;
        Ok(state.push_superuser_role(org_id))
    }

    async fn get_role(&self, role_id: &RoleId) -> Result<Option<Role>> {
        Ok(self.state.read().role(role_id).cloned())
    }

    async fn list_roles(&self, org_id: &OrgId) -> Result<Vec<Role>> {
        Ok(self
            .state
            .read()
            .roles
            .iter()
            .filter(|r| &r.org_id == org_id)
            .cloned()
            .collect())
    }

    async fn delete_role(&self, role_id: &RoleId) -> Result<bool> {
        let mut state = self.state.write();
        let before = state.roles.len();
        state.roles.retain(|r| &r.role_id != role_id);
        if state.roles.len() == before {
            return Ok(false);
        }
        state.grants.retain(|g| &g.role_id != role_id);
        state.memberships.retain(|(_, r, _)| r != role_id);
        Ok(true)
    }

    async fn list_role_actions(&self, role_id: &RoleId) -> Result<Vec<ActionId>> {
        Ok(self
            .state
            .read()
            .grants
            .iter()
            .filter(|g| &g.role_id == role_id)
            .map(|g| g.action_id.clone())
            .collect())
    }

    async fn add_role_action(&self, grant: &RoleAction) -> Result<bool> {
        let mut state = self.state.write();
        state.check_grant(grant)?;
        Ok(state.grants.insert(grant.clone()))
    }

    async fn remove_role_action(&self, role_id: &RoleId, action_id: &ActionId) -> Result<bool> {
        let mut state = self.state.write();
        let before = state.grants.len();
        state
            .grants
            .retain(|g| !(&g.role_id == role_id && &g.action_id == action_id));
        Ok(state.grants.len() != before)
    }

    async fn has_grant(
        &self,
        role_ids: &[RoleId],
        action_id: &ActionId,
        org_id: &OrgId,
    ) -> Result<bool> {
        Ok(self.state.read().grants.iter().any(|g| {
            &g.action_id == action_id && &g.org_id == org_id && role_ids.contains(&g.role_id)
        }))
    }

    async fn create_org(&self, org: &Organization) -> Result<()> {
        let mut state = self.state.write();
        if state.orgs.contains_key(&org.org_id) {
            return Err(GatehouseError::duplicate(format!(
                "Organization {} already exists",
                org.org_id
            )));
        }
        state.orgs.insert(org.org_id.clone(), org.clone());
        Ok(())
    }

    async fn create_org_with_superuser(
        &self,
        org: &Organization,
        owner: &UserId,
    ) -> Result<ProvisionedRole> {
        let mut state = self.state.write();
        if state.orgs.contains_key(&org.org_id) {
            return Err(GatehouseError::duplicate(format!(
                "Organization {} already exists",
                org.org_id
            )));
        }
        state.check_no_superuser(&org.org_id)?;

        state.orgs.insert(org.org_id.clone(), org.clone());
        let provisioned = state.push_superuser_role(&org.org_id);
        state.memberships.insert((
            owner.clone(),
            provisioned.role.role_id.clone(),
            org.org_id.clone(),
        ));
        Ok(provisioned)
    }

    async fn get_org(&self, org_id: &OrgId) -> Result<Option<Organization>> {
        Ok(self.state.read().orgs.get(org_id).cloned())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.state.read().users.get(user_id).cloned())
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>> {
        Ok(self.state.read().sessions.get(session_id).cloned())
    }

    async fn user_role_ids(&self, user_id: &UserId, org_id: &OrgId) -> Result<Vec<RoleId>> {
        Ok(self
            .state
            .read()
            .memberships
            .iter()
            .filter(|(u, _, o)| u == user_id && o == org_id)
            .map(|(_, r, _)| r.clone())
            .collect())
    }

    async fn assign_user_role(
        &self,
        user_id: &UserId,
        role_id: &RoleId,
        org_id: &OrgId,
    ) -> Result<()> {
        let mut state = self.state.write();
        match state.role(role_id) {
            Some(role) if &role.org_id == org_id => {}
            _ => return Err(GatehouseError::not_found("Role", role_id.as_str())),
        }
        state
            .memberships
            .insert((user_id.clone(), role_id.clone(), org_id.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_add_action_grants_every_superuser_role() {
        let store = InMemoryStore::new();
        let acme = store.insert_superuser_role(&OrgId::new("acme")).await.unwrap();
        let member = store
            .insert_role(NewRole::new(OrgId::new("acme"), "Member"), &[])
            .await
            .unwrap();

        let action = ActionId::new("createSite");
        assert_eq!(store.add_action(&action).await.unwrap(), Some(1));
        assert_eq!(store.add_action(&action).await.unwrap(), None);

        assert_eq!(
            store.list_role_actions(&acme.role.role_id).await.unwrap(),
            vec![action]
        );
        assert!(store.list_role_actions(&member.role_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_superuser_role_rejected() {
        let store = InMemoryStore::new();
        let org = OrgId::new("acme");
        store.insert_superuser_role(&org).await.unwrap();

        let err = store.insert_superuser_role(&org).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateRecord);

        // A different organization is unaffected.
        store
            .insert_superuser_role(&OrgId::new("globex"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_role_refuses_superuser_payload() {
        let store = InMemoryStore::new().with_actions(["listSites"]);
        let err = store
            .insert_role(NewRole::superuser(OrgId::new("acme")), &[])
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(store.roles().is_empty());
    }

    #[tokio::test]
    async fn test_create_org_with_superuser_writes_all_or_nothing() {
        let store = InMemoryStore::new().with_actions(["listSites"]);
        let owner = UserId::new("u1");

        // A stray superuser role blocks provisioning for "acme".
        store.insert_superuser_role(&OrgId::new("acme")).await.unwrap();
        let err = store
            .create_org_with_superuser(&Organization::new("acme", "Acme"), &owner)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DuplicateRecord);
        assert!(store.get_org(&OrgId::new("acme")).await.unwrap().is_none());

        let globex = OrgId::new("globex");
        let provisioned = store
            .create_org_with_superuser(&Organization::new(globex.clone(), "Globex"), &owner)
            .await
            .unwrap();
        assert_eq!(provisioned.actions, vec![ActionId::new("listSites")]);
        assert!(store.get_org(&globex).await.unwrap().is_some());
        assert_eq!(
            store.user_role_ids(&owner, &globex).await.unwrap(),
            vec![provisioned.role.role_id]
        );
    }

    #[tokio::test]
    async fn test_delete_role_cascades() {
        let store = InMemoryStore::new().with_actions(["listSites"]);
        let org = OrgId::new("acme");
        let role = store
            .insert_role(NewRole::new(org.clone(), "Member"), &[ActionId::new("listSites")])
            .await
            .unwrap();
        let user = UserId::new("u1");
        store.assign_user_role(&user, &role.role_id, &org).await.unwrap();

        assert!(store.delete_role(&role.role_id).await.unwrap());
        assert!(store.grants().is_empty());
        assert!(store.user_role_ids(&user, &org).await.unwrap().is_empty());
        assert!(!store.delete_role(&role.role_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_grant_requires_same_org() {
        let store = InMemoryStore::new().with_actions(["listSites"]);
        let role = store
            .insert_role(NewRole::new(OrgId::new("acme"), "Member"), &[])
            .await
            .unwrap();

        let cross_org = RoleAction::new(
            role.role_id.clone(),
            ActionId::new("listSites"),
            OrgId::new("globex"),
        );
        assert!(store.add_role_action(&cross_org).await.is_err());

        let grant = RoleAction::for_role(&role, ActionId::new("listSites"));
        assert!(store.add_role_action(&grant).await.unwrap());
        assert!(!store.add_role_action(&grant).await.unwrap());
    }
}
