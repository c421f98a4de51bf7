//! Integration tests for action reconciliation and superuser provisioning.
//!
//! Tests cover:
//! - Catalog/store convergence and idempotence
//! - Grant fan-out to superuser roles in every organization
//! - Cascading removal of retired actions
//! - Failure surfacing and the run-once guard
//! - Superuser provisioning against the reconciled action set
//! - Provisioning interleaved with a reconciliation pass

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gatehouse_core::error::ErrorCode;
use gatehouse_core::rbac::{
    ActionCatalog, ActionId, ActionReconciler, InMemoryStore, NewRole, OrgId, Organization,
    ProvisionedRole, RbacStore, Role, RoleAction, RoleId, Session, SessionId,
    SuperuserProvisioner, User, UserId,
};

fn catalog(ids: &[&str]) -> ActionCatalog {
    ActionCatalog::from_ids(ids.iter().copied())
}

fn id_set(ids: &[ActionId]) -> BTreeSet<String> {
    ids.iter().map(|id| id.as_str().to_string()).collect()
}

async fn stored_actions(store: &InMemoryStore) -> BTreeSet<String> {
    id_set(&store.list_actions().await.unwrap())
}

// ============================================================================
// Convergence
// ============================================================================

#[tokio::test]
async fn test_store_matches_catalog_after_reconcile() {
    let store = Arc::new(InMemoryStore::new().with_actions(["listSites", "oldAction"]));
    let reconciler = ActionReconciler::new(
        catalog(&["listSites", "createSite", "deleteSite"]),
        store.clone(),
    );

    let report = reconciler.reconcile().await.unwrap();

    assert_eq!(
        stored_actions(&store).await,
        ["createSite", "deleteSite", "listSites"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    );
    assert_eq!(
        id_set(&report.actions_added),
        id_set(&[ActionId::new("createSite"), ActionId::new("deleteSite")])
    );
    assert_eq!(report.actions_removed, vec![ActionId::new("oldAction")]);
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let store = Arc::new(InMemoryStore::new().with_actions(["legacyAction"]));
    let org = OrgId::new("acme");
    store.insert_superuser_role(&org).await.unwrap();

    let reconciler = ActionReconciler::new(ActionCatalog::builtin(), store.clone());
    let first = reconciler.reconcile().await.unwrap();
    assert!(!first.is_noop());

    let actions_after_first = stored_actions(&store).await;
    let grants_after_first = store.grants();

    let second = reconciler.reconcile().await.unwrap();
    assert!(second.is_noop());
    assert_eq!(stored_actions(&store).await, actions_after_first);
    assert_eq!(store.grants(), grants_after_first);
}

#[tokio::test]
async fn test_builtin_catalog_is_fully_stored() {
    let store = Arc::new(InMemoryStore::new());
    let builtin = ActionCatalog::builtin();
    let expected: BTreeSet<String> = builtin.iter().map(|id| id.as_str().to_string()).collect();

    ActionReconciler::new(builtin, store.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(stored_actions(&store).await, expected);
}

// ============================================================================
// Grant fan-out
// ============================================================================

#[tokio::test]
async fn test_new_actions_granted_to_existing_superuser_role() {
    let store = Arc::new(InMemoryStore::new());
    let acme = OrgId::new("acme");
    let role = store.insert_superuser_role(&acme).await.unwrap().role;

    let report = ActionReconciler::new(catalog(&["createResource", "deleteResource"]), store.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.grants_added, 2);
    let granted = id_set(&store.list_role_actions(&role.role_id).await.unwrap());
    assert_eq!(
        granted,
        ["createResource", "deleteResource"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    );
    assert!(store.grants().iter().all(|g| g.org_id == acme));
}

#[tokio::test]
async fn test_new_actions_fan_out_across_organizations() {
    let store = Arc::new(InMemoryStore::new());
    let acme = store
        .insert_superuser_role(&OrgId::new("acme"))
        .await
        .unwrap()
        .role;
    let globex = store
        .insert_superuser_role(&OrgId::new("globex"))
        .await
        .unwrap()
        .role;
    let member = store
        .insert_role(NewRole::new(OrgId::new("acme"), "Member"), &[])
        .await
        .unwrap();

    let report = ActionReconciler::new(catalog(&["listSites"]), store.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.grants_added, 2);
    for role in [&acme, &globex] {
        let grants = store.list_role_actions(&role.role_id).await.unwrap();
        assert_eq!(grants, vec![ActionId::new("listSites")]);
    }
    assert!(store.list_role_actions(&member.role_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_existing_actions_are_not_regranted() {
    let store = Arc::new(InMemoryStore::new().with_actions(["listSites"]));
    let provisioned = store
        .insert_superuser_role(&OrgId::new("acme"))
        .await
        .unwrap();
    assert_eq!(provisioned.actions, vec![ActionId::new("listSites")]);

    let report = ActionReconciler::new(catalog(&["listSites", "createSite"]), store.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.actions_added, vec![ActionId::new("createSite")]);
    assert_eq!(report.grants_added, 1);
    assert_eq!(
        id_set(&store.list_role_actions(&provisioned.role.role_id).await.unwrap()),
        id_set(&[ActionId::new("createSite"), ActionId::new("listSites")])
    );
}

// ============================================================================
// Retirement
// ============================================================================

#[tokio::test]
async fn test_retired_action_removes_grants_in_every_org() {
    let store = Arc::new(InMemoryStore::new().with_actions(["createResource", "legacyAction"]));
    let legacy = ActionId::new("legacyAction");
    let grants = [
        ("r-acme-1", "acme"),
        ("r-acme-2", "acme"),
        ("r-globex-1", "globex"),
    ];
    for (role, org) in grants {
        store.insert_grant_unchecked(RoleAction::new(
            RoleId::new(role),
            legacy.clone(),
            OrgId::new(org),
        ));
    }
    store.insert_grant_unchecked(RoleAction::new(
        RoleId::new("r-acme-1"),
        ActionId::new("createResource"),
        OrgId::new("acme"),
    ));

    let report = ActionReconciler::new(catalog(&["createResource", "deleteResource"]), store.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.actions_removed, vec![legacy.clone()]);
    assert_eq!(report.grants_removed, 3);
    assert!(!store.action_exists(&legacy).await.unwrap());
    assert!(store.grants().iter().all(|g| g.action_id != legacy));
    assert_eq!(store.grants().len(), 1);
}

// ============================================================================
// Failures and the run-once guard
// ============================================================================

#[tokio::test]
async fn test_store_failure_is_reconciliation_error() {
    let store = Arc::new(InMemoryStore::new());
    store.fail_action_writes("createSite");

    let err = ActionReconciler::new(catalog(&["createSite"]), store.clone())
        .reconcile()
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::ReconciliationFailed);
    assert!(!store.action_exists(&ActionId::new("createSite")).await.unwrap());
}

#[tokio::test]
async fn test_run_once_reuses_first_report() {
    let store = Arc::new(InMemoryStore::new());
    let reconciler = ActionReconciler::new(catalog(&["listSites"]), store.clone());

    let first = reconciler.run_once().await.unwrap().clone();
    assert_eq!(first.actions_added, vec![ActionId::new("listSites")]);

    // Drift introduced after the first pass is left alone by run_once.
    store.remove_action(&ActionId::new("listSites")).await.unwrap();
    let second = reconciler.run_once().await.unwrap();
    assert_eq!(second.actions_added, first.actions_added);
    assert!(!store.action_exists(&ActionId::new("listSites")).await.unwrap());
}

#[tokio::test]
async fn test_run_once_retries_after_failure() {
    let store = Arc::new(InMemoryStore::new());
    store.fail_action_writes("createSite");
    let reconciler = ActionReconciler::new(catalog(&["createSite"]), store.clone());

    assert!(reconciler.run_once().await.is_err());

    store.restore_action_writes();
    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.actions_added, vec![ActionId::new("createSite")]);
    assert!(store.action_exists(&ActionId::new("createSite")).await.unwrap());
}

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn test_provisioned_role_holds_every_reconciled_action() {
    let store = Arc::new(InMemoryStore::new());
    let reconciler = ActionReconciler::new(ActionCatalog::builtin(), store.clone());
    reconciler.run_once().await.unwrap();

    let org = OrgId::new("acme");
    let role_id = SuperuserProvisioner::new(store.clone())
        .provision(&org)
        .await
        .unwrap();

    let grants: Vec<RoleAction> = store
        .grants()
        .into_iter()
        .filter(|g| g.role_id == role_id)
        .collect();
    assert_eq!(grants.len(), reconciler.catalog().len());
    assert!(grants.iter().all(|g| g.org_id == org));
}

#[tokio::test]
async fn test_second_provision_for_org_is_rejected() {
    let store = Arc::new(InMemoryStore::new().with_actions(["listSites"]));
    let provisioner = SuperuserProvisioner::new(store.clone());
    let org = OrgId::new("acme");

    provisioner.provision(&org).await.unwrap();
    let err = provisioner.provision(&org).await.unwrap_err();

    assert_eq!(err.code(), ErrorCode::DuplicateRecord);
    let superusers = store.list_superuser_roles().await.unwrap();
    assert_eq!(superusers.len(), 1);
}

// ============================================================================
// Provisioning racing reconciliation
// ============================================================================

/// Delegating store that provisions a superuser role for `org` after the
/// reconciler has planned its pass but before its first action insert.
struct ProvisionBeforeFirstAdd {
    inner: Arc<InMemoryStore>,
    org: OrgId,
    provisioned: AtomicBool,
}

#[async_trait::async_trait]
impl RbacStore for ProvisionBeforeFirstAdd {
    async fn list_actions(&self) -> gatehouse_core::Result<Vec<ActionId>> {
        self.inner.list_actions().await
    }
    async fn action_exists(&self, action_id: &ActionId) -> gatehouse_core::Result<bool> {
        self.inner.action_exists(action_id).await
    }
    async fn add_action(&self, action_id: &ActionId) -> gatehouse_core::Result<Option<u64>> {
        if !self.provisioned.swap(true, Ordering::SeqCst) {
            self.inner.insert_superuser_role(&self.org).await?;
        }
        self.inner.add_action(action_id).await
    }
    async fn remove_action(&self, action_id: &ActionId) -> gatehouse_core::Result<u64> {
        self.inner.remove_action(action_id).await
    }
    async fn list_superuser_roles(&self) -> gatehouse_core::Result<Vec<Role>> {
        self.inner.list_superuser_roles().await
    }
    async fn insert_role(
        &self,
        role: NewRole,
        actions: &[ActionId],
    ) -> gatehouse_core::Result<Role> {
        self.inner.insert_role(role, actions).await
    }
    async fn insert_superuser_role(
        &self,
        org_id: &OrgId,
    ) -> gatehouse_core::Result<ProvisionedRole> {
        self.inner.insert_superuser_role(org_id).await
    }
    async fn get_role(&self, role_id: &RoleId) -> gatehouse_core::Result<Option<Role>> {
        self.inner.get_role(role_id).await
    }
    async fn list_roles(&self, org_id: &OrgId) -> gatehouse_core::Result<Vec<Role>> {
        self.inner.list_roles(org_id).await
    }
    async fn delete_role(&self, role_id: &RoleId) -> gatehouse_core::Result<bool> {
        self.inner.delete_role(role_id).await
    }
    async fn list_role_actions(&self, role_id: &RoleId) -> gatehouse_core::Result<Vec<ActionId>> {
        self.inner.list_role_actions(role_id).await
    }
    async fn add_role_action(&self, grant: &RoleAction) -> gatehouse_core::Result<bool> {
        self.inner.add_role_action(grant).await
    }
    async fn remove_role_action(
        &self,
        role_id: &RoleId,
        action_id: &ActionId,
    ) -> gatehouse_core::Result<bool> {
        self.inner.remove_role_action(role_id, action_id).await
    }
    async fn has_grant(
        &self,
        role_ids: &[RoleId],
        action_id: &ActionId,
        org_id: &OrgId,
    ) -> gatehouse_core::Result<bool> {
        self.inner.has_grant(role_ids, action_id, org_id).await
    }
    async fn create_org(&self, org: &Organization) -> gatehouse_core::Result<()> {
        self.inner.create_org(org).await
    }
    async fn create_org_with_superuser(
        &self,
        org: &Organization,
        owner: &UserId,
    ) -> gatehouse_core::Result<ProvisionedRole> {
        self.inner.create_org_with_superuser(org, owner).await
    }
    async fn get_org(&self, org_id: &OrgId) -> gatehouse_core::Result<Option<Organization>> {
        self.inner.get_org(org_id).await
    }
    async fn get_user(&self, user_id: &UserId) -> gatehouse_core::Result<Option<User>> {
        self.inner.get_user(user_id).await
    }
    async fn get_session(&self, session_id: &SessionId) -> gatehouse_core::Result<Option<Session>> {
        self.inner.get_session(session_id).await
    }
    async fn user_role_ids(
        &self,
        user_id: &UserId,
        org_id: &OrgId,
    ) -> gatehouse_core::Result<Vec<RoleId>> {
        self.inner.user_role_ids(user_id, org_id).await
    }
    async fn assign_user_role(
        &self,
        user_id: &UserId,
        role_id: &RoleId,
        org_id: &OrgId,
    ) -> gatehouse_core::Result<()> {
        self.inner.assign_user_role(user_id, role_id, org_id).await
    }
}

#[tokio::test]
async fn test_role_provisioned_mid_pass_receives_new_actions() {
    let inner = Arc::new(InMemoryStore::new().with_actions(["listSites"]));
    let store = Arc::new(ProvisionBeforeFirstAdd {
        inner: inner.clone(),
        org: OrgId::new("acme"),
        provisioned: AtomicBool::new(false),
    });
    let reconciler = ActionReconciler::new(catalog(&["listSites", "createSite"]), store);

    let report = reconciler.reconcile().await.unwrap();
    assert_eq!(report.grants_added, 1);

    let superusers = inner.list_superuser_roles().await.unwrap();
    assert_eq!(superusers.len(), 1);
    let held = id_set(&inner.list_role_actions(&superusers[0].role_id).await.unwrap());
    assert_eq!(held, stored_actions(&inner).await);

    // Nothing left for a later pass to repair.
    let later = ActionReconciler::new(catalog(&["listSites", "createSite"]), inner.clone())
        .reconcile()
        .await
        .unwrap();
    assert!(later.is_noop());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_provisioning_and_reconcile_keep_superusers_complete() {
    let store = Arc::new(InMemoryStore::new().with_actions(["listSites"]));
    let reconciler = Arc::new(ActionReconciler::new(ActionCatalog::builtin(), store.clone()));
    let provisioner = SuperuserProvisioner::new(store.clone());

    let reconcile = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.reconcile().await.map(|_| ()) })
    };
    let provisions: Vec<_> = (0..16)
        .map(|i| {
            let provisioner = provisioner.clone();
            tokio::spawn(async move { provisioner.provision(&OrgId::new(format!("org{}", i))).await })
        })
        .collect();

    reconcile.await.unwrap().unwrap();
    for handle in provisions {
        handle.await.unwrap().unwrap();
    }

    let stored = stored_actions(&store).await;
    let superusers = store.list_superuser_roles().await.unwrap();
    assert_eq!(superusers.len(), 16);
    for role in superusers {
        let held = id_set(&store.list_role_actions(&role.role_id).await.unwrap());
        assert_eq!(held, stored, "superuser role in {} is missing actions", role.org_id);
    }
}
