//! Postgres store tests against a live database.
//!
//! Tests cover:
//! - Reconciliation convergence and idempotence on real tables
//! - Cascading removal of retired actions
//! - One superuser role per organization and DuplicateRecord mapping
//! - Cross-organization grants rejected by the composite foreign key
//! - All-or-nothing organization provisioning
//! - Superuser provisioning racing reconciliation under the advisory lock
//!
//! Run with `cargo test -p gatehouse-core --features pg-tests --test postgres_tests`
//! and `GATEHOUSE_TEST_DATABASE_URL` (or `DATABASE_URL`) pointing at a
//! database the tests may create schemas in. Every test migrates its own
//! schema, so tests run in parallel without sharing rows.
#![cfg(feature = "pg-tests")]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gatehouse_core::db::Database;
use gatehouse_core::error::{ErrorCode, GatehouseError};
use gatehouse_core::rbac::{
    ActionCatalog, ActionId, ActionReconciler, NewRole, OrgId, Organization, RbacStore,
    RoleAction, SuperuserProvisioner, UserId,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::Connection;

static SCHEMA_SEQ: AtomicUsize = AtomicUsize::new(0);

fn base_url() -> Option<String> {
    match std::env::var("GATEHOUSE_TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("skipping pg-tests: GATEHOUSE_TEST_DATABASE_URL not set");
            None
        }
    }
}

fn url_with_schema(base_url: &str, schema: &str) -> String {
    let encoded = format!("-csearch_path%3D{}", schema);
    if base_url.contains('?') {
        format!("{base_url}&options={encoded}")
    } else {
        format!("{base_url}?options={encoded}")
    }
}

/// A migrated store in a fresh schema, or `None` when no database is configured.
async fn fresh_db() -> Option<Arc<Database>> {
    let base = base_url()?;
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let schema = format!(
        "gatehouse_test_{}_{}_{}",
        std::process::id(),
        nanos,
        SCHEMA_SEQ.fetch_add(1, Ordering::SeqCst)
    );

    let mut conn = sqlx::PgConnection::connect(&base).await.unwrap();
    sqlx::query(&format!(r#"CREATE SCHEMA "{}""#, schema))
        .execute(&mut conn)
        .await
        .unwrap();
    conn.close().await.unwrap();

    let pool = PgPoolOptions::new()
        .max_connections(8)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&url_with_schema(&base, &schema))
        .await
        .unwrap();
    let db = Database::from_pool(pool);
    db.migrate().await.unwrap();
    Some(Arc::new(db))
}

async fn insert_user(db: &Database, user_id: &str) -> UserId {
    sqlx::query("INSERT INTO users (user_id, email, email_verified) VALUES ($1, $2, TRUE)")
        .bind(user_id)
        .bind(format!("{}@example.com", user_id))
        .execute(db.pool())
        .await
        .unwrap();
    UserId::new(user_id)
}

async fn insert_org(db: &Database, org_id: &str) -> OrgId {
    db.create_org(&Organization::new(org_id, org_id.to_uppercase()))
        .await
        .unwrap();
    OrgId::new(org_id)
}

fn id_set(ids: &[ActionId]) -> BTreeSet<String> {
    ids.iter().map(|id| id.as_str().to_string()).collect()
}

fn catalog(ids: &[&str]) -> ActionCatalog {
    ActionCatalog::from_ids(ids.iter().copied())
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_reconcile_converges_and_is_idempotent() {
    let Some(db) = fresh_db().await else { return };
    let acme = insert_org(&db, "acme").await;
    let role = db.insert_superuser_role(&acme).await.unwrap().role;

    let reconciler = ActionReconciler::new(ActionCatalog::builtin(), db.clone());
    let first = reconciler.reconcile().await.unwrap();
    assert_eq!(first.actions_added.len(), ActionCatalog::builtin().len());
    assert_eq!(first.grants_added, ActionCatalog::builtin().len() as u64);

    let second = reconciler.reconcile().await.unwrap();
    assert!(second.is_noop());

    let stored = id_set(&db.list_actions().await.unwrap());
    let held = id_set(&db.list_role_actions(&role.role_id).await.unwrap());
    assert_eq!(stored.len(), ActionCatalog::builtin().len());
    assert_eq!(held, stored);
}

#[tokio::test]
async fn test_retired_action_cascades_to_grants() {
    let Some(db) = fresh_db().await else { return };
    let acme = insert_org(&db, "acme").await;
    let globex = insert_org(&db, "globex").await;
    db.insert_superuser_role(&acme).await.unwrap();
    db.insert_superuser_role(&globex).await.unwrap();

    ActionReconciler::new(catalog(&["listSites", "legacyAction"]), db.clone())
        .reconcile()
        .await
        .unwrap();

    let member = db
        .insert_role(NewRole::new(acme.clone(), "Member"), &[ActionId::new("legacyAction")])
        .await
        .unwrap();

    let report = ActionReconciler::new(catalog(&["listSites"]), db.clone())
        .reconcile()
        .await
        .unwrap();

    assert_eq!(report.actions_removed, vec![ActionId::new("legacyAction")]);
    assert_eq!(report.grants_removed, 3);
    assert!(!db.action_exists(&ActionId::new("legacyAction")).await.unwrap());
    assert!(db.list_role_actions(&member.role_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_add_action_skips_existing_rows() {
    let Some(db) = fresh_db().await else { return };
    let acme = insert_org(&db, "acme").await;
    db.insert_superuser_role(&acme).await.unwrap();

    let action = ActionId::new("createSite");
    assert_eq!(db.add_action(&action).await.unwrap(), Some(1));
    assert_eq!(db.add_action(&action).await.unwrap(), None);
}

// ============================================================================
// Superuser uniqueness and grant scoping
// ============================================================================

#[tokio::test]
async fn test_second_superuser_role_is_duplicate() {
    let Some(db) = fresh_db().await else { return };
    let acme = insert_org(&db, "acme").await;
    db.insert_superuser_role(&acme).await.unwrap();

    let err = db.insert_superuser_role(&acme).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateRecord);
    assert_eq!(db.list_superuser_roles().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_superuser_index_violation_maps_to_duplicate() {
    let Some(db) = fresh_db().await else { return };
    let acme = insert_org(&db, "acme").await;
    db.insert_superuser_role(&acme).await.unwrap();

    // Bypass the store's own check so the partial unique index fires.
    let err = sqlx::query(
        "INSERT INTO roles (role_id, org_id, name, is_superuser_role) VALUES ('r2', 'acme', 'Superuser', TRUE)",
    )
    .execute(db.pool())
    .await
    .unwrap_err();

    assert_eq!(GatehouseError::from(err).code(), ErrorCode::DuplicateRecord);
}

#[tokio::test]
async fn test_cross_org_grant_is_rejected() {
    let Some(db) = fresh_db().await else { return };
    let acme = insert_org(&db, "acme").await;
    let globex = insert_org(&db, "globex").await;
    db.add_action(&ActionId::new("listSites")).await.unwrap();
    let role = db
        .insert_role(NewRole::new(acme, "Member"), &[])
        .await
        .unwrap();

    let cross_org = RoleAction::new(role.role_id.clone(), ActionId::new("listSites"), globex);
    let err = db.add_role_action(&cross_org).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::RecordNotFound);

    let grant = RoleAction::for_role(&role, ActionId::new("listSites"));
    assert!(db.add_role_action(&grant).await.unwrap());
    assert!(!db.add_role_action(&grant).await.unwrap());
}

#[tokio::test]
async fn test_insert_role_rolls_back_on_unknown_action() {
    let Some(db) = fresh_db().await else { return };
    let acme = insert_org(&db, "acme").await;

    let err = db
        .insert_role(NewRole::new(acme.clone(), "Member"), &[ActionId::new("noSuchAction")])
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::RecordNotFound);
    assert!(db.list_roles(&acme).await.unwrap().is_empty());
}

// ============================================================================
// Organization provisioning
// ============================================================================

#[tokio::test]
async fn test_create_org_with_superuser_commits_together() {
    let Some(db) = fresh_db().await else { return };
    let owner = insert_user(&db, "admin").await;
    db.add_action(&ActionId::new("listSites")).await.unwrap();

    let org = Organization::new("acme", "Acme");
    let provisioned = db.create_org_with_superuser(&org, &owner).await.unwrap();

    assert_eq!(provisioned.actions, vec![ActionId::new("listSites")]);
    assert!(db.get_org(&org.org_id).await.unwrap().is_some());
    assert_eq!(
        db.user_role_ids(&owner, &org.org_id).await.unwrap(),
        vec![provisioned.role.role_id]
    );

    let err = db.create_org_with_superuser(&org, &owner).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateRecord);
}

#[tokio::test]
async fn test_failed_membership_rolls_back_org() {
    let Some(db) = fresh_db().await else { return };
    let org = Organization::new("acme", "Acme");

    // No such user: the membership insert fails after the org and role rows.
    let err = db
        .create_org_with_superuser(&org, &UserId::new("ghost"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::RecordNotFound);
    assert!(db.get_org(&org.org_id).await.unwrap().is_none());
    assert!(db.list_superuser_roles().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_provisioning_during_reconcile_grants_every_action() {
    let Some(db) = fresh_db().await else { return };
    let owner = insert_user(&db, "admin").await;
    db.add_action(&ActionId::new("listSites")).await.unwrap();

    let reconcile = {
        let reconciler = ActionReconciler::new(ActionCatalog::builtin(), db.clone());
        tokio::spawn(async move { reconciler.reconcile().await.map(|_| ()) })
    };
    let provisioner = SuperuserProvisioner::new(db.clone());
    let provisions: Vec<_> = (0..8)
        .map(|i| {
            let provisioner = provisioner.clone();
            let owner = owner.clone();
            tokio::spawn(async move {
                let org = Organization::new(format!("org{}", i), format!("Org {}", i));
                provisioner.provision_org(&org, &owner).await
            })
        })
        .collect();

    reconcile.await.unwrap().unwrap();
    for handle in provisions {
        handle.await.unwrap().unwrap();
    }

    let stored = id_set(&db.list_actions().await.unwrap());
    let superusers = db.list_superuser_roles().await.unwrap();
    assert_eq!(superusers.len(), 8);
    for role in superusers {
        let held = id_set(&db.list_role_actions(&role.role_id).await.unwrap());
        assert_eq!(held, stored, "superuser role in {} is missing actions", role.org_id);
    }
}
