//! Database layer for Gatehouse.
//!
//! PostgreSQL storage for actions, roles and grants via sqlx. Every
//! multi-row `RbacStore` operation runs in one transaction. Action inserts,
//! action removals and superuser role inserts take one transaction-scoped
//! advisory lock, so a superuser role and a new action always meet: either
//! the role is inserted first and the action insert grants it, or the
//! action commits first and the role copies it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::{GatehouseError, Result};
use crate::rbac::models::{
    ActionId, NewRole, OrgId, Organization, ProvisionedRole, Role, RoleAction, RoleId, Session,
    SessionId, User, UserId,
};
use crate::rbac::store::RbacStore;

/// Key for `pg_advisory_xact_lock` serializing action writes and superuser role inserts.
const ACTIONS_LOCK_KEY: i64 = 0x6761_7465_6163_7473;

/// Database connection and operations.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Database pool established"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip a trivial query; returns its latency.
    pub async fn check_connectivity(&self) -> Result<Duration> {
        let start = Instant::now();
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        let latency = start.elapsed();
        if latency > Duration::from_millis(100) {
            warn!(
                latency_ms = latency.as_millis() as u64,
                "Database connectivity check latency is high"
            );
        }
        Ok(latency)
    }

    async fn lock_actions(tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(ACTIONS_LOCK_KEY)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_role_row(tx: &mut Transaction<'_, Postgres>, role: &Role) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO roles (role_id, org_id, name, description, is_superuser_role)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(role.role_id.as_str())
        .bind(role.org_id.as_str())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_superuser_role)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Insert `org_id`'s superuser role and grant it the action table as
    /// seen under the actions lock.
    async fn insert_superuser(
        tx: &mut Transaction<'_, Postgres>,
        org_id: &OrgId,
    ) -> Result<ProvisionedRole> {
        Self::lock_actions(tx).await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM roles WHERE org_id = $1 AND is_superuser_role)",
        )
        .bind(org_id.as_str())
        .fetch_one(&mut **tx)
        .await?;
        if exists {
            return Err(GatehouseError::duplicate(format!(
                "Organization {} already has a superuser role",
                org_id
            )));
        }

        let role = NewRole::superuser(org_id.clone()).into_role(RoleId::generate());
        Self::insert_role_row(tx, &role).await?;

        let mut actions: Vec<String> = sqlx::query_scalar(
            r#"
            INSERT INTO role_actions (role_id, action_id, org_id)
            SELECT $1, action_id, $2 FROM actions
            RETURNING action_id
            "#,
        )
        .bind(role.role_id.as_str())
        .bind(role.org_id.as_str())
        .fetch_all(&mut **tx)
        .await?;
        actions.sort();

        Ok(ProvisionedRole {
            role,
            actions: actions.into_iter().map(ActionId).collect(),
        })
    }

    async fn insert_grants(tx: &mut Transaction<'_, Postgres>, grants: &[RoleAction]) -> Result<u64> {
        if grants.is_empty() {
            return Ok(0);
        }

        let (role_ids, (action_ids, org_ids)): (Vec<String>, (Vec<String>, Vec<String>)) = grants
            .iter()
            .map(|g| (g.role_id.0.clone(), (g.action_id.0.clone(), g.org_id.0.clone())))
            .unzip();

        let result = sqlx::query(
            r#"
            INSERT INTO role_actions (role_id, action_id, org_id)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_ids)
        .bind(action_ids)
        .bind(org_ids)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RbacStore for Database {
    // ═══════════════════════════════════════════════════════════════════════════
    // Actions
    // ═══════════════════════════════════════════════════════════════════════════

    async fn list_actions(&self) -> Result<Vec<ActionId>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT action_id FROM actions ORDER BY action_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(ActionId).collect())
    }

    async fn action_exists(&self, action_id: &ActionId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM actions WHERE action_id = $1)")
                .bind(action_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn add_action(&self, action_id: &ActionId) -> Result<Option<u64>> {
        let mut tx = self.pool.begin().await?;
        Self::lock_actions(&mut tx).await?;

        let inserted = sqlx::query("INSERT INTO actions (action_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(action_id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;
        if !inserted {
            return Ok(None);
        }

        let granted = sqlx::query(
            r#"
            INSERT INTO role_actions (role_id, action_id, org_id)
            SELECT role_id, $1, org_id FROM roles WHERE is_superuser_role
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(action_id.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(Some(granted))
    }

    async fn remove_action(&self, action_id: &ActionId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        Self::lock_actions(&mut tx).await?;

        let grants = sqlx::query("DELETE FROM role_actions WHERE action_id = $1")
            .bind(action_id.as_str())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM actions WHERE action_id = $1")
            .bind(action_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(grants)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Roles
    // ═══════════════════════════════════════════════════════════════════════════

    async fn list_superuser_roles(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT role_id, org_id, name, description, is_superuser_role
            FROM roles
            WHERE is_superuser_role
            ORDER BY created_at, role_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn insert_role(&self, role: NewRole, actions: &[ActionId]) -> Result<Role> {
        if role.is_superuser_role {
            return Err(GatehouseError::validation(
                "Superuser roles are created through insert_superuser_role",
            ));
        }

        let role = role.into_role(RoleId::generate());
        let mut tx = self.pool.begin().await?;
        Self::insert_role_row(&mut tx, &role).await?;

        let grants: Vec<RoleAction> = actions
            .iter()
            .map(|action_id| RoleAction::for_role(&role, action_id.clone()))
            .collect();
        Self::insert_grants(&mut tx, &grants).await?;

        tx.commit().await?;
        Ok(role)
    }

    async fn insert_superuser_role(&self, org_id: &OrgId) -> Result<ProvisionedRole> {
        let mut tx = self.pool.begin().await?;
        let provisioned = Self::insert_superuser(&mut tx, org_id).await?;
        tx.commit().await?;
        Ok(provisioned)
    }

    async fn get_role(&self, role_id: &RoleId) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT role_id, org_id, name, description, is_superuser_role FROM roles WHERE role_id = $1",
        )
        .bind(role_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Role::from))
    }

    async fn list_roles(&self, org_id: &OrgId) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT role_id, org_id, name, description, is_superuser_role
            FROM roles
            WHERE org_id = $1
            ORDER BY created_at, role_id
            "#,
        )
        .bind(org_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn delete_role(&self, role_id: &RoleId) -> Result<bool> {
        // Grants and memberships cascade.
        let deleted = sqlx::query("DELETE FROM roles WHERE role_id = $1")
            .bind(role_id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Grants
    // ═══════════════════════════════════════════════════════════════════════════

    async fn list_role_actions(&self, role_id: &RoleId) -> Result<Vec<ActionId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT action_id FROM role_actions WHERE role_id = $1 ORDER BY action_id",
        )
        .bind(role_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(ActionId).collect())
    }

    async fn add_role_action(&self, grant: &RoleAction) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO role_actions (role_id, action_id, org_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(grant.role_id.as_str())
        .bind(grant.action_id.as_str())
        .bind(grant.org_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn remove_role_action(&self, role_id: &RoleId, action_id: &ActionId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM role_actions WHERE role_id = $1 AND action_id = $2")
            .bind(role_id.as_str())
            .bind(action_id.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    async fn has_grant(
        &self,
        role_ids: &[RoleId],
        action_id: &ActionId,
        org_id: &OrgId,
    ) -> Result<bool> {
        let role_ids: Vec<String> = role_ids.iter().map(|r| r.0.clone()).collect();
        let granted: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM role_actions
                WHERE role_id = ANY($1) AND action_id = $2 AND org_id = $3
            )
            "#,
        )
        .bind(role_ids)
        .bind(action_id.as_str())
        .bind(org_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(granted)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Organizations and identities
    // ═══════════════════════════════════════════════════════════════════════════

    async fn create_org(&self, org: &Organization) -> Result<()> {
        sqlx::query("INSERT INTO orgs (org_id, name) VALUES ($1, $2)")
            .bind(org.org_id.as_str())
            .bind(&org.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_org_with_superuser(
        &self,
        org: &Organization,
        owner: &UserId,
    ) -> Result<ProvisionedRole> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query(
            "INSERT INTO orgs (org_id, name) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(org.org_id.as_str())
        .bind(&org.name)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if created == 0 {
            return Err(GatehouseError::duplicate(format!(
                "Organization {} already exists",
                org.org_id
            )));
        }

        let provisioned = Self::insert_superuser(&mut tx, &org.org_id).await?;

        sqlx::query("INSERT INTO user_roles (user_id, role_id, org_id) VALUES ($1, $2, $3)")
            .bind(owner.as_str())
            .bind(provisioned.role.role_id.as_str())
            .bind(org.org_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(provisioned)
    }

    async fn get_org(&self, org_id: &OrgId) -> Result<Option<Organization>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT org_id, name FROM orgs WHERE org_id = $1")
                .bind(org_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(org_id, name)| Organization::new(org_id, name)))
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        let row: Option<(String, String, bool)> =
            sqlx::query_as("SELECT user_id, email, email_verified FROM users WHERE user_id = $1")
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(user_id, email, email_verified)| User {
            user_id: UserId(user_id),
            email,
            email_verified,
        }))
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<Option<Session>> {
        let row: Option<(String, String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT session_id, user_id, expires_at FROM sessions WHERE session_id = $1",
        )
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(session_id, user_id, expires_at)| Session {
            session_id: SessionId(session_id),
            user_id: UserId(user_id),
            expires_at,
        }))
    }

    async fn user_role_ids(&self, user_id: &UserId, org_id: &OrgId) -> Result<Vec<RoleId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT role_id FROM user_roles WHERE user_id = $1 AND org_id = $2 ORDER BY role_id",
        )
        .bind(user_id.as_str())
        .bind(org_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(RoleId).collect())
    }

    async fn assign_user_role(
        &self,
        user_id: &UserId,
        role_id: &RoleId,
        org_id: &OrgId,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id, org_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_id.as_str())
        .bind(role_id.as_str())
        .bind(org_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Row Types (for sqlx queries)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, sqlx::FromRow)]
struct RoleRow {
    role_id: String,
    org_id: String,
    name: String,
    description: Option<String>,
    is_superuser_role: bool,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Self {
            role_id: RoleId(row.role_id),
            org_id: OrgId(row.org_id),
            name: row.name,
            description: row.description,
            is_superuser_role: row.is_superuser_role,
        }
    }
}
