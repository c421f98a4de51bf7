//! RBAC data models: identifiers, roles, grants, organizations, users and sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════════

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Stable action identifier, e.g. `createResource`.
    ActionId
);
string_id!(
    /// Role identifier, generated on insert.
    RoleId
);
string_id!(
    /// Organization identifier (the owning scope of roles and grants).
    OrgId
);
string_id!(
    /// User identifier, owned by the authentication collaborator.
    UserId
);
string_id!(
    /// Session identifier: hex SHA-256 of the session token.
    SessionId
);

impl RoleId {
    /// Generate a fresh role identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Roles and grants
// ═══════════════════════════════════════════════════════════════════════════════

pub const SUPERUSER_ROLE_NAME: &str = "Superuser";
pub const SUPERUSER_ROLE_DESCRIPTION: &str = "Superuser role with all actions";

/// A role scoped to one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role_id: RoleId,
    pub org_id: OrgId,
    pub name: String,
    pub description: Option<String>,
    pub is_superuser_role: bool,
}

/// Insert payload for a role. The store assigns the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub org_id: OrgId,
    pub name: String,
    pub description: Option<String>,
    pub is_superuser_role: bool,
}

impl NewRole {
    /// An ordinary administrator-defined role.
    pub fn new(org_id: OrgId, name: impl Into<String>) -> Self {
        Self {
            org_id,
            name: name.into(),
            description: None,
            is_superuser_role: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The organization's superuser role.
    pub fn superuser(org_id: OrgId) -> Self {
        Self {
            org_id,
            name: SUPERUSER_ROLE_NAME.to_string(),
            description: Some(SUPERUSER_ROLE_DESCRIPTION.to_string()),
            is_superuser_role: true,
        }
    }

    /// Materialize the role with the given identifier.
    pub fn into_role(self, role_id: RoleId) -> Role {
        Role {
            role_id,
            org_id: self.org_id,
            name: self.name,
            description: self.description,
            is_superuser_role: self.is_superuser_role,
        }
    }
}

/// A directed permission edge: `role` may perform `action` within `org`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleAction {
    pub role_id: RoleId,
    pub action_id: ActionId,
    pub org_id: OrgId,
}

impl RoleAction {
    pub fn new(role_id: RoleId, action_id: ActionId, org_id: OrgId) -> Self {
        Self {
            role_id,
            action_id,
            org_id,
        }
    }

    /// Grant `action` to `role` in the role's own organization.
    pub fn for_role(role: &Role, action_id: ActionId) -> Self {
        Self::new(role.role_id.clone(), action_id, role.org_id.clone())
    }
}

/// A superuser role together with the actions it was granted on creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedRole {
    pub role: Role,
    pub actions: Vec<ActionId>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Organizations, users and sessions
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub org_id: OrgId,
    pub name: String,
}

impl Organization {
    pub fn new(org_id: impl Into<OrgId>, name: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            name: name.into(),
        }
    }
}

/// A user as seen by the access checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: UserId,
    pub email: String,
    pub email_verified: bool,
}

impl User {
    pub fn new(user_id: impl Into<UserId>, email: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.into(),
            email_verified: false,
        }
    }

    pub fn verified(mut self) -> Self {
        self.email_verified = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}
