//! The action catalog: every capability the application knows about.
//!
//! Identifiers are stable across releases. Adding a variant makes the
//! reconciler insert the action at the next startup (and grant it to every
//! superuser role); removing one retires the action and its grants.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::models::ActionId;

macro_rules! actions {
    ($($variant:ident => $id:literal,)+) => {
        /// A capability that can be granted to a role.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Action {
            $($variant,)+
        }

        impl Action {
            /// Every action, in declaration order.
            pub const ALL: &'static [Action] = &[$(Action::$variant,)+];

            /// The stable identifier persisted in the action store.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Action::$variant => $id,)+
                }
            }
        }

        impl FromStr for Action {
            type Err = UnknownAction;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($id => Ok(Action::$variant),)+
                    other => Err(UnknownAction(other.to_string())),
                }
            }
        }
    };
}

actions! {
    CreateOrg => "createOrg",
    DeleteOrg => "deleteOrg",
    GetOrg => "getOrg",
    ListOrgs => "listOrgs",
    UpdateOrg => "updateOrg",

    CreateSite => "createSite",
    DeleteSite => "deleteSite",
    GetSite => "getSite",
    ListSites => "listSites",
    UpdateSite => "updateSite",

    CreateResource => "createResource",
    DeleteResource => "deleteResource",
    GetResource => "getResource",
    ListResources => "listResources",
    UpdateResource => "updateResource",

    CreateTarget => "createTarget",
    DeleteTarget => "deleteTarget",
    GetTarget => "getTarget",
    ListTargets => "listTargets",
    UpdateTarget => "updateTarget",

    CreateRole => "createRole",
    DeleteRole => "deleteRole",
    GetRole => "getRole",
    ListRoles => "listRoles",
    UpdateRole => "updateRole",

    InviteUser => "inviteUser",
    RemoveUser => "removeUser",
    ListUsers => "listUsers",
    GetOrgUser => "getOrgUser",
    AddUserRole => "addUserRole",

    ListSiteRoles => "listSiteRoles",
    ListResourceRoles => "listResourceRoles",
    ListResourceUsers => "listResourceUsers",
    SetResourceRoles => "setResourceRoles",
    SetResourceUsers => "setResourceUsers",

    AddRoleSite => "addRoleSite",
    RemoveRoleSite => "removeRoleSite",
    ListRoleSites => "listRoleSites",
    AddRoleResource => "addRoleResource",
    RemoveRoleResource => "removeRoleResource",
    ListRoleResources => "listRoleResources",
    AddRoleAction => "addRoleAction",
    RemoveRoleAction => "removeRoleAction",
    ListRoleActions => "listRoleActions",

    AddUserSite => "addUserSite",
    RemoveUserSite => "removeUserSite",
    AddUserAction => "addUserAction",
    RemoveUserAction => "removeUserAction",

    SetResourcePassword => "setResourcePassword",
    SetResourcePincode => "setResourcePincode",
    GenerateAccessToken => "generateAccessToken",
    DeleteAccessToken => "deleteAccessToken",
    ListAccessTokens => "listAccessTokens",
}

impl Action {
    pub fn id(&self) -> ActionId {
        ActionId::new(self.as_str())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Action> for ActionId {
    fn from(action: Action) -> Self {
        action.id()
    }
}

/// An identifier that is not part of the compiled catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown action: {0}")]
pub struct UnknownAction(pub String);

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable, ordered set of action identifiers.
///
/// Built once at process start and handed to the reconciler, so that
/// reconciliation can be exercised against arbitrary fixtures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCatalog {
    ids: Vec<ActionId>,
    index: HashSet<ActionId>,
}

impl ActionCatalog {
    /// The catalog compiled into this binary.
    pub fn builtin() -> Self {
        Self::from_ids(Action::ALL.iter().map(Action::id))
    }

    /// Build a catalog from arbitrary identifiers. Duplicates keep their first position.
    pub fn from_ids<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ActionId>,
    {
        let mut ordered = Vec::new();
        let mut index = HashSet::new();
        for id in ids {
            let id = id.into();
            if index.insert(id.clone()) {
                ordered.push(id);
            }
        }
        Self {
            ids: ordered,
            index,
        }
    }

    pub fn contains(&self, id: &ActionId) -> bool {
        self.index.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionId> {
        self.ids.iter()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_are_unique() {
        let unique: HashSet<&str> = Action::ALL.iter().map(|a| a.as_str()).collect();
        assert_eq!(unique.len(), Action::ALL.len());
    }

    #[test]
    fn test_identifier_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), *action);
        }
        assert_eq!(
            "legacyAction".parse::<Action>(),
            Err(UnknownAction("legacyAction".to_string()))
        );
    }

    #[test]
    fn test_builtin_catalog_matches_enum() {
        let catalog = ActionCatalog::builtin();
        assert_eq!(catalog.len(), Action::ALL.len());
        assert!(catalog.contains(&Action::RemoveRoleAction.id()));
        assert_eq!(catalog.iter().next(), Some(&ActionId::new("createOrg")));
    }

    #[test]
    fn test_from_ids_deduplicates_in_order() {
        let catalog = ActionCatalog::from_ids(["b", "a", "b", "c"]);
        let ids: Vec<&str> = catalog.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_empty_catalog() {
        let catalog = ActionCatalog::from_ids(Vec::<ActionId>::new());
        assert!(catalog.is_empty());
        assert!(!catalog.contains(&ActionId::new("createOrg")));
    }
}
