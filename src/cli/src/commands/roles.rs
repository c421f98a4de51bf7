//! Role and role permission commands.
//!
//! Provides list, create, and delete operations for roles, plus listing,
//! granting, and revoking the actions a role holds.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RoleCommands {
    /// List roles in an organization
    List {
        /// Organization ID
        org_id: String,
    },

    /// Create a role with no actions
    Create {
        /// Organization ID
        org_id: String,

        /// Role name
        name: String,

        /// Optional description
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Delete a role and its grants
    Delete {
        /// Organization ID
        org_id: String,

        /// Role ID
        role_id: String,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// List the actions a role holds
    Actions {
        /// Organization ID
        org_id: String,

        /// Role ID
        role_id: String,
    },

    /// Grant an action to a role
    Grant {
        /// Organization ID
        org_id: String,

        /// Role ID
        role_id: String,

        /// Action ID (see `gatehouse actions list`)
        action_id: String,
    },

    /// Revoke an action from a role
    Revoke {
        /// Organization ID
        org_id: String,

        /// Role ID
        role_id: String,

        /// Action ID
        action_id: String,
    },
}

// ── API response types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
struct RoleInfo {
    role_id: String,
    org_id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    is_superuser_role: bool,
}

#[derive(Debug, Deserialize)]
struct RoleList {
    roles: Vec<RoleInfo>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RoleActions {
    role_id: String,
    actions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Grant {
    role_id: String,
    action_id: String,
    org_id: String,
}

#[derive(Debug, Serialize)]
struct CreateRoleRequest<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct GrantRequest<'a> {
    action_id: &'a str,
}

#[derive(Debug, Serialize, Tabled)]
struct RoleRow {
    #[tabled(rename = "ID")]
    role_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Superuser")]
    superuser: String,
    #[tabled(rename = "Description")]
    description: String,
}

impl From<RoleInfo> for RoleRow {
    fn from(role: RoleInfo) -> Self {
        Self {
            role_id: role.role_id,
            name: role.name,
            superuser: if role.is_superuser_role { "yes" } else { "" }.to_string(),
            description: role.description.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Tabled)]
struct ActionRow {
    #[tabled(rename = "Action")]
    action_id: String,
}

// ── Execution ───────────────────────────────────────────────────────────────

fn roles_path(org_id: &str) -> String {
    format!("/api/v1/orgs/{}/roles", org_id)
}

fn role_actions_path(org_id: &str, role_id: &str) -> String {
    format!("{}/{}/actions", roles_path(org_id), role_id)
}

pub async fn execute(cmd: RoleCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        RoleCommands::List { org_id } => {
            let list: RoleList = client.get(&roles_path(&org_id)).await?;
            match format {
                OutputFormat::Table => {
                    let rows: Vec<RoleRow> = list.roles.into_iter().map(RoleRow::from).collect();
                    output::print_list(&rows, format)?;
                }
                _ => output::print_item(&list.roles, format)?,
            }
        }

        RoleCommands::Create {
            org_id,
            name,
            description,
        } => {
            let role: RoleInfo = client
                .post(
                    &roles_path(&org_id),
                    &CreateRoleRequest {
                        name: &name,
                        description: description.as_deref(),
                    },
                )
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Role '{}' created", role.name));
                    output::print_detail("ID", &role.role_id);
                    output::print_detail("Organization", &role.org_id);
                }
                _ => output::print_item(&role, format)?,
            }
        }

        RoleCommands::Delete {
            org_id,
            role_id,
            force,
        } => {
            if !force {
                output::print_info(
                    "This will delete the role and its grants. Use --force to skip confirmation.",
                );
                return Ok(());
            }

            let message = client
                .delete(&format!("{}/{}", roles_path(&org_id), role_id))
                .await?;
            output::print_success(&message);
        }

        RoleCommands::Actions { org_id, role_id } => {
            let role: RoleActions = client.get(&role_actions_path(&org_id, &role_id)).await?;
            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Role {}", role.role_id));
                    let rows: Vec<ActionRow> = role
                        .actions
                        .into_iter()
                        .map(|action_id| ActionRow { action_id })
                        .collect();
                    output::print_list(&rows, format)?;
                }
                _ => output::print_item(&role, format)?,
            }
        }

        RoleCommands::Grant {
            org_id,
            role_id,
            action_id,
        } => {
            let grant: Grant = client
                .post(
                    &role_actions_path(&org_id, &role_id),
                    &GrantRequest {
                        action_id: &action_id,
                    },
                )
                .await?;

            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Granted {} to role {} in {}",
                    grant.action_id, grant.role_id, grant.org_id
                )),
                _ => output::print_item(&grant, format)?,
            }
        }

        RoleCommands::Revoke {
            org_id,
            role_id,
            action_id,
        } => {
            let message = client
                .delete(&format!("{}/{}", role_actions_path(&org_id, &role_id), action_id))
                .await?;
            output::print_success(&message);
        }
    }

    Ok(())
}
