//! Organization commands.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum OrgCommands {
    /// Create an organization; you become a member of its Superuser role
    Create {
        /// Organization ID (lowercase letters, digits and hyphens)
        org_id: String,

        /// Display name
        #[arg(short, long)]
        name: String,
    },
}

#[derive(Debug, Serialize)]
struct CreateOrgRequest<'a> {
    org_id: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize, Serialize)]
struct CreatedOrg {
    org_id: String,
    name: String,
    superuser_role_id: String,
}

pub async fn execute(cmd: OrgCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        OrgCommands::Create { org_id, name } => {
            let org: CreatedOrg = client
                .post(
                    "/api/v1/orgs",
                    &CreateOrgRequest {
                        org_id: &org_id,
                        name: &name,
                    },
                )
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Organization '{}' created", org.org_id));
                    output::print_detail("Name", &org.name);
                    output::print_detail("Superuser role", &org.superuser_role_id);
                }
                _ => output::print_item(&org, format)?,
            }
        }
    }

    Ok(())
}
