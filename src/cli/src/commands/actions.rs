//! Action catalog commands.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ActionCommands {
    /// List every action a role can be granted
    List {
        /// Only show actions containing this text
        #[arg(short, long)]
        filter: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct ActionList {
    actions: Vec<String>,
}

#[derive(Debug, Serialize, Tabled)]
struct ActionRow {
    #[tabled(rename = "Action")]
    action_id: String,
}

pub async fn execute(cmd: ActionCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        ActionCommands::List { filter } => {
            let list: ActionList = client.get("/api/v1/actions").await?;
            let rows: Vec<ActionRow> = filter_actions(list.actions, filter.as_deref())
                .into_iter()
                .map(|action_id| ActionRow { action_id })
                .collect();
            output::print_list(&rows, format)
        }
    }
}

fn filter_actions(mut actions: Vec<String>, filter: Option<&str>) -> Vec<String> {
    if let Some(needle) = filter.map(str::to_lowercase) {
        actions.retain(|a| a.to_lowercase().contains(&needle));
    }
    actions.sort();
    actions
}
