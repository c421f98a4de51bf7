//! Health check command.
//!
//! Queries the `/health` endpoint and displays server and database status.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Include database connectivity details
    #[arg(short, long)]
    detailed: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: serde_json::Value = client.get_raw("/health").await?;

    let OutputFormat::Table = format else {
        return output::print_item(&health, format);
    };

    let status = health
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    output::print_header("System Health");
    output::print_detail("Status", status);
    output::print_detail("API URL", client.base_url());

    if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
        output::print_detail("Version", version);
    }

    if let Some(ts) = health.get("timestamp").and_then(|v| v.as_str()) {
        output::print_detail("Timestamp", ts);
    }

    if args.detailed {
        match health.get("database").filter(|db| !db.is_null()) {
            Some(db) => {
                let db_status = db.get("status").and_then(|v| v.as_str()).unwrap_or("?");
                output::print_detail("Database", db_status);
                if let Some(latency) = db.get("latency_ms").and_then(|v| v.as_u64()) {
                    output::print_detail("Database latency", &format!("{} ms", latency));
                }
            }
            None => output::print_detail("Database", "not configured"),
        }
    }

    if status == "healthy" {
        output::print_success("All systems operational");
    } else {
        output::print_error(&format!("System status: {}", status));
    }

    Ok(())
}
