//! Gatehouse CLI - Command-line interface for administering Gatehouse.
//!
//! Provides commands for organizations, roles, role actions, health, and
//! configuration management.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{actions, config, health, orgs, roles};
use output::OutputFormat;

const DEFAULT_API_URL: &str = "http://localhost:3000";

/// Gatehouse - tunnel and resource administration CLI
#[derive(Parser)]
#[command(
    name = "gatehouse",
    version,
    about = "Gatehouse - tunnel and resource administration",
    long_about = "CLI tool for managing Gatehouse organizations, roles and role permissions.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "GATEHOUSE_API_URL")]
    api_url: Option<String>,

    /// Session token sent as a bearer credential
    #[arg(long, global = true, env = "GATEHOUSE_SESSION_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Action catalog operations
    #[command(subcommand)]
    Actions(actions::ActionCommands),

    /// Organization operations
    #[command(subcommand)]
    Orgs(orgs::OrgCommands),

    /// Role and role permission operations
    #[command(subcommand)]
    Roles(roles::RoleCommands),

    /// Check system health
    Health(health::HealthArgs),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(|| config::load_value(config::API_URL_KEY))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let token = cli
        .token
        .clone()
        .or_else(|| config::load_value(config::SESSION_TOKEN_KEY));

    let client = client::ApiClient::new(&api_url, token)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Actions(cmd) => actions::execute(cmd, &client, format).await,
        Commands::Orgs(cmd) => orgs::execute(cmd, &client, format).await,
        Commands::Roles(cmd) => roles::execute(cmd, &client, format).await,
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
