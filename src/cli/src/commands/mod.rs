//! Subcommand implementations.

pub mod actions;
pub mod config;
pub mod health;
pub mod orgs;
pub mod roles;
