//! stashfetch entry point.
//!
//! Fetches URLs through the response cache and prints what came back.
//! Logging goes to stderr so stdout carries only command output.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = cli::Cli::parse();
    let config = stashfetch_core::config::AppConfig::load()?;
    tracing::debug!(db_path = %config.db_path.display(), backend = ?config.store_backend, "configuration loaded");

    match cli.command {
        cli::Command::Get(args) => commands::get(&config, &args).await,
        cli::Command::Config => commands::print_config(&config),
    }
}
