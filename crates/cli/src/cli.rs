//! Command-line arguments.

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "stashfetch", version, about = "Fetch URLs through a durable response cache")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch one or more URLs.
    Get(GetArgs),
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// URLs to fetch, in order.
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Serve stored responses even after they expire.
    #[arg(long)]
    pub allow_expired: bool,

    /// Print decoded bodies instead of a JSON summary per URL.
    #[arg(long)]
    pub text: bool,
}
