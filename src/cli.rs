//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Delegated-identity token broker: app tokens, delegated tokens, and the
/// browser sign-in callback
#[derive(Parser, Debug)]
#[command(name = "obo-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "OBO_BROKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port for the callback server
    #[arg(short, long, env = "OBO_BROKER_PORT", global = true)]
    pub port: Option<u16>,

    /// Host for the callback server to bind to
    #[arg(long, env = "OBO_BROKER_HOST", global = true)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "OBO_BROKER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "OBO_BROKER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the callback server until one sign-in completes, then exit
    Login {
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Run the callback server for hosted deployments
    Serve,

    /// Acquire a token and print it
    #[command(subcommand)]
    Token(TokenCommand),

    /// Wait for a separately hosted callback server to store a fresh token
    Wait {
        /// Seconds to wait
        #[arg(long, default_value_t = 120)]
        timeout: u64,

        /// Seconds between checks
        #[arg(long, default_value_t = 3)]
        interval: u64,
    },
}

/// Token subcommands
#[derive(Subcommand, Debug)]
pub enum TokenCommand {
    /// Application-only token
    App,

    /// Delegated token; prints the sign-in URL when interaction is needed
    Delegated,
}
