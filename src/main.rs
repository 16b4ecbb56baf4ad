//! obo-broker - delegated-identity token broker

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use obo_broker::{
    Error,
    broker::TokenBroker,
    cli::{Cli, Command, TokenCommand},
    config::Config,
    oauth::{CallbackServer, Capability},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(host) = cli.host {
        config.callback.host = host;
    }
    if let Some(port) = cli.port {
        config.callback.port = port;
    }

    match cli.command {
        Command::Login { timeout } => run_login(&config, timeout.map(Duration::from_secs)).await,
        Command::Serve => run_serve(&config).await,
        Command::Token(kind) => run_token(&config, kind).await,
        Command::Wait { timeout, interval } => {
            run_wait(&config, Duration::from_secs(timeout), Duration::from_secs(interval)).await
        }
    }
}

fn broker(config: &Config) -> Result<TokenBroker, ExitCode> {
    TokenBroker::from_config(config).map_err(|e| {
        eprintln!("❌ {e}");
        ExitCode::FAILURE
    })
}

/// One-shot local sign-in
async fn run_login(config: &Config, deadline: Option<Duration>) -> ExitCode {
    let missing = config.missing_for_interactive();
    if !missing.is_empty() {
        eprintln!("Missing env vars: {}", missing.join(", "));
        return ExitCode::FAILURE;
    }

    let broker = match broker(config) {
        Ok(b) => b,
        Err(code) => return code,
    };
    let service = match broker.callback_service() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };
    let listener = match CallbackServer::bind(&config.callback.host, config.callback.port).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    println!("Open {} in your browser to sign in.", config.callback.login_url());

    match CallbackServer::new(service).run_once(listener, deadline).await {
        Ok(token) => {
            println!("✅ Delegated token saved (expires in {:?})", token.time_until_expiry());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Sign-in did not complete");
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Hosted callback server
async fn run_serve(config: &Config) -> ExitCode {
    let broker = match broker(config) {
        Ok(b) => b,
        Err(code) => return code,
    };
    let service = match broker.callback_service() {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let listener = match CallbackServer::bind(&config.callback.host, config.callback.port).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    match CallbackServer::new(service).serve(listener).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Callback server failed");
            ExitCode::FAILURE
        }
    }
}

/// Print a token, or the sign-in URL when a human is needed
async fn run_token(config: &Config, kind: TokenCommand) -> ExitCode {
    let broker = match broker(config) {
        Ok(b) => b,
        Err(code) => return code,
    };

    let result = match kind {
        TokenCommand::App => broker.app_token(Capability::Mail).await,
        TokenCommand::Delegated => broker.delegated_token().await,
    };

    match result {
        Ok(token) => {
            println!("{token}");
            ExitCode::SUCCESS
        }
        Err(Error::InteractiveAuthRequired { auth_url }) => {
            eprintln!("Sign-in required: open {auth_url}");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Wait for a hosted callback to store a fresh token
async fn run_wait(config: &Config, timeout: Duration, interval: Duration) -> ExitCode {
    let broker = match broker(config) {
        Ok(b) => b,
        Err(code) => return code,
    };

    info!(?timeout, "Waiting for sign-in to complete");
    if broker.poller().with_interval(interval).wait_for_fresh_token(timeout).await {
        println!("✅ Fresh token stored");
        ExitCode::SUCCESS
    } else {
        eprintln!("❌ No fresh token within {timeout:?}");
        ExitCode::FAILURE
    }
}
