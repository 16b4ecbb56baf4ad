//! obo-broker Library
//!
//! Delegated-identity OAuth 2.0 token exchange against a single identity
//! provider.
//!
//! # Features
//!
//! - **App tokens**: client credentials, either a single legacy client or a
//!   blueprint bootstrap token exchanged for an agent token
//! - **Delegated tokens**: durable memory/file/blob storage, refresh-token
//!   renewal, and an explicit "interactive sign-in required" signal
//! - **Callback server**: `/login` and `/callback` with CSRF-checked state,
//!   code redemption and on-behalf-of exchange
//! - **Poller**: waits for a separately hosted callback to store a token

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod oauth;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
