//! Token-arrival poller
//!
//! For processes that cannot host the callback server themselves: wait for a
//! separately hosted handler to write a new record into the shared durable
//! storage. Only the modification marker is compared, never the token.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::storage::TokenBackend;

/// Default interval between checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Shortest interval accepted by [`TokenArrivalPoller::with_interval`]
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stand-in deadline when `now + timeout` is not representable
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Watches durable storage for a fresh write
pub struct TokenArrivalPoller {
    backend: Arc<dyn TokenBackend>,
    interval: Duration,
}

impl TokenArrivalPoller {
    /// Poll `backend` every [`DEFAULT_POLL_INTERVAL`]
    #[must_use]
    pub fn new(backend: Arc<dyn TokenBackend>) -> Self {
        Self {
            backend,
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the poll interval, clamped to [`MIN_POLL_INTERVAL`]
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Current marker; `None` when it could not be read, `Some(None)` when
    /// the record is absent
    async fn marker(&self) -> Option<Option<String>> {
        match self.backend.last_modified().await {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!(
                    backend = self.backend.name(),
                    error = %e,
                    "Failed to read token modification time"
                );
                None
            }
        }
    }

    /// Wait until the record changes or `timeout` elapses.
    ///
    /// Returns `true` only when two successfully read markers differ and the
    /// later one is present. Until the first read succeeds there is no
    /// baseline. Dropping the future cancels the wait.
    pub async fn wait_for_fresh_token(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);

        let mut baseline = self.marker().await;
        debug!(backend = self.backend.name(), baseline = ?baseline, "Waiting for fresh token");

        loop {
            let now = Instant::now();
            if now >= deadline {
                info!(?timeout, "No fresh token before deadline");
                return false;
            }
            tokio::time::sleep(self.interval.min(deadline - now)).await;

            // An unreadable marker counts as unchanged
            let Some(current) = self.marker().await else {
                continue;
            };

            if let Some(previous) = &baseline {
                if current.is_some() && current != *previous {
                    info!(backend = self.backend.name(), "Fresh token detected");
                    return true;
                }
            } else {
                debug!(backend = self.backend.name(), baseline = ?current, "Baseline established");
                baseline = Some(current);
            }
        }
    }
}
