//! Periodic resubmission of due, under-limit failed attempts.
//!
//! The sweeper is the only path that turns a failed attempt into a new
//! send. It claims due rows atomically — the claim transitions them out of
//! the retryable selection window before any HTTP request — so overlapping
//! sweeps, or a sweep racing a live dispatch, never produce two in-flight
//! sends for one row.

use std::{sync::Arc, time::Duration};

use pulse_core::Clock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    dispatcher::Dispatcher,
    error::{DispatchError, Result},
    storage::DispatchStorage,
};

/// Configuration for the retry sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Maximum rows one sweep claims.
    pub batch_size: usize,

    /// How long the ambient loop sleeps when a sweep finds nothing due.
    pub poll_interval: Duration,

    /// How long the ambient loop backs off after a storage error.
    pub error_backoff: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_SWEEP_BATCH_SIZE,
            poll_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Re-submits due failed attempts through the dispatcher's send path.
pub struct RetrySweeper {
    storage: Arc<dyn DispatchStorage>,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
    cancellation_token: CancellationToken,
}

impl RetrySweeper {
    /// Creates a new sweeper.
    pub fn new(
        storage: Arc<dyn DispatchStorage>,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        config: SweeperConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { storage, dispatcher, clock, config, cancellation_token }
    }

    /// Performs one sweep: claim due rows, resend each concurrently.
    ///
    /// Returns the number of rows claimed. Safe to call from an external
    /// scheduler as well as the ambient [`run`](Self::run) loop, including
    /// concurrently with itself — the atomic claim keeps at most one
    /// in-flight send per row.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Database` if the claim query fails. Send
    /// failures for individual rows are recorded on the rows themselves,
    /// not surfaced here.
    pub async fn sweep(&self) -> Result<usize> {
        let now = self.clock.now();
        let claimed = self
            .storage
            .claim_due_attempts(self.config.batch_size, now)
            .await
            .map_err(|e| DispatchError::database(e.to_string()))?;

        if claimed.is_empty() {
            return Ok(0);
        }

        debug!(claimed = claimed.len(), "sweeping due delivery attempts");
        let count = claimed.len();

        let handles: Vec<_> = claimed
            .into_iter()
            .map(|attempt| {
                let storage = self.storage.clone();
                let dispatcher = self.dispatcher.clone();
                tokio::spawn(async move {
                    match storage.find_subscription(attempt.subscription_id).await {
                        Ok(Some(subscription)) => {
                            if let Err(error) = dispatcher.send(&attempt, &subscription).await {
                                error!(
                                    attempt_id = %attempt.id,
                                    error = %error,
                                    "retry send failed inside dispatch pipeline"
                                );
                            }
                        },
                        Ok(None) => {
                            // Subscription deleted since the attempt was
                            // created; the row can never deliver.
                            warn!(
                                attempt_id = %attempt.id,
                                subscription_id = %attempt.subscription_id,
                                "subscription gone, abandoning attempt"
                            );
                            if let Err(error) = storage
                                .mark_attempt_failed(
                                    attempt.id,
                                    None,
                                    Some("subscription no longer exists".to_string()),
                                    None,
                                    now,
                                )
                                .await
                            {
                                error!(
                                    attempt_id = %attempt.id,
                                    error = %error,
                                    "failed to abandon orphaned attempt"
                                );
                            }
                        },
                        Err(error) => {
                            // Keep the row retryable so a later sweep can
                            // pick it up once the store recovers.
                            error!(
                                attempt_id = %attempt.id,
                                error = %error,
                                "subscription lookup failed during sweep"
                            );
                            if let Err(error) = dispatcher
                                .record_failure(
                                    &attempt,
                                    None,
                                    format!("subscription lookup failed: {error}"),
                                    now,
                                )
                                .await
                            {
                                error!(
                                    attempt_id = %attempt.id,
                                    error = %error,
                                    "failed to reschedule attempt after lookup error"
                                );
                            }
                        },
                    }
                })
            })
            .collect();

        futures::future::join_all(handles).await;

        Ok(count)
    }

    /// Ambient sweep loop: poll, sleep when idle, back off on errors, stop
    /// on cancellation.
    ///
    /// A non-empty sweep polls again immediately so a backlog drains at
    /// full speed.
    pub async fn run(&self) {
        info!(
            batch_size = self.config.batch_size,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "retry sweeper starting"
        );

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            match self.sweep().await {
                Ok(0) => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Ok(_) => {},
                Err(error) => {
                    error!(error = %error, "sweep failed");
                    tokio::select! {
                        () = self.clock.sleep(self.config.error_backoff) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!("retry sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_service_constants() {
        let config = SweeperConfig::default();

        assert_eq!(config.batch_size, crate::DEFAULT_SWEEP_BATCH_SIZE);
        assert_eq!(config.poll_interval, Duration::from_secs(60));
    }
}
