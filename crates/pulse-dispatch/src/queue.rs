//! Background dispatch queue decoupling event sources from subscriber I/O.
//!
//! Event sources call [`DispatchQueue::submit`], which enqueues and returns
//! immediately; a background task drains the queue and runs the full
//! dispatch for each event. Submission failure (queue full or shut down) is
//! a typed error the caller must handle — the queue never silently drops an
//! accepted event, and events it could not accept are the caller's to
//! retry.

use pulse_core::{EventType, OrgId};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    dispatcher::Dispatcher,
    error::{DispatchError, Result},
};

/// Configuration for the background dispatch queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of events buffered before `submit` fails.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: crate::DEFAULT_QUEUE_CAPACITY }
    }
}

/// One queued dispatch request.
#[derive(Debug)]
struct DispatchJob {
    org_id: OrgId,
    event_type: EventType,
    data: serde_json::Value,
}

/// Bounded in-process queue feeding a background dispatch task.
pub struct DispatchQueue {
    tx: mpsc::Sender<DispatchJob>,
    cancellation_token: CancellationToken,
    worker: JoinHandle<()>,
}

impl DispatchQueue {
    /// Starts the queue and its background drain task.
    pub fn start(dispatcher: Dispatcher, config: QueueConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<DispatchJob>(config.capacity);
        let cancellation_token = CancellationToken::new();

        let token = cancellation_token.clone();
        let worker = tokio::spawn(async move {
            info!(capacity = config.capacity, "dispatch queue worker starting");

            loop {
                tokio::select! {
                    job = rx.recv() => match job {
                        Some(job) => run_job(&dispatcher, job).await,
                        None => break,
                    },
                    () = token.cancelled() => {
                        // Drain what was already accepted before stopping.
                        while let Ok(job) = rx.try_recv() {
                            run_job(&dispatcher, job).await;
                        }
                        break;
                    },
                }
            }

            info!("dispatch queue worker stopped");
        });

        Self { tx, cancellation_token, worker }
    }

    /// Enqueues an event for background dispatch and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::QueueFull` when the buffer is at capacity
    /// and `DispatchError::QueueClosed` after shutdown. The caller owns
    /// retry-on-submission-failure.
    pub fn submit(
        &self,
        org_id: OrgId,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<()> {
        self.tx.try_send(DispatchJob { org_id, event_type, data }).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::QueueFull,
            TrySendError::Closed(_) => DispatchError::QueueClosed,
        })
    }

    /// Shuts the queue down, draining already-accepted events first.
    ///
    /// New submissions fail with `QueueClosed` once this is called.
    pub async fn shutdown(self) {
        info!("shutting down dispatch queue");

        self.cancellation_token.cancel();
        drop(self.tx);

        if let Err(error) = self.worker.await {
            error!(error = %error, "dispatch queue worker panicked");
        }
    }
}

/// Runs one queued dispatch, logging failures.
///
/// Dispatch errors past the submission boundary have no caller left to
/// reach; the attempt log and the structured log line are their surface.
async fn run_job(dispatcher: &Dispatcher, job: DispatchJob) {
    if let Err(error) = dispatcher.dispatch(job.org_id, job.event_type, job.data).await {
        error!(
            org_id = %job.org_id,
            event_type = %job.event_type,
            error = %error,
            "queued dispatch failed"
        );
    }
}
