//! Outbound fall notifications.
//!
//! The [`AlertDispatcher`] turns a confirmed fall and a location into one
//! notification through a [`NotificationTransport`]. It applies a
//! process-wide cooldown, retries failed connections with a fixed backoff and
//! bounds the wait for the relay's answer. It never returns an error: every
//! result is an [`AlertOutcome`].
//!
//! The monitor loop never awaits the relay. It hands [`AlertRequest`]s to a
//! dispatcher task started with [`spawn_dispatcher`] and picks up the
//! matching [`AlertReport`]s on later ticks.

pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::Result;
use crate::sample::LocationFix;

pub use relay::HttpRelay;

/// Parameter label sent with every fall notification.
const PARAMETER: &str = "Fall Detection";
/// Measured value sent with every fall notification.
const MEASURED_VALUE: &str = "Fall detected";
/// Limit sent with every fall notification.
const LIMIT: &str = "Upright posture";

/// Queue depth between the monitor and the dispatcher task.
const REQUEST_QUEUE_DEPTH: usize = 8;

/// Result of one notification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AlertOutcome {
    /// The relay answered with an HTTP status.
    Delivered {
        /// Status code returned by the relay.
        status: u16,
    },
    /// The request was sent but no answer arrived in time.
    Unacknowledged,
    /// Suppressed by the cooldown without any I/O.
    RateLimited,
    /// Every connection attempt failed.
    ConnectFailed {
        /// Number of attempts made.
        attempts: u32,
    },
}

impl AlertOutcome {
    /// Whether the episode should be considered alerted.
    #[must_use]
    pub fn counts_as_alerted(&self) -> bool {
        matches!(self, Self::Delivered { .. } | Self::Unacknowledged)
    }

    /// Short label used in logs and the journal.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Delivered { status } => format!("delivered ({status})"),
            Self::Unacknowledged => "unacknowledged".to_string(),
            Self::RateLimited => "rate_limited".to_string(),
            Self::ConnectFailed { attempts } => format!("connect_failed ({attempts})"),
        }
    }
}

impl std::fmt::Display for AlertOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// Template variables of a fall notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertVariables {
    /// Device label.
    pub device_name: String,
    /// Monitored parameter.
    pub parameter: String,
    /// Observed value.
    pub measured_value: String,
    /// Expected value.
    pub limit: String,
    /// Map link to the wearer's position.
    pub location: String,
}

/// Body posted to the notification relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Recipient phone number.
    pub phone_number: String,
    /// Relay template identifier.
    pub template_id: String,
    /// Template variables.
    pub variables: AlertVariables,
}

impl AlertPayload {
    /// Build the fall notification for `location`.
    #[must_use]
    pub fn fall(config: &RelayConfig, location: LocationFix) -> Self {
        Self {
            phone_number: config.recipient.clone(),
            template_id: config.template_id.clone(),
            variables: AlertVariables {
                device_name: config.device_name.clone(),
                parameter: PARAMETER.to_string(),
                measured_value: MEASURED_VALUE.to_string(),
                limit: LIMIT.to_string(),
                location: location.map_link(),
            },
        }
    }
}

/// Errors from a single transport call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection could be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Connected, but the relay did not answer in time.
    #[error("timed out waiting for relay")]
    Timeout,

    /// Any other failure after the connection was made.
    #[error("relay error: {0}")]
    Other(String),
}

/// Delivery channel for notifications.
#[async_trait]
pub trait NotificationTransport: Send + Sync + std::fmt::Debug {
    /// Send one payload and return the relay's status code.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if no connection could be made,
    /// so the caller may retry.
    async fn send(&self, payload: &AlertPayload) -> std::result::Result<u16, TransportError>;
}

/// Spaces notification attempts by a minimum interval.
///
/// Stamped when an attempt starts, so failed attempts count too.
#[derive(Debug, Clone)]
pub struct CooldownLimiter {
    cooldown: Duration,
    last_attempt: Option<Instant>,
}

impl CooldownLimiter {
    /// Create a limiter with no previous attempt.
    #[must_use]
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_attempt: None,
        }
    }

    /// Claim the right to attempt a send at `now`.
    ///
    /// Returns `false` if the previous attempt is too recent.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_attempt = Some(now);
        true
    }

    /// Time left before the next attempt is allowed.
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        self.last_attempt.map_or(Duration::ZERO, |last| {
            self.cooldown
                .saturating_sub(now.saturating_duration_since(last))
        })
    }
}

/// Sends fall notifications with cooldown, retry and response timeout.
#[derive(Debug)]
pub struct AlertDispatcher {
    config: RelayConfig,
    transport: Arc<dyn NotificationTransport>,
    limiter: CooldownLimiter,
}

impl AlertDispatcher {
    /// Create a dispatcher over an explicit transport.
    #[must_use]
    pub fn new(config: RelayConfig, transport: Arc<dyn NotificationTransport>) -> Self {
        let limiter = CooldownLimiter::new(config.cooldown());
        Self {
            config,
            transport,
            limiter,
        }
    }

    /// Create a dispatcher that posts to the configured HTTP relay.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let transport = HttpRelay::new(config)?;
        Ok(Self::new(config.clone(), Arc::new(transport)))
    }

    /// Notify about a fall at `location`.
    pub async fn notify(&mut self, location: LocationFix) -> AlertOutcome {
        self.notify_at(Instant::now(), location).await
    }

    /// Notify about a fall at `location`, treating `now` as the current time
    /// for the cooldown.
    pub async fn notify_at(&mut self, now: Instant, location: LocationFix) -> AlertOutcome {
        if !self.limiter.try_acquire(now) {
            debug!(
                remaining_ms = self.limiter.remaining(now).as_millis(),
                "Alert suppressed by cooldown"
            );
            return AlertOutcome::RateLimited;
        }

        let payload = AlertPayload::fall(&self.config, location);
        let outcome = self.send_with_retry(&payload).await;
        match outcome {
            AlertOutcome::Delivered { status } if (200..300).contains(&status) => {
                info!(status, "Fall alert delivered");
            }
            AlertOutcome::Delivered { status } => {
                warn!(status, "Relay rejected fall alert");
            }
            AlertOutcome::Unacknowledged => warn!("Fall alert sent but not acknowledged"),
            AlertOutcome::ConnectFailed { attempts } => {
                warn!(attempts, "Could not reach notification relay");
            }
            AlertOutcome::RateLimited => {}
        }
        outcome
    }

    async fn send_with_retry(&self, payload: &AlertPayload) -> AlertOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let call = self.transport.send(payload);
            match tokio::time::timeout(self.config.response_timeout(), call).await {
                Ok(Ok(status)) => return AlertOutcome::Delivered { status },
                Ok(Err(TransportError::Connect(reason))) => {
                    debug!(attempt, max_attempts, %reason, "Relay connection failed");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.retry_backoff()).await;
                    }
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "Relay did not answer");
                    return AlertOutcome::Unacknowledged;
                }
                Err(_) => return AlertOutcome::Unacknowledged,
            }
        }
        AlertOutcome::ConnectFailed {
            attempts: max_attempts,
        }
    }
}

/// A request from the monitor to notify about a confirmed episode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertRequest {
    /// Start of the episode, used to match the report.
    pub episode_start: Duration,
    /// Wearer position at request time.
    pub location: LocationFix,
    /// Journal row of the episode, if journaling is on.
    pub journal_id: Option<i64>,
}

/// The dispatcher's answer to an [`AlertRequest`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertReport {
    /// Start of the episode the request was for.
    pub episode_start: Duration,
    /// Journal row of the episode, if any.
    pub journal_id: Option<i64>,
    /// What happened.
    pub outcome: AlertOutcome,
}

/// Monitor-side ends of the dispatcher task.
#[derive(Debug)]
pub struct DispatcherHandle {
    requests: mpsc::Sender<AlertRequest>,
    reports: mpsc::Receiver<AlertReport>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Queue a request without waiting.
    ///
    /// Returns `false` if the queue is full or the task has stopped.
    pub fn request(&self, request: AlertRequest) -> bool {
        match self.requests.try_send(request) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Could not queue fall alert");
                false
            }
        }
    }

    /// Take the next finished report, if one is ready.
    pub fn try_report(&mut self) -> Option<AlertReport> {
        self.reports.try_recv().ok()
    }

    /// Close the request queue and wait for the task to finish its current
    /// request.
    pub async fn shutdown(self) {
        drop(self.requests);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Alert dispatcher task failed");
        }
    }
}

/// Start the dispatcher task on the current runtime.
#[must_use]
pub fn spawn_dispatcher(dispatcher: AlertDispatcher) -> DispatcherHandle {
    let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let (report_tx, report_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    let task = tokio::spawn(run_dispatcher(dispatcher, request_rx, report_tx));
    DispatcherHandle {
        requests: request_tx,
        reports: report_rx,
        task,
    }
}

async fn run_dispatcher(
    mut dispatcher: AlertDispatcher,
    mut requests: mpsc::Receiver<AlertRequest>,
    reports: mpsc::Sender<AlertReport>,
) {
    debug!("Alert dispatcher started");
    while let Some(request) = requests.recv().await {
        let outcome = dispatcher.notify(request.location).await;
        let report = AlertReport {
            episode_start: request.episode_start,
            journal_id: request.journal_id,
            outcome,
        };
        if reports.send(report).await.is_err() {
            break;
        }
    }
    debug!("Alert dispatcher stopped");
}
