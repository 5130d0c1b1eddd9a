//! Fall classification.
//!
//! A [`FallDetector`] consumes one [`MotionSample`] per tick and advances a
//! small state machine. Two policies are available and exactly one runs at a
//! time, chosen by [`FallPolicy`]:
//!
//! - [`EnvelopeDetector`]: free-fall dip, impact spike, rotation burst, then
//!   stillness in a new orientation. Confirmed falls stay latched for a fixed
//!   window so the alert remains visible.
//! - [`OrientationDetector`]: the vertical axis stays inverted for a fixed
//!   amount of elapsed time. Recovery clears the episode immediately.
//!
//! Detectors are pure functions of the sample stream. All timing comes from
//! the sample timestamps, never from a wall clock.

mod envelope;
mod orientation;

use std::time::Duration;

use serde::Serialize;

use crate::config::{ClassifierConfig, FallPolicy};
use crate::sample::MotionSample;

pub use envelope::{EnvelopeDetector, EnvelopeStage};
pub use orientation::OrientationDetector;

/// Externally visible classifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FallState {
    /// No fall in progress.
    #[default]
    Idle,
    /// A possible fall is being evaluated.
    Candidate {
        /// When the episode began.
        since: Duration,
    },
    /// A fall has been confirmed.
    Confirmed {
        /// When the episode began.
        since: Duration,
        /// When confirmation happened.
        confirmed_at: Duration,
        /// Whether an alert has been delivered for this episode.
        alerted: bool,
    },
}

impl FallState {
    /// Whether a fall is currently confirmed.
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    /// Whether the current episode still needs an alert.
    #[must_use]
    pub fn needs_alert(&self) -> bool {
        matches!(self, Self::Confirmed { alerted: false, .. })
    }

    /// Label published to the dashboard.
    #[must_use]
    pub fn label(&self) -> &'static str {
        if self.is_confirmed() {
            "FALL"
        } else {
            "NORMAL"
        }
    }
}

impl std::fmt::Display for FallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Candidate { .. } => write!(f, "candidate"),
            Self::Confirmed { .. } => write!(f, "confirmed"),
        }
    }
}

/// Transition events emitted by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FallEvent {
    /// The detector entered the confirmed state.
    Confirmed {
        /// When the episode began.
        episode_start: Duration,
        /// When confirmation happened.
        confirmed_at: Duration,
    },
    /// A confirmed episode ended.
    Cleared {
        /// When the episode ended.
        at: Duration,
    },
}

/// A fall-detection policy.
pub trait FallDetector: Send + std::fmt::Debug {
    /// Which policy this detector implements.
    fn policy(&self) -> FallPolicy;

    /// Advance the state machine by one sample.
    ///
    /// Returns an event when the sample causes the detector to enter or leave
    /// the confirmed state.
    fn update(&mut self, sample: &MotionSample) -> Option<FallEvent>;

    /// Let time pass without a new sample.
    ///
    /// Only timers that do not depend on motion may fire here.
    fn advance(&mut self, _now: Duration) -> Option<FallEvent> {
        None
    }

    /// Current state.
    fn state(&self) -> FallState;

    /// Record that an alert was delivered for the current episode.
    ///
    /// Has no effect unless the detector is in the confirmed state.
    fn mark_alerted(&mut self);

    /// Return to idle, dropping any episode in progress.
    fn reset(&mut self);
}

/// Build the detector selected by configuration.
#[must_use]
pub fn from_config(config: &ClassifierConfig) -> Box<dyn FallDetector> {
    match config.policy {
        FallPolicy::Envelope => Box::new(EnvelopeDetector::new(config.envelope.clone())),
        FallPolicy::Orientation => Box::new(OrientationDetector::new(config.orientation.clone())),
    }
}

/// Shared bookkeeping for the confirmed state.
///
/// Both policies hold an `Option<Episode>` while confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Episode {
    since: Duration,
    confirmed_at: Duration,
    alerted: bool,
}

impl Episode {
    fn state(&self) -> FallState {
        FallState::Confirmed {
            since: self.since,
            confirmed_at: self.confirmed_at,
            alerted: self.alerted,
        }
    }

    fn confirmed_event(&self) -> FallEvent {
        FallEvent::Confirmed {
            episode_start: self.since,
            confirmed_at: self.confirmed_at,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fall_state_label() {
        assert_eq!(FallState::Idle.label(), "NORMAL");
        assert_eq!(
            FallState::Candidate {
                since: Duration::ZERO
            }
            .label(),
            "NORMAL"
        );
        assert_eq!(
            FallState::Confirmed {
                since: Duration::ZERO,
                confirmed_at: Duration::from_secs(1),
                alerted: false
            }
            .label(),
            "FALL"
        );
    }

    #[test]
    fn test_needs_alert() {
        let pending = FallState::Confirmed {
            since: Duration::ZERO,
            confirmed_at: Duration::ZERO,
            alerted: false,
        };
        let done = FallState::Confirmed {
            since: Duration::ZERO,
            confirmed_at: Duration::ZERO,
            alerted: true,
        };
        assert!(pending.needs_alert());
        assert!(!done.needs_alert());
        assert!(!FallState::Idle.needs_alert());
    }

    #[test]
    fn test_fall_state_display() {
        assert_eq!(FallState::Idle.to_string(), "idle");
        assert_eq!(
            FallState::Candidate {
                since: Duration::ZERO
            }
            .to_string(),
            "candidate"
        );
    }

    #[test]
    fn test_from_config_selects_policy() {
        let mut config = ClassifierConfig::default();
        assert_eq!(from_config(&config).policy(), FallPolicy::Envelope);

        config.policy = FallPolicy::Orientation;
        assert_eq!(from_config(&config).policy(), FallPolicy::Orientation);
    }

    #[test]
    fn test_fall_event_serialize() {
        let event = FallEvent::Cleared {
            at: Duration::from_secs(3),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"cleared\""));
    }
}
