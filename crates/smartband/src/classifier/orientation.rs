//! Orientation-hold detector.
//!
//! Treats the vertical axis reading as a posture signal: a wearer who stays
//! inverted for long enough has fallen, and standing back up clears the
//! episode straight away.

use std::time::Duration;

use tracing::{debug, info};

use super::{Episode, FallDetector, FallEvent, FallState};
use crate::config::{FallPolicy, OrientationConfig};
use crate::sample::MotionSample;

/// Policy B detector.
#[derive(Debug, Clone)]
pub struct OrientationDetector {
    config: OrientationConfig,
    candidate_since: Option<Duration>,
    episode: Option<Episode>,
}

impl OrientationDetector {
    /// Create an idle detector.
    #[must_use]
    pub fn new(config: OrientationConfig) -> Self {
        Self {
            config,
            candidate_since: None,
            episode: None,
        }
    }

    fn is_inverted(&self, sample: &MotionSample) -> bool {
        sample.accel_z < self.config.inverted_threshold_ms2
    }
}

impl FallDetector for OrientationDetector {
    fn policy(&self) -> FallPolicy {
        FallPolicy::Orientation
    }

    fn update(&mut self, sample: &MotionSample) -> Option<FallEvent> {
        let now = sample.timestamp;

        if !self.is_inverted(sample) {
            let was_confirmed = self.episode.is_some();
            if self.candidate_since.is_some() && !was_confirmed {
                debug!(at_ms = now.as_millis(), "Upright again before confirmation");
            }
            self.reset();
            if was_confirmed {
                info!(at_ms = now.as_millis(), "Wearer upright, fall cleared");
                return Some(FallEvent::Cleared { at: now });
            }
            return None;
        }

        if self.episode.is_some() {
            return None;
        }

        let Some(since) = self.candidate_since else {
            debug!(at_ms = now.as_millis(), accel_z = sample.accel_z, "Inversion detected");
            self.candidate_since = Some(now);
            return None;
        };

        if now.saturating_sub(since) < self.config.confirm_after() {
            return None;
        }

        let episode = Episode {
            since,
            confirmed_at: now,
            alerted: false,
        };
        self.episode = Some(episode);
        info!(
            episode_start_ms = since.as_millis(),
            confirmed_at_ms = now.as_millis(),
            "Fall confirmed"
        );
        Some(episode.confirmed_event())
    }

    fn state(&self) -> FallState {
        match (self.episode, self.candidate_since) {
            (Some(episode), _) => episode.state(),
            (None, Some(since)) => FallState::Candidate { since },
            (None, None) => FallState::Idle,
        }
    }

    fn mark_alerted(&mut self) {
        if let Some(episode) = self.episode.as_mut() {
            episode.alerted = true;
        }
    }

    fn reset(&mut self) {
        self.candidate_since = None;
        self.episode = None;
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::vertical;
    use super::*;

    /// Feed vertical readings at 1 Hz, returning the state after each one.
    fn run_at_one_hz(detector: &mut OrientationDetector, accel_z: &[f64]) -> Vec<FallState> {
        accel_z
            .iter()
            .zip(0u64..)
            .map(|(&z, second)| {
                detector.update(&vertical(z, second * 1_000));
                detector.state()
            })
            .collect()
    }

    #[test]
    fn test_inversion_held_confirms_on_seventh_sample() {
        let mut detector = OrientationDetector::new(OrientationConfig::default());
        let states = run_at_one_hz(&mut detector, &[2.0, 2.0, 2.0, -1.0, -1.0, -1.0, -1.0]);

        assert_eq!(states[2], FallState::Idle);
        assert_eq!(
            states[3],
            FallState::Candidate {
                since: Duration::from_secs(3)
            }
        );
        assert!(!states[5].is_confirmed());
        assert_eq!(
            states[6],
            FallState::Confirmed {
                since: Duration::from_secs(3),
                confirmed_at: Duration::from_secs(6),
                alerted: false,
            }
        );
    }

    #[test]
    fn test_recovery_before_confirmation_resets() {
        let mut detector = OrientationDetector::new(OrientationConfig::default());
        let states = run_at_one_hz(&mut detector, &[2.0, -1.0, -1.0, 2.0, -1.0, -1.0]);

        assert_eq!(states[3], FallState::Idle);
        // The timer restarts from the second inversion.
        assert_eq!(
            states[5],
            FallState::Candidate {
                since: Duration::from_secs(4)
            }
        );
    }

    #[test]
    fn test_confirmed_event_emitted_once() {
        let mut detector = OrientationDetector::new(OrientationConfig::default());
        let events: Vec<_> = (0..10u64)
            .filter_map(|second| detector.update(&vertical(-5.0, second * 1_000)))
            .collect();

        assert_eq!(
            events,
            vec![FallEvent::Confirmed {
                episode_start: Duration::ZERO,
                confirmed_at: Duration::from_secs(3),
            }]
        );
    }

    #[test]
    fn test_confirmed_episode_holds_without_samples() {
        let mut detector = OrientationDetector::new(OrientationConfig::default());
        run_at_one_hz(&mut detector, &[-1.0, -1.0, -1.0, -1.0]);

        assert!(detector.advance(Duration::from_secs(600)).is_none());
        assert!(detector.state().is_confirmed());
    }

    #[test]
    fn test_upright_clears_confirmed_episode() {
        let mut detector = OrientationDetector::new(OrientationConfig::default());
        run_at_one_hz(&mut detector, &[-1.0, -1.0, -1.0, -1.0]);
        detector.mark_alerted();

        let event = detector.update(&vertical(9.8, 4_000));
        assert_eq!(
            event,
            Some(FallEvent::Cleared {
                at: Duration::from_secs(4)
            })
        );
        assert_eq!(detector.state(), FallState::Idle);
    }

    #[test]
    fn test_alert_flag_reset_with_new_episode() {
        let mut detector = OrientationDetector::new(OrientationConfig::default());
        run_at_one_hz(&mut detector, &[-1.0, -1.0, -1.0, -1.0]);
        detector.mark_alerted();
        assert!(!detector.state().needs_alert());

        detector.update(&vertical(9.8, 5_000));
        for second in 6..=9u64 {
            detector.update(&vertical(-1.0, second * 1_000));
        }
        assert!(detector.state().needs_alert());
    }

    #[test]
    fn test_upright_stream_stays_idle() {
        let mut detector = OrientationDetector::new(OrientationConfig::default());
        let states = run_at_one_hz(&mut detector, &[9.8, 9.6, 0.0, 10.2, 9.8]);
        assert!(states.iter().all(|s| *s == FallState::Idle));
    }

    #[test]
    fn test_single_sample_inversion_does_not_confirm() {
        let config = OrientationConfig {
            confirm_after_ms: 0,
            ..OrientationConfig::default()
        };
        let mut detector = OrientationDetector::new(config);
        let states = run_at_one_hz(&mut detector, &[-1.0, 2.0]);
        assert!(states.iter().all(|s| !s.is_confirmed()));
    }
}
