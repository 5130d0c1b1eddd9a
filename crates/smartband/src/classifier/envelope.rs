//! Multi-trigger envelope detector.
//!
//! A fall shows up as a short free-fall dip in acceleration magnitude, an
//! impact spike, a burst of rotation while the body tips over, and then
//! stillness. Each stage must follow the previous one within a bounded number
//! of samples, and the detector advances at most one stage per sample.

use std::time::Duration;

use tracing::{debug, info, trace};

use super::{Episode, FallDetector, FallEvent, FallState};
use crate::config::{EnvelopeConfig, FallPolicy};
use crate::sample::MotionSample;

/// Internal stage of the envelope detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeStage {
    /// Waiting for a low-amplitude dip.
    #[default]
    Idle,
    /// Dip seen, waiting for an impact.
    LowAmp,
    /// Impact seen, waiting for a rotation burst.
    Impact,
    /// Rotation seen, waiting out the dwell before checking for rest.
    Settling,
    /// Fall confirmed and latched.
    Confirmed,
}

/// Policy A detector.
#[derive(Debug, Clone)]
pub struct EnvelopeDetector {
    config: EnvelopeConfig,
    stage: EnvelopeStage,
    /// Samples seen since entering the current stage.
    count: u32,
    /// Timestamp of the dip that started the current episode.
    since: Duration,
    episode: Option<Episode>,
}

impl EnvelopeDetector {
    /// Create an idle detector.
    #[must_use]
    pub fn new(config: EnvelopeConfig) -> Self {
        Self {
            config,
            stage: EnvelopeStage::Idle,
            count: 0,
            since: Duration::ZERO,
            episode: None,
        }
    }

    /// Current internal stage.
    #[must_use]
    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    fn enter(&mut self, stage: EnvelopeStage) {
        trace!(from = ?self.stage, to = ?stage, "Envelope stage change");
        self.stage = stage;
        self.count = 0;
    }

    fn abandon(&mut self, reason: &'static str) {
        debug!(stage = ?self.stage, reason, "Fall candidate abandoned");
        self.enter(EnvelopeStage::Idle);
    }

    fn in_rotation_band(&self, rate: f64) -> bool {
        (self.config.rotation_min_dps..=self.config.rotation_max_dps).contains(&rate)
    }

    /// Clear a confirmed episode once the latch has run out.
    fn expire_latch(&mut self, now: Duration) -> Option<FallEvent> {
        let confirmed_at = self.episode.map_or(now, |e| e.confirmed_at);
        if now.saturating_sub(confirmed_at) < self.config.latch() {
            return None;
        }
        info!(at_ms = now.as_millis(), "Fall latch expired");
        self.reset();
        Some(FallEvent::Cleared { at: now })
    }
}

impl FallDetector for EnvelopeDetector {
    fn policy(&self) -> FallPolicy {
        FallPolicy::Envelope
    }

    fn update(&mut self, sample: &MotionSample) -> Option<FallEvent> {
        let now = sample.timestamp;
        let amp = sample.acceleration_g();
        let rate = sample.rotation_rate();

        match self.stage {
            EnvelopeStage::Idle => {
                if amp <= self.config.low_threshold_g {
                    self.since = now;
                    self.enter(EnvelopeStage::LowAmp);
                }
                None
            }
            EnvelopeStage::LowAmp => {
                self.count += 1;
                if amp >= self.config.high_threshold_g {
                    self.enter(EnvelopeStage::Impact);
                } else if self.count >= self.config.impact_window {
                    self.abandon("no impact");
                }
                None
            }
            EnvelopeStage::Impact => {
                self.count += 1;
                if self.in_rotation_band(rate) {
                    self.enter(EnvelopeStage::Settling);
                } else if self.count >= self.config.rotation_window {
                    self.abandon("no rotation");
                }
                None
            }
            EnvelopeStage::Settling => {
                self.count += 1;
                if self.count < self.config.settle_dwell {
                    return None;
                }
                if rate > self.config.rest_max_dps {
                    self.abandon("still moving");
                    return None;
                }
                let episode = Episode {
                    since: self.since,
                    confirmed_at: now,
                    alerted: false,
                };
                self.enter(EnvelopeStage::Confirmed);
                self.episode = Some(episode);
                info!(
                    episode_start_ms = self.since.as_millis(),
                    confirmed_at_ms = now.as_millis(),
                    "Fall confirmed"
                );
                Some(episode.confirmed_event())
            }
            EnvelopeStage::Confirmed => self.expire_latch(now),
        }
    }

    fn advance(&mut self, now: Duration) -> Option<FallEvent> {
        if self.stage == EnvelopeStage::Confirmed {
            self.expire_latch(now)
        } else {
            None
        }
    }

    fn state(&self) -> FallState {
        match self.stage {
            EnvelopeStage::Idle => FallState::Idle,
            EnvelopeStage::LowAmp | EnvelopeStage::Impact | EnvelopeStage::Settling => {
                FallState::Candidate { since: self.since }
            }
            EnvelopeStage::Confirmed => self
                .episode
                .map_or(FallState::Idle, |episode| episode.state()),
        }
    }

    fn mark_alerted(&mut self) {
        if let Some(episode) = self.episode.as_mut() {
            episode.alerted = true;
        }
    }

    fn reset(&mut self) {
        self.enter(EnvelopeStage::Idle);
        self.since = Duration::ZERO;
        self.episode = None;
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::sample;
    use super::*;

    const STEP_MS: u64 = 100;

    /// Feed `(amp_g, rate_dps)` pairs at 10 Hz starting at `start_ms`.
    fn feed(
        detector: &mut EnvelopeDetector,
        start_ms: u64,
        samples: &[(f64, f64)],
    ) -> Vec<FallEvent> {
        samples
            .iter()
            .enumerate()
            .filter_map(|(i, &(amp, rate))| {
                detector.update(&sample(amp, rate, start_ms + i as u64 * STEP_MS))
            })
            .collect()
    }

    /// Dip, impact, rotation, then ten still samples.
    fn canonical_fall() -> Vec<(f64, f64)> {
        let mut samples = vec![(1.0, 0.0), (0.3, 0.0), (2.5, 0.0), (1.2, 200.0)];
        samples.extend(std::iter::repeat((1.0, 2.0)).take(10));
        samples
    }

    #[test]
    fn test_normal_activity_never_confirms() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        // Walking: amplitude around 1 g, moderate rotation.
        let walking: Vec<(f64, f64)> = (0..200)
            .map(|i| {
                let phase = f64::from(i % 8);
                (0.9 + phase * 0.05, 20.0 + phase * 10.0)
            })
            .collect();

        let events = feed(&mut detector, 0, &walking);
        assert!(events.is_empty());
        assert_eq!(detector.state(), FallState::Idle);
    }

    #[test]
    fn test_canonical_envelope_confirms_once() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        let events = feed(&mut detector, 0, &canonical_fall());

        assert_eq!(
            events,
            vec![FallEvent::Confirmed {
                episode_start: Duration::from_millis(100),
                confirmed_at: Duration::from_millis(1_300),
            }]
        );
        assert!(detector.state().is_confirmed());
        assert_eq!(detector.stage(), EnvelopeStage::Confirmed);

        // Still lying down: no second confirmation while latched.
        let more = feed(&mut detector, 1_400, &[(0.2, 0.0), (3.0, 100.0), (1.0, 0.0)]);
        assert!(more.is_empty());
        assert!(detector.state().is_confirmed());
    }

    #[test]
    fn test_candidate_reported_during_envelope() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        feed(&mut detector, 0, &[(1.0, 0.0), (0.3, 0.0)]);
        assert_eq!(detector.stage(), EnvelopeStage::LowAmp);
        assert_eq!(
            detector.state(),
            FallState::Candidate {
                since: Duration::from_millis(100)
            }
        );
    }

    #[test]
    fn test_dip_without_impact_returns_to_idle() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        let mut samples = vec![(0.3, 0.0)];
        samples.extend(std::iter::repeat((0.6, 0.0)).take(6));

        let events = feed(&mut detector, 0, &samples);
        assert!(events.is_empty());
        assert_eq!(detector.stage(), EnvelopeStage::Idle);
    }

    #[test]
    fn test_impact_without_rotation_returns_to_idle() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        let mut samples = vec![(0.3, 0.0), (2.0, 0.0)];
        // Rotation above the band does not count.
        samples.extend(std::iter::repeat((1.0, 800.0)).take(6));

        feed(&mut detector, 0, &samples);
        assert_eq!(detector.stage(), EnvelopeStage::Idle);
    }

    #[test]
    fn test_movement_after_dwell_returns_to_idle() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        let mut samples = vec![(0.3, 0.0), (2.0, 0.0), (1.0, 150.0)];
        // Getting straight back up: still rotating when the dwell ends.
        samples.extend(std::iter::repeat((1.0, 60.0)).take(10));

        let events = feed(&mut detector, 0, &samples);
        assert!(events.is_empty());
        assert_eq!(detector.state(), FallState::Idle);
    }

    #[test]
    fn test_single_sample_dip_does_not_confirm() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        let mut samples = vec![(0.1, 0.0)];
        samples.extend(std::iter::repeat((1.0, 0.0)).take(20));

        assert!(feed(&mut detector, 0, &samples).is_empty());
        assert_eq!(detector.state(), FallState::Idle);
    }

    #[test]
    fn test_latch_clears_after_window() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        feed(&mut detector, 0, &canonical_fall());
        let confirmed_at = 1_300;

        assert!(detector
            .update(&sample(1.0, 0.0, confirmed_at + 29_900))
            .is_none());
        assert!(detector.state().is_confirmed());

        let event = detector.update(&sample(1.0, 0.0, confirmed_at + 30_000));
        assert_eq!(
            event,
            Some(FallEvent::Cleared {
                at: Duration::from_millis(confirmed_at + 30_000)
            })
        );
        assert_eq!(detector.state(), FallState::Idle);
    }

    #[test]
    fn test_latch_expires_without_samples() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        feed(&mut detector, 0, &canonical_fall());

        assert!(detector.advance(Duration::from_millis(20_000)).is_none());
        assert!(detector.state().is_confirmed());

        let event = detector.advance(Duration::from_millis(31_300));
        assert_eq!(
            event,
            Some(FallEvent::Cleared {
                at: Duration::from_millis(31_300)
            })
        );
        assert_eq!(detector.state(), FallState::Idle);
    }

    #[test]
    fn test_advance_does_not_move_candidate() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        feed(&mut detector, 0, &[(1.0, 0.0), (0.3, 0.0)]);
        assert_eq!(detector.stage(), EnvelopeStage::LowAmp);

        assert!(detector.advance(Duration::from_secs(60)).is_none());
        assert_eq!(detector.stage(), EnvelopeStage::LowAmp);
    }

    #[test]
    fn test_second_fall_after_latch_confirms_again() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        feed(&mut detector, 0, &canonical_fall());
        detector.update(&sample(1.0, 0.0, 31_300));
        assert_eq!(detector.state(), FallState::Idle);

        let events = feed(&mut detector, 40_000, &canonical_fall());
        assert_eq!(events.len(), 1);
        assert!(detector.state().needs_alert());
    }

    #[test]
    fn test_mark_alerted_only_when_confirmed() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        detector.mark_alerted();
        assert_eq!(detector.state(), FallState::Idle);

        feed(&mut detector, 0, &canonical_fall());
        assert!(detector.state().needs_alert());
        detector.mark_alerted();
        assert!(matches!(
            detector.state(),
            FallState::Confirmed { alerted: true, .. }
        ));
    }

    #[test]
    fn test_reset_drops_episode() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig::default());
        feed(&mut detector, 0, &canonical_fall());
        detector.reset();
        assert_eq!(detector.state(), FallState::Idle);
        assert_eq!(detector.stage(), EnvelopeStage::Idle);
    }

    #[test]
    fn test_custom_thresholds() {
        let config = EnvelopeConfig {
            settle_dwell: 2,
            ..EnvelopeConfig::default()
        };
        let mut detector = EnvelopeDetector::new(config);
        let events = feed(
            &mut detector,
            0,
            &[(0.3, 0.0), (2.0, 0.0), (1.0, 100.0), (1.0, 0.0), (1.0, 0.0)],
        );
        assert_eq!(events.len(), 1);
    }
}
