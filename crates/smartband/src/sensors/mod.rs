//! Sensor adapter interfaces.
//!
//! Hardware drivers implement one pull-based trait per modality. Every read
//! returns `Ok(None)` when the device has nothing new this tick, so the
//! monitor can retain the previous value instead of zeroing it.
//!
//! This module also holds the small amount of signal logic that sits between
//! raw readings and the published vitals: heart-rate timing from beat
//! events, the SpO2 proxy mapping, and last-known-location tracking.

pub mod replay;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::sample::{LocationFix, VitalsSnapshot, SPO2_MAX, SPO2_MIN};

pub use replay::{ReplaySensors, TraceFrame};

/// Errors reported by sensor adapters.
#[derive(Debug, Error)]
pub enum SensorError {
    /// The device did not answer on its bus.
    #[error("device not responding: {0}")]
    NotResponding(String),

    /// The device answered with data that could not be decoded.
    #[error("malformed reading: {0}")]
    Malformed(String),

    /// The device is still initialising.
    #[error("device not ready")]
    NotReady,
}

/// Result type for sensor reads.
pub type Result<T> = std::result::Result<T, SensorError>;

/// One reading from the optical pulse front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseReading {
    /// Infrared reflectance count.
    pub ir: u32,
    /// Whether the front-end detected a beat on this reading.
    pub beat: bool,
}

/// One reading from the inertial measurement unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    /// Acceleration (m/s²).
    pub accel: [f64; 3],
    /// Angular rate (deg/s).
    pub gyro: [f64; 3],
}

/// Heart-rate / oximeter front-end.
pub trait PulseSensor: Send {
    /// Read the latest pulse sample, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the device could not be read.
    fn read_pulse(&mut self) -> Result<Option<PulseReading>>;
}

/// Body temperature reader.
pub trait Thermometer: Send {
    /// Read the latest object temperature in degrees Celsius, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the device could not be read.
    fn read_celsius(&mut self) -> Result<Option<f64>>;
}

/// Accelerometer and gyroscope.
pub trait InertialUnit: Send {
    /// Read the latest motion sample, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the device could not be read.
    fn read_motion(&mut self) -> Result<Option<ImuReading>>;
}

/// Satellite position receiver.
pub trait GpsReceiver: Send {
    /// Drain buffered receiver data and return a fix if a valid one is
    /// available.
    ///
    /// # Errors
    ///
    /// Returns an error if the receiver stream could not be read.
    fn poll_fix(&mut self) -> Result<Option<LocationFix>>;
}

/// The full set of adapters the monitor polls each tick.
pub struct SensorSuite {
    /// Pulse front-end.
    pub pulse: Box<dyn PulseSensor>,
    /// Temperature reader.
    pub thermometer: Box<dyn Thermometer>,
    /// Inertial unit.
    pub imu: Box<dyn InertialUnit>,
    /// Position receiver.
    pub gps: Box<dyn GpsReceiver>,
}

impl std::fmt::Debug for SensorSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorSuite").finish_non_exhaustive()
    }
}

/// IR level below which no finger is considered present.
const FINGER_PRESENT_IR: u32 = 50_000;

/// IR range mapped onto the SpO2 proxy scale.
const SPO2_IR_LOW: i64 = 5_000;
const SPO2_IR_HIGH: i64 = 60_000;

/// Plausible heart-rate range; anything outside is a timing artefact.
const MIN_PLAUSIBLE_BPM: u64 = 20;
const MAX_PLAUSIBLE_BPM: u64 = 250;

/// Turns raw pulse and temperature readings into a [`VitalsSnapshot`].
#[derive(Debug, Default)]
pub struct VitalsEstimator {
    vitals: VitalsSnapshot,
    last_beat: Option<Duration>,
}

impl VitalsEstimator {
    /// Create an estimator with unknown vitals.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a pulse reading taken at `now` into the estimate.
    pub fn update_pulse(&mut self, reading: PulseReading, now: Duration) {
        if reading.ir > FINGER_PRESENT_IR && reading.beat {
            if let Some(previous) = self.last_beat {
                let interval_ms = now.saturating_sub(previous).as_millis();
                if interval_ms > 0 {
                    let bpm = u64::try_from(60_000 / interval_ms).unwrap_or(u64::MAX);
                    if (MIN_PLAUSIBLE_BPM..=MAX_PLAUSIBLE_BPM).contains(&bpm) {
                        self.vitals.heart_rate_bpm = u16::try_from(bpm).unwrap_or(u16::MAX);
                    } else {
                        debug!(bpm, "Discarding implausible heart rate");
                    }
                }
            }
            self.last_beat = Some(now);
        }
        self.vitals.spo2_percent = spo2_from_ir(reading.ir);
    }

    /// Record a new body temperature.
    pub fn update_temperature(&mut self, celsius: f64) {
        if celsius.is_finite() {
            self.vitals.body_temp_c = celsius;
        }
    }

    /// Current estimate.
    #[must_use]
    pub fn snapshot(&self) -> VitalsSnapshot {
        self.vitals
    }
}

/// Map an IR count linearly onto the 90..=100 SpO2 proxy scale.
#[must_use]
pub fn spo2_from_ir(ir: u32) -> u8 {
    let span_out = i64::from(SPO2_MAX - SPO2_MIN);
    let mapped = (i64::from(ir) - SPO2_IR_LOW) * span_out / (SPO2_IR_HIGH - SPO2_IR_LOW)
        + i64::from(SPO2_MIN);
    let clamped = mapped.clamp(i64::from(SPO2_MIN), i64::from(SPO2_MAX));
    u8::try_from(clamped).unwrap_or(SPO2_MIN)
}

/// Keeps the last valid position.
///
/// Starts at the configured default and never falls back to it once a real
/// fix has been seen.
#[derive(Debug, Clone, Copy)]
pub struct LocationTracker {
    current: LocationFix,
    has_fix: bool,
}

impl LocationTracker {
    /// Create a tracker reporting `default` until the first fix.
    #[must_use]
    pub fn new(default: LocationFix) -> Self {
        Self {
            current: default,
            has_fix: false,
        }
    }

    /// Apply a new fix. Invalid coordinates are ignored.
    ///
    /// Returns `true` if the fix was accepted.
    pub fn update(&mut self, fix: LocationFix) -> bool {
        if !fix.is_valid() {
            debug!(?fix, "Ignoring out-of-range location fix");
            return false;
        }
        self.current = fix;
        self.has_fix = true;
        true
    }

    /// Current best position.
    #[must_use]
    pub fn current(&self) -> LocationFix {
        self.current
    }

    /// Whether a satellite fix has ever been obtained.
    #[must_use]
    pub fn has_fix(&self) -> bool {
        self.has_fix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beat(ir: u32) -> PulseReading {
        PulseReading { ir, beat: true }
    }

    #[test]
    fn test_spo2_mapping_bounds() {
        assert_eq!(spo2_from_ir(0), 90);
        assert_eq!(spo2_from_ir(5_000), 90);
        assert_eq!(spo2_from_ir(60_000), 100);
        assert_eq!(spo2_from_ir(200_000), 100);
    }

    #[test]
    fn test_spo2_mapping_midpoint() {
        // (32_500 - 5_000) * 10 / 55_000 = 5
        assert_eq!(spo2_from_ir(32_500), 95);
    }

    #[test]
    fn test_first_beat_only_arms_timer() {
        let mut estimator = VitalsEstimator::new();
        estimator.update_pulse(beat(60_000), Duration::from_millis(1_000));
        assert_eq!(estimator.snapshot().heart_rate_bpm, 0);
    }

    #[test]
    fn test_heart_rate_from_beat_interval() {
        let mut estimator = VitalsEstimator::new();
        estimator.update_pulse(beat(60_000), Duration::from_millis(1_000));
        estimator.update_pulse(beat(60_000), Duration::from_millis(1_800));
        assert_eq!(estimator.snapshot().heart_rate_bpm, 75);
    }

    #[test]
    fn test_beat_ignored_without_finger() {
        let mut estimator = VitalsEstimator::new();
        estimator.update_pulse(beat(10_000), Duration::from_millis(0));
        estimator.update_pulse(beat(10_000), Duration::from_millis(1_000));
        assert_eq!(estimator.snapshot().heart_rate_bpm, 0);
    }

    #[test]
    fn test_implausible_heart_rate_retains_previous() {
        let mut estimator = VitalsEstimator::new();
        estimator.update_pulse(beat(60_000), Duration::from_millis(0));
        estimator.update_pulse(beat(60_000), Duration::from_millis(1_000));
        assert_eq!(estimator.snapshot().heart_rate_bpm, 60);

        // 100 ms apart would be 600 bpm
        estimator.update_pulse(beat(60_000), Duration::from_millis(1_100));
        assert_eq!(estimator.snapshot().heart_rate_bpm, 60);
    }

    #[test]
    fn test_temperature_ignores_non_finite() {
        let mut estimator = VitalsEstimator::new();
        estimator.update_temperature(36.6);
        estimator.update_temperature(f64::NAN);
        assert_eq!(estimator.snapshot().body_temp_c, 36.6);
    }

    #[test]
    fn test_location_tracker_default_until_fix() {
        let tracker = LocationTracker::new(LocationFix::new(11.0, 77.0));
        assert_eq!(tracker.current(), LocationFix::new(11.0, 77.0));
        assert!(!tracker.has_fix());
    }

    #[test]
    fn test_location_tracker_retains_last_fix() {
        let mut tracker = LocationTracker::new(LocationFix::default());
        assert!(tracker.update(LocationFix::new(48.85, 2.35)));
        assert!(!tracker.update(LocationFix::new(f64::NAN, 0.0)));
        assert_eq!(tracker.current(), LocationFix::new(48.85, 2.35));
        assert!(tracker.has_fix());
    }

    #[test]
    fn test_sensor_error_display() {
        assert!(SensorError::NotResponding("i2c".to_string())
            .to_string()
            .contains("not responding"));
        assert_eq!(SensorError::NotReady.to_string(), "device not ready");
    }
}
