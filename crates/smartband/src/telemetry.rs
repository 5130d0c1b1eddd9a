//! Live state shared between the monitor loop and the HTTP layer.
//!
//! The monitor writes a [`TelemetryState`] once per tick; readers take a
//! [`TelemetrySnapshot`] under the same lock so a snapshot never mixes two
//! ticks.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::classifier::FallState;
use crate::sample::{LocationFix, MotionSample, VitalsSnapshot};

/// Latest readings and classifier state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryState {
    /// Current vitals.
    pub vitals: VitalsSnapshot,
    /// Last known position.
    pub location: LocationFix,
    /// Whether the position came from a real fix.
    pub has_fix: bool,
    /// Latest raw acceleration (m/s²).
    pub acceleration: [f64; 3],
    /// Current classifier state.
    pub fall: FallState,
}

impl TelemetryState {
    /// Record the latest motion sample.
    pub fn set_motion(&mut self, sample: &MotionSample) {
        self.acceleration = sample.acceleration();
    }

    /// Render the published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            hr: self.vitals.heart_rate_bpm,
            spo2: self.vitals.spo2_percent,
            temp: self.vitals.body_temp_c,
            fall: self.fall.label().to_string(),
            lat: self.location.latitude,
            lon: self.location.longitude,
            acc_x: self.acceleration[0],
            acc_y: self.acceleration[1],
            acc_z: self.acceleration[2],
        }
    }
}

/// Flat JSON document served on `/data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Heart rate (bpm).
    pub hr: u16,
    /// Blood-oxygen proxy (percent).
    pub spo2: u8,
    /// Body temperature (°C).
    pub temp: f64,
    /// `"FALL"` while a fall is confirmed, otherwise `"NORMAL"`.
    pub fall: String,
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lon: f64,
    /// Acceleration X (m/s²).
    #[serde(rename = "accX")]
    pub acc_x: f64,
    /// Acceleration Y (m/s²).
    #[serde(rename = "accY")]
    pub acc_y: f64,
    /// Acceleration Z (m/s²).
    #[serde(rename = "accZ")]
    pub acc_z: f64,
}

/// Handle to the shared telemetry state.
#[derive(Debug, Clone, Default)]
pub struct SharedTelemetry {
    inner: Arc<RwLock<TelemetryState>>,
}

impl SharedTelemetry {
    /// Create shared state starting at `location`.
    #[must_use]
    pub fn new(location: LocationFix) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TelemetryState {
                location,
                ..TelemetryState::default()
            })),
        }
    }

    /// Apply an update under the write lock.
    ///
    /// A poisoned lock is recovered, since every field is overwritten on the
    /// next tick anyway.
    pub fn update(&self, f: impl FnOnce(&mut TelemetryState)) {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }

    /// Read a consistent snapshot.
    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Clone of the full state.
    #[must_use]
    pub fn state(&self) -> TelemetryState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_snapshot_field_names() {
        let telemetry = SharedTelemetry::new(LocationFix::new(11.0, 77.0));
        let json = serde_json::to_value(telemetry.snapshot()).unwrap();

        for field in ["hr", "spo2", "temp", "fall", "lat", "lon", "accX", "accY", "accZ"] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json.as_object().unwrap().len(), 9);
        assert_eq!(json["fall"], "NORMAL");
        assert_eq!(json["lat"], 11.0);
    }

    #[test]
    fn test_update_and_snapshot() {
        let telemetry = SharedTelemetry::default();
        telemetry.update(|state| {
            state.vitals = VitalsSnapshot {
                heart_rate_bpm: 72,
                spo2_percent: 97,
                body_temp_c: 36.6,
            };
            state.set_motion(&MotionSample::new(
                [0.1, 0.2, 9.8],
                [0.0; 3],
                Duration::ZERO,
            ));
            state.fall = FallState::Confirmed {
                since: Duration::ZERO,
                confirmed_at: Duration::from_secs(1),
                alerted: false,
            };
        });

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.hr, 72);
        assert_eq!(snapshot.spo2, 97);
        assert_eq!(snapshot.fall, "FALL");
        assert_eq!(snapshot.acc_z, 9.8);
    }

    #[test]
    fn test_snapshot_is_pure_read() {
        let telemetry = SharedTelemetry::new(LocationFix::new(1.0, 2.0));
        telemetry.update(|state| state.vitals.heart_rate_bpm = 80);
        assert_eq!(telemetry.snapshot(), telemetry.snapshot());
    }

    #[test]
    fn test_clones_share_state() {
        let telemetry = SharedTelemetry::default();
        let reader = telemetry.clone();
        telemetry.update(|state| state.has_fix = true);
        assert!(reader.state().has_fix);
    }

    #[test]
    fn test_poisoned_lock_is_recovered() {
        let telemetry = SharedTelemetry::default();
        let writer = telemetry.clone();
        let _ = std::thread::spawn(move || {
            writer.update(|_| panic!("poison the lock"));
        })
        .join();

        telemetry.update(|state| state.vitals.heart_rate_bpm = 65);
        assert_eq!(telemetry.snapshot().hr, 65);
    }
}
