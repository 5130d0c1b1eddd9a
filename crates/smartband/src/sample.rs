//! Core data model for smartband.
//!
//! Motion samples feed the fall classifier; vitals and location are the
//! latest-value snapshots published to the dashboard.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Standard gravity used to normalise acceleration into g units (m/s²).
pub const STANDARD_GRAVITY: f64 = 9.81;

/// Largest acceleration magnitude accepted per axis (m/s², ±16 g).
pub const MAX_ACCELERATION: f64 = 16.0 * STANDARD_GRAVITY;

/// Largest angular rate accepted per axis (deg/s).
pub const MAX_ANGULAR_RATE: f64 = 2000.0;

/// Lowest reported SpO2 proxy value (percent).
pub const SPO2_MIN: u8 = 90;

/// Highest reported SpO2 proxy value (percent).
pub const SPO2_MAX: u8 = 100;

/// Convert an angular rate from rad/s to deg/s.
#[must_use]
pub fn rad_to_deg(rate: f64) -> f64 {
    rate.to_degrees()
}

/// One tick of inertial data.
///
/// Acceleration is in m/s² and angular rate in deg/s. The timestamp is the
/// time elapsed since the monitor started, so classification depends only on
/// the sample stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// Acceleration along X (m/s²).
    pub accel_x: f64,
    /// Acceleration along Y (m/s²).
    pub accel_y: f64,
    /// Acceleration along Z, the vertical axis when worn (m/s²).
    pub accel_z: f64,
    /// Angular rate about X (deg/s).
    pub gyro_x: f64,
    /// Angular rate about Y (deg/s).
    pub gyro_y: f64,
    /// Angular rate about Z (deg/s).
    pub gyro_z: f64,
    /// Time since monitor start.
    pub timestamp: Duration,
}

impl MotionSample {
    /// Build a sample from acceleration and angular rate triples.
    ///
    /// Components are clamped into the valid sensor band; non-finite values
    /// become zero.
    #[must_use]
    pub fn new(accel: [f64; 3], gyro: [f64; 3], timestamp: Duration) -> Self {
        Self {
            accel_x: clamp_axis(accel[0], MAX_ACCELERATION),
            accel_y: clamp_axis(accel[1], MAX_ACCELERATION),
            accel_z: clamp_axis(accel[2], MAX_ACCELERATION),
            gyro_x: clamp_axis(gyro[0], MAX_ANGULAR_RATE),
            gyro_y: clamp_axis(gyro[1], MAX_ANGULAR_RATE),
            gyro_z: clamp_axis(gyro[2], MAX_ANGULAR_RATE),
            timestamp,
        }
    }

    /// Acceleration magnitude in g.
    #[must_use]
    pub fn acceleration_g(&self) -> f64 {
        let m = (self.accel_x.powi(2) + self.accel_y.powi(2) + self.accel_z.powi(2)).sqrt();
        m / STANDARD_GRAVITY
    }

    /// Angular rate magnitude in deg/s.
    #[must_use]
    pub fn rotation_rate(&self) -> f64 {
        (self.gyro_x.powi(2) + self.gyro_y.powi(2) + self.gyro_z.powi(2)).sqrt()
    }

    /// Raw acceleration triple (m/s²).
    #[must_use]
    pub fn acceleration(&self) -> [f64; 3] {
        [self.accel_x, self.accel_y, self.accel_z]
    }
}

fn clamp_axis(value: f64, limit: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-limit, limit)
    } else {
        0.0
    }
}

/// Latest vital signs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalsSnapshot {
    /// Heart rate in beats per minute, 0 when unknown.
    pub heart_rate_bpm: u16,
    /// Blood-oxygen proxy in percent, always within 90..=100.
    pub spo2_percent: u8,
    /// Body temperature in degrees Celsius.
    pub body_temp_c: f64,
}

impl Default for VitalsSnapshot {
    fn default() -> Self {
        Self {
            heart_rate_bpm: 0,
            spo2_percent: SPO2_MIN,
            body_temp_c: 0.0,
        }
    }
}

/// A geographic position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationFix {
    /// Latitude in degrees, positive north.
    #[serde(alias = "lat")]
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    #[serde(alias = "lon")]
    pub longitude: f64,
}

impl LocationFix {
    /// Create a new fix.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether the coordinates are finite and within geographic bounds.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Map link for this position, coordinates at 6 decimal places.
    #[must_use]
    pub fn map_link(&self) -> String {
        format!(
            "https://maps.google.com/?q={:.6},{:.6}",
            self.latitude, self.longitude
        )
    }
}
