//! Trace-backed sensor adapters.
//!
//! A trace is a JSON-lines recording with one object per tick. Replaying it
//! drives the monitor without hardware, and the offline `replay` command uses
//! the same frames to exercise the classifier on recorded data.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    GpsReceiver, ImuReading, InertialUnit, PulseReading, PulseSensor, SensorSuite, Thermometer,
};
use crate::error::{Error, Result};
use crate::sample::{LocationFix, MotionSample};

/// One recorded tick. Absent fields mean "no new data".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    /// Milliseconds since the start of the recording.
    pub t_ms: u64,
    /// Pulse front-end reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulse: Option<PulseReading>,
    /// Body temperature (°C).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_c: Option<f64>,
    /// Acceleration (m/s²).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accel: Option<[f64; 3]>,
    /// Angular rate (deg/s). Treated as zero when `accel` is present alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gyro: Option<[f64; 3]>,
    /// Satellite fix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<LocationFix>,
}

impl TraceFrame {
    /// Recording timestamp as a Duration.
    #[must_use]
    pub fn timestamp(&self) -> Duration {
        Duration::from_millis(self.t_ms)
    }

    /// IMU reading for this frame, if the frame carries acceleration.
    #[must_use]
    pub fn imu(&self) -> Option<ImuReading> {
        self.accel.map(|accel| ImuReading {
            accel,
            gyro: self.gyro.unwrap_or([0.0; 3]),
        })
    }

    /// Motion sample stamped with the recording time.
    #[must_use]
    pub fn motion_sample(&self) -> Option<MotionSample> {
        self.imu()
            .map(|imu| MotionSample::new(imu.accel, imu.gyro, self.timestamp()))
    }
}

/// Parse a JSON-lines trace.
///
/// Blank lines and lines starting with `#` are skipped.
///
/// # Errors
///
/// Returns [`Error::TraceParse`] with the 1-based line number of the first
/// line that is not a valid frame, or an I/O error.
pub fn parse_trace(reader: impl BufRead) -> Result<Vec<TraceFrame>> {
    let mut frames = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let frame = serde_json::from_str(trimmed).map_err(|source| Error::TraceParse {
            line: index + 1,
            source,
        })?;
        frames.push(frame);
    }
    Ok(frames)
}

/// A loaded trace that can be turned into sensor adapters.
#[derive(Debug, Clone, Default)]
pub struct ReplaySensors {
    frames: Vec<TraceFrame>,
}

impl ReplaySensors {
    /// Wrap already-parsed frames.
    #[must_use]
    pub fn from_frames(frames: Vec<TraceFrame>) -> Self {
        Self { frames }
    }

    /// Load a trace file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self::from_frames(parse_trace(BufReader::new(file))?))
    }

    /// Recorded frames.
    #[must_use]
    pub fn frames(&self) -> &[TraceFrame] {
        &self.frames
    }

    /// Number of ticks in the trace.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the trace has no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Split the trace into one adapter per modality.
    ///
    /// Each adapter yields its recorded value once per read, in frame order.
    /// With `looping` the adapters wrap around at the end of the trace;
    /// otherwise they report no data once exhausted.
    #[must_use]
    pub fn into_suite(self, looping: bool) -> SensorSuite {
        let pulse = self.frames.iter().map(|f| f.pulse).collect();
        let temperature = self.frames.iter().map(|f| f.temp_c).collect();
        let motion = self.frames.iter().map(TraceFrame::imu).collect();
        let fixes = self.frames.iter().map(|f| f.fix).collect();

        SensorSuite {
            pulse: Box::new(ReplayChannel::<PulseReading>::new(pulse, looping)),
            thermometer: Box::new(ReplayChannel::<f64>::new(temperature, looping)),
            imu: Box::new(ReplayChannel::<ImuReading>::new(motion, looping)),
            gps: Box::new(ReplayChannel::<LocationFix>::new(fixes, looping)),
        }
    }
}

/// Per-modality cursor over recorded values.
#[derive(Debug, Clone)]
pub struct ReplayChannel<T> {
    items: Vec<Option<T>>,
    position: usize,
    looping: bool,
}

impl<T: Copy> ReplayChannel<T> {
    /// Create a channel over `items`.
    #[must_use]
    pub fn new(items: Vec<Option<T>>, looping: bool) -> Self {
        Self {
            items,
            position: 0,
            looping,
        }
    }

    fn next_item(&mut self) -> Option<T> {
        if self.position >= self.items.len() {
            if !self.looping || self.items.is_empty() {
                return None;
            }
            self.position = 0;
        }
        let item = self.items.get(self.position).copied().flatten();
        self.position += 1;
        item
    }
}

impl PulseSensor for ReplayChannel<PulseReading> {
    fn read_pulse(&mut self) -> super::Result<Option<PulseReading>> {
        Ok(self.next_item())
    }
}

impl Thermometer for ReplayChannel<f64> {
    fn read_celsius(&mut self) -> super::Result<Option<f64>> {
        Ok(self.next_item())
    }
}

impl InertialUnit for ReplayChannel<ImuReading> {
    fn read_motion(&mut self) -> super::Result<Option<ImuReading>> {
        Ok(self.next_item())
    }
}

impl GpsReceiver for ReplayChannel<LocationFix> {
    fn poll_fix(&mut self) -> super::Result<Option<LocationFix>> {
        Ok(self.next_item())
    }
}
