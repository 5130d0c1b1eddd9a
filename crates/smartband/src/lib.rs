//! `smartband` - wearable health and fall monitor
//!
//! This library polls vital-sign, motion and position sensors, classifies
//! falls from the motion stream, publishes live telemetry over HTTP and
//! dispatches caregiver notifications when a fall is confirmed.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod alert;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod sample;
pub mod sensors;
pub mod server;
pub mod storage;
pub mod telemetry;

pub use alert::{AlertDispatcher, AlertOutcome};
pub use classifier::{FallDetector, FallEvent, FallState};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use monitor::{Monitor, MonitorHandle};
pub use sample::{LocationFix, MotionSample, VitalsSnapshot};
pub use storage::{Journal, JournalStats};
pub use telemetry::{SharedTelemetry, TelemetrySnapshot};
