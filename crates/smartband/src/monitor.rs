//! The polling loop.
//!
//! A [`Monitor`] owns the sensor adapters, the fall detector, the vitals
//! estimator and the optional journal. Each tick it reads every adapter,
//! feeds the detector, publishes telemetry and exchanges alert requests and
//! reports with the dispatcher task. Nothing in a tick awaits I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::alert::{AlertOutcome, AlertReport, AlertRequest, DispatcherHandle};
use crate::classifier::{self, FallDetector, FallEvent, FallState};
use crate::config::Config;
use crate::sample::MotionSample;
use crate::sensors::{LocationTracker, SensorError, SensorSuite, TraceFrame, VitalsEstimator};
use crate::storage::Journal;
use crate::telemetry::SharedTelemetry;

/// Counters kept by the monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    /// Ticks processed.
    pub ticks: u64,
    /// Fall episodes confirmed.
    pub episodes: u64,
    /// Episodes whose alert was delivered or sent.
    pub alerts_sent: u64,
    /// Sensor reads that failed.
    pub sensor_errors: u64,
}

/// The episode the monitor is currently tracking.
#[derive(Debug, Clone, Copy)]
struct ActiveEpisode {
    start: Duration,
    journal_id: Option<i64>,
    request_in_flight: bool,
    /// A final outcome arrived. Only a connect failure leaves this unset.
    alert_settled: bool,
}

/// Sensor polling loop.
pub struct Monitor {
    sensors: SensorSuite,
    detector: Box<dyn FallDetector>,
    vitals: VitalsEstimator,
    location: LocationTracker,
    telemetry: SharedTelemetry,
    journal: Option<Journal>,
    alerts: Option<DispatcherHandle>,
    poll_interval: Duration,
    max_ticks: Option<u64>,
    running: Arc<AtomicBool>,
    episode: Option<ActiveEpisode>,
    stats: MonitorStats,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("detector", &self.detector)
            .field("poll_interval", &self.poll_interval)
            .field("max_ticks", &self.max_ticks)
            .field("journal", &self.journal.as_ref().map(Journal::path))
            .field("alerts", &self.alerts.is_some())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    /// Create a monitor using the configured classifier and poll interval.
    #[must_use]
    pub fn new(config: &Config, sensors: SensorSuite, telemetry: SharedTelemetry) -> Self {
        Self {
            sensors,
            detector: classifier::from_config(&config.classifier),
            vitals: VitalsEstimator::new(),
            location: LocationTracker::new(config.default_location()),
            telemetry,
            journal: None,
            alerts: None,
            poll_interval: config.poll_interval(),
            max_ticks: None,
            running: Arc::new(AtomicBool::new(false)),
            episode: None,
            stats: MonitorStats::default(),
        }
    }

    /// Record episodes in `journal`.
    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Send alert requests to a running dispatcher.
    #[must_use]
    pub fn with_alerts(mut self, alerts: DispatcherHandle) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Stop [`Monitor::run`] after `ticks` ticks.
    #[must_use]
    pub fn with_max_ticks(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    /// Current classifier state.
    #[must_use]
    pub fn fall_state(&self) -> FallState {
        self.detector.state()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        self.stats
    }

    /// Shared telemetry written by this monitor.
    #[must_use]
    pub fn telemetry(&self) -> &SharedTelemetry {
        &self.telemetry
    }

    /// Journal, if journaling is on.
    #[must_use]
    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// Whether [`Monitor::run`] is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handle that stops the loop from another task.
    #[must_use]
    pub fn stop_handle(&self) -> MonitorHandle {
        MonitorHandle {
            running: Arc::clone(&self.running),
        }
    }

    /// Run one iteration at elapsed time `now`.
    ///
    /// Returns the classifier event produced by this tick, if any.
    pub fn tick(&mut self, now: Duration) -> Option<FallEvent> {
        self.stats.ticks += 1;

        match self.sensors.gps.poll_fix() {
            Ok(Some(fix)) => {
                self.location.update(fix);
            }
            Ok(None) => {}
            Err(e) => self.sensor_failed("gps", &e),
        }
        match self.sensors.pulse.read_pulse() {
            Ok(Some(reading)) => self.vitals.update_pulse(reading, now),
            Ok(None) => {}
            Err(e) => self.sensor_failed("pulse", &e),
        }
        match self.sensors.thermometer.read_celsius() {
            Ok(Some(celsius)) => self.vitals.update_temperature(celsius),
            Ok(None) => {}
            Err(e) => self.sensor_failed("thermometer", &e),
        }
        let sample = match self.sensors.imu.read_motion() {
            Ok(reading) => reading.map(|imu| MotionSample::new(imu.accel, imu.gyro, now)),
            Err(e) => {
                self.sensor_failed("imu", &e);
                None
            }
        };

        let event = match &sample {
            Some(sample) => self.detector.update(sample),
            None => self.detector.advance(now),
        };
        if let Some(event) = event {
            self.handle_event(event);
        }

        self.drain_reports();
        self.request_alert();
        self.publish(sample.as_ref());

        trace!(tick = self.stats.ticks, state = %self.detector.state(), "Tick complete");
        event
    }

    /// Poll at the configured interval until stopped.
    ///
    /// On exit the dispatcher queue is closed and the task is awaited, so an
    /// alert already being sent gets to finish.
    pub async fn run(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Monitor already running");
            return;
        }

        info!(
            interval_ms = self.poll_interval.as_millis(),
            policy = %self.detector.policy(),
            "Starting monitor"
        );

        let start = Instant::now();
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            self.tick(start.elapsed());

            if self.max_ticks.is_some_and(|max| self.stats.ticks >= max) {
                debug!(ticks = self.stats.ticks, "Tick limit reached");
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(alerts) = self.alerts.take() {
            alerts.shutdown().await;
        }
        info!(
            ticks = self.stats.ticks,
            episodes = self.stats.episodes,
            "Monitor stopped"
        );
    }

    fn sensor_failed(&mut self, sensor: &'static str, error: &SensorError) {
        self.stats.sensor_errors += 1;
        warn!(sensor, error = %error, "Sensor read failed");
    }

    fn handle_event(&mut self, event: FallEvent) {
        match event {
            FallEvent::Confirmed { episode_start, .. } => {
                self.stats.episodes += 1;
                let location = self.location.current();
                warn!(
                    lat = location.latitude,
                    lon = location.longitude,
                    "FALL DETECTED"
                );
                let journal_id = self.journal.as_ref().and_then(|journal| {
                    journal
                        .record_episode(Utc::now(), self.detector.policy(), location)
                        .map_err(|e| warn!(error = %e, "Failed to journal fall episode"))
                        .ok()
                });
                self.episode = Some(ActiveEpisode {
                    start: episode_start,
                    journal_id,
                    request_in_flight: false,
                    alert_settled: false,
                });
            }
            FallEvent::Cleared { .. } => {
                if let Some(episode) = self.episode.take() {
                    if let (Some(journal), Some(id)) = (&self.journal, episode.journal_id) {
                        if let Err(e) = journal.record_cleared(id, Utc::now()) {
                            warn!(error = %e, "Failed to journal episode clearance");
                        }
                    }
                }
            }
        }
    }

    fn drain_reports(&mut self) {
        let mut reports = Vec::new();
        if let Some(alerts) = self.alerts.as_mut() {
            while let Some(report) = alerts.try_report() {
                reports.push(report);
            }
        }
        for report in reports {
            self.apply_report(report);
        }
    }

    fn apply_report(&mut self, report: AlertReport) {
        let current = self
            .episode
            .as_mut()
            .filter(|episode| episode.start == report.episode_start);

        if let Some(episode) = current {
            episode.request_in_flight = false;
            episode.alert_settled = !matches!(report.outcome, AlertOutcome::ConnectFailed { .. });
            if report.outcome.counts_as_alerted() {
                self.detector.mark_alerted();
                self.stats.alerts_sent += 1;
            }
        }

        if let (Some(journal), Some(id)) = (&self.journal, report.journal_id) {
            if let Err(e) = journal.record_alert(id, &report.outcome) {
                warn!(error = %e, "Failed to journal alert outcome");
            }
        }
    }

    fn request_alert(&mut self) {
        let Some(alerts) = self.alerts.as_ref() else {
            return;
        };
        let Some(episode) = self.episode.as_mut() else {
            return;
        };
        if episode.request_in_flight
            || episode.alert_settled
            || !self.detector.state().needs_alert()
        {
            return;
        }

        let request = AlertRequest {
            episode_start: episode.start,
            location: self.location.current(),
            journal_id: episode.journal_id,
        };
        episode.request_in_flight = alerts.request(request);
    }

    fn publish(&self, sample: Option<&MotionSample>) {
        let vitals = self.vitals.snapshot();
        let location = self.location.current();
        let has_fix = self.location.has_fix();
        let fall = self.detector.state();
        self.telemetry.update(|state| {
            state.vitals = vitals;
            state.location = location;
            state.has_fix = has_fix;
            state.fall = fall;
            if let Some(sample) = sample {
                state.set_motion(sample);
            }
        });
    }
}

/// Stops a running [`Monitor`] from another task.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
}

impl MonitorHandle {
    /// Ask the monitor to stop after the current tick.
    pub fn stop(&self) {
        debug!("Stopping monitor");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the monitor is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// One state change seen while replaying a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    /// Trace time in milliseconds.
    pub t_ms: u64,
    /// State entered.
    pub state: FallState,
    /// Event emitted on this frame, if any.
    pub event: Option<FallEvent>,
}

/// Result of classifying a recorded trace offline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Frames read.
    pub frames: usize,
    /// Frames that carried motion data.
    pub motion_frames: usize,
    /// Every state change, in order.
    pub transitions: Vec<Transition>,
    /// Confirmed episodes.
    pub episodes: usize,
}

/// Feed a trace through `detector` using the recorded timestamps.
pub fn replay(frames: &[TraceFrame], detector: &mut dyn FallDetector) -> ReplayReport {
    let mut report = ReplayReport {
        frames: frames.len(),
        ..ReplayReport::default()
    };
    let mut previous = detector.state();

    for frame in frames {
        let event = match frame.motion_sample() {
            Some(sample) => {
                report.motion_frames += 1;
                detector.update(&sample)
            }
            None => detector.advance(frame.timestamp()),
        };
        if matches!(event, Some(FallEvent::Confirmed { .. })) {
            report.episodes += 1;
        }
        let state = detector.state();
        if std::mem::discriminant(&state) != std::mem::discriminant(&previous) || event.is_some()
        {
            report.transitions.push(Transition {
                t_ms: frame.t_ms,
                state,
                event,
            });
        }
        previous = state;
    }
    report
}
