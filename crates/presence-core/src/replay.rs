//! Offline replay of a recorded detection script.
//!
//! Drives a [`PresenceTracker`] with a [`ManualClock`] stepped by the
//! configured tick interval, so a script of minutes replays instantly and
//! always yields the same sessions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::clock::{duration_secs, Clock, ManualClock};
use crate::error::CoreError;
use crate::events::{Event, PersistOutcome, StopReason};
use crate::source::{DetectionScript, ScriptedDetector, ScriptedSource};
use crate::storage::{Config, SessionStore};
use crate::tracker::{PresenceTracker, RunPhase, TrackerSettings};

/// What a replay produced.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub events: Vec<Event>,
    pub sessions_saved: usize,
    /// Seconds in sessions that reached the store.
    pub saved_secs: f64,
    pub detections: usize,
    pub stop_reason: StopReason,
    /// Clock offset at which the tracker stopped.
    pub stopped_at_secs: f64,
}

/// Replay `script` from `origin`, writing closed sessions to `store`.
///
/// Runs until the script's last entry has been seen and any trailing absence
/// had time to close, then stops the tracker. Stops earlier if the script
/// loses the stream.
///
/// # Errors
/// Returns an error if the tracker cannot start.
pub fn replay<S: SessionStore>(
    script: DetectionScript,
    store: S,
    config: &Config,
    origin: DateTime<Utc>,
) -> Result<ReplayReport, CoreError> {
    let settings = TrackerSettings::from_config(config);
    let t = &config.tracker;
    let step_secs = t.tick_interval_ms.max(1) as f64 / 1000.0;
    let horizon = script.span_secs() + t.absence_threshold_secs + 2.0 * t.fast_interval_secs;

    let script = Arc::new(script);
    let clock = ManualClock::new(origin);
    let source = ScriptedSource::new(script.clone(), clock.clone(), origin);
    let detector = ScriptedDetector::new(script);
    let mut tracker = PresenceTracker::with_settings(source, detector, store, clock.clone(), settings);

    let mut events = tracker.start()?;
    while tracker.phase() == RunPhase::Running && duration_secs(clock.now() - origin) < horizon {
        clock.advance_secs(step_secs);
        events.extend(tracker.tick());
    }
    events.extend(tracker.stop());

    let stop_reason = events
        .iter()
        .rev()
        .find_map(|e| match e {
            Event::TrackerStopped { reason, .. } => Some(*reason),
            _ => None,
        })
        .unwrap_or(StopReason::Requested);

    let (sessions_saved, saved_secs) = events
        .iter()
        .filter_map(|e| match e {
            Event::SessionEnded {
                duration_secs,
                outcome: PersistOutcome::Saved,
                ..
            } => Some(*duration_secs),
            _ => None,
        })
        .fold((0, 0.0), |(n, total), d| (n + 1, total + d));

    let report = ReplayReport {
        detections: tracker.detector().calls(),
        stopped_at_secs: duration_secs(clock.now() - origin),
        events,
        sessions_saved,
        saved_secs,
        stop_reason,
    };
    info!(
        sessions = report.sessions_saved,
        saved_secs = report.saved_secs,
        detections = report.detections,
        "replay finished"
    );
    Ok(report)
}
