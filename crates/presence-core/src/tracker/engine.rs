//! Presence tracker engine.
//!
//! Like a stopwatch without its own thread: the owner calls [`PresenceTracker::tick`]
//! at a fixed cadence (about 30 ms) and every call runs to completion before
//! the next. Each tick reads a frame, asks the poller whether a detection is
//! due, feeds the result to the session machine, persists closed sessions and
//! returns the events produced.
//!
//! ## Lifecycle
//!
//! ```text
//! Stopped -> Running <-> Paused -> Stopped
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut tracker = PresenceTracker::new(source, detector, db, SystemClock::new());
//! tracker.start()?;
//! // In a loop:
//! for event in tracker.tick() { /* render */ }
//! tracker.stop();
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::pause::PauseController;
use super::poller::AdaptivePoller;
use super::session::{CloseCause, Session, SessionClose, SessionMachine, Transition};
use super::state::{RunPhase, TrackerState};
use crate::aggregate::{live_elapsed, Aggregator};
use crate::clock::{duration_secs, Clock};
use crate::error::{CoreError, SourceError};
use crate::events::{Event, PersistOutcome, StopReason};
use crate::source::{Detector, FrameSource};
use crate::storage::{local_day, Config, SessionStore, WriteFailurePolicy};

/// What the presentation layer shows as the current status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    Stopped,
    /// Running, no detection result since start or resume.
    Watching,
    Detected,
    NotDetected,
    Paused,
    /// Last detection run failed; counted as absent.
    DetectionError,
    /// Last session could not be written.
    StorageError,
    /// The frame stream was lost and the tracker stopped.
    StreamError,
    /// Frame source or detector could not be acquired at start.
    SourceError,
}

impl TrackerStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TrackerStatus::Stopped => "Stopped",
            TrackerStatus::Watching => "Watching",
            TrackerStatus::Detected => "Detected",
            TrackerStatus::NotDetected => "Not Detected",
            TrackerStatus::Paused => "Paused",
            TrackerStatus::DetectionError => "Detection Error",
            TrackerStatus::StorageError => "Storage Error",
            TrackerStatus::StreamError => "Stream Error",
            TrackerStatus::SourceError => "Source Error",
        }
    }
}

/// Thresholds and policies the engine runs with.
#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub poller: AdaptivePoller,
    pub machine: SessionMachine,
    pub on_write_failure: WriteFailurePolicy,
}

impl TrackerSettings {
    pub fn from_config(config: &Config) -> Self {
        let t = &config.tracker;
        Self {
            poller: AdaptivePoller::new(t.fast_interval_secs, t.slow_interval_secs),
            machine: SessionMachine::new(t.absence_threshold_secs, t.min_session_secs),
            on_write_failure: config.storage.on_write_failure,
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct PresenceTracker<F, D, S, C>
where
    F: FrameSource,
    D: Detector<F::Frame>,
    S: SessionStore,
    C: Clock,
{
    source: F,
    detector: D,
    store: S,
    clock: C,
    state: TrackerState,
    settings: TrackerSettings,
    pause: PauseController,
    aggregator: Aggregator,
    /// Sessions the store refused, kept under `WriteFailurePolicy::Retain`.
    pending: Vec<Session>,
    status: TrackerStatus,
}

impl<F, D, S, C> PresenceTracker<F, D, S, C>
where
    F: FrameSource,
    D: Detector<F::Frame>,
    S: SessionStore,
    C: Clock,
{
    pub fn new(source: F, detector: D, store: S, clock: C) -> Self {
        Self::with_settings(source, detector, store, clock, TrackerSettings::default())
    }

    pub fn with_settings(source: F, detector: D, store: S, clock: C, settings: TrackerSettings) -> Self {
        let now = clock.now();
        let mut aggregator = Aggregator::new();
        let status = match aggregator.refresh(&store, now) {
            Ok(_) => TrackerStatus::Stopped,
            Err(e) => {
                error!("could not read today's total: {e}");
                TrackerStatus::StorageError
            }
        };
        Self {
            source,
            detector,
            store,
            clock,
            state: TrackerState::new(now),
            settings,
            pause: PauseController,
            aggregator,
            pending: Vec::new(),
            status,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn phase(&self) -> RunPhase {
        self.state.phase
    }

    pub fn current_status(&self) -> TrackerStatus {
        self.status
    }

    /// Seconds since the open session started (0 without one), net of pauses.
    pub fn current_session_elapsed(&self) -> f64 {
        live_elapsed(&self.state, self.clock.now())
    }

    /// Persisted total for today plus the open session and any queued sessions.
    pub fn today_total(&self) -> f64 {
        let now = self.clock.now();
        let today = local_day(now);
        let queued: f64 = self
            .pending
            .iter()
            .filter(|s| local_day(s.start_time) == today)
            .map(|s| s.duration_secs)
            .sum();
        self.aggregator.display_total(&self.state, now, queued)
    }

    /// Sessions waiting for a store retry.
    pub fn pending_sessions(&self) -> &[Session] {
        &self.pending
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn source(&self) -> &F {
        &self.source
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Build a full state snapshot event.
    pub fn snapshot(&self) -> Event {
        Event::StateSnapshot {
            phase: self.state.phase,
            status: self.status,
            session_active: self.state.session_active(),
            session_elapsed_secs: self.current_session_elapsed(),
            today_total_secs: self.today_total(),
            detection_interval: self.state.detection_interval,
            pending_sessions: self.pending.len(),
            at: self.clock.now(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Acquire the detector and frame source and begin tracking.
    ///
    /// Does nothing if already running or paused.
    ///
    /// # Errors
    /// Returns an error if the detector cannot be loaded or the source cannot
    /// be opened; the tracker stays stopped.
    pub fn start(&mut self) -> Result<Vec<Event>, CoreError> {
        if self.state.phase != RunPhase::Stopped {
            return Ok(Vec::new());
        }

        if let Err(e) = self.detector.load() {
            error!("failed to load detector: {e}");
            self.status = TrackerStatus::SourceError;
            return Err(e.into());
        }
        if let Err(e) = self.source.open() {
            error!("failed to open frame source: {e}");
            self.detector.unload();
            self.status = TrackerStatus::SourceError;
            return Err(e.into());
        }

        let now = self.clock.now();
        self.state.begin_run(now);
        self.status = TrackerStatus::Watching;

        let mut events = Vec::new();
        self.refresh_total(now, &mut events);
        info!(today_total_secs = self.aggregator.persisted_today(), "presence tracker started");
        events.push(Event::TrackerStarted {
            today_total_secs: self.aggregator.persisted_today(),
            at: now,
        });
        Ok(events)
    }

    /// Freeze tracking. No-op unless running.
    pub fn pause(&mut self) -> Vec<Event> {
        let now = self.clock.now();
        if !self.pause.pause(&mut self.state, now) {
            return Vec::new();
        }
        self.status = TrackerStatus::Paused;
        info!("presence tracker paused");
        vec![Event::TrackerPaused { at: now }]
    }

    /// Continue after a pause, re-anchoring every live timer. No-op unless paused.
    pub fn resume(&mut self) -> Vec<Event> {
        let now = self.clock.now();
        let Some(shift) = self.pause.resume(&mut self.state, now) else {
            return Vec::new();
        };
        let paused_secs = duration_secs(shift);
        self.status = TrackerStatus::Watching;
        info!(paused_secs, "presence tracker resumed");
        vec![Event::TrackerResumed { paused_secs, at: now }]
    }

    /// Close any open session at the current instant, persist it and release
    /// the source and detector. No-op when already stopped.
    pub fn stop(&mut self) -> Vec<Event> {
        self.shutdown(StopReason::Requested)
    }

    /// Advance one tick.
    pub fn tick(&mut self) -> Vec<Event> {
        if self.state.phase != RunPhase::Running {
            return Vec::new();
        }

        let now = self.clock.now();
        let mut events = Vec::new();
        if let Err(e) = self.aggregator.roll_over(&self.store, now) {
            self.storage_failed(format!("could not read the new day's total: {e}"), now, &mut events);
        }

        let Some(frame) = self.source.read_frame() else {
            error!("frame source stopped delivering frames");
            events.extend(self.shutdown(StopReason::StreamLost));
            return events;
        };

        if !self.settings.poller.is_due(&self.state, now) {
            return events;
        }
        self.state.last_detection_time = now;

        let present = match self.detector.detect(&frame) {
            Ok(present) => {
                self.status = if present {
                    TrackerStatus::Detected
                } else {
                    TrackerStatus::NotDetected
                };
                present
            }
            Err(e) => {
                warn!("detection run failed, counting as absent: {e}");
                self.status = TrackerStatus::DetectionError;
                events.push(Event::DetectionFailed {
                    message: detection_message(e),
                    at: now,
                });
                false
            }
        };

        let transition = self.settings.machine.on_detection(&mut self.state, present, now);
        debug!(present, interval = ?self.state.detection_interval, "detection run");

        match transition {
            Transition::None => {}
            Transition::Started { at } => {
                info!("presence session started");
                events.push(Event::SessionStarted { at });
            }
            Transition::AbsenceBegan { at } => {
                events.push(Event::AbsenceStarted { at });
            }
            Transition::AbsenceCancelled { absent_secs } => {
                debug!(absent_secs, "absence cancelled before threshold");
                events.push(Event::AbsenceCancelled { absent_secs, at: now });
            }
            Transition::Ended(close) => {
                events.extend(self.finish_session(close, now));
            }
        }
        events
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn shutdown(&mut self, reason: StopReason) -> Vec<Event> {
        if self.state.phase == RunPhase::Stopped {
            return Vec::new();
        }
        let now = self.clock.now();
        let closed_at = self.state.effective_now(now);
        let cause = match reason {
            StopReason::Requested => CloseCause::Stop,
            StopReason::StreamLost => CloseCause::StreamLost,
        };

        let mut events = Vec::new();
        if let Some(close) = self.settings.machine.close_now(&mut self.state, closed_at, cause) {
            events.extend(self.finish_session(close, now));
        }
        if !self.pending.is_empty() {
            events.extend(self.flush_pending(now));
        }

        // The store stays open; only the capture side is released.
        self.source.release();
        self.detector.unload();
        self.state.reset(now);

        self.refresh_total(now, &mut events);
        let storage_failed = events.iter().any(|e| matches!(e, Event::StorageFailed { .. }));

        self.status = match reason {
            StopReason::StreamLost => TrackerStatus::StreamError,
            StopReason::Requested if storage_failed => TrackerStatus::StorageError,
            StopReason::Requested => TrackerStatus::Stopped,
        };
        info!(reason = ?reason, "presence tracker stopped");
        events.push(Event::TrackerStopped { reason, at: now });
        events
    }

    fn finish_session(&mut self, close: SessionClose, now: DateTime<Utc>) -> Vec<Event> {
        let mut events = Vec::new();
        let duration_secs = close.duration_secs();

        let outcome = match close.session.as_ref() {
            None => {
                debug!(duration_secs, "session too short, discarded");
                PersistOutcome::TooShort
            }
            Some(session) => {
                if !self.pending.is_empty() {
                    events.extend(self.flush_pending(now));
                }
                self.write(session, now, &mut events)
            }
        };

        info!(duration_secs, cause = ?close.cause, outcome = ?outcome, "presence session ended");
        events.push(Event::SessionEnded {
            started_at: close.started_at,
            ended_at: close.ended_at,
            duration_secs,
            cause: close.cause,
            outcome,
        });
        events
    }

    fn write(&mut self, session: &Session, now: DateTime<Utc>, events: &mut Vec<Event>) -> PersistOutcome {
        match self.store.insert(session) {
            Ok(inserted) => {
                self.refresh_total(now, events);
                if inserted {
                    PersistOutcome::Saved
                } else {
                    PersistOutcome::AlreadyStored
                }
            }
            Err(e) => {
                self.storage_failed(format!("failed to save session: {e}"), now, events);
                match self.settings.on_write_failure {
                    WriteFailurePolicy::Discard => PersistOutcome::Failed,
                    WriteFailurePolicy::Retain => {
                        self.pending.push(session.clone());
                        PersistOutcome::Queued
                    }
                }
            }
        }
    }

    fn flush_pending(&mut self, now: DateTime<Utc>) -> Vec<Event> {
        let queued = std::mem::take(&mut self.pending);
        let mut flushed = 0;
        let mut last_error = None;
        for session in queued {
            match self.store.insert(&session) {
                Ok(_) => flushed += 1,
                Err(e) => {
                    last_error = Some(e.to_string());
                    self.pending.push(session);
                }
            }
        }

        let mut events = Vec::new();
        if flushed > 0 {
            self.refresh_total(now, &mut events);
            info!(flushed, remaining = self.pending.len(), "queued sessions written");
            events.push(Event::QueueFlushed { sessions: flushed, at: now });
        }
        if let Some(message) = last_error {
            let remaining = self.pending.len();
            self.storage_failed(
                format!("{remaining} queued sessions still not writable: {message}"),
                now,
                &mut events,
            );
        }
        events
    }

    /// Re-read today's persisted total; a failed read keeps the old value.
    fn refresh_total(&mut self, now: DateTime<Utc>, events: &mut Vec<Event>) {
        if let Err(e) = self.aggregator.refresh(&self.store, now) {
            self.storage_failed(format!("could not read today's total: {e}"), now, events);
        }
    }

    fn storage_failed(&mut self, message: String, now: DateTime<Utc>, events: &mut Vec<Event>) {
        error!("{message}");
        self.status = TrackerStatus::StorageError;
        events.push(Event::StorageFailed { message, at: now });
    }
}

fn detection_message(err: SourceError) -> String {
    match err {
        SourceError::Detection(message) => message,
        other => other.to_string(),
    }
}
