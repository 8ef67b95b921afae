//! In-memory tracker state.
//!
//! One [`TrackerState`] exists per tracker and is only ever mutated from the
//! tick loop, through the poller, session machine and pause controller.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the tracker as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunPhase::Stopped => "stopped",
            RunPhase::Running => "running",
            RunPhase::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// Session sub-state.
///
/// `AbsencePending` is an active session whose most recent detection runs
/// reported "absent" without reaching the close threshold yet. An absence
/// start can only exist inside a session, which the variants enforce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Active {
        session_start: DateTime<Utc>,
    },
    AbsencePending {
        session_start: DateTime<Utc>,
        absence_start: DateTime<Utc>,
    },
}

/// Which of the two polling intervals is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollRate {
    Fast,
    Slow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerState {
    pub phase: RunPhase,
    pub session: SessionPhase,
    /// When the detector was last invoked (taken before the call).
    pub last_detection_time: DateTime<Utc>,
    pub detection_interval: PollRate,
    /// Set only while paused.
    pub pause_anchor: Option<DateTime<Utc>>,
}

impl TrackerState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            phase: RunPhase::Stopped,
            session: SessionPhase::Idle,
            last_detection_time: now,
            detection_interval: PollRate::Fast,
            pause_anchor: None,
        }
    }

    /// Fresh running state: no session, polling fast from `now`.
    pub fn begin_run(&mut self, now: DateTime<Utc>) {
        *self = Self {
            phase: RunPhase::Running,
            ..Self::new(now)
        };
    }

    /// Drop every field back to the stopped defaults.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        *self = Self::new(now);
    }

    pub fn session_active(&self) -> bool {
        !matches!(self.session, SessionPhase::Idle)
    }

    pub fn session_start(&self) -> Option<DateTime<Utc>> {
        match self.session {
            SessionPhase::Idle => None,
            SessionPhase::Active { session_start }
            | SessionPhase::AbsencePending { session_start, .. } => Some(session_start),
        }
    }

    pub fn absence_start(&self) -> Option<DateTime<Utc>> {
        match self.session {
            SessionPhase::AbsencePending { absence_start, .. } => Some(absence_start),
            _ => None,
        }
    }

    /// Move every in-progress timestamp forward by `by`.
    ///
    /// Differences between the shifted timestamps are unchanged.
    pub fn shift_timestamps(&mut self, by: Duration) {
        self.session = match self.session {
            SessionPhase::Idle => SessionPhase::Idle,
            SessionPhase::Active { session_start } => SessionPhase::Active {
                session_start: session_start + by,
            },
            SessionPhase::AbsencePending {
                session_start,
                absence_start,
            } => SessionPhase::AbsencePending {
                session_start: session_start + by,
                absence_start: absence_start + by,
            },
        };
        self.last_detection_time += by;
    }

    /// Time to measure live elapsed values against: frozen at the pause
    /// anchor while paused.
    pub fn effective_now(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.pause_anchor.unwrap_or(now)
    }
}
