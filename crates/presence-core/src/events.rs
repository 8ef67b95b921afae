use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tracker::{CloseCause, PollRate, RunPhase, TrackerStatus};

/// Why the tracker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    StreamLost,
}

/// What happened to a closed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistOutcome {
    Saved,
    /// Already in the store; a retry that found its earlier write.
    AlreadyStored,
    /// At or below the minimum session length; never written.
    TooShort,
    /// The store refused it and the policy discards.
    Failed,
    /// The store refused it and it is queued for retry.
    Queued,
}

/// Every state change in the tracker produces an Event.
/// The presentation layer renders them; the runtime forwards them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TrackerStarted {
        today_total_secs: f64,
        at: DateTime<Utc>,
    },
    TrackerPaused {
        at: DateTime<Utc>,
    },
    TrackerResumed {
        paused_secs: f64,
        at: DateTime<Utc>,
    },
    TrackerStopped {
        reason: StopReason,
        at: DateTime<Utc>,
    },
    SessionStarted {
        at: DateTime<Utc>,
    },
    /// First missed detection inside a session.
    AbsenceStarted {
        at: DateTime<Utc>,
    },
    /// Subject came back before the absence threshold.
    AbsenceCancelled {
        absent_secs: f64,
        at: DateTime<Utc>,
    },
    SessionEnded {
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        duration_secs: f64,
        cause: CloseCause,
        outcome: PersistOutcome,
    },
    DetectionFailed {
        message: String,
        at: DateTime<Utc>,
    },
    StorageFailed {
        message: String,
        at: DateTime<Utc>,
    },
    /// Sessions from the retry queue that finally reached the store.
    QueueFlushed {
        sessions: usize,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        phase: RunPhase,
        status: TrackerStatus,
        session_active: bool,
        session_elapsed_secs: f64,
        today_total_secs: f64,
        detection_interval: PollRate,
        pending_sessions: usize,
        at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = Event::SessionEnded {
            started_at: Utc::now(),
            ended_at: Utc::now(),
            duration_secs: 1.0,
            cause: CloseCause::Absence,
            outcome: PersistOutcome::Saved,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SessionEnded");
        assert_eq!(json["cause"], "absence");
        assert_eq!(json["outcome"], "saved");
    }
}
