//! Session state machine.
//!
//! ```text
//!            present                      absent >= threshold
//!   Idle ─────────────▶ Active ◀────────▶ AbsencePending ─────────▶ Idle
//!                         absent (first)   present (cancel)   (end = absence start)
//! ```
//!
//! Transitions happen once per detection run, never per tick. An absence
//! confirmed by the debounce is backdated to when it began; an explicit stop
//! closes at the current instant.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::poller::AdaptivePoller;
use super::state::{SessionPhase, TrackerState};
use crate::clock::{duration_secs, secs_to_duration};
use crate::error::ValidationError;

/// Fractional-second digits kept on session boundaries; the session log
/// stores timestamps at millisecond resolution.
pub const BOUNDARY_SUBSEC_DIGITS: u16 = 3;

/// A completed presence session, ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Always `end_time - start_time` in seconds.
    pub duration_secs: f64,
}

impl Session {
    /// Both ends are truncated to milliseconds, so the stored duration always
    /// matches the stored timestamps.
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Result<Self, ValidationError> {
        let start_time = start_time.trunc_subsecs(BOUNDARY_SUBSEC_DIGITS);
        let end_time = end_time.trunc_subsecs(BOUNDARY_SUBSEC_DIGITS);
        if end_time <= start_time {
            return Err(ValidationError::InvalidTimeRange {
                start: start_time,
                end: end_time,
            });
        }
        Ok(Self {
            start_time,
            end_time,
            duration_secs: duration_secs(end_time - start_time),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseCause {
    Absence,
    Stop,
    StreamLost,
}

/// A session boundary that was just closed.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionClose {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub cause: CloseCause,
    /// `None` when the interval is too short to count as presence.
    pub session: Option<Session>,
}

impl SessionClose {
    pub fn duration_secs(&self) -> f64 {
        duration_secs(self.ended_at - self.started_at)
    }
}

/// Outcome of feeding one detection result to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    None,
    Started { at: DateTime<Utc> },
    AbsenceBegan { at: DateTime<Utc> },
    AbsenceCancelled { absent_secs: f64 },
    Ended(SessionClose),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionMachine {
    absence_threshold: Duration,
    min_session: Duration,
}

impl SessionMachine {
    pub fn new(absence_threshold_secs: f64, min_session_secs: f64) -> Self {
        Self {
            absence_threshold: secs_to_duration(absence_threshold_secs),
            min_session: secs_to_duration(min_session_secs),
        }
    }

    /// Apply one detection result taken at `now`.
    ///
    /// Also selects the polling rate for the next run.
    pub fn on_detection(&self, state: &mut TrackerState, present: bool, now: DateTime<Utc>) -> Transition {
        let transition = if present {
            self.on_present(state, now)
        } else {
            self.on_absent(state, now)
        };
        state.detection_interval = AdaptivePoller::next_rate(present, state.session_active());
        transition
    }

    /// Close the running session at `now` without debouncing.
    pub fn close_now(&self, state: &mut TrackerState, now: DateTime<Utc>, cause: CloseCause) -> Option<SessionClose> {
        let session_start = state.session_start()?;
        state.session = SessionPhase::Idle;
        state.detection_interval = AdaptivePoller::next_rate(false, false);
        Some(self.close(session_start, now, cause))
    }

    fn on_present(&self, state: &mut TrackerState, now: DateTime<Utc>) -> Transition {
        match state.session {
            SessionPhase::Idle => {
                state.session = SessionPhase::Active { session_start: now };
                Transition::Started { at: now }
            }
            SessionPhase::Active { .. } => Transition::None,
            SessionPhase::AbsencePending {
                session_start,
                absence_start,
            } => {
                state.session = SessionPhase::Active { session_start };
                Transition::AbsenceCancelled {
                    absent_secs: duration_secs(now - absence_start),
                }
            }
        }
    }

    fn on_absent(&self, state: &mut TrackerState, now: DateTime<Utc>) -> Transition {
        let (session_start, absence_start, first_miss) = match state.session {
            SessionPhase::Idle => return Transition::None,
            SessionPhase::Active { session_start } => (session_start, now, true),
            SessionPhase::AbsencePending {
                session_start,
                absence_start,
            } => (session_start, absence_start, false),
        };

        if now - absence_start >= self.absence_threshold {
            state.session = SessionPhase::Idle;
            return Transition::Ended(self.close(session_start, absence_start, CloseCause::Absence));
        }

        state.session = SessionPhase::AbsencePending {
            session_start,
            absence_start,
        };
        if first_miss {
            Transition::AbsenceBegan { at: now }
        } else {
            Transition::None
        }
    }

    fn close(&self, started_at: DateTime<Utc>, ended_at: DateTime<Utc>, cause: CloseCause) -> SessionClose {
        let started_at = started_at.trunc_subsecs(BOUNDARY_SUBSEC_DIGITS);
        let ended_at = ended_at.trunc_subsecs(BOUNDARY_SUBSEC_DIGITS);
        let session = if ended_at - started_at > self.min_session {
            Session::new(started_at, ended_at).ok()
        } else {
            None
        };
        SessionClose {
            started_at,
            ended_at,
            cause,
            session,
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(3.0, 0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::state::PollRate;

    fn base() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(BOUNDARY_SUBSEC_DIGITS)
    }

    fn at(base: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
        base + secs_to_duration(secs)
    }

    fn running(base: DateTime<Utc>) -> TrackerState {
        let mut state = TrackerState::new(base);
        state.begin_run(base);
        state
    }

    #[test]
    fn presence_opens_session_and_polls_fast() {
        let base = base();
        let machine = SessionMachine::default();
        let mut state = running(base);

        let t = machine.on_detection(&mut state, true, base);
        assert_eq!(t, Transition::Started { at: base });
        assert_eq!(state.session_start(), Some(base));
        assert_eq!(state.detection_interval, PollRate::Fast);
    }

    #[test]
    fn idle_absence_switches_to_slow_polling() {
        let base = base();
        let machine = SessionMachine::default();
        let mut state = running(base);

        assert_eq!(machine.on_detection(&mut state, false, base), Transition::None);
        assert_eq!(state.detection_interval, PollRate::Slow);
        assert!(!state.session_active());
    }

    #[test]
    fn short_absence_is_debounced() {
        let base = base();
        let machine = SessionMachine::default();
        let mut state = running(base);

        machine.on_detection(&mut state, true, at(base, 0.0));
        let began = machine.on_detection(&mut state, false, at(base, 1.0));
        assert_eq!(began, Transition::AbsenceBegan { at: at(base, 1.0) });
        assert_eq!(state.detection_interval, PollRate::Fast);

        let back = machine.on_detection(&mut state, true, at(base, 2.0));
        assert!(matches!(back, Transition::AbsenceCancelled { .. }));
        assert_eq!(state.session_start(), Some(base));
        assert!(state.absence_start().is_none());
    }

    #[test]
    fn confirmed_absence_is_backdated() {
        let base = base();
        let machine = SessionMachine::default();
        let mut state = running(base);

        machine.on_detection(&mut state, true, at(base, 0.0));
        for secs in [1.0, 2.0, 3.0] {
            let t = machine.on_detection(&mut state, false, at(base, secs));
            assert!(!matches!(t, Transition::Ended(_)));
        }
        let t = machine.on_detection(&mut state, false, at(base, 4.0));

        let Transition::Ended(close) = t else {
            panic!("expected session to end, got {t:?}");
        };
        assert_eq!(close.cause, CloseCause::Absence);
        assert_eq!(close.started_at, base);
        assert_eq!(close.ended_at, at(base, 1.0));
        let session = close.session.expect("session should qualify");
        assert!((session.duration_secs - 1.0).abs() < 1e-9);
        assert!(!state.session_active());
        assert_eq!(state.detection_interval, PollRate::Slow);
    }

    #[test]
    fn absence_threshold_is_inclusive() {
        let base = base();
        let machine = SessionMachine::default();
        let mut state = running(base);

        machine.on_detection(&mut state, true, at(base, 0.0));
        machine.on_detection(&mut state, false, at(base, 2.0));
        let t = machine.on_detection(&mut state, false, at(base, 5.0));
        assert!(matches!(t, Transition::Ended(_)));
    }

    #[test]
    fn tiny_sessions_are_not_qualified() {
        let base = base();
        let machine = SessionMachine::default();
        let mut state = running(base);

        machine.on_detection(&mut state, true, base);
        let close = machine
            .close_now(&mut state, at(base, 0.1), CloseCause::Stop)
            .expect("session was active");
        assert!(close.session.is_none());
        assert!(!state.session_active());
    }

    #[test]
    fn stop_closes_at_now_even_with_pending_absence() {
        let base = base();
        let machine = SessionMachine::default();
        let mut state = running(base);

        machine.on_detection(&mut state, true, at(base, 0.0));
        machine.on_detection(&mut state, false, at(base, 2.0));
        let close = machine
            .close_now(&mut state, at(base, 4.0), CloseCause::Stop)
            .expect("session was active");
        assert_eq!(close.ended_at, at(base, 4.0));
        assert!((close.duration_secs() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn close_now_without_session_is_none() {
        let base = base();
        let machine = SessionMachine::default();
        let mut state = running(base);
        assert!(machine.close_now(&mut state, base, CloseCause::Stop).is_none());
    }

    #[test]
    fn boundaries_are_kept_to_milliseconds() {
        let base = base();
        let session = Session::new(base + Duration::microseconds(500), base + Duration::microseconds(100_400)).unwrap();
        assert_eq!(session.start_time, base);
        assert_eq!(session.end_time, base + Duration::milliseconds(100));
        assert_eq!(session.duration_secs, 0.1);
    }

    #[test]
    fn qualification_uses_stored_resolution() {
        // 100.4 ms of raw time is exactly 100 ms once stored: not a session.
        let base = base();
        let machine = SessionMachine::default();
        let mut state = running(base);

        machine.on_detection(&mut state, true, base + Duration::microseconds(500));
        let close = machine
            .close_now(&mut state, base + Duration::microseconds(100_900), CloseCause::Stop)
            .expect("session was active");
        assert!((close.duration_secs() - 0.1).abs() < 1e-9);
        assert!(close.session.is_none());
    }

    #[test]
    fn session_rejects_inverted_range() {
        let base = base();
        assert!(Session::new(base, base).is_err());
        assert!(Session::new(base, base - Duration::seconds(1)).is_err());
    }
}
