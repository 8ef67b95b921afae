//! Pause / resume with timer re-anchoring.
//!
//! While paused nothing is detected and no transition happens. On resume
//! every in-progress timestamp is shifted by the paused span, so the pause
//! never counts as presence or absence.

use chrono::{DateTime, Duration, Utc};

use super::state::{RunPhase, TrackerState};

#[derive(Debug, Clone, Copy, Default)]
pub struct PauseController;

impl PauseController {
    /// Returns false (and changes nothing) unless the tracker is running.
    pub fn pause(&self, state: &mut TrackerState, now: DateTime<Utc>) -> bool {
        if state.phase != RunPhase::Running {
            return false;
        }
        state.phase = RunPhase::Paused;
        state.pause_anchor = Some(now);
        true
    }

    /// Returns the applied shift, or `None` if the tracker was not paused.
    pub fn resume(&self, state: &mut TrackerState, now: DateTime<Utc>) -> Option<Duration> {
        if state.phase != RunPhase::Paused {
            return None;
        }
        let anchor = state.pause_anchor.take().unwrap_or(now);
        let shift = (now - anchor).max(Duration::zero());
        state.shift_timestamps(shift);
        state.phase = RunPhase::Running;
        Some(shift)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::state::SessionPhase;

    #[test]
    fn pause_requires_running() {
        let now = Utc::now();
        let mut state = TrackerState::new(now);
        assert!(!PauseController.pause(&mut state, now));
        assert_eq!(state.phase, RunPhase::Stopped);
        assert!(state.pause_anchor.is_none());
    }

    #[test]
    fn second_pause_keeps_first_anchor() {
        let now = Utc::now();
        let mut state = TrackerState::new(now);
        state.begin_run(now);

        assert!(PauseController.pause(&mut state, now));
        assert!(!PauseController.pause(&mut state, now + Duration::seconds(5)));
        assert_eq!(state.pause_anchor, Some(now));
    }

    #[test]
    fn resume_shifts_live_timestamps() {
        let t0 = Utc::now();
        let mut state = TrackerState::new(t0);
        state.begin_run(t0);
        state.session = SessionPhase::AbsencePending {
            session_start: t0,
            absence_start: t0 + Duration::seconds(3),
        };
        state.last_detection_time = t0 + Duration::seconds(4);

        let paused_at = t0 + Duration::seconds(5);
        PauseController.pause(&mut state, paused_at);
        let shift = PauseController
            .resume(&mut state, paused_at + Duration::seconds(100))
            .expect("was paused");

        assert_eq!(shift, Duration::seconds(100));
        assert_eq!(state.phase, RunPhase::Running);
        assert!(state.pause_anchor.is_none());
        assert_eq!(state.session_start(), Some(t0 + Duration::seconds(100)));
        assert_eq!(state.absence_start(), Some(t0 + Duration::seconds(103)));
        assert_eq!(state.last_detection_time, t0 + Duration::seconds(104));
    }

    #[test]
    fn resume_when_running_is_noop() {
        let now = Utc::now();
        let mut state = TrackerState::new(now);
        state.begin_run(now);
        assert!(PauseController.resume(&mut state, now).is_none());
    }
}
