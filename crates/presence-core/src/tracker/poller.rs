//! Adaptive detection scheduling.
//!
//! The poller only answers "is a detection due" and "which rate comes next";
//! the chosen rate lives in [`TrackerState`] because it depends on session
//! status, which the session machine owns.

use chrono::{DateTime, Duration, Utc};

use super::state::{PollRate, TrackerState};
use crate::clock::secs_to_duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptivePoller {
    fast: Duration,
    slow: Duration,
}

impl AdaptivePoller {
    pub fn new(fast_secs: f64, slow_secs: f64) -> Self {
        Self {
            fast: secs_to_duration(fast_secs),
            slow: secs_to_duration(slow_secs),
        }
    }

    pub fn interval(&self, rate: PollRate) -> Duration {
        match rate {
            PollRate::Fast => self.fast,
            PollRate::Slow => self.slow,
        }
    }

    /// Whether a detection should run at `now`.
    ///
    /// When this returns true the caller must set `last_detection_time = now`
    /// before invoking the detector.
    pub fn is_due(&self, state: &TrackerState, now: DateTime<Utc>) -> bool {
        now - state.last_detection_time >= self.interval(state.detection_interval)
    }

    /// Rate to use after a detection run.
    ///
    /// Fast whenever a subject was just seen or a session is still open (so
    /// absence is caught promptly); slow only when idle and nothing was seen.
    pub fn next_rate(present: bool, session_active: bool) -> PollRate {
        if present || session_active {
            PollRate::Fast
        } else {
            PollRate::Slow
        }
    }
}

impl Default for AdaptivePoller {
    fn default() -> Self {
        Self::new(1.0, 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_once_interval_elapsed() {
        let poller = AdaptivePoller::default();
        let t0 = Utc::now();
        let state = TrackerState::new(t0);

        assert!(!poller.is_due(&state, t0 + Duration::milliseconds(999)));
        assert!(poller.is_due(&state, t0 + Duration::seconds(1)));
    }

    #[test]
    fn slow_rate_waits_ten_seconds() {
        let poller = AdaptivePoller::default();
        let t0 = Utc::now();
        let mut state = TrackerState::new(t0);
        state.detection_interval = PollRate::Slow;

        assert!(!poller.is_due(&state, t0 + Duration::seconds(9)));
        assert!(poller.is_due(&state, t0 + Duration::seconds(10)));
    }

    #[test]
    fn next_rate_policy() {
        assert_eq!(AdaptivePoller::next_rate(true, false), PollRate::Fast);
        assert_eq!(AdaptivePoller::next_rate(true, true), PollRate::Fast);
        assert_eq!(AdaptivePoller::next_rate(false, true), PollRate::Fast);
        assert_eq!(AdaptivePoller::next_rate(false, false), PollRate::Slow);
    }
}
