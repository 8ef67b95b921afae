//! Running daily total.
//!
//! The persisted part is read from the store only at start, after each
//! write and when the local day changes; per tick only the live addend of
//! the open session moves.

use chrono::{DateTime, NaiveDate, Utc};

use crate::clock::duration_secs;
use crate::error::DatabaseError;
use crate::storage::{local_day, SessionStore};
use crate::tracker::TrackerState;

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    persisted_today: f64,
    day: Option<NaiveDate>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read today's persisted total.
    ///
    /// On failure a value cached for the same day is kept so the display does
    /// not drop to zero. A value cached for an earlier day is not today's, so
    /// it is replaced by 0 and the cache is marked as today's; the next
    /// successful refresh (after any write) corrects it.
    pub fn refresh<S: SessionStore + ?Sized>(&mut self, store: &S, now: DateTime<Utc>) -> Result<f64, DatabaseError> {
        let day = local_day(now);
        match store.sum_duration_for_day(day) {
            Ok(total) => {
                self.persisted_today = total;
                self.day = Some(day);
                Ok(total)
            }
            Err(e) => {
                if self.day != Some(day) {
                    self.persisted_today = 0.0;
                    self.day = Some(day);
                }
                Err(e)
            }
        }
    }

    /// Refresh only if `now` falls on a different local day than the cache.
    ///
    /// A failed read is reported once; later ticks on the same day do not retry.
    pub fn roll_over<S: SessionStore + ?Sized>(&mut self, store: &S, now: DateTime<Utc>) -> Result<(), DatabaseError> {
        if self.day == Some(local_day(now)) {
            return Ok(());
        }
        self.refresh(store, now).map(|_| ())
    }

    pub fn persisted_today(&self) -> f64 {
        self.persisted_today
    }

    /// Persisted total plus the open session, if any.
    ///
    /// `extra_secs` carries time that belongs to today but is not in the
    /// store yet (sessions waiting for a retry).
    pub fn display_total(&self, state: &TrackerState, now: DateTime<Utc>, extra_secs: f64) -> f64 {
        self.persisted_today + extra_secs + live_elapsed(state, now)
    }
}

/// Elapsed seconds of the open session, frozen while paused.
pub fn live_elapsed(state: &TrackerState, now: DateTime<Utc>) -> f64 {
    match state.session_start() {
        Some(start) => duration_secs(state.effective_now(now) - start).max(0.0),
        None => 0.0,
    }
}

/// `Hh MMm SSs`, truncating fractional seconds.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    let (m, s) = (total / 60, total % 60);
    let (h, m) = (m / 60, m % 60);
    format!("{h}h {m:02}m {s:02}s")
}
