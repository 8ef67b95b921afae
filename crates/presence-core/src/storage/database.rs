//! SQLite-backed presence log.
//!
//! Provides persistent storage for:
//! - Completed presence sessions (append-only)
//! - Per-day totals for the live aggregator
//! - Range reads for reporting (session list, daily/hourly totals, summary)
//!
//! Timestamps are stored as local-time text so that `DATE(start_time)` yields
//! the user's calendar day.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::Config;
use super::migrations;
use crate::error::{CoreError, DatabaseError, ValidationError};
use crate::tracker::Session;

/// Format written to `start_time` / `end_time`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Default database file name inside the data directory.
pub const DEFAULT_DB_FILE: &str = "presence.db";

/// The persistence seam the tracker writes through.
///
/// Both operations are safe to retry: inserting a session that is already
/// stored changes nothing.
pub trait SessionStore {
    /// Append one session. Returns `false` if the same span was already stored.
    fn insert(&self, session: &Session) -> Result<bool, DatabaseError>;

    /// Sum of durations for sessions starting on `day` (local), 0 if none.
    fn sum_duration_for_day(&self, day: NaiveDate) -> Result<f64, DatabaseError>;
}

impl<T: SessionStore + ?Sized> SessionStore for &T {
    fn insert(&self, session: &Session) -> Result<bool, DatabaseError> {
        (**self).insert(session)
    }

    fn sum_duration_for_day(&self, day: NaiveDate) -> Result<f64, DatabaseError> {
        (**self).sum_duration_for_day(day)
    }
}

/// Local calendar day of an instant.
pub fn local_day(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

fn format_local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
}

fn parse_local(value: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|_| DatabaseError::BadTimestamp(value.to_string()))
}

fn parse_day(value: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(value, DAY_FORMAT).map_err(|_| DatabaseError::BadTimestamp(value.to_string()))
}

fn check_range(from: NaiveDate, to: NaiveDate) -> Result<(), CoreError> {
    if from > to {
        return Err(ValidationError::InvalidDateRange { from, to }.into());
    }
    Ok(())
}

/// A stored session as read back for reporting. Times are local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub sessions: u64,
    pub total_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyTotal {
    /// Local hour of session start, 0..=23.
    pub hour: u32,
    pub total_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSummary {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub total_sessions: u64,
    pub total_secs: f64,
    pub average_secs: f64,
    pub longest_secs: f64,
}

/// SQLite database holding the presence log.
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// File backing this database, `None` for in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Open the database named by `storage.database_file` in the loaded config.
    ///
    /// # Errors
    /// Returns an error if the config cannot be loaded, or the database cannot
    /// be opened or migrated.
    pub fn open() -> Result<Self, CoreError> {
        let path = Config::load()?.database_path()?;
        Ok(Self::open_at(path)?)
    }

    /// Open (or create) the database file at `path`.
    ///
    /// Schema creation is create-if-absent, so files from earlier runs are reused.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DatabaseError> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();
        let conn = Connection::open(&path).map_err(|source| DatabaseError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let db = Self {
            conn,
            path: Some(path),
        };
        db.migrate()?;
        if existed {
            info!(path = %db.describe(), "presence database opened");
        } else {
            info!(path = %db.describe(), "presence database created");
        }
        Ok(db)
    }

    /// Open an in-memory database (tests, dry runs).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn, path: None };
        db.migrate()?;
        Ok(db)
    }

    fn describe(&self) -> String {
        self.path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        migrations::migrate(&self.conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))
    }

    /// Append a completed session.
    ///
    /// Returns `false` without writing if a row with the same start and end
    /// already exists, which makes caller-side retries harmless.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub fn insert_session(&self, session: &Session) -> Result<bool, DatabaseError> {
        let start = format_local(session.start_time);
        let end = format_local(session.end_time);
        let changed = self.conn.execute(
            "INSERT INTO presence (start_time, end_time, duration)
             SELECT ?1, ?2, ?3
             WHERE NOT EXISTS (
                 SELECT 1 FROM presence WHERE start_time = ?1 AND end_time = ?2
             )",
            params![start, end, session.duration_secs],
        )?;
        debug!(start = %start, end = %end, duration = session.duration_secs, inserted = (changed == 1), "presence insert");
        Ok(changed == 1)
    }

    /// Total seconds of sessions whose start falls on `day`.
    pub fn sum_duration_for_day(&self, day: NaiveDate) -> Result<f64, DatabaseError> {
        let total = self.conn.query_row(
            "SELECT COALESCE(SUM(duration), 0.0) FROM presence WHERE DATE(start_time) = ?1",
            params![day.format(DAY_FORMAT).to_string()],
            |row| row.get::<_, f64>(0),
        )?;
        Ok(total)
    }

    /// Sessions starting within `[from, to]` (inclusive days), oldest first.
    pub fn sessions_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<SessionRecord>, CoreError> {
        check_range(from, to)?;
        let mut stmt = self.conn.prepare(
            "SELECT id, start_time, end_time, COALESCE(duration, 0.0)
             FROM presence
             WHERE DATE(start_time) BETWEEN ?1 AND ?2
             ORDER BY start_time",
        )?;
        let rows = stmt.query_map(
            params![from.format(DAY_FORMAT).to_string(), to.format(DAY_FORMAT).to_string()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (id, start, end, duration_secs) = row?;
            records.push(SessionRecord {
                id,
                start_time: parse_local(&start)?,
                end_time: parse_local(&end)?,
                duration_secs,
            });
        }
        Ok(records)
    }

    /// One entry per day that has sessions, in date order.
    pub fn daily_totals(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyTotal>, CoreError> {
        check_range(from, to)?;
        let mut stmt = self.conn.prepare(
            "SELECT DATE(start_time), COUNT(*), COALESCE(SUM(duration), 0.0)
             FROM presence
             WHERE DATE(start_time) BETWEEN ?1 AND ?2
             GROUP BY DATE(start_time)
             ORDER BY DATE(start_time)",
        )?;
        let rows = stmt.query_map(
            params![from.format(DAY_FORMAT).to_string(), to.format(DAY_FORMAT).to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u64>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            },
        )?;

        let mut totals = Vec::new();
        for row in rows {
            let (day, sessions, total_secs) = row?;
            totals.push(DailyTotal {
                day: parse_day(&day)?,
                sessions,
                total_secs,
            });
        }
        Ok(totals)
    }

    /// Presence per start hour across the range; always 24 buckets.
    pub fn hourly_totals(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<HourlyTotal>, CoreError> {
        check_range(from, to)?;
        let mut buckets: Vec<HourlyTotal> = (0..24).map(|hour| HourlyTotal { hour, total_secs: 0.0 }).collect();

        let mut stmt = self.conn.prepare(
            "SELECT CAST(strftime('%H', start_time) AS INTEGER), COALESCE(SUM(duration), 0.0)
             FROM presence
             WHERE DATE(start_time) BETWEEN ?1 AND ?2
             GROUP BY 1",
        )?;
        let rows = stmt.query_map(
            params![from.format(DAY_FORMAT).to_string(), to.format(DAY_FORMAT).to_string()],
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, f64>(1)?)),
        )?;
        for row in rows {
            let (hour, total_secs) = row?;
            if let Some(bucket) = buckets.get_mut(hour as usize) {
                bucket.total_secs = total_secs;
            }
        }
        Ok(buckets)
    }

    pub fn summary(&self, from: NaiveDate, to: NaiveDate) -> Result<RangeSummary, CoreError> {
        check_range(from, to)?;
        let (total_sessions, total_secs, longest_secs) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(duration), 0.0), COALESCE(MAX(duration), 0.0)
             FROM presence
             WHERE DATE(start_time) BETWEEN ?1 AND ?2",
            params![from.format(DAY_FORMAT).to_string(), to.format(DAY_FORMAT).to_string()],
            |row| Ok((row.get::<_, u64>(0)?, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?)),
        )?;
        let average_secs = if total_sessions > 0 {
            total_secs / total_sessions as f64
        } else {
            0.0
        };
        Ok(RangeSummary {
            from,
            to,
            total_sessions,
            total_secs,
            average_secs,
            longest_secs,
        })
    }
}

impl SessionStore for Database {
    fn insert(&self, session: &Session) -> Result<bool, DatabaseError> {
        self.insert_session(session)
    }

    fn sum_duration_for_day(&self, day: NaiveDate) -> Result<f64, DatabaseError> {
        Database::sum_duration_for_day(self, day)
    }
}
