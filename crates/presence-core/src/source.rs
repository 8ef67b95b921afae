//! Boundaries to the frame source and the detector.
//!
//! The tracker only needs "give me a frame" and "is the subject in this
//! frame"; confidence thresholds, models and capture devices live behind
//! these traits. [`ScriptedSource`] and [`ScriptedDetector`] replay a recorded
//! [`DetectionScript`] and are what the CLI `replay` command and the tests
//! drive the engine with.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{duration_secs, Clock, ManualClock};
use crate::error::SourceError;

pub trait FrameSource: Send {
    type Frame;

    fn open(&mut self) -> Result<(), SourceError>;

    /// `None` means the stream is gone.
    fn read_frame(&mut self) -> Option<Self::Frame>;

    fn release(&mut self);
}

pub trait Detector<F>: Send {
    fn load(&mut self) -> Result<(), SourceError>;

    /// Whether the subject is present in `frame`.
    fn detect(&mut self, frame: &F) -> Result<bool, SourceError>;

    fn unload(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Present,
    Absent,
    Error,
    StreamLost,
}

impl FromStr for Reading {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "present" | "p" | "1" => Ok(Reading::Present),
            "absent" | "a" | "0" => Ok(Reading::Absent),
            "error" | "e" => Ok(Reading::Error),
            "lost" | "stream_lost" => Ok(Reading::StreamLost),
            other => Err(format!("unknown reading '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScriptEntry {
    pub offset_secs: f64,
    pub reading: Reading,
}

/// Detector output over time, as a step function.
///
/// Each entry holds from its offset until the next one; before the first
/// entry the subject is absent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionScript {
    entries: Vec<ScriptEntry>,
}

impl DetectionScript {
    pub fn new(entries: Vec<ScriptEntry>) -> Result<Self, SourceError> {
        for (idx, pair) in entries.windows(2).enumerate() {
            if pair[1].offset_secs < pair[0].offset_secs {
                return Err(SourceError::Script {
                    line: idx + 2,
                    message: "offsets must not decrease".into(),
                });
            }
        }
        if let Some(bad) = entries.iter().position(|e| !e.offset_secs.is_finite() || e.offset_secs < 0.0) {
            return Err(SourceError::Script {
                line: bad + 1,
                message: "offset must be a non-negative number".into(),
            });
        }
        Ok(Self { entries })
    }

    /// Parse `<offset_secs> <present|absent|error|lost>` lines.
    ///
    /// Blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, SourceError> {
        let mut entries = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let (Some(offset), Some(reading), None) = (fields.next(), fields.next(), fields.next()) else {
                return Err(SourceError::Script {
                    line: line_no,
                    message: format!("expected '<offset> <reading>', got '{line}'"),
                });
            };
            let offset_secs = offset.parse::<f64>().map_err(|e| SourceError::Script {
                line: line_no,
                message: format!("bad offset '{offset}': {e}"),
            })?;
            let reading = reading.parse::<Reading>().map_err(|message| SourceError::Script {
                line: line_no,
                message,
            })?;
            if let Some(prev) = entries.last().map(|e: &ScriptEntry| e.offset_secs) {
                if offset_secs < prev {
                    return Err(SourceError::Script {
                        line: line_no,
                        message: "offsets must not decrease".into(),
                    });
                }
            }
            entries.push(ScriptEntry { offset_secs, reading });
        }
        Self::new(entries)
    }

    pub fn entries(&self) -> &[ScriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Offset of the last entry.
    pub fn span_secs(&self) -> f64 {
        self.entries.last().map(|e| e.offset_secs).unwrap_or(0.0)
    }

    pub fn reading_at(&self, offset_secs: f64) -> Reading {
        self.entries
            .iter()
            .take_while(|e| e.offset_secs <= offset_secs)
            .last()
            .map(|e| e.reading)
            .unwrap_or(Reading::Absent)
    }
}

/// Frame produced by [`ScriptedSource`]: just the instant it was read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptFrame {
    pub offset_secs: f64,
}

/// Frame source that follows a script against a [`ManualClock`].
///
/// Reads fail from the first `lost` entry onwards.
pub struct ScriptedSource {
    script: Arc<DetectionScript>,
    clock: ManualClock,
    origin: DateTime<Utc>,
    open: bool,
    fail_open: bool,
}

impl ScriptedSource {
    pub fn new(script: Arc<DetectionScript>, clock: ManualClock, origin: DateTime<Utc>) -> Self {
        Self {
            script,
            clock,
            origin,
            open: false,
            fail_open: false,
        }
    }

    /// A source whose `open` always fails, as when no device is attached.
    pub fn unavailable(script: Arc<DetectionScript>, clock: ManualClock, origin: DateTime<Utc>) -> Self {
        Self {
            fail_open: true,
            ..Self::new(script, clock, origin)
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl FrameSource for ScriptedSource {
    type Frame = ScriptFrame;

    fn open(&mut self) -> Result<(), SourceError> {
        if self.fail_open {
            return Err(SourceError::OpenFailed("scripted source marked unavailable".into()));
        }
        self.open = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Option<ScriptFrame> {
        if !self.open {
            return None;
        }
        let offset_secs = duration_secs(self.clock.now() - self.origin);
        match self.script.reading_at(offset_secs) {
            Reading::StreamLost => None,
            _ => Some(ScriptFrame { offset_secs }),
        }
    }

    fn release(&mut self) {
        self.open = false;
    }
}

/// Detector answering from the same script as its source.
pub struct ScriptedDetector {
    script: Arc<DetectionScript>,
    loaded: bool,
    calls: usize,
}

impl ScriptedDetector {
    pub fn new(script: Arc<DetectionScript>) -> Self {
        Self {
            script,
            loaded: false,
            calls: 0,
        }
    }

    /// Number of `detect` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

impl Detector<ScriptFrame> for ScriptedDetector {
    fn load(&mut self) -> Result<(), SourceError> {
        self.loaded = true;
        Ok(())
    }

    fn detect(&mut self, frame: &ScriptFrame) -> Result<bool, SourceError> {
        self.calls += 1;
        match self.script.reading_at(frame.offset_secs) {
            Reading::Present => Ok(true),
            Reading::Absent | Reading::StreamLost => Ok(false),
            Reading::Error => Err(SourceError::Detection(format!(
                "scripted failure at {:.3}s",
                frame.offset_secs
            ))),
        }
    }

    fn unload(&mut self) {
        self.loaded = false;
    }
}
