//! # Presence Core Library
//!
//! This library provides the core logic for the presence tracker: it watches
//! a frame source through a detector, turns the detector's yes/no answers into
//! debounced presence sessions and keeps a daily log of them in SQLite. The
//! `presence` CLI is a thin layer over the same library.
//!
//! ## Architecture
//!
//! - **Tracker**: A clock-driven state machine that requires the caller to
//!   periodically invoke `tick()`; adaptive polling, absence debouncing and
//!   pause re-anchoring all happen inside it
//! - **Storage**: SQLite-based session log and TOML-based configuration
//! - **Runtime**: A tokio task that owns a tracker and exposes it through
//!   channels
//! - **Replay**: Deterministic offline runs of recorded detection scripts
//!
//! ## Key Components
//!
//! - [`PresenceTracker`]: Core tracker state machine
//! - [`Database`]: Session persistence and reporting queries
//! - [`Config`]: Application configuration management
//! - [`FrameSource`] / [`Detector`]: Boundaries to capture and inference

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod events;
pub mod replay;
pub mod runtime;
pub mod source;
pub mod storage;
pub mod tracker;

pub use aggregate::{format_duration, Aggregator};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, DatabaseError, SourceError, ValidationError};
pub use events::{Event, PersistOutcome, StopReason};
pub use replay::{replay, ReplayReport};
pub use runtime::{spawn, Command, TrackerHandle};
pub use source::{DetectionScript, Detector, FrameSource, Reading, ScriptedDetector, ScriptedSource};
pub use storage::{Config, Database, SessionStore, WriteFailurePolicy};
pub use tracker::{PresenceTracker, RunPhase, Session, TrackerSettings, TrackerStatus};
