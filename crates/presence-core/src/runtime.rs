//! Async wrapper that owns a [`PresenceTracker`] on a tokio task.
//!
//! The task ticks the tracker at a fixed interval and applies commands
//! between ticks, so ticks and commands never interleave. After every tick or
//! command the latest [`Event::StateSnapshot`] is published on a `watch`
//! channel; all other events go out on an unbounded channel.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::CoreError;
use crate::events::Event;
use crate::source::{Detector, FrameSource};
use crate::storage::SessionStore;
use crate::tracker::PresenceTracker;

/// Control commands accepted by a spawned tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
    /// Stop, then end the task.
    Shutdown,
}

struct Request {
    command: Command,
    /// Set when the caller awaits the outcome of `Start`.
    reply: Option<oneshot::Sender<Result<(), CoreError>>>,
}

/// Control side of a spawned tracker.
pub struct TrackerHandle {
    requests: mpsc::Sender<Request>,
    snapshots: watch::Receiver<Event>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// # Errors
    /// Returns the tracker's start error, or [`CoreError::RuntimeClosed`].
    pub async fn start(&self) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request {
                command: Command::Start,
                reply: Some(reply),
            })
            .await
            .map_err(|_| CoreError::RuntimeClosed)?;
        rx.await.map_err(|_| CoreError::RuntimeClosed)?
    }

    pub async fn pause(&self) -> Result<(), CoreError> {
        self.send(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<(), CoreError> {
        self.send(Command::Resume).await
    }

    pub async fn stop(&self) -> Result<(), CoreError> {
        self.send(Command::Stop).await
    }

    /// Fire-and-forget command delivery; start errors are only logged.
    pub async fn send(&self, command: Command) -> Result<(), CoreError> {
        self.requests
            .send(Request { command, reply: None })
            .await
            .map_err(|_| CoreError::RuntimeClosed)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Event {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Event> {
        self.snapshots.clone()
    }

    /// Stop the tracker (persisting any open session) and wait for the task.
    pub async fn shutdown(self) -> Result<(), CoreError> {
        // A closed channel means the task already finished.
        let _ = self.send(Command::Shutdown).await;
        self.task.await.map_err(|_| CoreError::RuntimeClosed)
    }
}

/// Move `tracker` onto a tokio task ticking every `tick_interval`.
///
/// Returns the control handle and the event stream. Dropping every handle
/// stops the tracker the same way as [`TrackerHandle::shutdown`].
pub fn spawn<F, D, S, C>(
    mut tracker: PresenceTracker<F, D, S, C>,
    tick_interval: Duration,
) -> (TrackerHandle, mpsc::UnboundedReceiver<Event>)
where
    F: FrameSource + 'static,
    D: Detector<F::Frame> + 'static,
    S: SessionStore + Send + 'static,
    C: Clock + 'static,
{
    let (request_tx, mut request_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(tracker.snapshot());

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = tick_interval.as_millis() as u64, "tracker runtime started");

        loop {
            let events = tokio::select! {
                request = request_rx.recv() => {
                    let Some(Request { command, reply }) = request else {
                        let events = tracker.stop();
                        publish(&event_tx, &snapshot_tx, events, tracker.snapshot());
                        break;
                    };
                    match command {
                        Command::Start => match tracker.start() {
                            Ok(events) => {
                                if let Some(reply) = reply {
                                    let _ = reply.send(Ok(()));
                                }
                                events
                            }
                            Err(e) => {
                                warn!("tracker failed to start: {e}");
                                if let Some(reply) = reply {
                                    let _ = reply.send(Err(e));
                                }
                                Vec::new()
                            }
                        },
                        Command::Pause => tracker.pause(),
                        Command::Resume => tracker.resume(),
                        Command::Stop => tracker.stop(),
                        Command::Shutdown => {
                            let events = tracker.stop();
                            publish(&event_tx, &snapshot_tx, events, tracker.snapshot());
                            break;
                        }
                    }
                }
                _ = ticker.tick() => tracker.tick(),
            };
            publish(&event_tx, &snapshot_tx, events, tracker.snapshot());
        }
        info!("tracker runtime stopped");
    });

    let handle = TrackerHandle {
        requests: request_tx,
        snapshots: snapshot_rx,
        task,
    };
    (handle, event_rx)
}

fn publish(
    events_tx: &mpsc::UnboundedSender<Event>,
    snapshot_tx: &watch::Sender<Event>,
    events: Vec<Event>,
    snapshot: Event,
) {
    for event in events {
        if events_tx.send(event).is_err() {
            debug!("event receiver dropped");
            break;
        }
    }
    snapshot_tx.send_replace(snapshot);
}
