//! Integration tests for the tokio runtime wrapper.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use presence_core::{
    spawn, Clock, Database, DetectionScript, Event, ManualClock, PresenceTracker, RunPhase, ScriptedDetector,
    ScriptedSource, StopReason, TrackerStatus,
};

fn tracker(script: &str, clock: &ManualClock) -> PresenceTracker<ScriptedSource, ScriptedDetector, Database, ManualClock> {
    let origin = clock.now();
    let script = Arc::new(DetectionScript::parse(script).unwrap());
    let source = ScriptedSource::new(script.clone(), clock.clone(), origin);
    let detector = ScriptedDetector::new(script);
    PresenceTracker::new(source, detector, Database::open_memory().unwrap(), clock.clone())
}

async fn next_matching(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<Event>,
    pred: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_commands_drive_spawned_tracker() {
    let clock = ManualClock::new(Utc::now());
    let (handle, mut events) = spawn(tracker("0 present\n", &clock), Duration::from_millis(5));

    handle.start().await.unwrap();
    next_matching(&mut events, |e| matches!(e, Event::TrackerStarted { .. })).await;

    clock.advance_secs(1.5);
    next_matching(&mut events, |e| matches!(e, Event::SessionStarted { .. })).await;

    handle.pause().await.unwrap();
    next_matching(&mut events, |e| matches!(e, Event::TrackerPaused { .. })).await;
    match handle.snapshot() {
        Event::StateSnapshot { phase, status, .. } => {
            assert_eq!(phase, RunPhase::Paused);
            assert_eq!(status, TrackerStatus::Paused);
        }
        other => panic!("unexpected snapshot {other:?}"),
    }

    handle.resume().await.unwrap();
    next_matching(&mut events, |e| matches!(e, Event::TrackerResumed { .. })).await;

    clock.advance_secs(2.0);
    handle.stop().await.unwrap();
    let ended = next_matching(&mut events, |e| matches!(e, Event::SessionEnded { .. })).await;
    if let Event::SessionEnded { duration_secs, .. } = ended {
        assert!((duration_secs - 2.0).abs() < 1e-6);
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lost_stream_keeps_runtime_alive() {
    let clock = ManualClock::new(Utc::now());
    let (handle, mut events) = spawn(tracker("0 present\n2 lost\n", &clock), Duration::from_millis(5));

    handle.start().await.unwrap();
    clock.advance_secs(3.0);
    next_matching(&mut events, |e| {
        matches!(
            e,
            Event::TrackerStopped {
                reason: StopReason::StreamLost,
                ..
            }
        )
    })
    .await;

    // The task still answers commands after the tracker stopped itself.
    handle.stop().await.unwrap();
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_error_is_returned_to_caller() {
    let clock = ManualClock::new(Utc::now());
    let script = Arc::new(DetectionScript::parse("0 present\n").unwrap());
    let source = ScriptedSource::unavailable(script.clone(), clock.clone(), Utc::now());
    let detector = ScriptedDetector::new(script);
    let tracker = PresenceTracker::new(source, detector, Database::open_memory().unwrap(), clock);
    let (handle, _events) = spawn(tracker, Duration::from_millis(5));

    assert!(handle.start().await.is_err());
    handle.shutdown().await.unwrap();
}
