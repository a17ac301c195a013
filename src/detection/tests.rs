use super::*;
use crate::app::ControlEvent;
use crate::constraints::ConstraintPolicy;
use crate::events::EventBus;
use crate::platform::SimulatedPlatform;
use crate::remote::{StubAnalysisService, StubReply};
use crate::session::CameraSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct Harness {
    platform: Arc<SimulatedPlatform>,
    stub: Arc<StubAnalysisService>,
    session: CameraSession,
    detection: DetectionLoop,
    events: mpsc::Receiver<ControlEvent>,
}

async fn ready_harness() -> Harness {
    let platform = Arc::new(SimulatedPlatform::with_default_devices());
    let stub = Arc::new(StubAnalysisService::new());
    let bus = Arc::new(EventBus::new(64));
    let (tx, events) = mpsc::channel(64);

    let mut session = CameraSession::new(
        platform.clone(),
        ConstraintPolicy::new((64, 48), (32, 24), 3),
        Duration::from_secs(1),
        tx.clone(),
        bus.clone(),
    );
    session.start().await;
    assert!(session.state().is_ready());

    let detection = DetectionLoop::new(
        stub.clone(),
        Duration::from_millis(200),
        Algorithm::EdgeDetection,
        tx,
        bus,
    );

    Harness {
        platform,
        stub,
        session,
        detection,
        events,
    }
}

impl Harness {
    async fn step(&mut self) -> &'static str {
        match self.events.recv().await {
            Some(ControlEvent::DetectionTick { epoch }) => {
                self.detection.on_tick(epoch, &self.session).await;
                "tick"
            }
            Some(ControlEvent::DetectionCompleted(completion)) => {
                let ready = self.session.state().is_ready();
                let generation = self.session.generation();
                self.detection.on_completed(completion, ready, generation);
                "completed"
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_enable_requires_ready_session() {
    let mut h = ready_harness().await;
    h.session.stop().await;
    assert!(!h.detection.enable(false));
    assert!(!h.detection.status().active);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_tick_submits_and_records_result() {
    let mut h = ready_harness().await;
    h.stub.push_reply(StubReply::Success {
        count: 4,
        processed_image: Some("data:image/jpeg;base64,AAAA".to_string()),
    });
    let annotation = h.detection.subscribe_annotation();

    assert!(h.detection.enable(true));
    assert_eq!(h.step().await, "tick");
    assert!(h.detection.status().in_flight);
    assert_eq!(h.step().await, "completed");

    let status = h.detection.status();
    assert_eq!(status.count, 4);
    assert!(status.last_updated.is_some());
    assert!(!status.in_flight);
    assert_eq!(status.submissions, 1);

    let latest = annotation.borrow().clone().unwrap();
    assert_eq!(latest.count, 4);
    assert_eq!(latest.image_data, "data:image/jpeg;base64,AAAA");

    let submitted = h.stub.submissions();
    assert_eq!(submitted[0].algorithm, "algorithm2");
    assert!(submitted[0].image_data.starts_with("data:image/jpeg;base64,"));
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_guard_skips_ticks() {
    let mut h = ready_harness().await;
    h.stub.hold_submissions();
    h.detection.enable(true);

    for _ in 0..5 {
        assert_eq!(h.step().await, "tick");
    }
    assert_eq!(h.stub.submission_count(), 1);
    assert!(h.detection.is_in_flight());

    h.stub.release_submissions(1);
    assert_eq!(h.step().await, "completed");
    assert!(!h.detection.is_in_flight());

    assert_eq!(h.step().await, "tick");
    assert_eq!(h.stub.submission_count(), 2);
    assert_eq!(h.stub.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disable_mid_flight_stops_further_submissions() {
    let mut h = ready_harness().await;
    h.stub.hold_submissions();
    h.stub.push_reply(StubReply::Success {
        count: 2,
        processed_image: None,
    });
    h.detection.enable(true);
    assert_eq!(h.step().await, "tick");
    let stale_epoch = 1;

    h.detection.disable();
    assert!(!h.detection.status().active);

    // a tick queued before the disable is discarded
    h.detection.on_tick(stale_epoch, &h.session).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(h.events.try_recv().is_err());

    // the call already dispatched still lands while the session is ready
    h.stub.release_submissions(1);
    assert_eq!(h.step().await, "completed");
    assert_eq!(h.detection.status().count, 2);
    assert_eq!(h.stub.submission_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_result_keeps_count() {
    let mut h = ready_harness().await;
    h.stub.push_reply(StubReply::Success {
        count: 7,
        processed_image: None,
    });
    h.stub.push_reply(StubReply::Rejected("x".to_string()));
    h.detection.enable(true);

    h.step().await;
    h.step().await;
    let before = h.detection.status();
    assert_eq!(before.count, 7);

    h.step().await;
    h.step().await;
    let after = h.detection.status();
    assert_eq!(after.count, 7);
    assert_eq!(after.last_updated, before.last_updated);
    assert_eq!(after.last_error.as_deref(), Some("x"));
    assert_eq!(after.failures, 1);

    // next tick still goes out
    assert_eq!(h.step().await, "tick");
    assert_eq!(h.stub.submission_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_is_recorded() {
    let mut h = ready_harness().await;
    h.stub.push_reply(StubReply::Unreachable);
    h.detection.enable(true);
    h.step().await;
    h.step().await;

    let status = h.detection.status();
    assert_eq!(status.count, 0);
    assert!(status.last_updated.is_none());
    assert!(status.last_error.unwrap().contains("unreachable"));
    assert!(h.detection.status().active);
}

#[tokio::test(start_paused = true)]
async fn test_result_from_torn_down_session_is_dropped() {
    let mut h = ready_harness().await;
    h.stub.hold_submissions();
    h.stub.push_reply(StubReply::Success {
        count: 9,
        processed_image: Some("data:image/jpeg;base64,AAAA".to_string()),
    });
    h.detection.enable(true);
    assert_eq!(h.step().await, "tick");

    h.detection.disable();
    h.session.stop().await;
    h.session.start().await;

    h.stub.release_submissions(1);
    assert_eq!(h.step().await, "completed");
    let status = h.detection.status();
    assert_eq!(status.count, 0);
    assert!(!status.in_flight);
    assert!(h.detection.subscribe_annotation().borrow().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_missing_frame_skips_submission() {
    let mut h = ready_harness().await;
    h.platform.set_frames_available(false);
    h.detection.enable(true);
    h.step().await;
    h.step().await;
    assert_eq!(h.stub.submission_count(), 0);
    assert!(!h.detection.is_in_flight());
}

#[tokio::test(start_paused = true)]
async fn test_submit_once_obeys_guard() {
    let mut h = ready_harness().await;
    h.stub.hold_submissions();

    assert!(h.detection.submit_once(&h.session).await);
    assert!(!h.detection.submit_once(&h.session).await);
    assert_eq!(h.stub.submission_count(), 1);
    assert!(!h.detection.status().active);

    h.stub.release_submissions(1);
    assert_eq!(h.step().await, "completed");
    assert!(h.detection.submit_once(&h.session).await);
}

#[tokio::test]
async fn test_set_algorithm_changes_submissions() {
    let mut h = ready_harness().await;
    h.detection.set_algorithm(Algorithm::Threshold);
    assert!(h.detection.submit_once(&h.session).await);
    h.step().await;
    assert_eq!(h.stub.submissions()[0].algorithm, "algorithm1");
}
