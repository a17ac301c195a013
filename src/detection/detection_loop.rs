use super::status::{Algorithm, DetectionStatus};
use crate::app::ControlEvent;
use crate::error::{FailureKind, PillocamError};
use crate::events::{EventBus, PillocamEvent};
use crate::frame::FrameData;
use crate::remote::{AnalysisService, ProcessImageRequest, ProcessImageResponse};
use crate::session::CameraSession;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Why a submission produced no result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<PillocamError> for DetectionFailure {
    fn from(e: PillocamError) -> Self {
        Self {
            kind: e.failure_kind().unwrap_or(FailureKind::NetworkError),
            message: e.to_string(),
        }
    }
}

/// Result of one remote submission, posted back to the controller
#[derive(Debug, Clone)]
pub struct DetectionCompletion {
    pub request_id: u64,
    /// Session generation the frame was captured under
    pub session_generation: u64,
    pub outcome: Result<ProcessImageResponse, DetectionFailure>,
}

/// Latest annotated frame returned by the service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    /// `data:` URI as returned by the service
    pub image_data: String,
    pub count: u64,
    pub received_at: DateTime<Utc>,
}

/// Timer-driven submission of frames to the analysis service.
///
/// Never more than one submission is outstanding: a tick that finds one in
/// flight is skipped. Ticks carry an epoch, and `disable` bumps it, so a tick
/// already queued when detection is disabled is discarded on receipt.
pub struct DetectionLoop {
    service: Arc<dyn AnalysisService>,
    period: Duration,
    events: mpsc::Sender<ControlEvent>,
    event_bus: Arc<EventBus>,
    status: watch::Sender<DetectionStatus>,
    annotation: watch::Sender<Option<Annotation>>,
    epoch: u64,
    ticker: Option<CancellationToken>,
    in_flight: Option<u64>,
    next_request_id: u64,
}

impl DetectionLoop {
    pub fn new(
        service: Arc<dyn AnalysisService>,
        period: Duration,
        algorithm: Algorithm,
        events: mpsc::Sender<ControlEvent>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (status, _) = watch::channel(DetectionStatus {
            algorithm,
            ..Default::default()
        });
        let (annotation, _) = watch::channel(None);
        Self {
            service,
            period,
            events,
            event_bus,
            status,
            annotation,
            epoch: 0,
            ticker: None,
            in_flight: None,
            next_request_id: 1,
        }
    }

    pub fn status(&self) -> DetectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<DetectionStatus> {
        self.status.subscribe()
    }

    pub fn subscribe_annotation(&self) -> watch::Receiver<Option<Annotation>> {
        self.annotation.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.status.borrow().algorithm
    }

    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        self.status.send_modify(|s| s.algorithm = algorithm);
    }

    /// Start ticking. Refused unless the session is ready.
    pub fn enable(&mut self, session_ready: bool) -> bool {
        if !session_ready {
            warn!("Detection not started: camera is not ready");
            return false;
        }
        if self.ticker.is_some() {
            return true;
        }

        self.epoch += 1;
        let epoch = self.epoch;
        let token = CancellationToken::new();
        let task_token = token.clone();
        let events = self.events.clone();
        let period = self.period;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        match events.try_send(ControlEvent::DetectionTick { epoch }) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                trace!("Controller busy, dropping detection tick");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
        });

        self.ticker = Some(token);
        self.status.send_modify(|s| s.active = true);
        info!("Detection started every {:?}", period);
        true
    }

    /// Stop ticking. A submission already in flight is left to complete.
    pub fn disable(&mut self) {
        let Some(token) = self.ticker.take() else {
            return;
        };
        token.cancel();
        self.epoch += 1;
        self.status.send_modify(|s| s.active = false);
        info!("Detection stopped");
    }

    /// Handle one scheduler tick
    pub async fn on_tick(&mut self, epoch: u64, session: &CameraSession) {
        if epoch != self.epoch || self.ticker.is_none() {
            trace!("Dropping tick from epoch {}", epoch);
            return;
        }
        if !session.state().is_ready() {
            return;
        }

        let Some(frame) = session.capture_frame().await else {
            debug!("No frame available from capture stream");
            return;
        };

        if self.in_flight.is_some() {
            trace!("Submission in flight, skipping tick");
            return;
        }

        self.submit(frame, session.generation());
    }

    /// Capture and submit a single frame outside the scheduler.
    ///
    /// Returns false when nothing was submitted.
    pub async fn submit_once(&mut self, session: &CameraSession) -> bool {
        if !session.state().is_ready() {
            warn!("Test capture refused: camera is not ready");
            return false;
        }
        if self.in_flight.is_some() {
            info!("Test capture skipped: a submission is already in flight");
            return false;
        }
        match session.capture_frame().await {
            Some(frame) => {
                self.submit(frame, session.generation());
                true
            }
            None => {
                warn!("Test capture failed: no frame available");
                false
            }
        }
    }

    /// Apply a completed submission.
    ///
    /// Results for a torn-down or replaced session are dropped.
    pub fn on_completed(
        &mut self,
        completion: DetectionCompletion,
        session_ready: bool,
        session_generation: u64,
    ) {
        if self.in_flight == Some(completion.request_id) {
            self.in_flight = None;
            self.status.send_modify(|s| s.in_flight = false);
        }

        if !session_ready || completion.session_generation != session_generation {
            debug!(
                "Dropping stale detection result {} (generation {})",
                completion.request_id, completion.session_generation
            );
            return;
        }

        match completion.outcome {
            Ok(response) => {
                let count = response.count.unwrap_or(0);
                let now = Utc::now();
                self.status.send_modify(|s| {
                    s.count = count;
                    s.last_updated = Some(now);
                    s.last_error = None;
                });
                if let Some(image_data) = response.processed_image {
                    self.annotation.send_replace(Some(Annotation {
                        image_data,
                        count,
                        received_at: now,
                    }));
                }
                debug!("Detection result: {} object(s)", count);
                let _ = self.event_bus.publish(PillocamEvent::DetectionCompleted {
                    count,
                    timestamp: SystemTime::now(),
                });
            }
            Err(failure) => {
                self.status.send_modify(|s| {
                    s.failures += 1;
                    s.last_error = Some(failure.message.clone());
                });
                let _ = self.event_bus.publish(PillocamEvent::DetectionFailed {
                    kind: failure.kind,
                    message: failure.message,
                    timestamp: SystemTime::now(),
                });
            }
        }
    }

    fn submit(&mut self, frame: FrameData, session_generation: u64) {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.in_flight = Some(request_id);
        self.status.send_modify(|s| {
            s.in_flight = true;
            s.submissions += 1;
        });

        let request = ProcessImageRequest {
            image_data: frame.to_data_uri(),
            algorithm: self.algorithm().as_str().to_string(),
        };
        let service = Arc::clone(&self.service);
        let events = self.events.clone();

        trace!("Submitting frame {} as request {}", frame.id, request_id);
        tokio::spawn(async move {
            let outcome = match service.process_image(request).await {
                Ok(response) if response.success => Ok(response),
                Ok(response) => Err(DetectionFailure {
                    kind: FailureKind::RemoteProcessingError,
                    message: response
                        .error
                        .unwrap_or_else(|| "analysis reported failure".to_string()),
                }),
                Err(e) => Err(DetectionFailure::from(e)),
            };

            let completion = DetectionCompletion {
                request_id,
                session_generation,
                outcome,
            };
            if events
                .send(ControlEvent::DetectionCompleted(completion))
                .await
                .is_err()
            {
                debug!("Controller gone before detection result {} arrived", request_id);
            }
        });
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        if let Some(token) = self.ticker.take() {
            token.cancel();
        }
    }
}
