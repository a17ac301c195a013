use super::types::{ControlEvent, ShutdownReason};
use crate::config::PillocamConfig;
use crate::constraints::ConstraintPolicy;
use crate::detection::{Annotation, DetectionLoop};
use crate::device::{select_preferred, DeviceCatalog, DeviceType};
use crate::error::{PillocamError, Result};
use crate::events::{EventBus, EventFilter, EventReceiver, PillocamEvent};
use crate::monitor::ConnectionMonitor;
use crate::platform::CapturePlatform;
use crate::remote::AnalysisService;
use crate::session::{CameraSession, DeviceChange, SessionState};
use crate::status::{StatusAggregator, StatusSnapshot};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cloneable entry point for everything outside the controller task
#[derive(Clone)]
pub struct ControlHandle {
    sender: mpsc::Sender<ControlEvent>,
    status: StatusAggregator,
    annotation: watch::Receiver<Option<Annotation>>,
    event_bus: Arc<EventBus>,
}

impl ControlHandle {
    pub async fn send(&self, event: ControlEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| PillocamError::system("controller is not running"))
    }

    /// For callers on a blocking thread
    pub fn blocking_send(&self, event: ControlEvent) -> Result<()> {
        self.sender
            .blocking_send(event)
            .map_err(|_| PillocamError::system("controller is not running"))
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn status(&self) -> StatusAggregator {
        self.status.clone()
    }

    pub fn annotation(&self) -> Option<Annotation> {
        self.annotation.borrow().clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PillocamEvent> {
        self.event_bus.subscribe()
    }

    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        self.event_bus.subscribe_filtered(filter, name)
    }
}

/// Single consumer of [`ControlEvent`]s; owns the session, catalog,
/// detection loop and heartbeat.
pub struct Controller {
    pub(crate) config: PillocamConfig,
    pub(crate) platform: Arc<dyn CapturePlatform>,
    pub(crate) service: Arc<dyn AnalysisService>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) catalog: DeviceCatalog,
    pub(crate) session: CameraSession,
    pub(crate) detection: DetectionLoop,
    pub(crate) monitor: ConnectionMonitor,
    pub(crate) sender: mpsc::Sender<ControlEvent>,
    pub(crate) receiver: mpsc::Receiver<ControlEvent>,
    pub(crate) device_type: DeviceType,
    pub(crate) remote_device_id: Option<String>,
    pub(crate) first_grant_seen: bool,
    pub(crate) cancellation_token: CancellationToken,
}

impl Controller {
    pub fn new(
        config: PillocamConfig,
        platform: Arc<dyn CapturePlatform>,
        service: Arc<dyn AnalysisService>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.system.command_queue_capacity);
        let event_bus = Arc::new(EventBus::new(config.system.event_bus_capacity));

        let catalog = DeviceCatalog::new(Arc::clone(&platform), Arc::clone(&event_bus));
        let mut session = CameraSession::new(
            Arc::clone(&platform),
            ConstraintPolicy::from_config(&config.camera),
            config.camera.settle_delay(),
            sender.clone(),
            Arc::clone(&event_bus),
        );
        session.set_orientation_preference(config.camera.orientation_preference());

        let detection = DetectionLoop::new(
            Arc::clone(&service),
            config.detection.tick_interval(),
            config.detection.algorithm,
            sender.clone(),
            Arc::clone(&event_bus),
        );
        let monitor = ConnectionMonitor::new(
            Arc::clone(&service),
            config.remote.heartbeat_interval(),
            Arc::clone(&event_bus),
        );
        let device_type = config.camera.device_type();

        Self {
            config,
            platform,
            service,
            event_bus,
            catalog,
            session,
            detection,
            monitor,
            sender,
            receiver,
            device_type,
            remote_device_id: None,
            first_grant_seen: false,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            sender: self.sender.clone(),
            status: StatusAggregator::new(
                self.session.subscribe(),
                self.detection.subscribe_status(),
                self.monitor.subscribe(),
                self.catalog.subscribe(),
            ),
            annotation: self.detection.subscribe_annotation(),
            event_bus: Arc::clone(&self.event_bus),
        }
    }

    /// Id assigned by the analysis service on registration
    pub fn remote_device_id(&self) -> Option<&str> {
        self.remote_device_id.as_deref()
    }

    /// Process events until a shutdown request arrives
    pub async fn event_loop(&mut self) -> Result<ShutdownReason> {
        self.spawn_device_watcher();

        while let Some(event) = self.receiver.recv().await {
            if let ControlEvent::Shutdown(reason) = event {
                return Ok(reason);
            }
            self.dispatch(event).await;
        }

        Err(PillocamError::system("control channel closed unexpectedly"))
    }

    pub(crate) async fn dispatch(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::StartCamera => {
                let state = self.session.start().await;
                self.after_transition(state).await;
            }
            ControlEvent::StopCamera => {
                self.detection.disable();
                self.session.stop().await;
            }
            ControlEvent::SelectDevice(id) => {
                if self.catalog.get(&id).is_none() {
                    warn!("Selected device '{}' is not in the current list", id);
                }
                let orientation_hint = self.catalog.orientation_of(&id);
                self.change_device(DeviceChange::Device {
                    id,
                    orientation_hint,
                })
                .await;
            }
            ControlEvent::SelectOrientation(orientation) => {
                self.change_device(DeviceChange::Orientation(orientation))
                    .await;
            }
            ControlEvent::EnableDetection => {
                let ready = self.session.state().is_ready();
                self.detection.enable(ready);
            }
            ControlEvent::DisableDetection => self.detection.disable(),
            ControlEvent::TestCapture => {
                self.detection.submit_once(&self.session).await;
            }
            ControlEvent::ChangeAlgorithm(algorithm) => self.spawn_algorithm_change(algorithm),
            ControlEvent::AlgorithmChangeCompleted { algorithm, error } => match error {
                None => {
                    self.detection.set_algorithm(algorithm);
                    let _ = self
                        .event_bus
                        .publish(PillocamEvent::AlgorithmChanged { algorithm });
                }
                Some(error) => {
                    let _ = self.event_bus.publish(PillocamEvent::SystemError {
                        component: "algorithm".to_string(),
                        error: format!("change to {} rejected: {}", algorithm, error),
                    });
                }
            },
            ControlEvent::DevicesChanged => self.refresh_devices().await,
            ControlEvent::SettleElapsed { generation } => {
                let state = self.session.on_settle_elapsed(generation).await;
                self.after_transition(state).await;
            }
            ControlEvent::DetectionTick { epoch } => {
                self.detection.on_tick(epoch, &self.session).await;
            }
            ControlEvent::DetectionCompleted(completion) => {
                let ready = self.session.state().is_ready();
                let generation = self.session.generation();
                self.detection.on_completed(completion, ready, generation);
            }
            ControlEvent::Shutdown(_) => {}
        }
    }

    /// Tear down detection first, then let the session switch targets
    async fn change_device(&mut self, change: DeviceChange) {
        self.detection.disable();
        let state = self.session.request_device_change(change).await;
        self.after_transition(state).await;
    }

    pub(crate) async fn after_transition(&mut self, state: SessionState) {
        if state.is_ready() {
            // labels become readable once a stream has been granted
            self.refresh_devices().await;
            if !self.first_grant_seen {
                self.first_grant_seen = true;
                self.reselect_after_grant().await;
            }
        } else {
            self.detection.disable();
        }
    }

    pub(crate) async fn refresh_devices(&mut self) {
        match self.catalog.refresh().await {
            Ok(refresh) => {
                if refresh.changed {
                    self.reconcile_selection();
                } else {
                    debug!("Device list unchanged");
                }
            }
            Err(e) => {
                warn!("Device enumeration failed: {}", e);
                let _ = self.event_bus.publish(PillocamEvent::SystemError {
                    component: "device_catalog".to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    fn reconcile_selection(&mut self) {
        if let Some(id) = self.session.selection().device_id.clone() {
            if self.catalog.get(&id).is_none() {
                self.session.clear_device_selection();
            }
        }

        if self.session.selection().is_empty() {
            if let Some(device) = select_preferred(self.catalog.devices(), self.device_type, None)
            {
                let (id, orientation) = (device.id.clone(), device.orientation);
                info!("Preferred camera: {}", id);
                self.session.adopt_device(&id, orientation);
            }
        }
    }

    /// Re-run the automatic pick once labels are known. A device the user
    /// chose only gets its orientation hint refreshed.
    async fn reselect_after_grant(&mut self) {
        let selection = self.session.selection().clone();
        let Some(current) = selection.device_id else {
            return;
        };

        if !selection.adopted {
            let orientation = self.catalog.orientation_of(&current);
            self.session.update_device_orientation(orientation);
            return;
        }

        let preferred = select_preferred(self.catalog.devices(), self.device_type, None)
            .map(|d| (d.id.clone(), d.orientation));
        let Some((id, orientation)) = preferred else {
            return;
        };

        if id == current {
            self.session.adopt_device(&id, orientation);
            return;
        }

        info!("Preferred camera is now {}, switching from {}", id, current);
        self.detection.disable();
        self.session
            .request_device_change(DeviceChange::Device {
                id: id.clone(),
                orientation_hint: orientation,
            })
            .await;
        self.session.adopt_device(&id, orientation);
    }

    fn spawn_algorithm_change(&self, algorithm: crate::detection::Algorithm) {
        let service = Arc::clone(&self.service);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let error = match service.change_algorithm(algorithm).await {
                Ok(()) => None,
                Err(e) => Some(e.to_string()),
            };
            let _ = sender
                .send(ControlEvent::AlgorithmChangeCompleted { algorithm, error })
                .await;
        });
    }

    fn spawn_device_watcher(&self) {
        let mut changes = self.platform.device_changes();
        let sender = self.sender.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            if sender.send(ControlEvent::DevicesChanged).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
            debug!("Device watcher exited");
        });
    }
}
