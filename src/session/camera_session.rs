use super::state::{RetryState, SessionState};
use crate::app::ControlEvent;
use crate::constraints::ConstraintPolicy;
use crate::device::Orientation;
use crate::events::{EventBus, PillocamEvent};
use crate::frame::FrameData;
use crate::platform::{CaptureHandle, CapturePlatform};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A user-requested change of capture target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceChange {
    /// Explicit device, with the orientation its label suggests
    Device {
        id: String,
        orientation_hint: Orientation,
    },
    Orientation(Orientation),
}

/// Current capture target. Device and orientation are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub device_id: Option<String>,
    pub device_orientation: Option<Orientation>,
    pub orientation: Option<Orientation>,
    /// The device was picked by the catalog, not by the user
    pub adopted: bool,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.device_id.is_none() && self.orientation.is_none()
    }

    /// Orientation handed to the ladder's facing-mode rungs
    pub fn effective_orientation(&self) -> Option<Orientation> {
        self.orientation
            .or(self.device_orientation)
            .and_then(|o| o.as_preference())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    /// Next rung of the ladder after a constraint failure
    Retry,
    /// Fresh acquisition after a device switch
    Switch,
}

struct PendingRestart {
    generation: u64,
    kind: PendingKind,
    token: CancellationToken,
}

/// Owns the single capture stream and its lifecycle.
///
/// Acquisitions are awaited inline, so only one can be in progress. Delayed
/// restarts run as cancellable tasks that post [`ControlEvent::SettleElapsed`]
/// back to the controller; a stale generation is ignored on receipt.
pub struct CameraSession {
    platform: Arc<dyn CapturePlatform>,
    policy: ConstraintPolicy,
    settle_delay: Duration,
    retry: RetryState,
    handle: Option<CaptureHandle>,
    generation: u64,
    selection: Selection,
    pending: Option<PendingRestart>,
    events: mpsc::Sender<ControlEvent>,
    state: watch::Sender<SessionState>,
    event_bus: Arc<EventBus>,
}

impl CameraSession {
    pub fn new(
        platform: Arc<dyn CapturePlatform>,
        policy: ConstraintPolicy,
        settle_delay: Duration,
        events: mpsc::Sender<ControlEvent>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            platform,
            policy,
            settle_delay,
            retry: RetryState::default(),
            handle: None,
            generation: 0,
            selection: Selection::default(),
            pending: None,
            events,
            state,
            event_bus,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Device id of the open stream, if any
    pub fn active_device(&self) -> Option<&str> {
        self.handle.as_ref().and_then(|h| h.device_id())
    }

    pub fn has_pending_restart(&self) -> bool {
        self.pending.is_some()
    }

    /// Begin acquisition from the first rung.
    ///
    /// No-op while starting, ready or waiting to restart. From `Failed` this
    /// is the manual retry. A start during a device-switch settle delay takes
    /// over the pending restart.
    pub async fn start(&mut self) -> SessionState {
        let current = self.state();
        if current.is_busy() {
            debug!("Start ignored, session is {}", current.label());
            return current;
        }

        if self.pending.is_some() {
            self.cancel_pending();
            self.generation += 1;
        }
        self.retry.reset();
        self.acquire().await
    }

    /// Release the stream and return to `Idle`, cancelling any pending restart
    pub async fn stop(&mut self) -> SessionState {
        self.cancel_pending();
        self.generation += 1;

        if let Some(handle) = self.handle.take() {
            info!("Releasing capture stream {}", handle.id());
            self.platform.release(handle).await;
        }

        self.retry.reset();
        self.set_state(SessionState::Idle);
        SessionState::Idle
    }

    /// Record a new capture target and, if the session is running, tear it
    /// down and schedule a fresh start after the settle delay.
    pub async fn request_device_change(&mut self, change: DeviceChange) -> SessionState {
        match change {
            DeviceChange::Device {
                id,
                orientation_hint,
            } => {
                info!("Camera switched to device '{}'", id);
                self.selection.device_id = Some(id);
                self.selection.device_orientation = Some(orientation_hint);
                self.selection.orientation = None;
            }
            DeviceChange::Orientation(orientation) => {
                info!("Camera switched to {} orientation", orientation);
                self.selection.orientation = orientation.as_preference();
                self.selection.device_id = None;
                self.selection.device_orientation = None;
            }
        }
        self.selection.adopted = false;

        if !self.state().is_busy() {
            return self.state();
        }

        self.stop().await;
        self.schedule_settle(PendingKind::Switch);
        self.state()
    }

    /// Adopt a device chosen by the catalog without restarting
    pub fn adopt_device(&mut self, id: &str, orientation: Orientation) {
        debug!("Adopting device '{}' as selection", id);
        self.selection.device_id = Some(id.to_string());
        self.selection.device_orientation = Some(orientation);
        self.selection.adopted = true;
    }

    /// Replace the orientation hint of the selected device once its label is known
    pub fn update_device_orientation(&mut self, orientation: Orientation) {
        if self.selection.device_id.is_some() {
            self.selection.device_orientation = Some(orientation);
        }
    }

    /// Forget an explicit device that disappeared
    pub fn clear_device_selection(&mut self) {
        if let Some(id) = self.selection.device_id.take() {
            info!("Selected device '{}' is no longer available", id);
        }
        self.selection.device_orientation = None;
        self.selection.adopted = false;
    }

    /// Set the orientation preference without restarting
    pub fn set_orientation_preference(&mut self, orientation: Option<Orientation>) {
        self.selection.orientation = orientation.and_then(|o| o.as_preference());
    }

    /// Handle a settle-delay expiry posted by [`Self::schedule_settle`]
    pub async fn on_settle_elapsed(&mut self, generation: u64) -> SessionState {
        let matches = self
            .pending
            .as_ref()
            .map(|p| p.generation == generation)
            .unwrap_or(false);
        if !matches {
            debug!("Dropping stale settle timer (generation {})", generation);
            return self.state();
        }

        let kind = match self.pending.take() {
            Some(pending) => pending.kind,
            None => return self.state(),
        };

        match kind {
            PendingKind::Retry => self.acquire().await,
            PendingKind::Switch => {
                self.retry.reset();
                self.acquire().await
            }
        }
    }

    /// Grab a frame from the open stream
    pub async fn capture_frame(&self) -> Option<FrameData> {
        let handle = self.handle.as_ref()?;
        if !self.state.borrow().is_ready() {
            return None;
        }
        self.platform.capture_frame(handle).await
    }

    /// Generation of the current stream; bumps on every teardown
    pub fn generation(&self) -> u64 {
        self.generation
    }

    async fn acquire(&mut self) -> SessionState {
        let constraints = self.policy.build(
            self.selection.effective_orientation(),
            self.selection.device_id.as_deref(),
            self.retry.attempt,
        );

        self.set_state(SessionState::Starting);
        info!(
            attempt = self.retry.attempt,
            "Requesting capture stream: {}", constraints
        );

        match self.platform.acquire(&constraints).await {
            Ok(handle) => {
                info!(
                    "Capture stream {} ready on {}",
                    handle.id(),
                    handle.device_id().unwrap_or("default device")
                );
                self.handle = Some(handle);
                self.retry.reset();
                self.set_state(SessionState::Ready);
            }
            Err(e) if e.kind.is_recoverable() && self.policy.can_relax(self.retry.attempt) => {
                self.retry.record_failure(e.kind);
                warn!(
                    "Capture constraints unsatisfiable ({}), relaxing to attempt {}",
                    e.message, self.retry.attempt
                );
                self.set_state(SessionState::Restarting);
                self.schedule_settle(PendingKind::Retry);
            }
            Err(e) => {
                self.retry.last_failure = Some(e.kind);
                warn!("Camera acquisition failed: {}", e);
                self.set_state(SessionState::Failed {
                    kind: e.kind,
                    reason: e.message,
                });
            }
        }

        self.state()
    }

    fn schedule_settle(&mut self, kind: PendingKind) {
        self.cancel_pending();
        self.generation += 1;

        let generation = self.generation;
        let token = CancellationToken::new();
        let task_token = token.clone();
        let events = self.events.clone();
        let delay = self.settle_delay;

        debug!("Scheduling {:?} in {:?} (generation {})", kind, delay, generation);
        tokio::spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(ControlEvent::SettleElapsed { generation }).await;
                }
            }
        });

        self.pending = Some(PendingRestart {
            generation,
            kind,
            token,
        });
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!("Cancelling pending {:?}", pending.kind);
            pending.token.cancel();
        }
    }

    fn set_state(&self, next: SessionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next.clone();
                true
            }
        });

        if changed {
            let _ = self.event_bus.publish(PillocamEvent::SessionStateChanged {
                state: next,
                timestamp: SystemTime::now(),
            });
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
