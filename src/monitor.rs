use crate::events::{EventBus, PillocamEvent};
use crate::remote::AnalysisService;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reachability of the analysis service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

/// Periodic liveness probe of the analysis service.
///
/// Runs on its own task, so a slow probe never delays camera or detection
/// work. It is the only writer of [`ConnectionState`].
pub struct ConnectionMonitor {
    service: Arc<dyn AnalysisService>,
    period: Duration,
    state: Arc<watch::Sender<ConnectionState>>,
    event_bus: Arc<EventBus>,
    cancellation_token: Option<CancellationToken>,
}

impl ConnectionMonitor {
    pub fn new(service: Arc<dyn AnalysisService>, period: Duration, event_bus: Arc<EventBus>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            service,
            period,
            state: Arc::new(state),
            event_bus,
            cancellation_token: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.cancellation_token.is_some()
    }

    /// Probe once and record the outcome
    pub async fn probe_once(&self) -> ConnectionState {
        probe_and_record(self.service.as_ref(), &self.state, &self.event_bus).await
    }

    /// Start the heartbeat; the first probe happens immediately
    pub fn start(&mut self) {
        if self.cancellation_token.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let task_token = token.clone();
        let service = Arc::clone(&self.service);
        let state = Arc::clone(&self.state);
        let event_bus = Arc::clone(&self.event_bus);
        let period = self.period;

        info!("Starting heartbeat every {:?}", period);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => {
                        debug!("Heartbeat task cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = task_token.cancelled() => break,
                            _ = probe_and_record(service.as_ref(), &state, &event_bus) => {}
                        }
                    }
                }
            }
        });

        self.cancellation_token = Some(token);
    }

    pub fn stop(&mut self) {
        if let Some(token) = self.cancellation_token.take() {
            info!("Stopping heartbeat");
            token.cancel();
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn probe_and_record(
    service: &dyn AnalysisService,
    state: &watch::Sender<ConnectionState>,
    event_bus: &EventBus,
) -> ConnectionState {
    let next = match service.probe().await {
        Ok(()) => ConnectionState::Connected,
        Err(e) => {
            debug!("Heartbeat probe failed: {}", e);
            ConnectionState::Error
        }
    };

    let changed = state.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });

    if changed {
        let _ = event_bus.publish(PillocamEvent::ConnectionChanged {
            state: next,
            timestamp: SystemTime::now(),
        });
    }

    next
}
