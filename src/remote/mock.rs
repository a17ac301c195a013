use super::client::AnalysisService;
use super::types::{DeviceRegistration, ProcessImageRequest, ProcessImageResponse, RegisterResponse, RemoteStatus};
use crate::detection::Algorithm;
use crate::error::{FailureKind, PillocamError, Result};
use async_trait::async_trait;
use chrono::Local;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

/// Scripted outcome of one `process_image` call
#[derive(Debug, Clone)]
pub enum StubReply {
    /// 2xx with `success: true`; `None` echoes the submitted image back
    Success {
        count: u64,
        processed_image: Option<String>,
    },
    /// 2xx with `success: false`
    Rejected(String),
    /// Non-2xx status
    ServerError(String),
    /// Transport failure
    Unreachable,
}

struct StubState {
    replies: VecDeque<StubReply>,
    probes: VecDeque<bool>,
    probe_default: bool,
    algorithm: Algorithm,
    reject_algorithm_change: bool,
    submissions: Vec<ProcessImageRequest>,
    registrations: Vec<DeviceRegistration>,
}

/// In-process analysis service.
///
/// Serves the `--offline` mode and drives tests: replies, probe outcomes and
/// algorithm changes are scripted, and submissions can be held open to
/// observe in-flight behaviour.
pub struct StubAnalysisService {
    state: Mutex<StubState>,
    held: AtomicBool,
    gate: Arc<Semaphore>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for StubAnalysisService {
    fn default() -> Self {
        Self::new()
    }
}

impl StubAnalysisService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState {
                replies: VecDeque::new(),
                probes: VecDeque::new(),
                probe_default: true,
                algorithm: Algorithm::default(),
                reject_algorithm_change: false,
                submissions: Vec::new(),
                registrations: Vec::new(),
            }),
            held: AtomicBool::new(false),
            gate: Arc::new(Semaphore::new(0)),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_algorithm(self, algorithm: Algorithm) -> Self {
        self.state.lock().algorithm = algorithm;
        self
    }

    pub fn push_reply(&self, reply: StubReply) {
        self.state.lock().replies.push_back(reply);
    }

    /// Queue probe outcomes; once drained, `set_reachable` decides
    pub fn push_probe(&self, ok: bool) {
        self.state.lock().probes.push_back(ok);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().probe_default = reachable;
    }

    pub fn reject_algorithm_changes(&self, reject: bool) {
        self.state.lock().reject_algorithm_change = reject;
    }

    /// Park every following submission until released
    pub fn hold_submissions(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let `n` parked submissions finish
    pub fn release_submissions(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn submissions(&self) -> Vec<ProcessImageRequest> {
        self.state.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    pub fn registrations(&self) -> Vec<DeviceRegistration> {
        self.state.lock().registrations.clone()
    }

    pub fn algorithm(&self) -> Algorithm {
        self.state.lock().algorithm
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `process_image` calls observed
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn unreachable() -> PillocamError {
        PillocamError::remote(FailureKind::NetworkError, "analysis service unreachable")
    }
}

#[async_trait]
impl AnalysisService for StubAnalysisService {
    async fn probe(&self) -> Result<()> {
        let ok = {
            let mut state = self.state.lock();
            let default = state.probe_default;
            state.probes.pop_front().unwrap_or(default)
        };
        if ok {
            Ok(())
        } else {
            Err(Self::unreachable())
        }
    }

    async fn status(&self) -> Result<RemoteStatus> {
        let state = self.state.lock();
        if !state.probe_default {
            return Err(Self::unreachable());
        }
        Ok(RemoteStatus {
            algorithm: state.algorithm.as_str().to_string(),
            timestamp: Some(Local::now().format("%H:%M:%S").to_string()),
            ..Default::default()
        })
    }

    async fn process_image(&self, request: ProcessImageRequest) -> Result<ProcessImageResponse> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let reply = {
            let mut state = self.state.lock();
            state.submissions.push(request.clone());
            state.replies.pop_front().unwrap_or(StubReply::Success {
                count: 0,
                processed_image: None,
            })
        };
        debug!("Stub analysis reply: {:?}", reply);

        if self.held.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            StubReply::Success {
                count,
                processed_image,
            } => Ok(ProcessImageResponse {
                success: true,
                processed_image: Some(processed_image.unwrap_or(request.image_data)),
                count: Some(count),
                error: None,
            }),
            StubReply::Rejected(error) => Ok(ProcessImageResponse {
                success: false,
                error: Some(error),
                ..Default::default()
            }),
            StubReply::ServerError(message) => Err(PillocamError::remote(
                FailureKind::RemoteProcessingError,
                message,
            )),
            StubReply::Unreachable => Err(Self::unreachable()),
        }
    }

    async fn change_algorithm(&self, algorithm: Algorithm) -> Result<()> {
        let mut state = self.state.lock();
        if state.reject_algorithm_change {
            return Err(PillocamError::remote(
                FailureKind::RemoteProcessingError,
                "HTTP 422: unsupported algorithm",
            ));
        }
        state.algorithm = algorithm;
        Ok(())
    }

    async fn register_device(&self, registration: DeviceRegistration) -> Result<RegisterResponse> {
        let mut state = self.state.lock();
        state.registrations.push(registration);
        Ok(RegisterResponse {
            success: true,
            device_id: Some(format!("stub-{}", state.registrations.len())),
        })
    }
}
