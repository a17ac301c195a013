use crate::error::FailureKind;
use serde::{Deserialize, Serialize};

/// Lifecycle of the single capture stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Ready,
    /// Waiting out the settle delay before the next acquisition
    Restarting,
    Failed { kind: FailureKind, reason: String },
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready)
    }

    /// True while an acquisition is running or scheduled
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Ready | SessionState::Restarting
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Restarting => "restarting",
            SessionState::Failed { .. } => "failed",
        }
    }
}

/// Position on the constraint ladder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub attempt: u32,
    pub last_failure: Option<FailureKind>,
}

impl RetryState {
    pub fn reset(&mut self) {
        *self = RetryState::default();
    }

    pub fn record_failure(&mut self, kind: FailureKind) {
        self.attempt += 1;
        self.last_failure = Some(kind);
    }
}
