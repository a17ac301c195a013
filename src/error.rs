use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by capture acquisition and remote detection
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    #[error("permission denied")]
    PermissionDenied,

    #[error("device not found")]
    DeviceNotFound,

    #[error("device busy")]
    DeviceBusy,

    #[error("constraint unsatisfiable")]
    ConstraintUnsatisfiable,

    #[error("network error")]
    NetworkError,

    #[error("remote processing error")]
    RemoteProcessingError,
}

impl FailureKind {
    /// Only constraint failures are recovered locally, by relaxing the request
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FailureKind::ConstraintUnsatisfiable)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::PermissionDenied => "Camera permission was denied; allow camera access",
            FailureKind::DeviceNotFound => "No camera found; check the camera connection",
            FailureKind::DeviceBusy => "The camera is in use by another application",
            FailureKind::ConstraintUnsatisfiable => {
                "The camera cannot satisfy the requested settings; try another camera"
            }
            FailureKind::NetworkError => "Cannot reach the analysis service",
            FailureKind::RemoteProcessingError => "The analysis service rejected the image",
        }
    }
}

/// Failure reported by a capture platform when opening a stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct AcquireError {
    pub kind: FailureKind,
    pub message: String,
}

impl AcquireError {
    pub fn new<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum PillocamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Acquisition failed: {0}")]
    Acquisition(#[from] AcquireError),

    #[error("Remote error ({kind}): {message}")]
    Remote { kind: FailureKind, message: String },

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl PillocamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn remote<S: Into<String>>(kind: FailureKind, message: S) -> Self {
        Self::Remote {
            kind,
            message: message.into(),
        }
    }

    /// Map onto the failure taxonomy where one applies
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PillocamError::Http(_) => Some(FailureKind::NetworkError),
            PillocamError::Acquisition(e) => Some(e.kind),
            PillocamError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PillocamError>;
