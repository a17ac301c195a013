use crate::detection::{Algorithm, DetectionCompletion};
use crate::device::Orientation;

/// Everything the controller reacts to, processed one at a time
#[derive(Debug, Clone)]
pub enum ControlEvent {
    StartCamera,
    StopCamera,
    /// Explicit device choice; clears any orientation preference
    SelectDevice(String),
    /// Facing preference; clears any explicit device
    SelectOrientation(Orientation),
    EnableDetection,
    DisableDetection,
    /// Submit a single frame regardless of detection activity
    TestCapture,
    ChangeAlgorithm(Algorithm),
    AlgorithmChangeCompleted {
        algorithm: Algorithm,
        error: Option<String>,
    },
    /// The platform reported a device-list change
    DevicesChanged,
    /// A settle delay scheduled by the session elapsed
    SettleElapsed { generation: u64 },
    DetectionTick { epoch: u64 },
    DetectionCompleted(DetectionCompletion),
    Shutdown(ShutdownReason),
}

/// System shutdown reason
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
}
