pub mod app;
pub mod config;
pub mod constraints;
pub mod detection;
pub mod device;
pub mod error;
pub mod events;
pub mod frame;
pub mod monitor;
pub mod platform;
pub mod remote;
pub mod session;
pub mod status;

#[cfg(feature = "control_api")]
pub mod control;

pub use app::{ControlEvent, ControlHandle, Controller, ShutdownReason};
pub use config::PillocamConfig;
pub use constraints::{CaptureConstraints, ConstraintPolicy, Selector};
pub use detection::{Algorithm, Annotation, DetectionLoop, DetectionStatus};
pub use device::{Device, DeviceCatalog, DeviceType, FacingMode, Orientation};
pub use error::{AcquireError, FailureKind, PillocamError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, PillocamEvent};
pub use frame::{FrameData, FrameFormat};
pub use monitor::{ConnectionMonitor, ConnectionState};
pub use platform::{CaptureHandle, CapturePlatform, SimulatedPlatform};
pub use remote::{AnalysisService, HttpAnalysisClient, StubAnalysisService};
pub use session::{CameraSession, SessionState};
pub use status::{StatusAggregator, StatusSnapshot};

#[cfg(feature = "control_api")]
pub use control::ControlServer;

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use platform::GstPlatform;
