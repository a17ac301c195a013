//! Capture platform seam.
//!
//! Everything the session knows about cameras goes through [`CapturePlatform`]:
//! enumeration, stream acquisition against a [`CaptureConstraints`] request,
//! grabbing stills, releasing streams, and hot-plug notifications.

#[cfg(all(feature = "camera", target_os = "linux"))]
mod v4l2;
mod simulated;

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use v4l2::GstPlatform;
pub use simulated::SimulatedPlatform;

use crate::constraints::{CaptureConstraints, Selector};
use crate::device::Device;
use crate::error::{AcquireError, FailureKind, Result};
use crate::frame::FrameData;
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Opaque token for one open capture stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaptureHandle {
    id: u64,
    device_id: Option<String>,
}

impl CaptureHandle {
    pub fn new(id: u64, device_id: Option<String>) -> Self {
        Self { id, device_id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Device the platform actually opened, when it reports one
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }
}

#[async_trait]
pub trait CapturePlatform: Send + Sync {
    /// List video input devices currently visible
    async fn enumerate(&self) -> Result<Vec<Device>>;

    /// Open a capture stream satisfying the constraints
    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<CaptureHandle, AcquireError>;

    /// Grab the current frame; `None` when the stream has nothing to give
    async fn capture_frame(&self, handle: &CaptureHandle) -> Option<FrameData>;

    /// Close the stream and return the hardware to the platform
    async fn release(&self, handle: CaptureHandle);

    /// Fires whenever the platform's device list may have changed
    fn device_changes(&self) -> broadcast::Receiver<()>;
}

/// Pick the device a selector names, falling back to the first listed one
/// unless the selector is exact
pub(crate) fn resolve_device(
    devices: &[Device],
    selector: &Selector,
) -> std::result::Result<Device, AcquireError> {
    let fallback = || {
        devices.first().cloned().ok_or_else(|| {
            AcquireError::new(FailureKind::DeviceNotFound, "no video input devices")
        })
    };

    match selector {
        Selector::DeviceId { id, exact: true } => {
            devices.iter().find(|d| &d.id == id).cloned().ok_or_else(|| {
                AcquireError::new(
                    FailureKind::ConstraintUnsatisfiable,
                    format!("device '{}' is not available", id),
                )
            })
        }
        Selector::DeviceId { id, exact: false } => match devices.iter().find(|d| &d.id == id) {
            Some(device) => Ok(device.clone()),
            None => fallback(),
        },
        Selector::FacingMode { mode } => {
            let wanted = mode.orientation();
            match devices.iter().find(|d| d.orientation == wanted) {
                Some(device) => Ok(device.clone()),
                None => fallback(),
            }
        }
        Selector::Default => fallback(),
    }
}
