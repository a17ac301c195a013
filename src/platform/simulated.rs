use super::{resolve_device, CaptureHandle, CapturePlatform};
use crate::constraints::CaptureConstraints;
use crate::device::Device;
use crate::error::{AcquireError, FailureKind, PillocamError, Result};
use crate::frame::{FrameData, FrameFormat};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

struct OpenStream {
    device_id: String,
    width: u32,
    height: u32,
    frames: u64,
}

struct SimState {
    devices: Vec<Device>,
    labels_visible: bool,
    scripted: VecDeque<Option<FailureKind>>,
    requests: Vec<CaptureConstraints>,
    streams: HashMap<u64, OpenStream>,
    releases: usize,
    frames_available: bool,
    enumerate_fails: bool,
    acquire_delay: Duration,
}

/// In-process capture platform with scripted behaviour.
///
/// Acquisitions succeed unless a failure was scripted or the request names an
/// exact device that is not listed. Opening a second stream while one is open
/// fails with `DeviceBusy`, mirroring hardware that cannot be shared.
pub struct SimulatedPlatform {
    state: Mutex<SimState>,
    changes: broadcast::Sender<()>,
    next_handle: AtomicU64,
}

impl SimulatedPlatform {
    pub fn new(devices: Vec<Device>) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(SimState {
                devices,
                labels_visible: true,
                scripted: VecDeque::new(),
                requests: Vec::new(),
                streams: HashMap::new(),
                releases: 0,
                frames_available: true,
                enumerate_fails: false,
                acquire_delay: Duration::ZERO,
            }),
            changes,
            next_handle: AtomicU64::new(1),
        }
    }

    /// A laptop-with-phone style rig: one front and one rear camera
    pub fn with_default_devices() -> Self {
        Self::new(vec![
            Device::new("sim-front", "Simulated Front Camera"),
            Device::new("sim-rear", "Simulated Back Camera"),
        ])
    }

    /// Report blank labels until the first successful acquisition
    pub fn with_hidden_labels(self) -> Self {
        self.state.lock().labels_visible = false;
        self
    }

    pub fn with_acquire_delay(self, delay: Duration) -> Self {
        self.state.lock().acquire_delay = delay;
        self
    }

    /// Queue a failure for the next acquisition
    pub fn script_failure(&self, kind: FailureKind) {
        self.state.lock().scripted.push_back(Some(kind));
    }

    /// Queue an unconditional success for the next acquisition
    pub fn script_success(&self) {
        self.state.lock().scripted.push_back(None);
    }

    /// Replace the device list and fire a change notification
    pub fn set_devices(&self, devices: Vec<Device>) {
        self.state.lock().devices = devices;
        self.notify_device_change();
    }

    pub fn notify_device_change(&self) {
        let _ = self.changes.send(());
    }

    pub fn set_frames_available(&self, available: bool) {
        self.state.lock().frames_available = available;
    }

    pub fn set_enumerate_fails(&self, fails: bool) {
        self.state.lock().enumerate_fails = fails;
    }

    /// Every constraint set passed to `acquire`, in order
    pub fn requests(&self) -> Vec<CaptureConstraints> {
        self.state.lock().requests.clone()
    }

    pub fn open_streams(&self) -> usize {
        self.state.lock().streams.len()
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().releases
    }

    fn render_test_pattern(width: u32, height: u32, frame: u64) -> Option<Vec<u8>> {
        let shift = (frame % 256) as u32;
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(((x + shift) % 256) as u8);
                pixels.push(((y + shift) % 256) as u8);
                pixels.push(((x ^ y) % 256) as u8);
            }
        }

        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, 80);
        match encoder.encode(&pixels, width, height, ColorType::Rgb8) {
            Ok(()) => Some(out),
            Err(e) => {
                warn!("Failed to encode simulated frame: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl CapturePlatform for SimulatedPlatform {
    async fn enumerate(&self) -> Result<Vec<Device>> {
        let state = self.state.lock();
        if state.enumerate_fails {
            return Err(PillocamError::component(
                "simulated_platform",
                "device enumeration failed",
            ));
        }

        Ok(state
            .devices
            .iter()
            .map(|d| {
                if state.labels_visible {
                    d.clone()
                } else {
                    Device::new(d.id.as_str(), "")
                }
            })
            .collect())
    }

    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<CaptureHandle, AcquireError> {
        let delay = self.state.lock().acquire_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.requests.push(constraints.clone());
        debug!("Simulated acquire: {}", constraints);

        if !state.streams.is_empty() {
            return Err(AcquireError::new(
                FailureKind::DeviceBusy,
                "a capture stream is already open",
            ));
        }

        if let Some(Some(kind)) = state.scripted.pop_front() {
            return Err(AcquireError::new(kind, "scripted failure"));
        }

        let device = resolve_device(&state.devices, &constraints.selector)?;
        let width = constraints.width.ideal.unwrap_or(constraints.width.min);
        let height = constraints.height.ideal.unwrap_or(constraints.height.min);

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        state.streams.insert(
            id,
            OpenStream {
                device_id: device.id.clone(),
                width,
                height,
                frames: 0,
            },
        );
        state.labels_visible = true;

        info!(
            "Simulated stream {} opened on '{}' at {}x{}",
            id, device.id, width, height
        );
        Ok(CaptureHandle::new(id, Some(device.id)))
    }

    async fn capture_frame(&self, handle: &CaptureHandle) -> Option<FrameData> {
        let (frame_id, width, height) = {
            let mut state = self.state.lock();
            if !state.frames_available {
                return None;
            }
            let stream = state.streams.get_mut(&handle.id())?;
            stream.frames += 1;
            trace!("Simulated frame {} from '{}'", stream.frames, stream.device_id);
            (stream.frames, stream.width, stream.height)
        };

        let data = Self::render_test_pattern(width, height, frame_id)?;
        Some(FrameData::new(
            frame_id,
            SystemTime::now(),
            data,
            width,
            height,
            FrameFormat::Jpeg,
        ))
    }

    async fn release(&self, handle: CaptureHandle) {
        let mut state = self.state.lock();
        if state.streams.remove(&handle.id()).is_some() {
            state.releases += 1;
            debug!("Simulated stream {} released", handle.id());
        }
    }

    fn device_changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintPolicy;
    use crate::device::Orientation;

    fn policy() -> ConstraintPolicy {
        ConstraintPolicy::new((64, 48), (32, 24), 3)
    }

    #[tokio::test]
    async fn test_exact_missing_device_is_unsatisfiable() {
        let platform = SimulatedPlatform::with_default_devices();
        let err = platform
            .acquire(&policy().build(None, Some("missing"), 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::ConstraintUnsatisfiable);
    }

    #[tokio::test]
    async fn test_facing_mode_picks_matching_device() {
        let platform = SimulatedPlatform::with_default_devices();
        let handle = platform
            .acquire(&policy().build(Some(Orientation::Rear), None, 0))
            .await
            .unwrap();
        assert_eq!(handle.device_id(), Some("sim-rear"));
    }

    #[tokio::test]
    async fn test_second_stream_is_busy_until_release() {
        let platform = SimulatedPlatform::with_default_devices();
        let handle = platform.acquire(&policy().build(None, None, 0)).await.unwrap();

        let err = platform
            .acquire(&policy().build(None, None, 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::DeviceBusy);

        platform.release(handle).await;
        assert_eq!(platform.open_streams(), 0);
        assert!(platform.acquire(&policy().build(None, None, 0)).await.is_ok());
    }

    #[tokio::test]
    async fn test_labels_hidden_until_grant() {
        let platform = SimulatedPlatform::with_default_devices().with_hidden_labels();
        let before = platform.enumerate().await.unwrap();
        assert!(before.iter().all(|d| d.raw_label.is_empty()));

        platform.acquire(&policy().build(None, None, 0)).await.unwrap();
        let after = platform.enumerate().await.unwrap();
        assert_eq!(after[1].orientation, Orientation::Rear);
    }

    #[tokio::test]
    async fn test_frames_are_jpeg() {
        let platform = SimulatedPlatform::with_default_devices();
        let handle = platform.acquire(&policy().build(None, None, 0)).await.unwrap();
        let frame = platform.capture_frame(&handle).await.unwrap();
        assert_eq!(&frame.data[..2], &[0xFF, 0xD8]);
        assert_eq!((frame.width, frame.height), (64, 48));

        platform.set_frames_available(false);
        assert!(platform.capture_frame(&handle).await.is_none());
    }
}
