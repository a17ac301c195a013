use super::{resolve_device, CaptureHandle, CapturePlatform};
use crate::constraints::{CaptureConstraints, DimensionBound};
use crate::device::Device;
use crate::error::{AcquireError, FailureKind, PillocamError, Result};
use crate::frame::{FrameData, FrameFormat};
use async_trait::async_trait;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::AppSink;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Keys under which device providers publish the V4L2 node path
const PATH_PROPERTIES: [&str; 3] = ["api.v4l2.path", "device.path", "object.path"];

struct OpenStream {
    pipeline: gst::Pipeline,
    sink: AppSink,
    device_id: String,
    frames: u64,
}

/// V4L2 cameras through GStreamer: a `DeviceMonitor` for enumeration and
/// hot-plug, one `v4l2src ! image/jpeg ! appsink` pipeline per stream.
pub struct GstPlatform {
    monitor: gst::DeviceMonitor,
    streams: Mutex<HashMap<u64, OpenStream>>,
    next_handle: AtomicU64,
    changes: broadcast::Sender<()>,
    cancellation_token: CancellationToken,
}

impl GstPlatform {
    pub fn new() -> Result<Self> {
        gst::init().map_err(|e| {
            PillocamError::component("gstreamer", format!("Failed to initialize GStreamer: {}", e))
        })?;

        let monitor = gst::DeviceMonitor::new();
        monitor.add_filter(Some("Video/Source"), None);
        monitor.start().map_err(|e| {
            PillocamError::component("gstreamer", format!("Failed to start device monitor: {}", e))
        })?;

        let (changes, _) = broadcast::channel(16);
        let platform = Self {
            monitor,
            streams: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            changes,
            cancellation_token: CancellationToken::new(),
        };
        platform.watch_device_bus();

        info!("GStreamer capture platform ready");
        Ok(platform)
    }

    /// Forward DeviceAdded/DeviceRemoved from the monitor bus
    fn watch_device_bus(&self) {
        let bus = self.monitor.bus();
        let changes = self.changes.clone();
        let token = self.cancellation_token.clone();

        tokio::task::spawn_blocking(move || {
            while !token.is_cancelled() {
                let message = bus.timed_pop_filtered(
                    gst::ClockTime::from_mseconds(250),
                    &[gst::MessageType::DeviceAdded, gst::MessageType::DeviceRemoved],
                );
                if let Some(message) = message {
                    debug!("Device monitor: {:?}", message.type_());
                    let _ = changes.send(());
                }
            }
            debug!("Device bus watcher exited");
        });
    }

    fn device_path(device: &gst::Device) -> String {
        device
            .properties()
            .and_then(|props| {
                PATH_PROPERTIES
                    .iter()
                    .find_map(|key| props.get::<String>(*key).ok())
            })
            .unwrap_or_else(|| device.name().to_string())
    }

    fn list_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = Vec::new();
        for device in self.monitor.devices().iter() {
            let id = Self::device_path(device);
            // PipeWire and V4L2 providers may both report the same node
            if devices.iter().any(|d| d.id == id) {
                continue;
            }
            devices.push(Device::new(id, device.display_name().to_string()));
        }
        devices
    }

    fn dimension_caps(bound: &DimensionBound) -> String {
        match bound.ideal {
            Some(ideal) => format!("(int){}", ideal.max(bound.min)),
            None => format!("(int)[{},{}]", bound.min, i32::MAX),
        }
    }

    fn pipeline_description(device_path: &str, constraints: &CaptureConstraints) -> String {
        format!(
            "v4l2src device=\"{}\" do-timestamp=true ! \
             image/jpeg,width={},height={} ! \
             queue max-size-buffers=2 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=1 drop=true",
            device_path,
            Self::dimension_caps(&constraints.width),
            Self::dimension_caps(&constraints.height)
        )
    }

    fn open_pipeline(description: &str) -> std::result::Result<(gst::Pipeline, AppSink), AcquireError> {
        let pipeline = gst::parse::launch(description)
            .map_err(|e| AcquireError::new(FailureKind::DeviceNotFound, e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| AcquireError::new(FailureKind::DeviceNotFound, "not a pipeline"))?;

        let sink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| AcquireError::new(FailureKind::DeviceNotFound, "appsink missing"))?;

        let started = pipeline.set_state(gst::State::Playing).is_ok()
            && pipeline.state(gst::ClockTime::from_seconds(5)).0.is_ok();
        if !started {
            let error = Self::pipeline_error(&pipeline);
            let _ = pipeline.set_state(gst::State::Null);
            return Err(error);
        }

        Ok((pipeline, sink))
    }

    fn pipeline_error(pipeline: &gst::Pipeline) -> AcquireError {
        let message = pipeline
            .bus()
            .and_then(|bus| bus.timed_pop_filtered(gst::ClockTime::ZERO, &[gst::MessageType::Error]));

        match message.as_ref().map(|m| m.view()) {
            Some(gst::MessageView::Error(err)) => {
                let debug = err.debug().map(|d| d.to_string());
                let kind = classify_failure(&err.error(), debug.as_deref());
                AcquireError::new(kind, err.error().to_string())
            }
            _ => AcquireError::new(FailureKind::DeviceBusy, "pipeline failed to start"),
        }
    }
}

/// Map a GStreamer error onto the acquisition failure taxonomy
fn classify_failure(error: &gst::glib::Error, debug: Option<&str>) -> FailureKind {
    let debug = debug.unwrap_or_default();

    if error.matches(gst::ResourceError::Busy) {
        FailureKind::DeviceBusy
    } else if error.matches(gst::ResourceError::NotAuthorized)
        || debug.contains("Permission denied")
    {
        FailureKind::PermissionDenied
    } else if error.matches(gst::ResourceError::NotFound) || debug.contains("No such file") {
        FailureKind::DeviceNotFound
    } else if error.matches(gst::CoreError::Negotiation)
        || error.matches(gst::StreamError::Format)
        || debug.contains("not-negotiated")
    {
        FailureKind::ConstraintUnsatisfiable
    } else if error.matches(gst::ResourceError::OpenRead)
        || error.matches(gst::ResourceError::OpenReadWrite)
    {
        FailureKind::DeviceBusy
    } else {
        FailureKind::DeviceNotFound
    }
}

#[async_trait]
impl CapturePlatform for GstPlatform {
    async fn enumerate(&self) -> Result<Vec<Device>> {
        Ok(self.list_devices())
    }

    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<CaptureHandle, AcquireError> {
        let device = resolve_device(&self.list_devices(), &constraints.selector)?;
        let description = Self::pipeline_description(&device.id, constraints);
        info!("Opening camera '{}': {}", device.id, constraints);
        debug!("GStreamer pipeline: {}", description);

        let (pipeline, sink) =
            tokio::task::spawn_blocking(move || Self::open_pipeline(&description))
                .await
                .map_err(|e| {
                    AcquireError::new(FailureKind::DeviceBusy, format!("open task failed: {}", e))
                })??;

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().insert(
            id,
            OpenStream {
                pipeline,
                sink,
                device_id: device.id.clone(),
                frames: 0,
            },
        );

        info!("Camera stream {} playing on '{}'", id, device.id);
        Ok(CaptureHandle::new(id, Some(device.id)))
    }

    async fn capture_frame(&self, handle: &CaptureHandle) -> Option<FrameData> {
        let (sink, frame_id) = {
            let mut streams = self.streams.lock();
            let stream = streams.get_mut(&handle.id())?;
            stream.frames += 1;
            (stream.sink.clone(), stream.frames)
        };

        let frame = tokio::task::spawn_blocking(move || {
            let sample = sink.try_pull_sample(gst::ClockTime::from_mseconds(500))?;
            let buffer = sample.buffer()?;
            let map = buffer.map_readable().ok()?;

            let (width, height) = sample
                .caps()
                .and_then(|caps| caps.structure(0))
                .map(|s| {
                    (
                        s.get::<i32>("width").unwrap_or(0),
                        s.get::<i32>("height").unwrap_or(0),
                    )
                })
                .unwrap_or((0, 0));

            Some(FrameData::new(
                frame_id,
                SystemTime::now(),
                map.as_slice().to_vec(),
                width.max(0) as u32,
                height.max(0) as u32,
                FrameFormat::Jpeg,
            ))
        })
        .await
        .ok()
        .flatten();

        if frame.is_none() {
            trace!("No sample available on stream {}", handle.id());
        }
        frame
    }

    async fn release(&self, handle: CaptureHandle) {
        let Some(stream) = self.streams.lock().remove(&handle.id()) else {
            return;
        };

        if let Err(e) = stream.pipeline.set_state(gst::State::Null) {
            error!("Failed to stop pipeline for '{}': {}", stream.device_id, e);
        } else {
            info!(
                "Camera stream {} on '{}' released after {} frames",
                handle.id(),
                stream.device_id,
                stream.frames
            );
        }
    }

    fn device_changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}

impl Drop for GstPlatform {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
        for (id, stream) in self.streams.lock().drain() {
            if stream.pipeline.set_state(gst::State::Null).is_err() {
                warn!("Stream {} did not stop cleanly", id);
            }
        }
        self.monitor.stop();
    }
}
