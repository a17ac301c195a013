use super::types::{Device, DeviceType, Orientation};
use crate::error::Result;
use crate::events::{EventBus, PillocamEvent};
use crate::platform::CapturePlatform;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::{debug, info};

/// Result of a catalog refresh
#[derive(Debug, Clone)]
pub struct CatalogRefresh {
    pub devices: Vec<Device>,
    /// True when the set of device ids differs from the previous refresh
    pub changed: bool,
}

/// Deduplicated view of the platform's capture devices
pub struct DeviceCatalog {
    platform: Arc<dyn CapturePlatform>,
    event_bus: Arc<EventBus>,
    devices: Vec<Device>,
    publisher: watch::Sender<Vec<Device>>,
}

impl DeviceCatalog {
    pub fn new(platform: Arc<dyn CapturePlatform>, event_bus: Arc<EventBus>) -> Self {
        let (publisher, _) = watch::channel(Vec::new());
        Self {
            platform,
            event_bus,
            devices: Vec::new(),
            publisher,
        }
    }

    /// Re-enumerate devices. Never touches an active capture stream.
    ///
    /// Listeners are only notified when the id-set changed; label updates for
    /// an unchanged id-set are stored silently.
    pub async fn refresh(&mut self) -> Result<CatalogRefresh> {
        let enumerated = self.platform.enumerate().await?;
        let devices = dedup_by_id(enumerated);

        let changed = id_set(&devices) != id_set(&self.devices);
        self.devices = devices.clone();

        if changed {
            info!(
                "Available cameras updated: {:?}",
                devices
                    .iter()
                    .enumerate()
                    .map(|(i, d)| d.friendly_label(i))
                    .collect::<Vec<_>>()
            );
            self.publisher.send_replace(devices.clone());
            let _ = self.event_bus.publish(PillocamEvent::DeviceListChanged {
                device_count: devices.len(),
                timestamp: SystemTime::now(),
            });
        } else {
            debug!("Device id-set unchanged ({} devices)", devices.len());
            let snapshot = devices.clone();
            self.publisher.send_if_modified(move |current| {
                *current = snapshot;
                false
            });
        }

        Ok(CatalogRefresh { devices, changed })
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn orientation_of(&self, id: &str) -> Orientation {
        self.get(id)
            .map(|d| d.orientation)
            .unwrap_or(Orientation::Unknown)
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Device>> {
        self.publisher.subscribe()
    }
}

/// Pick the device to use.
///
/// An explicit selection is honoured only while it is still listed. Otherwise
/// mobile machines prefer their first rear camera, and everything else takes
/// the first listed device.
pub fn select_preferred<'a>(
    devices: &'a [Device],
    device_type: DeviceType,
    explicit_selection: Option<&str>,
) -> Option<&'a Device> {
    if let Some(id) = explicit_selection {
        if let Some(device) = devices.iter().find(|d| d.id == id) {
            return Some(device);
        }
    }

    if device_type == DeviceType::Mobile {
        if let Some(rear) = devices.iter().find(|d| d.orientation == Orientation::Rear) {
            return Some(rear);
        }
    }

    devices.first()
}

fn dedup_by_id(devices: Vec<Device>) -> Vec<Device> {
    let mut seen = HashSet::new();
    devices
        .into_iter()
        .filter(|d| seen.insert(d.id.clone()))
        .collect()
}

fn id_set(devices: &[Device]) -> BTreeSet<&str> {
    devices.iter().map(|d| d.id.as_str()).collect()
}
