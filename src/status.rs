use crate::detection::DetectionStatus;
use crate::device::Device;
use crate::monitor::ConnectionState;
use crate::session::SessionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// Labelled device entry as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEntry {
    pub id: String,
    pub label: String,
    pub orientation: crate::device::Orientation,
}

/// Everything observable about the client at one instant
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub session: SessionState,
    pub detection: DetectionStatus,
    pub connection: ConnectionState,
    pub devices: Vec<DeviceEntry>,
    pub generated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// One-line human summary
    pub fn summary(&self) -> String {
        let session = match &self.session {
            SessionState::Failed { kind, .. } => format!("failed ({})", kind.user_message()),
            other => other.label().to_string(),
        };
        format!(
            "camera {} | detection {} ({}, count {}) | service {} | {} camera(s)",
            session,
            if self.detection.active { "on" } else { "off" },
            self.detection.algorithm,
            self.detection.count,
            self.connection,
            self.devices.len()
        )
    }
}

/// Read-side merge of the session, detection, connection and device feeds.
///
/// Holds only receivers; every snapshot is computed on demand.
#[derive(Clone)]
pub struct StatusAggregator {
    session: watch::Receiver<SessionState>,
    detection: watch::Receiver<DetectionStatus>,
    connection: watch::Receiver<ConnectionState>,
    devices: watch::Receiver<Vec<Device>>,
}

impl StatusAggregator {
    pub fn new(
        session: watch::Receiver<SessionState>,
        detection: watch::Receiver<DetectionStatus>,
        connection: watch::Receiver<ConnectionState>,
        devices: watch::Receiver<Vec<Device>>,
    ) -> Self {
        Self {
            session,
            detection,
            connection,
            devices,
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let devices = self
            .devices
            .borrow()
            .iter()
            .enumerate()
            .map(|(i, d)| DeviceEntry {
                id: d.id.clone(),
                label: d.friendly_label(i),
                orientation: d.orientation,
            })
            .collect();

        StatusSnapshot {
            session: self.session.borrow().clone(),
            detection: self.detection.borrow().clone(),
            connection: *self.connection.borrow(),
            devices,
            generated_at: Utc::now(),
        }
    }

    /// Wait until any feed changes; `false` once the controller is gone
    pub async fn changed(&mut self) -> bool {
        let result = tokio::select! {
            r = self.session.changed() => r,
            r = self.detection.changed() => r,
            r = self.connection.changed() => r,
            r = self.devices.changed() => r,
        };
        result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_snapshot_merges_feeds() {
        let (session_tx, session_rx) = watch::channel(SessionState::Idle);
        let (detection_tx, detection_rx) = watch::channel(DetectionStatus::default());
        let (_connection_tx, connection_rx) = watch::channel(ConnectionState::Connected);
        let (_devices_tx, devices_rx) = watch::channel(vec![
            Device::new("a", "Back Camera"),
            Device::new("b", ""),
        ]);

        let aggregator = StatusAggregator::new(session_rx, detection_rx, connection_rx, devices_rx);

        session_tx.send_replace(SessionState::Ready);
        detection_tx.send_modify(|d| {
            d.active = true;
            d.count = 5;
        });

        let snapshot = aggregator.snapshot();
        assert!(snapshot.session.is_ready());
        assert_eq!(snapshot.detection.count, 5);
        assert_eq!(snapshot.devices[0].label, "Rear camera (Back Camera)");
        assert_eq!(snapshot.devices[1].label, "Camera 2");
        assert_eq!(
            snapshot.summary(),
            "camera ready | detection on (algorithm2, count 5) | service connected | 2 camera(s)"
        );
    }

    #[tokio::test]
    async fn test_changed_wakes_on_update_and_reports_close() {
        let (session_tx, session_rx) = watch::channel(SessionState::Idle);
        let (detection_tx, detection_rx) = watch::channel(DetectionStatus::default());
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Connecting);
        let (devices_tx, devices_rx) = watch::channel(Vec::new());
        let mut aggregator =
            StatusAggregator::new(session_rx, detection_rx, connection_rx, devices_rx);

        connection_tx.send_replace(ConnectionState::Connected);
        assert!(aggregator.changed().await);
        assert_eq!(aggregator.snapshot().connection, ConnectionState::Connected);

        drop((session_tx, detection_tx, connection_tx, devices_tx));
        assert!(!aggregator.changed().await);
    }

    #[test]
    fn test_snapshot_serializes_failure_reason() {
        let (_s, session_rx) = watch::channel(SessionState::Failed {
            kind: FailureKind::PermissionDenied,
            reason: "denied".to_string(),
        });
        let (_d, detection_rx) = watch::channel(DetectionStatus::default());
        let (_c, connection_rx) = watch::channel(ConnectionState::Error);
        let (_v, devices_rx) = watch::channel(Vec::new());

        let snapshot =
            StatusAggregator::new(session_rx, detection_rx, connection_rx, devices_rx).snapshot();
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["session"]["state"], "failed");
        assert_eq!(json["session"]["kind"], "permission_denied");
        assert_eq!(json["connection"], "error");
        assert!(snapshot.summary().starts_with("camera failed (Camera permission"));
    }
}
