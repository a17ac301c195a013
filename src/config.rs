use crate::detection::Algorithm;
use crate::device::{DeviceType, Orientation};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PillocamConfig {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub remote: RemoteConfig,
    pub control: ControlConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Resolution asked for on the first rung (width, height)
    #[serde(default = "default_ideal_resolution")]
    pub ideal_resolution: (u32, u32),

    /// Lowest acceptable resolution, kept on every rung
    #[serde(default = "default_minimum_resolution")]
    pub minimum_resolution: (u32, u32),

    /// Constraint relaxations before giving up (at most 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between releasing a stream and the next acquisition
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Facing preference; `unknown` means no preference
    #[serde(default = "default_preferred_orientation")]
    pub preferred_orientation: Orientation,

    /// Overrides the device type derived from `user_agent`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,

    /// Reported to the analysis service on registration
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl CameraConfig {
    pub fn device_type(&self) -> DeviceType {
        self.device_type
            .unwrap_or_else(|| DeviceType::from_user_agent(&self.user_agent))
    }

    pub fn orientation_preference(&self) -> Option<Orientation> {
        self.preferred_orientation.as_preference()
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    /// Detection scheduler period
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Algorithm used until the service reports its own
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Timeout applied to every call to the analysis service
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl DetectionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RemoteConfig {
    /// Root URL of the analysis service
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Liveness probe period in seconds
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Register this machine with the service on startup
    #[serde(default)]
    pub register_device: bool,
}

impl RemoteConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControlConfig {
    /// Serve the local control API
    #[serde(default = "default_control_enabled")]
    pub enabled: bool,

    /// IP address to bind to
    #[serde(default = "default_control_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_control_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Controller command queue capacity
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
}

impl PillocamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("pillocam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default(
                "camera.ideal_resolution",
                vec![default_ideal_resolution().0, default_ideal_resolution().1],
            )?
            .set_default(
                "camera.minimum_resolution",
                vec![
                    default_minimum_resolution().0,
                    default_minimum_resolution().1,
                ],
            )?
            .set_default("camera.max_attempts", default_max_attempts())?
            .set_default("camera.settle_delay_ms", default_settle_delay_ms())?
            .set_default(
                "camera.preferred_orientation",
                default_preferred_orientation().to_string(),
            )?
            .set_default("camera.user_agent", default_user_agent())?
            .set_default("detection.tick_interval_ms", default_tick_interval_ms())?
            .set_default("detection.algorithm", Algorithm::default().as_str())?
            .set_default(
                "detection.request_timeout_ms",
                default_request_timeout_ms(),
            )?
            .set_default("remote.base_url", default_base_url())?
            .set_default(
                "remote.heartbeat_interval_secs",
                default_heartbeat_interval_secs(),
            )?
            .set_default("remote.register_device", false)?
            .set_default("control.enabled", default_control_enabled())?
            .set_default("control.ip", default_control_ip())?
            .set_default("control.port", default_control_port())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.command_queue_capacity",
                default_command_queue_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // PILLOCAM_CAMERA__MAX_ATTEMPTS=2 and friends
            .add_source(Environment::with_prefix("PILLOCAM").separator("__"))
            .build()?;

        let config: PillocamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (ideal_w, ideal_h) = self.camera.ideal_resolution;
        let (min_w, min_h) = self.camera.minimum_resolution;

        if ideal_w == 0 || ideal_h == 0 || min_w == 0 || min_h == 0 {
            return Err(ConfigError::Message(
                "Camera resolutions must be greater than 0".to_string(),
            ));
        }

        if min_w > ideal_w || min_h > ideal_h {
            return Err(ConfigError::Message(format!(
                "Minimum resolution {}x{} exceeds ideal resolution {}x{}",
                min_w, min_h, ideal_w, ideal_h
            )));
        }

        if self.camera.max_attempts > crate::constraints::LADDER_RELAXATIONS {
            return Err(ConfigError::Message(format!(
                "Camera max_attempts must be at most {}",
                crate::constraints::LADDER_RELAXATIONS
            )));
        }

        if self.detection.tick_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Detection tick_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.detection.request_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Detection request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.remote.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Remote heartbeat_interval_secs must be greater than 0".to_string(),
            ));
        }

        if let Err(e) = reqwest::Url::parse(&self.remote.base_url) {
            return Err(ConfigError::Message(format!(
                "Remote base_url '{}' is invalid: {}",
                self.remote.base_url, e
            )));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.command_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Command queue capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PillocamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                ideal_resolution: default_ideal_resolution(),
                minimum_resolution: default_minimum_resolution(),
                max_attempts: default_max_attempts(),
                settle_delay_ms: default_settle_delay_ms(),
                preferred_orientation: default_preferred_orientation(),
                device_type: None,
                user_agent: default_user_agent(),
            },
            detection: DetectionConfig {
                tick_interval_ms: default_tick_interval_ms(),
                algorithm: Algorithm::default(),
                request_timeout_ms: default_request_timeout_ms(),
            },
            remote: RemoteConfig {
                base_url: default_base_url(),
                heartbeat_interval_secs: default_heartbeat_interval_secs(),
                register_device: false,
            },
            control: ControlConfig {
                enabled: default_control_enabled(),
                ip: default_control_ip(),
                port: default_control_port(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                command_queue_capacity: default_command_queue_capacity(),
            },
        }
    }
}

// Default value functions
fn default_ideal_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_minimum_resolution() -> (u32, u32) {
    (320, 240)
}
fn default_max_attempts() -> u32 {
    3
}
fn default_settle_delay_ms() -> u64 {
    1000
}
fn default_preferred_orientation() -> Orientation {
    Orientation::Rear
}
fn default_user_agent() -> String {
    format!("pillocam/{}", env!("CARGO_PKG_VERSION"))
}

fn default_tick_interval_ms() -> u64 {
    200
}
fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_heartbeat_interval_secs() -> u64 {
    5
}

fn default_control_enabled() -> bool {
    true
}
fn default_control_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_control_port() -> u16 {
    8088
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_command_queue_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = PillocamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.camera.ideal_resolution, (640, 480));
        assert_eq!(config.detection.tick_interval(), Duration::from_millis(200));
        assert_eq!(config.remote.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.camera.device_type(), DeviceType::Desktop);
        assert_eq!(
            config.camera.orientation_preference(),
            Some(Orientation::Rear)
        );
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
max_attempts = 2
preferred_orientation = "front"
user_agent = "Mozilla/5.0 (Linux; Android 14)"

[detection]
algorithm = "algorithm3"

[remote]
base_url = "http://analysis.local:9000"
"#
        )
        .unwrap();

        let config = PillocamConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.camera.max_attempts, 2);
        assert_eq!(config.camera.preferred_orientation, Orientation::Front);
        assert_eq!(config.camera.device_type(), DeviceType::Mobile);
        assert_eq!(config.detection.algorithm, Algorithm::ObjectDetection);
        assert_eq!(config.remote.base_url, "http://analysis.local:9000");
        // untouched sections keep their defaults
        assert_eq!(config.camera.minimum_resolution, (320, 240));
        assert_eq!(config.control.port, 8088);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = PillocamConfig::load_from_file("/nonexistent/pillocam.toml").unwrap();
        assert_eq!(config.detection.algorithm, Algorithm::EdgeDetection);
        assert_eq!(config.system.command_queue_capacity, 64);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PillocamConfig::default();

        config.camera.minimum_resolution = (800, 600);
        assert!(config.validate().is_err());
        config.camera.minimum_resolution = (320, 240);

        config.camera.max_attempts = 4;
        assert!(config.validate().is_err());
        config.camera.max_attempts = 3;

        config.remote.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
        config.remote.base_url = default_base_url();

        config.detection.tick_interval_ms = 0;
        assert!(config.validate().is_err());
        config.detection.tick_interval_ms = 200;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_device_type_wins() {
        let mut config = PillocamConfig::default();
        config.camera.user_agent = "Mozilla/5.0 (iPhone)".to_string();
        assert_eq!(config.camera.device_type(), DeviceType::Mobile);

        config.camera.device_type = Some(DeviceType::Desktop);
        assert_eq!(config.camera.device_type(), DeviceType::Desktop);
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let text = toml::to_string_pretty(&PillocamConfig::default()).unwrap();
        assert!(text.contains("[camera]"));
        assert!(text.contains("algorithm = \"algorithm2\""));
        assert!(!text.contains("device_type"));
    }
}
