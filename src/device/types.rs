use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const REAR_PATTERNS: [&str; 3] = ["back", "rear", "environment"];
const FRONT_PATTERNS: [&str; 3] = ["front", "user", "facing"];
const MOBILE_AGENTS: [&str; 7] = [
    "android",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Which way a capture device points, inferred from its label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Front,
    Rear,
    Unknown,
}

impl Orientation {
    /// Classify a raw device label. Rear patterns win over front patterns,
    /// so "Back Facing Camera" is rear.
    pub fn classify(label: &str) -> Self {
        let label = label.to_lowercase();
        if REAR_PATTERNS.iter().any(|p| label.contains(p)) {
            Orientation::Rear
        } else if FRONT_PATTERNS.iter().any(|p| label.contains(p)) {
            Orientation::Front
        } else {
            Orientation::Unknown
        }
    }

    pub fn facing_mode(&self) -> Option<FacingMode> {
        match self {
            Orientation::Front => Some(FacingMode::User),
            Orientation::Rear => Some(FacingMode::Environment),
            Orientation::Unknown => None,
        }
    }

    /// Unknown carries no preference
    pub fn as_preference(&self) -> Option<Orientation> {
        match self {
            Orientation::Unknown => None,
            other => Some(*other),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Orientation::Front => write!(f, "front"),
            Orientation::Rear => write!(f, "rear"),
            Orientation::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "front" | "user" => Ok(Orientation::Front),
            "rear" | "back" | "environment" => Ok(Orientation::Rear),
            "unknown" | "none" => Ok(Orientation::Unknown),
            other => Err(format!("unknown orientation '{}'", other)),
        }
    }
}

/// Capture-platform facing mode names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

impl FacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        }
    }

    pub fn orientation(&self) -> Orientation {
        match self {
            FacingMode::User => Orientation::Front,
            FacingMode::Environment => Orientation::Rear,
        }
    }
}

/// Kind of end-user machine the client runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub fn from_user_agent(user_agent: &str) -> Self {
        let agent = user_agent.to_lowercase();
        if MOBILE_AGENTS.iter().any(|p| agent.contains(p)) {
            if agent.contains("ipad") {
                DeviceType::Tablet
            } else {
                DeviceType::Mobile
            }
        } else {
            DeviceType::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }
}

/// A video capture device as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub raw_label: String,
    pub orientation: Orientation,
}

impl Device {
    pub fn new<S: Into<String>>(id: S, raw_label: S) -> Self {
        let raw_label = raw_label.into();
        let orientation = Orientation::classify(&raw_label);
        Self {
            id: id.into(),
            raw_label,
            orientation,
        }
    }

    /// Display label; labels are empty until capture permission is granted
    pub fn friendly_label(&self, index: usize) -> String {
        if self.raw_label.is_empty() {
            return format!("Camera {}", index + 1);
        }
        match self.orientation {
            Orientation::Rear => format!("Rear camera ({})", self.raw_label),
            Orientation::Front => format!("Front camera ({})", self.raw_label),
            Orientation::Unknown => self.raw_label.clone(),
        }
    }
}
