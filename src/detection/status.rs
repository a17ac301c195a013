use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Analysis algorithms offered by the remote service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Binary thresholding
    #[serde(rename = "algorithm1")]
    Threshold,
    /// Edge detection
    #[default]
    #[serde(rename = "algorithm2")]
    EdgeDetection,
    /// Object detection
    #[serde(rename = "algorithm3")]
    ObjectDetection,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Threshold => "algorithm1",
            Algorithm::EdgeDetection => "algorithm2",
            Algorithm::ObjectDetection => "algorithm3",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Algorithm::Threshold => "threshold",
            Algorithm::EdgeDetection => "edge detection",
            Algorithm::ObjectDetection => "object detection",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "algorithm1" | "threshold" => Ok(Algorithm::Threshold),
            "algorithm2" | "edge" => Ok(Algorithm::EdgeDetection),
            "algorithm3" | "object" => Ok(Algorithm::ObjectDetection),
            other => Err(format!("unknown algorithm '{}'", other)),
        }
    }
}

/// Observable state of the detection loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionStatus {
    /// Count reported by the most recent successful submission
    pub count: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub algorithm: Algorithm,
    pub active: bool,
    pub in_flight: bool,
    pub last_error: Option<String>,
    pub submissions: u64,
    pub failures: u64,
}
