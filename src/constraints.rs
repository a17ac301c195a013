use crate::config::CameraConfig;
use crate::device::{FacingMode, Orientation};
use serde::Serialize;
use std::fmt;

/// Bounds requested for one capture dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DimensionBound {
    pub ideal: Option<u32>,
    pub min: u32,
}

impl DimensionBound {
    pub fn ideal(ideal: u32, min: u32) -> Self {
        Self {
            ideal: Some(ideal),
            min,
        }
    }

    pub fn min_only(min: u32) -> Self {
        Self { ideal: None, min }
    }
}

/// Which device the platform should open. At most one strategy is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selector {
    DeviceId { id: String, exact: bool },
    FacingMode { mode: FacingMode },
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureConstraints {
    pub width: DimensionBound,
    pub height: DimensionBound,
    pub selector: Selector,
}

impl fmt::Display for CaptureConstraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            Selector::DeviceId { id, exact: true } => write!(f, "deviceId exact '{}'", id)?,
            Selector::DeviceId { id, exact: false } => write!(f, "deviceId ideal '{}'", id)?,
            Selector::FacingMode { mode } => write!(f, "facingMode ideal '{}'", mode.as_str())?,
            Selector::Default => write!(f, "default device")?,
        }
        match (self.width.ideal, self.height.ideal) {
            (Some(w), Some(h)) => write!(
                f,
                ", {}x{} ideal (min {}x{})",
                w, h, self.width.min, self.height.min
            ),
            _ => write!(f, ", min {}x{}", self.width.min, self.height.min),
        }
    }
}

/// Rungs of the relaxation ladder, most to least specific
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rung {
    Specific,
    Relaxed,
    OrientationOnly,
    PlatformDefault,
}

impl Rung {
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0 => Rung::Specific,
            1 => Rung::Relaxed,
            2 => Rung::OrientationOnly,
            _ => Rung::PlatformDefault,
        }
    }
}

/// Number of relaxations the ladder offers after the first request
pub const LADDER_RELAXATIONS: u32 = 3;

/// Builds capture requests and relaxes them after constraint failures
#[derive(Debug, Clone)]
pub struct ConstraintPolicy {
    ideal: (u32, u32),
    minimum: (u32, u32),
    max_attempts: u32,
}

impl ConstraintPolicy {
    pub fn new(ideal: (u32, u32), minimum: (u32, u32), max_attempts: u32) -> Self {
        Self {
            ideal,
            minimum,
            max_attempts: max_attempts.min(LADDER_RELAXATIONS),
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(
            config.ideal_resolution,
            config.minimum_resolution,
            config.max_attempts,
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another relaxation is available after a failure at `attempt`
    pub fn can_relax(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Build the request for a rung.
    ///
    /// An explicit device outranks an orientation preference on the first two
    /// rungs; the third keeps only the orientation; the last asks for whatever
    /// the platform opens by default.
    pub fn build(
        &self,
        preferred_orientation: Option<Orientation>,
        explicit_device_id: Option<&str>,
        attempt: u32,
    ) -> CaptureConstraints {
        let facing = preferred_orientation.and_then(|o| o.facing_mode());

        match Rung::for_attempt(attempt) {
            Rung::Specific => {
                let selector = match (explicit_device_id, facing) {
                    (Some(id), _) => Selector::DeviceId {
                        id: id.to_string(),
                        exact: true,
                    },
                    (None, Some(mode)) => Selector::FacingMode { mode },
                    (None, None) => Selector::Default,
                };
                CaptureConstraints {
                    width: DimensionBound::ideal(self.ideal.0, self.minimum.0),
                    height: DimensionBound::ideal(self.ideal.1, self.minimum.1),
                    selector,
                }
            }
            Rung::Relaxed => {
                let selector = match (explicit_device_id, facing) {
                    (Some(id), _) => Selector::DeviceId {
                        id: id.to_string(),
                        exact: false,
                    },
                    (None, Some(mode)) => Selector::FacingMode { mode },
                    (None, None) => Selector::Default,
                };
                self.minimum_only(selector)
            }
            Rung::OrientationOnly => {
                let selector = match facing {
                    Some(mode) => Selector::FacingMode { mode },
                    None => Selector::Default,
                };
                self.minimum_only(selector)
            }
            Rung::PlatformDefault => self.minimum_only(Selector::Default),
        }
    }

    fn minimum_only(&self, selector: Selector) -> CaptureConstraints {
        CaptureConstraints {
            width: DimensionBound::min_only(self.minimum.0),
            height: DimensionBound::min_only(self.minimum.1),
            selector,
        }
    }
}
