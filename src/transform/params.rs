//! Typed configuration for each operation kind.
//!
//! Steps arrive with an untyped [`ConfigMap`]. Each kind deserializes it here
//! into a strict struct the moment it reaches the operation, so shared code
//! never sees the raw map. Decoding and range validation happen together: a
//! value of one of these types is always valid.
//!
//! | Kind | Fields | Rule |
//! |---|---|---|
//! | resize | `width`, `height` (int) | both required, 1..=[`MAX_DIMENSION`] |
//! | grayscale | none | always valid |
//! | trim | `threshold` (float) | optional (default 10), 0..=255 |
//! | blur | `sigma` (float) | required, > 0 and <= [`MAX_SIGMA`] |
//! | rotate | `angle` (int) | required, one of 90 / 180 / 270 |
//!
//! Unknown keys are ignored. `null` counts as absent for optional fields.

use crate::types::ConfigMap;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Largest accepted resize target on either axis.
pub const MAX_DIMENSION: u32 = 65_535;

/// Largest resize output, in pixels, that is actually resampled. Each axis
/// can pass [`MAX_DIMENSION`] while their product still does not fit in
/// memory, so this is enforced once the source size is known.
pub const MAX_OUTPUT_PIXELS: u64 = 100_000_000;

/// Largest accepted blur sigma. The kernel grows linearly with sigma.
pub const MAX_SIGMA: f32 = 1_000.0;

/// Trim threshold used when the step has no `threshold`.
pub const DEFAULT_TRIM_THRESHOLD: f64 = 10.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Missing field or wrong JSON type, as reported by the deserializer.
    #[error("{0}")]
    Invalid(String),
    #[error("field `{field}` must be {constraint}, got {value}")]
    OutOfRange {
        field: &'static str,
        constraint: &'static str,
        value: String,
    },
}

/// Deserialize the raw step map into a kind's field struct.
fn decode<T: DeserializeOwned>(config: &ConfigMap) -> Result<T, ConfigError> {
    serde_json::from_value(Value::Object(config.clone()))
        .map_err(|e| ConfigError::Invalid(e.to_string()))
}

fn dimension(field: &'static str, value: u32) -> Result<u32, ConfigError> {
    if !(1..=MAX_DIMENSION).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field,
            constraint: "between 1 and 65535",
            value: value.to_string(),
        });
    }
    Ok(value)
}

/// Target bounding box for `resize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResizeConfig {
    pub width: u32,
    pub height: u32,
}

impl ResizeConfig {
    pub fn from_map(config: &ConfigMap) -> Result<Self, ConfigError> {
        let raw: Self = decode(config)?;
        Ok(Self {
            width: dimension("width", raw.width)?,
            height: dimension("height", raw.height)?,
        })
    }
}

#[derive(Deserialize)]
struct TrimFields {
    threshold: Option<f64>,
}

/// Border detection tolerance for `trim`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimConfig {
    /// Maximum per-channel difference from white still counted as border.
    pub threshold: f64,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_TRIM_THRESHOLD,
        }
    }
}

impl TrimConfig {
    pub fn from_map(config: &ConfigMap) -> Result<Self, ConfigError> {
        let raw: TrimFields = decode(config)?;
        let threshold = raw.threshold.unwrap_or(DEFAULT_TRIM_THRESHOLD);
        if !(0.0..=255.0).contains(&threshold) {
            return Err(ConfigError::OutOfRange {
                field: "threshold",
                constraint: "between 0 and 255",
                value: threshold.to_string(),
            });
        }
        Ok(Self { threshold })
    }
}

#[derive(Deserialize)]
struct BlurFields {
    sigma: f64,
}

/// Gaussian standard deviation for `blur`, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurConfig {
    pub sigma: f32,
}

impl BlurConfig {
    pub fn from_map(config: &ConfigMap) -> Result<Self, ConfigError> {
        let BlurFields { sigma } = decode(config)?;
        if !(sigma > 0.0 && sigma <= MAX_SIGMA as f64) {
            return Err(ConfigError::OutOfRange {
                field: "sigma",
                constraint: "greater than 0 and at most 1000",
                value: sigma.to_string(),
            });
        }
        Ok(Self {
            sigma: sigma as f32,
        })
    }
}

/// The three right-angle rotations. No arbitrary angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i64) -> Option<Self> {
        match degrees {
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

#[derive(Deserialize)]
struct RotateFields {
    angle: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotateConfig {
    pub angle: Rotation,
}

impl RotateConfig {
    pub fn from_map(config: &ConfigMap) -> Result<Self, ConfigError> {
        let RotateFields { angle: degrees } = decode(config)?;
        let angle = Rotation::from_degrees(degrees).ok_or_else(|| ConfigError::OutOfRange {
            field: "angle",
            constraint: "one of 90, 180, 270",
            value: degrees.to_string(),
        })?;
        Ok(Self { angle })
    }
}
