//! Pipeline tunables and edge-detection input modes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorPolicy, MlaaError, MlaaResult};

/// Default edge-detection sensitivity
pub const DEFAULT_THRESHOLD: f32 = 0.1;
/// Default bound on the blend-weight search distance
pub const DEFAULT_MAX_SEARCH_STEPS: u32 = 8;
/// Largest search distance the shipped programs can encode
pub const MAX_SEARCH_STEPS_LIMIT: u32 = 255;

/// Source the edge-detection stage reads.
///
/// Luma and Color bind the input to the color slot, Depth to the depth slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputMode {
    Luma,
    Color,
    Depth,
}

impl InputMode {
    pub const ALL: [InputMode; 3] = [InputMode::Luma, InputMode::Color, InputMode::Depth];

    pub fn canonical(self) -> &'static str {
        match self {
            Self::Luma => "luma",
            Self::Color => "color",
            Self::Depth => "depth",
        }
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

impl TryFrom<u32> for InputMode {
    type Error = MlaaError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Luma),
            1 => Ok(Self::Color),
            2 => Ok(Self::Depth),
            other => Err(MlaaError::invalid(format!(
                "edge-detection mode {other} is not one of luma(0), color(1), depth(2)"
            ))),
        }
    }
}

impl From<InputMode> for u32 {
    fn from(mode: InputMode) -> Self {
        match mode {
            InputMode::Luma => 0,
            InputMode::Color => 1,
            InputMode::Depth => 2,
        }
    }
}

fn normalize_key(value: &str) -> String {
    value
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect()
}

impl FromStr for InputMode {
    type Err = MlaaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize_key(value).as_str() {
            "luma" | "luminance" => Ok(Self::Luma),
            "color" | "colour" | "rgb" => Ok(Self::Color),
            "depth" => Ok(Self::Depth),
            _ => Err(MlaaError::invalid(format!("unknown edge-detection mode '{value}'"))),
        }
    }
}

/// Construction-time configuration of an [`crate::Mlaa`] pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MlaaConfig {
    /// Edge-detection sensitivity, conceptually in [0, 1]; 0.0–0.2 is the useful range
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Upper bound on the blend-weight search distance in pixels; 4–16 is typical
    #[serde(default = "default_max_search_steps")]
    pub max_search_steps: u32,
    /// Strict stops at the first failing call, permissive latches and continues
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_max_search_steps() -> u32 {
    DEFAULT_MAX_SEARCH_STEPS
}

impl Default for MlaaConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_search_steps: DEFAULT_MAX_SEARCH_STEPS,
            error_policy: ErrorPolicy::default(),
        }
    }
}

impl MlaaConfig {
    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn validate(&self) -> MlaaResult<()> {
        validate_threshold(self.threshold)?;
        validate_max_search_steps(self.max_search_steps)
    }

    pub fn from_json_str(text: &str) -> MlaaResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| MlaaError::invalid(format!("malformed MLAA config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> MlaaResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MlaaError::invalid(format!("cannot serialize MLAA config: {e}")))
    }
}

pub(crate) fn validate_threshold(threshold: f32) -> MlaaResult<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(MlaaError::invalid(format!(
            "threshold {threshold} outside [0, 1]"
        )));
    }
    Ok(())
}

pub(crate) fn validate_max_search_steps(steps: u32) -> MlaaResult<()> {
    if steps == 0 || steps > MAX_SEARCH_STEPS_LIMIT {
        return Err(MlaaError::invalid(format!(
            "max search steps {steps} outside 1..={MAX_SEARCH_STEPS_LIMIT}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_modes_outside_range_are_rejected() {
        assert_eq!(InputMode::try_from(0).unwrap(), InputMode::Luma);
        assert_eq!(InputMode::try_from(2).unwrap(), InputMode::Depth);
        let err = InputMode::try_from(3).unwrap_err();
        assert!(matches!(err, MlaaError::InvalidArgument(_)));
        for mode in InputMode::ALL {
            assert_eq!(InputMode::try_from(u32::from(mode)).unwrap(), mode);
        }
    }

    #[test]
    fn mode_names_are_normalized() {
        assert_eq!("Luma".parse::<InputMode>().unwrap(), InputMode::Luma);
        assert_eq!(" COLOUR ".parse::<InputMode>().unwrap(), InputMode::Color);
        assert!("stencil".parse::<InputMode>().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = MlaaConfig::default();
        assert_eq!(config.threshold, 0.1);
        assert_eq!(config.max_search_steps, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn json_fills_missing_fields_and_validates() {
        let config = MlaaConfig::from_json_str(r#"{ "threshold": 0.05, "error-policy": "permissive" }"#)
            .unwrap();
        assert_eq!(config.threshold, 0.05);
        assert_eq!(config.max_search_steps, DEFAULT_MAX_SEARCH_STEPS);
        assert_eq!(config.error_policy, ErrorPolicy::Permissive);

        let back = MlaaConfig::from_json_str(&config.to_json_string().unwrap()).unwrap();
        assert_eq!(back, config);

        assert!(MlaaConfig::from_json_str(r#"{ "threshold": 1.5 }"#).is_err());
        assert!(MlaaConfig::from_json_str(r#"{ "max-search-steps": 0 }"#).is_err());
    }
}
