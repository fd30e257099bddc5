//! Blend mask modes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Region of the face a blend mask covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaskMode {
    /// Whole face box.
    Raw,
    /// Lower face from the nose line down, the mouth and jaw region.
    #[default]
    Jaw,
    /// Lower face extended below the box into the neck.
    Neck,
}

impl MaskMode {
    /// Returns the mode name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            MaskMode::Raw => "raw",
            MaskMode::Jaw => "jaw",
            MaskMode::Neck => "neck",
        }
    }

    /// Mask mode used for a preprocessing version.
    ///
    /// Only margin-aware versions honour the configured parsing mode; older
    /// versions always mask the raw face box.
    pub fn for_version(version: &str, configured: MaskMode) -> MaskMode {
        if crate::avatar::is_margin_aware(version) {
            configured
        } else {
            MaskMode::Raw
        }
    }
}

impl fmt::Display for MaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MaskMode {
    type Err = MaskModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(MaskMode::Raw),
            "jaw" => Ok(MaskMode::Jaw),
            "neck" => Ok(MaskMode::Neck),
            _ => Err(MaskModeParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown mask mode: {0}")]
pub struct MaskModeParseError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_mode_parse() {
        assert_eq!("jaw".parse::<MaskMode>().unwrap(), MaskMode::Jaw);
        assert_eq!("RAW".parse::<MaskMode>().unwrap(), MaskMode::Raw);
        assert_eq!("neck".parse::<MaskMode>().unwrap(), MaskMode::Neck);
        assert!("chin".parse::<MaskMode>().is_err());
    }

    #[test]
    fn test_mask_mode_for_version() {
        assert_eq!(MaskMode::for_version("v15", MaskMode::Neck), MaskMode::Neck);
        assert_eq!(MaskMode::for_version("v1", MaskMode::Jaw), MaskMode::Raw);
    }
}
