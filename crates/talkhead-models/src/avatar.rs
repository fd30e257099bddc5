//! Avatar identity and the declared preprocessing record.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::MaskMode;

/// Default preprocessing format tag.
pub const PREPROCESSING_VERSION: &str = "v15";

/// Maximum length of an avatar identifier.
const MAX_AVATAR_ID_LEN: usize = 64;

/// Unique identifier of a preprocessed avatar.
///
/// Identifiers double as directory names, so only `[A-Za-z0-9_-]` is
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct AvatarId(String);

impl AvatarId {
    /// Parse and validate an identifier.
    pub fn parse(s: impl Into<String>) -> Result<Self, AvatarIdError> {
        let s = s.into();
        if s.is_empty() {
            return Err(AvatarIdError::Empty);
        }
        if s.len() > MAX_AVATAR_ID_LEN {
            return Err(AvatarIdError::TooLong(s.len()));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(AvatarIdError::InvalidChar(c));
        }
        Ok(Self(s))
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AvatarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AvatarId {
    type Err = AvatarIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AvatarId {
    type Error = AvatarIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<AvatarId> for String {
    fn from(id: AvatarId) -> Self {
        id.0
    }
}

/// Avatar identifier validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AvatarIdError {
    #[error("Avatar id must not be empty")]
    Empty,

    #[error("Avatar id is {0} characters long (max 64)")]
    TooLong(usize),

    #[error("Avatar id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Declared preprocessing record, persisted as `avatar_info.json`.
///
/// Written last when an avatar is saved, so its presence marks a complete
/// artifact set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AvatarInfo {
    pub avatar_id: AvatarId,
    /// Source video or frame directory the avatar was built from
    pub source_path: String,
    /// Face-region detection adjustment used at build time
    pub bbox_shift: i32,
    /// Preprocessing format tag (e.g. "v15")
    pub version: String,
    /// Number of entries in each cyclic artifact list
    pub cycle_len: usize,
    /// Lower-edge margin applied to face boxes in margin-aware mode
    #[serde(default)]
    pub extra_margin: u32,
    #[serde(default)]
    pub mask_mode: MaskMode,
    pub created_at: DateTime<Utc>,
}

impl AvatarInfo {
    /// Whether this record was built with the given detection adjustment.
    pub fn matches_bbox_shift(&self, bbox_shift: i32) -> bool {
        self.bbox_shift == bbox_shift
    }

    /// Whether the margin-aware crop mode applies to this version.
    pub fn is_margin_aware(&self) -> bool {
        is_margin_aware(&self.version)
    }
}

/// Whether a preprocessing version extends face boxes by a lower margin.
pub fn is_margin_aware(version: &str) -> bool {
    version == PREPROCESSING_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_id_accepts_simple_names() {
        assert!(AvatarId::parse("alice").is_ok());
        assert!(AvatarId::parse("avatar_01-b").is_ok());
    }

    #[test]
    fn test_avatar_id_rejects_path_like_names() {
        assert_eq!(AvatarId::parse(""), Err(AvatarIdError::Empty));
        assert_eq!(AvatarId::parse("../etc"), Err(AvatarIdError::InvalidChar('.')));
        assert_eq!(AvatarId::parse("a/b"), Err(AvatarIdError::InvalidChar('/')));
        assert!(matches!(
            AvatarId::parse("x".repeat(65)),
            Err(AvatarIdError::TooLong(65))
        ));
    }

    #[test]
    fn test_avatar_id_serde_validates() {
        let id: AvatarId = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(id.as_str(), "bob");
        assert!(serde_json::from_str::<AvatarId>("\"b o b\"").is_err());
    }

    #[test]
    fn test_avatar_info_roundtrip_defaults() {
        let json = r#"{
            "avatar_id": "bob",
            "source_path": "/tmp/bob.mp4",
            "bbox_shift": -3,
            "version": "v15",
            "cycle_len": 12,
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let info: AvatarInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.extra_margin, 0);
        assert_eq!(info.mask_mode, MaskMode::Jaw);
        assert!(info.matches_bbox_shift(-3));
        assert!(!info.matches_bbox_shift(0));
        assert!(info.is_margin_aware());
    }
}
