// In: src/config.rs

//! The single source of truth for all checkpoint-store configuration.
//!
//! `TrackStateConfig` is created once at the application boundary (usually
//! deserialized from the orchestration layer's own config file) and handed to
//! `TrackerState::new`. Every field has a default so partial configs parse.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

//==================================================================================
// I. Core Configuration Enums & Structs
//==================================================================================

/// The corner convention of bounding boxes in imported annotation files.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BboxFormat {
    /// **Default:** left, top, width, height. Stored as-is.
    #[default]
    Ltwh,
    /// left, top, right, bottom. Converted to ltwh on import.
    Ltrb,
}

/// Defines the trade-off between checkpoint write speed and archive size.
///
/// Each archive entry is written with the codec this profile selects. Readers
/// accept every codec regardless of the profile they were configured with.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompressionProfile {
    /// Entries are stored uncompressed.
    Stored,

    /// Low zstd level.
    Fast,

    /// A balance between speed and size. This is the recommended default.
    #[default]
    Balanced,

    /// High zstd level for long-lived archives.
    HighCompression,
}

impl CompressionProfile {
    /// The zstd level this profile maps to, or `None` for stored entries.
    pub fn zstd_level(self) -> Option<i32> {
        match self {
            CompressionProfile::Stored => None,
            CompressionProfile::Fast => Some(1),
            CompressionProfile::Balanced => Some(3),
            CompressionProfile::HighCompression => Some(19),
        }
    }
}

/// Padding applied to a box derived from keypoints, as fractions of the
/// unpadded box width/height.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct BboxMargin {
    /// Added on both the left and the right side, relative to the width.
    #[serde(default)]
    pub horizontal: f64,
    /// Added above the box, relative to the height.
    #[serde(default)]
    pub top: f64,
    /// Added below the box, relative to the height.
    #[serde(default)]
    pub bottom: f64,
}

//==================================================================================
// II. The Unified TrackStateConfig
//==================================================================================

/// The single, unified configuration for a checkpoint session.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TrackStateConfig {
    /// Archive to read previously computed columns from.
    #[serde(default)]
    pub load_file: Option<PathBuf>,

    /// Archive to checkpoint per-video results into. May equal `load_file`.
    #[serde(default)]
    pub save_file: Option<PathBuf>,

    /// Directory of external `*.json` annotation files. When set, it takes
    /// priority over every other record source.
    #[serde(default)]
    pub json_file: Option<PathBuf>,

    /// Use ground-truth annotations as the record source.
    #[serde(default)]
    pub load_from_groundtruth: bool,

    /// Box convention of the imported annotation files.
    #[serde(default)]
    pub bbox_format: BboxFormat,

    /// Codec used for newly written archive entries.
    #[serde(default)]
    pub compression: CompressionProfile,

    /// Padding for boxes derived from keypoints during import.
    #[serde(default)]
    pub keypoint_bbox_margin: BboxMargin,

    /// True when the pipeline runs tracking stages after the imported
    /// detections; imported track identities are then discarded.
    #[serde(default)]
    pub do_tracking: bool,
}

impl TrackStateConfig {
    /// Parses a config from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = TrackStateConfig::from_json_str(
            r#"{ "save_file": "out/states.tsa", "bbox_format": "ltrb" }"#,
        )
        .unwrap();

        assert_eq!(config.save_file, Some(PathBuf::from("out/states.tsa")));
        assert_eq!(config.bbox_format, BboxFormat::Ltrb);
        assert_eq!(config.compression, CompressionProfile::Balanced);
        assert_eq!(config.keypoint_bbox_margin, BboxMargin::default());
        assert!(config.load_file.is_none());
        assert!(!config.do_tracking);
    }

    #[test]
    fn test_compression_profile_levels() {
        assert_eq!(CompressionProfile::Stored.zstd_level(), None);
        assert_eq!(CompressionProfile::Balanced.zstd_level(), Some(3));

        let config =
            TrackStateConfig::from_json_str(r#"{ "compression": "high_compression" }"#).unwrap();
        assert_eq!(config.compression.zstd_level(), Some(19));
    }

    #[test]
    fn test_unknown_bbox_format_is_rejected() {
        assert!(TrackStateConfig::from_json_str(r#"{ "bbox_format": "xywh" }"#).is_err());
    }
}
