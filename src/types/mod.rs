//! This module defines the core, strongly-typed data representations used
//! throughout the checkpoint store.
//!
//! It includes the canonical `Column` enum which replaces string-typed column
//! names, the `Detection`/`Detections` record model, and the read-only
//! metadata tables.

pub mod column;
pub mod detection;
pub mod metadata;

/// Key of a video in metadata tables, records and archives.
pub type VideoId = u64;
/// Key of a frame in the image metadata table.
pub type ImageId = u64;

// Re-export the main type(s) for easier access.
pub use column::{Column, ColumnSet};
pub use detection::{Detection, Detections};
pub use metadata::{ImageMetadata, TrackingSet, VideoMetadata};
