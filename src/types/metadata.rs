//! Read-only video and image metadata tables, and the `TrackingSet` bundle the
//! dataset layer hands to the checkpoint store.

use hashbrown::HashMap;
use std::collections::BTreeMap;

use crate::types::detection::Detections;
use crate::types::{ImageId, VideoId};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoMetadata {
    pub id: VideoId,
    pub name: Option<String>,
    pub nframes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImageMetadata {
    pub id: ImageId,
    pub video_id: VideoId,
    pub frame: Option<u64>,
    pub file_path: Option<String>,
}

/// Video/image metadata for a run, plus the ground-truth detections when the
/// dataset provides them.
#[derive(Debug, Clone, Default)]
pub struct TrackingSet {
    videos: BTreeMap<VideoId, VideoMetadata>,
    images: BTreeMap<ImageId, ImageMetadata>,
    detections_gt: Option<Detections>,
}

impl TrackingSet {
    pub fn new<V, I>(videos: V, images: I) -> Self
    where
        V: IntoIterator<Item = VideoMetadata>,
        I: IntoIterator<Item = ImageMetadata>,
    {
        Self {
            videos: videos.into_iter().map(|v| (v.id, v)).collect(),
            images: images.into_iter().map(|i| (i.id, i)).collect(),
            detections_gt: None,
        }
    }

    pub fn with_groundtruth(mut self, detections_gt: Detections) -> Self {
        self.detections_gt = Some(detections_gt);
        self
    }

    pub fn video(&self, video_id: VideoId) -> Option<&VideoMetadata> {
        self.videos.get(&video_id)
    }

    pub fn videos(&self) -> impl Iterator<Item = &VideoMetadata> {
        self.videos.values()
    }

    pub fn image(&self, image_id: ImageId) -> Option<&ImageMetadata> {
        self.images.get(&image_id)
    }

    pub fn images(&self) -> impl Iterator<Item = &ImageMetadata> {
        self.images.values()
    }

    pub fn detections_gt(&self) -> Option<&Detections> {
        self.detections_gt.as_ref()
    }

    /// The `image_id -> video_id` join table.
    pub fn image_to_video(&self) -> HashMap<ImageId, VideoId> {
        self.images.values().map(|i| (i.id, i.video_id)).collect()
    }
}
