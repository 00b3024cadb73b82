// In: src/import/mod.rs

//! Imports detections from a directory of external JSON annotation files.
//!
//! Every `*.json` file in the directory holds `{"annotations": [...]}`. The
//! annotations of all files (in sorted path order) are converted to canonical
//! `Detection` rows:
//!
//! 1. `bbox` becomes `bbox_ltwh` (converted from ltrb when configured) and the
//!    flat `keypoints` array becomes the (N, 3) `keypoints_xyc`.
//! 2. Rows get sequential ids in import order.
//! 3. Missing boxes are derived from the visible keypoints.
//! 4. `bbox_conf` is the mean keypoint confidence, or the mean of `scores`
//!    when keypoint confidences sum to zero over the whole import.
//! 5. `video_id` is joined from the image metadata on `image_id`.
//! 6. Track identities are dropped when tracking runs downstream; otherwise
//!    `track_bbox_kf_ltwh` is seeded from `bbox_ltwh`.

pub mod coordinates;

use ndarray::Array2;
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::config::{BboxFormat, BboxMargin, TrackStateConfig};
use crate::error::{Result, TrackStateError};
use crate::observability::{Diagnostic, DiagnosticsSink};
use crate::types::column::Column;
use crate::types::detection::{Detection, Detections};
use crate::types::metadata::TrackingSet;
use crate::types::ImageId;

use coordinates::{bbox_from_keypoints, ltrb_to_ltwh, mean_keypoint_confidence};

//==================================================================================
// I. Options & File Format
//==================================================================================

/// The subset of `TrackStateConfig` the importer reads.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImportOptions {
    pub bbox_format: BboxFormat,
    pub keypoint_bbox_margin: BboxMargin,
    pub do_tracking: bool,
}

impl From<&TrackStateConfig> for ImportOptions {
    fn from(config: &TrackStateConfig) -> Self {
        Self {
            bbox_format: config.bbox_format,
            keypoint_bbox_margin: config.keypoint_bbox_margin,
            do_tracking: config.do_tracking,
        }
    }
}

#[derive(Deserialize, Debug)]
struct AnnotationFile {
    annotations: Vec<RawAnnotation>,
}

/// One annotation as found on disk. Unknown fields are ignored.
#[derive(Deserialize, Debug)]
struct RawAnnotation {
    image_id: ImageId,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    #[serde(default)]
    keypoints: Option<Vec<f64>>,
    #[serde(default)]
    track_id: Option<i64>,
    #[serde(default)]
    scores: Option<Vec<f64>>,
    #[serde(default)]
    category_id: Option<i64>,
}

//==================================================================================
// II. Import
//==================================================================================

/// Imports every annotation file in `dir` into one canonical record set.
///
/// Rows whose `image_id` has no row in the image table cannot be assigned a
/// video and are dropped; their count is reported as
/// `Diagnostic::UnmatchedImportRows`.
pub fn import_annotations(
    dir: &Path,
    tracking_set: &TrackingSet,
    options: &ImportOptions,
    sink: &dyn DiagnosticsSink,
) -> Result<Detections> {
    let files = annotation_files(dir)?;
    log::info!("Importing detections from {} files in {}", files.len(), dir.display());

    let mut rows = Vec::new();
    for path in &files {
        let file = read_annotation_file(path)?;
        for raw in file.annotations {
            let id = rows.len() as u64;
            rows.push(canonicalize(raw, id, options).map_err(|reason| {
                TrackStateError::Import {
                    path: path.clone(),
                    reason: format!("annotation {}: {}", id, reason),
                }
            })?);
        }
    }

    fallback_to_scores(&mut rows);

    let image_to_video = tracking_set.image_to_video();
    let before = rows.len();
    let mut detections = Detections::new();
    detections.add_column(Column::BboxLtwh);
    detections.add_column(Column::BboxConf);
    if !options.do_tracking {
        detections.add_column(Column::TrackBboxKfLtwh);
    }
    for mut row in rows {
        let Some(&video_id) = image_to_video.get(&row.image_id) else {
            continue;
        };
        row.video_id = video_id;
        if options.do_tracking {
            row.track_id = None;
        } else {
            row.track_bbox_kf_ltwh = row.bbox_ltwh;
        }
        detections.push(row);
    }

    let unmatched = before - detections.len();
    if unmatched > 0 {
        sink.record(Diagnostic::UnmatchedImportRows { count: unmatched });
    }
    Ok(detections)
}

/// The `*.json` files directly inside `dir`, sorted by path.
fn annotation_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        TrackStateError::Config(format!(
            "cannot read annotation directory {}: {}",
            dir.display(),
            e
        ))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |ext| ext == "json") {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err(TrackStateError::NoImportFiles(dir.to_path_buf()));
    }
    files.sort();
    Ok(files)
}

fn read_annotation_file(path: &Path) -> Result<AnnotationFile> {
    let reader = BufReader::new(File::open(path)?);
    serde_json::from_reader(reader).map_err(|e| TrackStateError::Import {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Converts one raw annotation. `video_id` is filled in by the caller's join.
fn canonicalize(
    raw: RawAnnotation,
    id: u64,
    options: &ImportOptions,
) -> std::result::Result<Detection, String> {
    let keypoints_xyc = match raw.keypoints {
        Some(flat) => {
            if flat.len() % 3 != 0 {
                return Err(format!(
                    "keypoints length {} is not a multiple of 3",
                    flat.len()
                ));
            }
            Some(Array2::from_shape_vec((flat.len() / 3, 3), flat).map_err(|e| e.to_string())?)
        }
        None => None,
    };

    let bbox_ltwh = match raw.bbox {
        Some(values) => {
            let bbox: [f64; 4] = values
                .as_slice()
                .try_into()
                .map_err(|_| format!("bbox has {} values, expected 4", values.len()))?;
            match options.bbox_format {
                BboxFormat::Ltwh => bbox,
                BboxFormat::Ltrb => ltrb_to_ltwh(bbox),
            }
        }
        None => keypoints_xyc
            .as_ref()
            .and_then(|k| bbox_from_keypoints(k, options.keypoint_bbox_margin))
            .ok_or_else(|| "no bbox and no visible keypoints to derive one".to_string())?,
    };

    Ok(Detection {
        category_id: raw.category_id,
        bbox_ltwh: Some(bbox_ltwh),
        bbox_conf: keypoints_xyc.as_ref().map(mean_keypoint_confidence),
        keypoints_xyc,
        scores: raw.scores,
        track_id: raw.track_id,
        ..Detection::new(id, raw.image_id, 0)
    })
}

/// When keypoint confidences carry no signal at all (their sum over the
/// import is zero), box confidence is taken from the per-row `scores`.
fn fallback_to_scores(rows: &mut [Detection]) {
    let total: f64 = rows.iter().filter_map(|d| d.bbox_conf).sum();
    if total != 0.0 {
        return;
    }
    for row in rows.iter_mut() {
        if let Some(scores) = row.scores.as_ref().filter(|s| !s.is_empty()) {
            row.bbox_conf = Some(scores.iter().sum::<f64>() / scores.len() as f64);
        }
    }
}
