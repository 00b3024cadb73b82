//! The closed set of record columns and the ordered `ColumnSet` built on it.
//!
//! Stages and archives name columns by their snake_case wire name; inside the
//! crate every column is a `Column` variant, so schema arithmetic never has to
//! inspect row values to know what a record set carries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::TrackStateError;

/// Every column a detection record can carry.
///
/// The declaration order is the canonical column order used in summaries and
/// Arrow schemas.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Id,
    ImageId,
    VideoId,
    CategoryId,
    BboxLtwh,
    BboxConf,
    KeypointsXyc,
    Scores,
    Embeddings,
    VisibilityScores,
    TrackId,
    TrackBboxKfLtwh,
}

impl Column {
    pub const ALL: [Column; 12] = [
        Column::Id,
        Column::ImageId,
        Column::VideoId,
        Column::CategoryId,
        Column::BboxLtwh,
        Column::BboxConf,
        Column::KeypointsXyc,
        Column::Scores,
        Column::Embeddings,
        Column::VisibilityScores,
        Column::TrackId,
        Column::TrackBboxKfLtwh,
    ];

    /// Columns every record carries; they can never be projected away or forgotten.
    pub const IDENTITY: [Column; 3] = [Column::Id, Column::ImageId, Column::VideoId];

    pub fn as_str(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::ImageId => "image_id",
            Column::VideoId => "video_id",
            Column::CategoryId => "category_id",
            Column::BboxLtwh => "bbox_ltwh",
            Column::BboxConf => "bbox_conf",
            Column::KeypointsXyc => "keypoints_xyc",
            Column::Scores => "scores",
            Column::Embeddings => "embeddings",
            Column::VisibilityScores => "visibility_scores",
            Column::TrackId => "track_id",
            Column::TrackBboxKfLtwh => "track_bbox_kf_ltwh",
        }
    }

    pub fn is_identity(self) -> bool {
        Self::IDENTITY.contains(&self)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Column {
    type Err = TrackStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Column::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| TrackStateError::Schema(format!("unknown column '{}'", s)))
    }
}

/// An ordered set of columns.
pub type ColumnSet = BTreeSet<Column>;

/// The identity columns as a set.
pub fn identity_columns() -> ColumnSet {
    Column::IDENTITY.into_iter().collect()
}

/// Parses a list of wire names into a set, failing on the first unknown name.
pub fn parse_columns<S: AsRef<str>>(names: &[S]) -> Result<ColumnSet, TrackStateError> {
    names.iter().map(|n| n.as_ref().parse()).collect()
}

/// Wire names of a set, in canonical order.
pub fn column_names(columns: &ColumnSet) -> Vec<String> {
    columns.iter().map(|c| c.as_str().to_string()).collect()
}
