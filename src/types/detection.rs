//! The canonical detection record and the `Detections` record set.
//!
//! A `Detection` is a fixed superset of every column a pipeline stage can
//! produce; absent attributes are `None`. `Detections` pairs the rows with the
//! explicit set of present columns. A column outside that set is `None` on
//! every row, which the mutating methods keep true by construction.

use ndarray::Array2;

use crate::types::column::{identity_columns, Column, ColumnSet};
use crate::types::{ImageId, VideoId};

/// One detected instance in one image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detection {
    pub id: u64,
    pub image_id: ImageId,
    pub video_id: VideoId,
    pub category_id: Option<i64>,
    /// left, top, width, height.
    pub bbox_ltwh: Option<[f64; 4]>,
    pub bbox_conf: Option<f64>,
    /// Shape (N, 3): x, y, confidence per keypoint.
    pub keypoints_xyc: Option<Array2<f64>>,
    pub scores: Option<Vec<f64>>,
    pub embeddings: Option<Vec<f64>>,
    pub visibility_scores: Option<Vec<f64>>,
    pub track_id: Option<i64>,
    pub track_bbox_kf_ltwh: Option<[f64; 4]>,
}

impl Detection {
    pub fn new(id: u64, image_id: ImageId, video_id: VideoId) -> Self {
        Self {
            id,
            image_id,
            video_id,
            ..Default::default()
        }
    }

    /// True when the row holds a value for `column`. Identity columns always do.
    pub fn has_value(&self, column: Column) -> bool {
        match column {
            Column::Id | Column::ImageId | Column::VideoId => true,
            Column::CategoryId => self.category_id.is_some(),
            Column::BboxLtwh => self.bbox_ltwh.is_some(),
            Column::BboxConf => self.bbox_conf.is_some(),
            Column::KeypointsXyc => self.keypoints_xyc.is_some(),
            Column::Scores => self.scores.is_some(),
            Column::Embeddings => self.embeddings.is_some(),
            Column::VisibilityScores => self.visibility_scores.is_some(),
            Column::TrackId => self.track_id.is_some(),
            Column::TrackBboxKfLtwh => self.track_bbox_kf_ltwh.is_some(),
        }
    }

    /// Clears the value of an optional column. Identity columns are left alone.
    pub fn clear(&mut self, column: Column) {
        match column {
            Column::Id | Column::ImageId | Column::VideoId => {}
            Column::CategoryId => self.category_id = None,
            Column::BboxLtwh => self.bbox_ltwh = None,
            Column::BboxConf => self.bbox_conf = None,
            Column::KeypointsXyc => self.keypoints_xyc = None,
            Column::Scores => self.scores = None,
            Column::Embeddings => self.embeddings = None,
            Column::VisibilityScores => self.visibility_scores = None,
            Column::TrackId => self.track_id = None,
            Column::TrackBboxKfLtwh => self.track_bbox_kf_ltwh = None,
        }
    }

    /// Every column this row holds a value for.
    pub fn populated_columns(&self) -> impl Iterator<Item = Column> + '_ {
        Column::ALL.into_iter().filter(move |c| self.has_value(*c))
    }
}

/// A set of detection rows plus the columns they carry.
#[derive(Debug, Clone, PartialEq)]
pub struct Detections {
    columns: ColumnSet,
    rows: Vec<Detection>,
}

impl Default for Detections {
    fn default() -> Self {
        Self {
            columns: identity_columns(),
            rows: Vec::new(),
        }
    }
}

impl Detections {
    /// An empty record set carrying only the identity columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty record set declaring `columns` (identity columns are always added).
    pub fn with_columns(columns: ColumnSet) -> Self {
        let mut out = Self::new();
        out.columns.extend(columns);
        out
    }

    /// Builds a set whose columns are every column populated on some row.
    pub fn from_rows(rows: Vec<Detection>) -> Self {
        let mut out = Self::new();
        for row in rows {
            out.push(row);
        }
        out
    }

    /// Appends a row, widening the column set with whatever it populates.
    pub fn push(&mut self, row: Detection) {
        self.columns.extend(row.populated_columns());
        self.rows.push(row);
    }

    /// Declares `column` present even if no row has a value for it yet.
    pub fn add_column(&mut self, column: Column) {
        self.columns.insert(column);
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    pub fn rows(&self) -> &[Detection] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<Detection> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The rows belonging to `video_id`, with the same column set.
    pub fn for_video(&self, video_id: VideoId) -> Detections {
        Detections {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .filter(|d| d.video_id == video_id)
                .cloned()
                .collect(),
        }
    }

    /// Removes every row of `video_id` and appends `batch`. The column set
    /// becomes the union of both sets; rows from either side hold `None` for
    /// columns only the other side carried.
    pub fn replace_video(&mut self, video_id: VideoId, batch: Detections) {
        self.rows.retain(|d| d.video_id != video_id);
        self.columns.extend(batch.columns);
        self.rows.extend(batch.rows);
    }

    /// A copy restricted to `columns` (identity columns are always kept).
    /// Requested columns the set does not carry are ignored.
    pub fn project(&self, columns: &ColumnSet) -> Detections {
        let keep: ColumnSet = self
            .columns
            .iter()
            .copied()
            .filter(|c| c.is_identity() || columns.contains(c))
            .collect();
        let dropped: Vec<Column> = self.columns.difference(&keep).copied().collect();

        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut row = row.clone();
                for column in &dropped {
                    row.clear(*column);
                }
                row
            })
            .collect();

        Detections {
            columns: keep,
            rows,
        }
    }

    /// Drops `columns` from the set and every row. Identity columns and
    /// columns the set does not carry are skipped.
    pub fn drop_columns(&mut self, columns: &[Column]) {
        for column in columns {
            if column.is_identity() || !self.columns.remove(column) {
                continue;
            }
            for row in &mut self.rows {
                row.clear(*column);
            }
        }
    }
}

impl<'a> IntoIterator for &'a Detections {
    type Item = &'a Detection;
    type IntoIter = std::slice::Iter<'a, Detection>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
