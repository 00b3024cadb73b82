// In: src/archive/arrow_impl.rs

//! DATA MARSHALLING between `Detections` and Arrow.
//!
//! Per-video entries are Arrow IPC streams. Each present column becomes one
//! Arrow column:
//!
//! | column                                        | Arrow type                     |
//! |-----------------------------------------------|--------------------------------|
//! | `id`, `image_id`, `video_id`                  | `UInt64`, non-null             |
//! | `category_id`, `track_id`                     | `Int64`                        |
//! | `bbox_conf`                                   | `Float64`                      |
//! | `bbox_ltwh`, `track_bbox_kf_ltwh`             | `FixedSizeList<Float64, 4>`    |
//! | `keypoints_xyc` (row-major N x 3, flattened)  | `List<Float64>`                |
//! | `scores`, `embeddings`, `visibility_scores`   | `List<Float64>`                |

use arrow::array::{
    Array, ArrayRef, FixedSizeListArray, FixedSizeListBuilder, Float64Array, Float64Builder,
    Int64Array, ListArray, ListBuilder, UInt64Array,
};
use arrow::datatypes::{Field, Schema};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use ndarray::Array2;
use std::sync::Arc;

use crate::error::{Result, TrackStateError};
use crate::types::column::{Column, ColumnSet};
use crate::types::detection::{Detection, Detections};

const BOX_LEN: i32 = 4;
const KEYPOINT_WIDTH: usize = 3;

//==================================================================================
// I. Detections -> Arrow
//==================================================================================

/// Converts a record set into a single `RecordBatch` with one column per
/// present column, in canonical column order.
pub fn detections_to_batch(detections: &Detections) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(detections.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(detections.columns().len());

    for column in detections.columns() {
        let array = build_column(*column, detections.rows());
        fields.push(Field::new(
            column.as_str(),
            array.data_type().clone(),
            !column.is_identity(),
        ));
        arrays.push(array);
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

fn build_column(column: Column, rows: &[Detection]) -> ArrayRef {
    match column {
        Column::Id => Arc::new(UInt64Array::from_iter_values(rows.iter().map(|d| d.id))),
        Column::ImageId => Arc::new(UInt64Array::from_iter_values(rows.iter().map(|d| d.image_id))),
        Column::VideoId => Arc::new(UInt64Array::from_iter_values(rows.iter().map(|d| d.video_id))),
        Column::CategoryId => Arc::new(rows.iter().map(|d| d.category_id).collect::<Int64Array>()),
        Column::TrackId => Arc::new(rows.iter().map(|d| d.track_id).collect::<Int64Array>()),
        Column::BboxConf => Arc::new(rows.iter().map(|d| d.bbox_conf).collect::<Float64Array>()),
        Column::BboxLtwh => box_array(rows.iter().map(|d| d.bbox_ltwh)),
        Column::TrackBboxKfLtwh => box_array(rows.iter().map(|d| d.track_bbox_kf_ltwh)),
        Column::KeypointsXyc => float_list_array(rows.iter().map(|d| {
            d.keypoints_xyc
                .as_ref()
                .map(|k| k.iter().copied().collect::<Vec<f64>>())
        })),
        Column::Scores => float_list_array(rows.iter().map(|d| d.scores.as_deref())),
        Column::Embeddings => float_list_array(rows.iter().map(|d| d.embeddings.as_deref())),
        Column::VisibilityScores => {
            float_list_array(rows.iter().map(|d| d.visibility_scores.as_deref()))
        }
    }
}

fn box_array<I>(values: I) -> ArrayRef
where
    I: IntoIterator<Item = Option<[f64; 4]>>,
{
    let mut builder = FixedSizeListBuilder::new(Float64Builder::new(), BOX_LEN);
    for value in values {
        match value {
            Some(b) => {
                builder.values().append_slice(&b);
                builder.append(true);
            }
            None => {
                // Fixed-size lists still reserve child slots for null entries.
                builder.values().append_nulls(BOX_LEN as usize);
                builder.append(false);
            }
        }
    }
    Arc::new(builder.finish())
}

fn float_list_array<I, S>(values: I) -> ArrayRef
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<[f64]>,
{
    let mut builder = ListBuilder::new(Float64Builder::new());
    for value in values {
        match value {
            Some(v) => {
                builder.values().append_slice(v.as_ref());
                builder.append(true);
            }
            None => builder.append(false),
        }
    }
    Arc::new(builder.finish())
}

//==================================================================================
// II. Arrow -> Detections
//==================================================================================

/// Inverse of `detections_to_batch`. Fails on unknown column names, missing
/// identity columns, or columns whose Arrow type does not match the table above.
pub fn batch_to_detections(batch: &RecordBatch) -> Result<Detections> {
    let schema = batch.schema();
    let columns = schema_columns(&schema)?;

    let ids = identity_values(batch, Column::Id)?;
    let image_ids = identity_values(batch, Column::ImageId)?;
    let video_ids = identity_values(batch, Column::VideoId)?;
    let mut rows: Vec<Detection> = ids
        .iter()
        .zip(&image_ids)
        .zip(&video_ids)
        .map(|((&id, &image_id), &video_id)| Detection::new(id, image_id, video_id))
        .collect();

    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        let column: Column = field.name().parse()?;
        match column {
            Column::Id | Column::ImageId | Column::VideoId => {}
            Column::CategoryId => {
                for (row, v) in rows.iter_mut().zip(read_ints(array, column)?) {
                    row.category_id = v;
                }
            }
            Column::TrackId => {
                for (row, v) in rows.iter_mut().zip(read_ints(array, column)?) {
                    row.track_id = v;
                }
            }
            Column::BboxConf => {
                let values = downcast::<Float64Array>(array, column)?;
                for (i, row) in rows.iter_mut().enumerate() {
                    row.bbox_conf = values.is_valid(i).then(|| values.value(i));
                }
            }
            Column::BboxLtwh => {
                for (row, v) in rows.iter_mut().zip(read_boxes(array, column)?) {
                    row.bbox_ltwh = v;
                }
            }
            Column::TrackBboxKfLtwh => {
                for (row, v) in rows.iter_mut().zip(read_boxes(array, column)?) {
                    row.track_bbox_kf_ltwh = v;
                }
            }
            Column::KeypointsXyc => {
                for (row, v) in rows.iter_mut().zip(read_float_lists(array, column)?) {
                    row.keypoints_xyc = match v {
                        Some(flat) => Some(Array2::from_shape_vec(
                            (flat.len() / KEYPOINT_WIDTH, KEYPOINT_WIDTH),
                            flat,
                        )?),
                        None => None,
                    };
                }
            }
            Column::Scores => {
                for (row, v) in rows.iter_mut().zip(read_float_lists(array, column)?) {
                    row.scores = v;
                }
            }
            Column::Embeddings => {
                for (row, v) in rows.iter_mut().zip(read_float_lists(array, column)?) {
                    row.embeddings = v;
                }
            }
            Column::VisibilityScores => {
                for (row, v) in rows.iter_mut().zip(read_float_lists(array, column)?) {
                    row.visibility_scores = v;
                }
            }
        }
    }

    let mut detections = Detections::with_columns(columns);
    for row in rows {
        detections.push(row);
    }
    Ok(detections)
}

/// The column set named by an Arrow schema.
pub fn schema_columns(schema: &Schema) -> Result<ColumnSet> {
    schema.fields().iter().map(|f| f.name().parse()).collect()
}

fn downcast<'a, T: Array + 'static>(array: &'a ArrayRef, column: Column) -> Result<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        TrackStateError::Schema(format!(
            "column '{}' has unexpected Arrow type {}",
            column,
            array.data_type()
        ))
    })
}

fn identity_values(batch: &RecordBatch, column: Column) -> Result<Vec<u64>> {
    let array = batch.column_by_name(column.as_str()).ok_or_else(|| {
        TrackStateError::Schema(format!("record batch lacks identity column '{}'", column))
    })?;
    let values = downcast::<UInt64Array>(array, column)?;
    if values.null_count() > 0 {
        return Err(TrackStateError::Schema(format!(
            "identity column '{}' contains nulls",
            column
        )));
    }
    Ok(values.values().to_vec())
}

fn read_ints(array: &ArrayRef, column: Column) -> Result<Vec<Option<i64>>> {
    let values = downcast::<Int64Array>(array, column)?;
    Ok(values.iter().collect())
}

fn read_boxes(array: &ArrayRef, column: Column) -> Result<Vec<Option<[f64; 4]>>> {
    let lists = downcast::<FixedSizeListArray>(array, column)?;
    if lists.value_length() != BOX_LEN {
        return Err(TrackStateError::Schema(format!(
            "column '{}' holds lists of {} values, expected {}",
            column,
            lists.value_length(),
            BOX_LEN
        )));
    }
    (0..lists.len())
        .map(|i| {
            if lists.is_null(i) {
                return Ok(None);
            }
            let child = lists.value(i);
            let floats = downcast::<Float64Array>(&child, column)?;
            let mut b = [0.0; 4];
            b.copy_from_slice(floats.values());
            Ok(Some(b))
        })
        .collect()
}

fn read_float_lists(array: &ArrayRef, column: Column) -> Result<Vec<Option<Vec<f64>>>> {
    let lists = downcast::<ListArray>(array, column)?;
    (0..lists.len())
        .map(|i| {
            if lists.is_null(i) {
                return Ok(None);
            }
            let child = lists.value(i);
            let floats = downcast::<Float64Array>(&child, column)?;
            Ok(Some(floats.values().to_vec()))
        })
        .collect()
}

//==================================================================================
// III. IPC Stream Encoding
//==================================================================================

/// Serializes a record set as a single-batch Arrow IPC stream.
pub fn encode_ipc(detections: &Detections) -> Result<Vec<u8>> {
    let batch = detections_to_batch(detections)?;
    let mut buffer = Vec::new();
    {
        let mut writer = StreamWriter::try_new(&mut buffer, &batch.schema())?;
        writer.write(&batch)?;
        writer.finish()?;
    }
    Ok(buffer)
}

/// Parses an Arrow IPC stream written by `encode_ipc`. Streams holding
/// several batches are concatenated.
pub fn decode_ipc(bytes: &[u8]) -> Result<Detections> {
    let reader = StreamReader::try_new(bytes, None)?;
    let mut detections = Detections::with_columns(schema_columns(&reader.schema())?);
    for batch in reader {
        for row in batch_to_detections(&batch?)?.into_rows() {
            detections.push(row);
        }
    }
    Ok(detections)
}
