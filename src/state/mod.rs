// In: src/state/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: Tracker State & Session Scope
// ====================================================================================
//
// `TrackerState` owns the record table for a whole run. Archive channels and
// the "current video" selector only exist inside scoped guards:
//
//   TrackerState::new      -> resolves stage columns, imports annotations,
//         |                   seeds the table from ground truth
//         |
//   TrackerState::open     -> Session<'_>   (opens load/save channels)
//         |
//         |   Session::select(video_id) -> VideoScope<'_>   (sets the current video)
//         |         |
//         |         `-> load()               import > ground truth > archive > empty
//         |         `-> update(records)      replace-by-key into the table
//         |         `-> save()               put the video's slice, at most once
//         |         `-> on_video_loop_end()  update + save
//         |   drop(VideoScope)               clears the current video
//         |
//   drop(Session)          -> closes channels, drops forget columns once
//
// ====================================================================================

use std::ops::Deref;
use std::path::Path;
use std::rc::Rc;

use crate::archive::{read_archive_columns, ArchiveStore, EntryCodec, PutOutcome};
use crate::config::TrackStateConfig;
use crate::error::{Result, TrackStateError};
use crate::import::{import_annotations, ImportOptions};
use crate::observability::{Diagnostic, DiagnosticsSink};
use crate::schema::{ColumnContract, ColumnResolution};
use crate::types::column::{column_names, ColumnSet};
use crate::types::detection::Detections;
use crate::types::metadata::{TrackingSet, VideoMetadata};
use crate::types::VideoId;

#[cfg(test)]
mod tests;

//==================================================================================
// I. TrackerState
//==================================================================================

/// The run-long record table plus everything needed to load and checkpoint
/// it one video at a time.
pub struct TrackerState {
    tracking_set: TrackingSet,
    config: TrackStateConfig,
    resolution: ColumnResolution,
    load_columns: ColumnSet,
    /// Accumulated records; `None` until something is loaded or updated.
    detections: Option<Detections>,
    imported: Option<Detections>,
    store: Option<ArchiveStore>,
    current_video: Option<VideoId>,
    sink: Rc<dyn DiagnosticsSink>,
}

impl TrackerState {
    /// Resolves the column contracts of `stages` (in pipeline order) against
    /// the configured sources and prepares the record table.
    ///
    /// A configured `load_file` must already exist: its summary decides which
    /// columns are loaded. A configured `json_file` directory is imported
    /// eagerly. With `load_from_groundtruth` the table starts as the ground
    /// truth restricted to the load columns.
    pub fn new<'a, I, S>(
        tracking_set: TrackingSet,
        config: TrackStateConfig,
        stages: I,
        sink: Rc<dyn DiagnosticsSink>,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = &'a S>,
        S: ColumnContract + ?Sized + 'a,
    {
        let resolution = ColumnResolution::resolve(stages);

        if let Some(path) = &config.save_file {
            sink.record(Diagnostic::SavingTo { path: path.clone() });
        }

        let source_columns = match &config.load_file {
            Some(path) => read_archive_columns(path, sink.as_ref())?,
            None => ColumnSet::new(),
        };
        let load_columns = resolution.load_columns(&source_columns);
        if let Some(path) = &config.load_file {
            sink.record(Diagnostic::LoadingColumns {
                path: path.clone(),
                columns: column_names(&load_columns),
            });
        }

        let imported = match &config.json_file {
            Some(dir) => Some(import_annotations(
                dir,
                &tracking_set,
                &ImportOptions::from(&config),
                sink.as_ref(),
            )?),
            None => None,
        };

        let detections = if config.load_from_groundtruth {
            let gt = tracking_set.detections_gt().ok_or_else(|| {
                TrackStateError::Config(
                    "load_from_groundtruth is set but the tracking set has no ground truth"
                        .into(),
                )
            })?;
            Some(gt.project(&load_columns))
        } else {
            None
        };

        Ok(Self {
            tracking_set,
            config,
            resolution,
            load_columns,
            detections,
            imported,
            store: None,
            current_video: None,
            sink,
        })
    }

    /// Opens the configured archive channels for one session.
    pub fn open(&mut self) -> Result<Session<'_>> {
        let store = ArchiveStore::open(
            self.config.load_file.as_deref(),
            self.config.save_file.as_deref(),
            EntryCodec::from(self.config.compression),
            self.sink.clone(),
        )?;
        log::info!("Opened tracker state session: {:?}", store);
        self.store = Some(store);
        Ok(Session {
            state: self,
            closed: false,
        })
    }

    /// The records of the current video from the highest-priority source:
    /// imported annotations, then ground truth, then the load archive.
    /// Records read from the archive are also merged into the table.
    pub fn load(&mut self) -> Result<Detections> {
        let video_id = self.require_video("load")?;

        if let Some(imported) = &self.imported {
            return Ok(imported.for_video(video_id));
        }

        if self.config.load_from_groundtruth {
            let rows = self
                .detections
                .as_ref()
                .map(|table| table.for_video(video_id).project(&self.load_columns))
                .unwrap_or_else(|| self.empty());
            if rows.is_empty() {
                self.sink
                    .record(Diagnostic::VideoNotInGroundTruth { video_id });
            }
            return Ok(rows);
        }

        if self.config.load_file.is_some() {
            let store = self
                .store
                .as_ref()
                .filter(|s| s.has_load_channel())
                .ok_or_else(|| {
                    TrackStateError::Precondition("load requires an open session".into())
                })?;
            return match store.get(video_id)? {
                Some(records) => {
                    let projected = records.project(&self.load_columns);
                    self.update(video_id, records);
                    Ok(projected)
                }
                None => Ok(self.empty()),
            };
        }

        Ok(self.empty())
    }

    /// Replaces every row of `video_id` in the table with `records`. An empty
    /// table adopts `records` as-is.
    pub fn update(&mut self, video_id: VideoId, records: Detections) {
        match &mut self.detections {
            Some(table) => table.replace_video(video_id, records),
            slot @ None => *slot = Some(records),
        }
    }

    /// Checkpoints the current video's rows. Returns `Ok(None)` when no save
    /// file is configured.
    pub fn save(&self) -> Result<Option<PutOutcome>> {
        if self.config.save_file.is_none() {
            return Ok(None);
        }
        let video_id = self.require_video("save")?;
        let table = self.detections.as_ref().ok_or_else(|| {
            TrackStateError::Precondition("save requires accumulated records".into())
        })?;
        let store = self
            .store
            .as_ref()
            .filter(|s| s.has_save_channel())
            .ok_or_else(|| TrackStateError::Precondition("save requires an open session".into()))?;
        store.put(video_id, &table.for_video(video_id)).map(Some)
    }

    pub fn current_video(&self) -> Option<VideoId> {
        self.current_video
    }

    /// Everything processed so far, across videos.
    pub fn detections(&self) -> Option<&Detections> {
        self.detections.as_ref()
    }

    /// The columns fetched from the load archive (and kept from ground truth).
    pub fn load_columns(&self) -> &ColumnSet {
        &self.load_columns
    }

    pub fn resolution(&self) -> &ColumnResolution {
        &self.resolution
    }

    pub fn tracking_set(&self) -> &TrackingSet {
        &self.tracking_set
    }

    pub fn config(&self) -> &TrackStateConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    /// Videos already checkpointed on the save channel of the open session.
    pub fn saved_videos(&self) -> Vec<VideoId> {
        self.store
            .as_ref()
            .map_or_else(Vec::new, ArchiveStore::saved_videos)
    }

    pub fn save_path(&self) -> Option<&Path> {
        self.config.save_file.as_deref()
    }

    fn require_video(&self, operation: &str) -> Result<VideoId> {
        self.current_video.ok_or_else(|| {
            TrackStateError::Precondition(format!("{} requires a selected video", operation))
        })
    }

    fn empty(&self) -> Detections {
        Detections::with_columns(self.load_columns.clone())
    }

    /// Session teardown: close channels, then purge the forget columns.
    fn close_session(&mut self) {
        if let Some(mut store) = self.store.take() {
            store.close();
        }
        self.current_video = None;
        if let Some(table) = self.detections.as_mut() {
            table.drop_columns(&self.resolution.forget_columns);
        }
        log::info!("Closed tracker state session");
    }
}

//==================================================================================
// II. Scope Guards
//==================================================================================

/// An open session. Dropping it closes the archive channels and drops the
/// forget columns from the table, once.
pub struct Session<'a> {
    state: &'a mut TrackerState,
    closed: bool,
}

impl<'a> Session<'a> {
    /// Makes `video_id` the current video until the returned scope is dropped.
    pub fn select(&mut self, video_id: VideoId) -> VideoScope<'_> {
        self.state.current_video = Some(video_id);
        VideoScope {
            state: &mut *self.state,
            video_id,
        }
    }

    /// Ends the session now instead of at the end of the enclosing block.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.close_session();
        }
    }
}

impl Deref for Session<'_> {
    type Target = TrackerState;

    fn deref(&self) -> &TrackerState {
        self.state
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// The current-video selection of a session.
pub struct VideoScope<'s> {
    state: &'s mut TrackerState,
    video_id: VideoId,
}

impl VideoScope<'_> {
    pub fn video_id(&self) -> VideoId {
        self.video_id
    }

    pub fn load(&mut self) -> Result<Detections> {
        self.state.load()
    }

    pub fn update(&mut self, records: Detections) {
        self.state.update(self.video_id, records);
    }

    pub fn save(&self) -> Result<Option<PutOutcome>> {
        self.state.save()
    }

    /// Merges the video's final records and checkpoints them.
    pub fn on_video_loop_end(
        &mut self,
        video: &VideoMetadata,
        video_idx: usize,
        records: Detections,
    ) -> Result<Option<PutOutcome>> {
        if video.id != self.video_id {
            return Err(TrackStateError::Precondition(format!(
                "video {} ended while video {} is selected",
                video.id, self.video_id
            )));
        }
        log::info!(
            "Video #{} ({}) done, {} records",
            video_idx,
            video.name.as_deref().unwrap_or("unnamed"),
            records.len()
        );
        self.update(records);
        self.save()
    }
}

impl Deref for VideoScope<'_> {
    type Target = TrackerState;

    fn deref(&self) -> &TrackerState {
        self.state
    }
}

impl Drop for VideoScope<'_> {
    fn drop(&mut self) {
        self.state.current_video = None;
    }
}
