// In: src/archive/store.rs

//! The checkpoint store: a logical "load" channel and a logical "save"
//! channel over archive files, keyed by video.
//!
//! When both channels name the same file they share one `ArchiveFile` opened
//! for read/append. Opening the same file twice, once per channel, would let
//! each handle keep its own idea of where the directory ends; the first write
//! would then leave the other handle reading a stale directory.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::archive::arrow_impl;
use crate::archive::container::ArchiveFile;
use crate::archive::format::{
    parse_video_entry_name, video_entry_name, EntryCodec, Summary, SUMMARY_ENTRY,
};
use crate::error::{Result, TrackStateError};
use crate::observability::{Diagnostic, DiagnosticsSink};
use crate::types::column::{column_names, parse_columns, ColumnSet};
use crate::types::detection::Detections;
use crate::types::VideoId;

type SharedArchive = Rc<RefCell<ArchiveFile>>;

/// Result of `ArchiveStore::put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    /// The video was already stored; the existing entry was kept.
    AlreadyPresent,
}

pub struct ArchiveStore {
    load: Option<SharedArchive>,
    save: Option<SharedArchive>,
    codec: EntryCodec,
    sink: Rc<dyn DiagnosticsSink>,
}

impl std::fmt::Debug for ArchiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStore")
            .field("load", &self.load_path())
            .field("save", &self.save_path())
            .field("aliased", &self.is_aliased())
            .field("codec", &self.codec)
            .finish()
    }
}

impl ArchiveStore {
    /// Opens the requested channels. A load path must name an existing
    /// archive; a save path is created on demand.
    pub fn open(
        load_path: Option<&Path>,
        save_path: Option<&Path>,
        codec: EntryCodec,
        sink: Rc<dyn DiagnosticsSink>,
    ) -> Result<Self> {
        let (load, save) = match (load_path, save_path) {
            (Some(load), Some(save)) if same_file(load, save) => {
                let shared = Rc::new(RefCell::new(ArchiveFile::open_append(save)?));
                (Some(shared.clone()), Some(shared))
            }
            (load, save) => {
                let load = load.map(open_load_channel).transpose()?;
                let save = save
                    .map(|p| ArchiveFile::open_append(p).map(|a| Rc::new(RefCell::new(a))))
                    .transpose()?;
                (load, save)
            }
        };
        Ok(Self {
            load,
            save,
            codec,
            sink,
        })
    }

    pub fn has_load_channel(&self) -> bool {
        self.load.is_some()
    }

    pub fn has_save_channel(&self) -> bool {
        self.save.is_some()
    }

    /// True when both channels share one physical handle.
    pub fn is_aliased(&self) -> bool {
        match (&self.load, &self.save) {
            (Some(l), Some(s)) => Rc::ptr_eq(l, s),
            _ => false,
        }
    }

    pub fn load_path(&self) -> Option<PathBuf> {
        self.load.as_ref().map(|a| a.borrow().path().to_path_buf())
    }

    pub fn save_path(&self) -> Option<PathBuf> {
        self.save.as_ref().map(|a| a.borrow().path().to_path_buf())
    }

    /// The persisted column set of the load channel. See `read_columns`.
    pub fn read_summary(&self) -> Result<ColumnSet> {
        match &self.load {
            Some(archive) => read_columns(&mut archive.borrow_mut(), self.sink.as_ref()),
            None => Ok(ColumnSet::new()),
        }
    }

    /// The records stored for `video_id` on the load channel, or `None` (and
    /// a diagnostic) when the archive has no entry for it.
    pub fn get(&self, video_id: VideoId) -> Result<Option<Detections>> {
        let archive = self.load.as_ref().ok_or_else(|| {
            TrackStateError::Precondition("get requires an open load channel".into())
        })?;
        let mut archive = archive.borrow_mut();
        match archive.read_entry(&video_entry_name(video_id))? {
            Some(bytes) => Ok(Some(arrow_impl::decode_ipc(&bytes)?)),
            None => {
                self.sink.record(Diagnostic::VideoNotInArchive {
                    video_id,
                    path: archive.path().to_path_buf(),
                });
                Ok(None)
            }
        }
    }

    /// Stores `records` as the entry of `video_id`, at most once. The first
    /// write to a save channel without a summary writes one from the columns
    /// of `records`.
    pub fn put(&self, video_id: VideoId, records: &Detections) -> Result<PutOutcome> {
        let archive = self.save.as_ref().ok_or_else(|| {
            TrackStateError::Precondition("put requires an open save channel".into())
        })?;
        let mut archive = archive.borrow_mut();
        let name = video_entry_name(video_id);

        if archive.contains(&name) {
            self.sink.record(Diagnostic::DuplicateEntrySkipped {
                video_id,
                path: archive.path().to_path_buf(),
            });
            return Ok(PutOutcome::AlreadyPresent);
        }

        if !archive.contains(SUMMARY_ENTRY) {
            let batch = arrow_impl::detections_to_batch(records)?;
            let summary = Summary {
                columns: column_names(records.columns()),
                schema: Some(batch.schema().as_ref().clone()),
            };
            let summary_bytes = serde_json::to_vec_pretty(&summary)?;
            // Summaries stay human-readable.
            archive.write_entry(SUMMARY_ENTRY, &summary_bytes, EntryCodec::Stored)?;
        }

        let payload = arrow_impl::encode_ipc(records)?;
        archive.write_entry(&name, &payload, self.codec)?;
        Ok(PutOutcome::Written)
    }

    /// Videos stored on the save channel, in write order.
    pub fn saved_videos(&self) -> Vec<VideoId> {
        self.save.as_ref().map_or_else(Vec::new, |a| {
            a.borrow().names().filter_map(parse_video_entry_name).collect()
        })
    }

    /// Releases both channels. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.load = None;
        self.save = None;
    }
}

fn open_load_channel(path: &Path) -> Result<SharedArchive> {
    Ok(Rc::new(RefCell::new(open_load_file(path)?)))
}

/// A missing or unreadable load archive is a configuration error.
fn open_load_file(path: &Path) -> Result<ArchiveFile> {
    ArchiveFile::open_read(path).map_err(|e| match e {
        TrackStateError::Io(io) => TrackStateError::Config(format!(
            "cannot open load archive {}: {}",
            path.display(),
            io
        )),
        other => other,
    })
}

/// Paths are the same file when they are equal, or when both exist and
/// canonicalize to the same location.
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Opens `path` read-only just long enough to read its column set.
pub fn read_archive_columns(path: &Path, sink: &dyn DiagnosticsSink) -> Result<ColumnSet> {
    let mut archive = open_load_file(path)?;
    read_columns(&mut archive, sink)
}

/// The column set described by `summary.json`. When the archive has no
/// summary, or one that does not parse or names unknown columns, the columns
/// are taken from the first video entry instead. An archive with no video
/// entries yields an empty set.
fn read_columns(archive: &mut ArchiveFile, sink: &dyn DiagnosticsSink) -> Result<ColumnSet> {
    if let Some(bytes) = archive.read_entry(SUMMARY_ENTRY)? {
        match parse_summary(&bytes) {
            Ok(columns) => return Ok(columns),
            Err(reason) => sink.record(Diagnostic::SummaryUnreadable {
                path: archive.path().to_path_buf(),
                reason,
            }),
        }
    }

    let first = match archive
        .names()
        .find(|name| parse_video_entry_name(name).is_some())
    {
        Some(name) => name.to_string(),
        None => return Ok(ColumnSet::new()),
    };
    sink.record(Diagnostic::SummaryInferredFromEntry {
        path: archive.path().to_path_buf(),
        entry: first.clone(),
    });
    let bytes = archive.read_entry(&first)?.ok_or_else(|| {
        TrackStateError::ArchiveFormat(format!("listed entry '{}' cannot be read", first))
    })?;
    Ok(arrow_impl::decode_ipc(&bytes)?.columns().clone())
}

fn parse_summary(bytes: &[u8]) -> std::result::Result<ColumnSet, String> {
    let summary: Summary = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    parse_columns(&summary.columns).map_err(|e| e.to_string())
}
