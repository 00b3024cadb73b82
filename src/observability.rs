//! This module provides observability and diagnostics for the checkpoint store.
//!
//! Decisions a caller may need to observe (a skipped duplicate write, a video
//! missing from an archive) are emitted as structured `Diagnostic` events into
//! an injected `DiagnosticsSink`, so the core holds no global state of its own.
//! `LogSink` is the default and forwards every event to the `log` facade;
//! `init_logging` wires that facade to `env_logger` for binaries that want it.

use log::LevelFilter;
use std::cell::RefCell;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Once;

use crate::error::Result;
use crate::types::VideoId;

//==================================================================================
// I. Events
//==================================================================================

/// A structured event emitted by the checkpoint store.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// A save channel was opened on `path`.
    SavingTo { path: PathBuf },
    /// The resolved set of columns that will be read from `path`.
    LoadingColumns { path: PathBuf, columns: Vec<String> },
    /// `put` found the video already present and left the entry untouched.
    DuplicateEntrySkipped { video_id: VideoId, path: PathBuf },
    /// `get` found no entry for the video.
    VideoNotInArchive { video_id: VideoId, path: PathBuf },
    /// Ground-truth pass-through has no rows for the video.
    VideoNotInGroundTruth { video_id: VideoId },
    /// Imported annotation rows whose `image_id` has no image metadata row.
    UnmatchedImportRows { count: usize },
    /// The summary entry of `path` does not parse or names unknown columns.
    SummaryUnreadable { path: PathBuf, reason: String },
    /// The load archive had no usable summary; columns were taken from `entry`.
    SummaryInferredFromEntry { path: PathBuf, entry: String },
}

impl Diagnostic {
    /// Events that usually indicate a data problem rather than normal flow.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Diagnostic::UnmatchedImportRows { .. }
                | Diagnostic::SummaryUnreadable { .. }
                | Diagnostic::SummaryInferredFromEntry { .. }
        )
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::SavingTo { path } => {
                write!(f, "Saving tracker state to {}", path.display())
            }
            Diagnostic::LoadingColumns { path, columns } => {
                write!(f, "Loading {:?} from {}", columns, path.display())
            }
            Diagnostic::DuplicateEntrySkipped { video_id, path } => {
                write!(f, "{} already exists in {} file", video_id, path.display())
            }
            Diagnostic::VideoNotInArchive { video_id, path } => {
                write!(f, "{} not in archive {}", video_id, path.display())
            }
            Diagnostic::VideoNotInGroundTruth { video_id } => {
                write!(f, "{} has no ground-truth detections", video_id)
            }
            Diagnostic::UnmatchedImportRows { count } => {
                write!(f, "{} imported annotations reference unknown images, dropped", count)
            }
            Diagnostic::SummaryUnreadable { path, reason } => {
                write!(f, "Ignoring unreadable summary of {}: {}", path.display(), reason)
            }
            Diagnostic::SummaryInferredFromEntry { path, entry } => write!(
                f,
                "{} has no summary, columns inferred from entry '{}'",
                path.display(),
                entry
            ),
        }
    }
}

//==================================================================================
// II. Sinks
//==================================================================================

/// Receives every `Diagnostic` the checkpoint store emits.
pub trait DiagnosticsSink {
    fn record(&self, event: Diagnostic);
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn record(&self, event: Diagnostic) {
        if event.is_warning() {
            log::warn!("{}", event);
        } else {
            log::info!("{}", event);
        }
    }
}

/// Collects events in memory. Clones share the same buffer, so a caller can
/// keep one clone and hand the other to the store.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Rc<RefCell<Vec<Diagnostic>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every event recorded so far.
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl DiagnosticsSink for MemorySink {
    fn record(&self, event: Diagnostic) {
        log::debug!("{}", event);
        self.events.borrow_mut().push(event);
    }
}

//==================================================================================
// III. Logger Initialisation
//==================================================================================

static INIT_LOGGER: Once = Once::new();

/// Installs an `env_logger` backend for the `log` facade. Only the first call
/// in a process has any effect.
///
/// With `log_file` set, output is appended to that file instead of stderr.
pub fn init_logging(level: LevelFilter, log_file: Option<&Path>) -> Result<()> {
    // Open the file before entering the `Once` so the error can be returned.
    let file = match log_file {
        Some(path) => Some(OpenOptions::new().append(true).create(true).open(path)?),
        None => None,
    };

    INIT_LOGGER.call_once(|| {
        let mut builder = env_logger::Builder::new();

        builder.is_test(false);
        builder.filter_level(level);

        // Custom formatter: just print the level and message
        builder.format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "[{}] {}", record.level(), record.args())?;
            buf.flush()?;
            Ok(())
        });

        if let Some(file) = file {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }

        let _ = builder.try_init();
    });
    Ok(())
}
