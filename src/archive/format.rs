// In: src/archive/format.rs

//! Defines all on-disk structures and constants for the checkpoint archive.
//!
//! Layout of an archive file:
//!
//! ```text
//! +-------+---------+------------------+----------------------+-------------+
//! | magic | version | entry payloads...| directory (JSON)     | dir_len u64 |
//! | TKSA  | u16 LE  |                  | ArchiveDirectory     | LE          |
//! +-------+---------+------------------+----------------------+-------------+
//! ```
//!
//! Entries are addressed by name through the trailing directory, so any entry
//! can be read without scanning the others. Appending an entry overwrites the
//! old directory with the new payload and writes a fresh directory after it.

use arrow_schema::Schema;
use serde::{Deserialize, Serialize};

use crate::config::CompressionProfile;
use crate::error::TrackStateError;
use crate::types::VideoId;

//==================================================================================
// I. File-Level Constants
//==================================================================================

/// The magic number to identify the start of an archive file.
pub const ARCHIVE_MAGIC: &[u8; 4] = b"TKSA";
/// The current version of the archive file format.
pub const ARCHIVE_FORMAT_VERSION: u16 = 1;
/// magic(4) + version(2)
pub const HEADER_LEN: u64 = 6;
/// Size of the trailing directory length field.
pub const TRAILER_LEN: u64 = 8;
/// A reasonable limit to reject malformed directory lengths. (64MB)
pub const MAX_DIRECTORY_LEN: u64 = 64 * 1024 * 1024;

/// Name of the schema summary entry.
pub const SUMMARY_ENTRY: &str = "summary.json";
/// Extension of per-video entries.
const VIDEO_ENTRY_SUFFIX: &str = ".arrow";

/// The entry name holding the records of `video_id`.
pub fn video_entry_name(video_id: VideoId) -> String {
    format!("{}{}", video_id, VIDEO_ENTRY_SUFFIX)
}

/// The video id of a per-video entry name, `None` for any other entry.
pub fn parse_video_entry_name(name: &str) -> Option<VideoId> {
    name.strip_suffix(VIDEO_ENTRY_SUFFIX)?.parse().ok()
}

//==================================================================================
// II. Directory
//==================================================================================

/// How an entry payload is stored.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryCodec {
    Stored,
    Zstd { level: i32 },
}

impl From<CompressionProfile> for EntryCodec {
    fn from(profile: CompressionProfile) -> Self {
        match profile.zstd_level() {
            Some(level) => EntryCodec::Zstd { level },
            None => EntryCodec::Stored,
        }
    }
}

impl EntryCodec {
    pub fn encode(self, raw: &[u8]) -> Result<Vec<u8>, TrackStateError> {
        match self {
            EntryCodec::Stored => Ok(raw.to_vec()),
            EntryCodec::Zstd { level } => crate::kernels::zstd::encode(raw, level),
        }
    }

    pub fn decode(self, stored: &[u8]) -> Result<Vec<u8>, TrackStateError> {
        match self {
            EntryCodec::Stored => Ok(stored.to_vec()),
            EntryCodec::Zstd { .. } => crate::kernels::zstd::decode(stored),
        }
    }
}

/// Location and encoding of a single entry within the file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EntryManifest {
    pub name: String,
    pub offset: u64,
    pub stored_size: u64,
    pub raw_size: u64,
    pub codec: EntryCodec,
}

/// The archive directory, written after the last entry payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDirectory {
    /// Entries in write order.
    pub entries: Vec<EntryManifest>,
    pub writer_version: String,
}

impl Default for ArchiveDirectory {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            writer_version: crate::VERSION.to_string(),
        }
    }
}

impl ArchiveDirectory {
    pub fn find(&self, name: &str) -> Option<&EntryManifest> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Checks that every entry lies inside `[HEADER_LEN, data_end)` and that
    /// names are unique.
    pub fn validate(&self, data_end: u64) -> Result<(), TrackStateError> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.name.as_str()) {
                return Err(TrackStateError::ArchiveFormat(format!(
                    "duplicate entry '{}' in directory",
                    entry.name
                )));
            }
            let end = entry.offset.checked_add(entry.stored_size);
            if entry.offset < HEADER_LEN || end.map_or(true, |end| end > data_end) {
                return Err(TrackStateError::ArchiveFormat(format!(
                    "entry '{}' ({} bytes at {}) lies outside the data section",
                    entry.name, entry.stored_size, entry.offset
                )));
            }
        }
        Ok(())
    }
}

//==================================================================================
// III. Summary Entry
//==================================================================================

/// Contents of `summary.json`: the column set shared by every entry of the
/// archive.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Summary {
    pub columns: Vec<String>,
    /// Physical Arrow schema of the entries. Older archives may omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
}
