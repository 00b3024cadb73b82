// In: src/archive/mod.rs

// ====================================================================================
// ARCHITECTURAL OVERVIEW: The Archive Layer
// ====================================================================================
//
// The archive layer persists one record set per video inside a single container
// file, plus one `summary.json` entry describing the columns those record sets
// carry.
//
// Data Flow (save):
//
//   1. [ArchiveStore::put]        -> Receives (video_id, &Detections)
//         |
//         `-> a. Skips (and reports) videos already present on the save channel
//         `-> b. Writes `summary.json` if the channel has none yet
//         |
//   2. [arrow_impl::encode_ipc]   -> Detections -> RecordBatch -> Arrow IPC bytes
//         |
//   3. [ArchiveFile::write_entry] -> codec (stored / zstd), payload, directory
//
// Data Flow (load):
//
//   1. [ArchiveStore::get]        -> Receives video_id
//   2. [ArchiveFile::read_entry]  -> directory lookup, payload, codec
//   3. [arrow_impl::decode_ipc]   -> Arrow IPC bytes -> Detections
//
// ====================================================================================
pub mod arrow_impl;
pub mod container;
pub mod format;
pub mod store;

pub use container::{ArchiveBackend, ArchiveFile};
pub use format::{EntryCodec, Summary, SUMMARY_ENTRY};
pub use store::{read_archive_columns, ArchiveStore, PutOutcome};
