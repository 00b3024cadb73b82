//! This file is the root of the `trackstate` Rust crate.
//!
//! Its responsibilities are strictly limited to:
//! 1.  Declaring all the top-level modules of the library (`archive`, `state`, etc.)
//!     so the Rust compiler knows they exist.
//! 2.  Re-exporting the handful of types an orchestration layer needs to run a
//!     checkpointed pipeline: `TrackerState`, its configuration, the stage
//!     column contract and the record model.

//==================================================================================
// 0. Constants
//==================================================================================
/// The crate version, automatically set from Cargo.toml at compile time.
/// Written into every archive directory as `writer_version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
//==================================================================================
// 1. Module Declarations
//==================================================================================
pub mod archive;
pub mod config;
pub mod error;
pub mod import;
pub mod kernels;
pub mod observability;
pub mod schema;
pub mod state;
pub mod types;

//==================================================================================
// 2. Public API
//==================================================================================
pub use archive::{ArchiveStore, PutOutcome};
pub use config::{BboxFormat, BboxMargin, CompressionProfile, TrackStateConfig};
pub use error::{Result, TrackStateError};
pub use observability::{init_logging, Diagnostic, DiagnosticsSink, LogSink, MemorySink};
pub use schema::{ColumnContract, ColumnResolution, StageColumns};
pub use state::{Session, TrackerState, VideoScope};
pub use types::{
    Column, ColumnSet, Detection, Detections, ImageId, ImageMetadata, TrackingSet, VideoId,
    VideoMetadata,
};
