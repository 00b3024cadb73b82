// In: src/error.rs

//! This module defines the single, unified error type for the entire trackstate library.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackStateError {
    // =========================================================================
    // === Configuration Errors (fatal, reported before any stage runs)
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No annotation files (*.json) found in {}", .0.display())]
    NoImportFiles(PathBuf),

    // =========================================================================
    // === Caller Contract Violations
    // =========================================================================
    /// A stateful operation was invoked outside of the scope that makes it
    /// meaningful (no video selected, nothing accumulated yet).
    #[error("Precondition violated: {0}")]
    Precondition(String),

    // =========================================================================
    // === Format Errors
    // =========================================================================
    #[error("Archive format error: {0}")]
    ArchiveFormat(String),

    #[error("Record schema error: {0}")]
    Schema(String),

    #[error("Annotation import failed for {}: {reason}", .path.display())]
    Import { path: PathBuf, reason: String },

    #[error("Zstd operation failed: {0}")]
    ZstdError(String),

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the Arrow library.
    #[error("Arrow operation failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// An error originating from the underlying I/O subsystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library, typically during summary/directory serialization.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// A keypoint buffer that cannot be reshaped into (x, y, confidence) rows.
    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TrackStateError>;
