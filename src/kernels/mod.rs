//! Byte-level codecs applied to archive entry payloads.

pub mod zstd;
