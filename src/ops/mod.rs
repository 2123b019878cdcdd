//! File operation executors.
//!
//! Each executor is a pure transform from an input path (plus an optional
//! parameter) to an output path or a typed failure. Executors only ever
//! write inside the flow's temporary directory handed to them.

pub mod archive;
pub mod extract;
pub mod transcode;

use thiserror::Error;

/// Typed executor failures surfaced to the user
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Extraction failed because the password is wrong or the archive is
    /// not readable as a zip
    #[error("wrong password or corrupted zip")]
    WrongPasswordOrCorrupt,
    /// The archive decompressed to nothing
    #[error("no files found inside zip")]
    EmptyArchive,
    /// ffmpeg refused the input or died mid-transcode
    #[error("video compression failed: {0}")]
    Transcode(String),
    /// Plain filesystem failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
