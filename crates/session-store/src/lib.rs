//! Session Storage
//!
//! Holds the tag ledger of a recording session and writes the two artifacts
//! produced on save: the raw frame dump and the tags table.

mod ledger;
mod writer;

pub use ledger::{TagEntry, TagLedger, TAGS_HEADER};
pub use writer::{SavedRecording, SessionWriter, TIMESTAMP_FORMAT};

use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create data folder {path}: {source}")]
    CreateFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
