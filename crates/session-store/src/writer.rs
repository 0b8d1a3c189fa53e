//! Session Artifact Writer

use crate::{StorageError, TagLedger};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Timestamp appended to artifact names (local time, sortable)
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Suffixes tried before a save gives up on finding a free name
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Paths of the two artifacts written by a save
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedRecording {
    /// Raw concatenated frames
    pub data_path: PathBuf,
    /// Tags table
    pub tags_path: PathBuf,
}

/// Writes recording artifacts into the data folder
#[derive(Debug, Clone)]
pub struct SessionWriter {
    data_folder: PathBuf,
}

impl SessionWriter {
    /// Create a writer, creating the data folder if it does not exist
    pub fn new(data_folder: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_folder = data_folder.into();
        if !data_folder.is_dir() {
            info!("Creating data folder {}", data_folder.display());
            fs::create_dir_all(&data_folder).map_err(|source| StorageError::CreateFolder {
                path: data_folder.clone(),
                source,
            })?;
        }
        Ok(Self { data_folder })
    }

    /// Data folder of this writer
    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    /// Write `data` and the ledger as `<name>_<timestamp>.bin` / `.tags`
    pub fn save(
        &self,
        name: &str,
        data: &[u8],
        ledger: &TagLedger,
    ) -> Result<SavedRecording, StorageError> {
        self.save_at(name, data, ledger, Local::now())
    }

    /// Same as [`SessionWriter::save`] with an explicit timestamp
    ///
    /// Existing artifacts are never replaced: when `<name>_<timestamp>` is
    /// taken, `_1`, `_2`, ... is appended to the stem.
    pub fn save_at(
        &self,
        name: &str,
        data: &[u8],
        ledger: &TagLedger,
        at: DateTime<Local>,
    ) -> Result<SavedRecording, StorageError> {
        let base = format!("{}_{}", name, at.format(TIMESTAMP_FORMAT));

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let stem = match attempt {
                0 => base.clone(),
                n => format!("{base}_{n}"),
            };
            let data_path = self.data_folder.join(format!("{stem}.bin"));
            let tags_path = self.data_folder.join(format!("{stem}.tags"));

            let Some(mut data_file) = create_new(&data_path)? else {
                continue;
            };
            let Some(mut tags_file) = create_new(&tags_path)? else {
                // Only the empty file created just above is removed
                let _ = fs::remove_file(&data_path);
                continue;
            };

            write_all(&mut data_file, &data_path, data)?;
            write_all(&mut tags_file, &tags_path, ledger.to_table().as_bytes())?;

            info!(
                "Recording saved: {} ({} bytes, {} tags)",
                data_path.display(),
                data.len(),
                ledger.len()
            );

            return Ok(SavedRecording {
                data_path,
                tags_path,
            });
        }

        let path = self.data_folder.join(format!("{base}.bin"));
        error!("No free artifact name for {}", path.display());
        Err(StorageError::Write {
            path,
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free artifact name"),
        })
    }
}

/// Open a fresh file, `None` if the path is already taken
fn create_new(path: &Path) -> Result<Option<File>, StorageError> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            debug!("{} already exists", path.display());
            Ok(None)
        }
        Err(source) => {
            error!("Error creating {}: {}", path.display(), source);
            Err(StorageError::Write {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

fn write_all(file: &mut File, path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    debug!("Writing {} bytes to {}", contents.len(), path.display());
    file.write_all(contents)
        .and_then(|()| file.flush())
        .map_err(|source| {
            error!("Error writing {}: {}", path.display(), source);
            StorageError::Write {
                path: path.to_path_buf(),
                source,
            }
        })
}
