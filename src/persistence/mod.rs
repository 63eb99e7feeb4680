//! JSON position store.
//!
//! One record per instrument, keyed by instrument id, written as pretty JSON
//! with sorted keys so the file diffs cleanly. Writes go to a sibling temp
//! file which is fsynced and renamed over the store, so an interrupted write
//! never leaves a half-written store behind.

use crate::error::PersistenceError;
use crate::risk::Position;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    positions: BTreeMap<String, Position>,
}

/// File-backed store for the tracker's positions.
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all persisted positions.
    ///
    /// A missing file is an empty store. An unreadable or corrupt file is an
    /// error: treating it as empty would silently drop open positions.
    pub fn load(&self) -> Result<BTreeMap<String, Position>, PersistenceError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No position store yet, starting empty");
                return Ok(BTreeMap::new());
            }
            Err(source) => return Err(self.io_error(source)),
        };

        let stored: StoreFile = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            PersistenceError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        debug!(
            path = %self.path.display(),
            version = stored.version,
            positions = stored.positions.len(),
            "Loaded position store"
        );
        Ok(stored.positions)
    }

    /// Replace the store contents with `positions`, durably.
    pub fn save(&self, positions: &BTreeMap<String, Position>) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let tmp = self.temp_path();
        let file = File::create(&tmp).map_err(|e| self.io_error(e))?;
        let mut writer = BufWriter::new(file);

        let body = StoreFile {
            version: STORE_VERSION,
            positions: positions.clone(),
        };
        serde_json::to_writer_pretty(&mut writer, &body).map_err(|e| self.io_error(e.into()))?;
        writer.write_all(b"\n").map_err(|e| self.io_error(e))?;

        let file = writer
            .into_inner()
            .map_err(|e| self.io_error(e.into_error()))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), positions = positions.len(), "Saved position store");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
