//! File-backed ordered map for the token scan index.
//!
//! A `FileMap` keeps its entries in memory and persists them as one
//! checksummed snapshot per store file (see `persistence`). The header's
//! clean flag is what the store lifecycle reads back as `MapHeader`:
//!
//! - `checkpoint` writes a full snapshot atomically (temp file + rename)
//! - `mark` rewrites only the header, so marking dirty is cheap
//! - a missing, short, truncated or checksum-failing file opens as
//!   `OpenOutcome::Unreadable`, never as an empty index

pub mod error;
pub mod persistence;


use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokenscan_index::memory::{MemoryCursor, MemoryWriter};
use tokenscan_index::{
    KeyRange, MapFactory, MapHeader, MemoryMap, OpenOutcome, OrderedMap, Result,
};

pub use error::{StorageError, StorageResult};
pub use persistence::{SnapshotHeader, FORMAT_VERSION, MAGIC_NUMBER};

struct FileState {
    path: PathBuf,
    read_only: bool,
    /// Header of the snapshot currently on disk.
    persisted: Mutex<Option<SnapshotHeader>>,
}

#[derive(Clone)]
pub struct FileMap {
    entries: MemoryMap,
    state: Arc<FileState>,
}

impl FileMap {
    fn new(
        path: &Path,
        read_only: bool,
        entries: MemoryMap,
        persisted: Option<SnapshotHeader>,
    ) -> Self {
        Self {
            entries,
            state: Arc::new(FileState {
                path: path.to_path_buf(),
                read_only,
                persisted: Mutex::new(persisted),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }

    pub fn is_read_only(&self) -> bool {
        self.state.read_only
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cursors opened and not yet closed.
    pub fn open_cursors(&self) -> usize {
        self.entries.open_cursors()
    }

    fn ensure_writable(&self) -> StorageResult<()> {
        if self.state.read_only {
            return Err(StorageError::ReadOnly {
                path: self.state.path.clone(),
            });
        }
        Ok(())
    }

    fn write_snapshot(&self, header: MapHeader) -> StorageResult<()> {
        self.ensure_writable()?;
        let mut persisted = self.state.persisted.lock();
        let written =
            persistence::write_snapshot(&self.state.path, &self.entries.entries(), header)?;
        *persisted = Some(written);
        self.entries.set_header(header);
        Ok(())
    }
}

impl std::fmt::Debug for FileMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMap")
            .field("path", &self.state.path)
            .field("read_only", &self.state.read_only)
            .field("entries", &self.entries.len())
            .field("header", &self.entries.header())
            .finish()
    }
}

impl OrderedMap for FileMap {
    type Cursor = MemoryCursor;
    type Writer = MemoryWriter;

    fn seek(&self, range: KeyRange) -> Result<MemoryCursor> {
        self.entries.seek(range)
    }

    fn writer(&self) -> Result<MemoryWriter> {
        self.ensure_writable()?;
        self.entries.writer()
    }

    fn checkpoint(&self, header: MapHeader) -> Result<()> {
        Ok(self.write_snapshot(header)?)
    }

    fn mark(&self, header: MapHeader) -> Result<()> {
        self.ensure_writable()?;
        let mut persisted = self.state.persisted.lock();
        match *persisted {
            Some(on_disk) => {
                let marked = on_disk.with_state(header);
                persistence::write_header(&self.state.path, &marked)?;
                *persisted = Some(marked);
                self.entries.set_header(header);
                Ok(())
            }
            None => {
                drop(persisted);
                Ok(self.write_snapshot(header)?)
            }
        }
    }

    fn header(&self) -> MapHeader {
        self.entries.header()
    }
}

/// Opens `FileMap`s from a directory on the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileMapFactory;

impl FileMapFactory {
    pub fn new() -> Self {
        Self
    }
}

impl MapFactory for FileMapFactory {
    type Map = FileMap;

    fn open(&self, path: &Path, read_only: bool) -> Result<OpenOutcome<FileMap>> {
        if !path.exists() {
            return Ok(OpenOutcome::Missing);
        }
        match persistence::read_snapshot(path) {
            Ok((header, entries)) => {
                let state = header.state();
                tracing::debug!(
                    path = %path.display(),
                    entries = entries.len(),
                    clean = state == MapHeader::Clean,
                    "opened token scan store file"
                );
                let entries = MemoryMap::with_entries(entries, state);
                Ok(OpenOutcome::Opened {
                    map: FileMap::new(path, read_only, entries, Some(header)),
                    header: state,
                })
            }
            Err(StorageError::Corrupt { reason, .. }) => Ok(OpenOutcome::Unreadable { reason }),
            Err(err) => Err(err.into()),
        }
    }

    fn create(&self, path: &Path) -> Result<FileMap> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let map = FileMap::new(path, false, MemoryMap::new(), None);
        map.write_snapshot(MapHeader::Dirty)?;
        Ok(map)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}
