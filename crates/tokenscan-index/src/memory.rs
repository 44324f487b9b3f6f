//! In-process ordered map.
//!
//! `MemoryMap` implements the collaborator contract over a `BTreeMap`. Cursors
//! copy their key range when opened, which gives them a consistent snapshot as
//! of open time. `MemoryMapFactory` keeps maps by path so a store can be shut
//! down and re-opened within one process.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, TokenScanError};
use crate::map::{
    KeyRange, MapFactory, MapHeader, MapWriter, MergeOutcome, OpenOutcome, OrderedMap,
    RangeCursor, ValueMerger,
};
use crate::range::{ScanOrder, TokenScanKey, TokenScanValue};

struct MemoryMapInner {
    entries: RwLock<BTreeMap<TokenScanKey, TokenScanValue>>,
    header: Mutex<MapHeader>,
    open_cursors: AtomicUsize,
    open_writers: AtomicUsize,
}

#[derive(Clone)]
pub struct MemoryMap {
    inner: Arc<MemoryMapInner>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::with_entries(std::iter::empty(), MapHeader::Dirty)
    }

    /// Build a map from existing entries. Empty values are dropped.
    pub fn with_entries(
        entries: impl IntoIterator<Item = (TokenScanKey, TokenScanValue)>,
        header: MapHeader,
    ) -> Self {
        let entries = entries
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .collect();
        Self {
            inner: Arc::new(MemoryMapInner {
                entries: RwLock::new(entries),
                header: Mutex::new(header),
                open_cursors: AtomicUsize::new(0),
                open_writers: AtomicUsize::new(0),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    pub fn get(&self, key: &TokenScanKey) -> Option<TokenScanValue> {
        self.inner.entries.read().get(key).copied()
    }

    /// Copy of every entry in key order.
    pub fn entries(&self) -> Vec<(TokenScanKey, TokenScanValue)> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect()
    }

    /// Cursors opened and not yet closed.
    pub fn open_cursors(&self) -> usize {
        self.inner.open_cursors.load(Ordering::SeqCst)
    }

    /// Writers opened and not yet closed.
    pub fn open_writers(&self) -> usize {
        self.inner.open_writers.load(Ordering::SeqCst)
    }

    pub fn set_header(&self, header: MapHeader) {
        *self.inner.header.lock() = header;
    }

    fn snapshot(&self, range: KeyRange) -> Vec<(TokenScanKey, TokenScanValue)> {
        if range.is_empty() {
            return Vec::new();
        }
        let entries = self.inner.entries.read();
        let iter = entries.range(range.low..range.high).map(|(k, v)| (*k, *v));
        match range.order {
            ScanOrder::Ascending => iter.collect(),
            ScanOrder::Descending => iter.rev().collect(),
        }
    }
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMap")
            .field("entries", &self.len())
            .field("header", &self.header())
            .field("open_cursors", &self.open_cursors())
            .finish()
    }
}

impl OrderedMap for MemoryMap {
    type Cursor = MemoryCursor;
    type Writer = MemoryWriter;

    fn seek(&self, range: KeyRange) -> Result<MemoryCursor> {
        let entries = self.snapshot(range);
        self.inner.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryCursor {
            entries: entries.into_iter(),
            inner: Some(Arc::clone(&self.inner)),
        })
    }

    fn writer(&self) -> Result<MemoryWriter> {
        self.inner.open_writers.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryWriter {
            inner: Some(Arc::clone(&self.inner)),
        })
    }

    fn checkpoint(&self, header: MapHeader) -> Result<()> {
        self.set_header(header);
        Ok(())
    }

    fn mark(&self, header: MapHeader) -> Result<()> {
        self.set_header(header);
        Ok(())
    }

    fn header(&self) -> MapHeader {
        *self.inner.header.lock()
    }
}

// ============================================================================
// Cursor
// ============================================================================

pub struct MemoryCursor {
    entries: std::vec::IntoIter<(TokenScanKey, TokenScanValue)>,
    inner: Option<Arc<MemoryMapInner>>,
}

impl RangeCursor for MemoryCursor {
    fn next(&mut self) -> Result<Option<(TokenScanKey, TokenScanValue)>> {
        if self.inner.is_none() {
            return Ok(None);
        }
        Ok(self.entries.next())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(inner) = self.inner.take() {
            inner.open_cursors.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ============================================================================
// Writer
// ============================================================================

pub struct MemoryWriter {
    inner: Option<Arc<MemoryMapInner>>,
}

impl MemoryWriter {
    fn inner(&self) -> Result<&MemoryMapInner> {
        self.inner
            .as_deref()
            .ok_or_else(|| TokenScanError::Map("writer already closed".to_string()))
    }

    fn apply_merge(
        &mut self,
        key: TokenScanKey,
        value: TokenScanValue,
        merger: &dyn ValueMerger,
        insert_if_absent: bool,
    ) -> Result<()> {
        let inner = self.inner()?;
        let mut entries = inner.entries.write();
        match entries.get_mut(&key) {
            Some(existing) => {
                if merger.merge(&key, existing, &value) == MergeOutcome::Removed {
                    entries.remove(&key);
                }
            }
            None if insert_if_absent && !value.is_empty() => {
                entries.insert(key, value);
            }
            None => {}
        }
        Ok(())
    }
}

impl MapWriter for MemoryWriter {
    fn put(&mut self, key: TokenScanKey, value: TokenScanValue) -> Result<()> {
        let inner = self.inner()?;
        let mut entries = inner.entries.write();
        if value.is_empty() {
            entries.remove(&key);
        } else {
            entries.insert(key, value);
        }
        Ok(())
    }

    fn merge(
        &mut self,
        key: TokenScanKey,
        value: TokenScanValue,
        merger: &dyn ValueMerger,
    ) -> Result<()> {
        self.apply_merge(key, value, merger, true)
    }

    fn merge_if_exists(
        &mut self,
        key: TokenScanKey,
        value: TokenScanValue,
        merger: &dyn ValueMerger,
    ) -> Result<()> {
        self.apply_merge(key, value, merger, false)
    }

    fn remove(&mut self, key: TokenScanKey) -> Result<Option<TokenScanValue>> {
        let inner = self.inner()?;
        Ok(inner.entries.write().remove(&key))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(inner) = self.inner.take() {
            inner.open_writers.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// ============================================================================
// Factory
// ============================================================================

enum MemoryFile {
    Map(MemoryMap),
    Garbage,
}

/// Path-addressed registry of `MemoryMap`s standing in for a directory.
#[derive(Default)]
pub struct MemoryMapFactory {
    files: Mutex<HashMap<PathBuf, MemoryFile>>,
}

impl MemoryMapFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The map currently stored at `path`, if it is readable.
    pub fn map_at(&self, path: &Path) -> Option<MemoryMap> {
        match self.files.lock().get(path) {
            Some(MemoryFile::Map(map)) => Some(map.clone()),
            _ => None,
        }
    }

    /// Replace whatever is at `path` with unreadable bytes.
    pub fn scramble(&self, path: &Path) {
        self.files
            .lock()
            .insert(path.to_path_buf(), MemoryFile::Garbage);
    }
}

impl MapFactory for MemoryMapFactory {
    type Map = MemoryMap;

    fn open(&self, path: &Path, _read_only: bool) -> Result<OpenOutcome<MemoryMap>> {
        Ok(match self.files.lock().get(path) {
            None => OpenOutcome::Missing,
            Some(MemoryFile::Garbage) => OpenOutcome::Unreadable {
                reason: "unrecognized header".to_string(),
            },
            Some(MemoryFile::Map(map)) => OpenOutcome::Opened {
                map: map.clone(),
                header: map.header(),
            },
        })
    }

    fn create(&self, path: &Path) -> Result<MemoryMap> {
        let map = MemoryMap::new();
        self.files
            .lock()
            .insert(path.to_path_buf(), MemoryFile::Map(map.clone()));
        Ok(map)
    }

    fn delete(&self, path: &Path) -> Result<()> {
        self.files.lock().remove(path);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().contains_key(path)
    }
}
