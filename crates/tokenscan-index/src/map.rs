//! Ordered-map collaborator contract.
//!
//! The index never touches storage directly: it talks to a persistent, sorted,
//! duplicate-free map from `TokenScanKey` to `TokenScanValue` through the traits
//! in this module. `MemoryMap` (see `memory`) is the in-process implementation;
//! file-backed implementations live outside this crate.

use std::path::Path;

use crate::error::Result;
use crate::range::{ScanOrder, TokenScanKey, TokenScanValue};

// ============================================================================
// Seek ranges
// ============================================================================

/// Half-open key range `[low, high)` plus a visiting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub low: TokenScanKey,
    pub high: TokenScanKey,
    pub order: ScanOrder,
}

impl KeyRange {
    pub fn new(low: TokenScanKey, high: TokenScanKey, order: ScanOrder) -> Self {
        Self { low, high, order }
    }

    /// Every key in the map.
    pub fn all(order: ScanOrder) -> Self {
        Self::new(TokenScanKey::MIN, TokenScanKey::MAX, order)
    }

    /// All ranges of one token.
    pub fn token(token_id: u32, order: ScanOrder) -> Self {
        Self::new(
            TokenScanKey::new(token_id, 0),
            TokenScanKey::new(token_id, u64::MAX),
            order,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.low >= self.high
    }

    pub fn contains(&self, key: &TokenScanKey) -> bool {
        &self.low <= key && key < &self.high
    }
}

// ============================================================================
// Merge functions
// ============================================================================

/// What a merge did to the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Stored value changed and is still non-empty.
    Merged,
    /// Stored value is unchanged.
    Unchanged,
    /// Stored value became empty; the entry must be removed.
    Removed,
}

/// Read-modify-write function applied by `MapWriter::merge*`.
pub trait ValueMerger: Send + Sync {
    fn merge(
        &self,
        key: &TokenScanKey,
        existing: &mut TokenScanValue,
        incoming: &TokenScanValue,
    ) -> MergeOutcome;
}

/// Bitwise OR: adds entities to a range.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddMerger;

impl ValueMerger for AddMerger {
    fn merge(
        &self,
        _key: &TokenScanKey,
        existing: &mut TokenScanValue,
        incoming: &TokenScanValue,
    ) -> MergeOutcome {
        let before = *existing;
        existing.merge_add(incoming);
        if *existing == before {
            MergeOutcome::Unchanged
        } else {
            MergeOutcome::Merged
        }
    }
}

/// Bitwise AND-NOT: removes entities from a range, dropping empty entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveMerger;

impl ValueMerger for RemoveMerger {
    fn merge(
        &self,
        _key: &TokenScanKey,
        existing: &mut TokenScanValue,
        incoming: &TokenScanValue,
    ) -> MergeOutcome {
        let before = *existing;
        if existing.merge_remove(incoming) == 0 {
            MergeOutcome::Removed
        } else if *existing == before {
            MergeOutcome::Unchanged
        } else {
            MergeOutcome::Merged
        }
    }
}

// ============================================================================
// Cursor / writer / map
// ============================================================================

/// Forward-only cursor over one `KeyRange`.
///
/// `close` must be idempotent. Implementations also release on drop, but
/// only an explicit `close` can report a failure.
pub trait RangeCursor: Send {
    fn next(&mut self) -> Result<Option<(TokenScanKey, TokenScanValue)>>;

    fn close(&mut self) -> Result<()>;
}

/// Transactional writer handle. Changes become visible to cursors opened
/// after each call returns.
pub trait MapWriter: Send {
    fn put(&mut self, key: TokenScanKey, value: TokenScanValue) -> Result<()>;

    /// Merge into an existing entry, inserting `value` if the key is absent.
    fn merge(
        &mut self,
        key: TokenScanKey,
        value: TokenScanValue,
        merger: &dyn ValueMerger,
    ) -> Result<()>;

    /// Merge into an existing entry; no-op if the key is absent.
    fn merge_if_exists(
        &mut self,
        key: TokenScanKey,
        value: TokenScanValue,
        merger: &dyn ValueMerger,
    ) -> Result<()>;

    fn remove(&mut self, key: TokenScanKey) -> Result<Option<TokenScanValue>>;

    fn close(&mut self) -> Result<()>;
}

/// Persisted shutdown marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MapHeader {
    /// Contents are complete and were flushed by an orderly shutdown.
    Clean,
    /// Contents may be partial: a write session or rebuild was in flight.
    Dirty,
}

pub trait OrderedMap: Send + Sync {
    type Cursor: RangeCursor;
    type Writer: MapWriter;

    fn seek(&self, range: KeyRange) -> Result<Self::Cursor>;

    fn writer(&self) -> Result<Self::Writer>;

    /// Flush contents and persist `header`.
    fn checkpoint(&self, header: MapHeader) -> Result<()>;

    /// Persist `header` without flushing contents.
    fn mark(&self, header: MapHeader) -> Result<()>;

    fn header(&self) -> MapHeader;
}

/// Result of opening an existing backing file.
pub enum OpenOutcome<M> {
    Missing,
    /// The file exists but its header or body cannot be trusted.
    Unreadable { reason: String },
    Opened { map: M, header: MapHeader },
}

impl<M> std::fmt::Debug for OpenOutcome<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenOutcome::Missing => write!(f, "Missing"),
            OpenOutcome::Unreadable { reason } => write!(f, "Unreadable({reason})"),
            OpenOutcome::Opened { header, .. } => write!(f, "Opened({header:?})"),
        }
    }
}

/// Creates, opens and deletes ordered maps by path.
pub trait MapFactory: Send + Sync {
    type Map: OrderedMap;

    fn open(&self, path: &Path, read_only: bool) -> Result<OpenOutcome<Self::Map>>;

    /// Create an empty map, replacing whatever is at `path`. The new map's
    /// header is `Dirty` until the first clean checkpoint.
    fn create(&self, path: &Path) -> Result<Self::Map>;

    fn delete(&self, path: &Path) -> Result<()>;

    fn exists(&self, path: &Path) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_merger_reports_removal_when_emptied() {
        let key = TokenScanKey::new(1, 0);
        let mut existing = TokenScanValue::from_bits(0b110);
        assert_eq!(
            RemoveMerger.merge(&key, &mut existing, &TokenScanValue::from_bits(0b010)),
            MergeOutcome::Merged
        );
        assert_eq!(
            RemoveMerger.merge(&key, &mut existing, &TokenScanValue::from_bits(0b001)),
            MergeOutcome::Unchanged
        );
        assert_eq!(
            RemoveMerger.merge(&key, &mut existing, &TokenScanValue::from_bits(0b100)),
            MergeOutcome::Removed
        );
    }

    #[test]
    fn add_merger_is_idempotent() {
        let key = TokenScanKey::new(1, 0);
        let mut existing = TokenScanValue::from_bits(0b1);
        assert_eq!(
            AddMerger.merge(&key, &mut existing, &TokenScanValue::from_bits(0b1)),
            MergeOutcome::Unchanged
        );
        assert_eq!(
            AddMerger.merge(&key, &mut existing, &TokenScanValue::from_bits(0b10)),
            MergeOutcome::Merged
        );
    }

    #[test]
    fn token_range_covers_only_that_token() {
        let range = KeyRange::token(3, ScanOrder::Ascending);
        assert!(range.contains(&TokenScanKey::new(3, 0)));
        assert!(range.contains(&TokenScanKey::new(3, 1 << 40)));
        assert!(!range.contains(&TokenScanKey::new(2, u64::MAX)));
        assert!(!range.contains(&TokenScanKey::new(4, 0)));
    }
}
