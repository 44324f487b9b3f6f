//! Token scan index: which entities carry which tokens.
//!
//! Maps every graph entity (node or relationship) to its tokens (labels or
//! relationship types) and answers the inverse query, "all entities carrying
//! token T", without a full store scan.
//!
//! ```text
//!   updates ──► IncrementalWriter ──merge──►┐
//!                                           │  OrderedMap
//!   rebuild ──► BulkAppendWriter  ──merge──►┤  (token, range) -> u64 bitset
//!                                           │
//!   queries ◄── TokenScanReader   ◄──seek───┘
//!                 ├─ TokenEntityIterator      one token, asc/desc, resumable
//!                 ├─ CompositeIterator        union / intersection
//!                 ├─ TokenScanProgressor      push-style delivery
//!                 └─ AllEntriesTokenScanReader range-by-range full scan
//! ```
//!
//! `TokenScanStore` owns the lifecycle: it decides at `init` whether the
//! persisted map can be trusted and rebuilds it at `start` when it cannot.
//!
//! ## Module Organization
//!
//! - `range`: key/value schema and bit-level range encoding
//! - `map`: ordered-map collaborator traits; `memory` is the in-process map
//! - `writer`, `bulk`: incremental and rebuild write paths
//! - `reader`, `composite`, `all_entries`: read paths
//! - `store`, `monitor`, `config`: lifecycle, observation, configuration

pub mod all_entries;
pub mod bulk;
pub mod composite;
pub mod config;
pub mod error;
pub mod map;
pub mod memory;
pub mod monitor;
pub mod range;
pub mod reader;
pub mod store;
pub mod update;
pub mod writer;

use serde::{Deserialize, Serialize};

pub use all_entries::{AllEntriesTokenScanReader, EntityTokenRange};
pub use bulk::BulkAppendWriter;
pub use composite::{CompositeIterator, CompositeMode, IdStream, SortedIds};
pub use config::{DatabaseLayout, TokenScanConfig};
pub use error::{Result, TokenScanError};
pub use map::{
    AddMerger, KeyRange, MapFactory, MapHeader, MapWriter, MergeOutcome, OpenOutcome,
    OrderedMap, RangeCursor, RemoveMerger, ValueMerger,
};
pub use memory::{MemoryMap, MemoryMapFactory};
pub use monitor::{NoopMonitor, RecordingMonitor, TokenScanEvent, TokenScanMonitor, TracingMonitor};
pub use range::{ScanOrder, TokenScanKey, TokenScanValue, RANGE_SIZE};
pub use reader::{EntityClient, TokenEntityIterator, TokenScanProgressor, TokenScanReader};
pub use store::{
    DiscardingWriter, EmptyChangeStream, EmptyingTokenScanStore, FullStoreChangeStream,
    StoreState, StoreWriter, TokenScanStore, ToggledTokenScanStore, VecChangeStream,
};
pub use update::{EntityTokenUpdate, TokenDiff};
pub use writer::{IncrementalWriter, TokenScanWriter};

// ============================================================================
// Core Types
// ============================================================================

/// Node or relationship id.
pub type EntityId = u64;

/// Label or relationship type id.
pub type TokenId = u32;

/// Kind of entity a store indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Indexed by labels.
    Node,
    /// Indexed by relationship types.
    Relationship,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityType::Node => write!(f, "Label scan store"),
            EntityType::Relationship => write!(f, "Relationship type scan store"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ids<I: Iterator<Item = Result<EntityId>>>(iter: I) -> Vec<EntityId> {
        iter.map(|id| id.unwrap()).collect()
    }

    fn started_store(updates: Vec<EntityTokenUpdate>) -> TokenScanStore<MemoryMapFactory> {
        let config = TokenScanConfig::default();
        let layout = DatabaseLayout::new("/graph", &config);
        let mut store = TokenScanStore::label_scan_store(
            Arc::new(MemoryMapFactory::new()),
            &layout,
            &config,
            VecChangeStream::new(updates),
            Arc::new(NoopMonitor),
        );
        store.init().unwrap();
        store.start().unwrap();
        store
    }

    #[test]
    fn entity_with_three_tokens() {
        let store = started_store(Vec::new());
        let mut writer = store.new_writer().unwrap();
        writer.write(&EntityTokenUpdate::added(5, vec![1, 2, 3])).unwrap();
        writer.close().unwrap();

        let reader = store.reader().unwrap();
        assert_eq!(ids(reader.entities_with_token(2, ScanOrder::Ascending).unwrap()), vec![5]);
        assert_eq!(
            ids(reader.entities_with_any_of_tokens(&[2, 4], ScanOrder::Ascending).unwrap()),
            vec![5]
        );
        assert!(ids(reader.entities_with_all_tokens(&[2, 4], ScanOrder::Ascending).unwrap())
            .is_empty());
    }

    #[test]
    fn entities_spanning_two_ranges() {
        let store = started_store(Vec::new());
        let mut writer = store.new_writer().unwrap();
        for entity in [5, 7, 69] {
            writer.write(&EntityTokenUpdate::added(entity, vec![1])).unwrap();
        }
        writer.close().unwrap();

        let reader = store.reader().unwrap();
        assert_eq!(
            ids(reader.entities_with_token(1, ScanOrder::Ascending).unwrap()),
            vec![5, 7, 69]
        );
        assert_eq!(
            ids(reader.entities_with_token(1, ScanOrder::Descending).unwrap()),
            vec![69, 7, 5]
        );
    }

    #[test]
    fn removed_token_disappears_from_its_scan_only() {
        let store = started_store(Vec::new());
        let mut writer = store.new_writer().unwrap();
        writer.write(&EntityTokenUpdate::added(3, vec![1, 2])).unwrap();
        writer.close().unwrap();
        let mut writer = store.new_writer().unwrap();
        writer
            .write(&EntityTokenUpdate::token_changes(3, vec![1, 2], vec![2]))
            .unwrap();
        writer.close().unwrap();

        let reader = store.reader().unwrap();
        assert!(ids(reader.entities_with_token(1, ScanOrder::Ascending).unwrap()).is_empty());
        assert_eq!(ids(reader.entities_with_token(2, ScanOrder::Ascending).unwrap()), vec![3]);
    }

    #[test]
    fn entity_type_names_its_store() {
        assert_eq!(EntityType::Node.to_string(), "Label scan store");
        assert_eq!(
            EntityType::Relationship.to_string(),
            "Relationship type scan store"
        );
    }
}
