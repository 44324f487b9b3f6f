//! Store lifecycle: open, classify, rebuild, serve, shut down.
//!
//! ```text
//!   Uninitialized ──init──► NotIndexed ─┐
//!                     ├───► CorruptIndex ┼─start──► Rebuilding ──► ValidIndex
//!                     └───► ValidIndex ──┘                              │
//!                                                          shutdown ──► Closed
//! ```
//!
//! Read-only stores never rebuild: a missing or unclean index fails `init`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::bulk::BulkAppendWriter;
use crate::config::{DatabaseLayout, TokenScanConfig};
use crate::error::{Result, TokenScanError};
use crate::map::{KeyRange, MapFactory, MapHeader, OpenOutcome, OrderedMap, RangeCursor};
use crate::monitor::{TokenScanEvent, TokenScanMonitor};
use crate::range::ScanOrder;
use crate::reader::TokenScanReader;
use crate::update::EntityTokenUpdate;
use crate::writer::{IncrementalWriter, TokenScanWriter};
use crate::EntityType;

type WriterOf<F> = <<F as MapFactory>::Map as OrderedMap>::Writer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    NotIndexed,
    ValidIndex,
    CorruptIndex,
    Rebuilding,
    Closed,
}

impl StoreState {
    pub fn name(self) -> &'static str {
        match self {
            StoreState::Uninitialized => "uninitialized",
            StoreState::NotIndexed => "not indexed",
            StoreState::ValidIndex => "valid",
            StoreState::CorruptIndex => "corrupt",
            StoreState::Rebuilding => "rebuilding",
            StoreState::Closed => "closed",
        }
    }

    /// States in which the backing map is open.
    fn has_map(self) -> bool {
        matches!(
            self,
            StoreState::NotIndexed | StoreState::ValidIndex | StoreState::CorruptIndex
        )
    }
}

// ============================================================================
// Full store change stream
// ============================================================================

/// Authoritative source of every entity's current tokens, used to rebuild.
///
/// Implementations write one update per entity with empty `tokens_before`,
/// preferably in entity id order.
pub trait FullStoreChangeStream: Send + Sync {
    fn apply_to(&self, writer: &mut dyn TokenScanWriter) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyChangeStream;

impl FullStoreChangeStream for EmptyChangeStream {
    fn apply_to(&self, _writer: &mut dyn TokenScanWriter) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct VecChangeStream {
    updates: Vec<EntityTokenUpdate>,
}

impl VecChangeStream {
    pub fn new(updates: Vec<EntityTokenUpdate>) -> Self {
        Self { updates }
    }
}

impl From<Vec<EntityTokenUpdate>> for VecChangeStream {
    fn from(updates: Vec<EntityTokenUpdate>) -> Self {
        Self::new(updates)
    }
}

impl FullStoreChangeStream for VecChangeStream {
    fn apply_to(&self, writer: &mut dyn TokenScanWriter) -> Result<()> {
        for update in &self.updates {
            writer.write(update)?;
        }
        Ok(())
    }
}

// ============================================================================
// Native store
// ============================================================================

pub struct TokenScanStore<F: MapFactory> {
    kind: EntityType,
    factory: Arc<F>,
    path: PathBuf,
    read_only: bool,
    writer_max_pending_ranges: usize,
    change_stream: Box<dyn FullStoreChangeStream>,
    monitor: Arc<dyn TokenScanMonitor>,
    map: Option<F::Map>,
    state: StoreState,
    recovery_pending: bool,
}

impl<F: MapFactory> TokenScanStore<F> {
    pub fn new(
        kind: EntityType,
        factory: Arc<F>,
        path: impl Into<PathBuf>,
        config: &TokenScanConfig,
        change_stream: impl FullStoreChangeStream + 'static,
        monitor: Arc<dyn TokenScanMonitor>,
    ) -> Self {
        Self {
            kind,
            factory,
            path: path.into(),
            read_only: config.read_only,
            writer_max_pending_ranges: config.writer_max_pending_ranges,
            change_stream: Box::new(change_stream),
            monitor,
            map: None,
            state: StoreState::Uninitialized,
            recovery_pending: false,
        }
    }

    pub fn label_scan_store(
        factory: Arc<F>,
        layout: &DatabaseLayout,
        config: &TokenScanConfig,
        change_stream: impl FullStoreChangeStream + 'static,
        monitor: Arc<dyn TokenScanMonitor>,
    ) -> Self {
        Self::new(
            EntityType::Node,
            factory,
            layout.label_scan_store(),
            config,
            change_stream,
            monitor,
        )
    }

    pub fn relationship_type_scan_store(
        factory: Arc<F>,
        layout: &DatabaseLayout,
        config: &TokenScanConfig,
        change_stream: impl FullStoreChangeStream + 'static,
        monitor: Arc<dyn TokenScanMonitor>,
    ) -> Self {
        Self::new(
            EntityType::Relationship,
            factory,
            layout.relationship_type_scan_store(),
            config,
            change_stream,
            monitor,
        )
    }

    pub fn entity_type(&self) -> EntityType {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn emit(&self, event: TokenScanEvent) {
        self.monitor.on_event(self.kind, &event);
    }

    fn lifecycle_error(&self, operation: &'static str) -> TokenScanError {
        TokenScanError::Lifecycle {
            kind: self.kind,
            state: self.state.name(),
            operation,
        }
    }

    fn open_map(&self, operation: &'static str) -> Result<&F::Map> {
        match &self.map {
            Some(map) if self.state.has_map() => Ok(map),
            _ => Err(self.lifecycle_error(operation)),
        }
    }

    /// Open or create the backing map and decide whether it can be trusted.
    pub fn init(&mut self) -> Result<()> {
        if self.state != StoreState::Uninitialized {
            return Err(self.lifecycle_error("init"));
        }
        match self.factory.open(&self.path, self.read_only)? {
            OpenOutcome::Missing => {
                self.emit(TokenScanEvent::NoIndex);
                if self.read_only {
                    return Err(TokenScanError::IndexMissing {
                        kind: self.kind,
                        path: self.path.clone(),
                    });
                }
                self.map = Some(self.factory.create(&self.path)?);
                self.state = StoreState::NotIndexed;
            }
            OpenOutcome::Unreadable { reason } => {
                tracing::warn!(
                    kind = %self.kind,
                    path = %self.path.display(),
                    %reason,
                    "token scan store file is unreadable"
                );
                self.emit(TokenScanEvent::NotValidIndex);
                if self.read_only {
                    return Err(TokenScanError::IndexNotClean {
                        kind: self.kind,
                        path: self.path.clone(),
                    });
                }
                self.map = Some(self.factory.create(&self.path)?);
                self.state = StoreState::CorruptIndex;
            }
            OpenOutcome::Opened {
                map,
                header: MapHeader::Clean,
            } => {
                self.map = Some(map);
                self.state = StoreState::ValidIndex;
            }
            OpenOutcome::Opened {
                map,
                header: MapHeader::Dirty,
            } => {
                tracing::warn!(
                    kind = %self.kind,
                    path = %self.path.display(),
                    "token scan store was not shut down cleanly"
                );
                self.emit(TokenScanEvent::NotValidIndex);
                if self.read_only {
                    return Err(TokenScanError::IndexNotClean {
                        kind: self.kind,
                        path: self.path.clone(),
                    });
                }
                self.emit(TokenScanEvent::RecoveryRegistered);
                self.recovery_pending = true;
                self.map = Some(map);
                self.state = StoreState::CorruptIndex;
            }
        }
        self.emit(TokenScanEvent::Init);
        Ok(())
    }

    /// Rebuild if `init` found the index missing or untrustworthy.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            StoreState::ValidIndex => Ok(()),
            StoreState::NotIndexed | StoreState::CorruptIndex if !self.read_only => self.rebuild(),
            _ => Err(self.lifecycle_error("start")),
        }
    }

    fn rebuild(&mut self) -> Result<()> {
        let recovery = std::mem::take(&mut self.recovery_pending);
        self.emit(TokenScanEvent::Rebuilding);
        if recovery {
            self.emit(TokenScanEvent::RecoveryStarted);
        }
        tracing::info!(kind = %self.kind, path = %self.path.display(), "rebuilding token scan store");
        let started = Instant::now();
        self.state = StoreState::Rebuilding;

        match self.populate() {
            Ok(entities) => {
                self.state = StoreState::ValidIndex;
                self.emit(TokenScanEvent::Rebuilt {
                    approximate_entity_count: entities,
                });
                if recovery {
                    self.emit(TokenScanEvent::RecoveryFinished);
                }
                tracing::info!(
                    kind = %self.kind,
                    entities,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "token scan store rebuilt"
                );
                Ok(())
            }
            Err(err) => {
                self.state = StoreState::CorruptIndex;
                if recovery {
                    self.emit(TokenScanEvent::RecoveryFailed {
                        message: err.to_string(),
                    });
                }
                Err(TokenScanError::RebuildFailed {
                    kind: self.kind,
                    path: self.path.clone(),
                    source: Box::new(err),
                })
            }
        }
    }

    fn populate(&mut self) -> Result<u64> {
        self.map = None;
        let map: &F::Map = self.map.insert(self.factory.create(&self.path)?);
        let mut writer = BulkAppendWriter::new(map.writer()?);
        let applied = self.change_stream.apply_to(&mut writer);
        let closed = writer.close();
        applied?;
        closed?;
        map.checkpoint(MapHeader::Clean)?;
        Ok(writer.entities_written())
    }

    /// Persist the clean marker (if valid) and release the backing map.
    /// Safe to call after a failed `init`.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.state == StoreState::Closed {
            return Ok(());
        }
        let valid = self.state == StoreState::ValidIndex;
        self.state = StoreState::Closed;
        if let Some(map) = self.map.take() {
            if valid && !self.read_only {
                map.checkpoint(MapHeader::Clean)?;
            }
        }
        Ok(())
    }

    /// Checkpoint the backing map. No-op when read-only.
    pub fn force(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let map = self.open_map("force")?;
        let header = if self.state == StoreState::ValidIndex {
            MapHeader::Clean
        } else {
            MapHeader::Dirty
        };
        map.checkpoint(header)
    }

    /// Open a write session. The first writer against a clean map marks it
    /// dirty so a crash mid-session forces a rebuild.
    pub fn new_writer(&self) -> Result<IncrementalWriter<WriterOf<F>>> {
        let writer = self.open_session("new_writer")?;
        Ok(IncrementalWriter::new(writer, self.writer_max_pending_ranges))
    }

    /// Open a bulk-append session for populating entities the store has
    /// never seen. Dirty marking matches `new_writer`.
    pub fn new_bulk_append_writer(&self) -> Result<BulkAppendWriter<WriterOf<F>>> {
        let writer = self.open_session("new_bulk_append_writer")?;
        Ok(BulkAppendWriter::new(writer))
    }

    fn open_session(&self, operation: &'static str) -> Result<WriterOf<F>> {
        if self.read_only {
            return Err(TokenScanError::ReadOnly {
                kind: self.kind,
                operation,
            });
        }
        let map = self.open_map(operation)?;
        if map.header() == MapHeader::Clean {
            map.mark(MapHeader::Dirty)?;
        }
        map.writer()
    }

    pub fn reader(&self) -> Result<TokenScanReader<'_, F::Map>> {
        match &self.map {
            Some(map) if self.state == StoreState::ValidIndex => Ok(TokenScanReader::new(map)),
            _ => Err(self.lifecycle_error("reader")),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        let map = self.open_map("is_empty")?;
        let mut cursor = map.seek(KeyRange::all(ScanOrder::Ascending))?;
        let first = cursor.next();
        cursor.close()?;
        Ok(first?.is_none())
    }

    /// Backing files to include in a backup. Lists the layout path in every
    /// state, whether or not the file exists yet.
    pub fn snapshot_store_files(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    /// Release the map and delete its file. The store is closed afterwards.
    pub fn drop_store(&mut self) -> Result<()> {
        if self.read_only {
            return Err(TokenScanError::ReadOnly {
                kind: self.kind,
                operation: "drop_store",
            });
        }
        self.map = None;
        self.state = StoreState::Closed;
        self.factory.delete(&self.path)
    }
}

// ============================================================================
// Disabled relationship type store
// ============================================================================

/// Stand-in for a disabled store: serves nothing, discards writes and
/// removes any leftover backing file.
pub struct EmptyingTokenScanStore<F: MapFactory> {
    kind: EntityType,
    factory: Arc<F>,
    path: PathBuf,
    read_only: bool,
    state: StoreState,
}

impl<F: MapFactory> EmptyingTokenScanStore<F> {
    pub fn new(
        kind: EntityType,
        factory: Arc<F>,
        path: impl Into<PathBuf>,
        config: &TokenScanConfig,
    ) -> Self {
        Self {
            kind,
            factory,
            path: path.into(),
            read_only: config.read_only,
            state: StoreState::Uninitialized,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.kind
    }

    pub fn state(&self) -> StoreState {
        self.state
    }

    pub fn init(&mut self) -> Result<()> {
        if self.factory.exists(&self.path) {
            if self.read_only {
                return Err(TokenScanError::IncompatibleToggle {
                    kind: self.kind,
                    path: self.path.clone(),
                });
            }
            tracing::info!(
                kind = %self.kind,
                path = %self.path.display(),
                "deleting store file of disabled token scan store"
            );
            self.factory.delete(&self.path)?;
        }
        self.state = StoreState::ValidIndex;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.state = StoreState::Closed;
        Ok(())
    }

    pub fn force(&self) -> Result<()> {
        Ok(())
    }

    pub fn reader(&self) -> Result<TokenScanReader<'_, F::Map>> {
        Ok(TokenScanReader::empty())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(true)
    }

    pub fn snapshot_store_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    pub fn drop_store(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardingWriter;

impl TokenScanWriter for DiscardingWriter {
    fn write(&mut self, _update: &EntityTokenUpdate) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Toggled store
// ============================================================================

pub enum StoreWriter<W: crate::map::MapWriter> {
    Incremental(IncrementalWriter<W>),
    BulkAppend(BulkAppendWriter<W>),
    Discarding(DiscardingWriter),
}

impl<W: crate::map::MapWriter> TokenScanWriter for StoreWriter<W> {
    fn write(&mut self, update: &EntityTokenUpdate) -> Result<()> {
        match self {
            StoreWriter::Incremental(writer) => writer.write(update),
            StoreWriter::BulkAppend(writer) => writer.write(update),
            StoreWriter::Discarding(writer) => writer.write(update),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            StoreWriter::Incremental(writer) => writer.close(),
            StoreWriter::BulkAppend(writer) => writer.close(),
            StoreWriter::Discarding(writer) => writer.close(),
        }
    }
}

/// Relationship type scan store selected by
/// `enable_relationship_type_scan_store`.
pub enum ToggledTokenScanStore<F: MapFactory> {
    Native(TokenScanStore<F>),
    Emptying(EmptyingTokenScanStore<F>),
}

impl<F: MapFactory> ToggledTokenScanStore<F> {
    pub fn relationship_type_scan_store(
        factory: Arc<F>,
        layout: &DatabaseLayout,
        config: &TokenScanConfig,
        change_stream: impl FullStoreChangeStream + 'static,
        monitor: Arc<dyn TokenScanMonitor>,
    ) -> Self {
        if config.enable_relationship_type_scan_store {
            ToggledTokenScanStore::Native(TokenScanStore::relationship_type_scan_store(
                factory,
                layout,
                config,
                change_stream,
                monitor,
            ))
        } else {
            ToggledTokenScanStore::Emptying(EmptyingTokenScanStore::new(
                EntityType::Relationship,
                factory,
                layout.relationship_type_scan_store(),
                config,
            ))
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, ToggledTokenScanStore::Native(_))
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            ToggledTokenScanStore::Native(store) => store.entity_type(),
            ToggledTokenScanStore::Emptying(store) => store.entity_type(),
        }
    }

    pub fn state(&self) -> StoreState {
        match self {
            ToggledTokenScanStore::Native(store) => store.state(),
            ToggledTokenScanStore::Emptying(store) => store.state(),
        }
    }

    pub fn init(&mut self) -> Result<()> {
        match self {
            ToggledTokenScanStore::Native(store) => store.init(),
            ToggledTokenScanStore::Emptying(store) => store.init(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        match self {
            ToggledTokenScanStore::Native(store) => store.start(),
            ToggledTokenScanStore::Emptying(store) => store.start(),
        }
    }

    pub fn shutdown(&mut self) -> Result<()> {
        match self {
            ToggledTokenScanStore::Native(store) => store.shutdown(),
            ToggledTokenScanStore::Emptying(store) => store.shutdown(),
        }
    }

    pub fn force(&self) -> Result<()> {
        match self {
            ToggledTokenScanStore::Native(store) => store.force(),
            ToggledTokenScanStore::Emptying(store) => store.force(),
        }
    }

    pub fn new_writer(&self) -> Result<StoreWriter<WriterOf<F>>> {
        match self {
            ToggledTokenScanStore::Native(store) => store.new_writer().map(StoreWriter::Incremental),
            ToggledTokenScanStore::Emptying(_) => Ok(StoreWriter::Discarding(DiscardingWriter)),
        }
    }

    pub fn new_bulk_append_writer(&self) -> Result<StoreWriter<WriterOf<F>>> {
        match self {
            ToggledTokenScanStore::Native(store) => {
                store.new_bulk_append_writer().map(StoreWriter::BulkAppend)
            }
            ToggledTokenScanStore::Emptying(_) => Ok(StoreWriter::Discarding(DiscardingWriter)),
        }
    }

    pub fn reader(&self) -> Result<TokenScanReader<'_, F::Map>> {
        match self {
            ToggledTokenScanStore::Native(store) => store.reader(),
            ToggledTokenScanStore::Emptying(store) => store.reader(),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        match self {
            ToggledTokenScanStore::Native(store) => store.is_empty(),
            ToggledTokenScanStore::Emptying(store) => store.is_empty(),
        }
    }

    pub fn snapshot_store_files(&self) -> Vec<PathBuf> {
        match self {
            ToggledTokenScanStore::Native(store) => store.snapshot_store_files(),
            ToggledTokenScanStore::Emptying(store) => store.snapshot_store_files(),
        }
    }

    pub fn drop_store(&mut self) -> Result<()> {
        match self {
            ToggledTokenScanStore::Native(store) => store.drop_store(),
            ToggledTokenScanStore::Emptying(store) => store.drop_store(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMapFactory;
    use crate::monitor::{NoopMonitor, RecordingMonitor};

    fn store(
        factory: &Arc<MemoryMapFactory>,
        config: &TokenScanConfig,
        stream: VecChangeStream,
        monitor: Arc<dyn TokenScanMonitor>,
    ) -> TokenScanStore<MemoryMapFactory> {
        let layout = DatabaseLayout::new("/db", config);
        TokenScanStore::label_scan_store(Arc::clone(factory), &layout, config, stream, monitor)
    }

    fn stream() -> VecChangeStream {
        VecChangeStream::new(vec![
            EntityTokenUpdate::added(1, vec![0, 2]),
            EntityTokenUpdate::added(70, vec![2]),
        ])
    }

    #[test]
    fn missing_index_is_rebuilt_from_the_change_stream() {
        let factory = Arc::new(MemoryMapFactory::new());
        let monitor = Arc::new(RecordingMonitor::new());
        let config = TokenScanConfig::default();
        let mut store = store(&factory, &config, stream(), monitor.clone());

        store.init().unwrap();
        assert_eq!(store.state(), StoreState::NotIndexed);
        assert!(store.reader().is_err());
        store.start().unwrap();
        assert_eq!(store.state(), StoreState::ValidIndex);

        let ids: Vec<_> = store
            .reader()
            .unwrap()
            .entities_with_token(2, ScanOrder::Ascending)
            .unwrap()
            .map(|id| id.unwrap())
            .collect();
        assert_eq!(ids, vec![1, 70]);
        assert_eq!(
            monitor.events(),
            vec![
                TokenScanEvent::NoIndex,
                TokenScanEvent::Init,
                TokenScanEvent::Rebuilding,
                TokenScanEvent::Rebuilt {
                    approximate_entity_count: 2
                },
            ]
        );
        store.shutdown().unwrap();
    }

    #[test]
    fn first_writer_marks_dirty_and_shutdown_marks_clean() {
        let factory = Arc::new(MemoryMapFactory::new());
        let config = TokenScanConfig::default();
        let mut store = store(&factory, &config, stream(), Arc::new(NoopMonitor));
        store.init().unwrap();
        store.start().unwrap();
        let map = factory.map_at(store.path()).unwrap();
        assert_eq!(map.header(), MapHeader::Clean);

        let mut writer = store.new_writer().unwrap();
        assert_eq!(map.header(), MapHeader::Dirty);
        writer.write(&EntityTokenUpdate::added(3, vec![5])).unwrap();
        writer.close().unwrap();
        store.shutdown().unwrap();
        assert_eq!(map.header(), MapHeader::Clean);
    }

    #[test]
    fn shutdown_after_failed_init_is_quiet() {
        let factory = Arc::new(MemoryMapFactory::new());
        let config = TokenScanConfig::default().read_only(true);
        let mut store = store(&factory, &config, stream(), Arc::new(NoopMonitor));
        let err = store.init().unwrap_err();
        assert!(matches!(err, TokenScanError::IndexMissing { .. }));
        store.shutdown().unwrap();
        assert_eq!(store.state(), StoreState::Closed);
    }

    #[test]
    fn read_only_store_refuses_writers_but_force_is_a_no_op() {
        let factory = Arc::new(MemoryMapFactory::new());
        let config = TokenScanConfig::default();
        let mut writable = store(&factory, &config, stream(), Arc::new(NoopMonitor));
        writable.init().unwrap();
        writable.start().unwrap();
        writable.shutdown().unwrap();

        let read_only = TokenScanConfig::default().read_only(true);
        let mut store = store(&factory, &read_only, stream(), Arc::new(NoopMonitor));
        store.init().unwrap();
        store.start().unwrap();
        store.force().unwrap();
        let err = store.new_writer().err().unwrap();
        assert!(matches!(err, TokenScanError::ReadOnly { kind: EntityType::Node, .. }));
        assert!(!store.is_empty().unwrap());
        assert_eq!(store.snapshot_store_files(), vec![PathBuf::from("/db/label-scan-store.db")]);
        store.shutdown().unwrap();
    }

    #[test]
    fn disabled_relationship_store_deletes_leftover_file() {
        let factory = Arc::new(MemoryMapFactory::new());
        let config = TokenScanConfig::default();
        let layout = DatabaseLayout::new("/db", &config);
        factory.create(&layout.relationship_type_scan_store()).unwrap();

        let mut store = ToggledTokenScanStore::relationship_type_scan_store(
            Arc::clone(&factory),
            &layout,
            &config,
            stream(),
            Arc::new(NoopMonitor),
        );
        assert!(!store.is_enabled());
        store.init().unwrap();
        store.start().unwrap();
        assert!(!factory.exists(&layout.relationship_type_scan_store()));

        let mut writer = store.new_writer().unwrap();
        writer.write(&EntityTokenUpdate::added(1, vec![1])).unwrap();
        writer.close().unwrap();
        assert!(store.is_empty().unwrap());
        assert_eq!(
            store
                .reader()
                .unwrap()
                .entities_with_token(1, ScanOrder::Ascending)
                .unwrap()
                .count(),
            0
        );
        assert!(store.snapshot_store_files().is_empty());
        store.shutdown().unwrap();
    }
}
