use std::fs;
use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;
use tokenscan_index::{
    DatabaseLayout, EntityTokenUpdate, RecordingMonitor, ScanOrder, StoreState,
    TokenScanConfig, TokenScanError, TokenScanEvent, TokenScanStore, TokenScanWriter,
    ToggledTokenScanStore, VecChangeStream,
};
use tokenscan_storage::FileMapFactory;

fn source() -> VecChangeStream {
    VecChangeStream::new(vec![
        EntityTokenUpdate::added(0, vec![0]),
        EntityTokenUpdate::added(64, vec![0, 1]),
        EntityTokenUpdate::added(65, vec![1]),
    ])
}

fn store(
    layout: &DatabaseLayout,
    config: &TokenScanConfig,
    monitor: &Arc<RecordingMonitor>,
) -> TokenScanStore<FileMapFactory> {
    TokenScanStore::label_scan_store(
        Arc::new(FileMapFactory::new()),
        layout,
        config,
        source(),
        monitor.clone(),
    )
}

fn scan(store: &TokenScanStore<FileMapFactory>, token: u32) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for id in store.reader()?.entities_with_token(token, ScanOrder::Ascending)? {
        ids.push(id?);
    }
    Ok(ids)
}

#[test]
fn writes_survive_a_clean_restart() -> Result<()> {
    let dir = tempdir()?;
    let config = TokenScanConfig::default();
    let layout = DatabaseLayout::new(dir.path(), &config);
    let monitor = Arc::new(RecordingMonitor::new());

    let mut first = store(&layout, &config, &monitor);
    first.init()?;
    first.start()?;
    let mut writer = first.new_writer()?;
    writer.write(&EntityTokenUpdate::token_changes(65, vec![1], vec![1, 4]))?;
    writer.close()?;
    first.shutdown()?;
    assert!(monitor.rebuilt());

    monitor.clear();
    let mut second = store(&layout, &config, &monitor);
    second.init()?;
    second.start()?;
    assert!(!monitor.rebuilt());
    assert_eq!(scan(&second, 4)?, vec![65]);
    assert_eq!(scan(&second, 1)?, vec![64, 65]);
    second.shutdown()?;
    Ok(())
}

#[test]
fn missing_file_in_read_only_mode_fails() -> Result<()> {
    let dir = tempdir()?;
    let config = TokenScanConfig::default().read_only(true);
    let layout = DatabaseLayout::new(dir.path(), &config);
    let mut store = store(&layout, &config, &Arc::new(RecordingMonitor::new()));
    assert!(matches!(store.init(), Err(TokenScanError::IndexMissing { .. })));
    assert!(!layout.label_scan_store().exists());
    store.shutdown()?;
    Ok(())
}

#[test]
fn unclean_file_in_read_only_mode_fails() -> Result<()> {
    let dir = tempdir()?;
    let config = TokenScanConfig::default();
    let layout = DatabaseLayout::new(dir.path(), &config);
    let monitor = Arc::new(RecordingMonitor::new());

    // Initialised but never started or shut down cleanly.
    let mut crashed = store(&layout, &config, &monitor);
    crashed.init()?;
    drop(crashed);

    let read_only = TokenScanConfig::default().read_only(true);
    let mut store = store(&layout, &read_only, &monitor);
    let err = store.init().unwrap_err();
    assert!(matches!(err, TokenScanError::IndexNotClean { .. }));
    store.shutdown()?;
    Ok(())
}

#[test]
fn zero_length_file_is_rebuilt() -> Result<()> {
    let dir = tempdir()?;
    let config = TokenScanConfig::default();
    let layout = DatabaseLayout::new(dir.path(), &config);
    fs::write(layout.label_scan_store(), b"")?;
    let monitor = Arc::new(RecordingMonitor::new());

    let mut store = store(&layout, &config, &monitor);
    store.init()?;
    assert_eq!(store.state(), StoreState::CorruptIndex);
    store.start()?;
    assert_eq!(scan(&store, 0)?, vec![0, 64]);
    store.shutdown()?;
    assert_eq!(
        monitor.events()[..2],
        [TokenScanEvent::NotValidIndex, TokenScanEvent::Init]
    );
    Ok(())
}

#[test]
fn scrambled_file_is_rebuilt() -> Result<()> {
    let dir = tempdir()?;
    let config = TokenScanConfig::default();
    let layout = DatabaseLayout::new(dir.path(), &config);
    let monitor = Arc::new(RecordingMonitor::new());

    let mut original = store(&layout, &config, &monitor);
    original.init()?;
    original.start()?;
    original.shutdown()?;

    let path = layout.label_scan_store();
    let mut bytes = fs::read(&path)?;
    for byte in bytes.iter_mut().skip(3).step_by(7) {
        *byte = byte.wrapping_mul(31).wrapping_add(17);
    }
    fs::write(&path, &bytes)?;

    monitor.clear();
    let mut store = store(&layout, &config, &monitor);
    store.init()?;
    store.start()?;
    assert!(monitor.rebuilt());
    assert_eq!(scan(&store, 1)?, vec![64, 65]);
    store.shutdown()?;
    Ok(())
}

#[test]
fn snapshot_lists_the_store_file() -> Result<()> {
    let dir = tempdir()?;
    let config = TokenScanConfig::default();
    let layout = DatabaseLayout::new(dir.path(), &config);
    let mut store = store(&layout, &config, &Arc::new(RecordingMonitor::new()));
    store.init()?;
    store.start()?;
    assert_eq!(store.snapshot_store_files(), vec![layout.label_scan_store()]);
    store.drop_store()?;
    assert!(!layout.label_scan_store().exists());
    Ok(())
}

#[test]
fn disabled_relationship_store_deletes_its_file() -> Result<()> {
    let dir = tempdir()?;
    let enabled = TokenScanConfig::default().with_relationship_type_scan_store(true);
    let layout = DatabaseLayout::new(dir.path(), &enabled);
    let factory = Arc::new(FileMapFactory::new());

    let mut store = ToggledTokenScanStore::relationship_type_scan_store(
        Arc::clone(&factory),
        &layout,
        &enabled,
        source(),
        Arc::new(RecordingMonitor::new()),
    );
    store.init()?;
    store.start()?;
    store.shutdown()?;
    assert!(layout.relationship_type_scan_store().exists());

    let read_only_disabled = TokenScanConfig::default().read_only(true);
    let mut refused = ToggledTokenScanStore::relationship_type_scan_store(
        Arc::clone(&factory),
        &layout,
        &read_only_disabled,
        source(),
        Arc::new(RecordingMonitor::new()),
    );
    assert!(matches!(refused.init(), Err(TokenScanError::IncompatibleToggle { .. })));
    assert!(layout.relationship_type_scan_store().exists());

    let mut disabled = ToggledTokenScanStore::relationship_type_scan_store(
        factory,
        &layout,
        &TokenScanConfig::default(),
        source(),
        Arc::new(RecordingMonitor::new()),
    );
    disabled.init()?;
    assert!(!layout.relationship_type_scan_store().exists());
    disabled.shutdown()?;
    Ok(())
}
