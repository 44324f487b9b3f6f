//! Bulk-append write path used while rebuilding from a full change stream.

use std::collections::BTreeMap;

use crate::error::{Result, TokenScanError};
use crate::map::{AddMerger, MapWriter};
use crate::range::{offset_of, range_of, TokenScanKey, TokenScanValue};
use crate::update::EntityTokenUpdate;
use crate::writer::TokenScanWriter;
use crate::TokenId;

/// Accumulates every add for the current range and merges once per
/// (token, range) when the range changes. Removals are rejected.
pub struct BulkAppendWriter<W: MapWriter> {
    writer: Option<W>,
    current_range: Option<u64>,
    batch: BTreeMap<TokenId, TokenScanValue>,
    entities_written: u64,
}

impl<W: MapWriter> BulkAppendWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            current_range: None,
            batch: BTreeMap::new(),
            entities_written: 0,
        }
    }

    /// Number of updates consumed so far.
    pub fn entities_written(&self) -> u64 {
        self.entities_written
    }

    fn flush(&mut self) -> Result<()> {
        let Some(range_id) = self.current_range else {
            return Ok(());
        };
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TokenScanError::Map("writer already closed".to_string()))?;
        for (token_id, bits) in std::mem::take(&mut self.batch) {
            writer.merge(TokenScanKey::new(token_id, range_id), bits, &AddMerger)?;
        }
        Ok(())
    }
}

impl<W: MapWriter> TokenScanWriter for BulkAppendWriter<W> {
    fn write(&mut self, update: &EntityTokenUpdate) -> Result<()> {
        if self.writer.is_none() {
            return Err(TokenScanError::Map("writer already closed".to_string()));
        }
        if !update.tokens_before.is_empty() {
            return Err(TokenScanError::UnexpectedTokensBefore {
                entity_id: update.entity_id,
                tokens_before: update.tokens_before.clone(),
            });
        }
        update.validate()?;

        let range_id = range_of(update.entity_id);
        if self.current_range != Some(range_id) {
            self.flush()?;
            self.current_range = Some(range_id);
        }
        let offset = offset_of(update.entity_id);
        for &token_id in &update.tokens_after {
            self.batch.entry(token_id).or_default().set(offset);
        }
        self.entities_written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        let flushed = self.flush();
        self.current_range = None;
        let closed = match self.writer.take() {
            Some(mut writer) => writer.close(),
            None => Ok(()),
        };
        tracing::debug!(entities = self.entities_written, "bulk append writer closed");
        flushed.and(closed)
    }
}

impl<W: MapWriter> Drop for BulkAppendWriter<W> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to close bulk append writer on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::OrderedMap;
    use crate::memory::MemoryMap;

    #[test]
    fn batches_one_merge_per_token_and_range() {
        let map = MemoryMap::new();
        let mut w = BulkAppendWriter::new(map.writer().unwrap());
        w.write(&EntityTokenUpdate::added(0, vec![1, 2])).unwrap();
        w.write(&EntityTokenUpdate::added(1, vec![1])).unwrap();
        assert!(map.is_empty());

        w.write(&EntityTokenUpdate::added(64, vec![2])).unwrap();
        assert_eq!(map.get(&TokenScanKey::new(1, 0)), Some(TokenScanValue::from_bits(0b11)));
        assert_eq!(map.get(&TokenScanKey::new(2, 0)), Some(TokenScanValue::from_bits(0b01)));

        w.close().unwrap();
        assert_eq!(map.get(&TokenScanKey::new(2, 1)), Some(TokenScanValue::from_bits(1)));
        assert_eq!(w.entities_written(), 3);
        assert_eq!(map.open_writers(), 0);
    }

    #[test]
    fn rejects_tokens_before() {
        let map = MemoryMap::new();
        let mut w = BulkAppendWriter::new(map.writer().unwrap());
        let err = w
            .write(&EntityTokenUpdate::token_changes(8, vec![1], vec![1, 2]))
            .unwrap_err();
        match err {
            TokenScanError::UnexpectedTokensBefore { entity_id, tokens_before } => {
                assert_eq!(entity_id, 8);
                assert_eq!(tokens_before, vec![1]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(w.entities_written(), 0);
    }

    #[test]
    fn entity_without_tokens_is_counted_but_writes_nothing() {
        let map = MemoryMap::new();
        let mut w = BulkAppendWriter::new(map.writer().unwrap());
        w.write(&EntityTokenUpdate::added(4, Vec::<TokenId>::new())).unwrap();
        w.close().unwrap();
        assert_eq!(w.entities_written(), 1);
        assert!(map.is_empty());
    }
}
