//! Incremental write path.
//!
//! Updates are diffed into per-(range, token) add/remove deltas held in a
//! small working set of ranges. The working set is flushed into the ordered
//! map as merges whenever the update stream moves past every pending range,
//! when it grows beyond its configured size, and on `close`.
//!
//! Adding a token the session already added, or removing one it already
//! removed, fails with `TokenAlreadyPresent` / `TokenNotPresent` for the
//! lifetime of the writer, flushed or not.

use std::collections::BTreeMap;

use crate::error::{Result, TokenScanError};
use crate::map::{AddMerger, MapWriter, RemoveMerger};
use crate::range::{offset_of, range_of, TokenScanKey, TokenScanValue};
use crate::update::EntityTokenUpdate;
use crate::TokenId;

/// Sink for entity token updates during one write session.
pub trait TokenScanWriter: Send {
    fn write(&mut self, update: &EntityTokenUpdate) -> Result<()>;

    /// Flush buffered state and release the underlying map writer.
    /// Calling `close` again is a no-op.
    fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RangeDelta {
    adds: TokenScanValue,
    removes: TokenScanValue,
}

impl RangeDelta {
    fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }
}

/// What this session has asserted about each entity's tokens. Survives
/// flushes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct KnownTokens {
    present: TokenScanValue,
    absent: TokenScanValue,
}

pub struct IncrementalWriter<W: MapWriter> {
    writer: Option<W>,
    pending: BTreeMap<u64, BTreeMap<TokenId, RangeDelta>>,
    known: BTreeMap<(TokenId, u64), KnownTokens>,
    max_pending_ranges: usize,
    flushed_merges: u64,
}

impl<W: MapWriter> IncrementalWriter<W> {
    pub fn new(writer: W, max_pending_ranges: usize) -> Self {
        Self {
            writer: Some(writer),
            pending: BTreeMap::new(),
            known: BTreeMap::new(),
            max_pending_ranges: max_pending_ranges.max(1),
            flushed_merges: 0,
        }
    }

    /// Ranges currently buffered.
    pub fn pending_ranges(&self) -> usize {
        self.pending.len()
    }

    /// Merge calls issued against the map so far.
    pub fn flushed_merges(&self) -> u64 {
        self.flushed_merges
    }

    fn check(
        &self,
        update: &EntityTokenUpdate,
        added: &[TokenId],
        removed: &[TokenId],
    ) -> Result<()> {
        let range_id = range_of(update.entity_id);
        let offset = offset_of(update.entity_id);
        for &token_id in added {
            if let Some(known) = self.known.get(&(token_id, range_id)) {
                if known.present.get(offset) {
                    return Err(TokenScanError::TokenAlreadyPresent {
                        entity_id: update.entity_id,
                        token_id,
                        range_id,
                    });
                }
            }
        }
        for &token_id in removed {
            if let Some(known) = self.known.get(&(token_id, range_id)) {
                if known.absent.get(offset) {
                    return Err(TokenScanError::TokenNotPresent {
                        entity_id: update.entity_id,
                        token_id,
                        range_id,
                    });
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, entity_id: u64, added: &[TokenId], removed: &[TokenId]) {
        let range_id = range_of(entity_id);
        let offset = offset_of(entity_id);
        let tokens = self.pending.entry(range_id).or_default();

        for &token_id in added {
            let known = self.known.entry((token_id, range_id)).or_default();
            known.absent.clear(offset);
            known.present.set(offset);

            let delta = tokens.entry(token_id).or_default();
            if delta.removes.get(offset) {
                delta.removes.clear(offset);
            } else {
                delta.adds.set(offset);
            }
            if delta.is_empty() {
                tokens.remove(&token_id);
            }
        }
        for &token_id in removed {
            let known = self.known.entry((token_id, range_id)).or_default();
            known.present.clear(offset);
            known.absent.set(offset);

            let delta = tokens.entry(token_id).or_default();
            if delta.adds.get(offset) {
                delta.adds.clear(offset);
            } else {
                delta.removes.set(offset);
            }
            if delta.is_empty() {
                tokens.remove(&token_id);
            }
        }
        if tokens.is_empty() {
            self.pending.remove(&range_id);
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| TokenScanError::Map("writer already closed".to_string()))?;

        let pending = std::mem::take(&mut self.pending);
        let ranges = pending.len();
        let mut merges = 0u64;
        for (range_id, tokens) in pending {
            for (token_id, delta) in tokens {
                let key = TokenScanKey::new(token_id, range_id);
                if !delta.adds.is_empty() {
                    tracing::trace!(%key, added = delta.adds.len(), "merge add");
                    writer.merge(key, delta.adds, &AddMerger)?;
                    merges += 1;
                }
                if !delta.removes.is_empty() {
                    tracing::trace!(%key, removed = delta.removes.len(), "merge remove");
                    writer.merge_if_exists(key, delta.removes, &RemoveMerger)?;
                    merges += 1;
                }
            }
        }
        self.flushed_merges += merges;
        tracing::debug!(ranges, merges, "flushed token scan working set");
        Ok(())
    }
}

impl<W: MapWriter> TokenScanWriter for IncrementalWriter<W> {
    fn write(&mut self, update: &EntityTokenUpdate) -> Result<()> {
        if self.writer.is_none() {
            return Err(TokenScanError::Map("writer already closed".to_string()));
        }
        update.validate()?;
        let diff = update.diff();
        if diff.is_empty() {
            return Ok(());
        }

        let range_id = range_of(update.entity_id);
        if matches!(self.pending.keys().next_back(), Some(&highest) if range_id > highest) {
            self.flush()?;
        }

        self.check(update, &diff.added, &diff.removed)?;
        self.apply(update.entity_id, &diff.added, &diff.removed);

        if self.pending.len() > self.max_pending_ranges {
            self.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        let flushed = self.flush();
        let closed = match self.writer.take() {
            Some(mut writer) => writer.close(),
            None => Ok(()),
        };
        flushed.and(closed)
    }
}

impl<W: MapWriter> Drop for IncrementalWriter<W> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to close token scan writer on drop");
        }
    }
}
