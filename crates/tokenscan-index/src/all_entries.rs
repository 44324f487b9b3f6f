//! Full scan: the whole index, one range at a time.

use crate::error::Result;
use crate::map::{KeyRange, OrderedMap, RangeCursor};
use crate::range::{base_entity_id, entity_id_of, ScanOrder, TokenScanValue, RANGE_SIZE};
use crate::{EntityId, TokenId};

/// Token membership of every entity in one range that carries any token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTokenRange {
    range_id: u64,
    entities: Vec<EntityId>,
    /// Indexed by offset within the range.
    tokens: Vec<Vec<TokenId>>,
}

impl EntityTokenRange {
    /// Materialise from the per-token bitsets of one range.
    pub fn new(range_id: u64, token_bits: &[(TokenId, TokenScanValue)]) -> Self {
        let mut tokens = vec![Vec::new(); RANGE_SIZE as usize];
        for (token_id, bits) in token_bits {
            for offset in bits.offsets() {
                tokens[offset as usize].push(*token_id);
            }
        }
        let entities = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_empty())
            .map(|(offset, _)| entity_id_of(range_id, offset as u32))
            .collect();
        Self {
            range_id,
            entities,
            tokens,
        }
    }

    pub fn id(&self) -> u64 {
        self.range_id
    }

    /// Entities with at least one token, ascending.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Sorted token ids of `entity_id`; empty if it is outside this range or
    /// carries no token.
    pub fn tokens(&self, entity_id: EntityId) -> &[TokenId] {
        let base = base_entity_id(self.range_id);
        match entity_id.checked_sub(base) {
            Some(offset) if offset < RANGE_SIZE => &self.tokens[offset as usize],
            _ => &[],
        }
    }
}

impl std::fmt::Display for EntityTokenRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TokenRange[id:{}", self.range_id)?;
        for entity in &self.entities {
            write!(f, "; {entity}:{:?}", self.tokens(*entity))?;
        }
        write!(f, "]")
    }
}

struct TokenCursor<C> {
    token_id: TokenId,
    cursor: C,
    head: Option<(u64, TokenScanValue)>,
}

/// Merges one ascending cursor per token by range id.
pub struct AllEntriesTokenScanReader<C: RangeCursor> {
    cursors: Vec<TokenCursor<C>>,
    highest_range: Option<u64>,
    primed: bool,
    closed: bool,
}

impl<C: RangeCursor> AllEntriesTokenScanReader<C> {
    pub fn empty() -> Self {
        Self {
            cursors: Vec::new(),
            highest_range: None,
            primed: true,
            closed: true,
        }
    }

    /// Scan over every token up to the highest one present in `map`.
    pub fn open<M: OrderedMap<Cursor = C>>(map: &M) -> Result<Self> {
        let mut cursor = map.seek(KeyRange::all(ScanOrder::Descending))?;
        let highest = cursor.next();
        cursor.close()?;
        match highest? {
            Some((key, _)) => Self::open_bounded(map, key.token_id),
            None => Ok(Self::empty()),
        }
    }

    /// Scan over tokens `0..=highest_token_id`.
    pub fn open_bounded<M: OrderedMap<Cursor = C>>(
        map: &M,
        highest_token_id: TokenId,
    ) -> Result<Self> {
        let mut highest_range = None;
        for token_id in 0..=highest_token_id {
            let mut probe = map.seek(KeyRange::token(token_id, ScanOrder::Descending))?;
            let last = probe.next();
            probe.close()?;
            if let Some((key, _)) = last? {
                highest_range = highest_range.max(Some(key.range_id));
            }
        }

        let mut reader = Self {
            cursors: Vec::new(),
            highest_range,
            primed: false,
            closed: false,
        };
        if highest_range.is_none() {
            reader.closed = true;
            return Ok(reader);
        }
        for token_id in 0..=highest_token_id {
            // Cursors already pushed are released by the reader's drop.
            let cursor = map.seek(KeyRange::token(token_id, ScanOrder::Ascending))?;
            reader.cursors.push(TokenCursor {
                token_id,
                cursor,
                head: None,
            });
        }
        Ok(reader)
    }

    /// Upper bound on the entity ids this scan can visit.
    pub fn max_count(&self) -> u64 {
        match self.highest_range {
            Some(range) => (range + 1).saturating_mul(RANGE_SIZE),
            None => 0,
        }
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed && self.cursors.is_empty() {
            return Ok(());
        }
        self.closed = true;
        let mut first_err = None;
        for token in &mut self.cursors {
            if let Err(err) = token.cursor.close() {
                tracing::warn!(token_id = token.token_id, error = %err, "failed to close full scan cursor");
                first_err.get_or_insert(err);
            }
        }
        self.cursors.clear();
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn prime(&mut self) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        self.primed = true;
        for token in &mut self.cursors {
            token.head = token.cursor.next()?.map(|(k, v)| (k.range_id, v));
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Option<EntityTokenRange>> {
        self.prime()?;
        let Some(range_id) = self
            .cursors
            .iter()
            .filter_map(|t| t.head.map(|(range, _)| range))
            .min()
        else {
            return Ok(None);
        };

        let mut token_bits = Vec::new();
        for token in &mut self.cursors {
            if let Some((range, bits)) = token.head {
                if range == range_id {
                    token_bits.push((token.token_id, bits));
                    token.head = token.cursor.next()?.map(|(k, v)| (k.range_id, v));
                }
            }
        }
        Ok(Some(EntityTokenRange::new(range_id, &token_bits)))
    }

    pub fn next_range(&mut self) -> Result<Option<EntityTokenRange>> {
        if self.closed {
            return Ok(None);
        }
        match self.step() {
            Ok(Some(range)) => Ok(Some(range)),
            Ok(None) => {
                self.close()?;
                Ok(None)
            }
            Err(err) => {
                let _ = self.close();
                Err(err)
            }
        }
    }
}

impl<C: RangeCursor> Iterator for AllEntriesTokenScanReader<C> {
    type Item = Result<EntityTokenRange>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_range().transpose()
    }
}

impl<C: RangeCursor> Drop for AllEntriesTokenScanReader<C> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapHeader;
    use crate::memory::MemoryMap;
    use crate::range::TokenScanKey;

    fn map_with(entries: &[(TokenId, EntityId)]) -> MemoryMap {
        let mut bits = std::collections::BTreeMap::<TokenScanKey, TokenScanValue>::new();
        for &(token, entity) in entries {
            bits.entry(TokenScanKey::for_entity(token, entity))
                .or_default()
                .set(crate::range::offset_of(entity));
        }
        MemoryMap::with_entries(bits, MapHeader::Clean)
    }

    #[test]
    fn yields_only_populated_ranges_with_tokens_per_entity() {
        let map = map_with(&[(0, 1), (2, 1), (1, 3), (0, 200), (2, 200)]);
        let ranges: Vec<_> = AllEntriesTokenScanReader::open(&map)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(ranges.len(), 2);

        assert_eq!(ranges[0].id(), 0);
        assert_eq!(ranges[0].entities(), &[1, 3]);
        assert_eq!(ranges[0].tokens(1), &[0, 2]);
        assert_eq!(ranges[0].tokens(3), &[1]);
        assert!(ranges[0].tokens(2).is_empty());
        assert!(ranges[0].tokens(200).is_empty());

        assert_eq!(ranges[1].id(), 3);
        assert_eq!(ranges[1].entities(), &[200]);
        assert_eq!(ranges[1].tokens(200), &[0, 2]);
        assert_eq!(map.open_cursors(), 0);
    }

    #[test]
    fn max_count_covers_highest_range() {
        let map = map_with(&[(0, 1), (5, 130)]);
        let reader = AllEntriesTokenScanReader::open(&map).unwrap();
        assert_eq!(reader.max_count(), 3 * RANGE_SIZE);
        let empty = MemoryMap::new();
        assert_eq!(AllEntriesTokenScanReader::open(&empty).unwrap().max_count(), 0);
    }

    #[test]
    fn bounded_scan_ignores_higher_tokens() {
        let map = map_with(&[(0, 1), (7, 1), (7, 500)]);
        let ranges: Vec<_> = AllEntriesTokenScanReader::open_bounded(&map, 3)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].tokens(1), &[0]);
    }

    #[test]
    fn early_close_releases_all_cursors() {
        let map = map_with(&[(0, 1), (1, 70), (2, 140)]);
        let mut reader = AllEntriesTokenScanReader::open(&map).unwrap();
        assert_eq!(map.open_cursors(), 3);
        assert!(reader.next_range().unwrap().is_some());
        reader.close().unwrap();
        assert_eq!(map.open_cursors(), 0);
        assert!(reader.next_range().unwrap().is_none());
    }
}
