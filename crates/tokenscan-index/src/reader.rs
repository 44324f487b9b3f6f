//! Read paths: single-token id streams, progressors, and the reader handle
//! that builds them against an ordered map.

use crate::all_entries::AllEntriesTokenScanReader;
use crate::composite::{CompositeIterator, CompositeMode, IdStream};
use crate::error::Result;
use crate::map::{KeyRange, OrderedMap, RangeCursor};
use crate::range::{entity_id_of, range_of, ScanOrder, SetBits, TokenScanKey};
use crate::{EntityId, TokenId};

// ============================================================================
// Single-token iterator
// ============================================================================

/// Entity ids carrying one token, in the requested order.
///
/// Owns one range cursor, released on exhaustion, on `close`, or on drop.
pub struct TokenEntityIterator<C: RangeCursor> {
    cursor: Option<C>,
    order: ScanOrder,
    current: Option<(u64, SetBits)>,
    /// Only ids strictly after this one (in `order`) are returned.
    after: Option<EntityId>,
}

impl<C: RangeCursor> TokenEntityIterator<C> {
    pub fn new(cursor: C, order: ScanOrder, after: Option<EntityId>) -> Self {
        Self {
            cursor: Some(cursor),
            order,
            current: None,
            after,
        }
    }

    /// An iterator that yields nothing and holds no cursor.
    pub fn empty(order: ScanOrder) -> Self {
        Self {
            cursor: None,
            order,
            current: None,
            after: None,
        }
    }

    pub fn order(&self) -> ScanOrder {
        self.order
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.is_none()
    }

    pub fn close(&mut self) -> Result<()> {
        self.current = None;
        match self.cursor.take() {
            Some(mut cursor) => cursor.close(),
            None => Ok(()),
        }
    }

    pub fn next_id(&mut self) -> Result<Option<EntityId>> {
        loop {
            if let Some((range_id, bits)) = &mut self.current {
                let range_id = *range_id;
                for offset in bits {
                    let id = entity_id_of(range_id, offset);
                    match self.after {
                        Some(after) if !self.order.precedes(after, id) => continue,
                        _ => return Ok(Some(id)),
                    }
                }
                self.current = None;
            }

            let Some(cursor) = self.cursor.as_mut() else {
                return Ok(None);
            };
            match cursor.next() {
                Ok(Some((key, value))) => {
                    self.current = Some((key.range_id, value.offsets_in(self.order)));
                }
                Ok(None) => {
                    self.close()?;
                    return Ok(None);
                }
                Err(err) => {
                    let _ = self.close();
                    return Err(err);
                }
            }
        }
    }
}

impl<C: RangeCursor> IdStream for TokenEntityIterator<C> {
    fn next_id(&mut self) -> Result<Option<EntityId>> {
        TokenEntityIterator::next_id(self)
    }

    fn close(&mut self) -> Result<()> {
        TokenEntityIterator::close(self)
    }
}

impl<C: RangeCursor> Iterator for TokenEntityIterator<C> {
    type Item = Result<EntityId>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_id().transpose()
    }
}

impl<C: RangeCursor> Drop for TokenEntityIterator<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "failed to close token scan cursor on drop");
        }
    }
}

// ============================================================================
// Progressor
// ============================================================================

/// Receives one entity id per call. Returning `false` stops delivery.
pub trait EntityClient {
    fn accept(&mut self, entity_id: EntityId) -> bool;
}

impl<F: FnMut(EntityId) -> bool> EntityClient for F {
    fn accept(&mut self, entity_id: EntityId) -> bool {
        self(entity_id)
    }
}

/// Pushes the ids of a single-token scan into a client, one at a time.
pub struct TokenScanProgressor<C: RangeCursor, K: EntityClient> {
    ids: TokenEntityIterator<C>,
    client: K,
    stopped: bool,
}

impl<C: RangeCursor, K: EntityClient> TokenScanProgressor<C, K> {
    pub fn new(ids: TokenEntityIterator<C>, client: K) -> Self {
        Self {
            ids,
            client,
            stopped: false,
        }
    }

    /// Deliver one id. Returns `false` once the scan is exhausted or the
    /// client has asked to stop.
    pub fn next(&mut self) -> Result<bool> {
        if self.stopped {
            return Ok(false);
        }
        match self.ids.next_id()? {
            Some(id) => {
                if !self.client.accept(id) {
                    self.stopped = true;
                    self.ids.close()?;
                }
                Ok(true)
            }
            None => {
                self.stopped = true;
                Ok(false)
            }
        }
    }

    /// Deliver ids until the client stops or the scan ends; returns how many
    /// were delivered.
    pub fn run(&mut self) -> Result<u64> {
        let mut delivered = 0;
        while self.next()? {
            delivered += 1;
        }
        Ok(delivered)
    }

    pub fn client(&self) -> &K {
        &self.client
    }

    pub fn into_client(self) -> K {
        self.client
    }

    pub fn close(&mut self) -> Result<()> {
        self.stopped = true;
        self.ids.close()
    }
}

// ============================================================================
// Reader handle
// ============================================================================

/// Read access to one token scan index. A reader without a map serves
/// nothing; that is what a disabled store hands out.
pub struct TokenScanReader<'a, M: OrderedMap> {
    map: Option<&'a M>,
}

impl<'a, M: OrderedMap> TokenScanReader<'a, M> {
    pub fn new(map: &'a M) -> Self {
        Self { map: Some(map) }
    }

    pub fn empty() -> Self {
        Self { map: None }
    }

    fn open(
        &self,
        token_id: TokenId,
        range: KeyRange,
        after: Option<EntityId>,
    ) -> Result<TokenEntityIterator<M::Cursor>> {
        debug_assert!(range.low.token_id == token_id);
        match self.map {
            Some(map) => Ok(TokenEntityIterator::new(map.seek(range)?, range.order, after)),
            None => Ok(TokenEntityIterator::empty(range.order)),
        }
    }

    /// Every entity carrying `token_id`.
    pub fn entities_with_token(
        &self,
        token_id: TokenId,
        order: ScanOrder,
    ) -> Result<TokenEntityIterator<M::Cursor>> {
        self.open(token_id, KeyRange::token(token_id, order), None)
    }

    /// Entities carrying `token_id` that come strictly after `from` in
    /// `order`: ids greater than `from` ascending, less than `from`
    /// descending.
    pub fn entities_with_token_from(
        &self,
        token_id: TokenId,
        from: EntityId,
        order: ScanOrder,
    ) -> Result<TokenEntityIterator<M::Cursor>> {
        let range = match order {
            ScanOrder::Ascending => KeyRange::new(
                TokenScanKey::for_entity(token_id, from),
                TokenScanKey::new(token_id, u64::MAX),
                order,
            ),
            ScanOrder::Descending => KeyRange::new(
                TokenScanKey::new(token_id, 0),
                TokenScanKey::new(token_id, range_of(from) + 1),
                order,
            ),
        };
        self.open(token_id, range, Some(from))
    }

    /// Entities carrying at least one of `tokens`.
    pub fn entities_with_any_of_tokens(
        &self,
        tokens: &[TokenId],
        order: ScanOrder,
    ) -> Result<CompositeIterator<TokenEntityIterator<M::Cursor>>> {
        self.composite(tokens, CompositeMode::Union, order)
    }

    /// Entities carrying every one of `tokens`.
    pub fn entities_with_all_tokens(
        &self,
        tokens: &[TokenId],
        order: ScanOrder,
    ) -> Result<CompositeIterator<TokenEntityIterator<M::Cursor>>> {
        self.composite(tokens, CompositeMode::Intersection, order)
    }

    fn composite(
        &self,
        tokens: &[TokenId],
        mode: CompositeMode,
        order: ScanOrder,
    ) -> Result<CompositeIterator<TokenEntityIterator<M::Cursor>>> {
        let mut streams = Vec::with_capacity(tokens.len());
        for &token_id in tokens {
            // Streams opened so far are closed by their drop if this fails.
            streams.push(self.entities_with_token(token_id, order)?);
        }
        Ok(CompositeIterator::new(streams, mode, order))
    }

    pub fn progressor<K: EntityClient>(
        &self,
        token_id: TokenId,
        order: ScanOrder,
        client: K,
    ) -> Result<TokenScanProgressor<M::Cursor, K>> {
        Ok(TokenScanProgressor::new(
            self.entities_with_token(token_id, order)?,
            client,
        ))
    }

    /// Full range-by-range scan over every token present in the index.
    pub fn all_entity_token_ranges(&self) -> Result<AllEntriesTokenScanReader<M::Cursor>> {
        match self.map {
            Some(map) => AllEntriesTokenScanReader::open(map),
            None => Ok(AllEntriesTokenScanReader::empty()),
        }
    }

    /// Full scan over tokens `0..=highest_token_id`.
    pub fn all_entity_token_ranges_bounded(
        &self,
        highest_token_id: TokenId,
    ) -> Result<AllEntriesTokenScanReader<M::Cursor>> {
        match self.map {
            Some(map) => AllEntriesTokenScanReader::open_bounded(map, highest_token_id),
            None => Ok(AllEntriesTokenScanReader::empty()),
        }
    }
}
