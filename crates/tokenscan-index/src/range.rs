//! Range codec: the logical key/value schema of the token scan index.
//!
//! Entity ids are packed `RANGE_SIZE` at a time into one bitset per token:
//!
//! ```text
//!   key   = (token_id, range_id)           range_id = entity_id / RANGE_SIZE
//!   value = u64 bitset                     bit i    => entity range_id*RANGE_SIZE + i
//! ```
//!
//! Keys order token-major, so all ranges of one token are contiguous.

use serde::{Deserialize, Serialize};

use crate::{EntityId, TokenId};

/// Number of consecutive entity ids packed into one value.
pub const RANGE_SIZE: u64 = 64;

const RANGE_SHIFT: u32 = RANGE_SIZE.trailing_zeros();
const OFFSET_MASK: u64 = RANGE_SIZE - 1;

/// Range id of the range holding `entity_id`.
#[inline]
pub const fn range_of(entity_id: EntityId) -> u64 {
    entity_id >> RANGE_SHIFT
}

/// Bit position of `entity_id` inside its range.
#[inline]
pub const fn offset_of(entity_id: EntityId) -> u32 {
    (entity_id & OFFSET_MASK) as u32
}

/// First entity id covered by `range_id`.
#[inline]
pub const fn base_entity_id(range_id: u64) -> EntityId {
    range_id << RANGE_SHIFT
}

/// Inverse of (`range_of`, `offset_of`).
#[inline]
pub const fn entity_id_of(range_id: u64, offset: u32) -> EntityId {
    base_entity_id(range_id) | offset as u64
}

// ============================================================================
// Key
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenScanKey {
    // Field order drives the derived `Ord`: token first, then range.
    pub token_id: TokenId,
    pub range_id: u64,
}

impl TokenScanKey {
    pub const MIN: TokenScanKey = TokenScanKey::new(0, 0);
    pub const MAX: TokenScanKey = TokenScanKey::new(TokenId::MAX, u64::MAX);

    pub const fn new(token_id: TokenId, range_id: u64) -> Self {
        Self { token_id, range_id }
    }

    /// Key of the range holding `entity_id` for `token_id`.
    pub const fn for_entity(token_id: TokenId, entity_id: EntityId) -> Self {
        Self::new(token_id, range_of(entity_id))
    }

    pub const fn base_entity_id(&self) -> EntityId {
        base_entity_id(self.range_id)
    }
}

impl std::fmt::Display for TokenScanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[token:{},range:{}]", self.token_id, self.range_id)
    }
}

// ============================================================================
// Value
// ============================================================================

/// One range worth of membership bits for a single token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TokenScanValue {
    bits: u64,
}

impl TokenScanValue {
    pub const EMPTY: TokenScanValue = TokenScanValue { bits: 0 };

    pub const fn from_bits(bits: u64) -> Self {
        Self { bits }
    }

    pub const fn bits(&self) -> u64 {
        self.bits
    }

    /// Value with only the bit for `entity_id` set.
    pub const fn single(entity_id: EntityId) -> Self {
        Self::from_bits(1 << offset_of(entity_id))
    }

    #[inline]
    pub fn get(&self, offset: u32) -> bool {
        debug_assert!((offset as u64) < RANGE_SIZE);
        self.bits & (1 << offset) != 0
    }

    #[inline]
    pub fn set(&mut self, offset: u32) {
        debug_assert!((offset as u64) < RANGE_SIZE);
        self.bits |= 1 << offset;
    }

    #[inline]
    pub fn clear(&mut self, offset: u32) {
        debug_assert!((offset as u64) < RANGE_SIZE);
        self.bits &= !(1 << offset);
    }

    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Population count.
    pub const fn len(&self) -> u32 {
        self.bits.count_ones()
    }

    /// OR `other` into `self`; returns the resulting population count.
    pub fn merge_add(&mut self, other: &TokenScanValue) -> u32 {
        self.bits |= other.bits;
        self.len()
    }

    /// AND-NOT `other` out of `self`; returns the resulting population count.
    pub fn merge_remove(&mut self, other: &TokenScanValue) -> u32 {
        self.bits &= !other.bits;
        self.len()
    }

    /// Set bit offsets, lowest first.
    pub fn offsets(&self) -> SetBits {
        SetBits {
            bits: self.bits,
            descending: false,
        }
    }

    /// Set bit offsets in the requested order.
    pub fn offsets_in(&self, order: ScanOrder) -> SetBits {
        SetBits {
            bits: self.bits,
            descending: order == ScanOrder::Descending,
        }
    }

    /// Entity ids of the set bits, given the range this value belongs to.
    pub fn entity_ids(&self, range_id: u64, order: ScanOrder) -> impl Iterator<Item = EntityId> {
        self.offsets_in(order)
            .map(move |offset| entity_id_of(range_id, offset))
    }
}

impl From<u64> for TokenScanValue {
    fn from(bits: u64) -> Self {
        Self::from_bits(bits)
    }
}

/// Direction of an id stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOrder {
    #[default]
    Ascending,
    Descending,
}

impl ScanOrder {
    pub fn is_descending(self) -> bool {
        self == ScanOrder::Descending
    }

    /// True when `a` comes strictly before `b` in this order.
    #[inline]
    pub fn precedes(self, a: EntityId, b: EntityId) -> bool {
        match self {
            ScanOrder::Ascending => a < b,
            ScanOrder::Descending => a > b,
        }
    }
}

/// Iterator over the set bit positions of a value.
#[derive(Debug, Clone)]
pub struct SetBits {
    bits: u64,
    descending: bool,
}

impl Iterator for SetBits {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.bits == 0 {
            return None;
        }
        if self.descending {
            let offset = 63 - self.bits.leading_zeros();
            self.bits &= !(1 << offset);
            Some(offset)
        } else {
            let offset = self.bits.trailing_zeros();
            self.bits &= self.bits - 1;
            Some(offset)
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.bits.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for SetBits {}
