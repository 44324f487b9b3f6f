//! Entity token update records.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenScanError};
use crate::{EntityId, TokenId};

/// One logical change to the token set of an entity.
///
/// Both token lists must be sorted ascending with no duplicates; `validate`
/// checks this and writers call it before touching any state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityTokenUpdate {
    pub entity_id: EntityId,
    pub tokens_before: Vec<TokenId>,
    pub tokens_after: Vec<TokenId>,
}

/// Net effect of an update: tokens to add and tokens to remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenDiff {
    pub added: Vec<TokenId>,
    pub removed: Vec<TokenId>,
}

impl TokenDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl EntityTokenUpdate {
    pub fn token_changes(
        entity_id: EntityId,
        tokens_before: impl Into<Vec<TokenId>>,
        tokens_after: impl Into<Vec<TokenId>>,
    ) -> Self {
        Self {
            entity_id,
            tokens_before: tokens_before.into(),
            tokens_after: tokens_after.into(),
        }
    }

    /// Update for an entity that had no tokens before.
    pub fn added(entity_id: EntityId, tokens: impl Into<Vec<TokenId>>) -> Self {
        Self::token_changes(entity_id, Vec::new(), tokens)
    }

    pub fn validate(&self) -> Result<()> {
        for tokens in [&self.tokens_before, &self.tokens_after] {
            if !is_sorted_distinct(tokens) {
                return Err(TokenScanError::UnsortedTokens {
                    entity_id: self.entity_id,
                    tokens: tokens.clone(),
                });
            }
        }
        Ok(())
    }

    /// Sorted merge-walk of the two lists. Assumes `validate` passed.
    pub fn diff(&self) -> TokenDiff {
        let mut diff = TokenDiff::default();
        let (before, after) = (&self.tokens_before, &self.tokens_after);
        let (mut b, mut a) = (0, 0);
        while b < before.len() && a < after.len() {
            match before[b].cmp(&after[a]) {
                std::cmp::Ordering::Less => {
                    diff.removed.push(before[b]);
                    b += 1;
                }
                std::cmp::Ordering::Greater => {
                    diff.added.push(after[a]);
                    a += 1;
                }
                std::cmp::Ordering::Equal => {
                    b += 1;
                    a += 1;
                }
            }
        }
        diff.removed.extend_from_slice(&before[b..]);
        diff.added.extend_from_slice(&after[a..]);
        diff
    }
}

fn is_sorted_distinct(tokens: &[TokenId]) -> bool {
    tokens.windows(2).all(|w| w[0] < w[1])
}
