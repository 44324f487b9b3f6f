//! Error taxonomy for the token scan index.
//!
//! Caller-contract violations are raised at the offending call. Persisted-state
//! problems are raised at `init`/`start`. Collaborator failures pass through
//! unchanged.

use std::path::PathBuf;

use thiserror::Error;

use crate::{EntityId, EntityType, TokenId};

pub type Result<T> = std::result::Result<T, TokenScanError>;

#[derive(Debug, Error)]
pub enum TokenScanError {
    #[error("unsorted token list for entity {entity_id}: {tokens:?} must be sorted ascending with no duplicates")]
    UnsortedTokens {
        entity_id: EntityId,
        tokens: Vec<TokenId>,
    },

    #[error("token {token_id} already present for entity {entity_id} in range {range_id}")]
    TokenAlreadyPresent {
        entity_id: EntityId,
        token_id: TokenId,
        range_id: u64,
    },

    #[error("token {token_id} not present for entity {entity_id} in range {range_id}")]
    TokenNotPresent {
        entity_id: EntityId,
        token_id: TokenId,
        range_id: u64,
    },

    #[error("was expecting no tokens before for entity {entity_id}, but got {tokens_before:?}")]
    UnexpectedTokensBefore {
        entity_id: EntityId,
        tokens_before: Vec<TokenId>,
    },

    #[error("{kind} is read-only: {operation} is not supported")]
    ReadOnly {
        kind: EntityType,
        operation: &'static str,
    },

    #[error("{kind} {} does not exist and cannot be created in read-only mode", .path.display())]
    IndexMissing { kind: EntityType, path: PathBuf },

    #[error("{kind} {} was not shut down cleanly and cannot be rebuilt in read-only mode", .path.display())]
    IndexNotClean { kind: EntityType, path: PathBuf },

    #[error("rebuild of {kind} {} failed", .path.display())]
    RebuildFailed {
        kind: EntityType,
        path: PathBuf,
        #[source]
        source: Box<TokenScanError>,
    },

    #[error(
        "Database was started in read only mode and with relationship type scan store turned OFF, \
         but the store file {} still exists and cannot be deleted. \
         Note that consistency check use read only mode. \
         Use setting 'enable_relationship_type_scan_store' to turn relationship type scan store ON or OFF.",
        .path.display()
    )]
    IncompatibleToggle { kind: EntityType, path: PathBuf },

    #[error("{kind} is {state}; {operation} is not allowed in that state")]
    Lifecycle {
        kind: EntityType,
        state: &'static str,
        operation: &'static str,
    },

    #[error("ordered map failure: {0}")]
    Map(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TokenScanError {
    /// Whether this error reports a broken caller contract rather than a
    /// persisted-state or I/O problem.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            TokenScanError::UnsortedTokens { .. }
                | TokenScanError::TokenAlreadyPresent { .. }
                | TokenScanError::TokenNotPresent { .. }
                | TokenScanError::UnexpectedTokensBefore { .. }
                | TokenScanError::ReadOnly { .. }
        )
    }

    /// Walk the `source` chain looking for a match.
    pub fn chain_contains(&self, pred: impl Fn(&TokenScanError) -> bool) -> bool {
        let mut current = Some(self);
        while let Some(err) = current {
            if pred(err) {
                return true;
            }
            current = match err {
                TokenScanError::RebuildFailed { source, .. } => Some(source.as_ref()),
                _ => None,
            };
        }
        false
    }
}
