//! Store configuration and on-disk layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::EntityType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenScanConfig {
    /// Open stores without write access: no rebuild, no writers.
    pub read_only: bool,
    /// When off, the relationship type scan store serves nothing and its
    /// file is removed at startup.
    pub enable_relationship_type_scan_store: bool,
    /// Ranges the incremental writer buffers before flushing.
    pub writer_max_pending_ranges: usize,
    pub label_scan_store_file: String,
    pub relationship_type_scan_store_file: String,
}

impl Default for TokenScanConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            enable_relationship_type_scan_store: false,
            writer_max_pending_ranges: 16,
            label_scan_store_file: "label-scan-store.db".to_string(),
            relationship_type_scan_store_file: "relationship-type-scan-store.db".to_string(),
        }
    }
}

impl TokenScanConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_relationship_type_scan_store(mut self, enabled: bool) -> Self {
        self.enable_relationship_type_scan_store = enabled;
        self
    }
}

/// Resolves backing-file paths inside a database directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseLayout {
    directory: PathBuf,
    label_scan_store_file: String,
    relationship_type_scan_store_file: String,
}

impl DatabaseLayout {
    pub fn new(directory: impl Into<PathBuf>, config: &TokenScanConfig) -> Self {
        Self {
            directory: directory.into(),
            label_scan_store_file: config.label_scan_store_file.clone(),
            relationship_type_scan_store_file: config.relationship_type_scan_store_file.clone(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn label_scan_store(&self) -> PathBuf {
        self.directory.join(&self.label_scan_store_file)
    }

    pub fn relationship_type_scan_store(&self) -> PathBuf {
        self.directory.join(&self.relationship_type_scan_store_file)
    }

    pub fn scan_store(&self, kind: EntityType) -> PathBuf {
        match kind {
            EntityType::Node => self.label_scan_store(),
            EntityType::Relationship => self.relationship_type_scan_store(),
        }
    }
}
