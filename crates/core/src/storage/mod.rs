//! Persistence collaborators.
//!
//! The session never depends on a save succeeding: every failure is logged and
//! reported as a warning while the in-memory state is kept.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::branch::BranchRecord;
use crate::config::{StorageBackend, StorageConfig};
use crate::error::StorageResult;
use crate::thought::ThoughtEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SNAPSHOT_VERSION: u32 = 2;

/// Bulk transfer format for export/import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    #[serde(default)]
    pub thoughts: Vec<ThoughtEntry>,
    #[serde(default)]
    pub branches: Vec<BranchRecord>,
    #[serde(default)]
    pub exported_at: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            thoughts: Vec::new(),
            branches: Vec::new(),
            exported_at: 0,
        }
    }
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initialize(&self) -> StorageResult<()>;

    /// Returns a reference to the written record, if the backend has one.
    async fn save_thought(&self, entry: &ThoughtEntry) -> StorageResult<Option<String>>;

    /// All stored thoughts in insertion (ordinal) order.
    async fn load_history(&self) -> StorageResult<Vec<ThoughtEntry>>;

    /// Drops thoughts that fell out of the retention window.
    async fn evict(&self, entries: &[ThoughtEntry]) -> StorageResult<()>;

    async fn save_branch(&self, record: &BranchRecord) -> StorageResult<Option<String>>;

    async fn load_branches(&self) -> StorageResult<Vec<BranchRecord>>;

    /// Deletes a branch record. Thoughts stored under it stay, since merged
    /// branches may still reference them.
    async fn remove_branch(&self, id: &str) -> StorageResult<()>;

    /// Deletes every thought stored under `branch_id`.
    async fn clear_branch_thoughts(&self, branch_id: &str) -> StorageResult<()>;

    async fn clear(&self) -> StorageResult<()>;

    async fn export_data(&self) -> StorageResult<Snapshot>;

    /// Replaces everything with `snapshot`.
    async fn import_data(&self, snapshot: &Snapshot) -> StorageResult<()>;
}

pub fn storage_from_config(config: &StorageConfig) -> Arc<dyn StorageProvider> {
    match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::File => Arc::new(FileStorage::new(config.resolved_data_dir())),
    }
}
