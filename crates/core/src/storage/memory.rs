use super::{Snapshot, StorageProvider};
use crate::branch::BranchRecord;
use crate::error::StorageResult;
use crate::thought::{ThoughtEntry, ThoughtStore};
use crate::util::unix_ms;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Process-local backend. Writes never fail and never produce file refs.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    thoughts: ThoughtStore,
    branches: BTreeMap<String, BranchRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn save_thought(&self, entry: &ThoughtEntry) -> StorageResult<Option<String>> {
        self.state.lock().await.thoughts.upsert(entry.clone());
        Ok(None)
    }

    async fn load_history(&self) -> StorageResult<Vec<ThoughtEntry>> {
        Ok(self.state.lock().await.thoughts.entries().to_vec())
    }

    async fn evict(&self, entries: &[ThoughtEntry]) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        for entry in entries {
            state.thoughts.remove(entry.sequence_number, &entry.branch_id);
        }
        Ok(())
    }

    async fn save_branch(&self, record: &BranchRecord) -> StorageResult<Option<String>> {
        self.state
            .lock()
            .await
            .branches
            .insert(record.id.clone(), record.clone());
        Ok(None)
    }

    async fn load_branches(&self) -> StorageResult<Vec<BranchRecord>> {
        Ok(self.state.lock().await.branches.values().cloned().collect())
    }

    async fn remove_branch(&self, id: &str) -> StorageResult<()> {
        self.state.lock().await.branches.remove(id);
        Ok(())
    }

    async fn clear_branch_thoughts(&self, branch_id: &str) -> StorageResult<()> {
        self.state.lock().await.thoughts.clear_branch(branch_id);
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state.thoughts.clear();
        state.branches.clear();
        Ok(())
    }

    async fn export_data(&self) -> StorageResult<Snapshot> {
        let state = self.state.lock().await;
        Ok(Snapshot {
            thoughts: state.thoughts.entries().to_vec(),
            branches: state.branches.values().cloned().collect(),
            exported_at: unix_ms(),
            ..Snapshot::default()
        })
    }

    async fn import_data(&self, snapshot: &Snapshot) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        state.thoughts.replace_all(snapshot.thoughts.clone());
        state.branches = snapshot
            .branches
            .iter()
            .map(|record| (record.id.clone(), record.clone()))
            .collect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thought::entry;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn round_trips_through_export_and_import() {
        let storage = MemoryStorage::new();
        storage.initialize().await.expect("init");
        assert_eq!(storage.save_thought(&entry(1, "main", "a")).await.expect("save"), None);
        storage
            .save_branch(&BranchRecord::new("main", vec![1]))
            .await
            .expect("save branch");

        let snapshot = storage.export_data().await.expect("export");
        assert_eq!(snapshot.thoughts.len(), 1);

        let other = MemoryStorage::new();
        other.import_data(&snapshot).await.expect("import");
        assert_eq!(other.load_history().await.expect("history"), snapshot.thoughts);
        assert_eq!(
            other.load_branches().await.expect("branches"),
            vec![BranchRecord::new("main", vec![1])]
        );
    }

    #[tokio::test]
    async fn remove_branch_keeps_thoughts_until_cleared() {
        let storage = MemoryStorage::new();
        storage.save_thought(&entry(1, "main", "a")).await.expect("save");
        storage.save_thought(&entry(2, "alt", "b")).await.expect("save");
        storage
            .save_branch(&BranchRecord::new("alt", vec![1, 2]))
            .await
            .expect("save branch");
        storage.remove_branch("alt").await.expect("remove");

        assert_eq!(storage.load_history().await.expect("history").len(), 2);
        assert!(storage.load_branches().await.expect("branches").is_empty());

        storage.clear_branch_thoughts("alt").await.expect("clear");
        assert_eq!(storage.load_history().await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn evict_forgets_only_the_given_keys() {
        let storage = MemoryStorage::new();
        for (seq, branch) in [(1, "main"), (2, "main"), (1, "alt")] {
            storage.save_thought(&entry(seq, branch, "t")).await.expect("save");
        }
        storage
            .evict(&[entry(1, "main", "t"), entry(9, "ghost", "t")])
            .await
            .expect("evict");
        let keys: Vec<(u32, String)> = storage
            .load_history()
            .await
            .expect("history")
            .into_iter()
            .map(|e| (e.sequence_number, e.branch_id))
            .collect();
        assert_eq!(keys, vec![(2, "main".to_string()), (1, "alt".to_string())]);
    }
}
