use super::{Snapshot, StorageProvider};
use crate::branch::BranchRecord;
use crate::error::{StorageError, StorageResult};
use crate::thought::ThoughtEntry;
use crate::util::unix_ms;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const THOUGHTS_DIR: &str = "thoughts";
const BRANCHES_DIR: &str = "branches";

/// JSON files under a data directory:
///
/// ```text
/// <root>/thoughts/<branch>/<sequence>.json
/// <root>/branches/<branch>.json
/// ```
///
/// Every write goes to a temp file first and is renamed into place.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn thoughts_dir(&self) -> PathBuf {
        self.root.join(THOUGHTS_DIR)
    }

    fn branches_dir(&self) -> PathBuf {
        self.root.join(BRANCHES_DIR)
    }

    fn thought_path(&self, branch_id: &str, sequence_number: u32) -> PathBuf {
        self.thoughts_dir()
            .join(branch_component(branch_id))
            .join(format!("{sequence_number}.json"))
    }

    fn branch_path(&self, branch_id: &str) -> PathBuf {
        self.branches_dir()
            .join(format!("{}.json", branch_component(branch_id)))
    }
}

/// Directory-safe name for a branch id. Ids with characters outside
/// `[A-Za-z0-9_.-]` are hex-encoded so distinct ids never collide.
fn branch_component(id: &str) -> String {
    let plain = !id.is_empty()
        && !id.starts_with('.')
        && !id.starts_with("x-")
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if plain {
        return id.to_string();
    }
    let mut out = String::with_capacity(2 + id.len() * 2);
    out.push_str("x-");
    for byte in id.as_bytes() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::Other(format!("{} has no parent", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;
    let tmp = path.with_extension(format!("json.tmp-{}", std::process::id()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    Ok(())
}

async fn remove_dir_if_exists(path: &Path) -> StorageResult<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

async fn remove_file_if_exists(path: &Path) -> StorageResult<()> {
    match tokio::fs::remove_file(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

/// `*.json` files directly under `dir`; a missing directory is empty.
async fn json_files(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

async fn subdirectories(dir: &Path) -> StorageResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = read_dir.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

#[async_trait]
impl StorageProvider for FileStorage {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn initialize(&self) -> StorageResult<()> {
        tokio::fs::create_dir_all(self.thoughts_dir()).await?;
        tokio::fs::create_dir_all(self.branches_dir()).await?;
        log::info!("file storage ready at {}", self.root.display());
        Ok(())
    }

    async fn save_thought(&self, entry: &ThoughtEntry) -> StorageResult<Option<String>> {
        let path = self.thought_path(&entry.branch_id, entry.sequence_number);
        let bytes = serde_json::to_vec_pretty(entry)?;
        write_atomic(&path, &bytes).await?;
        Ok(Some(path.to_string_lossy().to_string()))
    }

    async fn load_history(&self) -> StorageResult<Vec<ThoughtEntry>> {
        let mut entries = Vec::new();
        for dir in subdirectories(&self.thoughts_dir()).await? {
            for path in json_files(&dir).await? {
                let bytes = tokio::fs::read(&path).await?;
                match serde_json::from_slice::<ThoughtEntry>(&bytes) {
                    Ok(entry) => entries.push(entry),
                    Err(err) => log::warn!("skipping unreadable thought {}: {err}", path.display()),
                }
            }
        }
        // Records without an ordinal fall back to creation time.
        entries.sort_by(|a, b| {
            a.ordinal
                .cmp(&b.ordinal)
                .then(a.timestamp.cmp(&b.timestamp))
                .then(a.sequence_number.cmp(&b.sequence_number))
        });
        Ok(entries)
    }

    async fn evict(&self, entries: &[ThoughtEntry]) -> StorageResult<()> {
        for entry in entries {
            remove_file_if_exists(&self.thought_path(&entry.branch_id, entry.sequence_number))
                .await?;
        }
        Ok(())
    }

    async fn save_branch(&self, record: &BranchRecord) -> StorageResult<Option<String>> {
        let path = self.branch_path(&record.id);
        write_atomic(&path, &serde_json::to_vec_pretty(record)?).await?;
        Ok(Some(path.to_string_lossy().to_string()))
    }

    async fn load_branches(&self) -> StorageResult<Vec<BranchRecord>> {
        let mut branches = Vec::new();
        for path in json_files(&self.branches_dir()).await? {
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<BranchRecord>(&bytes) {
                Ok(record) => branches.push(record),
                Err(err) => log::warn!("skipping unreadable branch {}: {err}", path.display()),
            }
        }
        Ok(branches)
    }

    async fn remove_branch(&self, id: &str) -> StorageResult<()> {
        remove_file_if_exists(&self.branch_path(id)).await
    }

    async fn clear_branch_thoughts(&self, branch_id: &str) -> StorageResult<()> {
        remove_dir_if_exists(&self.thoughts_dir().join(branch_component(branch_id))).await
    }

    async fn clear(&self) -> StorageResult<()> {
        remove_dir_if_exists(&self.thoughts_dir()).await?;
        remove_dir_if_exists(&self.branches_dir()).await?;
        self.initialize().await
    }

    async fn export_data(&self) -> StorageResult<Snapshot> {
        Ok(Snapshot {
            thoughts: self.load_history().await?,
            branches: self.load_branches().await?,
            exported_at: unix_ms(),
            ..Snapshot::default()
        })
    }

    async fn import_data(&self, snapshot: &Snapshot) -> StorageResult<()> {
        self.clear().await?;
        for entry in &snapshot.thoughts {
            self.save_thought(entry).await?;
        }
        for record in &snapshot.branches {
            self.save_branch(record).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thought::entry;
    use pretty_assertions::assert_eq;

    #[test]
    fn branch_component_escapes_unsafe_ids() {
        assert_eq!(branch_component("main"), "main");
        assert_eq!(branch_component("alt-2"), "alt-2");
        assert_eq!(branch_component("a/b"), "x-612f62");
        assert_eq!(branch_component(".."), "x-2e2e");
        assert_ne!(branch_component("x-61"), "x-61");
    }

    #[tokio::test]
    async fn persists_and_reloads_thoughts_and_branches() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(tmp.path());
        storage.initialize().await.expect("init");

        let first = entry(1, "main", "first");
        let mut second = entry(2, "main", "second");
        second.ordinal = 1;
        let file_ref = storage.save_thought(&second).await.expect("save");
        assert!(file_ref.is_some_and(|p| p.ends_with("2.json")));
        storage.save_thought(&first).await.expect("save");
        let main = BranchRecord::new("main", vec![1, 2]);
        let mut odd = BranchRecord::new("odd/name", vec![1]);
        odd.parent = Some("main".into());
        odd.origins.insert(1, "main".into());
        storage.save_branch(&main).await.expect("save branch");
        storage.save_branch(&odd).await.expect("save branch");

        let reopened = FileStorage::new(tmp.path());
        let history = reopened.load_history().await.expect("history");
        assert_eq!(history, vec![first, second]);
        let branches = reopened.load_branches().await.expect("branches");
        assert_eq!(branches.len(), 2);
        assert!(branches.contains(&main));
        assert!(branches.contains(&odd));
    }

    #[tokio::test]
    async fn load_orders_by_ordinal_not_timestamp() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(tmp.path());
        for (seq, ordinal, timestamp) in [(1, 0, 500), (2, 1, 100), (3, 2, 200)] {
            let mut thought = entry(seq, "main", "t");
            thought.ordinal = ordinal;
            thought.timestamp = timestamp;
            storage.save_thought(&thought).await.expect("save");
        }
        let order: Vec<u32> = storage
            .load_history()
            .await
            .expect("history")
            .iter()
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn revision_overwrites_the_same_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(tmp.path());
        storage.save_thought(&entry(1, "main", "draft")).await.expect("save");
        storage.save_thought(&entry(1, "main", "final")).await.expect("save");
        let history = storage.load_history().await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "final");
    }

    #[tokio::test]
    async fn evict_deletes_thought_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(tmp.path());
        storage.save_thought(&entry(1, "main", "old")).await.expect("save");
        storage.save_thought(&entry(2, "main", "new")).await.expect("save");
        storage
            .evict(&[entry(1, "main", "old"), entry(5, "never", "saved")])
            .await
            .expect("evict");
        assert!(!tmp.path().join("thoughts/main/1.json").exists());
        let history = storage.load_history().await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sequence_number, 2);
    }

    #[tokio::test]
    async fn import_replaces_existing_state() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(tmp.path());
        storage.save_thought(&entry(9, "stale", "old")).await.expect("save");

        let snapshot = Snapshot {
            thoughts: vec![entry(1, "main", "fresh")],
            branches: vec![BranchRecord::new("main", vec![1])],
            ..Snapshot::default()
        };
        storage.import_data(&snapshot).await.expect("import");

        let exported = storage.export_data().await.expect("export");
        assert_eq!(exported.thoughts, snapshot.thoughts);
        assert_eq!(exported.branches, snapshot.branches);
    }

    #[tokio::test]
    async fn missing_directories_load_as_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(tmp.path().join("never-created"));
        assert!(storage.load_history().await.expect("history").is_empty());
        assert!(storage.load_branches().await.expect("branches").is_empty());
        storage.remove_branch("ghost").await.expect("remove missing");
        storage
            .clear_branch_thoughts("ghost")
            .await
            .expect("clear missing");
    }
}
