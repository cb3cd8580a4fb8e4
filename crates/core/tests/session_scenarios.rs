use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use thinking_core::{
    BranchRecord, BranchState, FileStorage, MemoryStorage, ReflectionTrigger, Snapshot,
    StorageError, StorageProvider, StorageResult, SubmitThought, ThinkingConfig, ThinkingError,
    ThinkingSession, ThoughtEntry,
};

async fn memory_session(config: ThinkingConfig) -> ThinkingSession {
    ThinkingSession::open(config, Arc::new(MemoryStorage::new())).await
}

fn no_periodic() -> ThinkingConfig {
    ThinkingConfig {
        reflection_interval: 0,
        ..ThinkingConfig::default()
    }
}

/// Backend whose every call fails.
struct BrokenStorage;

#[async_trait]
impl StorageProvider for BrokenStorage {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn initialize(&self) -> StorageResult<()> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    async fn save_thought(&self, _entry: &ThoughtEntry) -> StorageResult<Option<String>> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    async fn load_history(&self) -> StorageResult<Vec<ThoughtEntry>> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    async fn evict(&self, _entries: &[ThoughtEntry]) -> StorageResult<()> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    async fn save_branch(&self, _record: &BranchRecord) -> StorageResult<Option<String>> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    async fn load_branches(&self) -> StorageResult<Vec<BranchRecord>> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    async fn remove_branch(&self, _id: &str) -> StorageResult<()> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    async fn clear_branch_thoughts(&self, _branch_id: &str) -> StorageResult<()> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    async fn clear(&self) -> StorageResult<()> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    async fn export_data(&self) -> StorageResult<Snapshot> {
        Err(StorageError::Unavailable("disk gone".into()))
    }

    async fn import_data(&self, _snapshot: &Snapshot) -> StorageResult<()> {
        Err(StorageError::Unavailable("disk gone".into()))
    }
}

#[tokio::test]
async fn repeated_thought_is_reported_as_cycle() {
    let mut session = memory_session(no_periodic()).await;
    let mut last = None;
    for seq in 1..=5 {
        last = Some(
            session
                .submit_thought(SubmitThought::new("plan A", seq, 10))
                .await
                .expect("submit"),
        );
    }
    let fifth = last.expect("fifth outcome");
    assert!(fifth.cycle_detected);
    assert!(fifth
        .reflection_triggers
        .contains(&ReflectionTrigger::CycleDetected));
    let main = session.tree().get("main").expect("main");
    assert!(main.metrics.has_cycle);
    assert_eq!(main.sequence_numbers, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn distinct_thoughts_do_not_cycle() {
    let mut session = memory_session(no_periodic()).await;
    let steps = [
        "collect the failing test output",
        "bisect recent commits touching the parser",
        "the regression came from the tokenizer rewrite",
        "write a minimal reproduction case",
        "patch the lookahead handling and rerun",
    ];
    for (seq, text) in (1..).zip(steps) {
        let outcome = session
            .submit_thought(SubmitThought::new(text, seq, 10))
            .await
            .expect("submit");
        assert!(!outcome.cycle_detected, "false positive on {text:?}");
    }
}

#[tokio::test]
async fn fork_then_merge_back_into_main() {
    let mut session = memory_session(no_periodic()).await;
    let plan = [
        "enumerate the options",
        "rank them by cost",
        "prototype the cheapest",
        "measure the prototype",
    ];
    for (seq, text) in (1..).zip(plan) {
        session
            .submit_thought(SubmitThought::new(text, seq, 8))
            .await
            .expect("submit");
    }

    let fork = session.fork_branch("alt", Some(2)).await.expect("fork");
    assert_eq!(fork.result.sequence_numbers, vec![1, 2]);
    session
        .submit_thought(SubmitThought::new("try the second-ranked option instead", 5, 8).on_branch("alt"))
        .await
        .expect("submit on alt");

    let merge = session.merge_branches("alt", "main").await.expect("merge");
    assert_eq!(merge.result.merged, vec![1, 2, 3, 4, 5]);
    assert_eq!(merge.result.active_branch, "main");

    let again = session.merge_branches("alt", "main").await.expect("merge twice");
    assert_eq!(again.result.merged, vec![1, 2, 3, 4, 5]);
    assert!(again.result.added.is_empty());

    // merged thought resolves through its own branch even after alt is gone
    session.remove_branch("alt").await.expect("remove alt");
    let history = session.history(Some("main"), false).expect("history");
    assert_eq!(history.thoughts.len(), 5);
    assert!(history.missing.is_empty());
}

#[tokio::test]
async fn main_cannot_be_removed() {
    let mut session = memory_session(no_periodic()).await;
    session
        .submit_thought(SubmitThought::new("start", 1, 3).on_branch("side"))
        .await
        .expect("submit");
    assert_eq!(session.tree().active(), "side");

    let err = session.remove_branch("main").await.unwrap_err();
    assert_eq!(err, ThinkingError::ProtectedBranch("main".into()));
    assert_eq!(err.kind(), thinking_core::ErrorKind::State);
    assert_eq!(session.tree().active(), "side");
}

#[tokio::test]
async fn periodic_reflection_fires_on_third_submission() {
    let mut session = memory_session(ThinkingConfig::default()).await;
    let texts = [
        "outline the migration",
        "list every table that needs a backfill",
        "estimate downtime for the largest table",
    ];
    let mut due = Vec::new();
    for (seq, text) in (1..).zip(texts) {
        let outcome = session
            .submit_thought(SubmitThought::new(text, seq, 10))
            .await
            .expect("submit");
        due.push(outcome.reflection_due);
        if seq == 3 {
            assert_eq!(outcome.reflection_triggers, vec![ReflectionTrigger::Periodic]);
        }
    }
    assert_eq!(due, vec![false, false, true]);
    assert_eq!(session.interaction_count(), 0);
    assert_eq!(
        session.tree().get("main").expect("main").state,
        BranchState::AwaitingUserInput
    );
}

#[tokio::test]
async fn forced_reflection_keeps_periodic_cadence() {
    let mut session = memory_session(ThinkingConfig::default()).await;
    let first = session
        .submit_thought(SubmitThought::new("shaky first guess", 1, 10).with_score(1.0))
        .await
        .expect("submit");
    assert_eq!(first.reflection_triggers, vec![ReflectionTrigger::LowScore]);
    assert_eq!(session.interaction_count(), 1);
}

#[tokio::test]
async fn revising_twice_keeps_one_row() {
    let mut session = memory_session(no_periodic()).await;
    session
        .submit_thought(SubmitThought::new("first draft", 1, 3))
        .await
        .expect("submit");
    let revision = SubmitThought {
        is_revision: true,
        revises_sequence: Some(1),
        ..SubmitThought::new("second draft", 1, 3)
    };
    let once = session.submit_thought(revision.clone()).await.expect("revise");
    let twice = session.submit_thought(revision).await.expect("revise again");

    assert!(once.was_revision);
    assert!(twice.was_revision);
    assert_eq!(session.thoughts().len(), 1);
    assert_eq!(session.thoughts().get(1, "main").expect("entry").text, "second draft");
    assert_eq!(
        session.tree().get("main").expect("main").sequence_numbers,
        vec![1]
    );
}

#[tokio::test]
async fn storage_failures_become_warnings() {
    let mut session = ThinkingSession::open(no_periodic(), Arc::new(BrokenStorage)).await;
    let outcome = session
        .submit_thought(SubmitThought::new("still recorded", 1, 2))
        .await
        .expect("submit despite storage");
    assert_eq!(outcome.warnings.len(), 2);
    assert!(outcome.warnings[0].contains("save_thought"));
    assert_eq!(session.thoughts().len(), 1);

    let removed = session.fork_branch("alt", None).await.expect("fork");
    assert_eq!(removed.warnings.len(), 1);
    let reset = session.reset().await;
    assert_eq!(reset.warnings.len(), 1);
    assert_eq!(reset.result.thought_count, 0);
}

#[tokio::test]
async fn file_backed_session_survives_restart() {
    let tmp = tempfile::tempdir().expect("tempdir");
    {
        let mut session =
            ThinkingSession::open(no_periodic(), Arc::new(FileStorage::new(tmp.path()))).await;
        session
            .submit_thought(SubmitThought::new("persist me", 1, 3).with_score(8.0))
            .await
            .expect("submit");
        session
            .submit_thought(SubmitThought::new("and me on a side branch", 2, 3).on_branch("side"))
            .await
            .expect("submit");
    }

    let reopened =
        ThinkingSession::open(no_periodic(), Arc::new(FileStorage::new(tmp.path()))).await;
    assert_eq!(reopened.thoughts().len(), 2);
    assert_eq!(
        reopened.tree().get("side").expect("side").sequence_numbers,
        vec![1, 2]
    );
    let main = reopened.tree().get("main").expect("main");
    assert_eq!(main.sequence_numbers, vec![1]);
    assert!((main.metrics.average_score - 8.0).abs() < 1e-9);
}

#[tokio::test]
async fn memory_backend_stays_within_retention_window() {
    let storage = Arc::new(MemoryStorage::new());
    let config = ThinkingConfig {
        max_history_size: 5,
        ..no_periodic()
    };
    let mut session = ThinkingSession::open(config, storage.clone()).await;
    for seq in 1..=40 {
        session
            .submit_thought(SubmitThought::new(format!("observation {seq}"), seq, 40))
            .await
            .expect("submit");
    }
    assert_eq!(session.thoughts().len(), 5);
    let stored = storage.load_history().await.expect("history");
    assert_eq!(stored.as_slice(), session.thoughts().entries());
}

#[tokio::test]
async fn file_backend_deletes_evicted_thoughts() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = ThinkingConfig {
        max_history_size: 3,
        ..no_periodic()
    };
    let mut session =
        ThinkingSession::open(config.clone(), Arc::new(FileStorage::new(tmp.path()))).await;
    for seq in 1..=6 {
        session
            .submit_thought(SubmitThought::new(format!("finding {seq}"), seq, 6))
            .await
            .expect("submit");
    }
    let files = std::fs::read_dir(tmp.path().join("thoughts").join("main"))
        .expect("thoughts dir")
        .count();
    assert_eq!(files, 3);

    let reopened = ThinkingSession::open(config, Arc::new(FileStorage::new(tmp.path()))).await;
    let history = reopened.history(None, false).expect("history");
    assert_eq!(history.missing, vec![1, 2, 3]);
    assert_eq!(history.thoughts.len(), 3);
}

#[tokio::test]
async fn reload_after_revision_keeps_insertion_order() {
    let tmp = tempfile::tempdir().expect("tempdir");
    {
        let mut session =
            ThinkingSession::open(no_periodic(), Arc::new(FileStorage::new(tmp.path()))).await;
        for (seq, text) in [(1, "frame the question"), (2, "gather data"), (3, "draw a conclusion")] {
            session
                .submit_thought(SubmitThought::new(text, seq, 4))
                .await
                .expect("submit");
        }
        session
            .submit_thought(SubmitThought {
                is_revision: true,
                revises_sequence: Some(1),
                ..SubmitThought::new("frame a narrower question", 4, 4)
            })
            .await
            .expect("revise");
    }

    let reopened =
        ThinkingSession::open(no_periodic(), Arc::new(FileStorage::new(tmp.path()))).await;
    let own = reopened.history(None, true).expect("history");
    let order: Vec<u32> = own.thoughts.iter().map(|t| t.sequence_number).collect();
    assert_eq!(order, vec![1, 2, 3]);
    assert_eq!(own.thoughts[0].text, "frame a narrower question");
}

#[tokio::test]
async fn merged_thoughts_resolve_after_restart() {
    let tmp = tempfile::tempdir().expect("tempdir");
    {
        let mut session =
            ThinkingSession::open(no_periodic(), Arc::new(FileStorage::new(tmp.path()))).await;
        session
            .submit_thought(SubmitThought::new("state the goal", 1, 4))
            .await
            .expect("submit");
        session
            .submit_thought(SubmitThought::new("a detour worth keeping", 2, 4).on_branch("detour"))
            .await
            .expect("submit");
        session.merge_branches("detour", "main").await.expect("merge");
        session.remove_branch("detour").await.expect("remove");
    }

    let reopened =
        ThinkingSession::open(no_periodic(), Arc::new(FileStorage::new(tmp.path()))).await;
    assert_eq!(reopened.tree().ids(), vec!["main".to_string()]);
    let history = reopened.history(Some("main"), false).expect("history");
    let texts: Vec<&str> = history.thoughts.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["state the goal", "a detour worth keeping"]);
}
