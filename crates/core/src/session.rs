use crate::branch::{Branch, BranchComparison, BranchState, BranchSummary, BranchTree, MergeOutcome};
use crate::config::ThinkingConfig;
use crate::error::{Result, StorageError, ThinkingError};
use crate::reflection::{should_reflect, ReflectionDecision, ReflectionInputs, ReflectionTrigger};
use crate::storage::{Snapshot, StorageProvider, SNAPSHOT_VERSION};
use crate::thought::{ThoughtEntry, ThoughtMetadata, ThoughtStore};
use crate::util::unix_ms;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thinking_cycles::{CacheStats, CompositeDetector, CycleMatch};

/// Raw caller input for one reasoning step. Numbers are signed so that
/// out-of-range values reach validation instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubmitThought {
    pub text: String,
    pub sequence_number: i64,
    pub total_thoughts: i64,
    pub next_thought_needed: bool,
    pub branch_id: Option<String>,
    pub branch_from_sequence: Option<i64>,
    pub is_revision: bool,
    pub revises_sequence: Option<i64>,
    pub score: Option<f64>,
    pub request_reflection: bool,
}

impl SubmitThought {
    pub fn new(text: impl Into<String>, sequence_number: i64, total_thoughts: i64) -> Self {
        Self {
            text: text.into(),
            sequence_number,
            total_thoughts,
            next_thought_needed: sequence_number < total_thoughts,
            ..Self::default()
        }
    }

    pub fn on_branch(mut self, branch_id: impl Into<String>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

struct ValidThought {
    text: String,
    sequence_number: u32,
    total_thoughts: u32,
    branch_id: Option<String>,
    branch_from_sequence: Option<u32>,
    revises_sequence: Option<u32>,
    score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingInputRequest {
    pub id: String,
    pub branch_id: String,
    pub sequence_number: u32,
    pub triggers: Vec<ReflectionTrigger>,
    pub prompts: Vec<String>,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitOutcome {
    pub thought_number: u32,
    pub total_thoughts: u32,
    pub next_thought_needed: bool,
    pub cycle_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<CycleMatch>,
    pub branches: Vec<String>,
    pub active_branch: String,
    pub reflection_due: bool,
    pub reflection_triggers: Vec<ReflectionTrigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_input_request: Option<PendingInputRequest>,
    pub was_revision: bool,
    /// Slot rewritten in place, when `was_revision`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_sequence: Option<u32>,
    pub is_new_branch: bool,
    pub history_length: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_refs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Result of an operation whose in-memory effect stands even if persisting it failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Persisted<T> {
    pub result: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl<T> Persisted<T> {
    fn new(result: T, warnings: Vec<String>) -> Self {
        Self { result, warnings }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClearedBranch {
    pub branch_id: String,
    pub removed_thoughts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchHistory {
    pub branch_id: String,
    pub sequence_numbers: Vec<u32>,
    pub thoughts: Vec<ThoughtEntry>,
    /// Sequence numbers whose thoughts were evicted by retention
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputReceipt {
    pub request_id: String,
    pub branch_id: String,
    pub sequence_number: u32,
    pub response: String,
    pub branch_state: BranchState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionOverview {
    pub active_branch: String,
    pub branches: Vec<BranchSummary>,
    pub thought_count: usize,
    pub interaction_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_input_request: Option<PendingInputRequest>,
    pub storage: &'static str,
    pub cache: CacheStats,
}

/// One agent's reasoning state: branches, thoughts, detector and checkpoint policy.
///
/// Every method validates before it mutates, so an `Err` leaves the session
/// untouched. Storage runs after the in-memory change and only ever adds
/// warnings.
pub struct ThinkingSession {
    config: ThinkingConfig,
    tree: BranchTree,
    store: ThoughtStore,
    detector: CompositeDetector,
    storage: Arc<dyn StorageProvider>,
    interaction_count: u32,
    pending: Option<PendingInputRequest>,
    next_request_id: u64,
}

impl ThinkingSession {
    /// Builds a session and restores whatever `storage` already holds.
    pub async fn open(config: ThinkingConfig, storage: Arc<dyn StorageProvider>) -> Self {
        let config = config.normalized();
        if let Err(err) = storage.initialize().await {
            log::warn!("{} storage failed to initialize: {err}", storage.name());
        }
        let thoughts = storage.load_history().await.unwrap_or_else(|err| {
            log::warn!("{} storage history unavailable: {err}", storage.name());
            Vec::new()
        });
        let branches = storage.load_branches().await.unwrap_or_else(|err| {
            log::warn!("{} storage branches unavailable: {err}", storage.name());
            Default::default()
        });

        let mut session = Self {
            tree: BranchTree::restore(branches, config.max_branches),
            store: ThoughtStore::from_entries(thoughts),
            detector: CompositeDetector::from_config(&config.detector),
            storage,
            interaction_count: 0,
            pending: None,
            next_request_id: 0,
            config,
        };
        let evicted = session.after_restore();
        if !evicted.is_empty() {
            if let Err(err) = session.storage.evict(&evicted).await {
                log::warn!("{} storage eviction failed: {err}", session.storage.name());
            }
        }
        log::info!(
            "session opened: {} thoughts, {} branches, storage={}",
            session.store.len(),
            session.tree.len(),
            session.storage.name()
        );
        session
    }

    fn after_restore(&mut self) -> Vec<ThoughtEntry> {
        let evicted = self.store.enforce_retention(self.config.max_history_size);
        self.refresh_metrics();
        evicted
    }

    pub fn config(&self) -> &ThinkingConfig {
        &self.config
    }

    pub fn tree(&self) -> &BranchTree {
        &self.tree
    }

    pub fn thoughts(&self) -> &ThoughtStore {
        &self.store
    }

    pub fn interaction_count(&self) -> u32 {
        self.interaction_count
    }

    pub fn pending_input(&self) -> Option<&PendingInputRequest> {
        self.pending.as_ref()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.detector.cache().stats()
    }

    /// Records one step. The slot written is `revises_sequence` for an explicit
    /// revision, otherwise `sequence_number`; a slot the branch already lists is
    /// rewritten in place instead of appended.
    pub async fn submit_thought(&mut self, request: SubmitThought) -> Result<SubmitOutcome> {
        let thought = self.validate(request.clone())?;
        let mut warnings = Vec::new();

        // Branch resolution and the revision target can still fail; nothing is
        // touched before both succeed.
        let branch_id = match thought.branch_id.as_deref() {
            Some(id) => id.to_string(),
            None => self.tree.active().to_string(),
        };
        let is_new_branch = !self.tree.contains(&branch_id);
        if let Some(target) = thought.revises_sequence {
            let listed = if is_new_branch {
                self.tree
                    .fork_prefix(thought.branch_from_sequence)?
                    .0
                    .contains(&target)
            } else {
                self.tree.get(&branch_id)?.contains(target)
            };
            if !listed {
                return Err(ThinkingError::RevisionWithoutTarget);
            }
        }
        if is_new_branch {
            self.tree.fork(&branch_id, thought.branch_from_sequence)?;
        } else if let Some(seq) = thought.branch_from_sequence {
            warnings.push(format!(
                "branch '{branch_id}' already exists; branch_from_sequence {seq} was ignored"
            ));
        }
        self.tree.switch_to(&branch_id)?;
        self.clear_pending();

        let slot = thought.revises_sequence.unwrap_or(thought.sequence_number);
        let was_revision = self.tree.get(&branch_id)?.contains(slot);
        let forked_from_sequence = self.tree.get(&branch_id)?.divergence_point;
        let entry = ThoughtEntry {
            text: thought.text,
            sequence_number: slot,
            branch_id: branch_id.clone(),
            score: thought.score,
            timestamp: unix_ms(),
            ordinal: 0,
            metadata: ThoughtMetadata {
                is_revision: request.is_revision,
                revises_sequence: thought.revises_sequence,
                forked_from_sequence: if is_new_branch {
                    forked_from_sequence
                } else {
                    None
                },
                total_thoughts: thought.total_thoughts,
                next_thought_needed: request.next_thought_needed,
            },
        };
        self.store.upsert(entry.clone());
        let entry = self.store.get(slot, &branch_id).cloned().unwrap_or(entry);
        if was_revision {
            self.tree.adopt(&branch_id, slot)?;
        } else {
            self.tree.append(slot, Some(branch_id.as_str()), entry.score)?;
        }
        if was_revision || is_new_branch {
            self.refresh_metrics();
        }

        let cycle = self.detect(&branch_id, &entry);
        if cycle.is_some() {
            self.tree.mark_cycle(&branch_id)?;
        }

        self.interaction_count = self.interaction_count.saturating_add(1);
        let decision = self.decide(ReflectionInputs {
            interaction_count: self.interaction_count,
            reflection_interval: self.config.reflection_interval,
            thought_number: thought.sequence_number,
            total_thoughts: thought.total_thoughts,
            next_thought_needed: request.next_thought_needed,
            score: entry.score,
            has_cycle: cycle.is_some(),
            is_revision: was_revision,
            is_new_branch,
            explicit_request: request.request_reflection,
        });
        if decision.resets_interval() {
            self.interaction_count = 0;
        }
        if decision.due {
            self.next_request_id += 1;
            self.pending = Some(PendingInputRequest {
                id: format!("reflect-{}", self.next_request_id),
                branch_id: branch_id.clone(),
                sequence_number: slot,
                prompts: decision.prompts(),
                triggers: decision.triggers.clone(),
                created_at: unix_ms(),
            });
            self.tree
                .set_state(&branch_id, BranchState::AwaitingUserInput)?;
        }

        let evicted = self.store.enforce_retention(self.config.max_history_size);
        if !evicted.is_empty() {
            if let Err(err) = self.storage.evict(&evicted).await {
                warnings.push(storage_warning("evict", &err));
            }
        }

        let mut file_refs = Vec::new();
        match self.storage.save_thought(&entry).await {
            Ok(file_ref) => file_refs.extend(file_ref),
            Err(err) => warnings.push(storage_warning("save_thought", &err)),
        }
        let record = self.tree.get(&branch_id)?.record();
        match self.storage.save_branch(&record).await {
            Ok(file_ref) => file_refs.extend(file_ref),
            Err(err) => warnings.push(storage_warning("save_branch", &err)),
        }

        Ok(SubmitOutcome {
            thought_number: thought.sequence_number,
            total_thoughts: thought.total_thoughts,
            next_thought_needed: request.next_thought_needed,
            cycle_detected: cycle.is_some(),
            cycle,
            branches: self.tree.ids(),
            active_branch: self.tree.active().to_string(),
            reflection_due: decision.due,
            reflection_triggers: decision.triggers,
            pending_input_request: self.pending.clone(),
            was_revision,
            revised_sequence: was_revision.then_some(slot),
            is_new_branch,
            history_length: record.sequence_numbers.len(),
            file_refs,
            warnings,
        })
    }

    fn validate(&self, request: SubmitThought) -> Result<ValidThought> {
        if request.text.trim().is_empty() {
            return Err(ThinkingError::EmptyThought);
        }
        let sequence_number = positive(request.sequence_number)
            .ok_or(ThinkingError::InvalidSequence(request.sequence_number))?;
        let min = self.config.min_total_thoughts;
        let total_thoughts = positive(request.total_thoughts)
            .filter(|total| *total >= min)
            .ok_or(ThinkingError::TooFewThoughts {
                min,
                actual: request.total_thoughts,
            })?;
        let score = match request.score {
            Some(score) if !score.is_finite() || !(0.0..=10.0).contains(&score) => {
                return Err(ThinkingError::InvalidScore(score));
            }
            Some(score) => score,
            None => self.config.default_score,
        };
        let revises_sequence = if request.is_revision {
            let target = request
                .revises_sequence
                .and_then(positive)
                .ok_or(ThinkingError::RevisionWithoutTarget)?;
            Some(target)
        } else {
            None
        };
        let branch_from_sequence = request
            .branch_from_sequence
            .map(|seq| positive(seq).ok_or(ThinkingError::InvalidSequence(seq)))
            .transpose()?;
        let branch_id = match request.branch_id {
            Some(id) if id.trim().is_empty() => return Err(ThinkingError::MissingBranchId),
            Some(id) => Some(id.trim().to_string()),
            None => None,
        };

        Ok(ValidThought {
            text: request.text,
            sequence_number,
            total_thoughts: total_thoughts.max(sequence_number),
            branch_id,
            branch_from_sequence,
            revises_sequence,
            score,
        })
    }

    /// Prior thoughts of the branch in branch order, excluding the candidate's
    /// own slot. A detector fault counts as "no cycle".
    fn detect(&self, branch_id: &str, candidate: &ThoughtEntry) -> Option<CycleMatch> {
        let branch = self.tree.get(branch_id).ok()?;
        let history: Vec<&str> = branch
            .sequence_numbers
            .iter()
            .filter(|seq| **seq != candidate.sequence_number)
            .filter_map(|seq| self.resolve(branch, *seq))
            .map(|entry| entry.text.as_str())
            .collect();

        match catch_unwind(AssertUnwindSafe(|| {
            self.detector.detect_cycle(&history, &candidate.text)
        })) {
            Ok(found) => {
                if let Some(found) = &found {
                    log::info!(
                        "cycle on '{branch_id}' at {} ({} matched #{}, score {:.3})",
                        candidate.sequence_number,
                        found.strategy,
                        found.matched_index,
                        found.score
                    );
                }
                found
            }
            Err(_) => {
                log::error!("cycle detection panicked on '{branch_id}'; treating as no cycle");
                None
            }
        }
    }

    fn resolve(&self, branch: &Branch, sequence_number: u32) -> Option<&ThoughtEntry> {
        self.store
            .get(sequence_number, branch.owner_of(sequence_number))
    }

    fn refresh_metrics(&mut self) {
        let store = &self.store;
        self.tree
            .recompute_metrics(|owner, seq| store.get(seq, owner).map(|entry| entry.score));
    }

    fn decide(&self, inputs: ReflectionInputs) -> ReflectionDecision {
        catch_unwind(|| should_reflect(&inputs)).unwrap_or_else(|_| {
            log::error!("reflection policy panicked; skipping checkpoint");
            ReflectionDecision::default()
        })
    }

    fn clear_pending(&mut self) -> Option<PendingInputRequest> {
        let pending = self.pending.take()?;
        let awaiting = self
            .tree
            .get(&pending.branch_id)
            .is_ok_and(|branch| branch.state == BranchState::AwaitingUserInput);
        if awaiting {
            let _ = self.tree.set_state(&pending.branch_id, BranchState::Active);
        }
        Some(pending)
    }

    pub async fn fork_branch(
        &mut self,
        new_id: &str,
        from_sequence: Option<i64>,
    ) -> Result<Persisted<Branch>> {
        let from_sequence = from_sequence
            .map(|seq| positive(seq).ok_or(ThinkingError::InvalidSequence(seq)))
            .transpose()?;
        let id = self.tree.fork(new_id, from_sequence)?.id.clone();
        self.refresh_metrics();
        let branch = self.tree.get(&id)?.clone();
        let mut warnings = Vec::new();
        if from_sequence.is_some() && branch.sequence_numbers.is_empty() {
            warnings.push(format!(
                "sequence {} not found on parent; branch '{}' starts empty",
                from_sequence.unwrap_or_default(),
                branch.id
            ));
        }
        if let Err(err) = self.storage.save_branch(&branch.record()).await {
            warnings.push(storage_warning("save_branch", &err));
        }
        Ok(Persisted::new(branch, warnings))
    }

    pub fn switch_branch(&mut self, id: &str) -> Result<&Branch> {
        self.tree.switch_to(id)?;
        self.tree.get(id)
    }

    pub fn compare_branches(&self, first: &str, second: &str) -> Result<BranchComparison> {
        self.tree.compare(first, second)
    }

    pub async fn merge_branches(
        &mut self,
        source: &str,
        target: &str,
    ) -> Result<Persisted<MergeOutcome>> {
        let outcome = self.tree.merge(source, target)?;
        self.refresh_metrics();
        let record = self.tree.get(target)?.record();
        let mut warnings = Vec::new();
        if let Err(err) = self.storage.save_branch(&record).await {
            warnings.push(storage_warning("save_branch", &err));
        }
        Ok(Persisted::new(outcome, warnings))
    }

    /// Drops the branch record. Its thoughts stay in the store because merged
    /// branches may still list them.
    pub async fn remove_branch(&mut self, id: &str) -> Result<Persisted<Branch>> {
        let removed = self.tree.remove(id)?;
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.branch_id == removed.id)
        {
            self.pending = None;
        }
        let mut warnings = Vec::new();
        if let Err(err) = self.storage.remove_branch(&removed.id).await {
            warnings.push(storage_warning("remove_branch", &err));
        }
        Ok(Persisted::new(removed, warnings))
    }

    /// Deletes the branch's own thoughts and empties its sequence list.
    pub async fn clear_branch(&mut self, id: &str) -> Result<Persisted<ClearedBranch>> {
        self.tree.clear(id)?;
        let removed_thoughts = self.store.clear_branch(id);
        self.refresh_metrics();
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.branch_id == id)
        {
            self.pending = None;
        }
        let mut warnings = Vec::new();
        if let Err(err) = self.storage.clear_branch_thoughts(id).await {
            warnings.push(storage_warning("clear_branch_thoughts", &err));
        }
        let record = self.tree.get(id)?.record();
        if let Err(err) = self.storage.save_branch(&record).await {
            warnings.push(storage_warning("save_branch", &err));
        }
        Ok(Persisted::new(
            ClearedBranch {
                branch_id: id.to_string(),
                removed_thoughts,
            },
            warnings,
        ))
    }

    pub fn branch_summaries(&self) -> Vec<BranchSummary> {
        self.tree.summaries()
    }

    pub fn overview(&self) -> SessionOverview {
        SessionOverview {
            active_branch: self.tree.active().to_string(),
            branches: self.tree.summaries(),
            thought_count: self.store.len(),
            interaction_count: self.interaction_count,
            pending_input_request: self.pending.clone(),
            storage: self.storage.name(),
            cache: self.cache_stats(),
        }
    }

    /// Thoughts of `branch_id` (default: active). With `own_only`, only entries
    /// submitted on that branch in insertion order; otherwise the branch's full
    /// line of reasoning, inherited thoughts included.
    pub fn history(&self, branch_id: Option<&str>, own_only: bool) -> Result<BranchHistory> {
        let branch = self.tree.get(branch_id.unwrap_or(self.tree.active()))?;
        if own_only {
            return Ok(BranchHistory {
                branch_id: branch.id.clone(),
                sequence_numbers: branch.sequence_numbers.clone(),
                thoughts: self
                    .store
                    .history_for(&branch.id)
                    .into_iter()
                    .cloned()
                    .collect(),
                missing: Vec::new(),
            });
        }

        let mut thoughts = Vec::with_capacity(branch.sequence_numbers.len());
        let mut missing = Vec::new();
        for seq in &branch.sequence_numbers {
            match self.resolve(branch, *seq) {
                Some(entry) => thoughts.push(entry.clone()),
                None => missing.push(*seq),
            }
        }
        Ok(BranchHistory {
            branch_id: branch.id.clone(),
            sequence_numbers: branch.sequence_numbers.clone(),
            thoughts,
            missing,
        })
    }

    /// Answers the pending checkpoint. `request_id`, when given, must match it.
    pub fn provide_input(
        &mut self,
        request_id: Option<&str>,
        response: &str,
    ) -> Result<InputReceipt> {
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|pending| request_id.map_or(true, |id| id == pending.id));
        if !matches {
            return Err(ThinkingError::NoPendingInput);
        }
        let pending = self.clear_pending().ok_or(ThinkingError::NoPendingInput)?;
        let branch_state = self
            .tree
            .get(&pending.branch_id)
            .map(|branch| branch.state)
            .unwrap_or_default();
        log::info!(
            "input received for {} on '{}' ({} chars)",
            pending.id,
            pending.branch_id,
            response.chars().count()
        );
        Ok(InputReceipt {
            request_id: pending.id,
            branch_id: pending.branch_id,
            sequence_number: pending.sequence_number,
            response: response.to_string(),
            branch_state,
        })
    }

    /// Snapshot of the in-memory state, which is authoritative over storage.
    pub fn export(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            thoughts: self.store.entries().to_vec(),
            branches: self.tree.snapshot(),
            exported_at: unix_ms(),
        }
    }

    /// Replaces all state with `snapshot` and rewrites storage to match the
    /// restored session.
    pub async fn import(&mut self, snapshot: Snapshot) -> Persisted<SessionOverview> {
        if snapshot.version > SNAPSHOT_VERSION {
            log::warn!(
                "importing snapshot version {} with reader version {SNAPSHOT_VERSION}",
                snapshot.version
            );
        }
        self.tree = BranchTree::restore(snapshot.branches, self.config.max_branches);
        self.store.replace_all(snapshot.thoughts);
        self.after_restore();
        self.reset_transient();

        // Storage gets what survived the branch limit and retention window.
        let mut warnings = Vec::new();
        if let Err(err) = self.storage.import_data(&self.export()).await {
            warnings.push(storage_warning("import_data", &err));
        }
        Persisted::new(self.overview(), warnings)
    }

    pub async fn reset(&mut self) -> Persisted<SessionOverview> {
        self.tree = BranchTree::new(self.config.max_branches);
        self.store.clear();
        self.reset_transient();

        let mut warnings = Vec::new();
        if let Err(err) = self.storage.clear().await {
            warnings.push(storage_warning("clear", &err));
        }
        log::info!("session reset");
        Persisted::new(self.overview(), warnings)
    }

    fn reset_transient(&mut self) {
        self.interaction_count = 0;
        self.pending = None;
        self.detector.cache().clear();
    }
}

impl std::fmt::Debug for ThinkingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThinkingSession")
            .field("active", &self.tree.active())
            .field("branches", &self.tree.len())
            .field("thoughts", &self.store.len())
            .field("interaction_count", &self.interaction_count)
            .field("storage", &self.storage.name())
            .finish()
    }
}

fn positive(value: i64) -> Option<u32> {
    u32::try_from(value).ok().filter(|value| *value > 0)
}

fn storage_warning(operation: &str, err: &StorageError) -> String {
    log::warn!("storage {operation} failed: {err}");
    format!("storage {operation} failed: {err}")
}
