use crate::error::{Result, ThinkingError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const MAIN_BRANCH: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchState {
    #[default]
    Active,
    CycleFlagged,
    AwaitingUserInput,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BranchMetrics {
    pub count: usize,
    pub average_score: f64,
    /// Set by duplicate bookkeeping or by a detected reasoning cycle
    pub has_cycle: bool,
}

impl BranchMetrics {
    fn record(&mut self, score: f64) {
        self.count += 1;
        let n = self.count as f64;
        self.average_score = (self.average_score * (n - 1.0) + score) / n;
    }
}

/// A named line of reasoning. Holds sequence numbers only; content lives in the
/// thought store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub sequence_numbers: Vec<u32>,
    pub divergence_point: Option<u32>,
    pub parent: Option<String>,
    /// Sequence numbers whose thought is stored under another branch, with that
    /// branch's id. Filled by fork and merge.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub origins: BTreeMap<u32, String>,
    pub state: BranchState,
    pub metrics: BranchMetrics,
}

impl Branch {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sequence_numbers: Vec::new(),
            divergence_point: None,
            parent: None,
            origins: BTreeMap::new(),
            state: BranchState::Active,
            metrics: BranchMetrics::default(),
        }
    }

    pub fn contains(&self, sequence_number: u32) -> bool {
        self.sequence_numbers.contains(&sequence_number)
    }

    /// Branch under which the thought for `sequence_number` is stored.
    pub fn owner_of(&self, sequence_number: u32) -> &str {
        self.origins
            .get(&sequence_number)
            .map_or(self.id.as_str(), String::as_str)
    }

    pub fn record(&self) -> BranchRecord {
        BranchRecord {
            id: self.id.clone(),
            sequence_numbers: self.sequence_numbers.clone(),
            parent: self.parent.clone(),
            divergence_point: self.divergence_point,
            origins: self.origins.clone(),
        }
    }
}

/// Persisted form of a branch. State and metrics are derived again on restore.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BranchRecord {
    pub id: String,
    pub sequence_numbers: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence_point: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub origins: BTreeMap<u32, String>,
}

impl BranchRecord {
    pub fn new(id: impl Into<String>, sequence_numbers: Vec<u32>) -> Self {
        Self {
            id: id.into(),
            sequence_numbers,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchComparison {
    pub common: Vec<u32>,
    pub only_in_first: Vec<u32>,
    pub only_in_second: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub source: String,
    pub target: String,
    pub comparison: BranchComparison,
    pub merged: Vec<u32>,
    /// Sequence numbers the target did not have before
    pub added: Vec<u32>,
    pub active_branch: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Already present; the branch is flagged instead
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchSummary {
    pub id: String,
    pub parent: Option<String>,
    pub divergence_point: Option<u32>,
    pub state: BranchState,
    pub length: usize,
    pub is_active: bool,
    pub metrics: BranchMetrics,
}

/// All branches plus the active pointer. `main` always exists.
#[derive(Debug, Clone)]
pub struct BranchTree {
    branches: BTreeMap<String, Branch>,
    active: String,
    max_branches: usize,
}

impl BranchTree {
    pub fn new(max_branches: usize) -> Self {
        let mut branches = BTreeMap::new();
        branches.insert(MAIN_BRANCH.to_string(), Branch::new(MAIN_BRANCH));
        Self {
            branches,
            active: MAIN_BRANCH.to_string(),
            max_branches: max_branches.max(1),
        }
    }

    /// Rebuilds from persisted records. Branches past the limit are dropped, and
    /// a parent that did not survive is replaced by `main`.
    pub fn restore(records: Vec<BranchRecord>, max_branches: usize) -> Self {
        let mut tree = Self::new(max_branches);
        let (main, others): (Vec<BranchRecord>, Vec<BranchRecord>) = records
            .into_iter()
            .partition(|record| record.id == MAIN_BRANCH);
        for record in main.into_iter().chain(others) {
            if record.id.trim().is_empty() {
                continue;
            }
            if record.id != MAIN_BRANCH
                && !tree.branches.contains_key(&record.id)
                && tree.branches.len() >= tree.max_branches
            {
                log::warn!(
                    "dropping persisted branch '{}': branch limit {} reached",
                    record.id,
                    tree.max_branches
                );
                continue;
            }
            tree.install(record);
        }

        let ids: BTreeSet<String> = tree.branches.keys().cloned().collect();
        for branch in tree.branches.values_mut() {
            if branch.id == MAIN_BRANCH {
                branch.parent = None;
            } else if !branch.parent.as_ref().is_some_and(|parent| ids.contains(parent)) {
                branch.parent = Some(MAIN_BRANCH.to_string());
            }
        }
        tree
    }

    fn install(&mut self, record: BranchRecord) {
        let mut branch = Branch::new(record.id.clone());
        let mut seen = BTreeSet::new();
        branch.sequence_numbers = record
            .sequence_numbers
            .into_iter()
            .filter(|seq| seen.insert(*seq))
            .collect();
        branch.origins = record
            .origins
            .into_iter()
            .filter(|(seq, owner)| seen.contains(seq) && *owner != record.id)
            .collect();
        branch.parent = record.parent;
        branch.divergence_point = record.divergence_point;
        branch.metrics.count = branch.sequence_numbers.len();
        self.branches.insert(record.id, branch);
    }

    /// Sequence list and divergence point a fork of the active branch would get.
    pub fn fork_prefix(&self, from_sequence: Option<u32>) -> Result<(Vec<u32>, Option<u32>)> {
        let parent = self.get(&self.active)?;
        Ok(match from_sequence {
            Some(seq) => match parent.sequence_numbers.iter().position(|s| *s == seq) {
                Some(pos) => (parent.sequence_numbers[..=pos].to_vec(), Some(seq)),
                None => (Vec::new(), Some(seq)),
            },
            None => (
                parent.sequence_numbers.clone(),
                parent.sequence_numbers.last().copied(),
            ),
        })
    }

    /// Forks the active branch. The new branch copies the parent's sequence list up
    /// to and including `from_sequence` (the whole list when absent).
    pub fn fork(&mut self, new_id: &str, from_sequence: Option<u32>) -> Result<&Branch> {
        let new_id = new_id.trim();
        if new_id.is_empty() {
            return Err(ThinkingError::MissingBranchId);
        }
        if self.branches.contains_key(new_id) {
            return Err(ThinkingError::DuplicateBranch(new_id.to_string()));
        }
        if self.branches.len() >= self.max_branches {
            return Err(ThinkingError::BranchLimitExceeded {
                limit: self.max_branches,
            });
        }

        let (prefix, divergence_point) = self.fork_prefix(from_sequence)?;
        let parent = self.get(&self.active)?;
        if let (Some(seq), true) = (from_sequence, prefix.is_empty()) {
            log::warn!(
                "fork '{new_id}': sequence {seq} not found in '{}', starting empty",
                parent.id
            );
        }

        let mut branch = Branch::new(new_id);
        branch.parent = Some(parent.id.clone());
        branch.divergence_point = divergence_point;
        branch.origins = prefix
            .iter()
            .map(|seq| (*seq, parent.owner_of(*seq).to_string()))
            .collect();
        // Scores live in the thought store; the session refreshes the average.
        branch.metrics.count = prefix.len();
        branch.sequence_numbers = prefix;
        log::debug!("forked '{new_id}' from '{}' at {divergence_point:?}", parent.id);

        Ok(self.branches.entry(new_id.to_string()).or_insert(branch))
    }

    pub fn switch_to(&mut self, id: &str) -> Result<()> {
        if !self.branches.contains_key(id) {
            return Err(ThinkingError::UnknownBranch(id.to_string()));
        }
        self.active = id.to_string();
        Ok(())
    }

    /// Appends to `branch_id` (default: active). A sequence number already present
    /// is not appended again; the branch is flagged instead.
    pub fn append(
        &mut self,
        sequence_number: u32,
        branch_id: Option<&str>,
        score: f64,
    ) -> Result<AppendOutcome> {
        let id = branch_id.unwrap_or(self.active.as_str()).to_string();
        let branch = self.get_mut(&id)?;
        if branch.contains(sequence_number) {
            log::warn!("sequence {sequence_number} already recorded on '{id}'");
            branch.metrics.has_cycle = true;
            return Ok(AppendOutcome::Duplicate);
        }
        branch.sequence_numbers.push(sequence_number);
        branch.metrics.record(score);
        Ok(AppendOutcome::Appended)
    }

    pub fn compare(&self, first: &str, second: &str) -> Result<BranchComparison> {
        let a: BTreeSet<u32> = self.get(first)?.sequence_numbers.iter().copied().collect();
        let b: BTreeSet<u32> = self.get(second)?.sequence_numbers.iter().copied().collect();
        Ok(BranchComparison {
            common: a.intersection(&b).copied().collect(),
            only_in_first: a.difference(&b).copied().collect(),
            only_in_second: b.difference(&a).copied().collect(),
        })
    }

    /// Unions `source` into `target`, sorted numerically. Merged-in numbers keep
    /// pointing at the thoughts they had on `source`, which stays until removed
    /// explicitly. Only the count is updated here.
    pub fn merge(&mut self, source: &str, target: &str) -> Result<MergeOutcome> {
        let comparison = self.compare(source, target)?;
        if comparison.common.is_empty() {
            return Err(ThinkingError::NoCommonAncestor {
                source_id: source.to_string(),
                target_id: target.to_string(),
            });
        }

        let source_branch = self.get(source)?;
        let adopted: Vec<(u32, String)> = comparison
            .only_in_first
            .iter()
            .map(|seq| (*seq, source_branch.owner_of(*seq).to_string()))
            .collect();

        let target_branch = self.get_mut(target)?;
        target_branch.origins.extend(adopted);
        let merged: BTreeSet<u32> = target_branch
            .sequence_numbers
            .iter()
            .chain(comparison.only_in_first.iter())
            .copied()
            .collect();
        target_branch.sequence_numbers = merged.into_iter().collect();
        target_branch.metrics.count = target_branch.sequence_numbers.len();
        let merged = target_branch.sequence_numbers.clone();

        if self.active == source {
            self.active = target.to_string();
        }
        log::info!(
            "merged '{source}' into '{target}' (+{})",
            comparison.only_in_first.len()
        );

        Ok(MergeOutcome {
            source: source.to_string(),
            target: target.to_string(),
            added: comparison.only_in_first.clone(),
            comparison,
            merged,
            active_branch: self.active.clone(),
        })
    }

    pub fn remove(&mut self, id: &str) -> Result<Branch> {
        if id == MAIN_BRANCH {
            return Err(ThinkingError::ProtectedBranch(id.to_string()));
        }
        let removed = self
            .branches
            .remove(id)
            .ok_or_else(|| ThinkingError::UnknownBranch(id.to_string()))?;
        if self.active == id {
            self.active = MAIN_BRANCH.to_string();
        }
        Ok(removed)
    }

    /// Empties a branch's sequence list and resets its metrics and state.
    pub fn clear(&mut self, id: &str) -> Result<()> {
        let branch = self.get_mut(id)?;
        branch.sequence_numbers.clear();
        branch.origins.clear();
        branch.metrics = BranchMetrics::default();
        branch.state = BranchState::Active;
        Ok(())
    }

    pub fn metrics(&self, id: &str) -> Result<&BranchMetrics> {
        Ok(&self.get(id)?.metrics)
    }

    pub fn mark_cycle(&mut self, id: &str) -> Result<()> {
        let branch = self.get_mut(id)?;
        branch.metrics.has_cycle = true;
        branch.state = BranchState::CycleFlagged;
        Ok(())
    }

    pub fn set_state(&mut self, id: &str, state: BranchState) -> Result<()> {
        self.get_mut(id)?.state = state;
        Ok(())
    }

    /// Marks `sequence_number` as stored under `id` itself, e.g. after the branch
    /// rewrote an inherited thought.
    pub fn adopt(&mut self, id: &str, sequence_number: u32) -> Result<()> {
        self.get_mut(id)?.origins.remove(&sequence_number);
        Ok(())
    }

    /// Recomputes counts and averages from stored scores. `score_of` gets the
    /// owning branch and the sequence number; `has_cycle` is kept.
    pub fn recompute_metrics(&mut self, mut score_of: impl FnMut(&str, u32) -> Option<f64>) {
        for branch in self.branches.values_mut() {
            let mut metrics = BranchMetrics {
                has_cycle: branch.metrics.has_cycle,
                ..BranchMetrics::default()
            };
            for seq in &branch.sequence_numbers {
                match score_of(branch.owner_of(*seq), *seq) {
                    Some(score) => metrics.record(score),
                    None => metrics.count += 1,
                }
            }
            branch.metrics = metrics;
        }
    }

    pub fn get(&self, id: &str) -> Result<&Branch> {
        self.branches
            .get(id)
            .ok_or_else(|| ThinkingError::UnknownBranch(id.to_string()))
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Branch> {
        self.branches
            .get_mut(id)
            .ok_or_else(|| ThinkingError::UnknownBranch(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.branches.contains_key(id)
    }

    pub fn active(&self) -> &str {
        &self.active
    }

    /// Branch ids, `main` first.
    pub fn ids(&self) -> Vec<String> {
        let mut ids = vec![MAIN_BRANCH.to_string()];
        ids.extend(
            self.branches
                .keys()
                .filter(|id| id.as_str() != MAIN_BRANCH)
                .cloned(),
        );
        ids
    }

    pub fn summaries(&self) -> Vec<BranchSummary> {
        self.ids()
            .iter()
            .filter_map(|id| self.branches.get(id))
            .map(|branch| BranchSummary {
                id: branch.id.clone(),
                parent: branch.parent.clone(),
                divergence_point: branch.divergence_point,
                state: branch.state,
                length: branch.sequence_numbers.len(),
                is_active: branch.id == self.active,
                metrics: branch.metrics.clone(),
            })
            .collect()
    }

    /// Records for persistence, `main` first.
    pub fn snapshot(&self) -> Vec<BranchRecord> {
        self.ids()
            .iter()
            .filter_map(|id| self.branches.get(id))
            .map(Branch::record)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}
