use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThoughtMetadata {
    pub is_revision: bool,
    pub revises_sequence: Option<u32>,
    pub forked_from_sequence: Option<u32>,
    pub total_thoughts: u32,
    pub next_thought_needed: bool,
}

/// One submitted reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtEntry {
    pub text: String,
    pub sequence_number: u32,
    pub branch_id: String,
    /// Self-assessed quality, 0..=10
    pub score: f64,
    /// Unix milliseconds
    pub timestamp: u64,
    /// Position in insertion order, assigned by [`ThoughtStore::upsert`]
    #[serde(default)]
    pub ordinal: u64,
    #[serde(default)]
    pub metadata: ThoughtMetadata,
}

impl ThoughtEntry {
    pub fn key(&self) -> (u32, &str) {
        (self.sequence_number, self.branch_id.as_str())
    }
}

/// Canonical thought list in insertion order.
///
/// Entries are unique per `(sequence_number, branch_id)`. Ordinals grow
/// strictly along the list and survive in-place replacement, so a reload that
/// sorts by ordinal restores the same order. Retention is a global sliding
/// window, so an idle branch can lose its oldest thoughts before the active one
/// does.
#[derive(Debug, Clone, Default)]
pub struct ThoughtStore {
    entries: Vec<ThoughtEntry>,
    next_ordinal: u64,
}

impl ThoughtStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<ThoughtEntry>) -> Self {
        let mut store = Self::new();
        store.replace_all(entries);
        store
    }

    /// Replaces the entry with the same key in place, keeping its ordinal,
    /// otherwise appends with the next ordinal (or the entry's own, if higher).
    /// Returns `true` when an existing entry was replaced.
    pub fn upsert(&mut self, mut entry: ThoughtEntry) -> bool {
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|existing| existing.key() == entry.key())
        {
            entry.ordinal = slot.ordinal;
            *slot = entry;
            return true;
        }
        entry.ordinal = entry.ordinal.max(self.next_ordinal);
        self.next_ordinal = entry.ordinal + 1;
        self.entries.push(entry);
        false
    }

    pub fn get(&self, sequence_number: u32, branch_id: &str) -> Option<&ThoughtEntry> {
        self.entries
            .iter()
            .find(|entry| entry.key() == (sequence_number, branch_id))
    }

    pub fn remove(&mut self, sequence_number: u32, branch_id: &str) -> Option<ThoughtEntry> {
        let pos = self
            .entries
            .iter()
            .position(|entry| entry.key() == (sequence_number, branch_id))?;
        Some(self.entries.remove(pos))
    }

    pub fn history_for(&self, branch_id: &str) -> Vec<&ThoughtEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.branch_id == branch_id)
            .collect()
    }

    /// Drops the globally oldest entries until at most `max_history_size` remain.
    pub fn enforce_retention(&mut self, max_history_size: usize) -> Vec<ThoughtEntry> {
        if self.entries.len() <= max_history_size {
            return Vec::new();
        }
        let excess = self.entries.len() - max_history_size;
        let evicted: Vec<ThoughtEntry> = self.entries.drain(..excess).collect();
        log::debug!(
            "retention evicted {} thoughts (limit {max_history_size})",
            evicted.len()
        );
        evicted
    }

    pub fn clear_branch(&mut self, branch_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.branch_id != branch_id);
        before - self.entries.len()
    }

    /// Loads entries in the given order, keeping the last occurrence of any
    /// duplicated key at the position of its first occurrence.
    pub fn replace_all(&mut self, entries: Vec<ThoughtEntry>) {
        self.clear();
        for entry in entries {
            self.upsert(entry);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.next_ordinal = 0;
    }

    pub fn entries(&self) -> &[ThoughtEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn entry(sequence_number: u32, branch_id: &str, text: &str) -> ThoughtEntry {
    ThoughtEntry {
        text: text.to_string(),
        sequence_number,
        branch_id: branch_id.to_string(),
        score: 5.0,
        timestamp: 0,
        ordinal: 0,
        metadata: ThoughtMetadata::default(),
    }
}
