//! Reflection checkpoint policy.
//!
//! [`should_reflect`] is a pure function over one submission's facts; the caller
//! owns the interaction counter and resets it only for periodic checkpoints.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionTrigger {
    Periodic,
    FinalThought,
    Requested,
    CycleDetected,
    LowScore,
    NewBranch,
    Revision,
    Milestone,
}

/// Scores strictly below this request a checkpoint.
pub const LOW_SCORE_THRESHOLD: f64 = 3.0;

/// Progress fractions (numerator, denominator) treated as milestones.
const MILESTONES: &[(u32, u32)] = &[(1, 4), (1, 2), (3, 4)];

/// Follow-up questions attached to a pending input request, per trigger.
const PROMPTS: &[(ReflectionTrigger, &str)] = &[
    (
        ReflectionTrigger::CycleDetected,
        "This thought closely repeats an earlier one. What new information or angle would move the reasoning forward?",
    ),
    (
        ReflectionTrigger::LowScore,
        "Confidence in this step is low. Which assumption is weakest, and how could it be checked?",
    ),
    (
        ReflectionTrigger::Revision,
        "A previous step was revised. Which later conclusions depend on it and need re-checking?",
    ),
    (
        ReflectionTrigger::NewBranch,
        "A new branch was opened. What distinguishes this line of reasoning from its parent?",
    ),
    (
        ReflectionTrigger::Milestone,
        "A progress milestone was reached. Is the plan still on track for the remaining steps?",
    ),
    (
        ReflectionTrigger::FinalThought,
        "This is the final thought. Does the conclusion answer the original question completely?",
    ),
    (
        ReflectionTrigger::Requested,
        "Reflection was requested. Summarize the current state and open questions.",
    ),
    (
        ReflectionTrigger::Periodic,
        "Periodic checkpoint. Summarize progress so far and confirm the next step.",
    ),
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReflectionInputs {
    /// Submissions since the last periodic checkpoint, including this one
    pub interaction_count: u32,
    pub reflection_interval: u32,
    pub thought_number: u32,
    pub total_thoughts: u32,
    pub next_thought_needed: bool,
    pub score: f64,
    pub has_cycle: bool,
    pub is_revision: bool,
    pub is_new_branch: bool,
    pub explicit_request: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ReflectionDecision {
    pub due: bool,
    pub triggers: Vec<ReflectionTrigger>,
}

impl ReflectionDecision {
    /// Whether the interaction counter should restart.
    pub fn resets_interval(&self) -> bool {
        self.triggers.contains(&ReflectionTrigger::Periodic)
    }

    pub fn prompts(&self) -> Vec<String> {
        PROMPTS
            .iter()
            .filter(|(trigger, _)| self.triggers.contains(trigger))
            .map(|(_, prompt)| (*prompt).to_string())
            .collect()
    }
}

pub fn should_reflect(inputs: &ReflectionInputs) -> ReflectionDecision {
    let checks = [
        (
            ReflectionTrigger::Periodic,
            inputs.reflection_interval > 0
                && inputs.interaction_count > 0
                && inputs.interaction_count % inputs.reflection_interval == 0,
        ),
        (ReflectionTrigger::FinalThought, !inputs.next_thought_needed),
        (ReflectionTrigger::Requested, inputs.explicit_request),
        (ReflectionTrigger::CycleDetected, inputs.has_cycle),
        (ReflectionTrigger::LowScore, inputs.score < LOW_SCORE_THRESHOLD),
        (ReflectionTrigger::NewBranch, inputs.is_new_branch),
        (ReflectionTrigger::Revision, inputs.is_revision),
        (
            ReflectionTrigger::Milestone,
            is_milestone(inputs.thought_number, inputs.total_thoughts),
        ),
    ];
    let triggers: Vec<ReflectionTrigger> = checks
        .into_iter()
        .filter_map(|(trigger, fired)| fired.then_some(trigger))
        .collect();
    ReflectionDecision {
        due: !triggers.is_empty(),
        triggers,
    }
}

/// Exact ratio match: `thought / total == num / den`, compared by cross-multiplying.
pub fn is_milestone(thought_number: u32, total_thoughts: u32) -> bool {
    if total_thoughts == 0 {
        return false;
    }
    MILESTONES.iter().any(|(num, den)| {
        u64::from(thought_number) * u64::from(*den) == u64::from(total_thoughts) * u64::from(*num)
    })
}
