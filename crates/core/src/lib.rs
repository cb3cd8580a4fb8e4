//! # Thinking Core
//!
//! Branchable thought history for step-by-step reasoning agents.
//!
//! ## Flow of one submission
//!
//! ```text
//! SubmitThought
//!   → validate (no mutation on error)
//!   → resolve branch (fork unknown ids from the active branch)
//!   → ThoughtStore::upsert + BranchTree::append (or rewrite a listed slot)
//!   → CompositeDetector (thinking-cycles) over the branch's prior thoughts
//!   → should_reflect → PendingInputRequest
//!   → retention window (evicted thoughts leave storage too)
//!   → StorageProvider (failures become warnings)
//! ```
//!
//! [`ThinkingSession`] owns all state. It is meant to sit behind a single async
//! mutex, so one request is in flight at a time.

mod branch;
mod config;
mod error;
mod reflection;
mod session;
pub mod storage;
mod thought;
mod util;

pub use branch::{
    AppendOutcome, Branch, BranchComparison, BranchMetrics, BranchRecord, BranchState,
    BranchSummary, BranchTree, MergeOutcome, MAIN_BRANCH,
};
pub use config::{
    StorageBackend, StorageConfig, ThinkingConfig, DATA_DIR_NAME, DEFAULT_MAX_BRANCHES,
    DEFAULT_MAX_HISTORY_SIZE, DEFAULT_REFLECTION_INTERVAL, DEFAULT_SCORE,
};
pub use error::{ErrorKind, Result, StorageError, StorageResult, ThinkingError};
pub use reflection::{
    is_milestone, should_reflect, ReflectionDecision, ReflectionInputs, ReflectionTrigger,
    LOW_SCORE_THRESHOLD,
};
pub use session::{
    BranchHistory, ClearedBranch, InputReceipt, PendingInputRequest, Persisted, SessionOverview,
    SubmitOutcome, SubmitThought, ThinkingSession,
};
pub use storage::{storage_from_config, FileStorage, MemoryStorage, Snapshot, StorageProvider};
pub use thought::{ThoughtEntry, ThoughtMetadata, ThoughtStore};

pub use thinking_cycles::{Algorithm, CacheStats, CycleMatch, DetectorConfig};
