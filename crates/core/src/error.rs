use thiserror::Error;

pub type Result<T> = std::result::Result<T, ThinkingError>;

/// Rejections of a caller request. Nothing is mutated when one is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThinkingError {
    #[error("Thought text must not be empty")]
    EmptyThought,

    #[error("Sequence number must be positive, got {0}")]
    InvalidSequence(i64),

    #[error("Expected at least {min} total thoughts, got {actual}")]
    TooFewThoughts { min: u32, actual: i64 },

    #[error("Score must be within 0..=10, got {0}")]
    InvalidScore(f64),

    #[error("Revision needs a revises_sequence listed on the branch")]
    RevisionWithoutTarget,

    #[error("Branch id must not be empty")]
    MissingBranchId,

    #[error("Unknown branch: {0}")]
    UnknownBranch(String),

    #[error("Branch already exists: {0}")]
    DuplicateBranch(String),

    #[error("Branch limit of {limit} reached")]
    BranchLimitExceeded { limit: usize },

    #[error("Branches '{source_id}' and '{target_id}' share no thoughts")]
    NoCommonAncestor { source_id: String, target_id: String },

    #[error("Branch '{0}' cannot be removed")]
    ProtectedBranch(String),

    #[error("No reflection input is pending")]
    NoPendingInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::State => "state",
        }
    }
}

impl ThinkingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyThought
            | Self::InvalidSequence(_)
            | Self::TooFewThoughts { .. }
            | Self::InvalidScore(_)
            | Self::RevisionWithoutTarget
            | Self::MissingBranchId => ErrorKind::Validation,
            Self::UnknownBranch(_)
            | Self::DuplicateBranch(_)
            | Self::BranchLimitExceeded { .. }
            | Self::NoCommonAncestor { .. }
            | Self::ProtectedBranch(_)
            | Self::NoPendingInput => ErrorKind::State,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyThought => "empty_thought",
            Self::InvalidSequence(_) => "invalid_sequence",
            Self::TooFewThoughts { .. } => "too_few_thoughts",
            Self::InvalidScore(_) => "invalid_score",
            Self::RevisionWithoutTarget => "revision_without_target",
            Self::MissingBranchId => "missing_branch_id",
            Self::UnknownBranch(_) => "unknown_branch",
            Self::DuplicateBranch(_) => "duplicate_branch",
            Self::BranchLimitExceeded { .. } => "branch_limit_exceeded",
            Self::NoCommonAncestor { .. } => "no_common_ancestor",
            Self::ProtectedBranch(_) => "protected_branch",
            Self::NoPendingInput => "no_pending_input",
        }
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Persistence failures. Callers log these and keep the in-memory state.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_split_validation_from_state() {
        assert_eq!(ThinkingError::EmptyThought.kind(), ErrorKind::Validation);
        assert_eq!(ThinkingError::MissingBranchId.kind(), ErrorKind::Validation);
        assert_eq!(
            ThinkingError::ProtectedBranch("main".into()).kind(),
            ErrorKind::State
        );
        assert_eq!(
            ThinkingError::BranchLimitExceeded { limit: 3 }.to_string(),
            "Branch limit of 3 reached"
        );
    }
}
