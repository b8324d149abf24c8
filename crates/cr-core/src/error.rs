//! Error types for rule validation, storage and engine operations.

use crate::types::RuleKind;

/// A pattern that is not valid for its declared match kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("Pattern is empty")]
    Empty,
    #[error("Not an absolute URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid domain pattern: {0}")]
    InvalidDomain(String),
    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),
    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
}

/// Failures reported by a rule store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate rule id: {0}")]
    DuplicateId(String),
    #[error("Rule not found: {0}")]
    NotFound(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Error type for engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("A {0} rule requires a container")]
    MissingContainer(RuleKind),
    #[error("Unknown container: {0}")]
    UnknownContainer(String),
    #[error("Rule not found: {0}")]
    RuleNotFound(String),
    #[error("Rule store error: {0}")]
    Store(#[from] StoreError),
}
