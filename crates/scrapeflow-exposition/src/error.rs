//! Errors that make a single exposed family malformed.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpositionError {
    #[error("unknown metric type {0:?}")]
    UnknownType(String),

    #[error("conflicting TYPE lines: {first:?} then {second:?}")]
    ConflictingType { first: String, second: String },

    #[error("line {line}: malformed label set: {reason}")]
    InvalidLabels { line: usize, reason: String },

    #[error("line {line}: duplicate label {name:?}")]
    DuplicateLabel { line: usize, name: String },

    #[error("line {line}: missing sample value")]
    MissingValue { line: usize },

    #[error("line {line}: invalid sample value {value:?}")]
    InvalidValue { line: usize, value: String },

    #[error("line {line}: invalid timestamp {value:?}")]
    InvalidTimestamp { line: usize, value: String },

    #[error("line {line}: histogram bucket without \"le\" label")]
    MissingBucketBound { line: usize },
}
