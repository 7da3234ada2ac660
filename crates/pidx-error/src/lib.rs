//! Error types shared by every PIDX crate.
//!
//! All failures in the indexing and aggregation pipeline surface as a single
//! [`PidxError`]. None of them are transient: the round orchestrator decides
//! whether to abort the whole I/O operation, and nothing below it retries.

use std::collections::TryReserveError;

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, PidxError>;

/// Coarse classification of a [`PidxError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller supplied malformed or incomplete input (unset patch count,
    /// unset max level, invalid box, bad template).
    Precondition,
    /// Metadata shared between ranks disagrees with what a transfer or index
    /// lookup needs.
    Consistency,
    /// A one-sided or collective transport call failed.
    Transport,
    /// A buffer or table could not be allocated.
    Resource,
}

impl ErrorCategory {
    /// Stable label used in logs and diagnostics events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Precondition => "precondition",
            Self::Consistency => "consistency",
            Self::Transport => "transport",
            Self::Resource => "resource",
        }
    }
}

/// The discriminated error type for the whole pipeline.
#[derive(Debug, Error)]
pub enum PidxError {
    /// A required piece of metadata is missing or out of its legal domain.
    #[error("precondition violated: {what}")]
    Precondition { what: String },

    /// A box failed the `0 <= lower <= upper` check.
    #[error("malformed box: {detail}")]
    MalformedBox { detail: String },

    /// A bit pattern string could not be parsed or is out of range.
    #[error("invalid bit pattern '{pattern}': {detail}")]
    InvalidBitPattern { pattern: String, detail: String },

    /// A filename template uses placeholders the expander cannot handle.
    #[error("unsupported filename template '{template}': {detail}")]
    UnsupportedTemplate { template: String, detail: String },

    /// A numeric value does not fit the range it is used in.
    #[error("{what} out of range: {value}")]
    OutOfRange { what: String, value: String },

    /// A computed in-file displacement lies outside the owner slot space.
    #[error(
        "displacement out of range for file {file} variable {variable}: {displacement} (capacity {capacity})"
    )]
    DisplacementOutOfRange {
        file: u64,
        variable: usize,
        displacement: i128,
        capacity: u64,
    },

    /// A file claims more samples than it can physically hold.
    #[error("file {file} holds {samples} samples, exceeding capacity {capacity}")]
    FileCapacityExceeded {
        file: u64,
        samples: u64,
        capacity: u64,
    },

    /// An offset lookup targeted a block that the layout marks absent.
    #[error("block {block} is absent from the block layout")]
    AbsentBlock { block: u64 },

    /// Any other disagreement between sender metadata and the layout.
    #[error("inconsistent metadata: {detail}")]
    Inconsistent { detail: String },

    /// A transport operation returned failure.
    #[error("transport {op} targeting rank {rank} failed: {detail}")]
    Transport {
        op: &'static str,
        rank: usize,
        detail: String,
    },

    /// Allocation of a buffer or table failed.
    #[error("failed to allocate {bytes} bytes for {what}")]
    ResourceExhausted { what: String, bytes: usize },

    /// Invariant breakage inside the pipeline itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PidxError {
    /// Shorthand for [`PidxError::Internal`].
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    /// Shorthand for [`PidxError::Precondition`].
    pub fn precondition(what: impl Into<String>) -> Self {
        Self::Precondition { what: what.into() }
    }

    /// Shorthand for [`PidxError::Inconsistent`].
    pub fn inconsistent(detail: impl Into<String>) -> Self {
        Self::Inconsistent {
            detail: detail.into(),
        }
    }

    /// Shorthand for [`PidxError::OutOfRange`].
    pub fn out_of_range(what: impl Into<String>, value: impl ToString) -> Self {
        Self::OutOfRange {
            what: what.into(),
            value: value.to_string(),
        }
    }

    /// Wrap a failed `try_reserve` into [`PidxError::ResourceExhausted`].
    pub fn allocation(what: impl Into<String>, bytes: usize, _source: TryReserveError) -> Self {
        Self::ResourceExhausted {
            what: what.into(),
            bytes,
        }
    }

    /// Which branch of the error taxonomy this error belongs to.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Precondition { .. }
            | Self::MalformedBox { .. }
            | Self::InvalidBitPattern { .. }
            | Self::UnsupportedTemplate { .. }
            | Self::OutOfRange { .. } => ErrorCategory::Precondition,
            Self::DisplacementOutOfRange { .. }
            | Self::FileCapacityExceeded { .. }
            | Self::AbsentBlock { .. }
            | Self::Inconsistent { .. }
            | Self::Internal(_) => ErrorCategory::Consistency,
            Self::Transport { .. } => ErrorCategory::Transport,
            Self::ResourceExhausted { .. } => ErrorCategory::Resource,
        }
    }

    /// Whether the caller may retry. Always `false`: partial completion of an
    /// epoch cannot be resumed and metadata mismatches do not heal.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        false
    }

    /// Numeric code, stable across releases, for callers that report errors
    /// through integer status channels.
    #[must_use]
    pub const fn error_code(&self) -> i32 {
        match self {
            Self::Precondition { .. } => 1,
            Self::MalformedBox { .. } => 2,
            Self::InvalidBitPattern { .. } => 3,
            Self::UnsupportedTemplate { .. } => 4,
            Self::OutOfRange { .. } => 5,
            Self::DisplacementOutOfRange { .. } => 10,
            Self::FileCapacityExceeded { .. } => 11,
            Self::AbsentBlock { .. } => 12,
            Self::Inconsistent { .. } => 13,
            Self::Transport { .. } => 20,
            Self::ResourceExhausted { .. } => 30,
            Self::Internal(_) => 99,
        }
    }
}
