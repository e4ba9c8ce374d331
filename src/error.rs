//! Error types for the obligation kernel.
//!
//! ## Error Classes
//!
//! | Variant | Meaning | Retryable |
//! |---------|---------|-----------|
//! | `NotFound` | No document, revision, as-of match or clause | no |
//! | `Conflict` | Concurrent append on the same document | **yes** |
//! | `Validation` | Malformed input, rejected before any ledger mutation | no |
//! | `IdentityMismatch` | Canonicalization/hashing regression | no (fatal) |
//!
//! Nothing in this crate converts an error into a default obligation,
//! identity or diff entry.

use chrono::NaiveDate;

use crate::types::{ClauseId, DocId, RevId};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KernelError>;

/// Top-level error for every kernel operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(#[from] NotFound),

    /// A concurrent append on the same document was detected.
    #[error("conflict on document {doc_id}: {reason}")]
    Conflict {
        /// Document whose append raced.
        doc_id: DocId,
        /// What kind of conflict was detected.
        reason: ConflictReason,
    },

    /// Malformed input.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A recomputed identity or checksum did not reproduce the stored one.
    #[error("identity mismatch for {subject}: expected {expected}, computed {computed}")]
    IdentityMismatch {
        /// Clause id or revision the check ran against.
        subject: String,
        /// Stored value.
        expected: String,
        /// Recomputed value.
        computed: String,
    },

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl KernelError {
    /// Only conflicts may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// True for lock or uniqueness contention, where re-issuing the same
    /// request can succeed.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::Conflict {
                reason: ConflictReason::Contention,
                ..
            }
        )
    }
}

/// Lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFound {
    /// Document has never been appended to.
    #[error("document {0}")]
    Document(DocId),

    /// Revision id does not exist for the document.
    #[error("revision {rev_id} of document {doc_id}")]
    Revision {
        /// Document.
        doc_id: DocId,
        /// Missing revision.
        rev_id: RevId,
    },

    /// No revision has `effective_date <= as_of`.
    #[error("no revision of document {doc_id} effective on or before {as_of}")]
    AsOf {
        /// Document.
        doc_id: DocId,
        /// Requested valid-time date.
        as_of: NaiveDate,
    },

    /// No atom carries the clause id.
    #[error("clause {0}")]
    Clause(ClauseId),
}

/// Why an append was rejected as a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The caller's view of the document head is out of date.
    StaleHead {
        /// Head the caller expected (`None` = empty document).
        expected: Option<RevId>,
        /// Actual head at commit time.
        actual: Option<RevId>,
    },
    /// Another writer held the document, or won the `(doc_id, rev_id)` race.
    Contention,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |r: &Option<RevId>| r.map(|r| r.to_string()).unwrap_or_else(|| "empty".into());
        match self {
            Self::StaleHead { expected, actual } => {
                write!(f, "stale head (expected {}, actual {})", show(expected), show(actual))
            }
            Self::Contention => write!(f, "concurrent writer"),
        }
    }
}

/// Input rejected before any state change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Atom declared without a canonical span reference.
    #[error("atom {0} has no canonical span reference")]
    MissingSpan(ClauseId),

    /// Atom declared with an empty clause id.
    #[error("atom has an empty clause id")]
    EmptyClauseId,

    /// Span offsets outside the raw text or not on a char boundary.
    #[error("span {start}..{end} of clause {clause_id} is invalid for text of length {len}")]
    SpanOutOfBounds {
        /// Clause the span belongs to.
        clause_id: ClauseId,
        /// Start byte offset.
        start: usize,
        /// End byte offset.
        end: usize,
        /// Raw text length in bytes.
        len: usize,
    },

    /// Span text to cover was not found in the raw text.
    #[error("span text `{needle}` of clause {clause_id} not found in raw text")]
    SpanNotFound {
        /// Clause the span was declared for.
        clause_id: ClauseId,
        /// Text that was searched for.
        needle: String,
    },

    /// Query filter field not in the supported set.
    #[error("unknown filter field `{0}`")]
    UnknownFilter(String),

    /// Filter value of the wrong shape.
    #[error("invalid value for filter `{field}`: {message}")]
    InvalidFilter {
        /// Filter field.
        field: String,
        /// Parser message.
        message: String,
    },

    /// Projection view not in `{actor, action, clause, timeline}`.
    #[error("unsupported view `{0}`")]
    UnsupportedView(String),

    /// Document id is empty.
    #[error("document id must not be empty")]
    EmptyDocId,

    /// Provenance without an origin.
    #[error("provenance origin must not be empty")]
    EmptyOrigin,

    /// Explicit recorded time earlier than the document's last recorded time.
    #[error("recorded time {requested} precedes last recorded time {last}")]
    RecordedTimeRegression {
        /// Requested system time.
        requested: String,
        /// Latest system time already recorded.
        last: String,
    },

    /// Correction target does not exist or was already superseded.
    #[error("revision {0} cannot be corrected")]
    InvalidCorrection(RevId),

    /// Stored identities were not computed under the payload's flags.
    #[error("payload identities do not match recorded flags for clause `{clause_id}`")]
    InconsistentPayload {
        /// First clause whose identities failed to reproduce.
        clause_id: String,
    },

    /// Two identity flag configurations were mixed in one comparison.
    #[error("identity flags differ ({left} vs {right})")]
    IncompatibleFlags {
        /// Left-hand flags.
        left: String,
        /// Right-hand flags.
        right: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        let conflict = KernelError::Conflict {
            doc_id: DocId::new("doc"),
            reason: ConflictReason::Contention,
        };
        assert!(conflict.is_retryable());
        assert!(conflict.is_contention());

        let stale = KernelError::Conflict {
            doc_id: DocId::new("doc"),
            reason: ConflictReason::StaleHead { expected: None, actual: Some(RevId::new(1)) },
        };
        assert!(stale.is_retryable());
        assert!(!stale.is_contention());

        let not_found: KernelError = NotFound::Document(DocId::new("doc")).into();
        assert!(!not_found.is_retryable());

        let invalid: KernelError = ValidationError::EmptyDocId.into();
        assert!(!invalid.is_retryable());
    }

    #[test]
    fn test_conflict_display() {
        let err = KernelError::Conflict {
            doc_id: DocId::new("regs/a"),
            reason: ConflictReason::StaleHead { expected: Some(RevId::new(1)), actual: Some(RevId::new(2)) },
        };
        assert_eq!(
            err.to_string(),
            "conflict on document regs/a: stale head (expected 1, actual 2)"
        );
    }
}
