//! Revision ledger backends.
//!
//! The ledger is an append-only, bitemporal store of `Document → Revision`.
//! Valid time is the revision's `effective_date`; system time is its
//! `recorded_from` plus a `recorded_to` derived from later corrections.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::canonical_text::canonicalize;
use crate::error::{ConflictReason, KernelError, Result, ValidationError};
use crate::types::{DocId, Provenance, RevId, Revision, RevisionRecord, StructuredPayload};

/// What the writer believes the document head to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadExpectation {
    /// No optimistic check; the per-document lock still serializes writers.
    #[default]
    Any,
    /// The document must have no revisions yet.
    Empty,
    /// The document head must be exactly this revision.
    At(RevId),
}

impl HeadExpectation {
    /// Check against the actual head; a mismatch is a stale-head conflict.
    pub fn check(&self, doc_id: &DocId, actual: Option<RevId>) -> Result<()> {
        let expected = match self {
            Self::Any => return Ok(()),
            Self::Empty => None,
            Self::At(rev) => Some(*rev),
        };
        if expected == actual {
            Ok(())
        } else {
            Err(KernelError::Conflict {
                doc_id: doc_id.clone(),
                reason: ConflictReason::StaleHead { expected, actual },
            })
        }
    }
}

/// A request to append one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendRequest {
    /// Target document.
    pub doc_id: DocId,
    /// Valid time of the new revision.
    pub effective_date: NaiveDate,
    /// Body text; canonicalized by the ledger.
    pub body: String,
    /// Source provenance.
    pub provenance: Provenance,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Atoms with identities and flags.
    pub payload: StructuredPayload,
    /// Optimistic head check.
    pub expected_head: HeadExpectation,
    /// Revision this one corrects.
    pub corrects: Option<RevId>,
    /// Explicit system time; defaults to the ledger clock.
    pub recorded_at: Option<DateTime<Utc>>,
}

impl AppendRequest {
    /// Create a request with an empty payload.
    pub fn new(
        doc_id: DocId,
        effective_date: NaiveDate,
        body: impl Into<String>,
        provenance: Provenance,
    ) -> Self {
        Self {
            doc_id,
            effective_date,
            body: body.into(),
            provenance,
            metadata: BTreeMap::new(),
            payload: StructuredPayload::default(),
            expected_head: HeadExpectation::Any,
            corrects: None,
            recorded_at: None,
        }
    }

    /// Set the structured payload.
    pub fn with_payload(mut self, payload: StructuredPayload) -> Self {
        self.payload = payload;
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Require a document head.
    pub fn expecting(mut self, head: HeadExpectation) -> Self {
        self.expected_head = head;
        self
    }

    /// Mark this revision as a correction of `rev_id`.
    pub fn correcting(mut self, rev_id: RevId) -> Self {
        self.corrects = Some(rev_id);
        self
    }

    /// Pin the recorded system time.
    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(at);
        self
    }

    /// Checks that need no ledger state.
    pub fn validate(&self) -> Result<()> {
        if self.doc_id.as_str().trim().is_empty() {
            return Err(ValidationError::EmptyDocId.into());
        }
        if self.provenance.origin.trim().is_empty() {
            return Err(ValidationError::EmptyOrigin.into());
        }
        for entry in &self.payload.atoms {
            if entry.atom.clause_id.is_empty() {
                return Err(ValidationError::EmptyClauseId.into());
            }
        }
        match self.payload.verify() {
            Err(KernelError::IdentityMismatch { subject, .. }) => {
                Err(ValidationError::InconsistentPayload { clause_id: subject }.into())
            }
            other => other,
        }
    }

    /// Resolve the recorded time against the document's last recorded time.
    ///
    /// An explicit time may not precede `last`; the clock is clamped to it so
    /// system time never runs backwards within a document.
    pub(crate) fn resolve_recorded_from(
        &self,
        last: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>> {
        match (self.recorded_at, last) {
            (Some(requested), Some(last)) if requested < last => {
                Err(ValidationError::RecordedTimeRegression {
                    requested: requested.to_rfc3339(),
                    last: last.to_rfc3339(),
                }
                .into())
            }
            (Some(requested), _) => Ok(requested),
            (None, Some(last)) => Ok(Utc::now().max(last)),
            (None, None) => Ok(Utc::now()),
        }
    }

    /// Build the immutable revision once the id and recorded time are known.
    pub(crate) fn build_revision(
        &self,
        rev_id: RevId,
        recorded_from: DateTime<Utc>,
    ) -> Result<Revision> {
        let body = canonicalize(&self.body);
        let checksum = Revision::compute_checksum(&body, &self.payload)?;
        Ok(Revision {
            doc_id: self.doc_id.clone(),
            rev_id,
            effective_date: self.effective_date,
            recorded_from,
            corrects: self.corrects,
            metadata: self.metadata.clone(),
            body,
            checksum,
            provenance: self.provenance.clone(),
            payload: self.payload.clone(),
        })
    }
}

/// Trait for revision ledger backends.
///
/// Implementations must serialize writes per document, never overwrite a
/// recorded revision, and return `NotFound` rather than a default.
#[async_trait]
pub trait RevisionLedger: Send + Sync {
    /// Append a revision and return its id.
    async fn append_revision(&self, request: &AppendRequest) -> Result<RevId>;

    /// Fetch one revision.
    async fn get_revision(&self, doc_id: &DocId, rev_id: RevId) -> Result<Revision>;

    /// Currently-believed revision with the greatest `effective_date <= as_of`.
    async fn get_as_of(&self, doc_id: &DocId, as_of: NaiveDate) -> Result<Revision>;

    /// Same question, answered with what the ledger believed at `recorded_at`.
    async fn get_as_of_recorded(
        &self,
        doc_id: &DocId,
        as_of: NaiveDate,
        recorded_at: DateTime<Utc>,
    ) -> Result<Revision>;

    /// Most recently appended revision.
    async fn get_latest(&self, doc_id: &DocId) -> Result<Revision>;

    /// All revisions in `rev_id` order with derived `recorded_to`.
    async fn history(&self, doc_id: &DocId) -> Result<Vec<RevisionRecord>>;

    /// All documents in ascending order.
    async fn documents(&self) -> Result<Vec<DocId>>;
}

/// Bounded exponential backoff for contended appends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

/// Append with bounded retry on contention.
///
/// Only `Conflict { reason: Contention }` is retried. A stale head needs the
/// caller to re-read the document, so it is returned at once, as is every
/// other error.
pub async fn append_with_retry<L>(
    ledger: &L,
    request: &AppendRequest,
    policy: &RetryPolicy,
) -> Result<RevId>
where
    L: RevisionLedger + ?Sized,
{
    let attempts = policy.max_attempts.max(1);
    let mut retry = 0;
    loop {
        match ledger.append_revision(request).await {
            Ok(rev_id) => return Ok(rev_id),
            Err(err) if err.is_contention() && retry + 1 < attempts => {
                let delay = policy.backoff(retry);
                tracing::warn!(
                    doc_id = %request.doc_id,
                    attempt = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Append contended, retrying"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

pub use memory::InMemoryLedger;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresLedger};
