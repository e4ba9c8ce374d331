//! Ingestion: declared atoms → canonical atoms → identities → ledger.
//!
//! ```text
//! raw text + DeclaredAtom[] ──atomize──► Atom[] ──identify──► StructuredPayload ──► RevisionLedger
//! ```
//!
//! Validation runs over every declared atom before anything is appended, so
//! a malformed atom leaves the ledger untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::canonical_text::canonicalize;
use crate::error::{Result, ValidationError};
use crate::ledger::{append_with_retry, AppendRequest, HeadExpectation, RetryPolicy, RevisionLedger};
use crate::types::{
    Atom, CanonicalSpan, DeclaredAtom, DocId, IdentityFlags, LifecycleEntry, Provenance, RevId,
    ScopeEntry, StructuredPayload,
};

/// Turn one declared atom into a canonical atom cut from `raw`.
pub fn atomize_one(raw: &str, declared: &DeclaredAtom) -> Result<Atom> {
    if declared.clause_id.is_empty() {
        return Err(ValidationError::EmptyClauseId.into());
    }
    let span = declared
        .span
        .ok_or_else(|| ValidationError::MissingSpan(declared.clause_id.clone()))?;

    let Some(slice) = raw.get(span.start..span.end) else {
        return Err(ValidationError::SpanOutOfBounds {
            clause_id: declared.clause_id.clone(),
            start: span.start,
            end: span.end,
            len: raw.len(),
        }
        .into());
    };

    let text = |s: &Option<String>| s.as_deref().map(canonicalize);
    Ok(Atom {
        clause_id: declared.clause_id.clone(),
        span: CanonicalSpan::new(span.start, span.end, canonicalize(slice)),
        actor: text(&declared.actor),
        action: text(&declared.action),
        object: text(&declared.object),
        scope: declared
            .scope
            .iter()
            .map(|s| ScopeEntry::new(s.category.clone(), canonicalize(&s.text)))
            .collect(),
        lifecycle: declared
            .lifecycle
            .iter()
            .map(|l| LifecycleEntry {
                kind: l.kind.clone(),
                text: canonicalize(&l.text),
                date: l.date,
            })
            .collect(),
        modality: declared.modality,
        references: declared.references.clone(),
    })
}

/// Atomize every declared atom, failing on the first invalid one.
pub fn atomize(raw: &str, declared: &[DeclaredAtom]) -> Result<Vec<Atom>> {
    declared.iter().map(|d| atomize_one(raw, d)).collect()
}

/// One revision's worth of extracted text and declared atoms.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestRequest {
    /// Target document.
    pub doc_id: DocId,
    /// Valid time.
    pub effective_date: NaiveDate,
    /// Raw text as extracted; span offsets index into it.
    pub raw_text: String,
    /// Declared atoms.
    pub atoms: Vec<DeclaredAtom>,
    /// Source provenance.
    pub provenance: Provenance,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Optimistic head check.
    pub expected_head: HeadExpectation,
    /// Revision this one corrects.
    pub corrects: Option<RevId>,
    /// Explicit system time.
    pub recorded_at: Option<DateTime<Utc>>,
}

impl IngestRequest {
    /// Create a request.
    pub fn new(
        doc_id: DocId,
        effective_date: NaiveDate,
        raw_text: impl Into<String>,
        provenance: Provenance,
    ) -> Self {
        Self {
            doc_id,
            effective_date,
            raw_text: raw_text.into(),
            atoms: Vec::new(),
            provenance,
            metadata: BTreeMap::new(),
            expected_head: HeadExpectation::Any,
            corrects: None,
            recorded_at: None,
        }
    }

    /// Add a declared atom.
    pub fn with_atom(mut self, atom: DeclaredAtom) -> Self {
        self.atoms.push(atom);
        self
    }

    /// Pin the recorded system time.
    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(at);
        self
    }

    /// Mark as a correction.
    pub fn correcting(mut self, rev_id: RevId) -> Self {
        self.corrects = Some(rev_id);
        self
    }

    /// Require a document head.
    pub fn expecting(mut self, head: HeadExpectation) -> Self {
        self.expected_head = head;
        self
    }

    /// Atomize and identify into an append request.
    pub fn into_append_request(&self, flags: &IdentityFlags) -> Result<AppendRequest> {
        let atoms = atomize(&self.raw_text, &self.atoms)?;
        Ok(AppendRequest {
            doc_id: self.doc_id.clone(),
            effective_date: self.effective_date,
            body: self.raw_text.clone(),
            provenance: self.provenance.clone(),
            metadata: self.metadata.clone(),
            payload: StructuredPayload::from_atoms(atoms, *flags),
            expected_head: self.expected_head,
            corrects: self.corrects,
            recorded_at: self.recorded_at,
        })
    }
}

/// Ingest one revision: canonicalize, identify and append.
pub async fn ingest<L>(ledger: &L, request: &IngestRequest, flags: &IdentityFlags) -> Result<RevId>
where
    L: RevisionLedger + ?Sized,
{
    let append = request.into_append_request(flags)?;
    ledger.append_revision(&append).await
}

/// Like [`ingest`], retrying contended appends under `policy`.
pub async fn ingest_with_retry<L>(
    ledger: &L,
    request: &IngestRequest,
    flags: &IdentityFlags,
    policy: &RetryPolicy,
) -> Result<RevId>
where
    L: RevisionLedger + ?Sized,
{
    let append = request.into_append_request(flags)?;
    append_with_retry(ledger, &append, policy).await
}
