//! Atom types: the smallest declared normative unit attached to a canonical span.
//!
//! Atoms come from an upstream atom source that parses legal text. This crate
//! never infers a field; it only canonicalizes and stores what was declared.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::revision::{DocId, RevId};
use crate::error::{Result, ValidationError};

/// Identifier of the clause an atom was extracted from.
///
/// Ordered lexicographically; alignment tie-breaks use this order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClauseId(String);

impl ClauseId {
    /// Create a clause id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClauseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClauseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Declared deontic modality of an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Something must be done ("must", "shall").
    Obligation,
    /// Something must not be done.
    Prohibition,
    /// Something may be done.
    Permission,
    /// Something should be done.
    Recommendation,
    /// The atom source declared no modality.
    Unspecified,
}

impl Modality {
    /// Parse modality from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "obligation" => Some(Self::Obligation),
            "prohibition" => Some(Self::Prohibition),
            "permission" => Some(Self::Permission),
            "recommendation" => Some(Self::Recommendation),
            "unspecified" => Some(Self::Unspecified),
            _ => None,
        }
    }
}

impl Default for Modality {
    fn default() -> Self {
        Self::Unspecified
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Obligation => write!(f, "obligation"),
            Self::Prohibition => write!(f, "prohibition"),
            Self::Permission => write!(f, "permission"),
            Self::Recommendation => write!(f, "recommendation"),
            Self::Unspecified => write!(f, "unspecified"),
        }
    }
}

/// A declared scope qualifier, e.g. `retention_period: "10 years"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeEntry {
    /// Scope category as declared by the atom source.
    pub category: String,
    /// Literal scope text.
    pub text: String,
}

impl ScopeEntry {
    /// Create a scope entry.
    pub fn new(category: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            text: text.into(),
        }
    }
}

/// A declared lifecycle marker (commencement, deadline, expiry...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LifecycleEntry {
    /// Lifecycle kind as declared by the atom source.
    pub kind: String,
    /// Literal lifecycle text.
    pub text: String,
    /// Date anchor, when the source declared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl LifecycleEntry {
    /// Create a lifecycle entry without a date anchor.
    pub fn new(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            text: text.into(),
            date: None,
        }
    }

    /// Attach a date anchor.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }
}

/// Reference to the committed revision a span was cut from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RevisionRef {
    /// Document.
    pub doc_id: DocId,
    /// Revision.
    pub rev_id: RevId,
}

/// Canonicalized text slice, keyed by `(revision, offsets)`.
///
/// `start`/`end` are byte offsets into the raw text the atom source supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalSpan {
    /// Owning revision; `None` for ad-hoc atoms not read from the ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionRef>,
    /// Start byte offset in the raw text.
    pub start: usize,
    /// End byte offset in the raw text.
    pub end: usize,
    /// Canonical text of the span.
    pub text: String,
}

impl CanonicalSpan {
    /// Create a span from offsets and already-canonical text.
    pub fn new(start: usize, end: usize, text: impl Into<String>) -> Self {
        Self {
            revision: None,
            start,
            end,
            text: text.into(),
        }
    }

    /// Attach the owning revision.
    pub fn with_revision(mut self, revision: RevisionRef) -> Self {
        self.revision = Some(revision);
        self
    }
}

/// A normative atom with its declared fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Atom {
    /// Clause the atom was extracted from.
    pub clause_id: ClauseId,
    /// Canonical span reference.
    pub span: CanonicalSpan,
    /// Declared actor.
    #[serde(default)]
    pub actor: Option<String>,
    /// Declared action.
    #[serde(default)]
    pub action: Option<String>,
    /// Declared object of the action.
    #[serde(default)]
    pub object: Option<String>,
    /// Declared scope qualifiers, in declaration order.
    #[serde(default)]
    pub scope: Vec<ScopeEntry>,
    /// Declared lifecycle markers, in declaration order.
    #[serde(default)]
    pub lifecycle: Vec<LifecycleEntry>,
    /// Declared modality.
    #[serde(default)]
    pub modality: Modality,
    /// Declared external reference ids.
    #[serde(default)]
    pub references: Vec<String>,
}

impl Atom {
    /// Create an atom with only a clause id and span.
    pub fn new(clause_id: impl Into<ClauseId>, span: CanonicalSpan) -> Self {
        Self {
            clause_id: clause_id.into(),
            span,
            actor: None,
            action: None,
            object: None,
            scope: Vec::new(),
            lifecycle: Vec::new(),
            modality: Modality::Unspecified,
            references: Vec::new(),
        }
    }

    /// Set the actor.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set action and object.
    pub fn with_action(mut self, action: impl Into<String>, object: Option<&str>) -> Self {
        self.action = Some(action.into());
        self.object = object.map(str::to_string);
        self
    }

    /// Append a scope entry.
    pub fn with_scope(mut self, entry: ScopeEntry) -> Self {
        self.scope.push(entry);
        self
    }

    /// Append a lifecycle entry.
    pub fn with_lifecycle(mut self, entry: LifecycleEntry) -> Self {
        self.lifecycle.push(entry);
        self
    }

    /// Set the modality.
    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = modality;
        self
    }

    /// Append an external reference id.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.references.push(reference.into());
        self
    }

    /// Earliest lifecycle date anchor.
    pub fn date_anchor(&self) -> Option<NaiveDate> {
        self.lifecycle.iter().filter_map(|l| l.date).min()
    }

    /// Deterministic ordering key used for tie-breaks: clause, then offsets.
    pub(crate) fn order_key(&self) -> (&ClauseId, usize, usize) {
        (&self.clause_id, self.span.start, self.span.end)
    }
}

impl From<String> for ClauseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Raw byte offsets of a declared span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSpan {
    /// Start byte offset.
    pub start: usize,
    /// End byte offset.
    pub end: usize,
}

/// An atom exactly as the upstream atom source declares it.
///
/// Converted into an [`Atom`] by [`crate::ingest::atomize`], which slices
/// and canonicalizes the span text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredAtom {
    /// Clause id.
    pub clause_id: ClauseId,
    /// Span offsets into the raw text.
    #[serde(default)]
    pub span: Option<RawSpan>,
    /// Declared actor.
    #[serde(default)]
    pub actor: Option<String>,
    /// Declared action.
    #[serde(default)]
    pub action: Option<String>,
    /// Declared object.
    #[serde(default)]
    pub object: Option<String>,
    /// Declared scope qualifiers.
    #[serde(default)]
    pub scope: Vec<ScopeEntry>,
    /// Declared lifecycle markers.
    #[serde(default)]
    pub lifecycle: Vec<LifecycleEntry>,
    /// Declared modality.
    #[serde(default)]
    pub modality: Modality,
    /// Declared external reference ids.
    #[serde(default)]
    pub references: Vec<String>,
}

impl DeclaredAtom {
    /// Declare an atom over `start..end` of the raw text.
    pub fn new(clause_id: impl Into<ClauseId>, start: usize, end: usize) -> Self {
        Self {
            clause_id: clause_id.into(),
            span: Some(RawSpan { start, end }),
            actor: None,
            action: None,
            object: None,
            scope: Vec::new(),
            lifecycle: Vec::new(),
            modality: Modality::Unspecified,
            references: Vec::new(),
        }
    }

    /// Declare an atom covering the first occurrence of `needle` in `raw`.
    ///
    /// Fails with `SpanNotFound` when `needle` does not occur.
    pub fn covering(clause_id: impl Into<ClauseId>, raw: &str, needle: &str) -> Result<Self> {
        let clause_id = clause_id.into();
        match raw.find(needle) {
            Some(start) => Ok(Self::new(clause_id, start, start + needle.len())),
            None => Err(ValidationError::SpanNotFound {
                clause_id,
                needle: needle.to_string(),
            }
            .into()),
        }
    }

    /// Set the actor.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set action and object.
    pub fn with_action(mut self, action: impl Into<String>, object: Option<&str>) -> Self {
        self.action = Some(action.into());
        self.object = object.map(str::to_string);
        self
    }

    /// Append a scope entry.
    pub fn with_scope(mut self, entry: ScopeEntry) -> Self {
        self.scope.push(entry);
        self
    }

    /// Append a lifecycle entry.
    pub fn with_lifecycle(mut self, entry: LifecycleEntry) -> Self {
        self.lifecycle.push(entry);
        self
    }

    /// Set the modality.
    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = modality;
        self
    }

    /// Append an external reference id.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.references.push(reference.into());
        self
    }
}
