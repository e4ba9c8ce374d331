//! Versioned JSON envelopes for results handed to presentation layers.
//!
//! Every payload is wrapped as `{"version": "<name>.v1", ...fields}` so
//! consumers can dispatch on the version tag.

use serde::{Deserialize, Serialize};

use crate::align::{DiffResult, Modification};
use crate::explain::Explanation;
use crate::query::{ViewKind, ViewRow};
use crate::types::{Atom, CoreIdentity};

/// Version tag of query results.
pub const QUERY_VERSION: &str = "obligation.query.v1";
/// Version tag of explanations.
pub const EXPLANATION_VERSION: &str = "obligation.explanation.v1";
/// Version tag of alignment results.
pub const ALIGNMENT_VERSION: &str = "obligation.alignment.v1";
/// Version tag of projections.
pub const PROJECTION_VERSION: &str = "obligation.projection.v1";

/// A payload tagged with its schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Schema version tag.
    pub version: String,
    /// Payload fields, flattened next to `version`.
    #[serde(flatten)]
    pub body: T,
}

/// `obligation.query.v1` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBody {
    /// Matching atoms.
    pub results: Vec<Atom>,
}

/// `obligation.explanation.v1` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationBody {
    /// Explanations in atom order.
    pub explanations: Vec<Explanation>,
}

/// `obligation.alignment.v1` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentBody {
    /// Atoms only on the new side.
    pub added: Vec<Atom>,
    /// Atoms only on the old side.
    pub removed: Vec<Atom>,
    /// Identities unchanged across sides.
    pub unchanged: Vec<CoreIdentity>,
    /// Correlated modifications.
    pub modified: Vec<Modification>,
}

/// `obligation.projection.v1` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionBody {
    /// View that produced the rows.
    pub view: ViewKind,
    /// Rows.
    pub results: Vec<ViewRow>,
}

impl<T> Envelope<T> {
    fn tagged(version: &str, body: T) -> Self {
        Self {
            version: version.to_string(),
            body,
        }
    }
}

impl Envelope<QueryBody> {
    /// Wrap query results.
    pub fn query(results: Vec<Atom>) -> Self {
        Self::tagged(QUERY_VERSION, QueryBody { results })
    }
}

impl Envelope<ExplanationBody> {
    /// Wrap explanations.
    pub fn explanations(explanations: Vec<Explanation>) -> Self {
        Self::tagged(EXPLANATION_VERSION, ExplanationBody { explanations })
    }
}

impl Envelope<AlignmentBody> {
    /// Wrap an alignment result.
    pub fn alignment(diff: DiffResult) -> Self {
        Self::tagged(
            ALIGNMENT_VERSION,
            AlignmentBody {
                added: diff.added,
                removed: diff.removed,
                unchanged: diff.unchanged,
                modified: diff.modified,
            },
        )
    }
}

impl Envelope<ProjectionBody> {
    /// Wrap projection rows.
    pub fn projection(view: ViewKind, results: Vec<ViewRow>) -> Self {
        Self::tagged(PROJECTION_VERSION, ProjectionBody { view, results })
    }
}
