//! Traceability: every atom explains itself back to its declared inputs.
//!
//! An [`Explanation`] carries enough to rebuild the atom, and [`explain`]
//! rebuilds it before returning, re-deriving the Core Identity. An
//! explanation that would not reproduce the identity is never handed out.

use serde::{Deserialize, Serialize};

use crate::error::{NotFound, Result};
use crate::identity::{identify, verify_identity};
use crate::types::{
    Atom, CanonicalSpan, ClauseId, CoreIdentity, IdentityFlags, LifecycleEntry, LooseIdentity,
    Modality, RawSpan, RevisionRef, ScopeEntry,
};

/// Fields the atom source declared, after canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeclaredFields {
    /// Actor.
    pub actor: Option<String>,
    /// Action.
    pub action: Option<String>,
    /// Object.
    pub object: Option<String>,
    /// Scope qualifiers.
    pub scope: Vec<ScopeEntry>,
    /// Lifecycle markers.
    pub lifecycle: Vec<LifecycleEntry>,
    /// Modality.
    pub modality: Modality,
    /// External reference ids.
    pub references: Vec<String>,
}

/// Trace of one atom back to its span and declared fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    /// Clause id.
    pub clause_id: ClauseId,
    /// Canonical span text.
    pub canonical_span: String,
    /// Byte offsets into the raw text.
    pub raw_offsets: RawSpan,
    /// Declared fields.
    pub declared_fields: DeclaredFields,
    /// Core identity under `flags`.
    pub core_identity: CoreIdentity,
    /// Loose identity.
    pub loose_identity: LooseIdentity,
    /// Flags the identity was computed under.
    pub flags: IdentityFlags,
    /// Revision the span was cut from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionRef>,
}

/// Rebuild the atom an explanation describes.
pub fn from_explanation(explanation: &Explanation) -> Atom {
    let fields = &explanation.declared_fields;
    let mut span = CanonicalSpan::new(
        explanation.raw_offsets.start,
        explanation.raw_offsets.end,
        explanation.canonical_span.clone(),
    );
    span.revision = explanation.revision.clone();
    Atom {
        clause_id: explanation.clause_id.clone(),
        span,
        actor: fields.actor.clone(),
        action: fields.action.clone(),
        object: fields.object.clone(),
        scope: fields.scope.clone(),
        lifecycle: fields.lifecycle.clone(),
        modality: fields.modality,
        references: fields.references.clone(),
    }
}

/// Explain one atom.
///
/// Fails with `IdentityMismatch` if the explanation does not round-trip to
/// the atom's Core Identity.
pub fn explain(atom: &Atom, flags: &IdentityFlags) -> Result<Explanation> {
    let id = identify(atom, flags);
    let explanation = Explanation {
        clause_id: atom.clause_id.clone(),
        canonical_span: atom.span.text.clone(),
        raw_offsets: RawSpan {
            start: atom.span.start,
            end: atom.span.end,
        },
        declared_fields: DeclaredFields {
            actor: atom.actor.clone(),
            action: atom.action.clone(),
            object: atom.object.clone(),
            scope: atom.scope.clone(),
            lifecycle: atom.lifecycle.clone(),
            modality: atom.modality,
            references: atom.references.clone(),
        },
        core_identity: id.core,
        loose_identity: id.loose,
        flags: *flags,
        revision: atom.span.revision.clone(),
    };

    verify_identity(&from_explanation(&explanation), flags, &explanation.core_identity)?;
    Ok(explanation)
}

/// Explain every atom, in order.
pub fn explain_all(atoms: &[Atom], flags: &IdentityFlags) -> Result<Vec<Explanation>> {
    atoms.iter().map(|a| explain(a, flags)).collect()
}

/// Explain every atom of one clause.
///
/// Fails with `NotFound` when no atom carries `clause_id`.
pub fn explain_clause(
    atoms: &[Atom],
    clause_id: &ClauseId,
    flags: &IdentityFlags,
) -> Result<Vec<Explanation>> {
    let matching: Vec<Atom> = atoms
        .iter()
        .filter(|a| &a.clause_id == clause_id)
        .cloned()
        .collect();
    if matching.is_empty() {
        return Err(NotFound::Clause(clause_id.clone()).into());
    }
    explain_all(&matching, flags)
}
