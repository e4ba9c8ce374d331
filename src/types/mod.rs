//! Core types for the obligation kernel.

pub mod atom;
pub mod identity;
pub mod revision;

pub use atom::{
    Atom, CanonicalSpan, ClauseId, DeclaredAtom, LifecycleEntry, Modality, RawSpan, RevisionRef,
    ScopeEntry,
};
pub use identity::{AtomIdentity, CoreIdentity, IdentityFlags, LooseIdentity};
pub use revision::{
    DocId, IdentifiedAtom, Provenance, RevId, Revision, RevisionRecord, StructuredPayload,
};
