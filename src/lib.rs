//! # obligation-kernel
//!
//! Versioned, content-addressed store for normative atoms extracted from
//! legal text.
//!
//! The kernel answers one question:
//!
//! > Across revisions of a document, is this obligation **the same one**?
//!
//! ## Core Contract
//!
//! 1. Canonicalize span text so formatting and OCR noise never change identity
//! 2. Derive a **Core Identity** (substance) and a **Loose Identity**
//!    (correlation) from canonical fields under explicit [`IdentityFlags`]
//! 3. Record every revision immutably in a bitemporal ledger
//! 4. Align atom sets across revisions, query, project and explain them
//!
//! ## Architecture
//!
//! ```text
//! DeclaredAtom[] → canonical_text → identity → RevisionLedger (memory / Postgres)
//!                                                     ↓
//!                                  align · query · project · explain → envelope
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same canonical fields + same flags → identical Core Identity
//! - Hashed data uses only ordered containers (`Vec`, `BTreeMap`)
//! - Diff tie-breaks follow `(clause_id, span start)`, never similarity
//!
//! ## Example
//!
//! ```
//! use obligation_kernel::{canonicalize, core_identity, Atom, CanonicalSpan, IdentityFlags};
//!
//! let a = Atom::new("c1", CanonicalSpan::new(0, 0, canonicalize("1.  The operator  must keep records")));
//! let b = Atom::new("c1", CanonicalSpan::new(0, 0, canonicalize("The operator must keep records")));
//! let flags = IdentityFlags::full();
//! assert_eq!(core_identity(&a, &flags), core_identity(&b, &flags));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod align;
pub mod canonical;
pub mod canonical_text;
pub mod config;
pub mod envelope;
pub mod error;
pub mod explain;
pub mod identity;
pub mod ingest;
pub mod ledger;
pub mod logging;
pub mod query;
pub mod types;

// Re-exports
pub use types::{
    Atom, AtomIdentity, CanonicalSpan, ClauseId, CoreIdentity, DeclaredAtom, DocId,
    IdentifiedAtom, IdentityFlags, LifecycleEntry, LooseIdentity, Modality, Provenance, RawSpan,
    RevId, Revision, RevisionRecord, RevisionRef, ScopeEntry, StructuredPayload,
};
pub use error::{ConflictReason, KernelError, NotFound, Result, ValidationError};
pub use canonical::{canonical_digest_hex, sha256_hex, to_canonical_bytes};
pub use canonical_text::{canonicalize, CANONICAL_TEXT_VERSION};
pub use identity::{core_identity, identify, identify_all, loose_identity, verify_identity};
pub use ledger::{
    append_with_retry, AppendRequest, HeadExpectation, InMemoryLedger, RetryPolicy,
    RevisionLedger,
};
#[cfg(feature = "postgres")]
pub use ledger::{PostgresConfig, PostgresLedger};
pub use ingest::{atomize, ingest, ingest_with_retry, IngestRequest};
pub use align::{align, align_revisions, DeltaField, DeltaValue, DiffResult, FieldDelta, Modification};
pub use query::{project, query, QueryFilters, ViewKind, ViewRow};
pub use explain::{explain, explain_all, explain_clause, from_explanation, DeclaredFields, Explanation};
pub use envelope::Envelope;
pub use config::{KernelConfig, LedgerConfig};
pub use logging::{init_tracing, LogFormat};

/// Schema version for persisted kernel types.
/// Increment on breaking changes to any serialized type.
pub const KERNEL_SCHEMA_VERSION: &str = "1.0.0";
