//! Document and revision types for the ledger.
//!
//! ## Invariants
//!
//! 1. A `Revision` is immutable once recorded
//! 2. `rev_id` is monotonic per document, starting at 1
//! 3. Corrections are new revisions; `recorded_to` is derived, never written

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::atom::{Atom, RevisionRef};
use super::identity::{CoreIdentity, IdentityFlags, LooseIdentity};
use crate::canonical::{canonical_digest_hex, digests_match};
use crate::error::{KernelError, Result};
use crate::identity::identify;

/// Opaque, immutable document identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    /// Create a document id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic per-document revision number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevId(u64);

impl RevId {
    /// The first revision of every document.
    pub const FIRST: RevId = RevId(1);

    /// Create a revision id.
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    /// Get the number.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// The following revision id.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for RevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a revision's source text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Source location (URL, registry key, file path).
    pub origin: String,
    /// When the source was retrieved.
    pub retrieved_at: DateTime<Utc>,
    /// Checksum of the source document as supplied by the extraction layer.
    pub checksum: String,
    /// Licence of the source text.
    #[serde(default)]
    pub licence: Option<String>,
}

impl Provenance {
    /// Create provenance.
    pub fn new(
        origin: impl Into<String>,
        retrieved_at: DateTime<Utc>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            retrieved_at,
            checksum: checksum.into(),
            licence: None,
        }
    }

    /// Set the licence.
    pub fn with_licence(mut self, licence: impl Into<String>) -> Self {
        self.licence = Some(licence.into());
        self
    }
}

/// An atom with the identities computed for it at ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifiedAtom {
    /// The atom.
    pub atom: Atom,
    /// Core identity under the payload's flags.
    pub core: CoreIdentity,
    /// Loose identity.
    pub loose: LooseIdentity,
}

/// Structured payload of a revision: atoms plus the flags their identities
/// were computed under.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuredPayload {
    /// Flags used for every identity in `atoms`.
    pub flags: IdentityFlags,
    /// Identified atoms in source order.
    pub atoms: Vec<IdentifiedAtom>,
}

impl StructuredPayload {
    /// Identify `atoms` under `flags`.
    pub fn from_atoms(atoms: Vec<Atom>, flags: IdentityFlags) -> Self {
        let atoms = atoms
            .into_iter()
            .map(|atom| {
                let identity = identify(&atom, &flags);
                IdentifiedAtom {
                    atom,
                    core: identity.core,
                    loose: identity.loose,
                }
            })
            .collect();
        Self { flags, atoms }
    }

    /// Recompute every identity under the recorded flags.
    ///
    /// Fails with `IdentityMismatch` on the first atom whose stored identity
    /// is not reproduced.
    pub fn verify(&self) -> Result<()> {
        for entry in &self.atoms {
            let identity = identify(&entry.atom, &self.flags);
            if identity.core != entry.core {
                return Err(KernelError::IdentityMismatch {
                    subject: entry.atom.clause_id.to_string(),
                    expected: entry.core.to_string(),
                    computed: identity.core.to_string(),
                });
            }
            if identity.loose != entry.loose {
                return Err(KernelError::IdentityMismatch {
                    subject: entry.atom.clause_id.to_string(),
                    expected: entry.loose.to_string(),
                    computed: identity.loose.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Immutable snapshot of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Document.
    pub doc_id: DocId,
    /// Revision number.
    pub rev_id: RevId,
    /// Valid time: the date this text takes legal effect.
    pub effective_date: NaiveDate,
    /// System time: when the ledger recorded this revision.
    pub recorded_from: DateTime<Utc>,
    /// Revision this one corrects, if any.
    #[serde(default)]
    pub corrects: Option<RevId>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Canonical body text.
    pub body: String,
    /// SHA-256 over canonical `(body, payload)`.
    pub checksum: String,
    /// Source provenance.
    pub provenance: Provenance,
    /// Atoms and identities.
    pub payload: StructuredPayload,
}

impl Revision {
    /// Checksum for a body and payload.
    pub fn compute_checksum(body: &str, payload: &StructuredPayload) -> Result<String> {
        canonical_digest_hex(&(body, payload))
            .map_err(|e| KernelError::Storage(format!("checksum serialization failed: {e}")))
    }

    /// Recompute the checksum and verify every stored identity.
    pub fn verify(&self) -> Result<()> {
        let computed = Self::compute_checksum(&self.body, &self.payload)?;
        if !digests_match(&computed, &self.checksum) {
            return Err(KernelError::IdentityMismatch {
                subject: format!("{}@{}", self.doc_id, self.rev_id),
                expected: self.checksum.clone(),
                computed,
            });
        }
        self.payload.verify()
    }

    /// Reference to this revision.
    pub fn revision_ref(&self) -> RevisionRef {
        RevisionRef {
            doc_id: self.doc_id.clone(),
            rev_id: self.rev_id,
        }
    }

    /// Atoms with their spans bound to this revision, in source order.
    pub fn atoms(&self) -> Vec<Atom> {
        let rev_ref = self.revision_ref();
        self.payload
            .atoms
            .iter()
            .map(|entry| {
                let mut atom = entry.atom.clone();
                atom.span.revision = Some(rev_ref.clone());
                atom
            })
            .collect()
    }

    /// Flags the stored identities were computed under.
    pub fn flags(&self) -> IdentityFlags {
        self.payload.flags
    }
}

/// Read-side view of a revision with its derived system-time end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRecord {
    /// The revision.
    pub revision: Revision,
    /// `recorded_from` of the first correction superseding it, if any.
    pub recorded_to: Option<DateTime<Utc>>,
}

impl RevisionRecord {
    /// Whether the revision was believed at system time `t`.
    pub fn believed_at(&self, t: DateTime<Utc>) -> bool {
        self.revision.recorded_from <= t && self.recorded_to.map_or(true, |end| t < end)
    }
}
