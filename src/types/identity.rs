//! Identity value types.
//!
//! Both identities are 64-character lowercase hex SHA-256 digests. They are
//! computed by [`crate::identity`]; these types only carry them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hash over the fields that define "substantively the same atom".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreIdentity(String);

impl CoreIdentity {
    /// Wrap a hex digest.
    pub fn new(hex: String) -> Self {
        Self(hex)
    }

    /// Get the digest as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CoreIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hash over canonical span text only, used to correlate an atom across a
/// modification.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LooseIdentity(String);

impl LooseIdentity {
    /// Wrap a hex digest.
    pub fn new(hex: String) -> Self {
        Self(hex)
    }

    /// Get the digest as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LooseIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Feature flags deciding which declared fields enter the Core Identity.
///
/// Passed explicitly to every identity computation and persisted next to
/// every stored identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityFlags {
    /// Include actor text.
    pub bind_actor: bool,
    /// Include action and object text.
    pub bind_action: bool,
}

impl IdentityFlags {
    /// Create flags.
    pub fn new(bind_actor: bool, bind_action: bool) -> Self {
        Self {
            bind_actor,
            bind_action,
        }
    }

    /// Span text only.
    pub fn span_only() -> Self {
        Self::new(false, false)
    }

    /// Span, actor, action and object.
    pub fn full() -> Self {
        Self::new(true, true)
    }

    /// Stable textual form, e.g. `actor=1;action=0`.
    pub fn to_ref_string(&self) -> String {
        format!(
            "actor={};action={}",
            u8::from(self.bind_actor),
            u8::from(self.bind_action)
        )
    }
}

impl Default for IdentityFlags {
    fn default() -> Self {
        Self::full()
    }
}

impl fmt::Display for IdentityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ref_string())
    }
}

/// The identity pair of one atom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AtomIdentity {
    /// Core identity.
    pub core: CoreIdentity,
    /// Loose identity.
    pub loose: LooseIdentity,
}
