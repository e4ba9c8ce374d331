//! Identity Engine: Core and Loose identities for atoms.
//!
//! ## Preimages
//!
//! Fields are joined by `US` (`U+001F`) in this fixed order:
//!
//! ```text
//! core  = "obligation.core.v1"  US "span" US <span>
//!         [US "actor" US <actor|NUL>]                                  if bind_actor
//!         [US "action" US <action|NUL> US "object" US <object|NUL>]    if bind_action
//! loose = "obligation.loose.v1" US "span" US <span>
//! ```
//!
//! Every text field is canonicalized inside the engine. A declared-but-absent
//! field is written as the sentinel `NUL` (`U+0000`). Canonical text can
//! contain neither `US` nor `NUL`, so the encoding is unambiguous.
//!
//! ## Digest
//!
//! SHA-256 over the UTF-8 preimage, as 64 lowercase hex characters. The
//! result depends only on the included field bytes and the flags; no clock,
//! address or unordered-container iteration is involved.

use crate::canonical::sha256_hex;
use crate::canonical_text::canonicalize;
use crate::error::{KernelError, Result};
use crate::types::{Atom, AtomIdentity, CoreIdentity, IdentityFlags, LooseIdentity};

/// Field separator in identity preimages.
pub const FIELD_SEPARATOR: char = '\u{1F}';

/// Stand-in for a declared-but-absent field.
pub const ABSENT_SENTINEL: char = '\u{0}';

/// Domain tag of the Core Identity preimage.
pub const CORE_IDENTITY_TAG: &str = "obligation.core.v1";

/// Domain tag of the Loose Identity preimage.
pub const LOOSE_IDENTITY_TAG: &str = "obligation.loose.v1";

struct Preimage(String);

impl Preimage {
    fn new(tag: &str) -> Self {
        Self(tag.to_string())
    }

    fn field(&mut self, name: &str, value: Option<&str>) {
        self.0.push(FIELD_SEPARATOR);
        self.0.push_str(name);
        self.0.push(FIELD_SEPARATOR);
        match value {
            Some(v) => self.0.push_str(&canonicalize(v)),
            None => self.0.push(ABSENT_SENTINEL),
        }
    }

    fn digest(&self) -> String {
        sha256_hex(self.0.as_bytes())
    }
}

/// Core identity preimage as a string (exposed for golden fixtures).
pub fn core_preimage(atom: &Atom, flags: &IdentityFlags) -> String {
    let mut pre = Preimage::new(CORE_IDENTITY_TAG);
    pre.field("span", Some(&atom.span.text));
    if flags.bind_actor {
        pre.field("actor", atom.actor.as_deref());
    }
    if flags.bind_action {
        pre.field("action", atom.action.as_deref());
        pre.field("object", atom.object.as_deref());
    }
    pre.0
}

/// Core identity under `flags`.
pub fn core_identity(atom: &Atom, flags: &IdentityFlags) -> CoreIdentity {
    CoreIdentity::new(sha256_hex(core_preimage(atom, flags).as_bytes()))
}

/// Loose identity: canonical span text only, independent of flags.
pub fn loose_identity(atom: &Atom) -> LooseIdentity {
    let mut pre = Preimage::new(LOOSE_IDENTITY_TAG);
    pre.field("span", Some(&atom.span.text));
    LooseIdentity::new(pre.digest())
}

/// Compute both identities of an atom.
pub fn identify(atom: &Atom, flags: &IdentityFlags) -> AtomIdentity {
    AtomIdentity {
        core: core_identity(atom, flags),
        loose: loose_identity(atom),
    }
}

/// Identify every atom, preserving order.
pub fn identify_all(atoms: &[Atom], flags: &IdentityFlags) -> Vec<AtomIdentity> {
    atoms.iter().map(|a| identify(a, flags)).collect()
}

/// Recompute the Core Identity and compare it to `expected`.
pub fn verify_identity(atom: &Atom, flags: &IdentityFlags, expected: &CoreIdentity) -> Result<()> {
    let computed = core_identity(atom, flags);
    if &computed != expected {
        tracing::error!(
            clause_id = %atom.clause_id,
            expected = %expected,
            computed = %computed,
            "Core identity not reproduced"
        );
        return Err(KernelError::IdentityMismatch {
            subject: atom.clause_id.to_string(),
            expected: expected.to_string(),
            computed: computed.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CanonicalSpan, ScopeEntry};

    fn atom(span: &str) -> Atom {
        Atom::new("c1", CanonicalSpan::new(0, span.len(), span))
    }

    #[test]
    fn test_identity_determinism() {
        let a = atom("The operator must keep records").with_actor("The operator");
        assert_eq!(identify(&a, &IdentityFlags::full()), identify(&a, &IdentityFlags::full()));
    }

    #[test]
    fn test_identity_format() {
        let id = identify(&atom("x"), &IdentityFlags::full());
        assert_eq!(id.core.as_str().len(), 64);
        assert!(id.core.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(id.loose.as_str().len(), 64);
    }

    #[test]
    fn test_preimage_layout() {
        let a = atom("keep records").with_actor("operator");
        assert_eq!(
            core_preimage(&a, &IdentityFlags::full()),
            "obligation.core.v1\u{1F}span\u{1F}keep records\u{1F}actor\u{1F}operator\u{1F}action\u{1F}\u{0}\u{1F}object\u{1F}\u{0}"
        );
        assert_eq!(
            core_preimage(&a, &IdentityFlags::span_only()),
            "obligation.core.v1\u{1F}span\u{1F}keep records"
        );
    }

    #[test]
    fn test_absent_differs_from_empty() {
        let absent = atom("keep records");
        let empty = atom("keep records").with_actor("");
        let flags = IdentityFlags::new(true, false);
        assert_ne!(core_identity(&absent, &flags), core_identity(&empty, &flags));
    }

    #[test]
    fn test_loose_ignores_flags_and_metadata() {
        let a = atom("keep records").with_actor("operator");
        let b = atom("keep records")
            .with_actor("regulator")
            .with_scope(ScopeEntry::new("retention_period", "7 years"));
        assert_eq!(loose_identity(&a), loose_identity(&b));
        assert_ne!(
            core_identity(&a, &IdentityFlags::full()),
            core_identity(&b, &IdentityFlags::full())
        );
    }

    #[test]
    fn test_scope_not_in_core() {
        let a = atom("keep records").with_scope(ScopeEntry::new("retention_period", "7 years"));
        let b = atom("keep records").with_scope(ScopeEntry::new("retention_period", "10 years"));
        assert_eq!(
            core_identity(&a, &IdentityFlags::full()),
            core_identity(&b, &IdentityFlags::full())
        );
    }

    #[test]
    fn test_field_text_is_canonicalized() {
        let a = atom("keep records").with_actor("the  operator");
        let b = atom("keep records").with_actor("the operator\n");
        assert_eq!(
            core_identity(&a, &IdentityFlags::full()),
            core_identity(&b, &IdentityFlags::full())
        );
    }

    #[test]
    fn test_empty_span_has_identity() {
        let id = identify(&atom(""), &IdentityFlags::span_only());
        assert_eq!(id.core.as_str().len(), 64);
    }

    #[test]
    fn test_verify_identity_mismatch() {
        let a = atom("keep records");
        let flags = IdentityFlags::full();
        let good = core_identity(&a, &flags);
        assert!(verify_identity(&a, &flags, &good).is_ok());

        let other = core_identity(&atom("keep books"), &flags);
        assert!(matches!(
            verify_identity(&a, &flags, &other),
            Err(KernelError::IdentityMismatch { .. })
        ));
    }
}
