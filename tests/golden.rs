//! Golden tests for the obligation kernel.
//!
//! These pin identity digests byte-for-byte and walk the end-to-end
//! scenarios: retention change, OCR noise, and ingestion through alignment.

use obligation_kernel::identity::core_preimage;
use obligation_kernel::{
    align, atomize, canonicalize, core_identity, explain, from_explanation, loose_identity, Atom,
    CanonicalSpan, DeclaredAtom, DeltaField, DeltaValue, IdentityFlags, Modality, ScopeEntry,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

const SPAN: &str = "The operator must keep records";

fn full_atom() -> Atom {
    Atom::new("art-5.1", CanonicalSpan::new(0, SPAN.len(), SPAN))
        .with_actor("The operator")
        .with_action("keep", Some("records"))
}

fn bare_atom() -> Atom {
    Atom::new("art-5.1", CanonicalSpan::new(0, SPAN.len(), SPAN))
}

fn retention_declared(raw: &str, span: &str, period: &str) -> DeclaredAtom {
    DeclaredAtom::covering("art-5.1", raw, span)
        .unwrap()
        .with_actor("The operator")
        .with_action("keep", Some("records"))
        .with_scope(ScopeEntry::new("retention_period", period))
        .with_modality(Modality::Obligation)
}

// ─────────────────────────────────────────────────────────────────────────────
// Golden Digests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_golden_core_identity_full_flags() {
    assert_eq!(
        core_identity(&full_atom(), &IdentityFlags::full()).as_str(),
        "8cea802ce9ea7ba8c8c33fc44a87a9e812dfb9d6e042cf5c7e96e8f3ae861fa3"
    );
}

#[test]
fn test_golden_core_identity_span_only() {
    assert_eq!(
        core_identity(&full_atom(), &IdentityFlags::span_only()).as_str(),
        "bbcb79fe5b2af822d48749d56df58c45789acffb9818836ff213964c0f31d2ef"
    );
}

#[test]
fn test_golden_core_identity_actor_only() {
    assert_eq!(
        core_identity(&full_atom(), &IdentityFlags::new(true, false)).as_str(),
        "77ad46fc434fca9ce3b3d9b54a1fd0391bccf46db95b483d68446ebcc1bfa24a"
    );
}

#[test]
fn test_golden_absent_fields_use_sentinel() {
    assert_eq!(
        core_identity(&bare_atom(), &IdentityFlags::full()).as_str(),
        "46803a484c00d124148538eefb8bf9d845087891684377adb9b86643db7270af"
    );
    assert_eq!(
        core_preimage(&bare_atom(), &IdentityFlags::full()),
        "obligation.core.v1\u{1F}span\u{1F}The operator must keep records\
         \u{1F}actor\u{1F}\u{0}\u{1F}action\u{1F}\u{0}\u{1F}object\u{1F}\u{0}"
    );
}

#[test]
fn test_golden_empty_actor_differs_from_absent() {
    let empty = bare_atom().with_actor("");
    let id = core_identity(&empty, &IdentityFlags::full());
    assert_eq!(
        id.as_str(),
        "ff3d0542742d11c2349d30492e144e2be2c7ef1b17e150b76269320e3bc9201e"
    );
    assert_ne!(id, core_identity(&bare_atom(), &IdentityFlags::full()));
}

#[test]
fn test_golden_loose_identity() {
    let expected = "69d3f39364d16cc0e55267b40104a4f9c3c95fa284d240002db4680071c754e7";
    assert_eq!(loose_identity(&full_atom()).as_str(), expected);
    assert_eq!(loose_identity(&bare_atom()).as_str(), expected);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_retention_period_change_is_one_scope_modification() {
    let old_raw = "5.1 The operator must keep records for 7 years.";
    let new_raw = "5.1 The operator must keep records for 10 years.";
    let old = atomize(old_raw, &[retention_declared(old_raw, SPAN, "for 7 years")]).unwrap();
    let new = atomize(new_raw, &[retention_declared(new_raw, SPAN, "for 10 years")]).unwrap();

    let diff = align(&old, &new, &IdentityFlags::full());

    assert!(diff.added.is_empty());
    assert!(diff.removed.is_empty());
    assert!(diff.unchanged.is_empty());
    assert_eq!(diff.modified.len(), 1);
    let m = &diff.modified[0];
    assert_eq!(m.core_identity_old, m.core_identity_new);
    assert_eq!(m.deltas.len(), 1);
    assert_eq!(m.deltas[0].field_name, DeltaField::Scope);
    assert_eq!(
        m.deltas[0].old_value,
        DeltaValue::Scope(vec![ScopeEntry::new("retention_period", "for 7 years")])
    );
    assert_eq!(
        m.deltas[0].new_value,
        DeltaValue::Scope(vec![ScopeEntry::new("retention_period", "for 10 years")])
    );
}

#[test]
fn test_retention_phrase_inside_span_is_remove_plus_add() {
    let old_raw = "5.1 The operator must keep records for 7 years.";
    let new_raw = "5.1 The operator must keep records for 10 years.";
    let old_span = "The operator must keep records for 7 years.";
    let new_span = "The operator must keep records for 10 years.";
    let old = atomize(old_raw, &[retention_declared(old_raw, old_span, "for 7 years")]).unwrap();
    let new = atomize(new_raw, &[retention_declared(new_raw, new_span, "for 10 years")]).unwrap();

    let diff = align(&old, &new, &IdentityFlags::full());

    assert_eq!(diff.removed.len(), 1);
    assert_eq!(diff.added.len(), 1);
    assert!(diff.modified.is_empty());
    assert!(diff.unchanged.is_empty());
}

#[test]
fn test_ocr_noise_keeps_identity() {
    let clean = "The operator shall keep records for 10 years";
    let noisy = "The  operator sha1l keep rec0rds for l0 years";
    assert_eq!(canonicalize(noisy), clean);

    let a = atomize(noisy, &[DeclaredAtom::new("c1", 0, noisy.len()).with_actor("The operator")]).unwrap();
    let b = atomize(clean, &[DeclaredAtom::new("c1", 0, clean.len()).with_actor("The operator")]).unwrap();
    let flags = IdentityFlags::full();
    assert_eq!(core_identity(&a[0], &flags), core_identity(&b[0], &flags));

    let diff = align(&a, &b, &flags);
    assert_eq!(diff.unchanged.len(), 1);
    assert!(diff.is_empty());
}

#[test]
fn test_formatting_noise_keeps_identity() {
    let variants = [
        "(a) The operator must keep records",
        "1.  The operator\u{00A0}must keep\nrecords",
        "• The operator must keep rec\u{00AD}ords",
        "§ 3 The operator must keep records",
    ];
    let flags = IdentityFlags::full();
    let expected = core_identity(&bare_atom(), &flags);
    for raw in variants {
        let atoms = atomize(raw, &[DeclaredAtom::new("art-5.1", 0, raw.len())]).unwrap();
        assert_eq!(core_identity(&atoms[0], &flags), expected, "input: {raw:?}");
    }
}

#[test]
fn test_substantive_change_changes_identity() {
    let flags = IdentityFlags::full();
    let base = core_identity(&full_atom(), &flags);
    let mut shall_not = full_atom();
    shall_not.span.text = "The operator must not keep records".to_string();
    assert_ne!(core_identity(&shall_not, &flags), base);
    assert_ne!(core_identity(&full_atom().with_actor("The licensee"), &flags), base);
}

#[test]
fn test_explanation_round_trip_for_ingested_atom() {
    let raw = "5.1 The operator must keep records for 7 years.";
    let atoms = atomize(raw, &[retention_declared(raw, SPAN, "for 7 years")]).unwrap();
    let flags = IdentityFlags::full();
    let explanation = explain(&atoms[0], &flags).unwrap();
    assert_eq!((explanation.raw_offsets.start, explanation.raw_offsets.end), (4, 34));
    assert_eq!(
        core_identity(&from_explanation(&explanation), &flags),
        core_identity(&atoms[0], &flags)
    );
}

#[test]
fn test_revision_checksum_is_stable() {
    use obligation_kernel::{Revision, StructuredPayload};
    let payload = StructuredPayload::from_atoms(vec![full_atom()], IdentityFlags::full());
    let a = Revision::compute_checksum("body", &payload).unwrap();
    let b = Revision::compute_checksum("body", &payload.clone()).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 64);
    assert_ne!(a, Revision::compute_checksum("body.", &payload).unwrap());
}
