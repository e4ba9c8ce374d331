//! Performance benchmarks for canonicalization, identity and alignment.
//!
//! Run with: `cargo bench --bench identity`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Canonicalize span | <20µs | Typical clause length |
//! | Core + Loose identity | <10µs | Two SHA-256 digests |
//! | Align revisions | Linear in atoms | BTreeMap grouping, no pairwise scoring |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use obligation_kernel::{
    align, atomize, canonicalize, identify, Atom, DeclaredAtom, IdentityFlags, ScopeEntry,
};

const CLAUSE: &str = "5.1  The operator sha1l keep \u{201C}records\u{201D} of every\u{00A0}transaction \
                      for a period of l0 years from the date of the transaction.";

/// Build a revision-sized atom set; `years` varies the scope text.
fn make_atoms(count: usize, years: &str) -> Vec<Atom> {
    let raw: String = (0..count)
        .map(|i| format!("{i}. The operator must keep record set {i} for {years} years.\n"))
        .collect();
    let declared: Vec<DeclaredAtom> = (0..count)
        .map(|i| {
            let needle = format!("The operator must keep record set {i}");
            DeclaredAtom::covering(format!("c{i}"), &raw, &needle)
                .unwrap()
                .with_actor("The operator")
                .with_action("keep", Some("records"))
                .with_scope(ScopeEntry::new("retention_period", format!("{years} years")))
        })
        .collect();
    atomize(&raw, &declared).unwrap()
}

/// Benchmark the canonicalizer on a noisy clause.
fn bench_canonicalize(c: &mut Criterion) {
    c.bench_function("canonicalize_clause", |b| {
        b.iter(|| canonicalize(black_box(CLAUSE)))
    });
}

/// Benchmark identity computation under each flag setting.
fn bench_identify(c: &mut Criterion) {
    let atom = make_atoms(1, "7").remove(0);
    let mut group = c.benchmark_group("identify");

    for (name, flags) in [
        ("full", IdentityFlags::full()),
        ("span_only", IdentityFlags::span_only()),
    ] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("flags", name), &flags, |b, flags| {
            b.iter(|| identify(black_box(&atom), flags))
        });
    }

    group.finish();
}

/// Benchmark alignment of two revisions differing in every scope.
fn bench_align(c: &mut Criterion) {
    let flags = IdentityFlags::full();
    let mut group = c.benchmark_group("align");

    for count in [10, 100, 1000] {
        let old = make_atoms(count, "7");
        let new = make_atoms(count, "10");

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("atoms", count), &(old, new), |b, (old, new)| {
            b.iter(|| {
                let diff = align(black_box(old), black_box(new), &flags);
                assert_eq!(diff.modified.len(), old.len());
                diff
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_canonicalize, bench_identify, bench_align);
criterion_main!(benches);
