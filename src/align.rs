//! Diff/alignment of two atom sets.
//!
//! ## Algorithm
//!
//! 1. Identify every atom; index both sides by Core Identity
//! 2. Same Core Identity on both sides: pair atoms (equal clause id first,
//!    then ascending clause order). Identical metadata → `unchanged`,
//!    differing metadata → `modified` with equal old/new core
//! 3. Everything else is one-sided
//! 4. One-sided atoms sharing a Loose Identity across sides pair by ascending
//!    `(clause_id, offsets)` and become `modified`
//! 5. The rest are `added` / `removed`
//!
//! Deltas are structural comparisons of scope, lifecycle, actor and
//! action/object, with text compared in canonical form. No similarity score
//! is involved anywhere.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::canonical_text::canonicalize;
use crate::error::{Result, ValidationError};
use crate::identity::identify;
use crate::types::{
    Atom, ClauseId, CoreIdentity, IdentityFlags, LifecycleEntry, LooseIdentity, Modality,
    Revision, ScopeEntry,
};

/// Declared field a delta refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaField {
    /// Scope qualifiers.
    Scope,
    /// Lifecycle markers.
    Lifecycle,
    /// Actor text.
    Actor,
    /// Action and object text.
    Action,
}

/// Old or new value of a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeltaValue {
    /// Actor text.
    Text(Option<String>),
    /// Action with its object.
    Action {
        /// Action text.
        action: Option<String>,
        /// Object text.
        object: Option<String>,
    },
    /// Scope list.
    Scope(Vec<ScopeEntry>),
    /// Lifecycle list.
    Lifecycle(Vec<LifecycleEntry>),
}

/// A literal difference in one declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDelta {
    /// Which field.
    pub field_name: DeltaField,
    /// Value on the old side.
    pub old_value: DeltaValue,
    /// Value on the new side.
    pub new_value: DeltaValue,
}

/// An atom present on both sides in altered form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modification {
    /// Core identity on the old side.
    pub core_identity_old: CoreIdentity,
    /// Core identity on the new side.
    pub core_identity_new: CoreIdentity,
    /// Clause id on the old side.
    pub clause_id_old: ClauseId,
    /// Clause id on the new side.
    pub clause_id_new: ClauseId,
    /// Field-level differences.
    pub deltas: Vec<FieldDelta>,
}

/// Result of aligning two atom sets.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffResult {
    /// Atoms only on the new side.
    pub added: Vec<Atom>,
    /// Atoms only on the old side.
    pub removed: Vec<Atom>,
    /// Core identities present and identical on both sides.
    pub unchanged: Vec<CoreIdentity>,
    /// Atoms correlated across sides with differences.
    pub modified: Vec<Modification>,
}

/// Counts of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Added atoms.
    pub added: usize,
    /// Removed atoms.
    pub removed: usize,
    /// Unchanged atoms.
    pub unchanged: usize,
    /// Modified atoms.
    pub modified: usize,
}

impl DiffResult {
    /// True when nothing was added, removed or modified.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Counts per category.
    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.added.len(),
            removed: self.removed.len(),
            unchanged: self.unchanged.len(),
            modified: self.modified.len(),
        }
    }
}

/// Declared fields as the identity engine sees them: text canonicalized,
/// categories and dates literal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Declared {
    actor: Option<String>,
    action: Option<String>,
    object: Option<String>,
    scope: Vec<(String, String)>,
    lifecycle: Vec<(String, String, Option<NaiveDate>)>,
}

impl Declared {
    fn of(atom: &Atom) -> Self {
        let text = |v: &Option<String>| v.as_deref().map(canonicalize);
        Self {
            actor: text(&atom.actor),
            action: text(&atom.action),
            object: text(&atom.object),
            scope: atom
                .scope
                .iter()
                .map(|s| (s.category.clone(), canonicalize(&s.text)))
                .collect(),
            lifecycle: atom
                .lifecycle
                .iter()
                .map(|l| (l.kind.clone(), canonicalize(&l.text), l.date))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry<'a> {
    atom: &'a Atom,
    declared: Declared,
    core: CoreIdentity,
    loose: LooseIdentity,
}

fn entries<'a>(atoms: &'a [Atom], flags: &IdentityFlags) -> Vec<Entry<'a>> {
    let mut out: Vec<Entry<'a>> = atoms
        .iter()
        .map(|atom| {
            let id = identify(atom, flags);
            Entry {
                atom,
                declared: Declared::of(atom),
                core: id.core,
                loose: id.loose,
            }
        })
        .collect();
    out.sort_by(entry_order);
    out
}

type FieldKey<'a> = (
    &'a Declared,
    Modality,
    &'a [String],
    (&'a Option<String>, &'a Option<String>, &'a Option<String>),
    (&'a [ScopeEntry], &'a [LifecycleEntry]),
);

/// Canonical fields first; declared text last so the order stays total.
fn field_key<'a>(e: &'a Entry<'_>) -> FieldKey<'a> {
    let atom = e.atom;
    (
        &e.declared,
        atom.modality,
        &atom.references,
        (&atom.actor, &atom.action, &atom.object),
        (&atom.scope, &atom.lifecycle),
    )
}

/// Total order: clause order, then identity, then declared fields.
fn entry_order(a: &Entry<'_>, b: &Entry<'_>) -> Ordering {
    a.atom
        .order_key()
        .cmp(&b.atom.order_key())
        .then_with(|| a.core.cmp(&b.core))
        .then_with(|| field_key(a).cmp(&field_key(b)))
}

fn group_by<'a, K: Ord>(
    entries: Vec<Entry<'a>>,
    key: impl Fn(&Entry<'a>) -> K,
) -> BTreeMap<K, Vec<Entry<'a>>> {
    let mut map: BTreeMap<K, Vec<Entry<'a>>> = BTreeMap::new();
    for e in entries {
        map.entry(key(&e)).or_default().push(e);
    }
    map
}

type Pairs<'a> = Vec<(Entry<'a>, Entry<'a>)>;

/// Greedily pair each old entry with the first unmatched new entry
/// satisfying `matches`. Inputs are sorted; leftovers keep their order.
fn pair_where<'a>(
    olds: Vec<Entry<'a>>,
    news: Vec<Entry<'a>>,
    matches: impl Fn(&Entry<'a>, &Entry<'a>) -> bool,
) -> (Pairs<'a>, Vec<Entry<'a>>, Vec<Entry<'a>>) {
    let mut news: Vec<Option<Entry<'a>>> = news.into_iter().map(Some).collect();
    let mut pairs = Vec::new();
    let mut old_rest = Vec::new();
    for old in olds {
        let hit = news
            .iter()
            .position(|n| n.as_ref().is_some_and(|n| matches(&old, n)));
        match hit.and_then(|i| news[i].take()) {
            Some(new) => pairs.push((old, new)),
            None => old_rest.push(old),
        }
    }
    (pairs, old_rest, news.into_iter().flatten().collect())
}

/// Pair same-core entries: identical atoms in the same clause, then equal
/// clause ids, then the rest in order.
fn pair_by_clause<'a>(
    olds: Vec<Entry<'a>>,
    news: Vec<Entry<'a>>,
) -> (Pairs<'a>, Vec<Entry<'a>>, Vec<Entry<'a>>) {
    let same_clause = |a: &Entry<'a>, b: &Entry<'a>| a.atom.clause_id == b.atom.clause_id;
    let (mut pairs, olds, news) =
        pair_where(olds, news, |a, b| same_clause(a, b) && a.declared == b.declared);
    let (mut by_clause, olds, news) = pair_where(olds, news, same_clause);
    let (mut zipped, old_rest, new_rest) = pair_in_order(olds, news);
    pairs.append(&mut by_clause);
    pairs.append(&mut zipped);
    (pairs, old_rest, new_rest)
}

/// Pair by position after sorting; leftovers returned per side.
fn pair_in_order<'a>(
    olds: Vec<Entry<'a>>,
    news: Vec<Entry<'a>>,
) -> (Pairs<'a>, Vec<Entry<'a>>, Vec<Entry<'a>>) {
    let n = olds.len().min(news.len());
    let mut olds = olds.into_iter();
    let mut news = news.into_iter();
    let pairs = olds.by_ref().zip(news.by_ref()).take(n).collect();
    (pairs, olds.collect(), news.collect())
}

/// Field deltas between two atoms, in fixed field order.
///
/// Fields are compared after canonicalization, so formatting or OCR noise in
/// a declared value is not a delta; reported values are the declared ones.
pub fn field_deltas(old: &Atom, new: &Atom) -> Vec<FieldDelta> {
    deltas_between(old, &Declared::of(old), new, &Declared::of(new))
}

fn deltas_between(old: &Atom, old_d: &Declared, new: &Atom, new_d: &Declared) -> Vec<FieldDelta> {
    let mut deltas = Vec::new();
    if old_d.scope != new_d.scope {
        deltas.push(FieldDelta {
            field_name: DeltaField::Scope,
            old_value: DeltaValue::Scope(old.scope.clone()),
            new_value: DeltaValue::Scope(new.scope.clone()),
        });
    }
    if old_d.lifecycle != new_d.lifecycle {
        deltas.push(FieldDelta {
            field_name: DeltaField::Lifecycle,
            old_value: DeltaValue::Lifecycle(old.lifecycle.clone()),
            new_value: DeltaValue::Lifecycle(new.lifecycle.clone()),
        });
    }
    if old_d.actor != new_d.actor {
        deltas.push(FieldDelta {
            field_name: DeltaField::Actor,
            old_value: DeltaValue::Text(old.actor.clone()),
            new_value: DeltaValue::Text(new.actor.clone()),
        });
    }
    if old_d.action != new_d.action || old_d.object != new_d.object {
        deltas.push(FieldDelta {
            field_name: DeltaField::Action,
            old_value: DeltaValue::Action {
                action: old.action.clone(),
                object: old.object.clone(),
            },
            new_value: DeltaValue::Action {
                action: new.action.clone(),
                object: new.object.clone(),
            },
        });
    }
    deltas
}

fn modification(old: &Entry<'_>, new: &Entry<'_>) -> Modification {
    Modification {
        core_identity_old: old.core.clone(),
        core_identity_new: new.core.clone(),
        clause_id_old: old.atom.clause_id.clone(),
        clause_id_new: new.atom.clause_id.clone(),
        deltas: deltas_between(old.atom, &old.declared, new.atom, &new.declared),
    }
}

/// Align two atom sets under one flag configuration.
pub fn align(old: &[Atom], new: &[Atom], flags: &IdentityFlags) -> DiffResult {
    let old_by_core = group_by(entries(old, flags), |e| e.core.clone());
    let mut new_by_core = group_by(entries(new, flags), |e| e.core.clone());

    let mut result = DiffResult::default();
    let mut old_rest: Vec<Entry<'_>> = Vec::new();
    let mut new_rest: Vec<Entry<'_>> = Vec::new();

    for (core, olds) in old_by_core {
        let Some(news) = new_by_core.remove(&core) else {
            old_rest.extend(olds);
            continue;
        };
        let (pairs, o, n) = pair_by_clause(olds, news);
        for (a, b) in pairs {
            if a.declared == b.declared {
                result.unchanged.push(a.core);
            } else {
                result.modified.push(modification(&a, &b));
            }
        }
        old_rest.extend(o);
        new_rest.extend(n);
    }
    new_rest.extend(new_by_core.into_values().flatten());

    old_rest.sort_by(entry_order);
    new_rest.sort_by(entry_order);

    let old_by_loose = group_by(old_rest, |e| e.loose.clone());
    let mut new_by_loose = group_by(new_rest, |e| e.loose.clone());
    let mut removed: Vec<Entry<'_>> = Vec::new();

    for (loose, olds) in old_by_loose {
        let Some(news) = new_by_loose.remove(&loose) else {
            removed.extend(olds);
            continue;
        };
        let (pairs, o, n) = pair_in_order(olds, news);
        for (a, b) in pairs {
            result.modified.push(modification(&a, &b));
        }
        removed.extend(o);
        new_by_loose.insert(loose, n);
    }
    let mut added: Vec<Entry<'_>> = new_by_loose.into_values().flatten().collect();

    removed.sort_by(entry_order);
    added.sort_by(entry_order);
    result.removed = removed.into_iter().map(|e| e.atom.clone()).collect();
    result.added = added.into_iter().map(|e| e.atom.clone()).collect();
    result.unchanged.sort();
    result.modified.sort_by(|a, b| {
        (&a.clause_id_old, &a.clause_id_new, &a.core_identity_old, &a.core_identity_new).cmp(&(
            &b.clause_id_old,
            &b.clause_id_new,
            &b.core_identity_old,
            &b.core_identity_new,
        ))
    });

    let summary = result.summary();
    tracing::debug!(
        added = summary.added,
        removed = summary.removed,
        unchanged = summary.unchanged,
        modified = summary.modified,
        flags = %flags,
        "Aligned atom sets"
    );
    result
}

/// Align two stored revisions under their recorded flags.
///
/// Fails with `Validation` when the revisions were identified under
/// different flags.
pub fn align_revisions(old: &Revision, new: &Revision) -> Result<DiffResult> {
    let (lf, rf) = (old.flags(), new.flags());
    if lf != rf {
        return Err(ValidationError::IncompatibleFlags {
            left: lf.to_ref_string(),
            right: rf.to_ref_string(),
        }
        .into());
    }
    Ok(align(&old.atoms(), &new.atoms(), &lf))
}
