//! Read-only queries and projections over a supplied atom collection.
//!
//! Both operations are pure: they take atoms (usually a revision's
//! [`Revision::atoms`](crate::types::Revision::atoms)) and never touch the
//! ledger.
//!
//! ## Views
//!
//! | View | Row key | Order |
//! |------|---------|-------|
//! | `actor` | declared actor | key ascending, undeclared last |
//! | `action` | declared action | key ascending, undeclared last |
//! | `clause` | clause id | clause id ascending |
//! | `timeline` | clause id, one row per atom | date anchor, undated last, then clause id and offsets |

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical_text::canonicalize;
use crate::error::{Result, ValidationError};
use crate::types::{Atom, ClauseId, Modality, RawSpan};

/// Conjunctive atom filter. `None` fields impose no constraint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Declared actor text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Declared action text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Declared object text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Any scope entry with this category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_category: Option<String>,
    /// Any lifecycle entry with this kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle_kind: Option<String>,
    /// Exact clause id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clause_id: Option<ClauseId>,
    /// Declared modality.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<Modality>,
    /// Declared external reference id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

impl QueryFilters {
    /// Filter on actor.
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Filter on action.
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Filter on scope category.
    pub fn scope_category(mut self, category: impl Into<String>) -> Self {
        self.scope_category = Some(category.into());
        self
    }

    /// Filter on modality.
    pub fn modality(mut self, modality: Modality) -> Self {
        self.modality = Some(modality);
        self
    }

    /// Parse filters from a JSON object.
    ///
    /// Unknown keys fail with [`ValidationError::UnknownFilter`]; non-string
    /// values and unknown modalities with [`ValidationError::InvalidFilter`].
    /// `null` values are treated as absent.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(ValidationError::InvalidFilter {
                field: "filters".to_string(),
                message: "expected a JSON object".to_string(),
            }
            .into());
        };

        let mut filters = Self::default();
        for (key, raw) in map {
            let text = match raw {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => {
                    return Err(ValidationError::InvalidFilter {
                        field: key.clone(),
                        message: format!("expected a string, got {other}"),
                    }
                    .into())
                }
            };
            match key.as_str() {
                "actor" => filters.actor = text,
                "action" => filters.action = text,
                "object" => filters.object = text,
                "scope_category" => filters.scope_category = text,
                "lifecycle_kind" => filters.lifecycle_kind = text,
                "clause_id" => filters.clause_id = text.map(ClauseId::new),
                "reference_id" => filters.reference_id = text,
                "modality" => {
                    filters.modality = match text {
                        None => None,
                        Some(m) => Some(Modality::from_str(&m).ok_or_else(|| {
                            ValidationError::InvalidFilter {
                                field: key.clone(),
                                message: format!("unknown modality `{m}`"),
                            }
                        })?),
                    }
                }
                _ => return Err(ValidationError::UnknownFilter(key.clone()).into()),
            }
        }
        Ok(filters)
    }

    /// True when no field constrains.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Check one atom against every present field.
    pub fn matches(&self, atom: &Atom) -> bool {
        fn text_eq(filter: &Option<String>, value: &Option<String>) -> bool {
            match filter {
                None => true,
                Some(f) => value.as_deref() == Some(canonicalize(f).as_str()),
            }
        }

        text_eq(&self.actor, &atom.actor)
            && text_eq(&self.action, &atom.action)
            && text_eq(&self.object, &atom.object)
            && self
                .scope_category
                .as_ref()
                .map_or(true, |c| atom.scope.iter().any(|s| &s.category == c))
            && self
                .lifecycle_kind
                .as_ref()
                .map_or(true, |k| atom.lifecycle.iter().any(|l| &l.kind == k))
            && self.clause_id.as_ref().map_or(true, |c| &atom.clause_id == c)
            && self.modality.map_or(true, |m| atom.modality == m)
            && self
                .reference_id
                .as_ref()
                .map_or(true, |r| atom.references.contains(r))
    }
}

/// Atoms matching every filter, in source order.
pub fn query(atoms: &[Atom], filters: &QueryFilters) -> Vec<Atom> {
    let results: Vec<Atom> = atoms.iter().filter(|a| filters.matches(a)).cloned().collect();
    tracing::debug!(total = atoms.len(), matched = results.len(), "Queried atoms");
    results
}

/// Supported projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    /// Group by actor.
    Actor,
    /// Group by action.
    Action,
    /// Group by clause id.
    Clause,
    /// One row per atom ordered by date anchor.
    Timeline,
}

impl ViewKind {
    /// Parse a view name, rejecting anything unsupported.
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "actor" => Ok(Self::Actor),
            "action" => Ok(Self::Action),
            "clause" => Ok(Self::Clause),
            "timeline" => Ok(Self::Timeline),
            other => Err(ValidationError::UnsupportedView(other.to_string()).into()),
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Actor => "actor",
            Self::Action => "action",
            Self::Clause => "clause",
            Self::Timeline => "timeline",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRow {
    /// Group key; `None` collects atoms that declare no value.
    pub key: Option<String>,
    /// Earliest lifecycle date in the row.
    pub date_anchor: Option<NaiveDate>,
    /// Distinct clause ids in source order.
    pub clause_ids: Vec<ClauseId>,
    /// Offsets of every atom in the row, in row order; tells apart atoms that
    /// share a clause.
    pub spans: Vec<RawSpan>,
    /// Number of atoms in the row.
    pub count: usize,
}

impl ViewRow {
    fn from_group(key: Option<String>, atoms: &[&Atom]) -> Self {
        let mut clause_ids: Vec<ClauseId> = Vec::new();
        for a in atoms {
            if !clause_ids.contains(&a.clause_id) {
                clause_ids.push(a.clause_id.clone());
            }
        }
        Self {
            key,
            date_anchor: atoms.iter().filter_map(|a| a.date_anchor()).min(),
            clause_ids,
            spans: atoms.iter().map(|a| raw_span(a)).collect(),
            count: atoms.len(),
        }
    }
}

fn raw_span(atom: &Atom) -> RawSpan {
    RawSpan {
        start: atom.span.start,
        end: atom.span.end,
    }
}

fn group_rows<'a>(atoms: &'a [Atom], key: impl Fn(&'a Atom) -> Option<&'a str>) -> Vec<ViewRow> {
    let mut declared: BTreeMap<&str, Vec<&Atom>> = BTreeMap::new();
    let mut undeclared: Vec<&Atom> = Vec::new();
    for atom in atoms {
        match key(atom) {
            Some(k) => declared.entry(k).or_default().push(atom),
            None => undeclared.push(atom),
        }
    }
    let mut rows: Vec<ViewRow> = declared
        .into_iter()
        .map(|(k, group)| ViewRow::from_group(Some(k.to_string()), &group))
        .collect();
    if !undeclared.is_empty() {
        rows.push(ViewRow::from_group(None, &undeclared));
    }
    rows
}

/// Deterministic projection of `atoms` under `view`.
pub fn project(atoms: &[Atom], view: ViewKind) -> Vec<ViewRow> {
    match view {
        ViewKind::Actor => group_rows(atoms, |a| a.actor.as_deref()),
        ViewKind::Action => group_rows(atoms, |a| a.action.as_deref()),
        ViewKind::Clause => group_rows(atoms, |a| Some(a.clause_id.as_str())),
        ViewKind::Timeline => {
            let mut ordered: Vec<&Atom> = atoms.iter().collect();
            // Undated sorts after every dated atom.
            ordered.sort_by(|a, b| {
                let (da, db) = (a.date_anchor(), b.date_anchor());
                (da.is_none(), da, &a.clause_id, a.span.start, a.span.end).cmp(&(
                    db.is_none(),
                    db,
                    &b.clause_id,
                    b.span.start,
                    b.span.end,
                ))
            });
            ordered
                .into_iter()
                .map(|a| ViewRow::from_group(Some(a.clause_id.to_string()), &[a]))
                .collect()
        }
    }
}
