//! In-memory revision ledger.
//!
//! Uses BTreeMap for deterministic iteration order and one lock per document,
//! so appends to different documents never contend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use tokio::time::Instant;

use super::{AppendRequest, RevisionLedger};
use crate::config::LedgerConfig;
use crate::error::{ConflictReason, KernelError, NotFound, Result, ValidationError};
use crate::types::{DocId, RevId, Revision, RevisionRecord};

/// Pause between attempts to take a busy document lock.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Append-only log of one document.
#[derive(Debug, Default)]
struct DocumentLog {
    /// Revisions by position; `rev_id == index + 1`.
    revisions: Vec<Arc<Revision>>,
    /// `(effective_date, rev_id)` sorted ascending, for as-of binary search.
    by_effective: Vec<(NaiveDate, RevId)>,
    /// Corrected revision -> correcting revision.
    superseded_by: BTreeMap<RevId, RevId>,
}

impl DocumentLog {
    fn head(&self) -> Option<RevId> {
        self.revisions.last().map(|r| r.rev_id)
    }

    fn get(&self, rev_id: RevId) -> Option<&Arc<Revision>> {
        let idx = usize::try_from(rev_id.get()).ok()?.checked_sub(1)?;
        self.revisions.get(idx)
    }

    fn recorded_to(&self, rev_id: RevId) -> Option<DateTime<Utc>> {
        self.superseded_by
            .get(&rev_id)
            .and_then(|c| self.get(*c))
            .map(|c| c.recorded_from)
    }

    fn believed_now(&self, rev: &Revision) -> bool {
        !self.superseded_by.contains_key(&rev.rev_id)
    }

    fn believed_at(&self, rev: &Revision, t: DateTime<Utc>) -> bool {
        rev.recorded_from <= t && self.recorded_to(rev.rev_id).map_or(true, |end| t < end)
    }

    /// Greatest `(effective_date, rev_id)` with `effective_date <= as_of`
    /// among revisions satisfying `believed`.
    fn select_as_of<F>(&self, as_of: NaiveDate, believed: F) -> Option<Arc<Revision>>
    where
        F: Fn(&Revision) -> bool,
    {
        let upper = self.by_effective.partition_point(|(date, _)| *date <= as_of);
        self.by_effective[..upper]
            .iter()
            .rev()
            .filter_map(|(_, rev_id)| self.get(*rev_id))
            .find(|rev| believed(rev))
            .cloned()
    }

    fn push(&mut self, revision: Revision) {
        let key = (revision.effective_date, revision.rev_id);
        let pos = self.by_effective.partition_point(|k| *k < key);
        self.by_effective.insert(pos, key);
        if let Some(target) = revision.corrects {
            self.superseded_by.insert(target, revision.rev_id);
        }
        self.revisions.push(Arc::new(revision));
    }
}

/// In-memory revision ledger for tests, embedding and local tooling.
///
/// A busy document lock is polled with async sleeps until the configured
/// timeout, so a waiting append never parks the runtime thread.
#[derive(Debug)]
pub struct InMemoryLedger {
    documents: RwLock<BTreeMap<DocId, Arc<RwLock<DocumentLog>>>>,
    lock_timeout: Duration,
}

impl InMemoryLedger {
    /// Create a new empty ledger.
    pub fn new() -> Self {
        Self::from_config(&LedgerConfig::default())
    }

    /// Create a ledger using the configured lock timeout.
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            lock_timeout: config.lock_timeout,
        }
    }

    /// Override how long an append waits for the document lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Number of documents with at least one revision.
    pub fn num_documents(&self) -> usize {
        self.documents
            .read()
            .values()
            .filter(|log| !log.read().revisions.is_empty())
            .count()
    }

    fn log(&self, doc_id: &DocId) -> Result<Arc<RwLock<DocumentLog>>> {
        self.documents
            .read()
            .get(doc_id)
            .cloned()
            .ok_or_else(|| NotFound::Document(doc_id.clone()).into())
    }

    fn log_or_create(&self, doc_id: &DocId) -> Arc<RwLock<DocumentLog>> {
        if let Some(log) = self.documents.read().get(doc_id) {
            return log.clone();
        }
        self.documents
            .write()
            .entry(doc_id.clone())
            .or_default()
            .clone()
    }

    /// Drop a log that a rejected first append left empty.
    ///
    /// Only removed while nobody but the map and `log` holds it; every other
    /// holder cloned it under the map lock, which is held here.
    fn prune_if_empty(&self, doc_id: &DocId, log: &Arc<RwLock<DocumentLog>>) {
        let mut documents = self.documents.write();
        let unshared = documents
            .get(doc_id)
            .is_some_and(|held| Arc::ptr_eq(held, log) && Arc::strong_count(log) == 2);
        if unshared && log.try_read().is_some_and(|g| g.revisions.is_empty()) {
            documents.remove(doc_id);
        }
    }

    /// Number of document entries, including ones without revisions.
    #[cfg(test)]
    fn num_entries(&self) -> usize {
        self.documents.read().len()
    }

    /// Run `f` on a non-empty document log under a read lock.
    fn with_log<T>(&self, doc_id: &DocId, f: impl FnOnce(&DocumentLog) -> Result<T>) -> Result<T> {
        let log = self.log(doc_id)?;
        let guard = log.read();
        if guard.revisions.is_empty() {
            return Err(NotFound::Document(doc_id.clone()).into());
        }
        f(&guard)
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Head check, correction check and push, under the document write lock.
fn append_locked(log: &mut DocumentLog, request: &AppendRequest) -> Result<RevId> {
    let head = log.head();
    if let Err(err) = request.expected_head.check(&request.doc_id, head) {
        tracing::warn!(doc_id = %request.doc_id, error = %err, "Append rejected");
        return Err(err);
    }

    if let Some(target) = request.corrects {
        let correctable = log.get(target).is_some() && !log.superseded_by.contains_key(&target);
        if !correctable {
            return Err(ValidationError::InvalidCorrection(target).into());
        }
    }

    let last_recorded = log.revisions.last().map(|r| r.recorded_from);
    let recorded_from = request.resolve_recorded_from(last_recorded)?;
    let rev_id = head.map_or(RevId::FIRST, |h| h.next());
    let revision = request.build_revision(rev_id, recorded_from)?;

    tracing::info!(
        doc_id = %revision.doc_id,
        rev_id = %rev_id,
        effective_date = %revision.effective_date,
        atoms = revision.payload.atoms.len(),
        corrects = ?revision.corrects,
        "Revision appended"
    );
    log.push(revision);
    Ok(rev_id)
}

#[async_trait]
impl RevisionLedger for InMemoryLedger {
    async fn append_revision(&self, request: &AppendRequest) -> Result<RevId> {
        request.validate()?;

        let log = self.log_or_create(&request.doc_id);
        let deadline = Instant::now() + self.lock_timeout;
        let result = loop {
            if let Some(mut guard) = log.try_write() {
                break append_locked(&mut guard, request);
            }
            if Instant::now() >= deadline {
                tracing::warn!(doc_id = %request.doc_id, "Document lock timed out");
                break Err(KernelError::Conflict {
                    doc_id: request.doc_id.clone(),
                    reason: ConflictReason::Contention,
                });
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        };

        if result.is_err() {
            self.prune_if_empty(&request.doc_id, &log);
        }
        result
    }

    async fn get_revision(&self, doc_id: &DocId, rev_id: RevId) -> Result<Revision> {
        self.with_log(doc_id, |log| {
            log.get(rev_id)
                .map(|r| r.as_ref().clone())
                .ok_or_else(|| {
                    NotFound::Revision {
                        doc_id: doc_id.clone(),
                        rev_id,
                    }
                    .into()
                })
        })
    }

    async fn get_as_of(&self, doc_id: &DocId, as_of: NaiveDate) -> Result<Revision> {
        self.with_log(doc_id, |log| {
            log.select_as_of(as_of, |rev| log.believed_now(rev))
                .map(|r| r.as_ref().clone())
                .ok_or_else(|| {
                    NotFound::AsOf {
                        doc_id: doc_id.clone(),
                        as_of,
                    }
                    .into()
                })
        })
    }

    async fn get_as_of_recorded(
        &self,
        doc_id: &DocId,
        as_of: NaiveDate,
        recorded_at: DateTime<Utc>,
    ) -> Result<Revision> {
        self.with_log(doc_id, |log| {
            log.select_as_of(as_of, |rev| log.believed_at(rev, recorded_at))
                .map(|r| r.as_ref().clone())
                .ok_or_else(|| {
                    NotFound::AsOf {
                        doc_id: doc_id.clone(),
                        as_of,
                    }
                    .into()
                })
        })
    }

    async fn get_latest(&self, doc_id: &DocId) -> Result<Revision> {
        self.with_log(doc_id, |log| {
            log.revisions
                .last()
                .map(|r| r.as_ref().clone())
                .ok_or_else(|| NotFound::Document(doc_id.clone()).into())
        })
    }

    async fn history(&self, doc_id: &DocId) -> Result<Vec<RevisionRecord>> {
        self.with_log(doc_id, |log| {
            Ok(log
                .revisions
                .iter()
                .map(|r| RevisionRecord {
                    revision: r.as_ref().clone(),
                    recorded_to: log.recorded_to(r.rev_id),
                })
                .collect())
        })
    }

    async fn documents(&self) -> Result<Vec<DocId>> {
        Ok(self
            .documents
            .read()
            .iter()
            .filter(|(_, log)| !log.read().revisions.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::HeadExpectation;
    use crate::types::{Atom, CanonicalSpan, IdentityFlags, Provenance, StructuredPayload};
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn request(doc: &str, effective: NaiveDate, body: &str) -> AppendRequest {
        AppendRequest::new(
            DocId::new(doc),
            effective,
            body,
            Provenance::new("gazette", at(2019, 12, 1), "src"),
        )
    }

    #[tokio::test]
    async fn test_rev_ids_are_monotonic() {
        let ledger = InMemoryLedger::new();
        let r1 = ledger.append_revision(&request("doc", date(2020, 1, 1), "a")).await.unwrap();
        let r2 = ledger.append_revision(&request("doc", date(2021, 1, 1), "b")).await.unwrap();
        let other = ledger.append_revision(&request("other", date(2020, 1, 1), "c")).await.unwrap();

        assert_eq!(r1, RevId::new(1));
        assert_eq!(r2, RevId::new(2));
        assert_eq!(other, RevId::new(1));
        assert_eq!(ledger.num_documents(), 2);
    }

    #[tokio::test]
    async fn test_get_as_of_selects_greatest_effective_date() {
        let ledger = InMemoryLedger::new();
        let doc = DocId::new("doc");
        ledger.append_revision(&request("doc", date(2020, 1, 1), "r1")).await.unwrap();
        ledger.append_revision(&request("doc", date(2022, 1, 1), "r2")).await.unwrap();
        // Backdated amendment appended later.
        ledger.append_revision(&request("doc", date(2021, 1, 1), "r3")).await.unwrap();

        assert_eq!(ledger.get_as_of(&doc, date(2020, 6, 1)).await.unwrap().body, "r1");
        assert_eq!(ledger.get_as_of(&doc, date(2021, 6, 1)).await.unwrap().body, "r3");
        assert_eq!(ledger.get_as_of(&doc, date(2022, 1, 1)).await.unwrap().body, "r2");
        assert_eq!(ledger.get_latest(&doc).await.unwrap().body, "r3");
    }

    #[tokio::test]
    async fn test_same_effective_date_prefers_later_revision() {
        let ledger = InMemoryLedger::new();
        let doc = DocId::new("doc");
        ledger.append_revision(&request("doc", date(2020, 1, 1), "first")).await.unwrap();
        ledger.append_revision(&request("doc", date(2020, 1, 1), "second")).await.unwrap();
        assert_eq!(ledger.get_as_of(&doc, date(2020, 1, 1)).await.unwrap().body, "second");
    }

    #[tokio::test]
    async fn test_get_as_of_before_first_is_not_found() {
        let ledger = InMemoryLedger::new();
        let doc = DocId::new("doc");
        ledger.append_revision(&request("doc", date(2020, 1, 1), "r1")).await.unwrap();
        let err = ledger.get_as_of(&doc, date(2019, 12, 31)).await.unwrap_err();
        assert!(matches!(err, KernelError::NotFound(NotFound::AsOf { .. })));
    }

    #[tokio::test]
    async fn test_unknown_document_is_not_found() {
        let ledger = InMemoryLedger::new();
        let err = ledger.get_latest(&DocId::new("missing")).await.unwrap_err();
        assert_eq!(err, KernelError::from(NotFound::Document(DocId::new("missing"))));
    }

    #[tokio::test]
    async fn test_failed_validation_writes_nothing() {
        let ledger = InMemoryLedger::new();
        let mut req = request("doc", date(2020, 1, 1), "r1");
        req.provenance.origin.clear();
        assert!(ledger.append_revision(&req).await.is_err());
        assert!(ledger.documents().await.unwrap().is_empty());
        assert!(ledger.get_latest(&DocId::new("doc")).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_head_conflict() {
        let ledger = InMemoryLedger::new();
        let req = request("doc", date(2020, 1, 1), "r1").expecting(HeadExpectation::Empty);
        ledger.append_revision(&req).await.unwrap();

        let err = ledger.append_revision(&req).await.unwrap_err();
        assert!(matches!(
            err,
            KernelError::Conflict { reason: ConflictReason::StaleHead { expected: None, actual: Some(_) }, .. }
        ));

        let fresh = request("doc", date(2021, 1, 1), "r2").expecting(HeadExpectation::At(RevId::FIRST));
        assert_eq!(ledger.append_revision(&fresh).await.unwrap(), RevId::new(2));
    }

    #[tokio::test]
    async fn test_lock_timeout_is_contention() {
        let ledger = InMemoryLedger::new().with_lock_timeout(Duration::from_millis(5));
        ledger.append_revision(&request("doc", date(2020, 1, 1), "r1")).await.unwrap();

        let log = ledger.log(&DocId::new("doc")).unwrap();
        let held = log.write();
        let err = ledger
            .append_revision(&request("doc", date(2021, 1, 1), "r2"))
            .await
            .unwrap_err();
        drop(held);
        assert!(err.is_contention());
    }

    #[tokio::test]
    async fn test_waiting_append_proceeds_once_lock_frees() {
        let ledger = InMemoryLedger::new().with_lock_timeout(Duration::from_secs(2));
        ledger.append_revision(&request("doc", date(2020, 1, 1), "r1")).await.unwrap();

        let log = ledger.log(&DocId::new("doc")).unwrap();
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder = std::thread::spawn(move || {
            let guard = log.write();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(30));
            drop(guard);
        });
        locked_rx.recv().unwrap();

        let rev = ledger
            .append_revision(&request("doc", date(2021, 1, 1), "r2"))
            .await
            .unwrap();
        holder.join().unwrap();
        assert_eq!(rev, RevId::new(2));
    }

    #[tokio::test]
    async fn test_rejected_first_append_leaves_no_entry() {
        let ledger = InMemoryLedger::new();

        let stale = request("doc", date(2020, 1, 1), "r1").expecting(HeadExpectation::At(RevId::FIRST));
        assert!(ledger.append_revision(&stale).await.is_err());
        let bad_fix = request("fix", date(2020, 1, 1), "r1").correcting(RevId::FIRST);
        assert!(ledger.append_revision(&bad_fix).await.is_err());

        assert_eq!(ledger.num_entries(), 0);
        assert!(ledger.documents().await.unwrap().is_empty());

        ledger.append_revision(&request("doc", date(2020, 1, 1), "r1")).await.unwrap();
        assert_eq!(ledger.num_entries(), 1);
    }

    #[tokio::test]
    async fn test_inconsistent_payload_is_rejected() {
        let ledger = InMemoryLedger::new();
        let atom = Atom::new("c1", CanonicalSpan::new(0, 12, "keep records")).with_actor("The operator");
        let mut payload = StructuredPayload::from_atoms(vec![atom], IdentityFlags::full());
        payload.flags = IdentityFlags::span_only();

        let req = request("doc", date(2020, 1, 1), "r1").with_payload(payload);
        assert_eq!(
            ledger.append_revision(&req).await,
            Err(KernelError::Validation(ValidationError::InconsistentPayload {
                clause_id: "c1".to_string(),
            }))
        );
        assert_eq!(ledger.num_entries(), 0);
        assert!(ledger.get_latest(&DocId::new("doc")).await.is_err());
    }

    #[tokio::test]
    async fn test_correction_bitemporal() {
        let ledger = InMemoryLedger::new();
        let doc = DocId::new("doc");
        ledger
            .append_revision(&request("doc", date(2020, 1, 1), "7 years").recorded_at(at(2020, 1, 2)))
            .await
            .unwrap();
        let fix = ledger
            .append_revision(
                &request("doc", date(2020, 1, 1), "10 years")
                    .correcting(RevId::FIRST)
                    .recorded_at(at(2020, 3, 1)),
            )
            .await
            .unwrap();

        // Current belief.
        assert_eq!(ledger.get_as_of(&doc, date(2020, 6, 1)).await.unwrap().rev_id, fix);
        // What we believed before the correction was recorded.
        let then = ledger
            .get_as_of_recorded(&doc, date(2020, 6, 1), at(2020, 2, 1))
            .await
            .unwrap();
        assert_eq!(then.body, "7 years");
        // Before anything was recorded.
        assert!(ledger
            .get_as_of_recorded(&doc, date(2020, 6, 1), at(2020, 1, 1))
            .await
            .is_err());

        let history = ledger.history(&doc).await.unwrap();
        assert_eq!(history[0].recorded_to, Some(at(2020, 3, 1)));
        assert_eq!(history[1].recorded_to, None);
        // The corrected revision itself is untouched.
        assert_eq!(history[0].revision.body, "7 years");
    }

    #[tokio::test]
    async fn test_invalid_correction_targets() {
        let ledger = InMemoryLedger::new();
        ledger.append_revision(&request("doc", date(2020, 1, 1), "r1")).await.unwrap();

        let missing = request("doc", date(2020, 1, 1), "x").correcting(RevId::new(9));
        assert!(matches!(
            ledger.append_revision(&missing).await,
            Err(KernelError::Validation(ValidationError::InvalidCorrection(_)))
        ));

        let fix = request("doc", date(2020, 1, 1), "r2").correcting(RevId::FIRST);
        ledger.append_revision(&fix).await.unwrap();
        assert!(ledger.append_revision(&fix).await.is_err());
    }

    #[tokio::test]
    async fn test_revisions_are_never_overwritten() {
        let ledger = InMemoryLedger::new();
        let doc = DocId::new("doc");
        ledger.append_revision(&request("doc", date(2020, 1, 1), "r1")).await.unwrap();
        let before = ledger.get_revision(&doc, RevId::FIRST).await.unwrap();
        ledger.append_revision(&request("doc", date(2020, 1, 1), "r2")).await.unwrap();
        assert_eq!(ledger.get_revision(&doc, RevId::FIRST).await.unwrap(), before);
        assert!(ledger.get_revision(&doc, RevId::new(3)).await.is_err());
    }
}
