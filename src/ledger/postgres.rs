//! PostgreSQL revision ledger.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! Writers are serialized by the `(doc_id, rev_id)` primary key: two appends
//! racing for the same next id end with one unique violation, reported as a
//! retryable contention conflict. Every revision read back is re-verified
//! against its stored checksum and identities.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Executor, Row};

use super::{AppendRequest, RevisionLedger};
use crate::error::{ConflictReason, KernelError, NotFound, Result, ValidationError};
use crate::types::{DocId, RevId, Revision, RevisionRecord};

/// DDL for the ledger tables.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS obligation_documents (
    doc_id TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS obligation_revisions (
    doc_id             TEXT        NOT NULL REFERENCES obligation_documents (doc_id),
    rev_id             BIGINT      NOT NULL,
    effective_date     DATE        NOT NULL,
    recorded_from      TIMESTAMPTZ NOT NULL,
    corrects           BIGINT,
    checksum           TEXT        NOT NULL,
    body               TEXT        NOT NULL,
    metadata           JSONB       NOT NULL,
    provenance         JSONB       NOT NULL,
    structured_payload JSONB       NOT NULL,
    PRIMARY KEY (doc_id, rev_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS obligation_revisions_corrects
    ON obligation_revisions (doc_id, corrects) WHERE corrects IS NOT NULL;

CREATE INDEX IF NOT EXISTS obligation_revisions_effective
    ON obligation_revisions (doc_id, effective_date, rev_id);
"#;

const REVISION_COLUMNS: &str = "r.doc_id, r.rev_id, r.effective_date, r.recorded_from, r.corrects, \
     r.checksum, r.body, r.metadata, r.provenance, r.structured_payload";

const UNIQUE_VIOLATION: &str = "23505";

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        }
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/obligations".to_string()),
            max_connections: var("DB_MAX_CONNECTIONS", 10),
            min_connections: var("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: var("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: var("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: var("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl From<sqlx::Error> for KernelError {
    fn from(err: sqlx::Error) -> Self {
        KernelError::Storage(err.to_string())
    }
}

fn json_error(column: &str, err: serde_json::Error) -> KernelError {
    KernelError::Storage(format!("column {column} is not valid: {err}"))
}

fn rev_to_db(rev_id: RevId) -> Result<i64> {
    i64::try_from(rev_id.get()).map_err(|_| KernelError::Storage(format!("rev_id {rev_id} exceeds BIGINT")))
}

fn rev_from_db(value: i64) -> Result<RevId> {
    u64::try_from(value)
        .map(RevId::new)
        .map_err(|_| KernelError::Storage(format!("negative rev_id {value}")))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

/// PostgreSQL revision ledger.
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Connect with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Connect using environment variables.
    pub async fn from_env() -> Result<Self> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if missing.
    pub async fn migrate(&self) -> Result<()> {
        self.pool.execute(SCHEMA).await?;
        Ok(())
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Parse and verify a revision row.
    fn parse_revision_row(row: &PgRow) -> Result<Revision> {
        let corrects: Option<i64> = row.try_get("corrects")?;
        let metadata: serde_json::Value = row.try_get("metadata")?;
        let provenance: serde_json::Value = row.try_get("provenance")?;
        let payload: serde_json::Value = row.try_get("structured_payload")?;

        let revision = Revision {
            doc_id: DocId::new(row.try_get::<String, _>("doc_id")?),
            rev_id: rev_from_db(row.try_get("rev_id")?)?,
            effective_date: row.try_get("effective_date")?,
            recorded_from: row.try_get("recorded_from")?,
            corrects: corrects.map(rev_from_db).transpose()?,
            metadata: serde_json::from_value(metadata).map_err(|e| json_error("metadata", e))?,
            body: row.try_get("body")?,
            checksum: row.try_get("checksum")?,
            provenance: serde_json::from_value(provenance).map_err(|e| json_error("provenance", e))?,
            payload: serde_json::from_value(payload)
                .map_err(|e| json_error("structured_payload", e))?,
        };

        if let Err(err) = revision.verify() {
            tracing::error!(
                doc_id = %revision.doc_id,
                rev_id = %revision.rev_id,
                error = %err,
                "Stored revision failed verification"
            );
            return Err(err);
        }
        Ok(revision)
    }

    async fn ensure_document(&self, doc_id: &DocId) -> Result<()> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM obligation_revisions WHERE doc_id = $1)",
        )
        .bind(doc_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        if exists {
            Ok(())
        } else {
            Err(NotFound::Document(doc_id.clone()).into())
        }
    }

    async fn fetch_as_of(
        &self,
        doc_id: &DocId,
        as_of: NaiveDate,
        recorded_at: Option<DateTime<Utc>>,
    ) -> Result<Revision> {
        self.ensure_document(doc_id).await?;

        // $3 NULL means "currently believed": no correction exists at all.
        let sql = format!(
            r#"
            SELECT {REVISION_COLUMNS}
            FROM obligation_revisions r
            WHERE r.doc_id = $1
              AND r.effective_date <= $2
              AND ($3::timestamptz IS NULL OR r.recorded_from <= $3)
              AND NOT EXISTS (
                  SELECT 1 FROM obligation_revisions c
                  WHERE c.doc_id = r.doc_id
                    AND c.corrects = r.rev_id
                    AND ($3::timestamptz IS NULL OR c.recorded_from <= $3)
              )
            ORDER BY r.effective_date DESC, r.rev_id DESC
            LIMIT 1
            "#
        );
        let row = sqlx::query(&sql)
            .bind(doc_id.as_str())
            .bind(as_of)
            .bind(recorded_at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Self::parse_revision_row(r),
            None => Err(NotFound::AsOf {
                doc_id: doc_id.clone(),
                as_of,
            }
            .into()),
        }
    }
}

#[async_trait]
impl RevisionLedger for PostgresLedger {
    async fn append_revision(&self, request: &AppendRequest) -> Result<RevId> {
        request.validate()?;
        let doc_id = &request.doc_id;
        let contention = || KernelError::Conflict {
            doc_id: doc_id.clone(),
            reason: ConflictReason::Contention,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO obligation_documents (doc_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(doc_id.as_str())
            .execute(&mut *tx)
            .await?;

        let head_row = sqlx::query(
            "SELECT rev_id, recorded_from FROM obligation_revisions \
             WHERE doc_id = $1 ORDER BY rev_id DESC LIMIT 1",
        )
        .bind(doc_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        let (head, last_recorded) = match head_row {
            Some(ref r) => (
                Some(rev_from_db(r.try_get("rev_id")?)?),
                Some(r.try_get::<DateTime<Utc>, _>("recorded_from")?),
            ),
            None => (None, None),
        };

        if let Err(err) = request.expected_head.check(doc_id, head) {
            tracing::warn!(doc_id = %doc_id, error = %err, "Append rejected");
            return Err(err);
        }

        if let Some(target) = request.corrects {
            let correctable: bool = sqlx::query_scalar(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM obligation_revisions
                    WHERE doc_id = $1 AND rev_id = $2
                ) AND NOT EXISTS (
                    SELECT 1 FROM obligation_revisions
                    WHERE doc_id = $1 AND corrects = $2
                )
                "#,
            )
            .bind(doc_id.as_str())
            .bind(rev_to_db(target)?)
            .fetch_one(&mut *tx)
            .await?;
            if !correctable {
                return Err(ValidationError::InvalidCorrection(target).into());
            }
        }

        let recorded_from = request.resolve_recorded_from(last_recorded)?.trunc_subsecs(6);
        let rev_id = head.map_or(RevId::FIRST, |h| h.next());
        let revision = request.build_revision(rev_id, recorded_from)?;

        let to_json = |column: &str, value: serde_json::Result<serde_json::Value>| {
            value.map_err(|e| json_error(column, e))
        };
        let inserted = sqlx::query(
            r#"
            INSERT INTO obligation_revisions
                (doc_id, rev_id, effective_date, recorded_from, corrects,
                 checksum, body, metadata, provenance, structured_payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(revision.doc_id.as_str())
        .bind(rev_to_db(revision.rev_id)?)
        .bind(revision.effective_date)
        .bind(revision.recorded_from)
        .bind(revision.corrects.map(rev_to_db).transpose()?)
        .bind(&revision.checksum)
        .bind(&revision.body)
        .bind(to_json("metadata", serde_json::to_value(&revision.metadata))?)
        .bind(to_json("provenance", serde_json::to_value(&revision.provenance))?)
        .bind(to_json("structured_payload", serde_json::to_value(&revision.payload))?)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                tracing::warn!(doc_id = %doc_id, rev_id = %rev_id, "Concurrent append won the revision id");
                return Err(contention());
            }
            Err(err) => return Err(err.into()),
        }

        match tx.commit().await {
            Ok(()) => {}
            Err(err) if is_unique_violation(&err) => return Err(contention()),
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            doc_id = %doc_id,
            rev_id = %rev_id,
            effective_date = %revision.effective_date,
            atoms = revision.payload.atoms.len(),
            corrects = ?revision.corrects,
            "Revision appended"
        );
        Ok(rev_id)
    }

    async fn get_revision(&self, doc_id: &DocId, rev_id: RevId) -> Result<Revision> {
        self.ensure_document(doc_id).await?;
        let sql = format!(
            "SELECT {REVISION_COLUMNS} FROM obligation_revisions r WHERE r.doc_id = $1 AND r.rev_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(doc_id.as_str())
            .bind(rev_to_db(rev_id)?)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(ref r) => Self::parse_revision_row(r),
            None => Err(NotFound::Revision {
                doc_id: doc_id.clone(),
                rev_id,
            }
            .into()),
        }
    }

    async fn get_as_of(&self, doc_id: &DocId, as_of: NaiveDate) -> Result<Revision> {
        self.fetch_as_of(doc_id, as_of, None).await
    }

    async fn get_as_of_recorded(
        &self,
        doc_id: &DocId,
        as_of: NaiveDate,
        recorded_at: DateTime<Utc>,
    ) -> Result<Revision> {
        self.fetch_as_of(doc_id, as_of, Some(recorded_at)).await
    }

    async fn get_latest(&self, doc_id: &DocId) -> Result<Revision> {
        let sql = format!(
            "SELECT {REVISION_COLUMNS} FROM obligation_revisions r \
             WHERE r.doc_id = $1 ORDER BY r.rev_id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(doc_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(ref r) => Self::parse_revision_row(r),
            None => Err(NotFound::Document(doc_id.clone()).into()),
        }
    }

    async fn history(&self, doc_id: &DocId) -> Result<Vec<RevisionRecord>> {
        let sql = format!(
            r#"
            SELECT {REVISION_COLUMNS}, c.recorded_from AS recorded_to
            FROM obligation_revisions r
            LEFT JOIN obligation_revisions c
              ON c.doc_id = r.doc_id AND c.corrects = r.rev_id
            WHERE r.doc_id = $1
            ORDER BY r.rev_id
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(doc_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(NotFound::Document(doc_id.clone()).into());
        }
        rows.iter()
            .map(|row| {
                Ok(RevisionRecord {
                    revision: Self::parse_revision_row(row)?,
                    recorded_to: row.try_get("recorded_to")?,
                })
            })
            .collect()
    }

    async fn documents(&self) -> Result<Vec<DocId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT doc_id FROM obligation_revisions ORDER BY doc_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(DocId::new).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rev_id_conversions() {
        assert_eq!(rev_to_db(RevId::new(7)).unwrap(), 7);
        assert_eq!(rev_from_db(7).unwrap(), RevId::new(7));
        assert!(rev_from_db(-1).is_err());
        assert!(rev_to_db(RevId::new(u64::MAX)).is_err());
    }

    #[test]
    fn test_schema_declares_primary_key() {
        assert!(SCHEMA.contains("PRIMARY KEY (doc_id, rev_id)"));
        assert!(SCHEMA.contains("obligation_documents"));
    }

    #[test]
    fn test_sqlx_error_maps_to_storage() {
        let err: KernelError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, KernelError::Storage(_)));
        assert!(!err.is_retryable());
    }
}
