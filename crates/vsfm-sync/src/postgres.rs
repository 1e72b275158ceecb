//! Postgres-backed manifest store. Every mutation runs in its own
//! transaction; the table constraints back the lineage invariants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;
use vsfm_core::{
    FailedAttempt, FileRecord, FileStatus, FileType, NewFileRecord, Scope, ScopeSummary, StatusTotal,
};

use crate::manifest::{ManifestError, ManifestStore};

const RECORD_COLUMNS: &str = r#"
    id, source_id, file_type, program, period, url, filename, saved_path, bytes, sha256,
    etag, last_modified, version, status, error_message, downloaded_at, created_at, updated_at
"#;

#[derive(Clone)]
pub struct PgManifestStore {
    pool: PgPool,
}

impl PgManifestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, ManifestError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(store_error)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), ManifestError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|err| ManifestError::Backend(format!("migration failed: {err}")))?;
        info!("file_manifest migrations applied");
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, ManifestError> {
        self.pool.begin().await.map_err(store_error)
    }

    async fn fetch_records(
        &self,
        sql: &str,
        period: &str,
        url: &str,
    ) -> Result<Vec<FileRecord>, ManifestError> {
        let rows = sqlx::query(sql)
            .bind(period)
            .bind(url)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter().map(record_from_row).collect()
    }
}

/// Connectivity failures abort a pass; constraint hits are conflicts.
fn store_error(err: sqlx::Error) -> ManifestError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ManifestError::Unavailable(err.to_string()),
        _ => ManifestError::Backend(err.to_string()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn record_from_row(row: &PgRow) -> Result<FileRecord, ManifestError> {
    let decode = |err: sqlx::Error| ManifestError::Backend(format!("decoding file_manifest row: {err}"));
    let file_type: String = row.try_get("file_type").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;
    Ok(FileRecord {
        id: row.try_get("id").map_err(decode)?,
        source_id: row.try_get("source_id").map_err(decode)?,
        file_type: file_type
            .parse::<FileType>()
            .map_err(|err| ManifestError::Backend(err.to_string()))?,
        program: row.try_get("program").map_err(decode)?,
        period: row.try_get("period").map_err(decode)?,
        url: row.try_get("url").map_err(decode)?,
        filename: row.try_get("filename").map_err(decode)?,
        saved_path: row.try_get("saved_path").map_err(decode)?,
        bytes: row.try_get("bytes").map_err(decode)?,
        sha256: row.try_get("sha256").map_err(decode)?,
        etag: row.try_get("etag").map_err(decode)?,
        last_modified: row.try_get("last_modified").map_err(decode)?,
        version: row.try_get("version").map_err(decode)?,
        status: status
            .parse::<FileStatus>()
            .map_err(|err| ManifestError::Backend(err.to_string()))?,
        error_message: row.try_get("error_message").map_err(decode)?,
        downloaded_at: row.try_get("downloaded_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

#[async_trait]
impl ManifestStore for PgManifestStore {
    async fn find_active(&self, period: &str, url: &str) -> Result<Option<FileRecord>, ManifestError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM file_manifest WHERE period = $1 AND url = $2 AND status = 'active'"
        );
        Ok(self.fetch_records(&sql, period, url).await?.into_iter().next())
    }

    async fn find_latest(&self, period: &str, url: &str) -> Result<Option<FileRecord>, ManifestError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM file_manifest WHERE period = $1 AND url = $2 ORDER BY version DESC LIMIT 1"
        );
        Ok(self.fetch_records(&sql, period, url).await?.into_iter().next())
    }

    async fn find_all_active(&self, scope: &Scope) -> Result<Vec<FileRecord>, ManifestError> {
        let sql = format!(
            r#"
            SELECT {RECORD_COLUMNS}
              FROM file_manifest
             WHERE status = 'active'
               AND source_id = $1
               AND file_type = $2
               AND program IS NOT DISTINCT FROM $3
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(&scope.source_id)
            .bind(scope.file_type.as_str())
            .bind(scope.program.as_deref())
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn upsert_new_version(
        &self,
        record: NewFileRecord,
        at: DateTime<Utc>,
    ) -> Result<FileRecord, ManifestError> {
        let conflict = || ManifestError::DuplicateVersionConflict {
            period: record.period.clone(),
            url: record.url.clone(),
            version: record.version,
        };
        let mut tx = self.begin().await?;

        // Serialise writers of the same lineage for the rest of the transaction.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1 || '|' || $2, 0))")
            .bind(&record.period)
            .bind(&record.url)
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;

        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM file_manifest
                 WHERE period = $1 AND url = $2 AND version >= $3
                   AND NOT (status = 'failed' AND downloaded_at IS NULL)
            )
            "#,
        )
        .bind(&record.period)
        .bind(&record.url)
        .bind(record.version)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;
        if taken {
            return Err(conflict());
        }

        sqlx::query(
            r#"
            UPDATE file_manifest
               SET status = 'replaced', updated_at = $3
             WHERE period = $1 AND url = $2 AND status IN ('active', 'missing')
            "#,
        )
        .bind(&record.period)
        .bind(&record.url)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;

        let sql = format!(
            r#"
            INSERT INTO file_manifest (
                id, source_id, file_type, program, period, url, filename, saved_path, bytes, sha256,
                etag, last_modified, version, status, error_message, downloaded_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, 'active', NULL, $14, $14, $14)
            ON CONFLICT (period, url, version) DO UPDATE
               SET source_id = EXCLUDED.source_id,
                   file_type = EXCLUDED.file_type,
                   program = EXCLUDED.program,
                   filename = EXCLUDED.filename,
                   saved_path = EXCLUDED.saved_path,
                   bytes = EXCLUDED.bytes,
                   sha256 = EXCLUDED.sha256,
                   etag = EXCLUDED.etag,
                   last_modified = EXCLUDED.last_modified,
                   status = 'active',
                   error_message = NULL,
                   downloaded_at = EXCLUDED.downloaded_at,
                   updated_at = EXCLUDED.updated_at
             WHERE file_manifest.status = 'failed' AND file_manifest.downloaded_at IS NULL
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&record.source_id)
            .bind(record.file_type.as_str())
            .bind(record.program.as_deref())
            .bind(&record.period)
            .bind(&record.url)
            .bind(&record.filename)
            .bind(&record.saved_path)
            .bind(record.bytes)
            .bind(&record.sha256)
            .bind(record.etag.as_deref())
            .bind(record.last_modified.as_deref())
            .bind(record.version)
            .bind(at)
            .fetch_optional(&mut *tx)
            .await;

        let row = match inserted {
            Ok(Some(row)) => row,
            // The conflict target matched a row that is not a placeholder.
            Ok(None) => return Err(conflict()),
            Err(err) if is_unique_violation(&err) => return Err(conflict()),
            Err(err) => return Err(store_error(err)),
        };
        let stored = record_from_row(&row)?;

        match tx.commit().await {
            Ok(()) => Ok(stored),
            Err(err) if is_unique_violation(&err) => Err(conflict()),
            Err(err) => Err(store_error(err)),
        }
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ManifestError> {
        let result = sqlx::query("UPDATE file_manifest SET updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        if result.rows_affected() == 0 {
            return Err(ManifestError::RecordNotFound { id });
        }
        Ok(())
    }

    async fn confirm(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ManifestError> {
        let result = sqlx::query(
            "UPDATE file_manifest SET error_message = NULL, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        if result.rows_affected() == 0 {
            return Err(ManifestError::RecordNotFound { id });
        }
        Ok(())
    }

    async fn mark_missing(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64, ManifestError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE file_manifest
               SET status = 'missing', updated_at = $2
             WHERE id = ANY($1) AND status = 'active'
            "#,
        )
        .bind(ids)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;
        tx.commit().await.map_err(store_error)?;
        Ok(result.rows_affected())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ManifestError> {
        let result = sqlx::query(
            "UPDATE file_manifest SET error_message = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(error_message)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        if result.rows_affected() == 0 {
            return Err(ManifestError::RecordNotFound { id });
        }
        Ok(())
    }

    async fn record_failed_attempt(
        &self,
        attempt: FailedAttempt,
        at: DateTime<Utc>,
    ) -> Result<FileRecord, ManifestError> {
        let sql = format!(
            r#"
            INSERT INTO file_manifest (
                id, source_id, file_type, program, period, url, filename, version, status,
                error_message, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'failed', $9, $10, $10)
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&attempt.source_id)
            .bind(attempt.file_type.as_str())
            .bind(attempt.program.as_deref())
            .bind(&attempt.period)
            .bind(&attempt.url)
            .bind(&attempt.filename)
            .bind(attempt.version)
            .bind(&attempt.error_message)
            .bind(at)
            .fetch_one(&self.pool)
            .await;
        match inserted {
            Ok(row) => record_from_row(&row),
            Err(err) if is_unique_violation(&err) => Err(ManifestError::DuplicateVersionConflict {
                period: attempt.period,
                url: attempt.url,
                version: attempt.version,
            }),
            Err(err) => Err(store_error(err)),
        }
    }

    async fn lineage_history(&self, period: &str, url: &str) -> Result<Vec<FileRecord>, ManifestError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM file_manifest WHERE period = $1 AND url = $2 ORDER BY version ASC"
        );
        self.fetch_records(&sql, period, url).await
    }

    async fn active_files_summary(&self) -> Result<Vec<ScopeSummary>, ManifestError> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, file_type, program, file_count, total_bytes,
                   earliest_download, latest_download
              FROM active_files_summary
             ORDER BY source_id, file_type, program NULLS FIRST
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let decode = |err: sqlx::Error| ManifestError::Backend(format!("decoding summary row: {err}"));
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let file_type: String = row.try_get("file_type").map_err(decode)?;
            out.push(ScopeSummary {
                source_id: row.try_get("source_id").map_err(decode)?,
                file_type: file_type
                    .parse()
                    .map_err(|err: vsfm_core::ParseEnumError| ManifestError::Backend(err.to_string()))?,
                program: row.try_get("program").map_err(decode)?,
                file_count: row.try_get("file_count").map_err(decode)?,
                total_bytes: row.try_get("total_bytes").map_err(decode)?,
                earliest_download: row.try_get("earliest_download").map_err(decode)?,
                latest_download: row.try_get("latest_download").map_err(decode)?,
            });
        }
        Ok(out)
    }

    async fn missing_files(&self, limit: i64) -> Result<Vec<FileRecord>, ManifestError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM missing_files LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn recent_downloads(&self, limit: i64) -> Result<Vec<FileRecord>, ManifestError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM recent_downloads LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;
        rows.iter().map(record_from_row).collect()
    }

    async fn status_totals(&self) -> Result<Vec<StatusTotal>, ManifestError> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*)::BIGINT AS count, COALESCE(SUM(bytes), 0)::BIGINT AS total_bytes
              FROM file_manifest
             GROUP BY status
             ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        let decode = |err: sqlx::Error| ManifestError::Backend(format!("decoding status row: {err}"));
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.try_get("status").map_err(decode)?;
            out.push(StatusTotal {
                status: status
                    .parse()
                    .map_err(|err: vsfm_core::ParseEnumError| ManifestError::Backend(err.to_string()))?,
                count: row.try_get("count").map_err(decode)?,
                total_bytes: row.try_get("total_bytes").map_err(decode)?,
            });
        }
        Ok(out)
    }

    async fn health_check(&self) -> Result<(), ManifestError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_counts_as_unavailable() {
        assert!(matches!(
            store_error(sqlx::Error::PoolTimedOut),
            ManifestError::Unavailable(_)
        ));
        assert!(matches!(
            store_error(sqlx::Error::RowNotFound),
            ManifestError::Backend(_)
        ));
    }

    /// Set `VSFM_TEST_DATABASE_URL` to a scratch database and run with
    /// `--ignored`. Each run writes lineages under a fresh namespace.
    #[tokio::test]
    #[ignore = "needs a Postgres database in VSFM_TEST_DATABASE_URL"]
    async fn postgres_store_passes_the_conformance_suite() {
        let Ok(database_url) = std::env::var("VSFM_TEST_DATABASE_URL") else {
            eprintln!("VSFM_TEST_DATABASE_URL unset; skipping");
            return;
        };
        let store = PgManifestStore::connect(&database_url, 2).await.unwrap();
        store.migrate().await.unwrap();

        let namespace = Uuid::new_v4().to_string();
        let failures = crate::conformance::run_conformance_suite(&store, &namespace).await;
        assert!(failures.is_empty(), "{failures:#?}");
    }

    #[test]
    fn record_columns_cover_every_field() {
        let columns: Vec<&str> = RECORD_COLUMNS
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        assert_eq!(columns.len(), 18);
        assert!(columns.contains(&"downloaded_at"));
    }
}
