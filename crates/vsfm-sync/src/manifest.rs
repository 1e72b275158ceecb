//! The manifest store contract.
//!
//! Every mutating call is one atomic transaction and takes the timestamp it
//! should stamp, so a reconciliation pass writes its own observation time
//! rather than wall-clock time at commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;
use vsfm_core::{FailedAttempt, FileRecord, NewFileRecord, Scope, ScopeSummary, StatusTotal};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    /// `(period, url, version)` is already taken by a stored version.
    #[error("duplicate version {version} for {period} | {url}")]
    DuplicateVersionConflict {
        period: String,
        url: String,
        version: i32,
    },

    #[error("manifest record not found: {id}")]
    RecordNotFound { id: Uuid },

    /// The transaction layer could not be reached.
    #[error("manifest store unavailable: {0}")]
    Unavailable(String),

    #[error("manifest backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn find_active(&self, period: &str, url: &str) -> Result<Option<FileRecord>, ManifestError>;

    /// Highest version of the lineage in any status.
    async fn find_latest(&self, period: &str, url: &str) -> Result<Option<FileRecord>, ManifestError>;

    async fn find_all_active(&self, scope: &Scope) -> Result<Vec<FileRecord>, ManifestError>;

    /// Store `record.version` as the lineage's active record.
    ///
    /// Fails with `DuplicateVersionConflict` when a stored version of the
    /// lineage is at or above the proposed one. Otherwise the lineage's
    /// `active` and `missing` records become `replaced`, and the new record
    /// is inserted as `active`, or claims a failed placeholder holding the
    /// same version.
    async fn upsert_new_version(
        &self,
        record: NewFileRecord,
        at: DateTime<Utc>,
    ) -> Result<FileRecord, ManifestError>;

    /// Bump `updated_at` only.
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ManifestError>;

    /// A fetch just confirmed the stored content: bump `updated_at` and clear
    /// any earlier `error_message`.
    async fn confirm(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ManifestError>;

    /// Flip the given records from `active` to `missing`. Ids that are not
    /// active are ignored. Returns how many records changed.
    async fn mark_missing(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64, ManifestError>;

    /// Record the latest failure message. Status is left alone.
    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ManifestError>;

    /// Insert a failed placeholder for a lineage whose first fetch failed.
    async fn record_failed_attempt(
        &self,
        attempt: FailedAttempt,
        at: DateTime<Utc>,
    ) -> Result<FileRecord, ManifestError>;

    /// All versions of a lineage, oldest first.
    async fn lineage_history(&self, period: &str, url: &str) -> Result<Vec<FileRecord>, ManifestError>;

    async fn active_files_summary(&self) -> Result<Vec<ScopeSummary>, ManifestError>;

    /// Missing records, most recently flagged first.
    async fn missing_files(&self, limit: i64) -> Result<Vec<FileRecord>, ManifestError>;

    /// Records with content, newest `downloaded_at` first.
    async fn recent_downloads(&self, limit: i64) -> Result<Vec<FileRecord>, ManifestError>;

    async fn status_totals(&self) -> Result<Vec<StatusTotal>, ManifestError>;

    async fn health_check(&self) -> Result<(), ManifestError>;
}
