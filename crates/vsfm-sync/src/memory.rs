use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;
use vsfm_core::{
    FailedAttempt, FileRecord, FileStatus, FileType, NewFileRecord, Scope, ScopeSummary, StatusTotal,
};

use crate::manifest::{ManifestError, ManifestStore};

/// Process-local manifest. Each call holds the lock for its whole body, which
/// makes every operation atomic.
#[derive(Debug, Default)]
pub struct InMemoryManifestStore {
    records: Mutex<Vec<FileRecord>>,
    offline: AtomicBool,
}

impl InMemoryManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn snapshot(&self) -> Vec<FileRecord> {
        self.records.lock().await.clone()
    }

    fn ensure_online(&self) -> Result<(), ManifestError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ManifestError::Unavailable("in-memory store is offline".to_string()));
        }
        Ok(())
    }
}

fn same_lineage(record: &FileRecord, period: &str, url: &str) -> bool {
    record.period == period && record.url == url
}

#[async_trait]
impl ManifestStore for InMemoryManifestStore {
    async fn find_active(&self, period: &str, url: &str) -> Result<Option<FileRecord>, ManifestError> {
        self.ensure_online()?;
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|r| same_lineage(r, period, url) && r.status == FileStatus::Active)
            .cloned())
    }

    async fn find_latest(&self, period: &str, url: &str) -> Result<Option<FileRecord>, ManifestError> {
        self.ensure_online()?;
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| same_lineage(r, period, url))
            .max_by_key(|r| r.version)
            .cloned())
    }

    async fn find_all_active(&self, scope: &Scope) -> Result<Vec<FileRecord>, ManifestError> {
        self.ensure_online()?;
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| r.status == FileStatus::Active && scope.contains(r))
            .cloned()
            .collect())
    }

    async fn upsert_new_version(
        &self,
        record: NewFileRecord,
        at: DateTime<Utc>,
    ) -> Result<FileRecord, ManifestError> {
        self.ensure_online()?;
        let mut records = self.records.lock().await;

        let conflict = records.iter().any(|r| {
            same_lineage(r, &record.period, &record.url)
                && !r.is_failed_placeholder()
                && r.version >= record.version
        });
        if conflict {
            return Err(ManifestError::DuplicateVersionConflict {
                period: record.period,
                url: record.url,
                version: record.version,
            });
        }

        for existing in records.iter_mut().filter(|r| {
            same_lineage(r, &record.period, &record.url)
                && matches!(r.status, FileStatus::Active | FileStatus::Missing)
        }) {
            existing.status = FileStatus::Replaced;
            existing.updated_at = at;
        }

        let placeholder = records.iter_mut().find(|r| {
            same_lineage(r, &record.period, &record.url)
                && r.is_failed_placeholder()
                && r.version == record.version
        });
        if let Some(slot) = placeholder {
            let claimed = record.into_record(slot.id, at);
            *slot = FileRecord {
                created_at: slot.created_at,
                ..claimed
            };
            return Ok(slot.clone());
        }

        let inserted = record.into_record(Uuid::new_v4(), at);
        records.push(inserted.clone());
        Ok(inserted)
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ManifestError> {
        self.ensure_online()?;
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(ManifestError::RecordNotFound { id })?;
        record.updated_at = at;
        Ok(())
    }

    async fn confirm(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ManifestError> {
        self.ensure_online()?;
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(ManifestError::RecordNotFound { id })?;
        record.error_message = None;
        record.updated_at = at;
        Ok(())
    }

    async fn mark_missing(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64, ManifestError> {
        self.ensure_online()?;
        let mut records = self.records.lock().await;
        let mut changed = 0u64;
        for record in records
            .iter_mut()
            .filter(|r| r.status == FileStatus::Active && ids.contains(&r.id))
        {
            record.status = FileStatus::Missing;
            record.updated_at = at;
            changed += 1;
        }
        Ok(changed)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error_message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ManifestError> {
        self.ensure_online()?;
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(ManifestError::RecordNotFound { id })?;
        record.error_message = Some(error_message.to_string());
        record.updated_at = at;
        Ok(())
    }

    async fn record_failed_attempt(
        &self,
        attempt: FailedAttempt,
        at: DateTime<Utc>,
    ) -> Result<FileRecord, ManifestError> {
        self.ensure_online()?;
        let mut records = self.records.lock().await;
        if records
            .iter()
            .any(|r| same_lineage(r, &attempt.period, &attempt.url) && r.version == attempt.version)
        {
            return Err(ManifestError::DuplicateVersionConflict {
                period: attempt.period,
                url: attempt.url,
                version: attempt.version,
            });
        }
        let record = attempt.into_record(Uuid::new_v4(), at);
        records.push(record.clone());
        Ok(record)
    }

    async fn lineage_history(&self, period: &str, url: &str) -> Result<Vec<FileRecord>, ManifestError> {
        self.ensure_online()?;
        let records = self.records.lock().await;
        let mut history: Vec<FileRecord> = records
            .iter()
            .filter(|r| same_lineage(r, period, url))
            .cloned()
            .collect();
        history.sort_by_key(|r| r.version);
        Ok(history)
    }

    async fn active_files_summary(&self) -> Result<Vec<ScopeSummary>, ManifestError> {
        self.ensure_online()?;
        let records = self.records.lock().await;
        let mut groups: BTreeMap<(String, FileType, Option<String>), ScopeSummary> = BTreeMap::new();
        for record in records.iter().filter(|r| r.status == FileStatus::Active) {
            let key = (record.source_id.clone(), record.file_type, record.program.clone());
            let summary = groups.entry(key).or_insert_with(|| ScopeSummary {
                source_id: record.source_id.clone(),
                file_type: record.file_type,
                program: record.program.clone(),
                file_count: 0,
                total_bytes: 0,
                earliest_download: None,
                latest_download: None,
            });
            summary.file_count += 1;
            summary.total_bytes += record.bytes;
            if let Some(downloaded) = record.downloaded_at {
                summary.earliest_download = Some(
                    summary
                        .earliest_download
                        .map_or(downloaded, |current| current.min(downloaded)),
                );
                summary.latest_download = Some(
                    summary
                        .latest_download
                        .map_or(downloaded, |current| current.max(downloaded)),
                );
            }
        }
        Ok(groups.into_values().collect())
    }

    async fn missing_files(&self, limit: i64) -> Result<Vec<FileRecord>, ManifestError> {
        self.ensure_online()?;
        let records = self.records.lock().await;
        let mut missing: Vec<FileRecord> = records
            .iter()
            .filter(|r| r.status == FileStatus::Missing)
            .cloned()
            .collect();
        missing.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        missing.truncate(limit.max(0) as usize);
        Ok(missing)
    }

    async fn recent_downloads(&self, limit: i64) -> Result<Vec<FileRecord>, ManifestError> {
        self.ensure_online()?;
        let records = self.records.lock().await;
        let mut recent: Vec<FileRecord> = records
            .iter()
            .filter(|r| r.downloaded_at.is_some())
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.downloaded_at.cmp(&a.downloaded_at));
        recent.truncate(limit.max(0) as usize);
        Ok(recent)
    }

    async fn status_totals(&self) -> Result<Vec<StatusTotal>, ManifestError> {
        self.ensure_online()?;
        let records = self.records.lock().await;
        let mut totals: BTreeMap<FileStatus, StatusTotal> = BTreeMap::new();
        for record in records.iter() {
            let total = totals.entry(record.status).or_insert(StatusTotal {
                status: record.status,
                count: 0,
                total_bytes: 0,
            });
            total.count += 1;
            total.total_bytes += record.bytes;
        }
        Ok(totals.into_values().collect())
    }

    async fn health_check(&self) -> Result<(), ManifestError> {
        self.ensure_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, hour, 0, 0).single().unwrap()
    }

    fn new_record(version: i32, sha: &str) -> NewFileRecord {
        NewFileRecord {
            source_id: "visastats".into(),
            file_type: FileType::Monthly,
            program: Some("IV".into()),
            period: "FY2024-10".into(),
            url: "https://x/report.pdf".into(),
            filename: "report.pdf".into(),
            saved_path: format!("monthly/IV/FY2024-10/report.v{version}.pdf"),
            bytes: 10,
            sha256: sha.into(),
            etag: None,
            last_modified: None,
            version,
        }
    }

    #[tokio::test]
    async fn memory_store_passes_the_conformance_suite() {
        let store = InMemoryManifestStore::new();
        let failures = crate::conformance::run_conformance_suite(&store, "memory").await;
        assert!(failures.is_empty(), "{failures:#?}");
    }

    #[tokio::test]
    async fn summary_counts_only_active_records() {
        let store = InMemoryManifestStore::new();
        store.upsert_new_version(new_record(1, "h1"), at(1)).await.unwrap();
        store.upsert_new_version(new_record(2, "h2"), at(4)).await.unwrap();

        let summary = store.active_files_summary().await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].file_count, 1);
        assert_eq!(summary[0].earliest_download, Some(at(4)));

        let totals = store.status_totals().await.unwrap();
        let statuses: Vec<FileStatus> = totals.iter().map(|t| t.status).collect();
        assert_eq!(statuses, vec![FileStatus::Active, FileStatus::Replaced]);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = InMemoryManifestStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.health_check().await,
            Err(ManifestError::Unavailable(_))
        ));
        store.set_offline(false);
        assert!(store.health_check().await.is_ok());
    }
}
