//! Backend-agnostic checks of the lineage invariants every `ManifestStore`
//! must hold. Each check works on its own lineage under `namespace`, so a
//! shared database can run the suite repeatedly.

use chrono::{DateTime, TimeZone, Utc};
use vsfm_core::{FailedAttempt, FileStatus, FileType, NewFileRecord};

use crate::manifest::{ManifestError, ManifestStore};

type Check = Result<(), String>;

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, hour, 0, 0).single().unwrap()
}

fn ensure(condition: bool, message: impl Into<String>) -> Check {
    if condition {
        Ok(())
    } else {
        Err(message.into())
    }
}

struct Fixture<'a> {
    store: &'a dyn ManifestStore,
    period: String,
    url: String,
}

impl<'a> Fixture<'a> {
    fn new(store: &'a dyn ManifestStore, namespace: &str, name: &str) -> Self {
        Self {
            store,
            period: "FY2024-10".to_string(),
            url: format!("https://conformance.test/{namespace}/{name}.pdf"),
        }
    }

    fn record(&self, version: i32, sha: &str) -> NewFileRecord {
        NewFileRecord {
            source_id: "visastats".into(),
            file_type: FileType::Monthly,
            program: Some("IV".into()),
            period: self.period.clone(),
            url: self.url.clone(),
            filename: "report.pdf".into(),
            saved_path: format!("monthly/IV/FY2024-10/report.v{version}.pdf"),
            bytes: 10,
            sha256: sha.into(),
            etag: None,
            last_modified: None,
            version,
        }
    }

    fn attempt(&self, version: i32) -> FailedAttempt {
        FailedAttempt {
            source_id: "visastats".into(),
            file_type: FileType::Monthly,
            program: Some("IV".into()),
            period: self.period.clone(),
            url: self.url.clone(),
            filename: "report.pdf".into(),
            version,
            error_message: "timeout".into(),
        }
    }

    async fn upsert(&self, version: i32, sha: &str, hour: u32) -> Result<vsfm_core::FileRecord, String> {
        self.store
            .upsert_new_version(self.record(version, sha), at(hour))
            .await
            .map_err(|err| format!("upsert v{version}: {err}"))
    }

    async fn history(&self) -> Result<Vec<vsfm_core::FileRecord>, String> {
        self.store
            .lineage_history(&self.period, &self.url)
            .await
            .map_err(|err| format!("history: {err}"))
    }
}

async fn new_version_demotes_prior_active(store: &dyn ManifestStore, namespace: &str) -> Check {
    let f = Fixture::new(store, namespace, "demote");
    let v1 = f.upsert(1, "h1", 1).await?;
    let v2 = f.upsert(2, "h2", 2).await?;

    let history = f.history().await?;
    ensure(history.len() == 2, format!("expected 2 versions, got {}", history.len()))?;
    ensure(history[0].id == v1.id && history[0].status == FileStatus::Replaced, "v1 not replaced")?;
    ensure(history[0].updated_at == at(2), "demotion not stamped with the upsert time")?;
    ensure(history[1].id == v2.id && history[1].status == FileStatus::Active, "v2 not active")
}

async fn taken_version_is_a_conflict(store: &dyn ManifestStore, namespace: &str) -> Check {
    let f = Fixture::new(store, namespace, "conflict");
    f.upsert(1, "h1", 1).await?;
    f.upsert(2, "h2", 2).await?;

    for version in [1, 2] {
        match store.upsert_new_version(f.record(version, "other"), at(3)).await {
            Err(ManifestError::DuplicateVersionConflict { version: v, .. }) if v == version => {}
            other => return Err(format!("v{version}: expected conflict, got {other:?}")),
        }
    }
    let active = store
        .find_active(&f.period, &f.url)
        .await
        .map_err(|err| err.to_string())?
        .ok_or_else(|| "active record vanished".to_string())?;
    ensure(active.sha256 == "h2", "conflicting proposal replaced the active content")?;
    ensure(f.history().await?.len() == 2, "conflicting proposal inserted a row")
}

async fn placeholder_is_claimed_in_place(store: &dyn ManifestStore, namespace: &str) -> Check {
    let f = Fixture::new(store, namespace, "placeholder");
    let placeholder = store
        .record_failed_attempt(f.attempt(1), at(1))
        .await
        .map_err(|err| format!("placeholder: {err}"))?;
    ensure(placeholder.is_failed_placeholder(), "first failure is not a placeholder")?;

    let claimed = f.upsert(1, "h1", 2).await?;
    ensure(claimed.id == placeholder.id, "placeholder row was not reused")?;
    ensure(claimed.status == FileStatus::Active, "claimed row not active")?;
    ensure(claimed.error_message.is_none(), "claimed row kept the failure message")?;
    ensure(claimed.created_at == at(1), "claim rewrote created_at")?;
    ensure(claimed.downloaded_at == Some(at(2)), "claim did not stamp downloaded_at")?;
    ensure(f.history().await?.len() == 1, "claim inserted a second row")?;

    match store.record_failed_attempt(f.attempt(1), at(3)).await {
        Err(ManifestError::DuplicateVersionConflict { .. }) => Ok(()),
        other => Err(format!("second placeholder at v1: expected conflict, got {other:?}")),
    }
}

async fn reappearing_missing_record_is_replaced(store: &dyn ManifestStore, namespace: &str) -> Check {
    let f = Fixture::new(store, namespace, "reappear");
    let v1 = f.upsert(1, "h1", 1).await?;
    let changed = store
        .mark_missing(&[v1.id], at(2))
        .await
        .map_err(|err| format!("mark missing: {err}"))?;
    ensure(changed == 1, format!("expected 1 missing, got {changed}"))?;
    ensure(
        store
            .find_active(&f.period, &f.url)
            .await
            .map_err(|err| err.to_string())?
            .is_none(),
        "missing record still active",
    )?;

    f.upsert(2, "h1", 3).await?;
    let history = f.history().await?;
    ensure(history.len() == 2, format!("expected 2 versions, got {}", history.len()))?;
    ensure(history[0].status == FileStatus::Replaced, "missing v1 not replaced")?;
    ensure(history[1].status == FileStatus::Active, "v2 not active")
}

async fn mark_missing_ignores_inactive_ids(store: &dyn ManifestStore, namespace: &str) -> Check {
    let f = Fixture::new(store, namespace, "missing");
    let v1 = f.upsert(1, "h1", 1).await?;
    let v2 = f.upsert(2, "h2", 2).await?;
    let changed = store
        .mark_missing(&[v1.id, v2.id], at(3))
        .await
        .map_err(|err| format!("mark missing: {err}"))?;
    ensure(changed == 1, format!("expected 1 change, got {changed}"))?;
    let history = f.history().await?;
    ensure(history.len() == 2, format!("expected 2 versions, got {}", history.len()))?;
    ensure(history[0].status == FileStatus::Replaced, "replaced record flipped")?;
    ensure(history[1].status == FileStatus::Missing, "active record not missing")
}

async fn failure_messages_overwrite_and_clear(store: &dyn ManifestStore, namespace: &str) -> Check {
    let f = Fixture::new(store, namespace, "messages");
    let v1 = f.upsert(1, "h1", 1).await?;

    store
        .mark_failed(v1.id, "first", at(2))
        .await
        .map_err(|err| err.to_string())?;
    store
        .mark_failed(v1.id, "second", at(3))
        .await
        .map_err(|err| err.to_string())?;
    store.touch(v1.id, at(4)).await.map_err(|err| err.to_string())?;
    let history = f.history().await?;
    ensure(history.len() == 1, format!("expected 1 version, got {}", history.len()))?;
    ensure(history[0].error_message.as_deref() == Some("second"), "message not overwritten")?;
    ensure(history[0].status == FileStatus::Active, "failure changed the status")?;
    ensure(history[0].updated_at == at(4), "touch did not bump updated_at")?;

    store.confirm(v1.id, at(5)).await.map_err(|err| err.to_string())?;
    let history = f.history().await?;
    ensure(history[0].error_message.is_none(), "confirm kept the message")?;
    ensure(history[0].updated_at == at(5), "confirm did not bump updated_at")
}

/// Runs every check and returns `name: reason` for each failure.
pub(crate) async fn run_conformance_suite(store: &dyn ManifestStore, namespace: &str) -> Vec<String> {
    let results = [
        ("new_version_demotes_prior_active", new_version_demotes_prior_active(store, namespace).await),
        ("taken_version_is_a_conflict", taken_version_is_a_conflict(store, namespace).await),
        ("placeholder_is_claimed_in_place", placeholder_is_claimed_in_place(store, namespace).await),
        ("reappearing_missing_record_is_replaced", reappearing_missing_record_is_replaced(store, namespace).await),
        ("mark_missing_ignores_inactive_ids", mark_missing_ignores_inactive_ids(store, namespace).await),
        ("failure_messages_overwrite_and_clear", failure_messages_overwrite_and_clear(store, namespace).await),
    ];
    results
        .into_iter()
        .filter_map(|(name, result)| result.err().map(|reason| format!("{name}: {reason}")))
        .collect()
}
