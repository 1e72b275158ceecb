//! Read-only reporting surface over the file manifest.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};
use vsfm_core::FileRecord;
use vsfm_sync::{ManifestError, ManifestStore};

pub const CRATE_NAME: &str = "vsfm-web";

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ManifestStore>,
    pub workspace_root: PathBuf,
}

impl AppState {
    pub fn new(store: Arc<dyn ManifestStore>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            workspace_root: workspace_root.into(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct LimitQuery {
    limit: Option<i64>,
}

impl LimitQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

#[derive(Debug, Deserialize)]
struct LineageQuery {
    period: String,
    url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReportRow {
    pub run_id: String,
    pub status: String,
    pub candidates: u64,
    pub marked_missing: u64,
    pub has_parquet_manifest: bool,
}

struct SummaryRow {
    scope: String,
    file_count: i64,
    total_bytes: i64,
    earliest: String,
    latest: String,
}

struct RecordRow {
    period: String,
    url: String,
    version: i32,
    when: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    active_files: i64,
    latest_run: String,
    summaries: Vec<SummaryRow>,
    totals: Vec<vsfm_core::StatusTotal>,
    missing: Vec<RecordRow>,
    recent: Vec<RecordRow>,
    runs: Vec<RunReportRow>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(health_handler))
        .route("/api/summary", get(summary_handler))
        .route("/api/status", get(status_handler))
        .route("/api/missing", get(missing_handler))
        .route("/api/recent", get(recent_handler))
        .route("/api/lineage", get(lineage_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving manifest reports");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn port_from_env() -> u16 {
    std::env::var("VSFM_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(err) => store_error(err),
    }
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let store = state.store.as_ref();
    let loaded = async {
        Ok::<_, ManifestError>((
            store.active_files_summary().await?,
            store.status_totals().await?,
            store.missing_files(20).await?,
            store.recent_downloads(20).await?,
        ))
    }
    .await;
    let (summaries, totals, missing, recent) = match loaded {
        Ok(parts) => parts,
        Err(err) => return store_error(err),
    };
    let runs = match load_runs(&state.workspace_root, 10) {
        Ok(runs) => runs,
        Err(err) => {
            warn!(error = %err, "could not list run reports");
            Vec::new()
        }
    };

    let fmt_when = |at: Option<DateTime<Utc>>| at.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into());
    render_html(IndexTemplate {
        active_files: summaries.iter().map(|s| s.file_count).sum(),
        latest_run: runs
            .first()
            .map(|r| r.run_id.clone())
            .unwrap_or_else(|| "n/a".into()),
        summaries: summaries
            .into_iter()
            .map(|s| SummaryRow {
                scope: vsfm_core::Scope::new(s.source_id, s.file_type, s.program).key(),
                file_count: s.file_count,
                total_bytes: s.total_bytes,
                earliest: fmt_when(s.earliest_download),
                latest: fmt_when(s.latest_download),
            })
            .collect(),
        totals,
        missing: missing
            .into_iter()
            .map(|r| RecordRow {
                when: fmt_when(Some(r.updated_at)),
                period: r.period,
                url: r.url,
                version: r.version,
            })
            .collect(),
        recent: recent
            .into_iter()
            .map(|r| RecordRow {
                when: fmt_when(r.downloaded_at),
                period: r.period,
                url: r.url,
                version: r.version,
            })
            .collect(),
        runs,
    })
}

async fn summary_handler(State(state): State<Arc<AppState>>) -> Response {
    json_or_error(state.store.active_files_summary().await)
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    json_or_error(state.store.status_totals().await)
}

async fn missing_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Response {
    json_or_error(state.store.missing_files(query.limit()).await)
}

async fn recent_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> Response {
    json_or_error(state.store.recent_downloads(query.limit()).await)
}

async fn lineage_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LineageQuery>,
) -> Response {
    match state.store.lineage_history(&query.period, &query.url).await {
        Ok(history) if history.is_empty() => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no records for lineage" })),
        )
            .into_response(),
        Ok(history) => Json::<Vec<FileRecord>>(history).into_response(),
        Err(err) => store_error(err),
    }
}

fn json_or_error<T: Serialize>(result: Result<T, ManifestError>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(err) => store_error(err),
    }
}

fn store_error(err: ManifestError) -> Response {
    let status = match &err {
        ManifestError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(format!("Server error: {err}")),
        )
            .into_response(),
    }
}

/// Newest run directories first, read from each run's `passes.json`.
fn load_runs(workspace_root: &Path, limit: usize) -> anyhow::Result<Vec<RunReportRow>> {
    let reports_root = workspace_root.join("reports");
    if !reports_root.exists() {
        return Ok(vec![]);
    }
    let mut entries = std::fs::read_dir(&reports_root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    entries.reverse();

    let mut runs = Vec::new();
    for e in entries.into_iter().take(limit) {
        let passes_path = e.path().join("passes.json");
        if !passes_path.exists() {
            continue;
        }
        let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&passes_path)?)?;
        let run = v.get("run");
        let field = |name: &str| run.and_then(|r| r.get(name));
        runs.push(RunReportRow {
            run_id: e.file_name().to_string_lossy().to_string(),
            status: field("status")
                .and_then(|s| s.as_str())
                .unwrap_or("unknown")
                .to_string(),
            candidates: field("candidates").and_then(|n| n.as_u64()).unwrap_or(0),
            marked_missing: field("marked_missing").and_then(|n| n.as_u64()).unwrap_or(0),
            has_parquet_manifest: e.path().join("snapshots/manifest.json").exists(),
        });
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use vsfm_core::{FileType, NewFileRecord};
    use vsfm_sync::InMemoryManifestStore;

    fn record(url: &str, version: i32) -> NewFileRecord {
        NewFileRecord {
            source_id: "visastats".into(),
            file_type: FileType::Monthly,
            program: Some("NIV".into()),
            period: "FY2024-10".into(),
            url: url.into(),
            filename: "report.pdf".into(),
            saved_path: "monthly/NIV/FY2024-10/report.pdf".into(),
            bytes: 42,
            sha256: format!("{version:064}"),
            etag: None,
            last_modified: None,
            version,
        }
    }

    async fn seeded() -> (Arc<InMemoryManifestStore>, tempfile::TempDir) {
        let store = Arc::new(InMemoryManifestStore::new());
        let at = Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).single().unwrap();
        store.upsert_new_version(record("https://x/a.pdf", 1), at).await.unwrap();
        store.upsert_new_version(record("https://x/a.pdf", 2), at).await.unwrap();
        let b = store.upsert_new_version(record("https://x/b.pdf", 1), at).await.unwrap();
        store.mark_missing(&[b.id], at).await.unwrap();
        (store, tempfile::tempdir().unwrap())
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(axum::http::Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn handler_smoke_get_index() {
        let (store, dir) = seeded().await;
        let (status, text) = get(app(AppState::new(store, dir.path())), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("Visa Statistics File Manifest"));
        assert!(text.contains("visastats/monthly/NIV"));
    }

    #[tokio::test]
    async fn summary_counts_only_active_records() {
        let (store, dir) = seeded().await;
        let (status, text) = get(app(AppState::new(store, dir.path())), "/api/summary").await;
        assert_eq!(status, StatusCode::OK);
        let rows: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 1);
        assert_eq!(rows[0]["file_count"], 1);
        assert_eq!(rows[0]["total_bytes"], 42);
    }

    #[tokio::test]
    async fn missing_and_recent_listings_respect_limit() {
        let (store, dir) = seeded().await;
        let app = app(AppState::new(store, dir.path()));
        let (_, missing) = get(app.clone(), "/api/missing").await;
        let missing: serde_json::Value = serde_json::from_str(&missing).unwrap();
        assert_eq!(missing[0]["url"], "https://x/b.pdf");
        assert_eq!(missing[0]["status"], "missing");

        let (_, recent) = get(app, "/api/recent?limit=2").await;
        let recent: serde_json::Value = serde_json::from_str(&recent).unwrap();
        assert_eq!(recent.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn lineage_lists_versions_oldest_first() {
        let (store, dir) = seeded().await;
        let app = app(AppState::new(store, dir.path()));
        let (status, text) = get(app.clone(), "/api/lineage?period=FY2024-10&url=https://x/a.pdf").await;
        assert_eq!(status, StatusCode::OK);
        let history: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(history[0]["status"], "replaced");
        assert_eq!(history[1]["status"], "active");

        let (status, _) = get(app.clone(), "/api/lineage?period=FY2024-10&url=https://x/none.pdf").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = get(app, "/api/lineage?period=FY2024-10").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let (store, dir) = seeded().await;
        store.set_offline(true);
        let app = app(AppState::new(store, dir.path()));
        let (status, _) = get(app.clone(), "/healthz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = get(app, "/api/status").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
