//! Content addressing, versioned artifact storage, and HTTP fetch utilities.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;
use vsfm_core::{Candidate, ConditionalHints, FetchedContent, Scope};

pub const CRATE_NAME: &str = "vsfm-storage";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub sha256: String,
    pub length: i64,
}

/// Pure content fingerprinting. ETag/Last-Modified never decide dedup; this does.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentAddresser;

impl ContentAddresser {
    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
        Fingerprint {
            sha256: Self::sha256_hex(bytes),
            length: bytes.len() as i64,
        }
    }

    pub async fn fingerprint_file(path: &Path) -> anyhow::Result<Fingerprint> {
        let bytes = fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Self::fingerprint(&bytes))
    }
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Destination for downloaded bytes. The returned path is opaque to the manifest.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(
        &self,
        scope: &Scope,
        candidate: &Candidate,
        version: i32,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact>;

    /// Drop an artifact the manifest never accepted. Deduplicated artifacts
    /// predate this write and are left alone.
    async fn discard(&self, stored: &StoredArtifact) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<type>/<program>/<period...>/<lineage>/<file>`, where `<lineage>` is
    /// derived from the URL so two lineages never share a directory. Versions
    /// after the first get a `.v<N>` infix before the extension.
    pub fn artifact_relative_path(
        &self,
        scope: &Scope,
        candidate: &Candidate,
        version: i32,
    ) -> PathBuf {
        let mut path = PathBuf::from(scope.file_type.as_str());
        let segments: Vec<String> = candidate
            .period()
            .split('/')
            .filter(|s| !s.trim().is_empty())
            .map(sanitize_segment)
            .collect();
        // Periods like `h1b/2024` already lead with the program.
        if let Some(program) = &scope.program {
            let program = sanitize_segment(program);
            if segments.first() != Some(&program) {
                path.push(program);
            }
        }
        for segment in segments {
            path.push(segment);
        }
        path.push(lineage_segment(candidate.url()));
        path.push(versioned_filename(
            &sanitize_segment(candidate.filename()),
            version,
        ));
        path
    }

    /// Store bytes at their versioned path using an atomic temp-file rename.
    /// A path already holding different bytes is an error, never an overwrite.
    pub async fn store_bytes(
        &self,
        scope: &Scope,
        candidate: &Candidate,
        version: i32,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = ContentAddresser::sha256_hex(bytes);
        let relative_path = self.artifact_relative_path(scope, candidate, version);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating artifact directory {}", parent.display()))?;

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            let existing = ContentAddresser::fingerprint_file(&absolute_path).await?;
            if existing.sha256 != content_hash {
                anyhow::bail!(
                    "artifact {} already holds different content (sha256 {})",
                    absolute_path.display(),
                    existing.sha256
                );
            }
            return Ok(StoredArtifact {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: true,
            });
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming temp artifact {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }

        Ok(StoredArtifact {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: false,
        })
    }
}

#[async_trait]
impl ArtifactSink for ArtifactStore {
    async fn persist(
        &self,
        scope: &Scope,
        candidate: &Candidate,
        version: i32,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        self.store_bytes(scope, candidate, version, bytes).await
    }

    async fn discard(&self, stored: &StoredArtifact) -> anyhow::Result<()> {
        if stored.deduplicated {
            return Ok(());
        }
        match fs::remove_file(&stored.absolute_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("removing artifact {}", stored.absolute_path.display())),
        }
    }
}

/// Short, stable directory name for one URL.
fn lineage_segment(url: &str) -> String {
    let mut digest = ContentAddresser::sha256_hex(url.as_bytes());
    digest.truncate(12);
    digest
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(80)
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

fn versioned_filename(filename: &str, version: i32) -> String {
    if version <= 1 {
        return filename.to_string();
    }
    match filename.rsplit_once('.').filter(|(base, _)| !base.is_empty()) {
        Some((base, ext)) => format!("{base}.v{version}.{ext}"),
        None => format!("{filename}.v{version}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            global_concurrency: 8,
            per_source_concurrency: 2,
            backoff: BackoffPolicy::default(),
            token_bucket: Some(TokenBucketConfig {
                capacity: 2,
                refill_every: Duration::from_millis(500),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity,
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && self.refill_every.as_millis() > 0 {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = (state.tokens.saturating_add(refills)).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

/// Result of a conditional GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(FetchedContent),
    NotModified,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetch limiter closed")]
    LimiterClosed,
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request(err) => classify_reqwest_error(err) == RetryDisposition::Retryable,
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(|s| classify_status(s) == RetryDisposition::Retryable)
                .unwrap_or(false),
            FetchError::LimiterClosed => true,
        }
    }
}

/// Retrieves file bytes, honouring conditional hints.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        source_id: &str,
        url: &str,
        hints: &ConditionalHints,
    ) -> Result<FetchOutcome, FetchError>;
}

/// Retrieves listing pages for scrapers.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn page_text(&self, source_id: &str, url: &str) -> anyhow::Result<String>;
}

pub fn conditional_headers(hints: &ConditionalHints) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(value) = hints.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(IF_NONE_MATCH, value);
    }
    if let Some(value) = hints
        .last_modified
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(IF_MODIFIED_SINCE, value);
    }
    headers
}

fn header_string(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .filter(|v| !v.is_empty())
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(SimpleTokenBucket::new(c.capacity, c.refill_every)));

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            token_bucket,
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    /// GET with retry/backoff. A 304 answer becomes `NotModified`.
    pub async fn fetch_conditional(
        &self,
        source_id: &str,
        url: &str,
        hints: &ConditionalHints,
    ) -> Result<FetchOutcome, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let span = info_span!("http_fetch", source_id, url);
        self.fetch_with_retries(url, conditional_headers(hints))
            .instrument(span)
            .await
    }

    async fn fetch_with_retries(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<FetchOutcome, FetchError> {
        let mut attempt = 0usize;
        loop {
            let result = self.client.get(url).headers(headers.clone()).send().await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status == StatusCode::NOT_MODIFIED {
                        return Ok(FetchOutcome::NotModified);
                    }

                    if status.is_success() {
                        let etag = header_string(resp.headers(), ETAG);
                        let last_modified = header_string(resp.headers(), LAST_MODIFIED);
                        let bytes = resp.bytes().await?.to_vec();
                        return Ok(FetchOutcome::Fetched(FetchedContent {
                            bytes,
                            etag,
                            last_modified,
                        }));
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(attempt, status = status.as_u16(), "retrying fetch");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(attempt, error = %err, "retrying fetch");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        source_id: &str,
        url: &str,
        hints: &ConditionalHints,
    ) -> Result<FetchOutcome, FetchError> {
        self.fetch_conditional(source_id, url, hints).await
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn page_text(&self, source_id: &str, url: &str) -> anyhow::Result<String> {
        match self
            .fetch_conditional(source_id, url, &ConditionalHints::default())
            .await
            .with_context(|| format!("fetching listing page {url}"))?
        {
            FetchOutcome::Fetched(content) => Ok(String::from_utf8_lossy(&content.bytes).into_owned()),
            FetchOutcome::NotModified => {
                anyhow::bail!("listing page {url} answered 304 to an unconditional request")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vsfm_core::FileType;

    #[test]
    fn artifact_hashing_is_stable() {
        let print = ContentAddresser::fingerprint(b"hello world");
        assert_eq!(
            print.sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(print.length, 11);
    }

    fn candidate(url: &str, period: &str, filename: &str) -> Candidate {
        Candidate::new(url, period, filename).expect("valid candidate")
    }

    #[test]
    fn versioned_paths_follow_scope_and_period() {
        let store = ArtifactStore::new("/data");
        let monthly = Scope::new("visastats", FileType::Monthly, Some("IV".into()));
        let report = candidate("https://x/report.pdf", "FY2024-10", "");
        let key = lineage_segment("https://x/report.pdf");
        assert_eq!(key.len(), 12);
        assert_eq!(
            store.artifact_relative_path(&monthly, &report, 1),
            PathBuf::from(format!("monthly/IV/FY2024-10/{key}/report.pdf"))
        );
        assert_eq!(
            store.artifact_relative_path(&monthly, &report, 3),
            PathBuf::from(format!("monthly/IV/FY2024-10/{key}/report.v3.pdf"))
        );

        let dol = Scope::new("dolstats", FileType::Dol, Some("PERM Program".into()));
        let perm = candidate("https://dol.gov/perm_fy2024.xlsx", "PERM Program/2024", "");
        let key = lineage_segment("https://dol.gov/perm_fy2024.xlsx");
        assert_eq!(
            store.artifact_relative_path(&dol, &perm, 1),
            PathBuf::from(format!("dol/PERM Program/2024/{key}/perm_fy2024.xlsx"))
        );

        let yearbook = Scope::new("dhsyearbook", FileType::Yearbook, None);
        let table = candidate("https://dhs.gov/fy2022_table1.xlsx", "2022", "");
        let key = lineage_segment("https://dhs.gov/fy2022_table1.xlsx");
        assert_eq!(
            store.artifact_relative_path(&yearbook, &table, 2),
            PathBuf::from(format!("yearbook/2022/{key}/fy2022_table1.v2.xlsx"))
        );
    }

    #[test]
    fn same_filename_in_one_period_gets_distinct_paths() {
        let store = ArtifactStore::new("/data");
        let scope = Scope::new("visastats", FileType::Monthly, Some("IV".into()));
        let paths: Vec<PathBuf> = [
            "https://x/a/report.pdf",
            "https://x/b/report.pdf",
            "https://x/download.aspx?id=1",
            "https://x/download.aspx?id=2",
        ]
        .into_iter()
        .map(|url| store.artifact_relative_path(&scope, &candidate(url, "FY2024-10", ""), 1))
        .collect();

        for (i, left) in paths.iter().enumerate() {
            for right in &paths[i + 1..] {
                assert_ne!(left, right);
            }
        }
    }

    #[test]
    fn path_segments_cannot_escape_the_root() {
        let store = ArtifactStore::new("/data");
        let scope = Scope::new("x", FileType::Annual, None);
        let path = store.artifact_relative_path(&scope, &candidate("https://x/y", "../..", ".."), 1);
        assert!(path.components().all(|c| c.as_os_str() != ".."));
    }

    #[tokio::test]
    async fn atomic_writes_deduplicate_identical_content() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let scope = Scope::new("dhsyearbook", FileType::Yearbook, None);
        let table = candidate("https://dhs.gov/table1.xlsx", "2022", "");

        let first = store
            .store_bytes(&scope, &table, 1, b"same")
            .await
            .expect("first store");
        let second = store
            .store_bytes(&scope, &table, 1, b"same")
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.absolute_path.exists());
    }

    #[tokio::test]
    async fn differing_content_at_an_occupied_path_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let scope = Scope::new("dhsyearbook", FileType::Yearbook, None);
        let table = candidate("https://dhs.gov/t.csv", "2022", "");

        let first = store
            .store_bytes(&scope, &table, 2, b"old")
            .await
            .expect("first");
        let err = store
            .store_bytes(&scope, &table, 2, b"new")
            .await
            .expect_err("occupied path");

        assert!(format!("{err:#}").contains("different content"));
        let on_disk = std::fs::read(&first.absolute_path).expect("read back");
        assert_eq!(on_disk, b"old");
    }

    #[tokio::test]
    async fn discard_removes_fresh_writes_only() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let scope = Scope::new("dhsyearbook", FileType::Yearbook, None);
        let table = candidate("https://dhs.gov/t.csv", "2022", "");

        let fresh = store.store_bytes(&scope, &table, 1, b"x").await.expect("store");
        let again = store.store_bytes(&scope, &table, 1, b"x").await.expect("dedup");
        store.discard(&again).await.expect("discard dedup");
        assert!(fresh.absolute_path.exists());

        store.discard(&fresh).await.expect("discard fresh");
        assert!(!fresh.absolute_path.exists());
        store.discard(&fresh).await.expect("discard is idempotent");
    }

    #[test]
    fn conditional_headers_carry_validators() {
        let headers = conditional_headers(&ConditionalHints {
            etag: Some("\"abc\"".into()),
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".into()),
        });
        assert_eq!(headers[IF_NONE_MATCH], "\"abc\"");
        assert_eq!(headers[IF_MODIFIED_SINCE], "Wed, 21 Oct 2015 07:28:00 GMT");
        assert!(conditional_headers(&ConditionalHints::default()).is_empty());
    }

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[test]
    fn http_status_transience_follows_retry_classification() {
        let busy = FetchError::HttpStatus {
            status: 503,
            url: "https://x".into(),
        };
        let gone = FetchError::HttpStatus {
            status: 404,
            url: "https://x".into(),
        };
        assert!(busy.is_transient());
        assert!(!gone.is_transient());
    }
}
