//! Core file-manifest model shared by the storage, scraper, and sync crates.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "vsfm-core";

/// Report family a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Monthly,
    Annual,
    Dol,
    Yearbook,
    Uscis,
}

impl FileType {
    pub const ALL: [FileType; 5] = [
        FileType::Monthly,
        FileType::Annual,
        FileType::Dol,
        FileType::Yearbook,
        FileType::Uscis,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Monthly => "monthly",
            FileType::Annual => "annual",
            FileType::Dol => "dol",
            FileType::Yearbook => "yearbook",
            FileType::Uscis => "uscis",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError {
                kind: "file type",
                value: s.to_string(),
            })
    }
}

/// Lifecycle status of a manifest record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Active,
    Missing,
    Replaced,
    Failed,
}

impl FileStatus {
    pub const ALL: [FileStatus; 4] = [
        FileStatus::Active,
        FileStatus::Missing,
        FileStatus::Replaced,
        FileStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Active => "active",
            FileStatus::Missing => "missing",
            FileStatus::Replaced => "replaced",
            FileStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileStatus::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEnumError {
                kind: "file status",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Grouping over which a reconciliation pass claims coverage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub source_id: String,
    pub file_type: FileType,
    pub program: Option<String>,
}

impl Scope {
    pub fn new(source_id: impl Into<String>, file_type: FileType, program: Option<String>) -> Self {
        Self {
            source_id: source_id.into(),
            file_type,
            program,
        }
    }

    /// Stable `source/type/program` key, used for worker locks and report rows.
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.source_id,
            self.file_type,
            self.program.as_deref().unwrap_or("-")
        )
    }

    pub fn contains(&self, record: &FileRecord) -> bool {
        record.source_id == self.source_id
            && record.file_type == self.file_type
            && record.program == self.program
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Identity of one logical file across versions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lineage {
    pub period: String,
    pub url: String,
}

impl Lineage {
    pub fn new(period: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            period: period.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for Lineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.period, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandidateError {
    #[error("candidate period is empty for {url}")]
    EmptyPeriod { url: String },
    #[error("candidate url is not an absolute http(s) url: {url:?}")]
    InvalidUrl { url: String },
}

/// A remote file enumerated by a scraper, validated at the scope boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    url: String,
    period: String,
    filename: String,
}

impl Candidate {
    /// Validates the tuple. An empty `filename` is derived from the URL path,
    /// falling back to `<period>.bin`.
    pub fn new(
        url: impl Into<String>,
        period: impl Into<String>,
        filename: impl Into<String>,
    ) -> Result<Self, CandidateError> {
        let url = url.into().trim().to_string();
        let period = period.into().trim().to_string();
        let filename = filename.into().trim().to_string();

        if !is_absolute_http_url(&url) {
            return Err(CandidateError::InvalidUrl { url });
        }
        if period.is_empty() {
            return Err(CandidateError::EmptyPeriod { url });
        }

        let filename = if filename.is_empty() {
            filename_from_url(&url).unwrap_or_else(|| format!("{period}.bin"))
        } else {
            filename
        };

        Ok(Self {
            url,
            period,
            filename,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn lineage(&self) -> Lineage {
        Lineage::new(self.period.clone(), self.url.clone())
    }
}

fn is_absolute_http_url(raw: &str) -> bool {
    if raw.chars().any(char::is_whitespace) {
        return false;
    }
    match Url::parse(raw) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|host| !host.is_empty())
        }
        Err(_) => false,
    }
}

/// Last non-empty path segment of a URL, ignoring query and fragment.
pub fn filename_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(ToString::to_string)
}

/// Whether a scraper enumerated its whole scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completeness {
    Complete,
    Partial,
}

/// One manifest row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub source_id: String,
    pub file_type: FileType,
    pub program: Option<String>,
    pub period: String,
    pub url: String,
    pub filename: String,
    pub saved_path: String,
    pub bytes: i64,
    pub sha256: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub version: i32,
    pub status: FileStatus,
    pub error_message: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn lineage(&self) -> Lineage {
        Lineage::new(self.period.clone(), self.url.clone())
    }

    pub fn scope(&self) -> Scope {
        Scope::new(self.source_id.clone(), self.file_type, self.program.clone())
    }

    /// A failed record that never held content: the first fetch of its
    /// lineage failed. The next successful fetch claims its version.
    pub fn is_failed_placeholder(&self) -> bool {
        self.status == FileStatus::Failed && self.downloaded_at.is_none()
    }

    pub fn conditional_hints(&self) -> ConditionalHints {
        ConditionalHints {
            etag: self.etag.clone().filter(|v| !v.is_empty()),
            last_modified: self.last_modified.clone().filter(|v| !v.is_empty()),
        }
    }
}

/// Insert payload for a new content version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFileRecord {
    pub source_id: String,
    pub file_type: FileType,
    pub program: Option<String>,
    pub period: String,
    pub url: String,
    pub filename: String,
    pub saved_path: String,
    pub bytes: i64,
    pub sha256: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub version: i32,
}

impl NewFileRecord {
    pub fn lineage(&self) -> Lineage {
        Lineage::new(self.period.clone(), self.url.clone())
    }

    pub fn into_record(self, id: Uuid, at: DateTime<Utc>) -> FileRecord {
        FileRecord {
            id,
            source_id: self.source_id,
            file_type: self.file_type,
            program: self.program,
            period: self.period,
            url: self.url,
            filename: self.filename,
            saved_path: self.saved_path,
            bytes: self.bytes,
            sha256: self.sha256,
            etag: self.etag,
            last_modified: self.last_modified,
            version: self.version,
            status: FileStatus::Active,
            error_message: None,
            downloaded_at: Some(at),
            created_at: at,
            updated_at: at,
        }
    }
}

/// A fetch failure on a lineage that has no record yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub source_id: String,
    pub file_type: FileType,
    pub program: Option<String>,
    pub period: String,
    pub url: String,
    pub filename: String,
    pub version: i32,
    pub error_message: String,
}

impl FailedAttempt {
    pub fn into_record(self, id: Uuid, at: DateTime<Utc>) -> FileRecord {
        FileRecord {
            id,
            source_id: self.source_id,
            file_type: self.file_type,
            program: self.program,
            period: self.period,
            url: self.url,
            filename: self.filename,
            saved_path: String::new(),
            bytes: 0,
            sha256: String::new(),
            etag: None,
            last_modified: None,
            version: self.version,
            status: FileStatus::Failed,
            error_message: Some(self.error_message),
            downloaded_at: None,
            created_at: at,
            updated_at: at,
        }
    }
}

/// Advisory HTTP validators carried over from the active record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalHints {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ConditionalHints {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub reason: String,
    pub transient: bool,
}

/// What the fetch collaborator saw for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Fetched(FetchedContent),
    NotModified,
    Failed(FetchFailure),
}

/// Per-candidate reconciliation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    New,
    Unchanged,
    Updated,
    Failed,
    Conflict,
}

impl Classification {
    pub const ALL: [Classification; 5] = [
        Classification::New,
        Classification::Unchanged,
        Classification::Updated,
        Classification::Failed,
        Classification::Conflict,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Classification::New => "new",
            Classification::Unchanged => "unchanged",
            Classification::Updated => "updated",
            Classification::Failed => "failed",
            Classification::Conflict => "conflict",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row of the active-files summary view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSummary {
    pub source_id: String,
    pub file_type: FileType,
    pub program: Option<String>,
    pub file_count: i64,
    pub total_bytes: i64,
    pub earliest_download: Option<DateTime<Utc>>,
    pub latest_download: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTotal {
    pub status: FileStatus,
    pub count: i64,
    pub total_bytes: i64,
}
