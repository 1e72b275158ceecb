//! The reconciliation engine: classify every observed candidate against the
//! manifest, version changed content, and flag lineages a complete pass no
//! longer sees.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;
use vsfm_adapters::ScopeEnumeration;
use vsfm_core::{
    Candidate, Classification, Completeness, FailedAttempt, FetchFailure, FetchedContent,
    FileRecord, Lineage, NewFileRecord, Observation, ParseEnumError, Scope,
};
use vsfm_storage::{ArtifactSink, ContentAddresser, FetchOutcome, Fetcher};

use crate::error::ReconcileError;
use crate::manifest::{ManifestError, ManifestStore};

/// `Fast` trusts an existing active record without asking the network;
/// `Safe` always issues a (conditional) fetch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    Fast,
    #[default]
    Safe,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchMode::Fast => "fast",
            FetchMode::Safe => "safe",
        })
    }
}

impl FromStr for FetchMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(FetchMode::Fast),
            "safe" => Ok(FetchMode::Safe),
            _ => Err(ParseEnumError {
                kind: "fetch mode",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassContext {
    pub run_id: Uuid,
    /// Stamped on every mutation the pass makes.
    pub observed_at: DateTime<Utc>,
    pub mode: FetchMode,
}

impl PassContext {
    pub fn new(run_id: Uuid, observed_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            observed_at,
            mode: FetchMode::Safe,
        }
    }

    pub fn with_mode(mut self, mode: FetchMode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateOutcome {
    pub period: String,
    pub url: String,
    pub classification: Classification,
    pub version: Option<i32>,
    pub record_id: Option<Uuid>,
    pub reason: Option<String>,
    #[serde(skip)]
    pub diagnostic: Option<ReconcileError>,
}

impl CandidateOutcome {
    fn settled(candidate: &Candidate, classification: Classification, record: &FileRecord) -> Self {
        Self {
            period: candidate.period().to_string(),
            url: candidate.url().to_string(),
            classification,
            version: Some(record.version),
            record_id: Some(record.id),
            reason: None,
            diagnostic: None,
        }
    }

    fn unsettled(candidate: &Candidate, diagnostic: ReconcileError, record: Option<&FileRecord>) -> Self {
        let classification = match diagnostic {
            ReconcileError::DuplicateVersionConflict { .. } => Classification::Conflict,
            _ => Classification::Failed,
        };
        Self {
            period: candidate.period().to_string(),
            url: candidate.url().to_string(),
            classification,
            version: record.map(|r| r.version),
            record_id: record.map(|r| r.id),
            reason: Some(diagnostic.to_string()),
            diagnostic: Some(diagnostic),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MissingDetection {
    Applied { marked: u64 },
    SkippedPartial,
    SkippedIncomplete { errors: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub run_id: Uuid,
    pub scope: Scope,
    pub observed_at: DateTime<Utc>,
    pub mode: FetchMode,
    pub completeness: Completeness,
    pub outcomes: Vec<CandidateOutcome>,
    pub counts: BTreeMap<Classification, usize>,
    pub missing: MissingDetection,
    pub diagnostics: Vec<ReconcileError>,
}

impl PassReport {
    fn new(ctx: &PassContext, scope: Scope, completeness: Completeness) -> Self {
        Self {
            run_id: ctx.run_id,
            scope,
            observed_at: ctx.observed_at,
            mode: ctx.mode,
            completeness,
            outcomes: Vec::new(),
            counts: BTreeMap::new(),
            missing: MissingDetection::SkippedPartial,
            diagnostics: Vec::new(),
        }
    }

    fn record(&mut self, outcome: CandidateOutcome) {
        *self.counts.entry(outcome.classification).or_default() += 1;
        if let Some(diagnostic) = &outcome.diagnostic {
            self.diagnostics.push(diagnostic.clone());
        }
        self.outcomes.push(outcome);
    }

    pub fn count(&self, classification: Classification) -> usize {
        self.counts.get(&classification).copied().unwrap_or(0)
    }

    pub fn marked_missing(&self) -> u64 {
        match self.missing {
            MissingDetection::Applied { marked } => marked,
            _ => 0,
        }
    }
}

/// Stateless between calls: every decision re-reads the store.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn ManifestStore>,
    artifacts: Arc<dyn ArtifactSink>,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn ManifestStore>, artifacts: Arc<dyn ArtifactSink>) -> Self {
        Self { store, artifacts }
    }

    pub fn store(&self) -> &Arc<dyn ManifestStore> {
        &self.store
    }

    /// Classify one candidate whose observation the caller already holds.
    pub async fn reconcile(
        &self,
        ctx: &PassContext,
        scope: &Scope,
        candidate: &Candidate,
        observation: Observation,
    ) -> Result<CandidateOutcome, ReconcileError> {
        let active = self
            .store
            .find_active(candidate.period(), candidate.url())
            .await?;
        self.reconcile_with_active(ctx, scope, candidate, active, observation)
            .await
    }

    /// Like [`reconcile`](Self::reconcile) against an active record the
    /// caller has just read. A stale read surfaces as `Conflict`.
    pub async fn reconcile_with_active(
        &self,
        ctx: &PassContext,
        scope: &Scope,
        candidate: &Candidate,
        active: Option<FileRecord>,
        observation: Observation,
    ) -> Result<CandidateOutcome, ReconcileError> {
        let decided = self.decide(ctx, scope, candidate, active, observation).await;
        settle(candidate, decided)
    }

    /// Fast mode: accept the active record without fetching. Only
    /// `updated_at` moves; an earlier failure message stays because nothing
    /// was checked.
    async fn trust_active(
        &self,
        ctx: &PassContext,
        candidate: &Candidate,
        active: FileRecord,
    ) -> Result<CandidateOutcome, ReconcileError> {
        self.store.touch(active.id, ctx.observed_at).await?;
        debug!(period = candidate.period(), url = candidate.url(), version = active.version, "unchanged (not fetched)");
        Ok(CandidateOutcome::settled(candidate, Classification::Unchanged, &active))
    }

    async fn decide(
        &self,
        ctx: &PassContext,
        scope: &Scope,
        candidate: &Candidate,
        active: Option<FileRecord>,
        observation: Observation,
    ) -> Result<CandidateOutcome, ReconcileError> {
        match (active, observation) {
            (active, Observation::Failed(failure)) => {
                self.record_failure(ctx, scope, candidate, active, failure).await
            }
            (Some(active), Observation::NotModified) => {
                self.store.confirm(active.id, ctx.observed_at).await?;
                info!(period = candidate.period(), url = candidate.url(), version = active.version, "unchanged (not modified)");
                Ok(CandidateOutcome::settled(candidate, Classification::Unchanged, &active))
            }
            (None, Observation::NotModified) => {
                let failure = FetchFailure {
                    reason: "not-modified answer without an active record".to_string(),
                    transient: false,
                };
                self.record_failure(ctx, scope, candidate, None, failure).await
            }
            (None, Observation::Fetched(content)) => {
                let version = match self
                    .store
                    .find_latest(candidate.period(), candidate.url())
                    .await?
                {
                    Some(latest) if latest.is_failed_placeholder() => latest.version,
                    Some(latest) => latest.version + 1,
                    None => 1,
                };
                self.store_version(ctx, scope, candidate, content, version, Classification::New)
                    .await
            }
            (Some(active), Observation::Fetched(content)) => {
                let fingerprint = ContentAddresser::fingerprint(&content.bytes);
                if fingerprint.sha256 == active.sha256 {
                    self.store.confirm(active.id, ctx.observed_at).await?;
                    info!(period = candidate.period(), url = candidate.url(), version = active.version, "unchanged");
                    return Ok(CandidateOutcome::settled(candidate, Classification::Unchanged, &active));
                }
                self.store_version(
                    ctx,
                    scope,
                    candidate,
                    content,
                    active.version + 1,
                    Classification::Updated,
                )
                .await
            }
        }
    }

    async fn store_version(
        &self,
        ctx: &PassContext,
        scope: &Scope,
        candidate: &Candidate,
        content: FetchedContent,
        version: i32,
        classification: Classification,
    ) -> Result<CandidateOutcome, ReconcileError> {
        // A taken version must not reach the artifact sink, or the stored
        // file of that version would be overwritten.
        if let Some(latest) = self
            .store
            .find_latest(candidate.period(), candidate.url())
            .await?
        {
            if !latest.is_failed_placeholder() && latest.version >= version {
                return Err(ManifestError::DuplicateVersionConflict {
                    period: candidate.period().to_string(),
                    url: candidate.url().to_string(),
                    version,
                }
                .into());
            }
        }

        let fingerprint = ContentAddresser::fingerprint(&content.bytes);
        let stored = match self
            .artifacts
            .persist(scope, candidate, version, &content.bytes)
            .await
        {
            Ok(stored) => stored,
            Err(err) => {
                let diagnostic = ReconcileError::ArtifactWrite {
                    period: candidate.period().to_string(),
                    url: candidate.url().to_string(),
                    reason: format!("{err:#}"),
                };
                warn!(error = %diagnostic, "artifact write failed");
                return Ok(CandidateOutcome::unsettled(candidate, diagnostic, None));
            }
        };

        let upserted = self
            .store
            .upsert_new_version(
                NewFileRecord {
                    source_id: scope.source_id.clone(),
                    file_type: scope.file_type,
                    program: scope.program.clone(),
                    period: candidate.period().to_string(),
                    url: candidate.url().to_string(),
                    filename: candidate.filename().to_string(),
                    saved_path: stored.relative_path.display().to_string(),
                    bytes: fingerprint.length,
                    sha256: fingerprint.sha256,
                    etag: content.etag,
                    last_modified: content.last_modified,
                    version,
                },
                ctx.observed_at,
            )
            .await;
        let record = match upserted {
            Ok(record) => record,
            Err(err) => {
                // The manifest never referenced this file; keep the path free
                // for the next attempt at the same version.
                if let Err(discard) = self.artifacts.discard(&stored).await {
                    warn!(path = %stored.absolute_path.display(), error = %discard, "could not discard unaccepted artifact");
                }
                return Err(err.into());
            }
        };

        info!(
            period = candidate.period(),
            url = candidate.url(),
            version = record.version,
            classification = %classification,
            saved_path = %record.saved_path,
            "stored version"
        );
        Ok(CandidateOutcome::settled(candidate, classification, &record))
    }

    /// Annotate the active (or latest) record; a lineage with no record at
    /// all gets a failed placeholder so the failure is still in the manifest.
    async fn record_failure(
        &self,
        ctx: &PassContext,
        scope: &Scope,
        candidate: &Candidate,
        active: Option<FileRecord>,
        failure: FetchFailure,
    ) -> Result<CandidateOutcome, ReconcileError> {
        let target = match active {
            Some(record) => Some(record),
            None => {
                self.store
                    .find_latest(candidate.period(), candidate.url())
                    .await?
            }
        };

        let record = match target {
            Some(record) => {
                self.store
                    .mark_failed(record.id, &failure.reason, ctx.observed_at)
                    .await?;
                record
            }
            None => {
                self.store
                    .record_failed_attempt(
                        FailedAttempt {
                            source_id: scope.source_id.clone(),
                            file_type: scope.file_type,
                            program: scope.program.clone(),
                            period: candidate.period().to_string(),
                            url: candidate.url().to_string(),
                            filename: candidate.filename().to_string(),
                            version: 1,
                            error_message: failure.reason.clone(),
                        },
                        ctx.observed_at,
                    )
                    .await?
            }
        };

        let diagnostic = ReconcileError::FetchFailure {
            period: candidate.period().to_string(),
            url: candidate.url().to_string(),
            reason: failure.reason,
            transient: failure.transient,
        };
        warn!(error = %diagnostic, status = %record.status, "fetch failed");
        Ok(CandidateOutcome::unsettled(candidate, diagnostic, Some(&record)))
    }

    /// Run one scope: fetch and classify every candidate in order, then apply
    /// missing detection if the enumeration earned it.
    pub async fn run_pass(
        &self,
        ctx: &PassContext,
        enumeration: &ScopeEnumeration,
        fetcher: &dyn Fetcher,
    ) -> Result<PassReport, ReconcileError> {
        let scope = &enumeration.scope;
        let span = info_span!("reconcile_pass", scope = %scope, run_id = %ctx.run_id, mode = %ctx.mode);

        async move {
            let mut report = PassReport::new(ctx, scope.clone(), enumeration.completeness);
            let mut observed: HashSet<Lineage> = HashSet::new();

            for candidate in &enumeration.candidates {
                observed.insert(candidate.lineage());

                // Re-read per candidate so a repeated lineage sees this pass's writes.
                let active = self
                    .store
                    .find_active(candidate.period(), candidate.url())
                    .await?;

                let outcome = match (active, ctx.mode) {
                    (Some(active), FetchMode::Fast) => {
                        settle(candidate, self.trust_active(ctx, candidate, active).await)?
                    }
                    (active, _) => {
                        let hints = active
                            .as_ref()
                            .map(FileRecord::conditional_hints)
                            .unwrap_or_default();
                        let observation =
                            match fetcher.fetch(&scope.source_id, candidate.url(), &hints).await {
                                Ok(FetchOutcome::Fetched(content)) => Observation::Fetched(content),
                                Ok(FetchOutcome::NotModified) => Observation::NotModified,
                                Err(err) => Observation::Failed(FetchFailure {
                                    reason: err.to_string(),
                                    transient: err.is_transient(),
                                }),
                            };
                        self.reconcile_with_active(ctx, scope, candidate, active, observation)
                            .await?
                    }
                };
                report.record(outcome);
            }

            report.missing = self
                .detect_missing(ctx, enumeration, &observed, &mut report.diagnostics)
                .await?;

            info!(
                candidates = enumeration.candidates.len(),
                new = report.count(Classification::New),
                updated = report.count(Classification::Updated),
                unchanged = report.count(Classification::Unchanged),
                failed = report.count(Classification::Failed),
                conflict = report.count(Classification::Conflict),
                missing = report.marked_missing(),
                "pass finished"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn detect_missing(
        &self,
        ctx: &PassContext,
        enumeration: &ScopeEnumeration,
        observed: &HashSet<Lineage>,
        diagnostics: &mut Vec<ReconcileError>,
    ) -> Result<MissingDetection, ReconcileError> {
        if enumeration.completeness == Completeness::Partial {
            return Ok(MissingDetection::SkippedPartial);
        }
        if !enumeration.is_clean() {
            let diagnostic = ReconcileError::IncompleteScopeDeclaration {
                scope: enumeration.scope.key(),
                errors: enumeration.errors.len(),
            };
            warn!(error = %diagnostic, "missing detection skipped");
            diagnostics.push(diagnostic);
            return Ok(MissingDetection::SkippedIncomplete {
                errors: enumeration.errors.len(),
            });
        }

        let unseen: Vec<Uuid> = self
            .store
            .find_all_active(&enumeration.scope)
            .await?
            .into_iter()
            .filter(|record| !observed.contains(&record.lineage()))
            .map(|record| record.id)
            .collect();

        let marked = if unseen.is_empty() {
            0
        } else {
            self.store.mark_missing(&unseen, ctx.observed_at).await?
        };
        if marked > 0 {
            warn!(marked, "records no longer listed; marked missing");
        }
        Ok(MissingDetection::Applied { marked })
    }

    /// Adopt a file already on disk that the manifest does not know about.
    /// A lineage that already has an active record is left alone.
    pub async fn register_existing(
        &self,
        ctx: &PassContext,
        scope: &Scope,
        candidate: &Candidate,
        path: &Path,
    ) -> Result<CandidateOutcome, ReconcileError> {
        if let Some(active) = self
            .store
            .find_active(candidate.period(), candidate.url())
            .await?
        {
            let mut outcome = CandidateOutcome::settled(candidate, Classification::Unchanged, &active);
            outcome.reason = Some("already registered".to_string());
            return Ok(outcome);
        }

        let fingerprint = match ContentAddresser::fingerprint_file(path).await {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                let diagnostic = ReconcileError::ArtifactWrite {
                    period: candidate.period().to_string(),
                    url: candidate.url().to_string(),
                    reason: format!("{err:#}"),
                };
                return Ok(CandidateOutcome::unsettled(candidate, diagnostic, None));
            }
        };

        let version = match self
            .store
            .find_latest(candidate.period(), candidate.url())
            .await?
        {
            Some(latest) if latest.is_failed_placeholder() => latest.version,
            Some(latest) => latest.version + 1,
            None => 1,
        };

        let result = self
            .store
            .upsert_new_version(
                NewFileRecord {
                    source_id: scope.source_id.clone(),
                    file_type: scope.file_type,
                    program: scope.program.clone(),
                    period: candidate.period().to_string(),
                    url: candidate.url().to_string(),
                    filename: candidate.filename().to_string(),
                    saved_path: path.display().to_string(),
                    bytes: fingerprint.length,
                    sha256: fingerprint.sha256,
                    etag: None,
                    last_modified: None,
                    version,
                },
                ctx.observed_at,
            )
            .await;

        match result {
            Ok(record) => {
                info!(period = candidate.period(), url = candidate.url(), path = %path.display(), "registered existing file");
                Ok(CandidateOutcome::settled(candidate, Classification::New, &record))
            }
            Err(err) => {
                let err = ReconcileError::from(err);
                if err.is_fatal() {
                    return Err(err);
                }
                Ok(CandidateOutcome::unsettled(candidate, err, None))
            }
        }
    }
}

/// Non-fatal errors become an unsettled outcome; fatal ones abort the caller.
fn settle(
    candidate: &Candidate,
    decided: Result<CandidateOutcome, ReconcileError>,
) -> Result<CandidateOutcome, ReconcileError> {
    match decided {
        Ok(outcome) => Ok(outcome),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            error!(period = candidate.period(), url = candidate.url(), error = %err, "candidate not settled");
            Ok(CandidateOutcome::unsettled(candidate, err, None))
        }
    }
}
