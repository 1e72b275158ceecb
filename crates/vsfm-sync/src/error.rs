use serde::Serialize;
use thiserror::Error;

use crate::manifest::ManifestError;

/// Reconciliation failures.
///
/// `StoreUnavailable` and `Store` abort a pass. The rest are recovered per
/// candidate or per scope and surface as pass diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconcileError {
    #[error("fetch failed for {period} | {url}: {reason}")]
    FetchFailure {
        period: String,
        url: String,
        reason: String,
        transient: bool,
    },

    #[error("could not store artifact for {period} | {url}: {reason}")]
    ArtifactWrite {
        period: String,
        url: String,
        reason: String,
    },

    #[error("duplicate version {version} for {period} | {url}")]
    DuplicateVersionConflict {
        period: String,
        url: String,
        version: i32,
    },

    #[error("scope {scope} was declared complete but enumeration reported {errors} error(s)")]
    IncompleteScopeDeclaration { scope: String, errors: usize },

    #[error("manifest store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("manifest store error: {reason}")]
    Store { reason: String },
}

impl ReconcileError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReconcileError::StoreUnavailable { .. } | ReconcileError::Store { .. }
        )
    }
}

impl From<ManifestError> for ReconcileError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::DuplicateVersionConflict {
                period,
                url,
                version,
            } => ReconcileError::DuplicateVersionConflict {
                period,
                url,
                version,
            },
            ManifestError::Unavailable(reason) => ReconcileError::StoreUnavailable { reason },
            other @ (ManifestError::RecordNotFound { .. } | ManifestError::Backend(_)) => {
                ReconcileError::Store {
                    reason: other.to_string(),
                }
            }
        }
    }
}
