//! Parquet snapshots of a run: what each pass decided and what the manifest
//! holds as active afterwards, plus a checksum manifest over both files.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Int32Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use tokio::fs;
use vsfm_core::FileRecord;
use vsfm_storage::ContentAddresser;

use crate::reconcile::PassReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// Writes `snapshots/` under `reports_dir` and returns the manifest path.
pub async fn export_snapshots(
    reports_dir: &Path,
    passes: &[PassReport],
    active: &[FileRecord],
) -> Result<PathBuf> {
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let reconciliation_path = snapshot_dir.join("reconciliation.parquet");
    let active_path = snapshot_dir.join("active_files.parquet");
    write_reconciliation_parquet(&reconciliation_path, passes)?;
    write_active_files_parquet(&active_path, active)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![
            manifest_entry("reconciliation", reports_dir, &reconciliation_path).await?,
            manifest_entry("active_files", reports_dir, &active_path).await?,
        ],
    };

    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_parquet(path: &Path, batch: RecordBatch) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn write_reconciliation_parquet(path: &Path, passes: &[PassReport]) -> Result<()> {
    let rows: Vec<_> = passes
        .iter()
        .flat_map(|pass| pass.outcomes.iter().map(move |outcome| (pass, outcome)))
        .collect();

    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("source_id", DataType::Utf8, false),
        ArrowField::new("file_type", DataType::Utf8, false),
        ArrowField::new("program", DataType::Utf8, true),
        ArrowField::new("period", DataType::Utf8, false),
        ArrowField::new("url", DataType::Utf8, false),
        ArrowField::new("classification", DataType::Utf8, false),
        ArrowField::new("version", DataType::Int32, true),
        ArrowField::new("reason", DataType::Utf8, true),
    ]));

    let source_ids = StringArray::from(
        rows.iter()
            .map(|(pass, _)| Some(pass.scope.source_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let file_types = StringArray::from(
        rows.iter()
            .map(|(pass, _)| Some(pass.scope.file_type.as_str()))
            .collect::<Vec<_>>(),
    );
    let programs = StringArray::from(
        rows.iter()
            .map(|(pass, _)| pass.scope.program.as_deref())
            .collect::<Vec<_>>(),
    );
    let periods = StringArray::from(
        rows.iter()
            .map(|(_, o)| Some(o.period.as_str()))
            .collect::<Vec<_>>(),
    );
    let urls = StringArray::from(rows.iter().map(|(_, o)| Some(o.url.as_str())).collect::<Vec<_>>());
    let classifications = StringArray::from(
        rows.iter()
            .map(|(_, o)| Some(o.classification.as_str()))
            .collect::<Vec<_>>(),
    );
    let versions = Int32Array::from(rows.iter().map(|(_, o)| o.version).collect::<Vec<_>>());
    let reasons = StringArray::from(
        rows.iter()
            .map(|(_, o)| o.reason.as_deref())
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(source_ids),
            Arc::new(file_types),
            Arc::new(programs),
            Arc::new(periods),
            Arc::new(urls),
            Arc::new(classifications),
            Arc::new(versions),
            Arc::new(reasons),
        ],
    )
    .context("building reconciliation record batch")?;
    write_parquet(path, batch)
}

fn write_active_files_parquet(path: &Path, active: &[FileRecord]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("source_id", DataType::Utf8, false),
        ArrowField::new("file_type", DataType::Utf8, false),
        ArrowField::new("program", DataType::Utf8, true),
        ArrowField::new("period", DataType::Utf8, false),
        ArrowField::new("url", DataType::Utf8, false),
        ArrowField::new("saved_path", DataType::Utf8, false),
        ArrowField::new("bytes", DataType::Int64, false),
        ArrowField::new("sha256", DataType::Utf8, false),
        ArrowField::new("version", DataType::Int32, false),
        ArrowField::new("downloaded_at", DataType::Utf8, true),
    ]));

    let source_ids = StringArray::from(
        active
            .iter()
            .map(|r| Some(r.source_id.as_str()))
            .collect::<Vec<_>>(),
    );
    let file_types = StringArray::from(
        active
            .iter()
            .map(|r| Some(r.file_type.as_str()))
            .collect::<Vec<_>>(),
    );
    let programs = StringArray::from(active.iter().map(|r| r.program.as_deref()).collect::<Vec<_>>());
    let periods = StringArray::from(active.iter().map(|r| Some(r.period.as_str())).collect::<Vec<_>>());
    let urls = StringArray::from(active.iter().map(|r| Some(r.url.as_str())).collect::<Vec<_>>());
    let saved_paths = StringArray::from(
        active
            .iter()
            .map(|r| Some(r.saved_path.as_str()))
            .collect::<Vec<_>>(),
    );
    let bytes = Int64Array::from(active.iter().map(|r| r.bytes).collect::<Vec<_>>());
    let hashes = StringArray::from(active.iter().map(|r| Some(r.sha256.as_str())).collect::<Vec<_>>());
    let versions = Int32Array::from(active.iter().map(|r| r.version).collect::<Vec<_>>());
    let downloaded = StringArray::from(
        active
            .iter()
            .map(|r| r.downloaded_at.map(|at| at.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(source_ids),
            Arc::new(file_types),
            Arc::new(programs),
            Arc::new(periods),
            Arc::new(urls),
            Arc::new(saved_paths),
            Arc::new(bytes),
            Arc::new(hashes),
            Arc::new(versions),
            Arc::new(downloaded),
        ],
    )
    .context("building active_files record batch")?;
    write_parquet(path, batch)
}

async fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: ContentAddresser::sha256_hex(&bytes),
        bytes: bytes.len() as u64,
    })
}
