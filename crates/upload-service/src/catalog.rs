//! Catalog notifier: records dataset and model lineage in a JSON store.

use std::path::{Path, PathBuf};

use chrono::Utc;
use chunkup_protocol::types::FileType;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::info;

use crate::atomic::write_atomic;
use crate::error::UploadError;
use crate::hooks::{ArtifactInfo, PipelineNotifier};
use crate::store::BoxFuture;

/// Where a catalog record came from and what consumed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lineage {
    pub source: String,
    pub upload_timestamp: String,
    #[serde(default)]
    pub downstream_jobs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    pub format: String,
    /// Line count for jsonl, data rows for csv, unknown otherwise.
    pub estimated_records: Option<u64>,
    pub preview_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    pub format: String,
    pub framework: String,
}

/// One entry of the catalog store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    pub id: String,
    pub registered_at: String,
    pub filename: String,
    pub size: u64,
    pub checksum: String,
    pub timestamp: String,
    pub file_type: FileType,
    pub filepath: String,
    pub lineage: Lineage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_info: Option<DatasetInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    uploads: Vec<CatalogRecord>,
}

/// [`PipelineNotifier`] that registers datasets and model artifacts in a
/// JSON catalog file (`{"uploads": [...]}`). It never returns a job id.
pub struct CatalogNotifier {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl CatalogNotifier {
    /// Opens the catalog at `path`, creating an empty one if missing.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !tokio::fs::try_exists(&path).await? {
            let empty = serde_json::to_vec_pretty(&CatalogFile::default())?;
            write_atomic(&path, &empty).await?;
        }
        Ok(Self {
            path,
            lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every record in the catalog.
    pub async fn records(&self) -> Result<Vec<CatalogRecord>, UploadError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.uploads)
    }

    /// Lineage of a registered upload, or `None` if it is not in the catalog.
    pub async fn lineage(&self, upload_id: &str) -> Result<Option<Lineage>, UploadError> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .find(|r| r.id == upload_id)
            .map(|r| r.lineage))
    }

    async fn register(&self, artifact: &ArtifactInfo) -> Result<Option<String>, UploadError> {
        let file_type = artifact.metadata.file_type;
        if !matches!(file_type, FileType::Dataset | FileType::ModelArtifact) {
            return Ok(None);
        }

        let record = build_record(artifact).await?;
        let _guard = self.lock.lock().await;
        let mut catalog = self.load().await?;
        catalog.uploads.push(record);
        write_atomic(&self.path, &serde_json::to_vec_pretty(&catalog)?).await?;

        info!(
            upload_id = %artifact.metadata.upload_id,
            file_type = %file_type,
            "artifact registered in catalog"
        );
        Ok(None)
    }

    async fn load(&self) -> Result<CatalogFile, UploadError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CatalogFile::default()),
            Err(e) => Err(e.into()),
        }
    }
}

impl PipelineNotifier for CatalogNotifier {
    fn notify<'a>(
        &'a self,
        artifact: &'a ArtifactInfo,
    ) -> BoxFuture<'a, Result<Option<String>, UploadError>> {
        Box::pin(self.register(artifact))
    }
}

async fn build_record(artifact: &ArtifactInfo) -> Result<CatalogRecord, UploadError> {
    let meta = &artifact.metadata;
    let format = artifact.extension().unwrap_or_default();

    let dataset_info = if meta.file_type == FileType::Dataset {
        Some(DatasetInfo {
            estimated_records: estimate_records(&artifact.path, &format).await?,
            format: format.clone(),
            preview_available: true,
        })
    } else {
        None
    };
    let model_info = (meta.file_type == FileType::ModelArtifact).then(|| ModelInfo {
        framework: detect_framework(&format).to_string(),
        format: format.clone(),
    });

    Ok(CatalogRecord {
        id: meta.upload_id.clone(),
        registered_at: Utc::now().to_rfc3339(),
        filename: meta.filename.clone(),
        size: meta.size,
        checksum: meta.checksum.clone(),
        timestamp: meta.timestamp.clone(),
        file_type: meta.file_type,
        filepath: artifact.path.display().to_string(),
        lineage: Lineage {
            source: "user_upload".to_string(),
            upload_timestamp: meta.timestamp.clone(),
            downstream_jobs: Vec::new(),
        },
        dataset_info,
        model_info,
    })
}

async fn estimate_records(path: &Path, format: &str) -> Result<Option<u64>, UploadError> {
    match format {
        "jsonl" => Ok(Some(count_lines(path).await?)),
        // Header row excluded.
        "csv" => Ok(Some(count_lines(path).await?.saturating_sub(1))),
        _ => Ok(None),
    }
}

/// Counts lines, including a final line without a trailing newline.
async fn count_lines(path: &Path) -> Result<u64, UploadError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut lines = 0u64;
    let mut last = None;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        lines += buf[..n].iter().filter(|&&b| b == b'\n').count() as u64;
        last = Some(buf[n - 1]);
    }
    if last.is_some_and(|b| b != b'\n') {
        lines += 1;
    }
    Ok(lines)
}

fn detect_framework(format: &str) -> &'static str {
    match format {
        "pt" | "pth" | "ckpt" => "pytorch",
        "safetensors" => "safetensors",
        "onnx" => "onnx",
        "pb" => "tensorflow",
        "h5" => "keras",
        _ => "unknown",
    }
}
