use serde::{Deserialize, Serialize};

/// Coarse artifact category, inferred from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Dataset,
    ModelArtifact,
    Archive,
    Unknown,
}

const DATASET_EXTENSIONS: &[&str] = &["jsonl", "json", "csv", "parquet", "tsv", "txt"];
const MODEL_EXTENSIONS: &[&str] = &["pt", "pth", "ckpt", "safetensors", "onnx", "pb", "h5"];
const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "tar", "gz", "bz2"];

impl FileType {
    /// Infers the type from the text after the last `.` in `filename`,
    /// case-insensitively. A bare dotfile such as `.jsonl` counts.
    pub fn from_filename(filename: &str) -> Self {
        let Some((_, ext)) = filename.rsplit_once('.') else {
            return Self::Unknown;
        };
        let ext = ext.to_ascii_lowercase();
        if DATASET_EXTENSIONS.contains(&ext.as_str()) {
            Self::Dataset
        } else if MODEL_EXTENSIONS.contains(&ext.as_str()) {
            Self::ModelArtifact
        } else if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Archive
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::ModelArtifact => "model_artifact",
            Self::Archive => "archive",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
