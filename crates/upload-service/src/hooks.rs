//! Advisory collaborators invoked after an artifact has been written.
//!
//! Hooks never remove or hide a reassembled artifact. A hook that errors
//! out is reported as a [`CollaboratorFailure`] in the completion result.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use chunkup_protocol::constants::ERR_COLLABORATOR;
use chunkup_protocol::messages::{CollaboratorFailure, FileMetadata, HookOutcome, HookReport};
use chunkup_protocol::types::FileType;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

use crate::error::UploadError;
use crate::store::BoxFuture;

/// Number of leading lines checked in a JSONL dataset.
const JSONL_CHECK_LINES: usize = 10;

/// A reassembled artifact, as seen by hooks.
#[derive(Debug, Clone)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub metadata: FileMetadata,
}

impl ArtifactInfo {
    /// Lowercased text after the last dot of the artifact's file name, the
    /// same rule [`FileType::from_filename`] uses.
    pub fn extension(&self) -> Option<String> {
        let name = self.path.file_name()?.to_str()?;
        let (_, ext) = name.rsplit_once('.')?;
        Some(ext.to_ascii_lowercase())
    }
}

/// Format or schema check.
pub trait ArtifactValidator: Send + Sync {
    fn validate<'a>(
        &'a self,
        artifact: &'a ArtifactInfo,
    ) -> BoxFuture<'a, Result<HookOutcome, UploadError>>;
}

/// Virus / PII scan.
pub trait SecurityScanner: Send + Sync {
    fn scan<'a>(&'a self, artifact: &'a ArtifactInfo)
    -> BoxFuture<'a, Result<HookOutcome, UploadError>>;
}

/// Downstream pipeline notification. Returns an opaque job id, if any.
pub trait PipelineNotifier: Send + Sync {
    fn notify<'a>(
        &'a self,
        artifact: &'a ArtifactInfo,
    ) -> BoxFuture<'a, Result<Option<String>, UploadError>>;
}

/// The set of hooks run at completion. Any of them may be absent.
#[derive(Clone, Default)]
pub struct Hooks {
    validator: Option<Arc<dyn ArtifactValidator>>,
    scanner: Option<Arc<dyn SecurityScanner>>,
    notifier: Option<Arc<dyn PipelineNotifier>>,
}

impl Hooks {
    /// No hooks at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_validator(mut self, validator: Arc<dyn ArtifactValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn SecurityScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn PipelineNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Runs every configured hook in order: validation, scan, notification.
    pub(crate) async fn run(&self, artifact: &ArtifactInfo) -> (HookReport, Option<String>) {
        let mut report = HookReport::default();
        let mut job_id = None;

        if let Some(validator) = &self.validator {
            match validator.validate(artifact).await {
                Ok(outcome) => {
                    if !outcome.passed {
                        warn!(
                            upload_id = %artifact.metadata.upload_id,
                            reason = outcome.reason.as_deref().unwrap_or(""),
                            "artifact failed validation"
                        );
                    }
                    report.validation = Some(outcome);
                }
                Err(e) => report.collaborator_errors.push(failure("validation", &e)),
            }
        }

        if let Some(scanner) = &self.scanner {
            match scanner.scan(artifact).await {
                Ok(outcome) => report.scan = Some(outcome),
                Err(e) => report.collaborator_errors.push(failure("scan", &e)),
            }
        }

        if let Some(notifier) = &self.notifier {
            match notifier.notify(artifact).await {
                Ok(id) => job_id = id,
                Err(e) => report.collaborator_errors.push(failure("notification", &e)),
            }
        }

        for f in &report.collaborator_errors {
            warn!(
                upload_id = %artifact.metadata.upload_id,
                hook = %f.hook,
                error = %f.message,
                "completion hook failed"
            );
        }
        (report, job_id)
    }
}

fn failure(hook: &str, err: &UploadError) -> CollaboratorFailure {
    CollaboratorFailure {
        hook: hook.to_string(),
        code: ERR_COLLABORATOR,
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Default implementations
// ---------------------------------------------------------------------------

/// Checks that dataset files are well formed.
///
/// Non-dataset artifacts pass. For `.jsonl`, each of the first ten lines
/// must parse as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetValidator;

impl DatasetValidator {
    async fn check(&self, artifact: &ArtifactInfo) -> Result<HookOutcome, UploadError> {
        if artifact.metadata.file_type != FileType::Dataset {
            return Ok(HookOutcome::pass());
        }
        if artifact.extension().as_deref() != Some("jsonl") {
            return Ok(HookOutcome::pass());
        }

        let file = tokio::fs::File::open(&artifact.path).await?;
        let mut lines = BufReader::new(file).lines();
        for n in 1..=JSONL_CHECK_LINES {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    return Ok(HookOutcome::fail(format!("invalid UTF-8 at line {n}")));
                }
                Err(e) => return Err(e.into()),
            };
            if serde_json::from_str::<serde_json::Value>(line.trim()).is_err() {
                return Ok(HookOutcome::fail(format!("invalid JSONL format at line {n}")));
            }
        }
        debug!(path = %artifact.path.display(), "dataset validated");
        Ok(HookOutcome::pass())
    }
}

impl ArtifactValidator for DatasetValidator {
    fn validate<'a>(
        &'a self,
        artifact: &'a ArtifactInfo,
    ) -> BoxFuture<'a, Result<HookOutcome, UploadError>> {
        Box::pin(self.check(artifact))
    }
}

/// Scanner placeholder: always passes and reports both scans as skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkippedScanner;

impl SecurityScanner for SkippedScanner {
    fn scan<'a>(
        &'a self,
        _artifact: &'a ArtifactInfo,
    ) -> BoxFuture<'a, Result<HookOutcome, UploadError>> {
        Box::pin(async move {
            Ok(HookOutcome {
                passed: true,
                reason: Some(format!("skipped at {}", Utc::now().to_rfc3339())),
                findings: vec![
                    "virus_scan: skipped".to_string(),
                    "pii_detection: skipped".to_string(),
                ],
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact(dir: &TempDir, name: &str, content: &[u8]) -> ArtifactInfo {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        ArtifactInfo {
            path,
            metadata: FileMetadata {
                upload_id: "u1".into(),
                filename: name.into(),
                size: content.len() as u64,
                checksum: String::new(),
                file_type: FileType::from_filename(name),
                timestamp: "2024-01-01T00:00:00Z".into(),
            },
        }
    }

    struct FailingNotifier;

    impl PipelineNotifier for FailingNotifier {
        fn notify<'a>(
            &'a self,
            _artifact: &'a ArtifactInfo,
        ) -> BoxFuture<'a, Result<Option<String>, UploadError>> {
            Box::pin(async {
                Err(UploadError::Collaborator {
                    hook: "notification".into(),
                    message: "pipeline offline".into(),
                })
            })
        }
    }

    struct JobNotifier;

    impl PipelineNotifier for JobNotifier {
        fn notify<'a>(
            &'a self,
            _artifact: &'a ArtifactInfo,
        ) -> BoxFuture<'a, Result<Option<String>, UploadError>> {
            Box::pin(async { Ok(Some("job-7".to_string())) })
        }
    }

    #[tokio::test]
    async fn valid_jsonl_passes() {
        let tmp = TempDir::new().unwrap();
        let a = artifact(&tmp, "train.jsonl", b"{\"a\":1}\n{\"b\":2}\n");
        let outcome = DatasetValidator.validate(&a).await.unwrap();
        assert!(outcome.passed);
    }

    #[tokio::test]
    async fn invalid_jsonl_reports_line() {
        let tmp = TempDir::new().unwrap();
        let a = artifact(&tmp, "train.jsonl", b"{\"a\":1}\nnot json\n");
        let outcome = DatasetValidator.validate(&a).await.unwrap();
        assert!(!outcome.passed);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("invalid JSONL format at line 2")
        );
    }

    #[tokio::test]
    async fn only_first_ten_lines_are_checked() {
        let tmp = TempDir::new().unwrap();
        let mut content = "{}\n".repeat(10);
        content.push_str("broken\n");
        let a = artifact(&tmp, "train.jsonl", content.as_bytes());
        assert!(DatasetValidator.validate(&a).await.unwrap().passed);
    }

    #[tokio::test]
    async fn non_datasets_pass() {
        let tmp = TempDir::new().unwrap();
        let a = artifact(&tmp, "weights.pt", b"\x00\x01garbage");
        assert!(DatasetValidator.validate(&a).await.unwrap().passed);
    }

    #[tokio::test]
    async fn scanner_reports_skipped() {
        let tmp = TempDir::new().unwrap();
        let a = artifact(&tmp, "a.bin", b"x");
        let outcome = SkippedScanner.scan(&a).await.unwrap();
        assert!(outcome.passed);
        assert_eq!(outcome.findings.len(), 2);
    }

    #[tokio::test]
    async fn run_collects_results_and_failures() {
        let tmp = TempDir::new().unwrap();
        let a = artifact(&tmp, "train.jsonl", b"oops\n");
        let hooks = Hooks::none()
            .with_validator(Arc::new(DatasetValidator))
            .with_scanner(Arc::new(SkippedScanner))
            .with_notifier(Arc::new(FailingNotifier));

        let (report, job) = hooks.run(&a).await;
        assert!(!report.validation.unwrap().passed);
        assert!(report.scan.unwrap().passed);
        assert_eq!(job, None);
        assert_eq!(report.collaborator_errors.len(), 1);
        assert_eq!(report.collaborator_errors[0].hook, "notification");
        assert_eq!(report.collaborator_errors[0].code, 502);
        // The artifact is untouched.
        assert!(a.path.exists());
    }

    #[tokio::test]
    async fn run_returns_job_id() {
        let tmp = TempDir::new().unwrap();
        let a = artifact(&tmp, "a.csv", b"x,y\n");
        let (report, job) = Hooks::none()
            .with_notifier(Arc::new(JobNotifier))
            .run(&a)
            .await;
        assert_eq!(job.as_deref(), Some("job-7"));
        assert_eq!(report, HookReport::default());
    }
}
