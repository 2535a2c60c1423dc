//! Document analysis job: the executor the queue runs for each upload

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Instant;

use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::processing::{JobError, JobExecutor, ProgressSender, StageInfo};
use crate::types::{AnalysisResponse, Metadata, Page};

use super::blocks::split_blocks;
use super::parser::{PageText, PdfParser};
use super::references::{collect_figures, map_references};

const PROCESSOR_NAME: &str = "lopdf";

/// Stages reported through the stage callback, in order
const STAGES: [&str; 3] = ["load", "extract", "layout"];

/// One uploaded document
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub filename: String,
    pub data: Bytes,
}

/// Why an upload was turned away before reaching the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRejection {
    NoFile,
    NoFilename,
    UnsupportedType,
}

impl UploadRejection {
    pub fn message(&self) -> &'static str {
        match self {
            UploadRejection::NoFile => "No file provided",
            UploadRejection::NoFilename => "No file selected",
            UploadRejection::UnsupportedType => "Only PDF files are supported",
        }
    }
}

/// Check an upload's filename against the accepted extensions
pub fn check_filename(
    filename: &str,
    allowed_extensions: &[String],
) -> std::result::Result<(), UploadRejection> {
    if filename.trim().is_empty() {
        return Err(UploadRejection::NoFilename);
    }
    let Some((_, extension)) = filename.rsplit_once('.') else {
        return Err(UploadRejection::UnsupportedType);
    };
    if allowed_extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(extension))
    {
        Ok(())
    } else {
        Err(UploadRejection::UnsupportedType)
    }
}

/// Extracts pages, blocks and references from a PDF
pub struct DocumentAnalyzer {
    config: AnalysisConfig,
}

impl DocumentAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Load, extract and lay out the document, reporting each stage
    fn run_stages(
        filename: &str,
        data: Vec<u8>,
        progress: &ProgressSender,
    ) -> Result<(u64, Vec<Page>)> {
        let total = STAGES.len();
        let stage = |index: usize, info: StageInfo| {
            progress.stage(STAGES[index], index, total, &info);
        };

        let started = Instant::now();
        stage(0, StageInfo::starting());
        let pdf = PdfParser::load(filename, data).inspect_err(|e| {
            stage(0, StageInfo::error(e.to_string()));
        })?;
        stage(0, StageInfo::completed(started.elapsed()));
        tracing::debug!("{}: {} pages", pdf.filename(), pdf.page_count());

        let started = Instant::now();
        stage(1, StageInfo::starting());
        let texts: Vec<PageText> = PdfParser::extract_pages(&pdf).inspect_err(|e| {
            stage(1, StageInfo::error(e.to_string()));
        })?;
        stage(1, StageInfo::completed(started.elapsed()));

        let started = Instant::now();
        stage(2, StageInfo::starting());
        let pages = texts
            .iter()
            .map(|text| Page {
                index: text.index,
                page_size: text.size,
                blocks: split_blocks(text),
                references: Vec::new(),
            })
            .collect();
        stage(2, StageInfo::completed(started.elapsed()));

        Ok((pdf.file_size(), pages))
    }
}

#[async_trait]
impl JobExecutor for DocumentAnalyzer {
    type Request = AnalysisRequest;

    async fn execute(
        &self,
        request: AnalysisRequest,
        progress: ProgressSender,
    ) -> std::result::Result<serde_json::Value, JobError> {
        let start = Instant::now();
        let AnalysisRequest { filename, data } = request;
        let failed =
            |message: String| JobError::extraction(format!("Document processing failed: {}", message));

        progress.report("Preparing extraction", 25);
        progress.report("Starting document processing", 30);

        let timeout = self.config.extraction_timeout();
        let mut blocking = {
            let filename = filename.clone();
            let progress = progress.clone();
            tokio::task::spawn_blocking(move || {
                Self::run_stages(&filename, data.to_vec(), &progress)
            })
        };

        let joined = match tokio::time::timeout(timeout, &mut blocking).await {
            Ok(joined) => joined,
            Err(_) => {
                // Blocking work cannot be interrupted; keep the slot until it returns
                tracing::error!(
                    "Extraction of {} exceeded {}s, waiting for it to finish",
                    filename,
                    timeout.as_secs()
                );
                let _ = blocking.await;
                return Err(failed(format!(
                    "extraction timed out after {}s",
                    timeout.as_secs()
                )));
            }
        };
        let (file_size, mut pages) = match joined {
            Ok(Ok(extracted)) => extracted,
            Ok(Err(e)) => return Err(failed(e.to_string())),
            Err(join_error) => return Err(failed(format!("extractor crashed: {}", join_error))),
        };
        progress.report("Extraction completed", 80);

        progress.report("Mapping references", 90);
        let figures = collect_figures(&pages);
        let resolved = map_references(&mut pages, &figures);
        progress.report("References mapped", 95);

        let processing_time = Metadata::round_processing_time(start.elapsed().as_secs_f64());
        tracing::info!(
            "Analyzed {}: {} pages, {} figures, {} references resolved in {:.2}s",
            filename,
            pages.len(),
            figures.len(),
            resolved,
            processing_time
        );

        let response = AnalysisResponse {
            metadata: Metadata {
                filename,
                total_pages: pages.len(),
                file_size,
                processing_time,
                processor: PROCESSOR_NAME.to_string(),
            },
            pages,
            figures,
        };

        serde_json::to_value(&response).map_err(|e| JobError::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{progress_channel, FailureKind};

    fn pdf_only() -> Vec<String> {
        vec!["pdf".to_string()]
    }

    #[test]
    fn test_filename_checks() {
        assert_eq!(check_filename("paper.pdf", &pdf_only()), Ok(()));
        assert_eq!(check_filename("PAPER.PDF", &pdf_only()), Ok(()));
        assert_eq!(
            check_filename("", &pdf_only()),
            Err(UploadRejection::NoFilename)
        );
        assert_eq!(
            check_filename("notes.txt", &pdf_only()),
            Err(UploadRejection::UnsupportedType)
        );
        assert_eq!(
            check_filename("pdf", &pdf_only()),
            Err(UploadRejection::UnsupportedType)
        );
    }

    #[test]
    fn test_rejection_messages() {
        assert_eq!(UploadRejection::NoFile.message(), "No file provided");
        assert_eq!(UploadRejection::NoFilename.message(), "No file selected");
        assert_eq!(
            UploadRejection::UnsupportedType.message(),
            "Only PDF files are supported"
        );
    }

    #[tokio::test]
    async fn test_garbage_upload_fails_as_extraction_error() {
        let analyzer = DocumentAnalyzer::new(AnalysisConfig::default());
        let (tx, mut rx) = progress_channel(32);

        let err = analyzer
            .execute(
                AnalysisRequest {
                    filename: "fake.pdf".to_string(),
                    data: Bytes::from_static(b"not really a pdf"),
                },
                tx,
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::Extraction);
        assert!(err.message.starts_with("Document processing failed:"));

        let messages: Vec<_> = rx.drain().into_iter().map(|e| e.message).collect();
        assert_eq!(messages[0], "Preparing extraction");
        assert_eq!(messages[1], "Starting document processing");
        assert_eq!(messages[2], "Starting load (1/3)");
        assert!(!messages.iter().any(|m| m == "Extraction completed"));
    }

    #[tokio::test]
    async fn test_timed_out_extraction_finishes_before_returning() {
        let analyzer = DocumentAnalyzer::new(AnalysisConfig {
            extraction_timeout_secs: 0,
            ..AnalysisConfig::default()
        });
        let (tx, mut rx) = progress_channel(32);

        let mut data = b"%PDF-1.7\n".to_vec();
        data.resize(4 * 1024 * 1024, b'x');
        let err = analyzer
            .execute(
                AnalysisRequest {
                    filename: "huge.pdf".to_string(),
                    data: Bytes::from(data),
                },
                tx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Extraction);
        assert!(err.message.starts_with("Document processing failed:"));

        // Everything the blocking stages reported is already delivered
        let messages: Vec<_> = rx.drain().into_iter().map(|e| e.message).collect();
        assert!(messages.iter().any(|m| m == "Starting load (1/3)"));

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_none());
    }
}
