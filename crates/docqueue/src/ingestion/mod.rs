//! Document ingestion: PDF text extraction, layout and reference mapping

mod analyzer;
mod blocks;
mod parser;
mod references;

pub use analyzer::{check_filename, AnalysisRequest, DocumentAnalyzer, UploadRejection};
pub use blocks::{caption_label, split_blocks};
pub use parser::{LoadedPdf, PageText, PdfParser};
pub use references::{collect_figures, map_references};
