//! Document analysis result types

use serde::{Deserialize, Serialize};

/// Full analysis result, the payload of a completed task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub metadata: Metadata,
    pub pages: Vec<Page>,
    /// Caption blocks that references can point at
    pub figures: Vec<TextBlock>,
}

/// Document-level facts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub filename: String,
    pub total_pages: usize,
    /// Bytes
    pub file_size: u64,
    /// Seconds, rounded to two decimals
    pub processing_time: f64,
    pub processor: String,
}

impl Metadata {
    pub fn round_processing_time(seconds: f64) -> f64 {
        (seconds * 100.0).round() / 100.0
    }
}

/// One page of the document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    /// 0-based page index
    pub index: usize,
    /// Width and height in PDF points
    pub page_size: [f32; 2],
    pub blocks: Vec<TextBlock>,
    pub references: Vec<Reference>,
}

/// Kind of a text block
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BlockType {
    Text,
    SectionHeader,
    Figure,
    Table,
    Equation,
}

impl BlockType {
    /// Blocks that in-text references may resolve to
    pub fn is_referenceable(&self) -> bool {
        matches!(self, BlockType::Figure | BlockType::Table | BlockType::Equation)
    }
}

/// A paragraph-level block of text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    /// Position on the page, `[x0, y0, x1, y1]`, estimated from the block's
    /// line span when the extractor gives no coordinates
    pub bbox: [f32; 4],
    pub page_idx: usize,
    /// Stable id, `/page/<n>/block/<m>`
    pub id: String,
    pub block_type: BlockType,
}

/// An in-text mention such as "Figure 2" and what it resolved to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub text: String,
    /// Estimated position of the mention inside its block
    pub bbox: [f32; 4],
    /// Caption block id, when resolved
    pub figure_id: Option<String>,
    pub not_matched: bool,
}
