//! Wire and payload types

pub mod analysis;
pub mod response;

pub use analysis::{AnalysisResponse, BlockType, Metadata, Page, Reference, TextBlock};
pub use response::{
    CancelResponse, HealthResponse, QueueStatusResponse, StreamEvent, TaskStatusResponse,
};
