//! EduShorts - automated production of short educational videos
//!
//! This library keeps a backlog of lesson topics in a local SQLite store, turns one
//! topic per cycle into slide text and narration, renders a vertical video and
//! publishes it, retrying transient upload failures and recycling the backlog.

pub mod cli;
pub mod config;
pub mod content;
pub mod output;
pub mod pipeline;
pub mod publish;
pub mod render;
pub mod scheduler;
pub mod store;
pub mod topics;
pub mod utils;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use content::{LessonContent, LessonGenerator};
pub use pipeline::{RunFailure, RunOutcome, RunReport, Stage, VideoPipeline};
pub use publish::{Publisher, VideoMetadata};
pub use render::{Renderer, VideoProducer};
pub use scheduler::{Schedule, Scheduler};
pub use store::{StorageError, Topic, TopicCandidate, TopicStatus, TopicStore};
pub use topics::{SupplyError, TopicGenerator, TopicSupplier};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Failure taxonomy of a single pipeline run.
///
/// Every variant maps to one stage boundary so operators can tell "no topics"
/// apart from "render backend down" by reading the log store alone.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("topic supply failed: {0}")]
    Supply(#[from] SupplyError),

    #[error("no topics available after replenishment")]
    NoTopicsAvailable,

    #[error("content generation failed: {0}")]
    ContentGeneration(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("publish failed after {attempts} attempt(s): {reason}")]
    Publish { attempts: u32, reason: String },
}

impl PipelineError {
    /// Short machine-friendly label for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Storage(_) => "StorageError",
            PipelineError::Supply(_) => "SupplyError",
            PipelineError::NoTopicsAvailable => "NoTopicsAvailable",
            PipelineError::ContentGeneration(_) => "ContentGenerationError",
            PipelineError::Render(_) => "RenderError",
            PipelineError::Auth(_) => "AuthError",
            PipelineError::Publish { .. } => "PublishError",
        }
    }
}

/// Non-fatal problem found while removing run artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub path: std::path::PathBuf,
    pub message: String,
}

impl std::fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "could not remove {}: {}", self.path.display(), self.message)
    }
}
