//! Typed error hierarchy for the build-deploy-notify pipeline.
//!
//! Each fatal pipeline stage owns one enum:
//! - `GenerationError` (wrapping `ExtractionError`) for code generation
//! - `PublishError` (wrapping `CommandFailure`) for repository publishing
//! - `NotifyError` for the evaluator callback
//!
//! `PipelineError` is what the orchestrator records when a round aborts.
//! Front-door validation errors live in `server::api::ApiError`.

use thiserror::Error;

/// The generator output held no object matching the expected schema.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("No JSON object found in generator output")]
    NoCandidate,

    #[error("Generator output contained JSON but none matched the expected shape: {0}")]
    Schema(#[source] serde_json::Error),
}

/// Code generation failed; fatal for the round.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Generation backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Generator returned an empty file list")]
    EmptyFileSet,

    #[error("Generator returned an unusable file name '{name}': {reason}")]
    InvalidFile { name: String, reason: String },
}

/// An external process exited unsuccessfully (or could not be started).
#[derive(Debug, Error)]
#[error("Command failed: {command} (exit {status:?}): {stderr}")]
pub struct CommandFailure {
    /// Command line with credentials redacted.
    pub command: String,
    pub status: Option<i32>,
    pub stderr: String,
}

/// Repository publishing failed; fatal for the round.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Command(#[from] CommandFailure),

    #[error("Hosting platform error: {0}")]
    Hosting(String),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The evaluator never acknowledged the notification.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Evaluator notification failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// A fatal error that aborted a round, tagged with the stage it came from.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("publishing failed: {0}")]
    Publish(#[from] PublishError),

    #[error("notification failed: {0}")]
    Notify(#[from] NotifyError),
}

impl PipelineError {
    pub fn stage(&self) -> crate::models::RoundStage {
        use crate::models::RoundStage;
        match self {
            PipelineError::Generation(_) => RoundStage::Generating,
            PipelineError::Publish(_) => RoundStage::Publishing,
            PipelineError::Notify(_) => RoundStage::Notifying,
        }
    }
}
