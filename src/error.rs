use thiserror::Error;

/// Failures surfaced by the batch stages and the artifact loader.
///
/// Messages carry the stage name and the counts needed by whoever decides
/// between retry and escalation.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or missing request field
    #[error("validation error: {0}")]
    Validation(String),

    /// A record rejected by a data-quality rule. Never fatal: the row is
    /// dropped and counted.
    #[error("data quality: {0}")]
    DataQuality(String),

    #[error("[{stage}] join produced {merged} rows from {cleaned} cleaned telemetry rows: {reason}")]
    Join {
        stage: &'static str,
        merged: usize,
        cleaned: usize,
        reason: String,
    },

    #[error("[{stage}] training aborted on {rows} labeled rows: {reason}")]
    Training {
        stage: &'static str,
        rows: usize,
        reason: String,
    },

    #[error("artifact error ({path}): {reason}")]
    Artifact { path: String, reason: String },

    #[error("inference error: {0}")]
    Inference(String),

    #[error("[{stage}] required source '{source_name}' unavailable: {cause}")]
    SourceUnavailable {
        stage: &'static str,
        source_name: String,
        cause: String,
    },

    #[error("[{stage}] storage failure: {cause}")]
    Storage { stage: &'static str, cause: String },
}

impl PipelineError {
    pub fn unavailable(stage: &'static str, source_name: &str, cause: impl ToString) -> Self {
        PipelineError::SourceUnavailable {
            stage,
            source_name: source_name.to_string(),
            cause: cause.to_string(),
        }
    }

    pub fn storage(stage: &'static str, cause: impl ToString) -> Self {
        PipelineError::Storage {
            stage,
            cause: cause.to_string(),
        }
    }

    pub fn artifact(path: impl ToString, reason: impl ToString) -> Self {
        PipelineError::Artifact {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
