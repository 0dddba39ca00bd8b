use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which model call a workflow failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Analysis,
    Steps,
    Completion,
    Preview,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Analysis => "analysis",
            Self::Steps => "steps",
            Self::Completion => "completion",
            Self::Preview => "preview",
        };
        f.write_str(name)
    }
}

/// Failures surfaced by a model capability.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("GEMINI_API_KEY or GOOGLE_API_KEY not set")]
    MissingApiKey,
    #[error("{provider} request failed ({endpoint})")]
    Transport {
        provider: String,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} request failed ({code}): {body}")]
    Status {
        provider: String,
        code: u16,
        body: String,
    },
    #[error("{provider} returned invalid JSON payload")]
    InvalidPayload {
        provider: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("{0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("{stage} model did not return any content")]
    EmptyContent { stage: Stage },
    #[error("{stage} response does not match the expected schema: {source}")]
    Schema {
        stage: Stage,
        #[source]
        source: serde_json::Error,
    },
    #[error("{stage} response violates the expected schema: {reason}")]
    SchemaViolation { stage: Stage, reason: String },
    #[error("{stage} model call failed: {source}")]
    Model {
        stage: Stage,
        #[source]
        source: ModelError,
    },
    #[error("file system error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error at '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl PlanError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }

    /// True for failures caused by the model rather than local I/O.
    pub fn is_model_failure(&self) -> bool {
        matches!(
            self,
            Self::EmptyContent { .. }
                | Self::Schema { .. }
                | Self::SchemaViolation { .. }
                | Self::Model { .. }
        )
    }
}

pub type PlanResult<T> = Result<T, PlanError>;
