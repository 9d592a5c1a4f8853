//! Error types for pipeline stages.

use thiserror::Error;

/// Error returned by a reducer, middleware or end-connector
#[derive(Error, Debug)]
pub enum TransformError {
    /// The transform refused the event or state
    #[error("{0}")]
    Rejected(String),

    /// Any other failure raised inside a transform
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TransformError {
    /// Build a [`TransformError::Rejected`] from a message
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Failure of one pipeline run, tagged with the stage that raised it
///
/// Pipeline failures are treated as programming errors in the pipeline
/// definition. The runtime never retries them.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A middleware returned an error
    #[error("middleware #{index} `{name}` failed: {source}")]
    Middleware {
        /// Position in the middleware list
        index: usize,
        /// Name reported by the middleware
        name: String,
        /// Underlying error
        source: TransformError,
    },

    /// The reducer returned an error
    #[error("reducer `{name}` failed: {source}")]
    Reducer {
        /// Name reported by the reducer
        name: String,
        /// Underlying error
        source: TransformError,
    },

    /// An end-connector returned an error
    #[error("end connector #{index} `{name}` failed: {source}")]
    EndConnector {
        /// Position in the end-connector list
        index: usize,
        /// Name reported by the end-connector
        name: String,
        /// Underlying error
        source: TransformError,
    },

    /// A stage panicked
    #[error("{stage} panicked: {message}")]
    Panicked {
        /// Stage description, e.g. ``reducer `UsersReducer` ``
        stage: String,
        /// Panic payload, when it was a string
        message: String,
    },
}

impl PipelineError {
    /// Short label of the failing stage: `middleware`, `reducer`, `end_connector` or `panic`
    #[must_use]
    pub const fn stage(&self) -> &'static str {
        match self {
            Self::Middleware { .. } => "middleware",
            Self::Reducer { .. } => "reducer",
            Self::EndConnector { .. } => "end_connector",
            Self::Panicked { .. } => "panic",
        }
    }

    /// Build a [`PipelineError::Panicked`] from a caught panic payload
    #[must_use]
    pub fn from_panic(stage: impl Into<String>, payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());

        Self::Panicked {
            stage: stage.into(),
            message,
        }
    }
}
