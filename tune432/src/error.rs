use std::path::PathBuf;
use std::time::Duration;

/// All errors that can occur in tune432.
///
/// These are raw collaborator failures. The pipeline never hands them to a
/// caller directly: they pass through [`crate::classify`] and come out as an
/// [`crate::ErrorReport`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid source URL: {0}")]
    InvalidUrl(String),

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("access forbidden: {0}")]
    Forbidden(String),

    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("size limit exceeded: {0}")]
    SizeLimit(String),

    #[error("download error: {0}")]
    Download(String),

    #[error("transcode error: {0}")]
    Transcode(String),

    #[error("artwork error: {0}")]
    Artwork(String),

    #[error("{stage} timed out after {}s", after.as_secs_f64())]
    Timeout { stage: &'static str, after: Duration },

    #[error("{0} not found on PATH")]
    ToolNotFound(&'static str),

    #[error("expected output missing or empty: {path}")]
    MissingOutput { path: PathBuf },

    #[error("path escapes artifact root: {path}")]
    OutsideRoot { path: PathBuf },

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("illegal stage transition: {0}")]
    IllegalTransition(String),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
