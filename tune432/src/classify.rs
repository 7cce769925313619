//! Failure classification.
//!
//! Collaborators report whatever they like; this module folds it into the
//! closed [`ErrorKind`] set the rest of the system speaks. It knows nothing
//! about the pipeline's state machine, so fetch and transcode strategies can
//! change without touching it.

use std::fmt;

use serde::Serialize;

use crate::error::Error;

/// Closed set of user-facing failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidInput,
    AuthRequired,
    Forbidden,
    NotFound,
    SizeLimitExceeded,
    DownloadError,
    Timeout,
    TranscodeError,
    ArtworkFailed,
    InternalError,
}

impl ErrorKind {
    /// HTTP status for this kind: only unexpected failures are a 500.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InternalError => 500,
            _ => 400,
        }
    }

    /// Fixed message shown to clients.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "Please provide a valid video URL",
            ErrorKind::AuthRequired => {
                "The source requires sign-in to access this video. Try another URL."
            }
            ErrorKind::Forbidden => "Access to this video was denied by the source",
            ErrorKind::NotFound => "The video could not be found or is unavailable",
            ErrorKind::SizeLimitExceeded => "The video is too large or too long to convert",
            ErrorKind::DownloadError => {
                "Failed to download audio. Try another URL or try again later."
            }
            ErrorKind::Timeout => "The request took too long. Try again later.",
            ErrorKind::TranscodeError => "Failed to convert audio to 432 Hz",
            ErrorKind::ArtworkFailed => "Cover art could not be embedded",
            ErrorKind::InternalError => "Conversion failed due to an internal error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Where a failure happened; picks the fallback kind for unrecognized errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Input,
    Fetch,
    Transcode,
    Artwork,
    Internal,
}

impl Phase {
    fn default_kind(&self) -> ErrorKind {
        match self {
            Phase::Input => ErrorKind::InvalidInput,
            Phase::Fetch => ErrorKind::DownloadError,
            Phase::Transcode => ErrorKind::TranscodeError,
            Phase::Artwork => ErrorKind::ArtworkFailed,
            Phase::Internal => ErrorKind::InternalError,
        }
    }
}

/// Tagged failure value returned to callers of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.user_message().to_string(),
        }
    }

    /// Classify `err` and build the client-facing report. The raw error is
    /// logged, never returned.
    pub fn from_error(phase: Phase, err: &Error) -> Self {
        let kind = classify(phase, err);
        tracing::warn!(?phase, %kind, error = %err, "classified failure");
        Self::new(kind)
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ErrorReport {}

/// Map a raw failure to one [`ErrorKind`].
pub fn classify(phase: Phase, err: &Error) -> ErrorKind {
    // Artwork is decoration: whatever went wrong, it is only ever a warning.
    if phase == Phase::Artwork {
        return ErrorKind::ArtworkFailed;
    }
    match err {
        Error::InvalidUrl(_) => ErrorKind::InvalidInput,
        Error::AuthRequired(_) => ErrorKind::AuthRequired,
        Error::Forbidden(_) => ErrorKind::Forbidden,
        Error::SourceNotFound(_) => ErrorKind::NotFound,
        Error::SizeLimit(_) => ErrorKind::SizeLimitExceeded,
        Error::Timeout { .. } if phase == Phase::Transcode => ErrorKind::TranscodeError,
        Error::Timeout { .. } => ErrorKind::Timeout,
        Error::Http(e) => classify_http(phase, e),
        Error::Download(text) => classify_text(text).unwrap_or_else(|| phase.default_kind()),
        Error::Transcode(_) | Error::Artwork(_) => phase.default_kind(),
        Error::IllegalTransition(_) | Error::Worker(_) => ErrorKind::InternalError,
        Error::ToolNotFound(_)
        | Error::MissingOutput { .. }
        | Error::OutsideRoot { .. }
        | Error::ArtifactNotFound(_)
        | Error::Io(_)
        | Error::Json(_) => phase.default_kind(),
    }
}

fn classify_http(phase: Phase, err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        return ErrorKind::Timeout;
    }
    match err.status().map(|s| s.as_u16()) {
        Some(401) => ErrorKind::AuthRequired,
        Some(403) => ErrorKind::Forbidden,
        Some(404) | Some(410) => ErrorKind::NotFound,
        _ => phase.default_kind(),
    }
}

/// Best-effort pattern match on extractor/transcoder output.
pub fn classify_text(text: &str) -> Option<ErrorKind> {
    let lower = text.to_lowercase();
    let has = |needle: &str| lower.contains(needle);

    // A missing local tool says nothing about the source.
    if has("ffmpeg not found") || has("ffprobe") || has("--ffmpeg-location") {
        return None;
    }
    if has_word(&lower, "403") || has("forbidden") {
        return Some(ErrorKind::Forbidden);
    }
    if has("sign in to confirm")
        || has("login required")
        || has("use --cookies")
        || has_word(&lower, "bot")
    {
        return Some(ErrorKind::AuthRequired);
    }
    if has("max-filesize") || has("larger than") || has("does not pass filter") {
        return Some(ErrorKind::SizeLimitExceeded);
    }
    if has_word(&lower, "404")
        || has("video unavailable")
        || has("private video")
        || has("has been removed")
        || has("video not found")
    {
        return Some(ErrorKind::NotFound);
    }
    if has("timed out") {
        return Some(ErrorKind::Timeout);
    }
    None
}

/// Whole-word match: "bot" hits "not a bot" but not "bottom" or "robot".
fn has_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}
