use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Error, Result};

/// Longest slice of tool stderr kept in an error.
const STDERR_LIMIT: usize = 1000;

/// Run an external tool to completion and collect its output.
///
/// The child is killed if the returned future is dropped, which is how a
/// stage timeout or an abandoned request stops the tool instead of leaving it
/// running in the background.
pub(crate) async fn run(program: &'static str, mut command: Command) -> Result<Output> {
    command.kill_on_drop(true).stdin(std::process::Stdio::null());
    debug!(program, "spawning");

    command.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ToolNotFound(program)
        } else {
            Error::Io(e)
        }
    })
}

/// Stderr of a finished tool, truncated so huge logs never end up in errors.
pub(crate) fn stderr_excerpt(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.chars().count() <= STDERR_LIMIT {
        return trimmed.to_string();
    }
    // The last lines carry the actual error for both yt-dlp and ffmpeg.
    let skip = trimmed.chars().count() - STDERR_LIMIT;
    trimmed.chars().skip(skip).collect()
}
