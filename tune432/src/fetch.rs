use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::process;

/// Longest source URL accepted.
const MAX_URL_LEN: usize = 2048;

/// Feature set used for one fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchProfile {
    /// Best audio, full post-processing.
    Full,
    /// Lower quality and no extractor retries, for a last attempt after the
    /// full profile ran out of time.
    Reduced,
}

/// Everything a fetcher needs for one attempt.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    /// Output path without extension; the fetcher picks the extension.
    pub output_stem: PathBuf,
    pub profile: FetchProfile,
    pub max_filesize: Option<u64>,
    pub max_duration: Option<Duration>,
}

/// Raw audio written by a fetcher.
#[derive(Debug, Clone)]
pub struct FetchedAudio {
    pub path: PathBuf,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
}

/// Metadata about a source, resolved without downloading audio.
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub uploader: Option<String>,
}

/// Retrieves raw audio for a source URL.
///
/// Implementations must write only at `output_stem` plus an extension, and
/// must stop their work when the returned future is dropped.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchedAudio>;

    async fn probe(&self, url: &str) -> Result<SourceInfo>;
}

/// Check a source URL against the host allow-list before anything touches
/// the network.
pub fn validate_url(url: &str, allowed_hosts: &[String]) -> Result<Url> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidUrl("no URL provided".into()));
    }
    if trimmed.len() > MAX_URL_LEN {
        return Err(Error::InvalidUrl(format!(
            "URL longer than {MAX_URL_LEN} characters"
        )));
    }

    let parsed =
        Url::parse(trimmed).map_err(|e| Error::InvalidUrl(format!("{trimmed}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl(format!(
            "unsupported scheme (must be http or https): {}",
            parsed.scheme()
        )));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(Error::InvalidUrl("credentials in URL are not accepted".into()));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidUrl(format!("missing host: {trimmed}")))?
        .to_ascii_lowercase();
    let allowed = allowed_hosts
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")));
    if !allowed {
        return Err(Error::InvalidUrl(format!("host not allowed: {host}")));
    }

    Ok(parsed)
}

/// Fetches audio by running yt-dlp.
///
/// # Security
/// - Arguments are passed via `.arg()` (no shell expansion)
/// - `--no-exec` prevents yt-dlp from running post-processing commands
/// - The reported file path is checked to be inside the output directory
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: PathBuf,
    cookies_file: Option<PathBuf>,
    socket_timeout: Duration,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            cookies_file: None,
            socket_timeout: Duration::from_secs(10),
        }
    }
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program(mut self, program: PathBuf) -> Self {
        self.program = program;
        self
    }

    pub fn cookies_file(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_file = path;
        self
    }

    pub fn socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["--no-playlist", "--no-exec", "--no-warnings", "--socket-timeout"])
            .arg(self.socket_timeout.as_secs().max(1).to_string());
        if let Some(cookies) = &self.cookies_file {
            command.arg("--cookies").arg(cookies);
        }
        command
    }

    fn download_command(&self, request: &FetchRequest) -> Result<Command> {
        let output_template = format!(
            "{}.%(ext)s",
            request.output_stem.to_str().ok_or_else(|| {
                Error::Download("output path contains invalid UTF-8".into())
            })?
        );

        let (format, quality) = match request.profile {
            FetchProfile::Full => ("bestaudio/best", "192K"),
            FetchProfile::Reduced => ("bestaudio[abr<=128]/bestaudio/best", "128K"),
        };

        let mut command = self.command();
        command
            .args([
                "--format",
                format,
                "--extract-audio",
                "--audio-format",
                "mp3",
                "--audio-quality",
                quality,
                "--no-progress",
                "--output",
                output_template.as_str(),
                "--print",
                "after_move:%(.{title,thumbnail,duration,filepath})j",
            ]);
        if request.profile == FetchProfile::Reduced {
            command.args(["--extractor-retries", "0"]);
        }
        if let Some(bytes) = request.max_filesize {
            command.arg("--max-filesize").arg(bytes.to_string());
        }
        if let Some(limit) = request.max_duration {
            command
                .arg("--match-filter")
                .arg(format!("duration <= {}", limit.as_secs()));
        }
        command.arg(&request.url);
        Ok(command)
    }
}

#[derive(Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    uploader: Option<String>,
}

#[derive(Deserialize)]
struct YtDlpPrinted {
    title: Option<String>,
    thumbnail: Option<String>,
    duration: Option<f64>,
    filepath: Option<String>,
}

#[async_trait]
impl SourceFetcher for YtDlpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchedAudio> {
        info!(url = %request.url, profile = ?request.profile, "downloading audio");

        let output_dir = request
            .output_stem
            .parent()
            .ok_or_else(|| Error::Download("output path has no parent directory".into()))?
            .to_path_buf();
        tokio::fs::create_dir_all(&output_dir).await?;

        let output = process::run("yt-dlp", self.download_command(&request)?).await?;
        let stderr = process::stderr_excerpt(&output);

        if !output.status.success() {
            return Err(Error::Download(format!("yt-dlp failed: {stderr}")));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some(line) = stdout.lines().rev().find(|l| !l.trim().is_empty()) else {
            // yt-dlp exits 0 when --max-filesize or --match-filter skip the
            // video, and --print silences the notice saying so.
            if request.max_filesize.is_some() || request.max_duration.is_some() {
                return Err(Error::SizeLimit(
                    "yt-dlp skipped the source as over the size or duration limit".into(),
                ));
            }
            return Err(Error::Download(format!("yt-dlp produced no file: {stderr}")));
        };

        let printed: YtDlpPrinted = serde_json::from_str(line.trim())?;
        let audio_path = match printed.filepath.filter(|p| !p.is_empty()) {
            Some(p) => {
                let candidate = PathBuf::from(p);
                validate_path_in_dir(&candidate, &output_dir)?;
                candidate
            }
            None => find_audio_file(&request.output_stem)?,
        };

        if !audio_path.exists() {
            return Err(Error::MissingOutput { path: audio_path });
        }

        debug!(path = %audio_path.display(), "audio downloaded");

        Ok(FetchedAudio {
            path: audio_path,
            title: printed.title,
            thumbnail: printed.thumbnail,
            duration: printed.duration,
        })
    }

    async fn probe(&self, url: &str) -> Result<SourceInfo> {
        let mut command = self.command();
        command.args(["--dump-json", "--no-download"]).arg(url);

        let output = process::run("yt-dlp", command).await?;
        if !output.status.success() {
            return Err(Error::Download(format!(
                "yt-dlp metadata lookup failed: {}",
                process::stderr_excerpt(&output)
            )));
        }

        let info: YtDlpInfo = serde_json::from_slice(&output.stdout)?;
        Ok(SourceInfo {
            title: info.title,
            duration: info.duration,
            thumbnail: info.thumbnail,
            uploader: info.uploader,
        })
    }
}

/// Normalize a path by resolving `.` and `..` components without touching the filesystem.
fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir => {}
            other => parts.push(other),
        }
    }
    parts.iter().collect()
}

/// Validate that a path is inside the expected directory (prevents path traversal).
pub(crate) fn validate_path_in_dir(path: &Path, expected_dir: &Path) -> Result<()> {
    let canonical_dir = expected_dir
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(expected_dir));
    let canonical_path = path
        .canonicalize()
        .unwrap_or_else(|_| normalize_path(path));

    if canonical_path.starts_with(&canonical_dir) {
        Ok(())
    } else {
        warn!(
            path = %path.display(),
            expected_dir = %expected_dir.display(),
            "fetched file path outside expected directory"
        );
        Err(Error::OutsideRoot {
            path: path.to_path_buf(),
        })
    }
}

/// Find the audio file yt-dlp wrote for `stem`, whatever extension it chose.
fn find_audio_file(stem: &Path) -> Result<PathBuf> {
    let dir = stem
        .parent()
        .ok_or_else(|| Error::Download("output path has no parent directory".into()))?;
    let prefix = stem
        .file_name()
        .map(|f| format!("{}.", f.to_string_lossy()))
        .unwrap_or_default();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !name.starts_with(&prefix) {
            continue;
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if matches!(ext, "mp3" | "m4a" | "opus" | "ogg" | "webm" | "wav" | "flac") {
                return Ok(path);
            }
        }
    }

    Err(Error::Download("no audio file found after download".into()))
}
