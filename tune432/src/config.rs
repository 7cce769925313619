use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Hosts accepted as conversion sources when none are configured.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &["youtube.com", "youtu.be"];

/// Reference pitch the source material is assumed to be tuned to.
pub const SOURCE_REFERENCE_HZ: u32 = 440;

/// Reference pitch of the converted output.
pub const TARGET_REFERENCE_HZ: u32 = 432;

/// How the 440 Hz to 432 Hz retune is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tuning {
    /// Play the samples back at 432/440 of the rate. Pitch and tempo drop
    /// together, no time-stretch artifacts.
    #[default]
    Resample,
    /// Lower the pitch by the same ratio while keeping the original tempo.
    PitchShift,
}

impl Tuning {
    pub fn name(&self) -> &'static str {
        match self {
            Tuning::Resample => "resample",
            Tuning::PitchShift => "pitch-shift",
        }
    }

    /// Parse from string (e.g. CLI argument).
    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "resample" => Some(Tuning::Resample),
            "pitch-shift" | "pitch" => Some(Tuning::PitchShift),
            _ => None,
        }
    }

    /// Frequency ratio applied to the audio.
    pub fn ratio() -> f64 {
        TARGET_REFERENCE_HZ as f64 / SOURCE_REFERENCE_HZ as f64
    }
}

impl fmt::Display for Tuning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a served download removes its artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadPolicy {
    /// Leave the artifact for repeat access; the retention sweep reclaims it.
    #[default]
    Retain,
    /// Delete the artifact once the download has been streamed.
    Consume,
}

impl DownloadPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            DownloadPolicy::Retain => "retain",
            DownloadPolicy::Consume => "consume",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "retain" => Some(DownloadPolicy::Retain),
            "consume" => Some(DownloadPolicy::Consume),
            _ => None,
        }
    }
}

impl fmt::Display for DownloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the conversion pipeline needs to know about its deployment.
///
/// Passed into [`crate::ConversionPipeline::new`]; nothing is read from the
/// environment behind its back.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory holding every artifact. Defaults to the user cache dir.
    pub root_dir: Option<PathBuf>,
    /// Wall-clock budget for one fetch attempt.
    pub fetch_timeout: Duration,
    /// Wall-clock budget for the transcode stage.
    pub transcode_timeout: Duration,
    /// Wall-clock budget for downloading and embedding cover art.
    pub artwork_timeout: Duration,
    /// Age at which the retention sweep removes artifacts.
    pub retention: Duration,
    /// Source hosts accepted for conversion; subdomains are accepted too.
    pub allowed_hosts: Vec<String>,
    /// Largest raw download accepted, in bytes.
    pub max_filesize: Option<u64>,
    /// Longest source accepted.
    pub max_duration: Option<Duration>,
    /// Cookies file handed to the extractor as-is.
    pub cookies_file: Option<PathBuf>,
    /// Retry once with the reduced fetch profile after a primary timeout.
    pub fetch_fallback: bool,
    /// Embed the source thumbnail as cover art when one is reported.
    pub embed_artwork: bool,
    pub tuning: Tuning,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            fetch_timeout: Duration::from_secs(25),
            transcode_timeout: Duration::from_secs(120),
            artwork_timeout: Duration::from_secs(15),
            retention: Duration::from_secs(3600),
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
            max_filesize: Some(200 * 1024 * 1024),
            max_duration: None,
            cookies_file: None,
            fetch_fallback: true,
            embed_artwork: true,
            tuning: Tuning::default(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_dir(mut self, dir: PathBuf) -> Self {
        self.root_dir = Some(dir);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn transcode_timeout(mut self, timeout: Duration) -> Self {
        self.transcode_timeout = timeout;
        self
    }

    pub fn artwork_timeout(mut self, timeout: Duration) -> Self {
        self.artwork_timeout = timeout;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Replace the allowed source hosts. Rejects an empty list, which would
    /// make every conversion fail.
    pub fn allowed_hosts<I, S>(mut self, hosts: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts: Vec<String> = hosts
            .into_iter()
            .map(|h| h.into().trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .collect();
        if hosts.is_empty() {
            return Err(Error::InvalidUrl("allowed host list is empty".into()));
        }
        self.allowed_hosts = hosts;
        Ok(self)
    }

    pub fn max_filesize(mut self, bytes: Option<u64>) -> Self {
        self.max_filesize = bytes;
        self
    }

    pub fn max_duration(mut self, duration: Option<Duration>) -> Self {
        self.max_duration = duration;
        self
    }

    pub fn cookies_file(mut self, path: PathBuf) -> Self {
        self.cookies_file = Some(path);
        self
    }

    pub fn fetch_fallback(mut self, enabled: bool) -> Self {
        self.fetch_fallback = enabled;
        self
    }

    pub fn embed_artwork(mut self, enabled: bool) -> Self {
        self.embed_artwork = enabled;
        self
    }

    pub fn tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Resolve the artifact root, defaulting to ~/.cache/tune432/artifacts.
    pub fn resolve_root_dir(&self) -> PathBuf {
        self.root_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".cache"))
                .join("tune432")
                .join("artifacts")
        })
    }
}
