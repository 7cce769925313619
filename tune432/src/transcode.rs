use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::Tuning;
use crate::error::{Error, Result};
use crate::process;

/// Sample rate of the converted output.
pub const OUTPUT_SAMPLE_RATE: u32 = 44_100;

/// MP3 bitrate of the converted output, in kbit/s.
pub const OUTPUT_BITRATE_KBPS: u32 = 192;

/// Applies the fixed 440 Hz to 432 Hz transform.
///
/// `output` is a fresh path; implementations never modify `input`.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Transcodes by running ffmpeg.
///
/// ffmpeg handles decoding, the rate change and MP3 encoding in one shot, so any
/// format yt-dlp hands over (mp3, m4a, opus, webm, ...) is accepted.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    tuning: Tuning,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            tuning: Tuning::default(),
        }
    }
}

impl FfmpegTranscoder {
    pub fn new(tuning: Tuning) -> Self {
        Self {
            tuning,
            ..Self::default()
        }
    }

    pub fn program(mut self, program: PathBuf) -> Self {
        self.program = program;
        self
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(input)
            .args(["-vn", "-af"])
            .arg(filter_chain(self.tuning))
            .args(["-codec:a", "libmp3lame", "-b:a"])
            .arg(format!("{OUTPUT_BITRATE_KBPS}k"))
            .args(["-f", "mp3"])
            .arg(output);
        command
    }
}

/// ffmpeg audio filter chain for `tuning`.
///
/// Input is first brought to a known rate so the retuned rate is a constant,
/// then played back slower and resampled to the output rate.
fn filter_chain(tuning: Tuning) -> String {
    let ratio = Tuning::ratio();
    let retuned_rate = (OUTPUT_SAMPLE_RATE as f64 * ratio).round() as u32;
    let mut chain = format!(
        "aresample={OUTPUT_SAMPLE_RATE},asetrate={retuned_rate},aresample={OUTPUT_SAMPLE_RATE}"
    );
    if tuning == Tuning::PitchShift {
        chain.push_str(&format!(",atempo={:.6}", 1.0 / ratio));
    }
    chain
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        info!(input = %input.display(), tuning = %self.tuning, "transcoding to 432 Hz");

        if !input.exists() {
            return Err(Error::Transcode(format!(
                "input not found: {}",
                input.display()
            )));
        }

        let result = process::run("ffmpeg", self.command(input, output)).await?;
        if !result.status.success() {
            return Err(Error::Transcode(format!(
                "ffmpeg failed: {}",
                process::stderr_excerpt(&result)
            )));
        }

        debug!(output = %output.display(), "transcode finished");
        Ok(())
    }
}
