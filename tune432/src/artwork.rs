use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::process;

/// Largest cover image accepted.
const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Anything smaller is an error page or a placeholder, not a cover.
const MIN_IMAGE_BYTES: u64 = 100;

/// Embeds a cover image into a finished audio file.
///
/// Writes a new file at `output`; `audio` is left untouched.
#[async_trait]
pub trait ArtworkEmbedder: Send + Sync {
    async fn embed(
        &self,
        audio: &Path,
        image: &Path,
        title: Option<&str>,
        output: &Path,
    ) -> Result<()>;
}

/// Embeds cover art with ffmpeg as an ID3v2 attached picture.
#[derive(Debug, Clone)]
pub struct FfmpegArtworkEmbedder {
    program: PathBuf,
}

impl Default for FfmpegArtworkEmbedder {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }
}

impl FfmpegArtworkEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn program(mut self, program: PathBuf) -> Self {
        self.program = program;
        self
    }

    fn command(&self, audio: &Path, image: &Path, title: Option<&str>, output: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(["-nostdin", "-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(audio)
            .arg("-i")
            .arg(image)
            .args([
                "-map",
                "0:a",
                "-map",
                "1:v:0",
                "-c:a",
                "copy",
                "-c:v",
                "mjpeg",
                "-id3v2_version",
                "3",
                "-metadata:s:v",
                "title=Album cover",
                "-metadata:s:v",
                "comment=Cover (front)",
                "-disposition:v:0",
                "attached_pic",
            ]);
        if let Some(title) = title {
            command.arg("-metadata").arg(format!("title={title}"));
        }
        command.args(["-f", "mp3"]).arg(output);
        command
    }
}

#[async_trait]
impl ArtworkEmbedder for FfmpegArtworkEmbedder {
    async fn embed(
        &self,
        audio: &Path,
        image: &Path,
        title: Option<&str>,
        output: &Path,
    ) -> Result<()> {
        let result = process::run("ffmpeg", self.command(audio, image, title, output)).await?;
        if !result.status.success() {
            return Err(Error::Artwork(format!(
                "ffmpeg failed: {}",
                process::stderr_excerpt(&result)
            )));
        }
        debug!(output = %output.display(), "artwork embedded");
        Ok(())
    }
}

/// Download a cover image to `dest`. Returns the number of bytes written.
pub async fn download_image(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64> {
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(Error::Artwork(format!("unsupported artwork URL: {url}")));
    }

    info!(%url, "downloading artwork");
    let response = client.get(url).send().await?.error_for_status()?;

    if response
        .content_length()
        .is_some_and(|len| len > MAX_IMAGE_BYTES)
    {
        return Err(Error::Artwork("artwork larger than the size limit".into()));
    }

    // Write to a temp file first, then rename
    let tmp_path = dest.with_extension("jpg.part");
    let mut file = tokio::fs::File::create(&tmp_path).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                tokio::fs::remove_file(&tmp_path).await.ok();
                return Err(e.into());
            }
        };
        downloaded += chunk.len() as u64;
        if downloaded > MAX_IMAGE_BYTES {
            drop(file);
            tokio::fs::remove_file(&tmp_path).await.ok();
            return Err(Error::Artwork("artwork larger than the size limit".into()));
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    drop(file);

    if downloaded < MIN_IMAGE_BYTES {
        tokio::fs::remove_file(&tmp_path).await.ok();
        warn!(size = downloaded, "artwork too small, ignoring");
        return Err(Error::Artwork(format!(
            "downloaded artwork too small ({downloaded} bytes)"
        )));
    }

    tokio::fs::rename(&tmp_path, dest).await?;
    debug!(path = %dest.display(), size = downloaded, "artwork saved");
    Ok(downloaded)
}
