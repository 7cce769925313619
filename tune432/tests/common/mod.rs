//! Stub collaborators shared by the pipeline tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tune432::{
    ArtworkEmbedder, ConversionPipeline, Error, FetchProfile, FetchRequest, FetchedAudio,
    PipelineConfig, Result, SourceFetcher, SourceInfo, Transcoder,
};

pub const TEST_URL: &str = "https://video.example/watch?v=abc";

/// What a [`StubFetcher`] does when asked to fetch.
#[derive(Clone)]
pub enum Fetch {
    /// Write a synthetic WAV of this many seconds.
    Audio { seconds: u32 },
    /// Fail with the error built by this function.
    Fail(fn() -> Error),
    /// Never finish.
    Hang,
    /// Never finish on the full profile; write audio on the reduced one.
    HangUnlessReduced { seconds: u32 },
}

pub struct StubFetcher {
    pub behavior: Fetch,
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub profiles: Mutex<Vec<FetchProfile>>,
    /// Set once an attempt's future has been dropped before finishing.
    pub dropped: Arc<AtomicUsize>,
}

impl StubFetcher {
    pub fn new(behavior: Fetch) -> Self {
        Self {
            behavior,
            title: Some("Test Song".into()),
            thumbnail: None,
            profiles: Mutex::new(Vec::new()),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn title(mut self, title: Option<&str>) -> Self {
        self.title = title.map(str::to_string);
        self
    }

    pub fn thumbnail(mut self, url: &str) -> Self {
        self.thumbnail = Some(url.to_string());
        self
    }

    pub fn profiles(&self) -> Vec<FetchProfile> {
        self.profiles.lock().unwrap().clone()
    }
}

/// Counts drops of an unfinished attempt.
struct DropProbe(Arc<AtomicUsize>);

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SourceFetcher for StubFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchedAudio> {
        self.profiles.lock().unwrap().push(request.profile);

        let seconds = match (&self.behavior, request.profile) {
            (Fetch::Audio { seconds }, _) => *seconds,
            (Fetch::HangUnlessReduced { seconds }, FetchProfile::Reduced) => *seconds,
            (Fetch::Fail(make), _) => return Err(make()),
            (Fetch::Hang, _) | (Fetch::HangUnlessReduced { .. }, FetchProfile::Full) => {
                let probe = DropProbe(Arc::clone(&self.dropped));
                tokio::time::sleep(Duration::from_secs(3600)).await;
                std::mem::forget(probe);
                return Err(Error::Download("woke up".into()));
            }
        };

        let path = request.output_stem.with_extension("wav");
        write_wav(&path, seconds);
        Ok(FetchedAudio {
            path,
            title: self.title.clone(),
            thumbnail: self.thumbnail.clone(),
            duration: Some(seconds as f64),
        })
    }

    async fn probe(&self, _url: &str) -> Result<SourceInfo> {
        match &self.behavior {
            Fetch::Fail(make) => Err(make()),
            _ => Ok(SourceInfo {
                title: self.title.clone(),
                duration: Some(5.0),
                thumbnail: self.thumbnail.clone(),
                uploader: None,
            }),
        }
    }
}

/// Write a mono 8 kHz sine at 440 Hz.
pub fn write_wav(path: &Path, seconds: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for n in 0..(8000 * seconds) {
        let t = n as f32 / 8000.0;
        let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 0.5;
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Transcoder that copies its input unchanged.
pub struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

pub struct FailingTranscoder;

#[async_trait]
impl Transcoder for FailingTranscoder {
    async fn transcode(&self, _input: &Path, _output: &Path) -> Result<()> {
        Err(Error::Transcode("Invalid data found when processing input".into()))
    }
}

/// Transcoder that "succeeds" without writing anything useful.
pub struct EmptyTranscoder;

#[async_trait]
impl Transcoder for EmptyTranscoder {
    async fn transcode(&self, _input: &Path, output: &Path) -> Result<()> {
        tokio::fs::write(output, b"").await?;
        Ok(())
    }
}

pub struct SlowTranscoder;

#[async_trait]
impl Transcoder for SlowTranscoder {
    async fn transcode(&self, _input: &Path, _output: &Path) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Embedder that always fails.
/// Leaves a partial output behind, then fails.
pub struct FailingEmbedder;

#[async_trait]
impl ArtworkEmbedder for FailingEmbedder {
    async fn embed(
        &self,
        _audio: &Path,
        image: &Path,
        _title: Option<&str>,
        output: &Path,
    ) -> Result<()> {
        assert!(image.exists(), "embedder called without a downloaded image");
        tokio::fs::write(output, b"partial").await?;
        Err(Error::Artwork("cannot embed".into()))
    }
}

/// Serve `bytes` bytes of image data on a local port until the test ends.
/// Returns the image URL.
pub async fn serve_image(bytes: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\n\
                     Content-Length: {bytes}\r\nConnection: close\r\n\r\n"
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&vec![0xABu8; bytes]).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}/cover.jpg")
}

/// Client for talking to [`serve_image`] regardless of proxy settings.
pub fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

pub fn config(root: &Path) -> PipelineConfig {
    PipelineConfig::new()
        .root_dir(root.to_path_buf())
        .allowed_hosts(["video.example"])
        .unwrap()
        .fetch_timeout(Duration::from_secs(5))
        .transcode_timeout(Duration::from_secs(5))
        .artwork_timeout(Duration::from_secs(2))
        .fetch_fallback(false)
}

pub fn pipeline(
    config: PipelineConfig,
    fetcher: Arc<StubFetcher>,
    transcoder: Arc<dyn Transcoder>,
) -> ConversionPipeline {
    ConversionPipeline::new(config, fetcher, transcoder)
}

/// File names currently in `dir`.
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
        .unwrap_or_default();
    files.sort();
    files
}
