#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use tower::util::ServiceExt;
use tune432::{
    ArtworkEmbedder, ConversionPipeline, DownloadPolicy, Error, FetchRequest, FetchedAudio,
    PipelineConfig, Result, SourceFetcher, SourceInfo, Transcoder,
};
use tune432_server::{build_router, AppState, ServerConfig};

pub const PUBLIC_URL: &str = "http://tune.test";
pub const SOURCE_URL: &str = "https://video.example/watch?v=abc";

/// Fetcher returning "Test Song" and a short synthetic WAV, or a fixed error.
pub struct StubFetcher {
    pub fail_with: Option<fn() -> Error>,
    pub thumbnail: Option<String>,
}

impl StubFetcher {
    pub fn ok() -> Self {
        Self {
            fail_with: None,
            thumbnail: None,
        }
    }

    pub fn failing(make: fn() -> Error) -> Self {
        Self {
            fail_with: Some(make),
            thumbnail: None,
        }
    }
}

#[async_trait]
impl SourceFetcher for StubFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchedAudio> {
        if let Some(make) = self.fail_with {
            return Err(make());
        }
        let path = request.output_stem.with_extension("wav");
        write_wav(&path, 5);
        Ok(FetchedAudio {
            path,
            title: Some("Test Song".into()),
            thumbnail: self.thumbnail.clone(),
            duration: Some(5.0),
        })
    }

    async fn probe(&self, _url: &str) -> Result<SourceInfo> {
        if let Some(make) = self.fail_with {
            return Err(make());
        }
        Ok(SourceInfo {
            title: Some("Test Song".into()),
            duration: Some(5.0),
            thumbnail: None,
            uploader: Some("Tester".into()),
        })
    }
}

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

pub struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        tokio::fs::copy(input, output).await?;
        Ok(())
    }
}

/// Embedder that writes the audio followed by the image bytes.
pub struct ConcatEmbedder;

#[async_trait]
impl ArtworkEmbedder for ConcatEmbedder {
    async fn embed(
        &self,
        audio: &Path,
        image: &Path,
        _title: Option<&str>,
        output: &Path,
    ) -> Result<()> {
        let mut bytes = tokio::fs::read(audio).await?;
        bytes.extend(tokio::fs::read(image).await?);
        tokio::fs::write(output, bytes).await?;
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub root: tempfile::TempDir,
}

pub fn app(fetcher: StubFetcher, policy: DownloadPolicy) -> TestApp {
    app_with(fetcher, policy, None)
}

pub fn app_with(
    fetcher: StubFetcher,
    policy: DownloadPolicy,
    embedder: Option<Arc<dyn ArtworkEmbedder>>,
) -> TestApp {
    let root = tempfile::tempdir().unwrap();
    let config = PipelineConfig::new()
        .root_dir(root.path().to_path_buf())
        .allowed_hosts(["video.example"])
        .unwrap()
        .fetch_timeout(Duration::from_secs(5))
        .transcode_timeout(Duration::from_secs(5))
        .artwork_timeout(Duration::from_secs(5));
    let pipeline = ConversionPipeline::new(config, Arc::new(fetcher), Arc::new(CopyTranscoder))
        .artwork_embedder(embedder)
        .http_client(reqwest::Client::builder().no_proxy().build().unwrap());
    let server = ServerConfig::new()
        .public_url(Some(PUBLIC_URL.into()))
        .download_policy(policy);

    TestApp {
        router: build_router(AppState::new(pipeline, server)),
        root,
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn convert_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/convert")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// Path and query of a URL returned by the service.
pub fn local_path(url: &str) -> &str {
    url.strip_prefix(PUBLIC_URL).unwrap()
}
