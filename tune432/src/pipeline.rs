use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::AbortOnDropHandle;
use tracing::{info, warn};

use crate::artwork::{self, ArtworkEmbedder, FfmpegArtworkEmbedder};
use crate::classify::{ErrorReport, Phase};
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::fetch::{
    self, FetchProfile, FetchRequest, FetchedAudio, SourceFetcher, SourceInfo, YtDlpFetcher,
};
use crate::job::{Job, JobId, Role, Stage};
use crate::store::{self, ArtifactId, ArtifactStore};
use crate::transcode::{FfmpegTranscoder, Transcoder};

/// Title used when the source reports none.
pub const UNKNOWN_TITLE: &str = "unknown";

/// Successful conversion.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub job_id: JobId,
    pub title: String,
    pub artifact: ArtifactId,
    pub duration: Option<f64>,
    pub artwork_embedded: bool,
}

/// Fetch, transcode, decorate and publish one source per call.
///
/// Cloning is cheap; every clone shares the same collaborators and store.
#[derive(Clone)]
pub struct ConversionPipeline {
    config: Arc<PipelineConfig>,
    store: ArtifactStore,
    fetcher: Arc<dyn SourceFetcher>,
    transcoder: Arc<dyn Transcoder>,
    embedder: Option<Arc<dyn ArtworkEmbedder>>,
    http: reqwest::Client,
}

impl ConversionPipeline {
    /// Pipeline with explicit fetch and transcode strategies and no artwork.
    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn SourceFetcher>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let store = ArtifactStore::new(config.resolve_root_dir());
        Self {
            config: Arc::new(config),
            store,
            fetcher,
            transcoder,
            embedder: None,
            http: reqwest::Client::new(),
        }
    }

    /// Pipeline backed by yt-dlp and ffmpeg.
    pub fn with_default_tools(config: PipelineConfig) -> Self {
        let fetcher = YtDlpFetcher::new().cookies_file(config.cookies_file.clone());
        let transcoder = FfmpegTranscoder::new(config.tuning);
        Self::new(config, Arc::new(fetcher), Arc::new(transcoder))
            .artwork_embedder(Some(Arc::new(FfmpegArtworkEmbedder::new())))
    }

    pub fn artwork_embedder(mut self, embedder: Option<Arc<dyn ArtworkEmbedder>>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run one source URL through the whole pipeline.
    ///
    /// Intermediate files are removed on every exit path, including when the
    /// returned future is dropped before completion.
    pub async fn convert(&self, url: &str) -> std::result::Result<Conversion, ErrorReport> {
        let mut job = Job::new(url);
        let _cleanup = JobFilesGuard::new(self.store.root(), job.id);
        info!(job = %job.id, %url, "conversion started");

        let result = self.run(&mut job).await;
        match &result {
            Ok(conversion) => info!(
                job = %job.id,
                title = %conversion.title,
                artwork = conversion.artwork_embedded,
                elapsed_ms = job.created_at.elapsed().unwrap_or_default().as_millis() as u64,
                "conversion ready"
            ),
            Err(report) => warn!(
                job = %job.id,
                stage = ?job.stage(),
                kind = %report.kind,
                artifacts = ?job.artifacts(),
                "conversion failed"
            ),
        }
        result
    }

    /// Resolve source metadata without downloading audio.
    pub async fn info(&self, url: &str) -> std::result::Result<SourceInfo, ErrorReport> {
        fetch::validate_url(url, &self.config.allowed_hosts)
            .map_err(|e| ErrorReport::from_error(Phase::Input, &e))?;

        let fetcher = Arc::clone(&self.fetcher);
        let url = url.trim().to_string();
        run_stage("probe", self.config.fetch_timeout, async move {
            fetcher.probe(&url).await
        })
        .await
        .map_err(|e| ErrorReport::from_error(Phase::Fetch, &e))
    }

    async fn run(&self, job: &mut Job) -> std::result::Result<Conversion, ErrorReport> {
        let url = fetch::validate_url(&job.source_url, &self.config.allowed_hosts)
            .map_err(|e| failed(job, Phase::Input, e))?;
        job.source_url = url.to_string();

        self.store
            .init()
            .await
            .map_err(|e| failed(job, Phase::Internal, e))?;

        // Fetch
        job.advance(Stage::Fetching)
            .map_err(|e| failed(job, Phase::Internal, e))?;
        let outcome = match self.fetch_with_fallback(job).await {
            Ok(fetched) => self.check_fetched(fetched).await,
            Err(e) => Err(e),
        };
        let fetched = outcome.map_err(|e| failed(job, Phase::Fetch, e))?;
        job.record_artifact(&fetched.path);
        let title = fetched
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNKNOWN_TITLE)
            .to_string();
        job.title = Some(title.clone());
        job.advance(Stage::Fetched)
            .map_err(|e| failed(job, Phase::Internal, e))?;

        // Transcode
        job.advance(Stage::Transcoding)
            .map_err(|e| failed(job, Phase::Internal, e))?;
        let staged = job.id.staging_path(self.store.root(), Role::Converted);
        let transcoded = self.transcode(&fetched.path, &staged).await;
        discard(&fetched.path).await;
        transcoded.map_err(|e| failed(job, Phase::Transcode, e))?;
        job.record_artifact(&staged);
        job.advance(Stage::Transcoded)
            .map_err(|e| failed(job, Phase::Internal, e))?;

        // Artwork
        let mut publish = staged;
        let mut artwork_embedded = false;
        if let (Some(thumbnail), Some(embedder), true) = (
            fetched.thumbnail.as_deref(),
            self.embedder.as_ref(),
            self.config.embed_artwork,
        ) {
            job.advance(Stage::ArtworkPending)
                .map_err(|e| failed(job, Phase::Internal, e))?;
            let embedded = self
                .embed_artwork(job.id, Arc::clone(embedder), &publish, thumbnail, &title)
                .await;
            let outcome = match embedded {
                Ok(embedded) => {
                    discard(&publish).await;
                    publish = embedded;
                    artwork_embedded = true;
                    job.advance(Stage::ArtworkDone)
                }
                Err(e) => {
                    let report = ErrorReport::from_error(Phase::Artwork, &e);
                    warn!(job = %job.id, kind = %report.kind, "continuing without artwork");
                    job.advance(Stage::ArtworkSkipped)
                }
            };
            outcome.map_err(|e| failed(job, Phase::Internal, e))?;
        }

        // Publish
        let artifact = self
            .store
            .register(job.id, Role::Converted, &publish)
            .await
            .map_err(|e| failed(job, Phase::Internal, e))?;
        job.advance(Stage::Ready)
            .map_err(|e| failed(job, Phase::Internal, e))?;

        Ok(Conversion {
            job_id: job.id,
            title,
            artifact,
            duration: fetched.duration,
            artwork_embedded,
        })
    }

    async fn fetch_with_fallback(&self, job: &Job) -> Result<FetchedAudio> {
        match self.fetch_attempt(job, FetchProfile::Full, "_original").await {
            Err(Error::Timeout { after, .. }) if self.config.fetch_fallback => {
                warn!(
                    job = %job.id,
                    after_secs = after.as_secs_f64(),
                    "fetch timed out, retrying once with reduced profile"
                );
                self.fetch_attempt(job, FetchProfile::Reduced, "_original_retry")
                    .await
            }
            other => other,
        }
    }

    async fn fetch_attempt(
        &self,
        job: &Job,
        profile: FetchProfile,
        suffix: &str,
    ) -> Result<FetchedAudio> {
        // Each attempt writes under its own stem so a killed attempt can never
        // clobber the file of the next one.
        let request = FetchRequest {
            url: job.source_url.clone(),
            output_stem: self.store.root().join(format!("{}{suffix}", job.id)),
            profile,
            max_filesize: self.config.max_filesize,
            max_duration: self.config.max_duration,
        };
        let fetcher = Arc::clone(&self.fetcher);
        run_stage("fetch", self.config.fetch_timeout, async move {
            fetcher.fetch(request).await
        })
        .await
    }

    async fn check_fetched(&self, fetched: FetchedAudio) -> Result<FetchedAudio> {
        fetch::validate_path_in_dir(&fetched.path, self.store.root())?;

        let size = tokio::fs::metadata(&fetched.path)
            .await
            .map_err(|_| Error::MissingOutput {
                path: fetched.path.clone(),
            })?
            .len();
        if size == 0 {
            return Err(Error::MissingOutput { path: fetched.path });
        }
        if let Some(limit) = self.config.max_filesize {
            if size > limit {
                return Err(Error::SizeLimit(format!(
                    "fetched {size} bytes, limit is {limit}"
                )));
            }
        }
        if let (Some(limit), Some(duration)) = (self.config.max_duration, fetched.duration) {
            if duration > limit.as_secs_f64() {
                return Err(Error::SizeLimit(format!(
                    "source is {duration:.0}s long, limit is {}s",
                    limit.as_secs()
                )));
            }
        }
        Ok(fetched)
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        let transcoder = Arc::clone(&self.transcoder);
        let (input_owned, output_owned) = (input.to_path_buf(), output.to_path_buf());
        run_stage("transcode", self.config.transcode_timeout, async move {
            transcoder.transcode(&input_owned, &output_owned).await
        })
        .await?;

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(Error::MissingOutput {
                path: output.to_path_buf(),
            }),
        }
    }

    /// Download the cover and embed it into a new staging file. Returns the
    /// path of that file.
    async fn embed_artwork(
        &self,
        job: JobId,
        embedder: Arc<dyn ArtworkEmbedder>,
        audio: &Path,
        thumbnail: &str,
        title: &str,
    ) -> Result<PathBuf> {
        let root = self.store.root();
        let image = job.artifact_path(root, Role::Artwork);
        let output = root.join(format!("{}.embed.part", Role::Converted.file_name(&job)));

        let http = self.http.clone();
        let audio = audio.to_path_buf();
        let thumbnail = thumbnail.to_string();
        let title = (title != UNKNOWN_TITLE).then(|| title.to_string());
        let (image_task, output_task) = (image.clone(), output.clone());

        let result = run_stage("artwork", self.config.artwork_timeout, async move {
            artwork::download_image(&http, &thumbnail, &image_task).await?;
            embedder
                .embed(&audio, &image_task, title.as_deref(), &output_task)
                .await
        })
        .await;
        discard(&image).await;
        if let Err(e) = result {
            discard(&output).await;
            return Err(e);
        }

        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.len() > 0 => Ok(output),
            _ => Err(Error::Artwork("embedder produced no output".into())),
        }
    }
}

/// Record a stage failure on the job and turn it into the caller's report.
fn failed(job: &mut Job, phase: Phase, err: Error) -> ErrorReport {
    let report = ErrorReport::from_error(phase, &err);
    job.fail(report.kind);
    report
}

/// Run a collaborator call as its own task under a wall-clock budget.
///
/// On expiry the task is aborted rather than awaited, which drops whatever it
/// was doing (killing child processes spawned with `kill_on_drop`). Dropping
/// the returned future aborts the task the same way.
pub(crate) async fn run_stage<T, F>(stage: &'static str, budget: Duration, work: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = AbortOnDropHandle::new(tokio::spawn(work));
    match tokio::time::timeout(budget, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(Error::Worker(format!("{stage}: {join_error}"))),
        Err(_) => Err(Error::Timeout {
            stage,
            after: budget,
        }),
    }
}

/// Best-effort removal of an intermediate file.
async fn discard(path: &Path) {
    if let Err(e) = store::remove_if_present(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove intermediate file");
    }
}

/// RAII guard that removes a job's intermediate files when dropped.
///
/// Everything under the root that starts with the job id is removed except
/// the published converted artifact.
struct JobFilesGuard {
    root: PathBuf,
    prefix: String,
    keep: String,
}

impl JobFilesGuard {
    fn new(root: &Path, job: JobId) -> Self {
        Self {
            root: root.to_path_buf(),
            prefix: format!("{job}_"),
            keep: Role::Converted.file_name(&job),
        }
    }
}

impl Drop for JobFilesGuard {
    fn drop(&mut self) {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&self.prefix) || name == self.keep || name.contains(".claimed-") {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => tracing::debug!(file = %name, "removed intermediate file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = %name, error = %e, "failed to clean up intermediate file"),
            }
        }
    }
}
