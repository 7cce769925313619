//! Video URL in, 432 Hz retuned MP3 out.
//!
//! **tune432** runs the full pipeline: fetching audio (via yt-dlp), retuning
//! it from a 440 Hz to a 432 Hz reference (via ffmpeg), embedding cover art,
//! and keeping the resulting files addressable by job id until they are
//! downloaded, released, or swept.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use tune432::{ConversionPipeline, PipelineConfig};
//!
//! let pipeline = ConversionPipeline::with_default_tools(PipelineConfig::default());
//! let conversion = pipeline.convert("https://www.youtube.com/watch?v=abc").await?;
//! let artifact = pipeline.store().locate(conversion.artifact).await?;
//! println!("{} -> {}", conversion.title, artifact.path.display());
//! # Ok(())
//! # }
//! ```
//!
//! The fetch, transcode and artwork steps are traits ([`SourceFetcher`],
//! [`Transcoder`], [`ArtworkEmbedder`]); swap any of them without touching
//! the pipeline.

pub mod artwork;
pub mod classify;
pub mod config;
pub mod error;
pub mod fetch;
pub mod job;
pub mod pipeline;
pub(crate) mod process;
pub mod store;
pub mod transcode;

pub use artwork::{ArtworkEmbedder, FfmpegArtworkEmbedder};
pub use classify::{ErrorKind, ErrorReport};
pub use config::{DownloadPolicy, PipelineConfig, Tuning};
pub use error::{Error, Result};
pub use fetch::{FetchProfile, FetchRequest, FetchedAudio, SourceFetcher, SourceInfo, YtDlpFetcher};
pub use job::{JobId, Role, Stage};
pub use pipeline::{Conversion, ConversionPipeline};
pub use store::{Artifact, ArtifactId, ArtifactReader, ArtifactStore, ConsumedArtifact, SweepReport};
pub use transcode::{FfmpegTranscoder, Transcoder};
