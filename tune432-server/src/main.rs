use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tune432::{ArtifactId, ConversionPipeline, DownloadPolicy, PipelineConfig, Role, Tuning};
use tune432_server::{build_router, sweeper, AppState, ServerConfig};

#[derive(Parser)]
#[command(
    name = "tune432",
    version,
    about = "Convert video audio to 432 Hz and serve the result"
)]
struct Cli {
    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct PipelineArgs {
    /// Directory holding every artifact (default: user cache dir).
    #[arg(long, global = true, env = "TUNE432_ROOT")]
    root: Option<PathBuf>,

    /// Fetch stage budget in seconds.
    #[arg(long, global = true, env = "TUNE432_FETCH_TIMEOUT", default_value = "25")]
    fetch_timeout: u64,

    /// Transcode stage budget in seconds.
    #[arg(long, global = true, env = "TUNE432_TRANSCODE_TIMEOUT", default_value = "120")]
    transcode_timeout: u64,

    /// Artwork stage budget in seconds.
    #[arg(long, global = true, default_value = "15")]
    artwork_timeout: u64,

    /// Age in seconds after which artifacts are swept.
    #[arg(long, global = true, env = "TUNE432_RETENTION", default_value = "3600")]
    retention: u64,

    /// Accepted source hosts, comma separated (subdomains included).
    #[arg(
        long,
        global = true,
        env = "TUNE432_ALLOWED_HOSTS",
        value_delimiter = ',',
        default_value = "youtube.com,youtu.be"
    )]
    allowed_hosts: Vec<String>,

    /// Largest download accepted, in megabytes (0 disables the limit).
    #[arg(long, global = true, default_value = "200")]
    max_filesize_mb: u64,

    /// Longest source accepted, in seconds.
    #[arg(long, global = true)]
    max_duration: Option<u64>,

    /// Cookies file handed to yt-dlp.
    #[arg(long, global = true, env = "TUNE432_COOKIES")]
    cookies: Option<PathBuf>,

    /// Disable the reduced-profile retry after a fetch timeout.
    #[arg(long, global = true)]
    no_fallback: bool,

    /// Skip cover art embedding.
    #[arg(long, global = true)]
    no_artwork: bool,

    /// How the retune is applied: "resample" or "pitch-shift".
    #[arg(long, global = true, default_value = "resample", value_parser = parse_tuning)]
    tuning: Tuning,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Listen address.
        #[arg(long, env = "TUNE432_BIND", default_value = tune432_server::config::DEFAULT_BIND)]
        bind: SocketAddr,

        /// Base URL used in returned links (default: request Host header).
        #[arg(long, env = "TUNE432_PUBLIC_URL")]
        public_url: Option<String>,

        /// Allowed CORS origin ("*" for any).
        #[arg(long, env = "TUNE432_ALLOWED_ORIGIN", default_value = "*")]
        allowed_origin: String,

        /// Whether downloads remove the file: "retain" or "consume".
        #[arg(
            long,
            env = "TUNE432_DOWNLOAD_POLICY",
            default_value = "retain",
            value_parser = parse_policy
        )]
        download_policy: DownloadPolicy,

        /// Seconds between retention sweeps.
        #[arg(long, default_value = "300")]
        sweep_interval: u64,
    },
    /// Convert one URL and write the MP3 to a file.
    Convert {
        url: String,

        /// Output file (default: "{title}_432hz.mp3" in the current directory).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print source metadata as JSON without downloading.
    Info { url: String },
    /// Run one retention sweep and exit.
    Sweep {
        /// Override the retention age, in seconds.
        #[arg(long)]
        max_age: Option<u64>,
    },
}

fn parse_tuning(s: &str) -> Result<Tuning, String> {
    Tuning::parse_name(s)
        .ok_or_else(|| format!("unknown tuning {s:?} (expected resample or pitch-shift)"))
}

fn parse_policy(s: &str) -> Result<DownloadPolicy, String> {
    DownloadPolicy::parse_name(s)
        .ok_or_else(|| format!("unknown download policy {s:?} (expected retain or consume)"))
}

/// Megabytes to bytes, with 0 meaning no limit.
fn max_filesize_bytes(mb: u64) -> anyhow::Result<Option<u64>> {
    if mb == 0 {
        return Ok(None);
    }
    match mb.checked_mul(1024 * 1024) {
        Some(bytes) => Ok(Some(bytes)),
        None => bail!("--max-filesize-mb {mb} is too large"),
    }
}

impl PipelineArgs {
    fn to_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = PipelineConfig::new()
            .fetch_timeout(Duration::from_secs(self.fetch_timeout))
            .transcode_timeout(Duration::from_secs(self.transcode_timeout))
            .artwork_timeout(Duration::from_secs(self.artwork_timeout))
            .retention(Duration::from_secs(self.retention))
            .allowed_hosts(&self.allowed_hosts)
            .context("invalid --allowed-hosts")?
            .max_filesize(max_filesize_bytes(self.max_filesize_mb)?)
            .max_duration(self.max_duration.map(Duration::from_secs))
            .fetch_fallback(!self.no_fallback)
            .embed_artwork(!self.no_artwork)
            .tuning(self.tuning);
        if let Some(root) = &self.root {
            config = config.root_dir(root.clone());
        }
        if let Some(cookies) = &self.cookies {
            config = config.cookies_file(cookies.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tune432=info,tune432_server=info,tower_http=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = cli.pipeline.to_config()?;
    let pipeline = ConversionPipeline::with_default_tools(config);

    match cli.command {
        Command::Serve {
            bind,
            public_url,
            allowed_origin,
            download_policy,
            sweep_interval,
        } => {
            let server = ServerConfig::new()
                .bind(bind)
                .public_url(public_url)
                .allowed_origin(&allowed_origin)
                .context("invalid --allowed-origin")?
                .download_policy(download_policy)
                .sweep_interval(Duration::from_secs(sweep_interval));
            serve(pipeline, server).await
        }
        Command::Convert { url, output } => convert(&pipeline, &url, output).await,
        Command::Info { url } => {
            let info = pipeline.info(&url).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        Command::Sweep { max_age } => {
            let max_age = max_age
                .map(Duration::from_secs)
                .unwrap_or(pipeline.config().retention);
            let report = pipeline.store().sweep(max_age).await?;
            eprintln!(
                "Swept {}: {} of {} files removed, {} freed",
                pipeline.store().root().display(),
                report.removed,
                report.scanned,
                format_bytes(report.bytes_freed)
            );
            Ok(())
        }
    }
}

async fn serve(pipeline: ConversionPipeline, server: ServerConfig) -> anyhow::Result<()> {
    pipeline
        .store()
        .init()
        .await
        .context("failed to create artifact root")?;
    info!(
        root = %pipeline.store().root().display(),
        tuning = %pipeline.config().tuning,
        policy = %server.download_policy,
        "artifact store ready"
    );

    let shutdown = CancellationToken::new();
    let sweeper = sweeper::spawn_sweeper(
        pipeline.store().clone(),
        pipeline.config().retention,
        server.sweep_interval,
        shutdown.clone(),
    );

    let addr = server.bind;
    let app = build_router(AppState::new(pipeline, server));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("server error")?;

    shutdown.cancel();
    sweeper.await.ok();
    info!("server shutdown complete");
    Ok(())
}

async fn convert(
    pipeline: &ConversionPipeline,
    url: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let conversion = pipeline.convert(url).await?;
    let artifact = pipeline
        .store()
        .locate(ArtifactId::new(conversion.job_id, Role::Converted))
        .await?;

    let output = output.unwrap_or_else(|| {
        PathBuf::from(format!("{}{}", safe_stem(&conversion.title), Role::Converted.suffix()))
    });
    if output.is_dir() {
        bail!("output {} is a directory", output.display());
    }

    let copied = tokio::fs::copy(&artifact.path, &output)
        .await
        .with_context(|| format!("failed to write {}", output.display()));
    pipeline.store().release(conversion.job_id).await?;
    copied?;

    eprintln!(
        "Converted \"{}\" ({}{}) -> {}",
        conversion.title,
        format_bytes(artifact.size),
        if conversion.artwork_embedded {
            ", with cover art"
        } else {
            ""
        },
        output.display()
    );
    Ok(())
}

/// Title reduced to characters safe in a local file name.
fn safe_stem(title: &str) -> String {
    let stem: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    match stem.trim() {
        "" => "converted".to_string(),
        stem => stem.to_string(),
    }
}

/// Resolve on Ctrl+C or SIGTERM, or when `shutdown` is cancelled elsewhere.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_000_000_000 {
        format!("{:.1} GB", bytes as f64 / 1_000_000_000.0)
    } else if bytes >= 1_000_000 {
        format!("{:.1} MB", bytes as f64 / 1_000_000.0)
    } else {
        format!("{:.0} KB", bytes as f64 / 1_000.0)
    }
}
