//! On-disk artifact lifecycle.
//!
//! Every artifact lives directly under one root directory at a name derived
//! from its job id and role, so any request holding a job id can find the
//! file again without an index. Writers produce `.part` files and publish
//! them with a rename; readers only ever resolve published names.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use tokio::fs::File;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::job::{JobId, Role};

/// Address of one artifact: owning job plus role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactId {
    pub job: JobId,
    pub role: Role,
}

impl ArtifactId {
    pub fn new(job: JobId, role: Role) -> Self {
        Self { job, role }
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.job, self.role)
    }
}

/// A published artifact.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: ArtifactId,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
    pub content_type: &'static str,
}

/// Readable handle on a published artifact.
#[derive(Debug)]
pub struct ArtifactReader {
    pub artifact: Artifact,
    file: File,
}

impl AsyncRead for ArtifactReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

/// Readable handle on an artifact that has been claimed by one reader.
///
/// The artifact is no longer visible to anyone else; the underlying file is
/// deleted when this value is dropped.
#[derive(Debug)]
pub struct ConsumedArtifact {
    pub artifact: Artifact,
    file: File,
    _claim: ClaimGuard,
}

impl AsyncRead for ConsumedArtifact {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

/// RAII guard that removes a claimed file when dropped.
#[derive(Debug)]
struct ClaimGuard(PathBuf);

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "consumed artifact removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.0.display(), error = %e, "failed to remove consumed artifact")
            }
        }
    }
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub bytes_freed: u64,
}

/// Owner of every file under the artifact root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: Arc<PathBuf>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    /// Create the root directory if it is missing.
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.root.as_path()).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, id: ArtifactId) -> PathBuf {
        id.job.artifact_path(&self.root, id.role)
    }

    /// Publish the file at `path` as the `role` artifact of `job`.
    ///
    /// Publishing is a rename, so the artifact appears complete or not at all.
    /// Registering an artifact that is already published is a no-op.
    pub async fn register(&self, job: JobId, role: Role, path: &Path) -> Result<ArtifactId> {
        let id = ArtifactId::new(job, role);
        let target = self.path_of(id);

        if tokio::fs::try_exists(&target).await? {
            debug!(artifact = %id, "artifact already registered");
            return Ok(id);
        }

        let meta = tokio::fs::metadata(path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::MissingOutput {
                    path: path.to_path_buf(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        if meta.len() == 0 {
            return Err(Error::MissingOutput {
                path: path.to_path_buf(),
            });
        }

        tokio::fs::rename(path, &target).await?;
        info!(artifact = %id, size = meta.len(), "artifact registered");
        Ok(id)
    }

    /// Metadata of a published artifact.
    pub async fn locate(&self, id: ArtifactId) -> Result<Artifact> {
        let path = self.path_of(id);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(id, e))?;
        if !meta.is_file() {
            return Err(Error::ArtifactNotFound(id.to_string()));
        }
        Ok(Artifact {
            id,
            path,
            modified: meta.modified()?,
            size: meta.len(),
            content_type: id.role.content_type(),
        })
    }

    /// Open an artifact for repeat-safe reading.
    pub async fn open(&self, id: ArtifactId) -> Result<ArtifactReader> {
        let artifact = self.locate(id).await?;
        let file = File::open(&artifact.path)
            .await
            .map_err(|e| not_found_or_io(id, e))?;
        Ok(ArtifactReader { artifact, file })
    }

    /// Claim an artifact for a single reader and delete it once read.
    ///
    /// The claim is a rename to a private name, so when several requests race
    /// for the same artifact exactly one wins and the rest see `NotFound`.
    pub async fn consume_once(&self, id: ArtifactId) -> Result<ConsumedArtifact> {
        let path = self.path_of(id);
        let claimed = self
            .root
            .join(format!("{}.claimed-{}", id.role.file_name(&id.job), Uuid::new_v4().simple()));

        tokio::fs::rename(&path, &claimed)
            .await
            .map_err(|e| not_found_or_io(id, e))?;
        let claim = ClaimGuard(claimed);

        let file = File::open(&claim.0).await?;
        let meta = file.metadata().await?;
        debug!(artifact = %id, "artifact claimed for one-shot read");

        Ok(ConsumedArtifact {
            artifact: Artifact {
                id,
                path: claim.0.clone(),
                modified: meta.modified()?,
                size: meta.len(),
                content_type: id.role.content_type(),
            },
            file,
            _claim: claim,
        })
    }

    /// Delete every file belonging to `job`. Returns how many were removed.
    pub async fn release(&self, job: JobId) -> Result<usize> {
        let prefix = format!("{job}_");
        let mut removed = 0;

        let mut entries = match tokio::fs::read_dir(self.root.as_path()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_name().to_string_lossy().starts_with(&prefix) {
                continue;
            }
            if remove_if_present(&entry.path()).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(%job, removed, "released job artifacts");
        }
        Ok(removed)
    }

    /// Remove every file in the root whose age is at least `max_age`.
    ///
    /// Files deleted concurrently by other requests are skipped, as are
    /// individual files that fail to delete.
    pub async fn sweep(&self, max_age: Duration) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = SystemTime::now();

        let mut entries = match tokio::fs::read_dir(self.root.as_path()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "sweep: cannot stat");
                    continue;
                }
            };
            report.scanned += 1;

            let age = meta
                .modified()
                .ok()
                .and_then(|m| now.duration_since(m).ok())
                .unwrap_or(Duration::ZERO);
            if age < max_age {
                continue;
            }

            match remove_if_present(&path).await {
                Ok(true) => {
                    report.removed += 1;
                    report.bytes_freed += meta.len();
                }
                Ok(false) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "sweep: cannot remove"),
            }
        }

        if report.removed > 0 {
            info!(
                removed = report.removed,
                bytes = report.bytes_freed,
                "retention sweep"
            );
        }
        Ok(report)
    }
}

fn not_found_or_io(id: ArtifactId, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::ArtifactNotFound(id.to_string())
    } else {
        Error::Io(e)
    }
}

/// Remove a file, treating "already gone" as success. Returns whether this
/// call did the removal.
pub(crate) async fn remove_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
