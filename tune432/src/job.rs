use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::classify::ErrorKind;
use crate::error::{Error, Result};

/// Length of a rendered [`JobId`]: 128 bits as lowercase hex.
const JOB_ID_LEN: usize = 32;

/// Opaque identifier of one conversion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier received from a client.
    ///
    /// Only the exact rendered form (32 lowercase hex characters) is accepted,
    /// so a parsed id is always safe to splice into a file name.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != JOB_ID_LEN
            || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return None;
        }
        Uuid::try_parse(s).ok().map(Self)
    }

    /// Deterministic location of this job's artifact for `role` under `root`.
    pub fn artifact_path(&self, root: &Path, role: Role) -> PathBuf {
        root.join(role.file_name(self))
    }

    /// Where a writer puts `role` before it is published.
    pub fn staging_path(&self, root: &Path, role: Role) -> PathBuf {
        root.join(format!("{}.part", role.file_name(self)))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// What an artifact is to its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Raw audio as fetched from the source.
    Original,
    /// Retuned audio served to clients.
    Converted,
    /// Cover image downloaded for embedding.
    Artwork,
}

impl Role {
    /// Tag used in artifact identifiers.
    pub fn tag(&self) -> &'static str {
        match self {
            Role::Original => "original",
            Role::Converted => "converted",
            Role::Artwork => "artwork",
        }
    }

    /// File name suffix appended to the job id.
    pub fn suffix(&self) -> &'static str {
        match self {
            Role::Original => "_original.mp3",
            Role::Converted => "_432hz.mp3",
            Role::Artwork => "_cover.jpg",
        }
    }

    pub fn file_name(&self, id: &JobId) -> String {
        format!("{id}{}", self.suffix())
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Role::Original | Role::Converted => "audio/mpeg",
            Role::Artwork => "image/jpeg",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Pipeline stage of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Pending,
    Fetching,
    Fetched,
    Transcoding,
    Transcoded,
    ArtworkPending,
    ArtworkDone,
    ArtworkSkipped,
    Ready,
    Failed(ErrorKind),
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Ready | Stage::Failed(_))
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (from, Failed(_)) => !from.is_terminal(),
            (Pending, Fetching)
            | (Fetching, Fetched)
            | (Fetched, Transcoding)
            | (Transcoding, Transcoded)
            | (Transcoded, ArtworkPending)
            | (Transcoded, Ready)
            | (ArtworkPending, ArtworkDone)
            | (ArtworkPending, ArtworkSkipped)
            | (ArtworkDone, Ready)
            | (ArtworkSkipped, Ready) => true,
            _ => false,
        }
    }
}

/// One request's pass through the pipeline.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub source_url: String,
    pub created_at: SystemTime,
    pub title: Option<String>,
    artifacts: Vec<PathBuf>,
    stage: Stage,
}

impl Job {
    pub fn new(source_url: &str) -> Self {
        Self {
            id: JobId::new(),
            source_url: source_url.to_string(),
            created_at: SystemTime::now(),
            title: None,
            artifacts: Vec::new(),
            stage: Stage::Pending,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    pub fn advance(&mut self, next: Stage) -> Result<()> {
        if !self.stage.can_transition_to(next) {
            return Err(Error::IllegalTransition(format!(
                "{:?} -> {:?}",
                self.stage, next
            )));
        }
        debug!(job = %self.id, from = ?self.stage, to = ?next, "stage transition");
        self.stage = next;
        Ok(())
    }

    /// Mark the job failed. Terminal jobs are left as they are.
    /// Files written for this job so far, in order.
    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    pub fn record_artifact(&mut self, path: &Path) {
        debug!(job = %self.id, path = %path.display(), "artifact written");
        self.artifacts.push(path.to_path_buf());
    }

    pub fn fail(&mut self, kind: ErrorKind) {
        if !self.stage.is_terminal() {
            debug!(job = %self.id, from = ?self.stage, ?kind, "job failed");
            self.stage = Stage::Failed(kind);
        }
    }
}
