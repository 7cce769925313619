//! Serving, sharing and releasing converted files.

use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, info};
use tune432::{Artifact, ArtifactId, DownloadPolicy, JobId, Role};

use super::base_url;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Stem used when a download has no usable title.
const DEFAULT_DOWNLOAD_STEM: &str = "converted";

/// Longest title kept in a download file name.
const MAX_TITLE_CHARS: usize = 100;

pub(crate) fn listen_url(base: &str, job_id: &str) -> String {
    format!("{base}/api/listen/{job_id}")
}

pub(crate) fn download_url(base: &str, job_id: &str, title: Option<&str>) -> String {
    match title {
        Some(title) => format!(
            "{base}/api/download/{job_id}?title={}",
            urlencoding::encode(title)
        ),
        None => format!("{base}/api/download/{job_id}"),
    }
}

/// Converted artifact id for a client-supplied job id.
fn converted_id(raw: &str) -> ApiResult<ArtifactId> {
    JobId::parse(raw)
        .map(|job| ArtifactId::new(job, Role::Converted))
        .ok_or_else(|| ApiError::NotFound(format!("malformed job id {raw:?}")))
}

/// GET /api/listen/:job_id
///
/// Inline playback; range requests are handled by `ServeFile`.
pub async fn listen(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    request: Request,
) -> ApiResult<Response> {
    let artifact = state.pipeline.store().locate(converted_id(&job_id)?).await?;
    debug!(artifact = %artifact.id, "serving inline");

    let response = ServeFile::new(&artifact.path)
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});
    Ok(response.into_response())
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub title: Option<String>,
}

/// GET /api/download/:job_id?title=
pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let id = converted_id(&job_id)?;
    let store = state.pipeline.store();
    let file_name = DownloadName::new(query.title.as_deref());

    let response = match state.config.download_policy {
        DownloadPolicy::Retain => {
            let reader = store.open(id).await?;
            let headers = download_headers(&reader.artifact, &file_name)?;
            (headers, Body::from_stream(ReaderStream::new(reader))).into_response()
        }
        DownloadPolicy::Consume => {
            // The claimed file is deleted when the body (and with it the
            // reader) is dropped.
            let reader = store.consume_once(id).await?;
            let headers = download_headers(&reader.artifact, &file_name)?;
            (headers, Body::from_stream(ReaderStream::new(reader))).into_response()
        }
    };
    info!(artifact = %id, policy = %state.config.download_policy, "download started");
    Ok(response)
}

fn download_headers(artifact: &Artifact, file_name: &DownloadName) -> ApiResult<HeaderMap> {
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        file_name.ascii,
        urlencoding::encode(&file_name.unicode)
    ))
    .map_err(|e| ApiError::BadRequest(format!("file name: {e}")))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(artifact.content_type),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(artifact.size));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(headers)
}

/// Client-facing file name for a download: `{title}_432hz.mp3`.
///
/// `filename=` only carries ASCII, so non-Latin titles get the extended
/// `filename*` form as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DownloadName {
    pub ascii: String,
    pub unicode: String,
}

impl DownloadName {
    pub(crate) fn new(title: Option<&str>) -> Self {
        let title = title.unwrap_or_default();
        Self {
            ascii: sanitized_name(title, |c| c.is_ascii_alphanumeric()),
            unicode: sanitized_name(title, char::is_alphanumeric),
        }
    }
}

/// Letters, digits, spaces, dashes and underscores survive.
fn sanitized_name(title: &str, keep: fn(char) -> bool) -> String {
    let cleaned: String = title
        .chars()
        .filter(|&c| keep(c) || matches!(c, ' ' | '-' | '_'))
        .take(MAX_TITLE_CHARS)
        .collect();
    let stem = match cleaned.trim() {
        "" => DEFAULT_DOWNLOAD_STEM,
        stem => stem,
    };
    format!("{stem}{}", Role::Converted.suffix())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareResponse {
    pub success: bool,
    pub share_url: String,
}

/// GET /api/share/:job_id
pub async fn share(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<ShareResponse>> {
    let artifact = state.pipeline.store().locate(converted_id(&job_id)?).await?;
    let base = base_url(&state.config, &headers);
    Ok(Json(ShareResponse {
        success: true,
        share_url: download_url(&base, &artifact.id.job.to_string(), None),
    }))
}

#[derive(Debug, Serialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub removed: usize,
}

/// DELETE /api/cleanup/:job_id
pub async fn cleanup(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CleanupResponse>> {
    let id = converted_id(&job_id)?;
    let removed = state.pipeline.store().release(id.job).await?;
    Ok(Json(CleanupResponse {
        success: true,
        removed,
    }))
}
