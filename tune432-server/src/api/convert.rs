//! Conversion and metadata endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use tune432::SourceInfo;

use super::{base_url, files};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Body of `POST /api/convert`.
#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    #[serde(rename = "sourceUrl", alias = "youtubeUrl", default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub success: bool,
    pub job_id: String,
    /// Same value as `job_id`, for older clients.
    pub file_id: String,
    pub title: String,
    pub listen_url: String,
    /// Same value as `listen_url`, for older clients.
    pub audio_url: String,
    pub download_url: String,
    pub share_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub artwork_embedded: bool,
}

/// POST /api/convert
///
/// Runs the whole pipeline inside the request. If the client goes away the
/// handler future is dropped, which cancels the running stage and removes
/// the job's intermediate files.
pub async fn convert(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ConvertRequest>, JsonRejection>,
) -> ApiResult<Json<ConvertResponse>> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let url = request.source_url.unwrap_or_default();

    let conversion = state.pipeline.convert(&url).await?;

    let base = base_url(&state.config, &headers);
    let job_id = conversion.job_id.to_string();
    let listen_url = files::listen_url(&base, &job_id);
    let download_url = files::download_url(&base, &job_id, Some(&conversion.title));
    let share_url = files::download_url(&base, &job_id, None);
    info!(job = %job_id, title = %conversion.title, "conversion served");

    Ok(Json(ConvertResponse {
        success: true,
        file_id: job_id.clone(),
        job_id,
        title: conversion.title,
        audio_url: listen_url.clone(),
        listen_url,
        download_url,
        share_url,
        duration: conversion.duration,
        artwork_embedded: conversion.artwork_embedded,
    }))
}

#[derive(Debug, Deserialize)]
pub struct InfoQuery {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub success: bool,
    #[serde(flatten)]
    pub info: SourceInfo,
}

/// GET /api/info?url=
pub async fn info(
    State(state): State<AppState>,
    Query(query): Query<InfoQuery>,
) -> ApiResult<Json<InfoResponse>> {
    let url = query.url.unwrap_or_default();
    let info = state.pipeline.info(&url).await?;
    Ok(Json(InfoResponse {
        success: true,
        info,
    }))
}
