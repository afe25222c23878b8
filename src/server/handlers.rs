use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiResult, AppState};
use crate::models::{ChannelListing, ChannelRecord, HistoryEntry, HistorySource, VideoRecord};
use crate::pipeline::PromptResult;

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ChannelRequest {
    pub url: String,
    #[serde(default)]
    pub transcripts: bool,
}

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct PromptQuery {
    pub template: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub video_id: String,
    pub transcript: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FavoriteResponse {
    pub id: i64,
    pub is_favorite: bool,
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn get_channel(
    State(state): State<AppState>,
    Query(request): Query<ChannelRequest>,
) -> ApiResult<Json<ChannelListing>> {
    channel(state, request).await
}

pub async fn post_channel(
    State(state): State<AppState>,
    Json(request): Json<ChannelRequest>,
) -> ApiResult<Json<ChannelListing>> {
    channel(state, request).await
}

async fn channel(state: AppState, request: ChannelRequest) -> ApiResult<Json<ChannelListing>> {
    let listing = state
        .pipeline
        .channel_for_url(&request.url, request.transcripts, HistorySource::Api)
        .await?;
    Ok(Json(listing))
}

pub async fn list_channels(State(state): State<AppState>) -> ApiResult<Json<Vec<ChannelRecord>>> {
    let channels = state.pipeline.repository().list_channels().await?;
    Ok(Json(channels))
}

pub async fn get_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<VideoRecord>> {
    let video = state.pipeline.video(&id).await?;
    Ok(Json(video))
}

pub async fn transcript_by_url(
    State(state): State<AppState>,
    Query(query): Query<UrlQuery>,
) -> ApiResult<Json<TranscriptResponse>> {
    transcript(state, &query.url).await
}

pub async fn transcript_by_id(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<TranscriptResponse>> {
    transcript(state, &video_id).await
}

async fn transcript(state: AppState, input: &str) -> ApiResult<Json<TranscriptResponse>> {
    let (video_id, transcript) = state
        .pipeline
        .transcript_for_input(input, HistorySource::Api)
        .await?;
    Ok(Json(TranscriptResponse {
        video_id,
        transcript,
    }))
}

pub async fn prompt(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Query(query): Query<PromptQuery>,
) -> ApiResult<Json<PromptResult>> {
    let result = state
        .pipeline
        .prompt(&video_id, query.template.as_deref())
        .await?;
    Ok(Json(result))
}

pub async fn recent_history(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let entries = state
        .pipeline
        .repository()
        .recent_history(clamp_limit(query.limit))
        .await?;
    Ok(Json(entries))
}

pub async fn favorite_history(State(state): State<AppState>) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let entries = state.pipeline.repository().favorite_history().await?;
    Ok(Json(entries))
}

pub async fn search_history(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(ApiError::bad_request("query parameter 'q' is required"));
    }
    let entries = state
        .pipeline
        .repository()
        .search_history(q, clamp_limit(query.limit))
        .await?;
    Ok(Json(entries))
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<FavoriteResponse>> {
    match state.pipeline.repository().toggle_favorite(id).await? {
        Some(is_favorite) => Ok(Json(FavoriteResponse { id, is_favorite })),
        None => Err(ApiError::not_found(format!("history entry {} not found", id))),
    }
}
