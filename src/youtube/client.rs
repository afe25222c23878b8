use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::transcript::{parse_timed_text, select_track, CaptionTrack};
use crate::error::{AppError, Result};
use crate::models::{ChannelMetadata, TranscriptSegment, VideoMetadata, VideoPage};

const DATA_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const WATCH_URL: &str = "https://www.youtube.com/watch?v=";
const INNERTUBE_PLAYER_URL: &str = "https://www.youtube.com/youtubei/v1/player?key=";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
const PAGE_SIZE: &str = "50";

const QUOTA_REASONS: &[&str] = &[
    "quotaExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
];

static INNERTUBE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""INNERTUBE_API_KEY":\s*"([a-zA-Z0-9_-]+)""#).expect("valid InnerTube key regex")
});

/// Everything the pipeline needs from the video platform.
#[async_trait]
pub trait VideoPlatform: Send + Sync {
    /// Channel ids matching `query`, best match first.
    async fn search_channels(&self, query: &str, limit: u32) -> Result<Vec<String>>;

    async fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelMetadata>>;

    /// One page of the channel's uploads, newest first.
    async fn list_channel_videos(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
    ) -> Result<VideoPage>;

    async fn get_video(&self, video_id: &str) -> Result<Option<VideoMetadata>>;

    async fn get_transcript(&self, video_id: &str) -> Result<Vec<TranscriptSegment>>;
}

pub struct YouTubeClient {
    client: Client,
    api_key: Option<String>,
    languages: Vec<String>,
}

impl YouTubeClient {
    pub fn new(api_key: Option<String>, languages: Vec<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US"));

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            languages,
        }
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                AppError::Config(
                    "no YouTube API key configured (set YOUTUBE_API_KEY or youtube_api_key)"
                        .to_string(),
                )
            })
    }

    async fn data_api<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let key = self.api_key()?;
        let url = format!("{}/{}", DATA_API_BASE, resource);

        tracing::debug!("YouTube Data API call: {} {:?}", resource, query);
        let response = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", key)])
            .send()
            .await?;

        let response = check_response(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Uploads playlist for a channel. `UC…` ids map directly to `UU…`.
    async fn uploads_playlist(&self, channel_id: &str) -> Result<String> {
        if let Some(rest) = channel_id.strip_prefix("UC") {
            return Ok(format!("UU{}", rest));
        }

        let response: ListResponse<ChannelItem> = self
            .data_api("channels", &[("part", "contentDetails"), ("id", channel_id)])
            .await?;

        response
            .items
            .into_iter()
            .next()
            .and_then(|c| c.content_details)
            .and_then(|d| d.related_playlists.uploads)
            .ok_or_else(|| AppError::ChannelNotFound(channel_id.to_string()))
    }

    async fn fetch_watch_page(&self, video_id: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}{}", WATCH_URL, video_id))
            .send()
            .await?;
        let response = check_scrape_response(response)?;
        let html = response.text().await?;

        if html.contains("g-recaptcha") {
            return Err(AppError::QuotaExceeded);
        }
        Ok(html)
    }

    async fn fetch_caption_tracks(&self, video_id: &str, api_key: &str) -> Result<Vec<CaptionTrack>> {
        let body = serde_json::json!({
            "context": {
                "client": {
                    "clientName": "ANDROID",
                    "clientVersion": "20.10.38"
                }
            },
            "videoId": video_id
        });

        let response = self
            .client
            .post(format!("{}{}", INNERTUBE_PLAYER_URL, api_key))
            .json(&body)
            .send()
            .await?;
        let response = check_scrape_response(response)?;
        let data: serde_json::Value = response.json().await?;

        caption_tracks(video_id, &data)
    }
}

#[async_trait]
impl VideoPlatform for YouTubeClient {
    async fn search_channels(&self, query: &str, limit: u32) -> Result<Vec<String>> {
        let limit = limit.to_string();
        let response: ListResponse<SearchItem> = self
            .data_api(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "channel"),
                    ("q", query),
                    ("maxResults", limit.as_str()),
                ],
            )
            .await?;

        Ok(response
            .items
            .into_iter()
            .filter_map(|item| {
                item.id
                    .channel_id
                    .or_else(|| item.snippet.and_then(|s| s.channel_id))
            })
            .collect())
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelMetadata>> {
        let response: ListResponse<ChannelItem> = self
            .data_api("channels", &[("part", "snippet"), ("id", channel_id)])
            .await?;

        Ok(response.items.into_iter().next().map(|item| {
            let snippet = item.snippet.unwrap_or_default();
            ChannelMetadata {
                id: item.id,
                title: snippet.title,
                description: snippet.description,
                thumbnail_url: snippet.thumbnails.best_url(),
            }
        }))
    }

    async fn list_channel_videos(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
    ) -> Result<VideoPage> {
        let playlist_id = self.uploads_playlist(channel_id).await?;

        let mut query = vec![
            ("part", "snippet,contentDetails"),
            ("playlistId", playlist_id.as_str()),
            ("maxResults", PAGE_SIZE),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response: ListResponse<PlaylistItem> =
            self.data_api("playlistItems", &query).await?;

        let items = response
            .items
            .into_iter()
            .filter_map(|item| item.into_metadata(channel_id))
            .collect();

        Ok(VideoPage {
            items,
            next_page_token: response.next_page_token,
        })
    }

    async fn get_video(&self, video_id: &str) -> Result<Option<VideoMetadata>> {
        let response: ListResponse<VideoItem> = self
            .data_api("videos", &[("part", "snippet"), ("id", video_id)])
            .await?;

        Ok(response.items.into_iter().next().and_then(|item| {
            let snippet = item.snippet?;
            Some(VideoMetadata {
                id: item.id,
                channel_id: snippet.channel_id.unwrap_or_default(),
                title: snippet.title,
                description: snippet.description,
                thumbnail_url: snippet.thumbnails.best_url(),
                published_at: parse_timestamp(snippet.published_at.as_deref())?,
            })
        }))
    }

    async fn get_transcript(&self, video_id: &str) -> Result<Vec<TranscriptSegment>> {
        let html = self.fetch_watch_page(video_id).await?;
        let api_key = INNERTUBE_KEY_RE
            .captures(&html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                AppError::Upstream(format!("could not read player config for video {}", video_id))
            })?;

        let tracks = self.fetch_caption_tracks(video_id, &api_key).await?;
        let track = select_track(&tracks, &self.languages)
            .ok_or_else(|| AppError::TranscriptUnavailable(video_id.to_string()))?;

        if track.base_url.contains("&exp=xpe") {
            return Err(AppError::Upstream(format!(
                "captions for video {} require a proof-of-origin token",
                video_id
            )));
        }

        tracing::debug!(
            "Fetching {} transcript for {} (generated: {})",
            track.language_code,
            video_id,
            track.is_generated
        );
        let response = self.client.get(&track.base_url).send().await?;
        let response = check_scrape_response(response)?;
        let xml = response.text().await?;

        Ok(parse_timed_text(&xml))
    }
}

async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(map_api_error(status, &body))
}

fn check_scrape_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AppError::QuotaExceeded);
    }
    if !status.is_success() {
        return Err(AppError::Upstream(format!("YouTube returned HTTP {}", status)));
    }
    Ok(response)
}

/// Maps a failed Data API response onto the error taxonomy.
pub(crate) fn map_api_error(status: StatusCode, body: &str) -> AppError {
    let error = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error)
        .unwrap_or_default();

    let quota = error
        .errors
        .iter()
        .any(|e| QUOTA_REASONS.contains(&e.reason.as_str()));

    let message = if error.message.is_empty() {
        format!("YouTube API returned HTTP {}", status)
    } else {
        error.message
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => AppError::QuotaExceeded,
        StatusCode::FORBIDDEN if quota => AppError::QuotaExceeded,
        StatusCode::NOT_FOUND => AppError::NotFound(message),
        _ => AppError::Upstream(message),
    }
}

/// Caption tracks from an InnerTube `player` response.
pub(crate) fn caption_tracks(video_id: &str, data: &serde_json::Value) -> Result<Vec<CaptionTrack>> {
    if let Some(playability) = data.get("playabilityStatus") {
        let status = playability.get("status").and_then(|s| s.as_str()).unwrap_or("OK");
        let reason = playability.get("reason").and_then(|r| r.as_str()).unwrap_or("");
        if status != "OK" {
            if reason.contains("not a bot") {
                return Err(AppError::QuotaExceeded);
            }
            tracing::debug!("Video {} not playable: {} {}", video_id, status, reason);
            return Err(AppError::TranscriptUnavailable(video_id.to_string()));
        }
    }

    let tracks: Vec<CaptionTrack> = data
        .pointer("/captions/playerCaptionsTracklistRenderer/captionTracks")
        .and_then(|t| t.as_array())
        .map(|tracks| {
            tracks
                .iter()
                .filter_map(|track| {
                    Some(CaptionTrack {
                        base_url: without_format(track.get("baseUrl")?.as_str()?),
                        language_code: track.get("languageCode")?.as_str()?.to_string(),
                        is_generated: track.get("kind").and_then(|k| k.as_str()) == Some("asr"),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    if tracks.is_empty() {
        return Err(AppError::TranscriptUnavailable(video_id.to_string()));
    }
    Ok(tracks)
}

/// Drops the `fmt` parameter so timedtext answers with its plain XML format.
fn without_format(base_url: &str) -> String {
    let Ok(mut url) = url::Url::parse(base_url) else {
        return base_url.to_string();
    };
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "fmt")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ApiErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
struct SearchId {
    #[serde(rename = "channelId")]
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
    snippet: Option<Snippet>,
    #[serde(rename = "contentDetails")]
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
struct ChannelContentDetails {
    #[serde(rename = "relatedPlaylists")]
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    id: String,
    snippet: Option<Snippet>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: Option<Snippet>,
    #[serde(rename = "contentDetails")]
    content_details: Option<PlaylistContentDetails>,
}

#[derive(Debug, Deserialize)]
struct PlaylistContentDetails {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
    #[serde(rename = "videoPublishedAt")]
    video_published_at: Option<String>,
}

impl PlaylistItem {
    fn into_metadata(self, channel_id: &str) -> Option<VideoMetadata> {
        let snippet = self.snippet?;
        let details = self.content_details;

        let id = details
            .as_ref()
            .and_then(|d| d.video_id.clone())
            .or_else(|| snippet.resource_id.as_ref().and_then(|r| r.video_id.clone()))?;

        // Private and deleted uploads have no videoPublishedAt; the playlist
        // insertion time is the closest substitute.
        let published_at = parse_timestamp(
            details
                .as_ref()
                .and_then(|d| d.video_published_at.as_deref()),
        )
        .or_else(|| parse_timestamp(snippet.published_at.as_deref()))?;

        Some(VideoMetadata {
            id,
            channel_id: snippet
                .channel_id
                .clone()
                .unwrap_or_else(|| channel_id.to_string()),
            thumbnail_url: snippet.thumbnails.best_url(),
            title: snippet.title,
            description: snippet.description,
            published_at,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "channelId")]
    channel_id: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
    #[serde(rename = "resourceId")]
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
struct ResourceId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

impl Thumbnails {
    fn best_url(&self) -> String {
        self.high
            .as_ref()
            .or(self.medium.as_ref())
            .or(self.default.as_ref())
            .map(|t| t.url.clone())
            .unwrap_or_default()
    }
}
