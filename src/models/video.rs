use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: String,
    pub channel_id: Option<String>,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub transcript: Option<String>,
    pub transcript_fetched: Option<DateTime<Utc>>,
}

/// Video attributes as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
    pub published_at: DateTime<Utc>,
}

/// One page of a channel's upload list.
#[derive(Debug, Clone, Default)]
pub struct VideoPage {
    pub items: Vec<VideoMetadata>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    pub start: f64,
    pub duration: f64,
}

/// Field-wise update for a cached video.
///
/// `None` means "leave the stored value alone", so a patch can never erase
/// data it did not mean to touch.
#[derive(Debug, Clone, Default)]
pub struct VideoPatch {
    pub id: String,
    pub channel_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub transcript: Option<String>,
    pub transcript_fetched: Option<DateTime<Utc>>,
}

impl VideoPatch {
    pub fn from_metadata(meta: &VideoMetadata) -> Self {
        Self {
            id: meta.id.clone(),
            channel_id: Some(meta.channel_id.clone()),
            title: Some(meta.title.clone()),
            description: Some(meta.description.clone()),
            thumbnail_url: Some(meta.thumbnail_url.clone()),
            url: Some(video_url(&meta.id)),
            published_at: Some(meta.published_at),
            transcript: None,
            transcript_fetched: None,
        }
    }

    pub fn transcript(id: &str, text: String, fetched_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            transcript: Some(text),
            transcript_fetched: Some(fetched_at),
            ..Self::default()
        }
    }
}

pub fn video_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}
