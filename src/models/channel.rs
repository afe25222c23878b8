use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::VideoRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
    pub url: String,
    pub last_fetched: DateTime<Utc>,
}

impl ChannelRecord {
    pub fn from_metadata(meta: ChannelMetadata, fetched_at: DateTime<Utc>) -> Self {
        Self {
            url: channel_url(&meta.id),
            id: meta.id,
            title: meta.title,
            description: meta.description,
            thumbnail_url: meta.thumbnail_url,
            last_fetched: fetched_at,
        }
    }
}

/// Channel attributes as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelListing {
    pub channel: ChannelRecord,
    pub videos: Vec<VideoRecord>,
}

pub fn channel_url(channel_id: &str) -> String {
    format!("https://www.youtube.com/channel/{}", channel_id)
}
