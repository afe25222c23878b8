use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::VideoPlatform;
use crate::error::{AppError, Result};
use crate::models::{ChannelMetadata, VideoMetadata};

pub struct MetadataFetcher {
    platform: Arc<dyn VideoPlatform>,
    page_limit: u32,
}

impl MetadataFetcher {
    pub fn new(platform: Arc<dyn VideoPlatform>, page_limit: u32) -> Self {
        Self {
            platform,
            page_limit: page_limit.max(1),
        }
    }

    pub async fn fetch_channel(&self, channel_id: &str) -> Result<ChannelMetadata> {
        match self.platform.get_channel(channel_id).await {
            Ok(Some(channel)) => Ok(channel),
            Ok(None) | Err(AppError::NotFound(_)) => {
                Err(AppError::ChannelNotFound(channel_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Uploads published strictly after `after` (all of them when `None`),
    /// newest first.
    pub async fn fetch_videos(
        &self,
        channel_id: &str,
        after: Option<DateTime<Utc>>,
    ) -> Result<Vec<VideoMetadata>> {
        let mut videos = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0;

        loop {
            let page = match self
                .platform
                .list_channel_videos(channel_id, page_token.as_deref())
                .await
            {
                Err(AppError::NotFound(_)) => {
                    return Err(AppError::ChannelNotFound(channel_id.to_string()))
                }
                other => other?,
            };
            pages += 1;

            let mut reached_cutoff = false;
            for video in page.items {
                match after {
                    Some(cutoff) if video.published_at <= cutoff => reached_cutoff = true,
                    _ => videos.push(video),
                }
            }

            if reached_cutoff {
                break;
            }

            match page.next_page_token {
                Some(token) if !seen_tokens.contains(&token) => {
                    if pages >= self.page_limit {
                        tracing::info!(
                            "Stopping upload listing for {} after {} pages",
                            channel_id,
                            pages
                        );
                        break;
                    }
                    seen_tokens.insert(token.clone());
                    page_token = Some(token);
                }
                _ => break,
            }
        }

        videos.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        tracing::debug!("Fetched {} videos for channel {}", videos.len(), channel_id);
        Ok(videos)
    }
}
