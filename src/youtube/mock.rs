use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use super::VideoPlatform;
use crate::error::{AppError, Result};
use crate::models::{ChannelMetadata, TranscriptSegment, VideoMetadata, VideoPage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Upstream,
    Quota,
}

impl Failure {
    fn error(self) -> AppError {
        match self {
            Failure::Upstream => AppError::Upstream("connection reset".to_string()),
            Failure::Quota => AppError::QuotaExceeded,
        }
    }
}

/// In-memory platform with call counters and switchable failures.
#[derive(Default)]
pub struct MockPlatform {
    searches: Mutex<HashMap<String, Vec<String>>>,
    channels: Mutex<HashMap<String, ChannelMetadata>>,
    uploads: Mutex<HashMap<String, Vec<VideoMetadata>>>,
    without_uploads_listing: Mutex<HashSet<String>>,
    transcripts: Mutex<HashMap<String, Vec<TranscriptSegment>>>,
    failure: Mutex<Option<Failure>>,
    page_size: Mutex<Option<usize>>,
    search_calls: AtomicUsize,
    channel_calls: AtomicUsize,
    page_calls: AtomicUsize,
    video_calls: AtomicUsize,
    transcript_calls: AtomicUsize,
}

pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap()
}

pub fn video(id: &str, channel_id: &str, published_at: DateTime<Utc>) -> VideoMetadata {
    VideoMetadata {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        title: format!("Video {id}"),
        description: format!("About {id}"),
        thumbnail_url: format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg"),
        published_at,
    }
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_search(&self, query: &str, channel_ids: &[&str]) {
        self.searches.lock().unwrap().insert(
            query.to_string(),
            channel_ids.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn add_channel(&self, id: &str, title: &str) {
        self.channels.lock().unwrap().insert(
            id.to_string(),
            ChannelMetadata {
                id: id.to_string(),
                title: title.to_string(),
                description: format!("{title} channel"),
                thumbnail_url: format!("https://yt3.ggpht.com/{id}.jpg"),
            },
        );
    }

    pub fn rename_channel(&self, id: &str, title: &str) {
        if let Some(channel) = self.channels.lock().unwrap().get_mut(id) {
            channel.title = title.to_string();
        }
    }

    /// Adds an upload; pages are served newest first.
    pub fn add_upload(&self, meta: VideoMetadata) {
        let mut uploads = self.uploads.lock().unwrap();
        let list = uploads.entry(meta.channel_id.clone()).or_default();
        list.push(meta);
        list.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    }

    /// Listing uploads of this channel answers 404, as YouTube does for
    /// channels that never published anything.
    pub fn remove_uploads_listing(&self, channel_id: &str) {
        self.without_uploads_listing
            .lock()
            .unwrap()
            .insert(channel_id.to_string());
    }

    pub fn add_transcript(&self, video_id: &str, texts: &[&str]) {
        let segments = texts
            .iter()
            .enumerate()
            .map(|(i, text)| TranscriptSegment {
                text: text.to_string(),
                start: i as f64 * 2.0,
                duration: 2.0,
            })
            .collect();
        self.transcripts
            .lock()
            .unwrap()
            .insert(video_id.to_string(), segments);
    }

    pub fn set_failure(&self, failure: Option<Failure>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn set_page_size(&self, size: usize) {
        *self.page_size.lock().unwrap() = Some(size);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn channel_calls(&self) -> usize {
        self.channel_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn video_calls(&self) -> usize {
        self.video_calls.load(Ordering::SeqCst)
    }

    pub fn transcript_calls(&self) -> usize {
        self.transcript_calls.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<()> {
        match *self.failure.lock().unwrap() {
            Some(failure) => Err(failure.error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VideoPlatform for MockPlatform {
    async fn search_channels(&self, query: &str, limit: u32) -> Result<Vec<String>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        let results = self.searches.lock().unwrap().get(query).cloned();
        Ok(results
            .unwrap_or_default()
            .into_iter()
            .take(limit as usize)
            .collect())
    }

    async fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelMetadata>> {
        self.channel_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.channels.lock().unwrap().get(channel_id).cloned())
    }

    async fn list_channel_videos(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
    ) -> Result<VideoPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        if self.without_uploads_listing.lock().unwrap().contains(channel_id) {
            return Err(AppError::NotFound(format!("playlist for {channel_id}")));
        }

        let all = self
            .uploads
            .lock()
            .unwrap()
            .get(channel_id)
            .cloned()
            .unwrap_or_default();
        let size = self.page_size.lock().unwrap().unwrap_or(usize::MAX);
        let offset = page_token
            .and_then(|t| t.strip_prefix("page-"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);

        let items: Vec<_> = all.iter().skip(offset).take(size).cloned().collect();
        let next = offset.saturating_add(size);
        Ok(VideoPage {
            items,
            next_page_token: (next < all.len()).then(|| format!("page-{next}")),
        })
    }

    async fn get_video(&self, video_id: &str) -> Result<Option<VideoMetadata>> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self
            .uploads
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|v| v.id == video_id)
            .cloned())
    }

    async fn get_transcript(&self, video_id: &str) -> Result<Vec<TranscriptSegment>> {
        self.transcript_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        self.transcripts
            .lock()
            .unwrap()
            .get(video_id)
            .cloned()
            .ok_or_else(|| AppError::TranscriptUnavailable(video_id.to_string()))
    }
}
