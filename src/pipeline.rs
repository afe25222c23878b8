use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::ai::{PromptBuilder, PromptContext, PromptLinks, DEFAULT_TEMPLATE};
use crate::config::Config;
use crate::db::{is_fresh, Repository, DEFAULT_FRESHNESS_HOURS};
use crate::error::{AppError, Result};
use crate::models::{
    ChannelListing, ChannelRecord, HistorySource, VideoPatch, VideoRecord,
};
use crate::youtube::{MetadataFetcher, Reference, TranscriptFetcher, UrlResolver, VideoPlatform};

/// History entries untouched for this many days are dropped on refresh.
pub const HISTORY_RETENTION_DAYS: i64 = 90;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub freshness: Duration,
    pub video_page_limit: u32,
    pub transcript_concurrency: usize,
    pub prompt_templates: BTreeMap<String, String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            freshness: Duration::hours(DEFAULT_FRESHNESS_HOURS),
            video_page_limit: 20,
            transcript_concurrency: 4,
            prompt_templates: BTreeMap::new(),
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            freshness: Duration::hours(config.freshness_hours),
            video_page_limit: config.video_page_limit,
            transcript_concurrency: config.transcript_concurrency.max(1),
            prompt_templates: config.prompt_templates.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptResult {
    pub video_id: String,
    pub template: String,
    pub prompt: String,
    pub links: PromptLinks,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
    pub fresh: usize,
    pub history_removed: usize,
}

/// Resolves URLs, keeps the cache current and serves from it when YouTube
/// is unavailable.
pub struct Pipeline {
    repository: Repository,
    platform: Arc<dyn VideoPlatform>,
    resolver: UrlResolver,
    metadata: MetadataFetcher,
    transcripts: TranscriptFetcher,
    prompts: PromptBuilder,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        repository: Repository,
        platform: Arc<dyn VideoPlatform>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            resolver: UrlResolver::new(platform.clone()),
            metadata: MetadataFetcher::new(platform.clone(), settings.video_page_limit),
            transcripts: TranscriptFetcher::new(platform.clone()),
            prompts: PromptBuilder::new(&settings.prompt_templates),
            repository,
            platform,
            settings,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub async fn resolve(&self, url: &str) -> Result<Reference> {
        self.resolver.resolve(url).await
    }

    /// Channel listing for any channel or video URL. A video URL yields the
    /// channel that published it.
    pub async fn channel_for_url(
        &self,
        url: &str,
        with_transcripts: bool,
        source: HistorySource,
    ) -> Result<ChannelListing> {
        let channel_id = match self.resolve(url).await? {
            Reference::Channel(id) => id,
            Reference::Video(video_id) => {
                let video = self.video(&video_id).await?;
                video.channel_id.ok_or_else(|| {
                    AppError::NotFound(format!("channel of video {}", video_id))
                })?
            }
        };

        let mut listing = self.load_channel(&channel_id).await?;
        self.record_history(url, Some(listing.channel.title.clone()), source)
            .await;

        if with_transcripts {
            let fetched = self.prefetch_transcripts(&listing.videos).await?;
            if fetched > 0 {
                listing.videos = self.repository.get_videos(&channel_id).await?;
            }
        }
        Ok(listing)
    }

    /// Cached channel when fresh, otherwise refreshed from upstream. Transient
    /// upstream failures fall back to whatever is cached.
    pub async fn load_channel(&self, channel_id: &str) -> Result<ChannelListing> {
        let cached = self.repository.get_channel(channel_id).await?;

        if let Some(channel) = &cached {
            if is_fresh(Some(channel.last_fetched), self.settings.freshness) {
                tracing::debug!("Serving channel {} from cache", channel_id);
                return self.cached_listing(channel.clone()).await;
            }
        }

        match self.fetch_and_store(channel_id).await {
            Ok(channel) => {
                let stored = self
                    .repository
                    .get_channel(&channel.id)
                    .await?
                    .unwrap_or(channel);
                self.cached_listing(stored).await
            }
            Err(e) if e.allows_stale_fallback() => match cached {
                Some(channel) => {
                    tracing::warn!(
                        "Refreshing channel {} failed ({}), serving cached copy from {}",
                        channel_id,
                        e,
                        channel.last_fetched
                    );
                    self.cached_listing(channel).await
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn cached_listing(&self, channel: ChannelRecord) -> Result<ChannelListing> {
        let videos = self.repository.get_videos(&channel.id).await?;
        Ok(ChannelListing { channel, videos })
    }

    /// Fetches channel metadata and any uploads newer than the newest cached
    /// one. The channel row is written last so `last_fetched` only moves
    /// once the videos are stored.
    async fn fetch_and_store(&self, channel_id: &str) -> Result<ChannelRecord> {
        let meta = self.metadata.fetch_channel(channel_id).await?;
        let after = self.repository.latest_published_at(channel_id).await?;
        let videos = match self.metadata.fetch_videos(channel_id, after).await {
            // The channel exists, so a missing uploads listing means no public uploads.
            Err(AppError::ChannelNotFound(_)) => {
                tracing::info!("Channel {} has no uploads listing", channel_id);
                Vec::new()
            }
            other => other?,
        };

        // Oldest first, so on equal publish times the earlier-listed upload
        // gets the newer row and sorts first.
        let patches: Vec<VideoPatch> = videos.iter().rev().map(VideoPatch::from_metadata).collect();
        let stored = self.repository.put_videos(patches).await?;

        let channel = ChannelRecord::from_metadata(meta, Utc::now());
        self.repository.put_channel(channel.clone()).await?;

        tracing::info!(
            "Refreshed channel {} ({}): {} new videos",
            channel.title,
            channel_id,
            stored
        );
        Ok(channel)
    }

    /// A single video, from cache or looked up directly.
    pub async fn video(&self, input: &str) -> Result<VideoRecord> {
        let video_id = self.resolver.video_id(input).await?;
        let cached = self.repository.get_video(&video_id).await?;

        // Rows created by the transcript path alone have no metadata yet.
        if let Some(video) = &cached {
            if video.published_at.is_some() {
                return Ok(video.clone());
            }
        }

        match self.platform.get_video(&video_id).await {
            Ok(Some(meta)) => {
                self.repository
                    .put_video(VideoPatch::from_metadata(&meta))
                    .await?;
            }
            Ok(None) => return Err(AppError::NotFound(format!("video {}", video_id))),
            Err(e) if e.allows_stale_fallback() && cached.is_some() => {
                tracing::warn!("Video lookup for {} failed: {}", video_id, e);
            }
            Err(e) => return Err(e),
        }

        self.repository
            .get_video(&video_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("video {}", video_id)))
    }

    /// Transcript for a video id. Cached transcripts are returned as is;
    /// upstream failures yield `None`.
    pub async fn transcript(&self, video_id: &str) -> Result<Option<String>> {
        if let Some(video) = self.repository.get_video(video_id).await? {
            if let Some(transcript) = video.transcript {
                return Ok(Some(transcript));
            }
        }

        match self.transcripts.fetch_transcript(video_id).await {
            Ok(text) => {
                self.repository
                    .put_video(VideoPatch::transcript(video_id, text.clone(), Utc::now()))
                    .await?;
                Ok(Some(text))
            }
            Err(e) if e.is_upstream() => {
                tracing::warn!("No transcript for {}: {}", video_id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Transcript for a URL or bare video id, recorded in the history.
    pub async fn transcript_for_input(
        &self,
        input: &str,
        source: HistorySource,
    ) -> Result<(String, Option<String>)> {
        let video_id = self.resolver.video_id(input).await?;
        let transcript = self.transcript(&video_id).await?;
        if input.contains('/') {
            self.record_history(input, None, source).await;
        }
        Ok((video_id, transcript))
    }

    /// Fetches missing transcripts concurrently. Returns how many were added.
    pub async fn prefetch_transcripts(&self, videos: &[VideoRecord]) -> Result<usize> {
        let missing: Vec<String> = videos
            .iter()
            .filter(|v| v.transcript.is_none())
            .map(|v| v.id.clone())
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let results: Vec<Result<Option<String>>> = stream::iter(missing)
            .map(|id| async move { self.transcript(&id).await })
            .buffer_unordered(self.settings.transcript_concurrency)
            .collect()
            .await;

        let mut fetched = 0;
        for result in results {
            if result?.is_some() {
                fetched += 1;
            }
        }
        tracing::info!("Prefetched {} transcripts", fetched);
        Ok(fetched)
    }

    /// Refreshes every cached channel whose metadata has gone stale.
    pub async fn refresh_stale_channels(&self) -> Result<RefreshSummary> {
        let channels = self.repository.list_channels().await?;
        let mut summary = RefreshSummary::default();

        let stale: Vec<ChannelRecord> = channels
            .into_iter()
            .filter(|c| {
                let fresh = is_fresh(Some(c.last_fetched), self.settings.freshness);
                if fresh {
                    summary.fresh += 1;
                }
                !fresh
            })
            .collect();

        let results: Vec<_> = stream::iter(stale)
            .map(|channel| async move {
                let result = self.fetch_and_store(&channel.id).await;
                (channel, result)
            })
            .buffer_unordered(self.settings.transcript_concurrency)
            .collect()
            .await;

        for (channel, result) in results {
            match result {
                Ok(_) => summary.refreshed += 1,
                Err(e) => {
                    tracing::error!("Failed to refresh channel {}: {}", channel.id, e);
                    summary.failed += 1;
                }
            }
        }

        summary.history_removed = self
            .repository
            .cleanup_history(HISTORY_RETENTION_DAYS)
            .await?;
        Ok(summary)
    }

    /// Analysis prompt for a video's transcript plus links to open it in
    /// each AI chat service.
    pub async fn prompt(&self, input: &str, template: Option<&str>) -> Result<PromptResult> {
        let video_id = self.resolver.video_id(input).await?;
        let transcript = self
            .transcript(&video_id)
            .await?
            .ok_or_else(|| AppError::TranscriptUnavailable(video_id.clone()))?;

        let context = self.prompt_context(&video_id).await;
        let prompt = self.prompts.render(template, &transcript, &context)?;

        Ok(PromptResult {
            links: PromptLinks::for_prompt(&prompt),
            template: template.unwrap_or(DEFAULT_TEMPLATE).to_string(),
            video_id,
            prompt,
        })
    }

    async fn prompt_context(&self, video_id: &str) -> PromptContext {
        let video = match self.video(video_id).await {
            Ok(video) => video,
            Err(e) => {
                tracing::debug!("No metadata for prompt on {}: {}", video_id, e);
                return PromptContext::default();
            }
        };

        let channel = match &video.channel_id {
            Some(id) => self.repository.get_channel(id).await.ok().flatten(),
            None => None,
        };

        PromptContext {
            title: video.title,
            channel: channel.map(|c| c.title).unwrap_or_default(),
        }
    }

    async fn record_history(&self, url: &str, title: Option<String>, source: HistorySource) {
        if let Err(e) = self.repository.add_history(url.trim(), title, source).await {
            tracing::warn!("Failed to record {} in history: {}", url, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::youtube::mock::{at, video, Failure, MockPlatform};
    use tempfile::TempDir;

    const CHANNEL_URL: &str = "https://www.youtube.com/channel/UC1";

    async fn setup() -> (TempDir, Arc<MockPlatform>, Pipeline) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let repository = Repository::open(db_path.to_str().unwrap()).await.unwrap();

        let platform = Arc::new(MockPlatform::new());
        platform.add_channel("UC1", "Rust Talks");
        platform.add_upload(video("vid00000001", "UC1", at(1)));
        platform.add_upload(video("vid00000002", "UC1", at(2)));
        platform.add_upload(video("vid00000003", "UC1", at(3)));

        let pipeline = Pipeline::new(repository, platform.clone(), PipelineSettings::default());
        (dir, platform, pipeline)
    }

    async fn make_stale(pipeline: &Pipeline, channel_id: &str) {
        let repo = pipeline.repository();
        let mut channel = repo.get_channel(channel_id).await.unwrap().unwrap();
        channel.last_fetched = Utc::now() - Duration::hours(48);
        repo.put_channel(channel).await.unwrap();
    }

    fn ids(listing: &ChannelListing) -> Vec<&str> {
        listing.videos.iter().map(|v| v.id.as_str()).collect()
    }

    #[tokio::test]
    async fn fresh_channel_is_fetched_once() {
        let (_dir, platform, pipeline) = setup().await;

        let first = pipeline.load_channel("UC1").await.unwrap();
        let second = pipeline.load_channel("UC1").await.unwrap();

        assert_eq!(first.channel, second.channel);
        assert_eq!(ids(&second), vec!["vid00000003", "vid00000002", "vid00000001"]);
        assert_eq!(platform.channel_calls(), 1);
        assert_eq!(platform.page_calls(), 1);
    }

    #[tokio::test]
    async fn upstream_failure_serves_stale_cache() {
        let (_dir, platform, pipeline) = setup().await;
        pipeline.load_channel("UC1").await.unwrap();
        make_stale(&pipeline, "UC1").await;

        platform.set_failure(Some(Failure::Upstream));
        let listing = pipeline.load_channel("UC1").await.unwrap();
        assert_eq!(listing.channel.title, "Rust Talks");
        assert_eq!(listing.videos.len(), 3);

        platform.set_failure(Some(Failure::Quota));
        assert!(pipeline.load_channel("UC1").await.is_ok());
        assert_eq!(platform.channel_calls(), 3);
    }

    #[tokio::test]
    async fn failure_without_cache_propagates() {
        let (_dir, platform, pipeline) = setup().await;
        platform.set_failure(Some(Failure::Quota));

        let err = pipeline.load_channel("UC1").await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded));
    }

    #[tokio::test]
    async fn channel_without_uploads_lists_no_videos() {
        let (_dir, platform, pipeline) = setup().await;
        platform.add_channel("UCquiet", "Quiet");
        platform.remove_uploads_listing("UCquiet");

        let listing = pipeline.load_channel("UCquiet").await.unwrap();
        assert_eq!(listing.channel.title, "Quiet");
        assert!(listing.videos.is_empty());
        assert!(pipeline
            .repository()
            .get_channel("UCquiet")
            .await
            .unwrap()
            .is_some());

        // Uploads that later go private keep the cached ones.
        pipeline.load_channel("UC1").await.unwrap();
        make_stale(&pipeline, "UC1").await;
        platform.remove_uploads_listing("UC1");
        let listing = pipeline.load_channel("UC1").await.unwrap();
        assert_eq!(listing.videos.len(), 3);
    }

    #[tokio::test]
    async fn missing_channel_is_not_masked_by_cache() {
        let (_dir, _platform, pipeline) = setup().await;
        let gone = ChannelRecord {
            id: "UCgone".to_string(),
            title: "Deleted".to_string(),
            description: String::new(),
            thumbnail_url: String::new(),
            url: "https://www.youtube.com/channel/UCgone".to_string(),
            last_fetched: Utc::now() - Duration::days(30),
        };
        pipeline.repository().put_channel(gone).await.unwrap();

        let err = pipeline.load_channel("UCgone").await.unwrap_err();
        assert!(matches!(err, AppError::ChannelNotFound(_)));
    }

    #[tokio::test]
    async fn stale_refresh_only_adds_newer_uploads() {
        let (_dir, platform, pipeline) = setup().await;
        platform.set_page_size(2);
        pipeline.load_channel("UC1").await.unwrap();
        assert_eq!(platform.page_calls(), 2);

        platform.add_upload(video("vid00000005", "UC1", at(5)));
        platform.rename_channel("UC1", "Rust Talks 2");
        make_stale(&pipeline, "UC1").await;

        let listing = pipeline.load_channel("UC1").await.unwrap();
        assert_eq!(listing.channel.title, "Rust Talks 2");
        assert_eq!(
            ids(&listing),
            vec!["vid00000005", "vid00000003", "vid00000002", "vid00000001"]
        );
        // [5, 3] crosses the cutoff, so one page is enough.
        assert_eq!(platform.page_calls(), 3);
    }

    #[tokio::test]
    async fn cached_transcript_is_reused() {
        let (_dir, platform, pipeline) = setup().await;
        platform.add_transcript("vid00000001", &["hello", "there"]);

        let first = pipeline.transcript("vid00000001").await.unwrap();
        platform.set_failure(Some(Failure::Upstream));
        let second = pipeline.transcript("vid00000001").await.unwrap();

        assert_eq!(first.as_deref(), Some("hello there"));
        assert_eq!(second, first);
        assert_eq!(platform.transcript_calls(), 1);
    }

    #[tokio::test]
    async fn transcripts_survive_metadata_refresh() {
        let (_dir, platform, pipeline) = setup().await;
        pipeline.load_channel("UC1").await.unwrap();
        platform.add_transcript("vid00000002", &["kept"]);
        pipeline.transcript("vid00000002").await.unwrap();

        make_stale(&pipeline, "UC1").await;
        pipeline.load_channel("UC1").await.unwrap();

        let video = pipeline
            .repository()
            .get_video("vid00000002")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(video.transcript.as_deref(), Some("kept"));
        assert_eq!(video.title, "Video vid00000002");
    }

    #[tokio::test]
    async fn transcript_failure_is_none_and_not_cached() {
        let (_dir, platform, pipeline) = setup().await;

        assert_eq!(pipeline.transcript("vid00000001").await.unwrap(), None);
        platform.set_failure(Some(Failure::Upstream));
        assert_eq!(pipeline.transcript("vid00000002").await.unwrap(), None);

        assert!(pipeline
            .repository()
            .get_video("vid00000002")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn video_url_resolves_to_its_channel() {
        let (_dir, platform, pipeline) = setup().await;

        let listing = pipeline
            .channel_for_url(
                "https://youtu.be/vid00000002",
                false,
                HistorySource::Api,
            )
            .await
            .unwrap();
        assert_eq!(listing.channel.id, "UC1");
        assert_eq!(platform.video_calls(), 1);
    }

    #[tokio::test]
    async fn channel_requests_land_in_history() {
        let (_dir, _platform, pipeline) = setup().await;
        pipeline
            .channel_for_url(CHANNEL_URL, false, HistorySource::Cli)
            .await
            .unwrap();
        pipeline
            .channel_for_url(CHANNEL_URL, false, HistorySource::Cli)
            .await
            .unwrap();

        let history = pipeline.repository().recent_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].url, CHANNEL_URL);
        assert_eq!(history[0].title.as_deref(), Some("Rust Talks"));
        assert_eq!(history[0].access_count, 2);
        assert_eq!(history[0].source, "cli");
    }

    #[tokio::test]
    async fn listing_with_transcripts_prefetches_missing_ones() {
        let (_dir, platform, pipeline) = setup().await;
        platform.add_transcript("vid00000001", &["one"]);
        platform.add_transcript("vid00000003", &["three"]);

        let listing = pipeline
            .channel_for_url(CHANNEL_URL, true, HistorySource::Api)
            .await
            .unwrap();

        let transcripts: Vec<_> = listing
            .videos
            .iter()
            .map(|v| v.transcript.as_deref())
            .collect();
        assert_eq!(transcripts, vec![Some("three"), None, Some("one")]);
        assert_eq!(platform.transcript_calls(), 3);
    }

    #[tokio::test]
    async fn prefetching_listing_runs_on_a_spawned_task() {
        let (_dir, platform, pipeline) = setup().await;
        platform.add_transcript("vid00000002", &["two"]);
        let pipeline = Arc::new(pipeline);

        let task = tokio::spawn({
            let pipeline = pipeline.clone();
            async move {
                pipeline
                    .channel_for_url(CHANNEL_URL, true, HistorySource::Api)
                    .await
            }
        });
        let listing = task.await.unwrap().unwrap();
        assert_eq!(listing.videos[1].transcript.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn refresh_touches_only_stale_channels() {
        let (_dir, platform, pipeline) = setup().await;
        platform.add_channel("UC2", "Systems");
        pipeline.load_channel("UC1").await.unwrap();
        pipeline.load_channel("UC2").await.unwrap();
        make_stale(&pipeline, "UC2").await;

        let summary = pipeline.refresh_stale_channels().await.unwrap();
        assert_eq!(summary.refreshed, 1);
        assert_eq!(summary.fresh, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(platform.channel_calls(), 3);
    }

    #[tokio::test]
    async fn refresh_failures_are_counted_not_fatal() {
        let (_dir, platform, pipeline) = setup().await;
        pipeline.load_channel("UC1").await.unwrap();
        make_stale(&pipeline, "UC1").await;
        platform.set_failure(Some(Failure::Upstream));

        let summary = pipeline.refresh_stale_channels().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.refreshed, 0);
    }

    #[tokio::test]
    async fn prompt_fills_template_and_links() {
        let (_dir, platform, pipeline) = setup().await;
        pipeline.load_channel("UC1").await.unwrap();
        platform.add_transcript("vid00000003", &["lifetimes", "explained"]);

        let result = pipeline
            .prompt("https://www.youtube.com/watch?v=vid00000003", Some("summarize"))
            .await
            .unwrap();

        assert_eq!(result.video_id, "vid00000003");
        assert_eq!(result.template, "summarize");
        assert!(result.prompt.ends_with("lifetimes explained"));
        assert!(result.links.claude.starts_with("https://claude.ai?text=Summarize"));
    }

    #[tokio::test]
    async fn prompt_without_transcript_is_unavailable() {
        let (_dir, _platform, pipeline) = setup().await;
        let err = pipeline.prompt("vid00000001", None).await.unwrap_err();
        assert!(matches!(err, AppError::TranscriptUnavailable(_)));
    }
}
