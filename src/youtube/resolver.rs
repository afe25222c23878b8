use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;

use super::VideoPlatform;
use crate::error::{AppError, Result};

static VIDEO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:/watch/?\?(?:[^#]*&)?v=|youtu\.be/)([0-9A-Za-z_-]{11})").expect("valid video regex")
});
static CHANNEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/channel/([^/?&#]+)").expect("valid channel regex"));
static HANDLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:@|c/|user/)([^/?&#]+)").expect("valid handle regex")
});
static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z_-]{11}$").expect("valid video id regex"));

/// What a submitted URL points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Reference {
    Video(String),
    Channel(String),
}

pub struct UrlResolver {
    platform: Arc<dyn VideoPlatform>,
}

impl UrlResolver {
    pub fn new(platform: Arc<dyn VideoPlatform>) -> Self {
        Self { platform }
    }

    /// Resolves a raw URL. Only handle-style channel URLs cost a remote call.
    pub async fn resolve(&self, raw_url: &str) -> Result<Reference> {
        let url = raw_url.trim();
        if url.is_empty() {
            return Err(AppError::InvalidUrl("empty URL".to_string()));
        }

        if let Some(id) = capture(&VIDEO_RE, url) {
            return Ok(Reference::Video(id.to_string()));
        }

        if let Some(id) = capture(&CHANNEL_RE, url) {
            return Ok(Reference::Channel(id.to_string()));
        }

        if let Some(handle) = capture(&HANDLE_RE, url) {
            let handle = urlencoding::decode(handle)
                .map(|h| h.into_owned())
                .unwrap_or_else(|_| handle.to_string());

            tracing::debug!("Searching for channel handle '{}'", handle);
            let found = self.platform.search_channels(&handle, 1).await?;
            return found
                .into_iter()
                .next()
                .map(Reference::Channel)
                .ok_or(AppError::ChannelNotFound(handle));
        }

        Err(AppError::InvalidUrl(url.to_string()))
    }

    /// Video id from a URL or a bare 11-character id.
    pub async fn video_id(&self, input: &str) -> Result<String> {
        let input = input.trim();
        if VIDEO_ID_RE.is_match(input) {
            return Ok(input.to_string());
        }

        match self.resolve(input).await? {
            Reference::Video(id) => Ok(id),
            Reference::Channel(_) => Err(AppError::InvalidUrl(format!(
                "{} is a channel, not a video",
                input
            ))),
        }
    }
}

fn capture<'a>(re: &Regex, text: &'a str) -> Option<&'a str> {
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}
