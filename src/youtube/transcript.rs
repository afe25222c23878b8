use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::VideoPlatform;
use crate::error::{AppError, Result};
use crate::models::TranscriptSegment;

static TEXT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<text([^>]*)>(.*?)</text>").expect("valid text regex"));
static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("valid attribute regex"));
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x?)([0-9a-fA-F]+);").expect("valid entity regex"));

/// A caption track advertised by the player.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionTrack {
    pub base_url: String,
    pub language_code: String,
    pub is_generated: bool,
}

pub struct TranscriptFetcher {
    platform: Arc<dyn VideoPlatform>,
}

impl TranscriptFetcher {
    pub fn new(platform: Arc<dyn VideoPlatform>) -> Self {
        Self { platform }
    }

    /// Full transcript text for a video, timing discarded.
    pub async fn fetch_transcript(&self, video_id: &str) -> Result<String> {
        let segments = self.platform.get_transcript(video_id).await?;
        let text = flatten(&segments);

        if text.is_empty() {
            return Err(AppError::TranscriptUnavailable(video_id.to_string()));
        }
        tracing::debug!(
            "Transcript for {}: {} segments, {} chars",
            video_id,
            segments.len(),
            text.len()
        );
        Ok(text)
    }
}

/// Joins segment text in order with single spaces, skipping blank segments.
pub fn flatten(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Picks the track to download: preferred languages in order, manual
/// captions before auto-generated ones, otherwise whatever comes first.
pub fn select_track<'a>(tracks: &'a [CaptionTrack], languages: &[String]) -> Option<&'a CaptionTrack> {
    for language in languages {
        let matching = |generated: bool| {
            tracks
                .iter()
                .find(|t| t.is_generated == generated && t.language_code.eq_ignore_ascii_case(language))
        };
        if let Some(track) = matching(false).or_else(|| matching(true)) {
            return Some(track);
        }
    }
    tracks.first()
}

/// Parses a timed-text XML document into segments.
pub fn parse_timed_text(xml: &str) -> Vec<TranscriptSegment> {
    TEXT_RE
        .captures_iter(xml)
        .map(|caps| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let mut start = 0.0;
            let mut duration = 0.0;
            for attr in ATTR_RE.captures_iter(attrs) {
                let value = attr[2].parse::<f64>().unwrap_or(0.0);
                match &attr[1] {
                    "start" => start = value,
                    "dur" => duration = value,
                    _ => {}
                }
            }

            let raw = caps.get(2).map_or("", |m| m.as_str());
            TranscriptSegment {
                text: clean_text(raw),
                start,
                duration,
            }
        })
        .collect()
}

/// Decodes entities (captions are often escaped twice) and drops inline markup.
fn clean_text(raw: &str) -> String {
    let decoded = decode_entities(&decode_entities(raw));
    let stripped = TAG_RE.replace_all(&decoded, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'");

    NUMERIC_ENTITY_RE
        .replace_all(&text, |caps: &regex::Captures| {
            let radix = if caps[1].is_empty() { 10 } else { 16 };
            u32::from_str_radix(&caps[2], radix)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
