mod client;
mod metadata;
mod resolver;
mod transcript;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{VideoPlatform, YouTubeClient};
pub use metadata::MetadataFetcher;
pub use resolver::{Reference, UrlResolver};
pub use transcript::TranscriptFetcher;
