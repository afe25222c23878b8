mod channel;
mod history;
mod video;

pub use channel::{channel_url, ChannelListing, ChannelMetadata, ChannelRecord};
pub use history::{HistoryEntry, HistorySource};
pub use video::{video_url, TranscriptSegment, VideoMetadata, VideoPage, VideoPatch, VideoRecord};
