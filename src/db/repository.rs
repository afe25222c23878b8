use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{ChannelRecord, HistoryEntry, HistorySource, VideoPatch, VideoRecord};

use super::schema::SCHEMA;

const CHANNEL_COLUMNS: &str = "id, title, description, thumbnail_url, url, last_fetched";
const VIDEO_COLUMNS: &str = "id, channel_id, title, description, thumbnail_url, url, published_at, transcript, transcript_fetched";
const HISTORY_COLUMNS: &str =
    "id, url, title, source, created_at, last_accessed, access_count, is_favorite";

const UPSERT_VIDEO: &str = r#"INSERT INTO videos (id, channel_id, title, description, thumbnail_url, url, published_at, transcript, transcript_fetched, updated_at)
       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
       ON CONFLICT(id) DO UPDATE SET
           channel_id = COALESCE(excluded.channel_id, videos.channel_id),
           title = COALESCE(excluded.title, videos.title),
           description = COALESCE(excluded.description, videos.description),
           thumbnail_url = COALESCE(excluded.thumbnail_url, videos.thumbnail_url),
           url = COALESCE(excluded.url, videos.url),
           published_at = COALESCE(excluded.published_at, videos.published_at),
           transcript = COALESCE(excluded.transcript, videos.transcript),
           transcript_fetched = COALESCE(excluded.transcript_fetched, videos.transcript_fetched),
           updated_at = excluded.updated_at"#;

/// SQLite-backed cache of channels, videos and submitted URLs.
#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        tracing::debug!("Opened cache database at {}", db_path);
        Ok(Self { conn })
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        Ok(())
    }

    // Channel operations

    pub async fn get_channel(&self, id: &str) -> Result<Option<ChannelRecord>> {
        let id = id.to_string();
        let channel = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"
                ))?;
                let channel = stmt.query_row(params![id], channel_from_row).optional()?;
                Ok(channel)
            })
            .await?;
        Ok(channel)
    }

    pub async fn put_channel(&self, channel: ChannelRecord) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO channels (id, title, description, thumbnail_url, url, last_fetched)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                       ON CONFLICT(id) DO UPDATE SET
                           title = excluded.title,
                           description = excluded.description,
                           thumbnail_url = excluded.thumbnail_url,
                           url = excluded.url,
                           last_fetched = excluded.last_fetched"#,
                    params![
                        channel.id,
                        channel.title,
                        channel.description,
                        channel.thumbnail_url,
                        channel.url,
                        format_timestamp(&channel.last_fetched),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_channels(&self) -> Result<Vec<ChannelRecord>> {
        let channels = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY title COLLATE NOCASE"
                ))?;
                let channels = stmt
                    .query_map([], channel_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(channels)
            })
            .await?;
        Ok(channels)
    }

    // Video operations

    pub async fn get_video(&self, id: &str) -> Result<Option<VideoRecord>> {
        let id = id.to_string();
        let video = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {VIDEO_COLUMNS} FROM videos WHERE id = ?1"))?;
                let video = stmt.query_row(params![id], video_from_row).optional()?;
                Ok(video)
            })
            .await?;
        Ok(video)
    }

    /// Newest first; rows inserted later win ties on `published_at`.
    pub async fn get_videos(&self, channel_id: &str) -> Result<Vec<VideoRecord>> {
        let channel_id = channel_id.to_string();
        let videos = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {VIDEO_COLUMNS} FROM videos
                       WHERE channel_id = ?1
                       ORDER BY published_at DESC NULLS LAST, rowid DESC"#
                ))?;
                let videos = stmt
                    .query_map(params![channel_id], video_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(videos)
            })
            .await?;
        Ok(videos)
    }

    pub async fn put_video(&self, patch: VideoPatch) -> Result<()> {
        let updated_at = format_timestamp(&Utc::now());
        self.conn
            .call(move |conn| {
                upsert_video(conn, &patch, &updated_at)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Upserts a batch of patches in one transaction.
    pub async fn put_videos(&self, patches: Vec<VideoPatch>) -> Result<usize> {
        if patches.is_empty() {
            return Ok(0);
        }
        let updated_at = format_timestamp(&Utc::now());
        let count = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for patch in &patches {
                    upsert_video(&tx, patch, &updated_at)?;
                }
                tx.commit()?;
                Ok(patches.len())
            })
            .await?;
        Ok(count)
    }

    pub async fn latest_published_at(&self, channel_id: &str) -> Result<Option<DateTime<Utc>>> {
        let channel_id = channel_id.to_string();
        let latest = self
            .conn
            .call(move |conn| {
                let latest: Option<String> = conn.query_row(
                    "SELECT MAX(published_at) FROM videos WHERE channel_id = ?1",
                    params![channel_id],
                    |row| row.get(0),
                )?;
                Ok(latest)
            })
            .await?;
        Ok(latest.and_then(|s| parse_datetime(&s)))
    }

    // URL history

    pub async fn add_history(
        &self,
        url: &str,
        title: Option<String>,
        source: HistorySource,
    ) -> Result<i64> {
        let url = url.to_string();
        let now = format_timestamp(&Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO url_history (url, title, source, created_at, last_accessed)
                       VALUES (?1, ?2, ?3, ?4, ?4)
                       ON CONFLICT(url) DO UPDATE SET
                           title = COALESCE(excluded.title, url_history.title),
                           last_accessed = excluded.last_accessed,
                           access_count = url_history.access_count + 1"#,
                    params![url, title, source.as_str(), now],
                )?;
                let id: i64 = conn.query_row(
                    "SELECT id FROM url_history WHERE url = ?1",
                    params![url],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    pub async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let limit = limit as i64;
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {HISTORY_COLUMNS} FROM url_history ORDER BY last_accessed DESC, id DESC LIMIT ?1"
                ))?;
                let entries = stmt
                    .query_map(params![limit], history_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    pub async fn favorite_history(&self) -> Result<Vec<HistoryEntry>> {
        let entries = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {HISTORY_COLUMNS} FROM url_history WHERE is_favorite = 1 ORDER BY last_accessed DESC"
                ))?;
                let entries = stmt
                    .query_map([], history_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    /// Flips the favorite flag, returning the new state or `None` for an unknown id.
    pub async fn toggle_favorite(&self, id: i64) -> Result<Option<bool>> {
        let state = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE url_history SET is_favorite = NOT is_favorite WHERE id = ?1",
                    params![id],
                )?;
                if changed == 0 {
                    return Ok(None);
                }
                let is_favorite: i64 = conn.query_row(
                    "SELECT is_favorite FROM url_history WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                Ok(Some(is_favorite != 0))
            })
            .await?;
        Ok(state)
    }

    /// Case-insensitive substring search over url and title.
    pub async fn search_history(&self, query: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let pattern = format!("%{}%", escape_like(query));
        let limit = limit as i64;
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {HISTORY_COLUMNS} FROM url_history
                       WHERE url LIKE ?1 ESCAPE '\' OR title LIKE ?1 ESCAPE '\'
                       ORDER BY last_accessed DESC
                       LIMIT ?2"#
                ))?;
                let entries = stmt
                    .query_map(params![pattern, limit], history_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    /// Removes non-favorite entries not accessed within `days`.
    pub async fn cleanup_history(&self, days: i64) -> Result<usize> {
        let cutoff = format_timestamp(&(Utc::now() - Duration::days(days)));
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM url_history WHERE last_accessed < ?1 AND is_favorite = 0",
                    params![cutoff],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }
}

fn upsert_video(
    conn: &rusqlite::Connection,
    patch: &VideoPatch,
    updated_at: &str,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(UPSERT_VIDEO)?;
    stmt.execute(params![
        patch.id,
        patch.channel_id,
        patch.title,
        patch.description,
        patch.thumbnail_url,
        patch.url,
        patch.published_at.as_ref().map(format_timestamp),
        patch.transcript,
        patch.transcript_fetched.as_ref().map(format_timestamp),
        updated_at,
    ])
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn channel_from_row(row: &Row) -> rusqlite::Result<ChannelRecord> {
    Ok(ChannelRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        thumbnail_url: row.get(3)?,
        url: row.get(4)?,
        last_fetched: row
            .get::<_, String>(5)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_default(),
    })
}

fn video_from_row(row: &Row) -> rusqlite::Result<VideoRecord> {
    Ok(VideoRecord {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        thumbnail_url: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        url: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        published_at: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| parse_datetime(&s)),
        transcript: row.get(7)?,
        transcript_fetched: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| parse_datetime(&s)),
    })
}

fn history_from_row(row: &Row) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        source: row.get(3)?,
        created_at: row
            .get::<_, String>(4)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_default(),
        last_accessed: row
            .get::<_, String>(5)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_default(),
        access_count: row.get(6)?,
        is_favorite: row.get::<_, i64>(7)? != 0,
    })
}
