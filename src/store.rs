#![forbid(unsafe_code)]

//! Catalogue persistence layer: channels, videos, tag tables, the search
//! row and the local-file index all live in one SQLite database under the
//! archive root.
//!
//! Every ordering-relevant mutation ends with [`ArchiveStore::regenerate_upload_index`]
//! so that `upload_idx` stays a contiguous `1..=N` permutation per channel
//! (1 = oldest upload). The download chain and the checkpoint arithmetic
//! both lean on that invariant.

use std::path::Path;

use anyhow::{Context, Result};
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};

/// Fixed-width synthetic IDs minted for videos that never existed on the
/// origin platform (manual catalogue entries).
pub fn is_synthetic_id(id: &str) -> bool {
    id.len() > 4 && id.starts_with("__") && id.ends_with("__")
}

fn format_hex_video_id(n: u64) -> String {
    format!("__{n:#07x}__")
}

/// One tracked channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    pub channel_id: String,
    pub channel_name: String,
    #[serde(default)]
    pub channel_description: String,
    #[serde(default)]
    pub thumb_url: String,
    #[serde(default)]
    pub talent_name: String,
    /// Highest `upload_idx` already fed to the download chain.
    #[serde(default)]
    pub checkpoint_idx: i64,
}

/// One catalogued video, exactly as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    /// ISO-8601 UTC timestamp; for live streams this is the scheduled start.
    pub upload_date: String,
    /// Seconds; 0 means the origin had no usable duration yet.
    pub duration: i64,
    #[serde(default)]
    pub thumb_url: String,
    #[serde(default)]
    pub upload_idx: i64,
}

/// Video row as the listings and search results present it, joined with
/// the channel name and the local file path when known.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoOverview {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    pub upload_date: String,
    pub duration: i64,
    pub thumb_url: String,
    pub upload_idx: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalFileRecord {
    pub video_id: String,
    pub video_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_path: Option<String>,
}

/// Outcome of an insert with a duplicate pre-check. A duplicate is the
/// normal sync halting condition, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Exactly one way to move a channel checkpoint per call.
#[derive(Debug, Clone)]
pub enum CheckpointChange {
    /// Set to an absolute upload index.
    Index(i64),
    /// Set to the upload index of this video within the channel.
    AtVideo(String),
    /// Add a (possibly negative) delta to the current value.
    Offset(i64),
}

/// `Invalid` covers unknown videos and out-of-range results; callers treat
/// it as a no-op sentinel, not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointUpdate {
    Updated(i64),
    Invalid,
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    // `journal_mode` returns a row, which libsql's `execute_batch` rejects,
    // so it has to go through `query`.
    conn.query("PRAGMA journal_mode=WAL", params![]).await?;
    conn.execute_batch(
        r#"
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS channel_list (
            channel_id TEXT PRIMARY KEY,
            channel_name TEXT NOT NULL,
            channel_description TEXT DEFAULT '',
            thumb_url TEXT DEFAULT '',
            talent_name TEXT NOT NULL DEFAULT '',
            checkpoint_idx INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS video_list (
            video_id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL,
            title TEXT NOT NULL,
            upload_date TEXT NOT NULL,
            duration INTEGER NOT NULL DEFAULT 0,
            thumb_url TEXT DEFAULT '',
            upload_idx INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS talent_participation (
            talent_name TEXT NOT NULL,
            video_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS stream_type (
            stream_type TEXT NOT NULL,
            video_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS search_video (
            video_id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT '',
            tagged_title TEXT NOT NULL DEFAULT '',
            talents TEXT NOT NULL DEFAULT '',
            stream_types TEXT NOT NULL DEFAULT ''
        );

        CREATE TABLE IF NOT EXISTS local_videos (
            video_id TEXT PRIMARY KEY,
            video_path TEXT NOT NULL,
            thumb_path TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_video_channel ON video_list(channel_id);
        CREATE INDEX IF NOT EXISTS idx_video_upload_date ON video_list(upload_date);
        CREATE INDEX IF NOT EXISTS idx_talent_video ON talent_participation(video_id);
        CREATE INDEX IF NOT EXISTS idx_talent_name ON talent_participation(talent_name);
        CREATE INDEX IF NOT EXISTS idx_stream_type_video ON stream_type(video_id);
        "#,
    )
    .await?;
    Ok(())
}

const OVERVIEW_SELECT: &str = r#"
    SELECT v.video_id, v.channel_id, v.title, v.upload_date, v.duration,
           v.thumb_url, v.upload_idx, c.channel_name, l.video_path
    FROM video_list v
    LEFT JOIN channel_list c ON c.channel_id = v.channel_id
    LEFT JOIN local_videos l ON l.video_id = v.video_id
"#;

/// Single shared handle over the catalogue database.
#[derive(Clone)]
pub struct ArchiveStore {
    pub(crate) conn: Connection,
}

impl ArchiveStore {
    /// Opens (and if necessary creates) the SQLite DB and ensures the
    /// expected schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating archive directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening archive DB {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// SQLite bumps `data_version` whenever another connection commits,
    /// which is all the backend cache needs for invalidation.
    pub async fn data_version(&self) -> Result<i64> {
        let mut rows = self.conn.query("PRAGMA data_version", params![]).await?;
        let row = rows.next().await?.context("missing data_version row")?;
        Ok(row.get(0)?)
    }

    // ---- channels ----

    /// Inserts the channel or refreshes its origin-provided metadata.
    /// Curated fields (`talent_name`, `checkpoint_idx`) survive updates.
    pub async fn upsert_channel(&self, record: &ChannelRecord) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO channel_list (
                    channel_id, channel_name, channel_description, thumb_url,
                    talent_name, checkpoint_idx
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(channel_id) DO UPDATE SET
                    channel_name = excluded.channel_name,
                    channel_description = excluded.channel_description,
                    thumb_url = excluded.thumb_url
                "#,
                params![
                    record.channel_id.as_str(),
                    record.channel_name.as_str(),
                    record.channel_description.as_str(),
                    record.thumb_url.as_str(),
                    record.talent_name.as_str(),
                    record.checkpoint_idx,
                ],
            )
            .await?;
        Ok(())
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Option<ChannelRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT channel_id, channel_name, channel_description, thumb_url,
                       talent_name, checkpoint_idx
                FROM channel_list
                WHERE channel_id = ?1
                "#,
            )
            .await?;
        let mut rows = stmt.query([channel_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_channel(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Channels in insertion order, which is also the chain scan order.
    pub async fn list_channels(&self) -> Result<Vec<ChannelRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT channel_id, channel_name, channel_description, thumb_url,
                       talent_name, checkpoint_idx
                FROM channel_list
                ORDER BY rowid ASC
                "#,
            )
            .await?;
        let mut rows = stmt.query(params![]).await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            channels.push(row_to_channel(&row)?);
        }
        Ok(channels)
    }

    pub async fn set_talent_name(&self, channel_id: &str, talent_name: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE channel_list SET talent_name = ?2 WHERE channel_id = ?1",
                params![channel_id, talent_name],
            )
            .await?;
        Ok(changed > 0)
    }

    /// Removes the channel and every trace of its videos in one transaction.
    pub async fn delete_channel(&self, channel_id: &str) -> Result<bool> {
        if self.get_channel(channel_id).await?.is_none() {
            return Ok(false);
        }
        let tx = self.conn.transaction().await?;
        for table in ["talent_participation", "stream_type", "search_video", "local_videos"] {
            tx.execute(
                &format!(
                    "DELETE FROM {table} WHERE video_id IN \
                     (SELECT video_id FROM video_list WHERE channel_id = ?1)"
                ),
                params![channel_id],
            )
            .await?;
        }
        tx.execute(
            "DELETE FROM video_list WHERE channel_id = ?1",
            params![channel_id],
        )
        .await?;
        tx.execute(
            "DELETE FROM channel_list WHERE channel_id = ?1",
            params![channel_id],
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    // ---- videos ----

    pub async fn video_exists(&self, video_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM video_list WHERE video_id = ?1",
                [video_id],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    pub async fn channel_video_ids(&self, channel_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT video_id FROM video_list WHERE channel_id = ?1")
            .await?;
        let mut rows = stmt.query([channel_id]).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    /// Inserts a video unless the ID is already catalogued. Callers are
    /// responsible for reindexing the channel afterwards.
    pub async fn insert_video(&self, record: &VideoRecord) -> Result<InsertOutcome> {
        if self.video_exists(&record.video_id).await? {
            return Ok(InsertOutcome::AlreadyExists);
        }
        self.conn
            .execute(
                r#"
                INSERT INTO video_list (
                    video_id, channel_id, title, upload_date, duration,
                    thumb_url, upload_idx
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    record.video_id.as_str(),
                    record.channel_id.as_str(),
                    record.title.as_str(),
                    record.upload_date.as_str(),
                    record.duration,
                    record.thumb_url.as_str(),
                    record.upload_idx,
                ],
            )
            .await?;
        Ok(InsertOutcome::Inserted)
    }

    pub async fn get_video(&self, video_id: &str) -> Result<Option<VideoRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT video_id, channel_id, title, upload_date, duration,
                       thumb_url, upload_idx
                FROM video_list
                WHERE video_id = ?1
                "#,
            )
            .await?;
        let mut rows = stmt.query([video_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_video(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn get_video_overview(&self, video_id: &str) -> Result<Option<VideoOverview>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{OVERVIEW_SELECT} WHERE v.video_id = ?1"))
            .await?;
        let mut rows = stmt.query([video_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_overview(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Rewrites the editable fields of a video. The caller reindexes the
    /// channel and refreshes the search row.
    pub async fn update_video(
        &self,
        video_id: &str,
        title: &str,
        upload_date: &str,
        duration: i64,
        thumb_url: &str,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                r#"
                UPDATE video_list
                SET title = ?2, upload_date = ?3, duration = ?4, thumb_url = ?5
                WHERE video_id = ?1
                "#,
                params![video_id, title, upload_date, duration, thumb_url],
            )
            .await?;
        Ok(changed > 0)
    }

    pub async fn set_video_duration(&self, video_id: &str, duration: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE video_list SET duration = ?2 WHERE video_id = ?1",
                params![video_id, duration],
            )
            .await?;
        Ok(())
    }

    /// Real (non-synthetic) videos whose stored duration is still zero.
    pub async fn zero_duration_video_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT video_id FROM video_list
                WHERE duration = 0
                  AND video_id NOT LIKE '\_\_%\_\_' ESCAPE '\'
                "#,
            )
            .await?;
        let mut rows = stmt.query(params![]).await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    /// Deletes the video plus its tags, search row and local-file row, then
    /// reindexes the owning channel. Returns the channel ID when the video
    /// existed.
    pub async fn delete_video(&self, video_id: &str) -> Result<Option<String>> {
        let Some(video) = self.get_video(video_id).await? else {
            return Ok(None);
        };
        let tx = self.conn.transaction().await?;
        for table in ["talent_participation", "stream_type", "search_video", "local_videos"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE video_id = ?1"),
                params![video_id],
            )
            .await?;
        }
        tx.execute(
            "DELETE FROM video_list WHERE video_id = ?1",
            params![video_id],
        )
        .await?;
        tx.commit().await?;
        self.regenerate_upload_index(&video.channel_id).await?;
        Ok(Some(video.channel_id))
    }

    pub async fn count_channel_videos(&self, channel_id: &str) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM video_list WHERE channel_id = ?1",
                [channel_id],
            )
            .await?;
        let row = rows.next().await?.context("missing count row")?;
        Ok(row.get(0)?)
    }

    pub async fn count_videos(&self) -> Result<i64> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM video_list", params![]).await?;
        let row = rows.next().await?.context("missing count row")?;
        Ok(row.get(0)?)
    }

    /// One channel page, newest upload first (`upload_idx` descending).
    /// Pages are 1-based.
    pub async fn list_channel_videos(
        &self,
        channel_id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<VideoOverview>> {
        let offset = page.saturating_sub(1) * page_size;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{OVERVIEW_SELECT} WHERE v.channel_id = ?1 \
                 ORDER BY v.upload_idx DESC LIMIT ?2 OFFSET ?3"
            ))
            .await?;
        let mut rows = stmt
            .query(params![channel_id, page_size as i64, offset as i64])
            .await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_overview(&row)?);
        }
        Ok(videos)
    }

    /// One global page, newest first across all channels.
    pub async fn list_videos(&self, page: usize, page_size: usize) -> Result<Vec<VideoOverview>> {
        let offset = page.saturating_sub(1) * page_size;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{OVERVIEW_SELECT} ORDER BY v.upload_date DESC, v.video_id DESC \
                 LIMIT ?1 OFFSET ?2"
            ))
            .await?;
        let mut rows = stmt.query(params![page_size as i64, offset as i64]).await?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next().await? {
            videos.push(row_to_overview(&row)?);
        }
        Ok(videos)
    }

    /// Reassigns `upload_idx` as `1..=N` by ascending upload date (video ID
    /// breaks ties) inside one transaction. O(N) per call, which the
    /// original data volumes tolerate comfortably.
    pub async fn regenerate_upload_index(&self, channel_id: &str) -> Result<()> {
        let ids = {
            let mut stmt = self
                .conn
                .prepare(
                    r#"
                    SELECT video_id FROM video_list
                    WHERE channel_id = ?1
                    ORDER BY upload_date ASC, video_id ASC
                    "#,
                )
                .await?;
            let mut rows = stmt.query([channel_id]).await?;
            let mut ids: Vec<String> = Vec::new();
            while let Some(row) = rows.next().await? {
                ids.push(row.get(0)?);
            }
            ids
        };

        let tx = self.conn.transaction().await?;
        for (pos, video_id) in ids.iter().enumerate() {
            tx.execute(
                "UPDATE video_list SET upload_idx = ?2 WHERE video_id = ?1",
                params![video_id.as_str(), (pos + 1) as i64],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ---- checkpoint ----

    pub async fn update_checkpoint(
        &self,
        channel_id: &str,
        change: CheckpointChange,
    ) -> Result<CheckpointUpdate> {
        let Some(channel) = self.get_channel(channel_id).await? else {
            return Ok(CheckpointUpdate::Invalid);
        };
        let target = match change {
            CheckpointChange::Index(idx) => idx,
            CheckpointChange::Offset(delta) => channel.checkpoint_idx + delta,
            CheckpointChange::AtVideo(video_id) => {
                match self.get_video(&video_id).await? {
                    Some(video) if video.channel_id == channel_id => video.upload_idx,
                    _ => return Ok(CheckpointUpdate::Invalid),
                }
            }
        };
        if target < 0 {
            return Ok(CheckpointUpdate::Invalid);
        }
        self.conn
            .execute(
                "UPDATE channel_list SET checkpoint_idx = ?2 WHERE channel_id = ?1",
                params![channel_id, target],
            )
            .await?;
        Ok(CheckpointUpdate::Updated(target))
    }

    /// Video sitting at a given upload index within the channel, if any.
    pub async fn video_at_index(&self, channel_id: &str, upload_idx: i64) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT video_id FROM video_list WHERE channel_id = ?1 AND upload_idx = ?2",
            )
            .await?;
        let mut rows = stmt.query(params![channel_id, upload_idx]).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(row.get(0)?))
        } else {
            Ok(None)
        }
    }

    // ---- synthetic IDs ----

    /// Smallest unused synthetic video ID, one past the highest ever
    /// minted. Gaps from deletions are never reused.
    pub async fn next_hex_video_id(&self) -> Result<String> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT video_id FROM video_list
                WHERE video_id LIKE '\_\_%\_\_' ESCAPE '\'
                "#,
            )
            .await?;
        let mut rows = stmt.query(params![]).await?;
        let mut max_seen: u64 = 0;
        while let Some(row) = rows.next().await? {
            let id: String = row.get(0)?;
            let inner = id.trim_matches('_');
            let hex = inner
                .strip_prefix("0x")
                .or_else(|| inner.strip_prefix("0X"))
                .unwrap_or(inner);
            if let Ok(value) = u64::from_str_radix(hex, 16) {
                max_seen = max_seen.max(value);
            }
        }
        Ok(format_hex_video_id(max_seen + 1))
    }

    // ---- search row ----

    pub async fn insert_search_row(
        &self,
        video_id: &str,
        title: &str,
        tagged_title: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO search_video (video_id, title, tagged_title)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(video_id) DO UPDATE SET
                    title = excluded.title,
                    tagged_title = excluded.tagged_title
                "#,
                params![video_id, title, tagged_title],
            )
            .await?;
        Ok(())
    }

    // ---- local files ----

    pub async fn upsert_local_video(&self, video_id: &str, video_path: &str) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO local_videos (video_id, video_path)
                VALUES (?1, ?2)
                ON CONFLICT(video_id) DO UPDATE SET
                    video_path = excluded.video_path
                "#,
                params![video_id, video_path],
            )
            .await?;
        Ok(())
    }

    pub async fn get_local_video(&self, video_id: &str) -> Result<Option<LocalFileRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT video_id, video_path, thumb_path FROM local_videos WHERE video_id = ?1")
            .await?;
        let mut rows = stmt.query([video_id]).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(LocalFileRecord {
                video_id: row.get(0)?,
                video_path: row.get(1)?,
                thumb_path: row.get(2)?,
            }))
        } else {
            Ok(None)
        }
    }

    /// Full-resync half of the scanner: any recorded file the walk did not
    /// see again is dropped.
    pub async fn prune_local_videos(&self, seen: &[String]) -> Result<usize> {
        let recorded = {
            let mut stmt = self.conn.prepare("SELECT video_id FROM local_videos").await?;
            let mut rows = stmt.query(params![]).await?;
            let mut ids: Vec<String> = Vec::new();
            while let Some(row) = rows.next().await? {
                ids.push(row.get(0)?);
            }
            ids
        };
        let mut pruned = 0;
        for video_id in recorded {
            if !seen.contains(&video_id) {
                self.conn
                    .execute(
                        "DELETE FROM local_videos WHERE video_id = ?1",
                        params![video_id.as_str()],
                    )
                    .await?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }
}

fn row_to_channel(row: &Row) -> Result<ChannelRecord> {
    Ok(ChannelRecord {
        channel_id: row.get(0)?,
        channel_name: row.get(1)?,
        channel_description: row.get(2)?,
        thumb_url: row.get(3)?,
        talent_name: row.get(4)?,
        checkpoint_idx: row.get(5)?,
    })
}

fn row_to_video(row: &Row) -> Result<VideoRecord> {
    Ok(VideoRecord {
        video_id: row.get(0)?,
        channel_id: row.get(1)?,
        title: row.get(2)?,
        upload_date: row.get(3)?,
        duration: row.get(4)?,
        thumb_url: row.get(5)?,
        upload_idx: row.get(6)?,
    })
}

fn row_to_overview(row: &Row) -> Result<VideoOverview> {
    Ok(VideoOverview {
        video_id: row.get(0)?,
        channel_id: row.get(1)?,
        title: row.get(2)?,
        upload_date: row.get(3)?,
        duration: row.get(4)?,
        thumb_url: row.get(5)?,
        upload_idx: row.get(6)?,
        channel_name: row.get(7)?,
        local_path: row.get(8)?,
    })
}
