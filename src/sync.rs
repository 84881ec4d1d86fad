#![forbid(unsafe_code)]

//! Incremental catalogue sync against an external metadata provider.
//!
//! The provider lists a channel's uploads newest-first. Because the
//! catalogue only ever grows from the head, the merge can stop at the
//! first already-known ID: everything after it is guaranteed to be known
//! too. A fresh channel walks every page once; subsequent runs touch one
//! page in the common case.

use std::collections::HashSet;

use anyhow::{Context, Result, bail};

use crate::search::{TagKind, set_tags};
use crate::store::{ArchiveStore, ChannelRecord, InsertOutcome, VideoRecord, is_synthetic_id};
use crate::tokenize::Tokenizer;

/// Channel-level metadata as the origin reports it.
#[derive(Debug, Clone)]
pub struct ChannelMetadata {
    pub name: String,
    pub description: String,
    pub thumb_url: String,
}

/// One entry of an uploads listing page. Cheap: no per-video lookup has
/// happened yet.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub video_id: String,
    pub title: String,
}

/// Full per-video metadata, fetched only for IDs the catalogue is missing.
#[derive(Debug, Clone)]
pub struct VideoDetail {
    pub title: String,
    /// ISO-8601 UTC publication timestamp.
    pub published_at: String,
    pub duration_secs: i64,
    pub thumb_url: String,
    /// Scheduled live start, when the video was (or is) a live stream.
    pub scheduled_start: Option<String>,
}

/// Paginated read-only view of the origin platform. Implementations are
/// expected to surface a missing channel or video as an error.
pub trait MetadataProvider: Send + Sync {
    fn channel_metadata(&self, channel_id: &str) -> Result<ChannelMetadata>;

    /// Identifier of the channel's uploads collection.
    fn uploads_collection_id(&self, channel_id: &str) -> Result<String>;

    /// One newest-first page plus the cursor for the next one, if any.
    fn collection_page(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> Result<(Vec<UploadItem>, Option<String>)>;

    fn video_detail(&self, video_id: &str) -> Result<VideoDetail>;
}

/// Refreshes (or creates) the channel row from origin metadata. Curated
/// fields survive, see [`ArchiveStore::upsert_channel`].
pub async fn fetch_channel(
    store: &ArchiveStore,
    provider: &dyn MetadataProvider,
    channel_id: &str,
) -> Result<()> {
    let meta = provider
        .channel_metadata(channel_id)
        .with_context(|| format!("fetching channel metadata for {channel_id}"))?;
    store
        .upsert_channel(&ChannelRecord {
            channel_id: channel_id.to_owned(),
            channel_name: meta.name,
            channel_description: meta.description,
            thumb_url: meta.thumb_url,
            talent_name: String::new(),
            checkpoint_idx: 0,
        })
        .await
}

/// Merges new uploads into the catalogue and reindexes the channel.
/// Returns how many videos were inserted.
pub async fn fetch_uploads(
    store: &ArchiveStore,
    provider: &dyn MetadataProvider,
    tokenizer: &dyn Tokenizer,
    channel_id: &str,
) -> Result<usize> {
    let known: HashSet<String> = store.channel_video_ids(channel_id).await?.into_iter().collect();
    let collection_id = provider
        .uploads_collection_id(channel_id)
        .with_context(|| format!("resolving uploads collection for {channel_id}"))?;

    let mut inserted = 0;
    let mut cursor: Option<String> = None;
    'pages: loop {
        let (items, next_cursor) = provider
            .collection_page(&collection_id, cursor.as_deref())
            .with_context(|| format!("listing uploads of {channel_id}"))?;
        for item in items {
            if known.contains(&item.video_id) {
                // Everything past this point is older and already merged.
                break 'pages;
            }
            let detail = provider
                .video_detail(&item.video_id)
                .with_context(|| format!("fetching detail for {}", item.video_id))?;
            let upload_date = detail
                .scheduled_start
                .clone()
                .unwrap_or_else(|| detail.published_at.clone());
            let outcome = store
                .insert_video(&VideoRecord {
                    video_id: item.video_id.clone(),
                    channel_id: channel_id.to_owned(),
                    title: detail.title.clone(),
                    upload_date,
                    duration: detail.duration_secs,
                    thumb_url: detail.thumb_url.clone(),
                    upload_idx: 0,
                })
                .await?;
            if outcome == InsertOutcome::Inserted {
                store
                    .insert_search_row(
                        &item.video_id,
                        &detail.title,
                        &tokenizer.tokenize_title(&detail.title),
                    )
                    .await?;
                inserted += 1;
            }
        }
        match next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    store.regenerate_upload_index(channel_id).await?;
    log::info!("merged {inserted} new videos for {channel_id}");
    Ok(inserted)
}

/// Gives every untagged video of the channel its owner's talent tag.
/// Returns how many videos were tagged; a channel without a curated
/// talent name is left alone.
pub async fn backfill_owner_tag(store: &ArchiveStore, channel_id: &str) -> Result<usize> {
    let Some(channel) = store.get_channel(channel_id).await? else {
        bail!("unknown channel {channel_id}");
    };
    if channel.talent_name.is_empty() {
        return Ok(0);
    }

    let untagged = {
        let mut stmt = store
            .conn
            .prepare(
                r#"
                SELECT v.video_id FROM video_list v
                WHERE v.channel_id = ?1
                  AND NOT EXISTS (
                    SELECT 1 FROM talent_participation t WHERE t.video_id = v.video_id
                  )
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

    for video_id in &untagged {
        set_tags(
            store,
            video_id,
            TagKind::Talent,
            std::slice::from_ref(&channel.talent_name),
        )
        .await?;
    }
    Ok(untagged.len())
}

/// Re-queries detail for every real video whose stored duration is zero
/// (typically archived while still live) and patches it in place.
pub async fn repair_zero_durations(
    store: &ArchiveStore,
    provider: &dyn MetadataProvider,
) -> Result<usize> {
    let ids = store.zero_duration_video_ids().await?;
    let mut patched = 0;
    for video_id in &ids {
        let detail = provider
            .video_detail(video_id)
            .with_context(|| format!("re-fetching detail for {video_id}"))?;
        if detail.duration_secs > 0 {
            store.set_video_duration(video_id, detail.duration_secs).await?;
            patched += 1;
        }
    }
    Ok(patched)
}

/// Full sync pass over every tracked channel: metadata refresh, upload
/// merge, owner-tag backfill. Synthetic channels have no origin and are
/// skipped.
pub async fn sync_all(
    store: &ArchiveStore,
    provider: &dyn MetadataProvider,
    tokenizer: &dyn Tokenizer,
) -> Result<usize> {
    let channels = store.list_channels().await?;
    if channels.is_empty() {
        bail!("no channels in the catalogue; add one before syncing");
    }
    let mut total = 0;
    for channel in channels {
        if is_synthetic_id(&channel.channel_id) {
            log::debug!("skipping synthetic channel {}", channel.channel_id);
            continue;
        }
        fetch_channel(store, provider, &channel.channel_id).await?;
        total += fetch_uploads(store, provider, tokenizer, &channel.channel_id).await?;
        backfill_owner_tag(store, &channel.channel_id).await?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchOrder, SearchQuery, list_tags, search};
    use crate::store::testutil::{create_store, sample_channel, sample_video};
    use crate::tokenize::DefaultTokenizer;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory provider with scripted pages. Records which videos had
    /// their detail fetched and which pages were requested, so tests can
    /// assert what the sync actually looked at.
    #[derive(Default)]
    struct ScriptedProvider {
        channel: Option<ChannelMetadata>,
        pages: Vec<Vec<UploadItem>>,
        details: HashMap<String, VideoDetail>,
        inspected: Mutex<Vec<String>>,
        pages_served: Mutex<Vec<usize>>,
    }

    impl ScriptedProvider {
        fn item(video_id: &str, title: &str) -> UploadItem {
            UploadItem {
                video_id: video_id.to_owned(),
                title: title.to_owned(),
            }
        }

        fn detail(title: &str, published_at: &str, duration_secs: i64) -> VideoDetail {
            VideoDetail {
                title: title.to_owned(),
                published_at: published_at.to_owned(),
                duration_secs,
                thumb_url: "https://img.example/v.jpg".into(),
                scheduled_start: None,
            }
        }
    }

    impl MetadataProvider for ScriptedProvider {
        fn channel_metadata(&self, channel_id: &str) -> Result<ChannelMetadata> {
            self.channel
                .clone()
                .ok_or_else(|| anyhow::anyhow!("channel {channel_id} not found"))
        }

        fn uploads_collection_id(&self, channel_id: &str) -> Result<String> {
            Ok(format!("UU{channel_id}"))
        }

        fn collection_page(
            &self,
            _collection_id: &str,
            cursor: Option<&str>,
        ) -> Result<(Vec<UploadItem>, Option<String>)> {
            let index: usize = match cursor {
                None => 0,
                Some(token) => token.parse()?,
            };
            self.pages_served.lock().push(index);
            let page = self
                .pages
                .get(index)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("page {index} out of range"))?;
            let next = if index + 1 < self.pages.len() {
                Some((index + 1).to_string())
            } else {
                None
            };
            Ok((page, next))
        }

        fn video_detail(&self, video_id: &str) -> Result<VideoDetail> {
            self.inspected.lock().push(video_id.to_owned());
            self.details
                .get(video_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("video {video_id} not found"))
        }
    }

    #[tokio::test]
    async fn fetch_uploads_merges_and_indexes() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;

        let mut provider = ScriptedProvider::default();
        provider.pages = vec![vec![
            ScriptedProvider::item("vidB2345678", "Second"),
            ScriptedProvider::item("vidA2345678", "First"),
        ]];
        provider.details.insert(
            "vidB2345678".into(),
            ScriptedProvider::detail("Second", "2024-02-01T00:00:00Z", 600),
        );
        provider.details.insert(
            "vidA2345678".into(),
            ScriptedProvider::detail("First", "2024-01-01T00:00:00Z", 300),
        );

        let inserted = fetch_uploads(&store, &provider, &DefaultTokenizer, "C1").await?;
        assert_eq!(inserted, 2);

        let first = store.get_video("vidA2345678").await?.unwrap();
        let second = store.get_video("vidB2345678").await?.unwrap();
        assert_eq!(first.upload_idx, 1);
        assert_eq!(second.upload_idx, 2);
        assert_eq!(second.duration, 600);
        Ok(())
    }

    #[tokio::test]
    async fn fetch_uploads_halts_at_first_known_id() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        store
            .insert_video(&sample_video("vidKnown1234", "C1", "2024-01-05T00:00:00Z"))
            .await?;
        store
            .insert_video(&sample_video("vidKnown2345", "C1", "2024-01-01T00:00:00Z"))
            .await?;
        store.regenerate_upload_index("C1").await?;

        let mut provider = ScriptedProvider::default();
        provider.pages = vec![
            vec![
                ScriptedProvider::item("vidNewest123", "Newest"),
                ScriptedProvider::item("vidKnown1234", "Known newer"),
            ],
            vec![ScriptedProvider::item("vidKnown2345", "Known older")],
        ];
        provider.details.insert(
            "vidNewest123".into(),
            ScriptedProvider::detail("Newest", "2024-02-01T00:00:00Z", 100),
        );

        let inserted = fetch_uploads(&store, &provider, &DefaultTokenizer, "C1").await?;
        assert_eq!(inserted, 1);

        // Only the genuinely new video was inspected, and the older page
        // was never requested.
        assert_eq!(*provider.inspected.lock(), vec!["vidNewest123".to_string()]);
        assert_eq!(*provider.pages_served.lock(), vec![0]);
        Ok(())
    }

    #[tokio::test]
    async fn fetch_uploads_is_idempotent() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;

        let mut provider = ScriptedProvider::default();
        provider.pages = vec![vec![ScriptedProvider::item("vidA2345678", "First")]];
        provider.details.insert(
            "vidA2345678".into(),
            ScriptedProvider::detail("First", "2024-01-01T00:00:00Z", 300),
        );

        assert_eq!(
            fetch_uploads(&store, &provider, &DefaultTokenizer, "C1").await?,
            1
        );
        let before = store.get_video("vidA2345678").await?.unwrap();

        assert_eq!(
            fetch_uploads(&store, &provider, &DefaultTokenizer, "C1").await?,
            0
        );
        let after = store.get_video("vidA2345678").await?.unwrap();
        assert_eq!(before.title, after.title);
        assert_eq!(before.upload_date, after.upload_date);
        assert_eq!(before.upload_idx, after.upload_idx);
        assert_eq!(before.duration, after.duration);
        Ok(())
    }

    #[tokio::test]
    async fn scheduled_start_wins_over_published_at() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;

        let mut provider = ScriptedProvider::default();
        provider.pages = vec![vec![ScriptedProvider::item("vidLive12345", "Live")]];
        let mut detail = ScriptedProvider::detail("Live", "2024-01-10T00:00:00Z", 0);
        detail.scheduled_start = Some("2024-01-12T20:00:00Z".into());
        provider.details.insert("vidLive12345".into(), detail);

        fetch_uploads(&store, &provider, &DefaultTokenizer, "C1").await?;
        let video = store.get_video("vidLive12345").await?.unwrap();
        assert_eq!(video.upload_date, "2024-01-12T20:00:00Z");
        Ok(())
    }

    #[tokio::test]
    async fn backfill_tags_only_untagged_videos() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        store.set_talent_name("C1", "Alice").await?;
        store
            .insert_video(&sample_video("vidA2345678", "C1", "2024-01-01T00:00:00Z"))
            .await?;
        store
            .insert_video(&sample_video("vidB2345678", "C1", "2024-01-02T00:00:00Z"))
            .await?;
        set_tags(&store, "vidB2345678", TagKind::Talent, &["Bob".into()]).await?;

        let tagged = backfill_owner_tag(&store, "C1").await?;
        assert_eq!(tagged, 1);
        assert_eq!(
            list_tags(&store, "vidA2345678", TagKind::Talent).await?,
            vec!["Alice"]
        );
        assert_eq!(
            list_tags(&store, "vidB2345678", TagKind::Talent).await?,
            vec!["Bob"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn backfill_without_talent_name_is_a_noop() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        store
            .insert_video(&sample_video("vidA2345678", "C1", "2024-01-01T00:00:00Z"))
            .await?;
        assert_eq!(backfill_owner_tag(&store, "C1").await?, 0);
        assert!(list_tags(&store, "vidA2345678", TagKind::Talent).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn repair_zero_durations_patches_real_videos() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        let mut ended = sample_video("vidA2345678", "C1", "2024-01-01T00:00:00Z");
        ended.duration = 0;
        store.insert_video(&ended).await?;
        let mut synthetic = sample_video("__0x00001__", "C1", "2024-01-02T00:00:00Z");
        synthetic.duration = 0;
        store.insert_video(&synthetic).await?;

        let mut provider = ScriptedProvider::default();
        provider.details.insert(
            "vidA2345678".into(),
            ScriptedProvider::detail("First", "2024-01-01T00:00:00Z", 4321),
        );

        let patched = repair_zero_durations(&store, &provider).await?;
        assert_eq!(patched, 1);
        assert_eq!(store.get_video("vidA2345678").await?.unwrap().duration, 4321);
        // Synthetic rows never hit the provider.
        assert_eq!(*provider.inspected.lock(), vec!["vidA2345678".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn sync_all_requires_channels() -> Result<()> {
        let (_temp, store) = create_store().await?;
        let provider = ScriptedProvider::default();
        assert!(sync_all(&store, &provider, &DefaultTokenizer).await.is_err());
        Ok(())
    }

    /// End-to-end: one channel, two uploads, curation, then search.
    #[tokio::test]
    async fn sync_then_curate_then_search() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;

        let mut provider = ScriptedProvider::default();
        provider.channel = Some(ChannelMetadata {
            name: "Channel One".into(),
            description: String::new(),
            thumb_url: String::new(),
        });
        provider.pages = vec![vec![
            ScriptedProvider::item("vidV223456789", "Second stream"),
            ScriptedProvider::item("vidV123456789", "First stream"),
        ]];
        provider.details.insert(
            "vidV223456789".into(),
            ScriptedProvider::detail("Second stream", "2024-02-01T00:00:00Z", 200),
        );
        provider.details.insert(
            "vidV123456789".into(),
            ScriptedProvider::detail("First stream", "2024-01-01T00:00:00Z", 100),
        );

        let inserted = sync_all(&store, &provider, &DefaultTokenizer).await?;
        assert_eq!(inserted, 2);
        assert_eq!(store.get_video("vidV123456789").await?.unwrap().upload_idx, 1);
        assert_eq!(store.get_video("vidV223456789").await?.unwrap().upload_idx, 2);

        set_tags(&store, "vidV123456789", TagKind::Talent, &["Alice".into()]).await?;
        set_tags(&store, "vidV223456789", TagKind::Talent, &["Bob".into()]).await?;

        let by_talent = SearchQuery {
            talents: vec!["Alice".into()],
            ..SearchQuery::default()
        };
        let hits = search(&store, &DefaultTokenizer, &by_talent, 1, 20).await?;
        assert_eq!(hits.total, 1);
        assert_eq!(hits.videos[0].video_id, "vidV123456789");

        let by_window = SearchQuery {
            time_range: Some((
                "2024-01-15T00:00:00Z".into(),
                "2024-03-01T00:00:00Z".into(),
            )),
            order: SearchOrder::NewestFirst,
            ..SearchQuery::default()
        };
        let windowed = search(&store, &DefaultTokenizer, &by_window, 1, 20).await?;
        assert_eq!(windowed.total, 1);
        assert_eq!(windowed.videos[0].video_id, "vidV223456789");

        // Alice's stream predates the window, so the conjunction of both
        // predicates comes up empty.
        let disjoint = SearchQuery {
            talents: vec!["Alice".into()],
            time_range: Some((
                "2024-01-15T00:00:00Z".into(),
                "2024-03-01T00:00:00Z".into(),
            )),
            ..SearchQuery::default()
        };
        let empty = search(&store, &DefaultTokenizer, &disjoint, 1, 20).await?;
        assert_eq!(empty.total, 0);
        assert!(empty.videos.is_empty());
        Ok(())
    }
}
