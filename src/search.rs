#![forbid(unsafe_code)]

//! Tag curation and compound search.
//!
//! A search request is a conjunction of independent predicates. Each
//! predicate resolves to a set of video IDs on its own; the result is the
//! intersection of every resolved set, so adding a predicate can only
//! narrow the outcome.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use libsql::params;
use serde::{Deserialize, Serialize};

use crate::store::{ArchiveStore, VideoOverview};
use crate::tokenize::Tokenizer;

/// The two curated tag vocabularies. A closed enum keeps user input away
/// from SQL identifiers entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagKind {
    Talent,
    StreamType,
}

impl TagKind {
    fn table(self) -> &'static str {
        match self {
            TagKind::Talent => "talent_participation",
            TagKind::StreamType => "stream_type",
        }
    }

    fn column(self) -> &'static str {
        match self {
            TagKind::Talent => "talent_name",
            TagKind::StreamType => "stream_type",
        }
    }

    /// Denormalized copy inside `search_video`.
    fn search_column(self) -> &'static str {
        match self {
            TagKind::Talent => "talents",
            TagKind::StreamType => "stream_types",
        }
    }
}

/// Replaces the whole tag set of one kind for a video. Tags are trimmed,
/// empties dropped, duplicates collapsed; the previous set never leaks
/// into the new one. Returns false for an uncatalogued video.
pub async fn set_tags(
    store: &ArchiveStore,
    video_id: &str,
    kind: TagKind,
    values: &[String],
) -> Result<bool> {
    if !store.video_exists(video_id).await? {
        return Ok(false);
    }
    let mut cleaned: Vec<String> = Vec::new();
    for value in values {
        let trimmed = value.trim();
        if !trimmed.is_empty() && !cleaned.iter().any(|seen| seen == trimmed) {
            cleaned.push(trimmed.to_string());
        }
    }
    let joined = cleaned.join(";");

    let tx = store.conn.transaction().await?;
    tx.execute(
        &format!("DELETE FROM {} WHERE video_id = ?1", kind.table()),
        params![video_id],
    )
    .await?;
    for value in &cleaned {
        tx.execute(
            &format!(
                "INSERT INTO {} ({}, video_id) VALUES (?1, ?2)",
                kind.table(),
                kind.column()
            ),
            params![value.as_str(), video_id],
        )
        .await?;
    }
    tx.execute(
        &format!(
            "INSERT INTO search_video (video_id, {col}) VALUES (?1, ?2) \
             ON CONFLICT(video_id) DO UPDATE SET {col} = excluded.{col}",
            col = kind.search_column()
        ),
        params![video_id, joined.as_str()],
    )
    .await?;
    tx.commit().await?;
    Ok(true)
}

/// Current tag set of one kind for a video, store order.
pub async fn list_tags(store: &ArchiveStore, video_id: &str, kind: TagKind) -> Result<Vec<String>> {
    let mut stmt = store
        .conn
        .prepare(&format!(
            "SELECT {} FROM {} WHERE video_id = ?1",
            kind.column(),
            kind.table()
        ))
        .await?;
    let mut rows = stmt.query([video_id]).await?;
    let mut tags = Vec::new();
    while let Some(row) = rows.next().await? {
        tags.push(row.get(0)?);
    }
    Ok(tags)
}

/// Distinct tag values containing `partial` as a case-sensitive substring.
/// `instr` keeps the comparison byte-exact where LIKE would fold ASCII case.
pub async fn tag_suggestions(
    store: &ArchiveStore,
    kind: TagKind,
    partial: &str,
) -> Result<Vec<String>> {
    let mut stmt = store
        .conn
        .prepare(&format!(
            "SELECT {col} FROM {} WHERE instr({col}, ?1) > 0 GROUP BY {col}",
            kind.table(),
            col = kind.column()
        ))
        .await?;
    let mut rows = stmt.query([partial]).await?;
    let mut suggestions = Vec::new();
    while let Some(row) = rows.next().await? {
        suggestions.push(row.get(0)?);
    }
    Ok(suggestions)
}

/// Drops every `search_video` row and re-derives the table from
/// `video_list` and the tag tables. Recovery path for index drift; returns
/// the number of videos indexed.
pub async fn rebuild_search_index(
    store: &ArchiveStore,
    tokenizer: &dyn Tokenizer,
) -> Result<usize> {
    let mut stmt = store
        .conn
        .prepare("SELECT video_id, title FROM video_list")
        .await?;
    let mut rows = stmt.query(params![]).await?;
    let mut videos: Vec<(String, String)> = Vec::new();
    while let Some(row) = rows.next().await? {
        videos.push((row.get(0)?, row.get(1)?));
    }
    let talents = tag_concat_map(store, TagKind::Talent).await?;
    let stream_types = tag_concat_map(store, TagKind::StreamType).await?;

    let tx = store.conn.transaction().await?;
    tx.execute("DELETE FROM search_video", params![]).await?;
    for (video_id, title) in &videos {
        tx.execute(
            "INSERT INTO search_video (video_id, title, tagged_title, talents, stream_types) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                video_id.as_str(),
                title.as_str(),
                tokenizer.tokenize_title(title),
                talents.get(video_id).map_or("", String::as_str),
                stream_types.get(video_id).map_or("", String::as_str),
            ],
        )
        .await?;
    }
    tx.commit().await?;
    log::info!("search index rebuilt for {} videos", videos.len());
    Ok(videos.len())
}

/// `video_id` to its `;`-joined tag values for one tag table.
async fn tag_concat_map(store: &ArchiveStore, kind: TagKind) -> Result<HashMap<String, String>> {
    let mut stmt = store
        .conn
        .prepare(&format!(
            "SELECT video_id, {} FROM {} ORDER BY rowid",
            kind.column(),
            kind.table()
        ))
        .await?;
    let mut rows = stmt.query(params![]).await?;
    let mut map: HashMap<String, String> = HashMap::new();
    while let Some(row) = rows.next().await? {
        let video_id: String = row.get(0)?;
        let value: String = row.get(1)?;
        let entry = map.entry(video_id).or_default();
        if !entry.is_empty() {
            entry.push(';');
        }
        entry.push_str(&value);
    }
    Ok(map)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagCount {
    pub name: String,
    pub count: i64,
}

/// Per-channel tag breakdown over an upload-date window, shaped for charts.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    /// Collaborator counts; the channel owner's own tag is left out.
    pub talents: Vec<TagCount>,
    /// Videos carrying exactly one talent tag (the owner streaming alone).
    pub solo: i64,
    pub stream_types: Vec<TagCount>,
    /// Videos in the window with no stream-type tag at all.
    pub untyped: i64,
}

/// Tag statistics for one channel, restricted to a half-open
/// `[lower, upper)` window when one is given. `None` for an uncatalogued
/// channel.
pub async fn channel_stats(
    store: &ArchiveStore,
    channel_id: &str,
    time_range: Option<(String, String)>,
) -> Result<Option<ChannelStats>> {
    let Some(channel) = store.get_channel(channel_id).await? else {
        return Ok(None);
    };
    let (lower, upper) = time_range.unwrap_or_else(|| {
        // Upload dates sort lexicographically, so a far-future upper bound
        // covers the unbounded case.
        ("1970-01-01T00:00:00Z".into(), "9999-12-31T00:00:00Z".into())
    });

    let mut talents = Vec::new();
    for tagged in tag_counts(store, TagKind::Talent, channel_id, &lower, &upper).await? {
        if tagged.name != channel.talent_name {
            talents.push(tagged);
        }
    }
    let stream_types = tag_counts(store, TagKind::StreamType, channel_id, &lower, &upper).await?;

    let mut solo_stmt = store
        .conn
        .prepare(
            "SELECT COUNT(*) FROM ( \
               SELECT tp.video_id FROM talent_participation tp \
               JOIN video_list vl ON tp.video_id = vl.video_id \
               WHERE vl.channel_id = ?1 AND vl.upload_date >= ?2 AND vl.upload_date < ?3 \
               GROUP BY tp.video_id HAVING COUNT(*) = 1)",
        )
        .await?;
    let mut rows = solo_stmt
        .query([channel_id, lower.as_str(), upper.as_str()])
        .await?;
    let solo = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => 0,
    };

    let mut untyped_stmt = store
        .conn
        .prepare(
            "SELECT COUNT(*) FROM video_list vl \
             WHERE vl.channel_id = ?1 AND vl.upload_date >= ?2 AND vl.upload_date < ?3 \
             AND NOT EXISTS (SELECT 1 FROM stream_type st WHERE st.video_id = vl.video_id)",
        )
        .await?;
    let mut rows = untyped_stmt
        .query([channel_id, lower.as_str(), upper.as_str()])
        .await?;
    let untyped = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => 0,
    };

    Ok(Some(ChannelStats {
        talents,
        solo,
        stream_types,
        untyped,
    }))
}

async fn tag_counts(
    store: &ArchiveStore,
    kind: TagKind,
    channel_id: &str,
    lower: &str,
    upper: &str,
) -> Result<Vec<TagCount>> {
    let mut stmt = store
        .conn
        .prepare(&format!(
            "SELECT t.{col}, COUNT(*) FROM {} t \
             JOIN video_list vl ON t.video_id = vl.video_id \
             WHERE vl.channel_id = ?1 AND vl.upload_date >= ?2 AND vl.upload_date < ?3 \
             GROUP BY t.{col} ORDER BY COUNT(*) DESC, t.{col}",
            kind.table(),
            col = kind.column()
        ))
        .await?;
    let mut rows = stmt.query([channel_id, lower, upper]).await?;
    let mut counts = Vec::new();
    while let Some(row) = rows.next().await? {
        counts.push(TagCount {
            name: row.get(0)?,
            count: row.get(1)?,
        });
    }
    Ok(counts)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchOrder {
    /// Deterministic video-ID order; pagination is stable across repeats.
    #[default]
    Stable,
    /// Ordered by upload date descending; costs a full hydration pass.
    NewestFirst,
}

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub keywords: Option<String>,
    pub talents: Vec<String>,
    pub stream_types: Vec<String>,
    /// Half-open `[lower, upper)` window over `upload_date`.
    pub time_range: Option<(String, String)>,
    pub order: SearchOrder,
}

impl SearchQuery {
    fn is_empty(&self) -> bool {
        self.keywords.as_deref().map_or(true, |k| k.trim().is_empty())
            && self.talents.is_empty()
            && self.stream_types.is_empty()
            && self.time_range.is_none()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    /// Total hits before pagination.
    pub total: usize,
    pub videos: Vec<VideoOverview>,
}

/// Runs a compound search. A query with no predicates returns nothing
/// rather than everything; pages are 1-based.
pub async fn search(
    store: &ArchiveStore,
    tokenizer: &dyn Tokenizer,
    query: &SearchQuery,
    page: usize,
    page_size: usize,
) -> Result<SearchResults> {
    if query.is_empty() {
        return Ok(SearchResults {
            total: 0,
            videos: Vec::new(),
        });
    }

    let mut predicate_sets: Vec<HashSet<String>> = Vec::new();

    if let Some(keywords) = query.keywords.as_deref()
        && !keywords.trim().is_empty()
    {
        predicate_sets.push(resolve_keywords(store, tokenizer, keywords.trim()).await?);
    }
    if !query.talents.is_empty() {
        predicate_sets.push(resolve_tag_list(store, TagKind::Talent, &query.talents).await?);
    }
    if !query.stream_types.is_empty() {
        predicate_sets
            .push(resolve_tag_list(store, TagKind::StreamType, &query.stream_types).await?);
    }
    if let Some((lower, upper)) = &query.time_range {
        predicate_sets.push(resolve_time_range(store, lower, upper).await?);
    }

    let mut iter = predicate_sets.into_iter();
    let mut hits = match iter.next() {
        Some(first) => first,
        None => HashSet::new(),
    };
    for set in iter {
        hits.retain(|id| set.contains(id));
    }

    let total = hits.len();
    let mut ids: Vec<String> = hits.into_iter().collect();
    ids.sort();

    let offset = page.saturating_sub(1) * page_size;
    let videos = match query.order {
        SearchOrder::Stable => {
            let mut videos = Vec::new();
            for id in ids.iter().skip(offset).take(page_size) {
                if let Some(overview) = store.get_video_overview(id).await? {
                    videos.push(overview);
                }
            }
            videos
        }
        SearchOrder::NewestFirst => {
            let mut all = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(overview) = store.get_video_overview(id).await? {
                    all.push(overview);
                }
            }
            all.sort_by(|a, b| {
                b.upload_date
                    .cmp(&a.upload_date)
                    .then_with(|| b.video_id.cmp(&a.video_id))
            });
            all.into_iter().skip(offset).take(page_size).collect()
        }
    };

    Ok(SearchResults { total, videos })
}

/// Backslash-escapes the LIKE metacharacters so user text matches
/// literally under an `ESCAPE '\'` clause.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Free-text predicate: raw substring over the stored title, unioned with
/// an every-token match over the tokenized title. The same tokenizer that
/// indexed the titles has to resolve the query.
async fn resolve_keywords(
    store: &ArchiveStore,
    tokenizer: &dyn Tokenizer,
    keywords: &str,
) -> Result<HashSet<String>> {
    let mut ids = HashSet::new();

    let raw_pattern = format!("%{}%", escape_like(keywords));
    let mut stmt = store
        .conn
        .prepare("SELECT video_id FROM search_video WHERE title LIKE ?1 ESCAPE '\\'")
        .await?;
    let mut rows = stmt.query([raw_pattern.as_str()]).await?;
    while let Some(row) = rows.next().await? {
        ids.insert(row.get(0)?);
    }

    let tokens = tokenizer.segment(keywords);
    if !tokens.is_empty() {
        let clauses = vec!["tagged_title LIKE ? ESCAPE '\\'"; tokens.len()].join(" AND ");
        let sql = format!("SELECT video_id FROM search_video WHERE {clauses}");
        let patterns: Vec<libsql::Value> = tokens
            .iter()
            .map(|tok| libsql::Value::from(format!("%{}%", escape_like(tok))))
            .collect();
        let mut stmt = store.conn.prepare(&sql).await?;
        let mut rows = stmt.query(patterns).await?;
        while let Some(row) = rows.next().await? {
            ids.insert(row.get(0)?);
        }
    }

    Ok(ids)
}

/// Tag-list predicate: a video qualifies only when it carries every tag in
/// the list. Tag equality folds ASCII case.
async fn resolve_tag_list(
    store: &ArchiveStore,
    kind: TagKind,
    tags: &[String],
) -> Result<HashSet<String>> {
    let mut result: Option<HashSet<String>> = None;
    for tag in tags {
        let mut stmt = store
            .conn
            .prepare(&format!(
                "SELECT video_id FROM {} WHERE {} = ?1 COLLATE NOCASE",
                kind.table(),
                kind.column()
            ))
            .await?;
        let mut rows = stmt.query([tag.trim()]).await?;
        let mut matched = HashSet::new();
        while let Some(row) = rows.next().await? {
            matched.insert(row.get::<String>(0)?);
        }
        result = Some(match result {
            None => matched,
            Some(mut acc) => {
                acc.retain(|id| matched.contains(id));
                acc
            }
        });
        if result.as_ref().is_some_and(HashSet::is_empty) {
            break;
        }
    }
    Ok(result.unwrap_or_default())
}

async fn resolve_time_range(
    store: &ArchiveStore,
    lower: &str,
    upper: &str,
) -> Result<HashSet<String>> {
    let mut stmt = store
        .conn
        .prepare("SELECT video_id FROM video_list WHERE upload_date >= ?1 AND upload_date < ?2")
        .await?;
    let mut rows = stmt.query([lower, upper]).await?;
    let mut ids = HashSet::new();
    while let Some(row) = rows.next().await? {
        ids.insert(row.get(0)?);
    }
    Ok(ids)
}
