#![forbid(unsafe_code)]

//! YouTube Data API v3 client backing [`MetadataProvider`]. Only the three
//! read-only endpoints the sync needs: `channels`, `playlistItems` and
//! `videos`.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::sync::{ChannelMetadata, MetadataProvider, UploadItem, VideoDetail};

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
const PAGE_SIZE: &str = "50";

pub struct YouTubeProvider {
    api_key: String,
    base_url: String,
    agent: ureq::Agent,
}

impl YouTubeProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Same client against an arbitrary endpoint; lets tests point at a
    /// local server.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .build(),
        }
    }

    fn get_channel_item(&self, channel_id: &str, part: &str) -> Result<ChannelItem> {
        let url = format!("{}/channels", self.base_url);
        let response: ListResponse<ChannelItem> = self
            .agent
            .get(&url)
            .query("part", part)
            .query("id", channel_id)
            .query("key", &self.api_key)
            .call()
            .with_context(|| format!("requesting channel {channel_id}"))?
            .into_json()
            .context("decoding channels response")?;
        response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("channel {channel_id} not found"))
    }
}

impl MetadataProvider for YouTubeProvider {
    fn channel_metadata(&self, channel_id: &str) -> Result<ChannelMetadata> {
        let item = self.get_channel_item(channel_id, "snippet")?;
        let snippet = item
            .snippet
            .context("channel item missing snippet")?;
        Ok(ChannelMetadata {
            name: snippet.title,
            description: snippet.description,
            thumb_url: snippet.thumbnails.best_url().unwrap_or_default(),
        })
    }

    fn uploads_collection_id(&self, channel_id: &str) -> Result<String> {
        let item = self.get_channel_item(channel_id, "contentDetails")?;
        Ok(item
            .content_details
            .context("channel item missing contentDetails")?
            .related_playlists
            .uploads)
    }

    fn collection_page(
        &self,
        collection_id: &str,
        cursor: Option<&str>,
    ) -> Result<(Vec<UploadItem>, Option<String>)> {
        let url = format!("{}/playlistItems", self.base_url);
        let mut request = self
            .agent
            .get(&url)
            .query("part", "snippet")
            .query("playlistId", collection_id)
            .query("maxResults", PAGE_SIZE)
            .query("key", &self.api_key);
        if let Some(token) = cursor {
            request = request.query("pageToken", token);
        }
        let response: ListResponse<PlaylistItem> = request
            .call()
            .with_context(|| format!("listing playlist {collection_id}"))?
            .into_json()
            .context("decoding playlistItems response")?;

        let items = response
            .items
            .into_iter()
            .filter_map(playlist_item_to_upload)
            .collect();
        Ok((items, response.next_page_token))
    }

    fn video_detail(&self, video_id: &str) -> Result<VideoDetail> {
        let url = format!("{}/videos", self.base_url);
        let response: ListResponse<VideoItem> = self
            .agent
            .get(&url)
            .query("part", "snippet,contentDetails,liveStreamingDetails")
            .query("id", video_id)
            .query("key", &self.api_key)
            .call()
            .with_context(|| format!("requesting video {video_id}"))?
            .into_json()
            .context("decoding videos response")?;
        let item = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("video {video_id} not found"))?;
        video_item_to_detail(item)
    }
}

fn playlist_item_to_upload(item: PlaylistItem) -> Option<UploadItem> {
    let snippet = item.snippet?;
    let resource = snippet.resource_id?;
    if resource.kind != "youtube#video" {
        return None;
    }
    Some(UploadItem {
        video_id: resource.video_id?,
        title: snippet.title,
    })
}

fn video_item_to_detail(item: VideoItem) -> Result<VideoDetail> {
    let snippet = item.snippet.context("video item missing snippet")?;
    let duration_secs = match item.content_details {
        Some(details) => parse_duration_code(&details.duration)?,
        None => 0,
    };
    Ok(VideoDetail {
        title: snippet.title,
        published_at: snippet.published_at,
        duration_secs,
        thumb_url: snippet.thumbnails.best_url().unwrap_or_default(),
        scheduled_start: item
            .live_streaming_details
            .and_then(|live| live.scheduled_start_time),
    })
}

/// Converts an ISO-8601 duration code (`PT1H2M3S`, `P1DT2H`) to seconds.
/// Live broadcasts report `P0D` until they end.
fn parse_duration_code(code: &str) -> Result<i64> {
    let Some(rest) = code.strip_prefix('P') else {
        bail!("malformed duration code {code:?}");
    };
    let mut total: i64 = 0;
    let mut number = String::new();
    for ch in rest.chars() {
        match ch {
            'T' => {
                if !number.is_empty() {
                    bail!("malformed duration code {code:?}");
                }
            }
            '0'..='9' => number.push(ch),
            'W' | 'D' | 'H' | 'M' | 'S' => {
                let value: i64 = number
                    .parse()
                    .with_context(|| format!("malformed duration code {code:?}"))?;
                number.clear();
                let unit = match ch {
                    'W' => 604_800,
                    'D' => 86_400,
                    'H' => 3_600,
                    'M' => 60,
                    _ => 1,
                };
                total += value * unit;
            }
            _ => bail!("malformed duration code {code:?}"),
        }
    }
    if !number.is_empty() {
        bail!("malformed duration code {code:?}");
    }
    Ok(total)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelItem {
    snippet: Option<ChannelSnippet>,
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSnippet {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

impl Thumbnails {
    fn best_url(self) -> Option<String> {
        self.high
            .or(self.medium)
            .or(self.default)
            .map(|thumb| thumb.url)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItem {
    snippet: Option<PlaylistSnippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    #[serde(default)]
    title: String,
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    #[serde(default)]
    kind: String,
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    snippet: Option<VideoSnippet>,
    content_details: Option<VideoContentDetails>,
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    title: String,
    published_at: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoContentDetails {
    duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    scheduled_start_time: Option<String>,
}
