#![forbid(unsafe_code)]

//! JSON API over the archive catalogue plus static serving of the web
//! frontend. Session handling and TLS live in the reverse proxy; this
//! process only speaks plain HTTP on localhost by default.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, Utc};
use mime_guess::MimeGuess;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use vtarchive_tools::config::{RuntimeOverrides, resolve_runtime_paths};
use vtarchive_tools::download::{
    DownloadOrchestrator, Downloader, YtDlpDownloader,
};
use vtarchive_tools::scan::scan_local_videos;
use vtarchive_tools::search::{
    ChannelStats, SearchOrder, SearchQuery, SearchResults, TagKind, channel_stats, list_tags,
    search, set_tags, tag_suggestions,
};
use vtarchive_tools::security::ensure_not_root;
use vtarchive_tools::settings::{DownloadSettings, SettingsStore};
use vtarchive_tools::store::{
    ArchiveStore, ChannelRecord, CheckpointChange, CheckpointUpdate, InsertOutcome, VideoOverview,
    VideoRecord,
};
use vtarchive_tools::sync::{MetadataProvider, backfill_owner_tag, fetch_channel, fetch_uploads};
use vtarchive_tools::tokenize::{DefaultTokenizer, Tokenizer};
use vtarchive_tools::ytapi::YouTubeProvider;

const CATALOGUE_DB_FILE: &str = "catalogue.db";
const PAGE_SIZE: usize = 30;

#[derive(Debug, Clone)]
struct BackendArgs {
    archive_root: PathBuf,
    web_root: PathBuf,
    port: u16,
    listen_host: IpAddr,
    youtube_api_key: Option<String>,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut archive_root_override: Option<PathBuf> = None;
        let mut web_root_override: Option<PathBuf> = None;
        let mut port_override: Option<u16> = None;
        let mut host_override: Option<IpAddr> = None;
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--archive-root=") {
                archive_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--web-root=") {
                web_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--port=") {
                port_override = Some(parse_port_arg(value)?);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--host=") {
                host_override = Some(parse_host_arg(value)?);
                continue;
            }

            match arg.as_str() {
                "--archive-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--archive-root requires a value"))?;
                    archive_root_override = Some(PathBuf::from(value));
                }
                "--web-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--web-root requires a value"))?;
                    web_root_override = Some(PathBuf::from(value));
                }
                "--port" => {
                    let value = args.next().ok_or_else(|| anyhow!("--port requires a value"))?;
                    port_override = Some(parse_port_arg(&value)?);
                }
                "--host" => {
                    let value = args.next().ok_or_else(|| anyhow!("--host requires a value"))?;
                    host_override = Some(parse_host_arg(&value)?);
                }
                other => bail_on_unknown_arg(other)?,
            }
        }

        let runtime_paths = resolve_runtime_paths(RuntimeOverrides {
            archive_root: archive_root_override.clone(),
            web_root: web_root_override.clone(),
            ..RuntimeOverrides::default()
        })?;
        let runtime_host = parse_host_arg(&runtime_paths.host)?;
        Ok(Self {
            archive_root: archive_root_override.unwrap_or(runtime_paths.archive_root),
            web_root: web_root_override.unwrap_or(runtime_paths.web_root),
            port: port_override.unwrap_or(runtime_paths.port),
            listen_host: host_override.unwrap_or(runtime_host),
            youtube_api_key: runtime_paths.youtube_api_key,
        })
    }
}

fn bail_on_unknown_arg(arg: &str) -> Result<()> {
    Err(anyhow!(
        "unknown argument {arg}; expected --archive-root, --web-root, --port or --host"
    ))
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/VTARCHIVE_HOST")
}

/// Caches the channel listing. The `data_version` key catches writes from
/// other processes (the cron CLI); same-connection writes do not bump it,
/// so mutating handlers call [`ApiCache::invalidate`] themselves.
struct ApiCache {
    channels: Mutex<Option<(i64, Arc<Vec<ChannelRecord>>)>>,
}

impl ApiCache {
    fn new() -> Self {
        Self {
            channels: Mutex::new(None),
        }
    }

    fn invalidate(&self) {
        *self.channels.lock() = None;
    }

    async fn channels(&self, store: &ArchiveStore) -> Result<Arc<Vec<ChannelRecord>>> {
        let version = store.data_version().await?;
        if let Some((cached_version, cached)) = &*self.channels.lock()
            && *cached_version == version
        {
            return Ok(Arc::clone(cached));
        }
        let fresh = Arc::new(store.list_channels().await?);
        *self.channels.lock() = Some((version, Arc::clone(&fresh)));
        Ok(fresh)
    }
}

/// Spawns download work onto the runtime; callers get an immediate
/// acknowledgement and poll the lock status.
#[derive(Clone)]
struct DownloadManager {
    orchestrator: Arc<DownloadOrchestrator>,
}

impl DownloadManager {
    fn new(orchestrator: Arc<DownloadOrchestrator>) -> Self {
        Self { orchestrator }
    }

    fn status(&self) -> &'static str {
        if self.orchestrator.is_busy() {
            "downloading"
        } else {
            "free"
        }
    }

    fn start_single(&self, video_id: String) {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            match orchestrator.download_single(&video_id, false).await {
                Ok(outcome) => log::info!("download of {video_id} finished: {outcome:?}"),
                Err(err) => log::error!("download of {video_id} errored: {err:#}"),
            }
        });
    }

    fn start_chain(&self) {
        let orchestrator = Arc::clone(&self.orchestrator);
        tokio::spawn(async move {
            match orchestrator.run_chain().await {
                Ok(steps) => log::info!("download chain finished after {steps} steps"),
                Err(err) => log::error!("download chain errored: {err:#}"),
            }
        });
    }
}

#[derive(Clone)]
struct AppState {
    store: ArchiveStore,
    tokenizer: Arc<dyn Tokenizer>,
    cache: Arc<ApiCache>,
    web_root: Arc<PathBuf>,
    settings: Arc<SettingsStore>,
    downloads: DownloadManager,
    provider: Option<Arc<dyn MetadataProvider>>,
}

impl AppState {
    fn provider(&self) -> ApiResult<&dyn MetadataProvider> {
        self.provider
            .as_deref()
            .ok_or_else(|| ApiError::bad_request("YOUTUBE_API_KEY is not configured"))
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        log::error!("internal error: {err:#}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let BackendArgs {
        archive_root,
        web_root,
        port,
        listen_host,
        youtube_api_key,
    } = BackendArgs::parse()?;

    ensure_not_root("backend")?;

    let store = ArchiveStore::open(&archive_root.join(CATALOGUE_DB_FILE))
        .await
        .context("initializing catalogue store")?;
    let settings = Arc::new(SettingsStore::load(&archive_root)?);
    let orchestrator = Arc::new(DownloadOrchestrator::new(
        store.clone(),
        Arc::clone(&settings),
        &archive_root,
        Arc::new(YtDlpDownloader) as Arc<dyn Downloader>,
    ));
    let provider: Option<Arc<dyn MetadataProvider>> = youtube_api_key
        .map(|key| Arc::new(YouTubeProvider::new(key)) as Arc<dyn MetadataProvider>);
    if provider.is_none() {
        log::warn!("YOUTUBE_API_KEY not set; sync endpoints will refuse requests");
    }

    let state = AppState {
        store,
        tokenizer: Arc::new(DefaultTokenizer),
        cache: Arc::new(ApiCache::new()),
        web_root: Arc::new(web_root),
        settings,
        downloads: DownloadManager::new(orchestrator),
        provider,
    };

    let app = router(state);

    let addr = SocketAddr::new(listen_host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/channels", get(list_channels).post(add_channel))
        .route("/api/channels/{id}", get(get_channel).delete(delete_channel))
        .route("/api/channels/{id}/videos", get(list_channel_videos))
        .route("/api/channels/{id}/talent", axum::routing::put(set_channel_talent))
        .route("/api/channels/{id}/checkpoint", axum::routing::put(set_channel_checkpoint))
        .route("/api/channels/{id}/sync", post(sync_channel))
        .route("/api/channels/{id}/stats", get(get_channel_stats))
        .route("/api/videos", get(list_videos).post(add_video))
        .route(
            "/api/videos/{id}",
            get(get_video).put(update_video).delete(delete_video),
        )
        .route("/api/videos/{id}/talents", axum::routing::put(set_video_talents))
        .route(
            "/api/videos/{id}/stream-types",
            axum::routing::put(set_video_stream_types),
        )
        .route("/api/search", get(search_videos))
        .route("/api/tag-suggestions", get(suggest_tags))
        .route("/api/new-hex-vid", get(new_hex_vid))
        .route("/api/downloads", get(download_status))
        .route("/api/downloads/video", post(start_video_download))
        .route("/api/downloads/chain", post(start_chain_download))
        .route("/api/scan", post(rescan_local_files))
        .route("/api/settings", get(get_settings).put(update_settings))
        .fallback(static_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    // Failure here only affects graceful shutdown; the process still
    // terminates when Ctrl+C fires.
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

// ---- channels ----

async fn list_channels(State(state): State<AppState>) -> ApiResult<Json<Vec<ChannelRecord>>> {
    let channels = state.cache.channels(&state.store).await?;
    Ok(Json((*channels).clone()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddChannelPayload {
    channel_id: String,
}

async fn add_channel(
    State(state): State<AppState>,
    Json(payload): Json<AddChannelPayload>,
) -> ApiResult<Json<ChannelRecord>> {
    let channel_id = payload.channel_id.trim();
    if channel_id.is_empty() {
        return Err(ApiError::bad_request("channelId must not be empty"));
    }
    if state.store.get_channel(channel_id).await?.is_some() {
        return Err(ApiError::conflict("channel already tracked"));
    }
    let provider = state.provider()?;
    fetch_channel(&state.store, provider, channel_id).await?;
    fetch_uploads(&state.store, provider, state.tokenizer.as_ref(), channel_id).await?;
    backfill_owner_tag(&state.store, channel_id).await?;
    state.cache.invalidate();
    let channel = state
        .store
        .get_channel(channel_id)
        .await?
        .ok_or_else(|| ApiError::not_found("channel not found after sync"))?;
    Ok(Json(channel))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelDetail {
    #[serde(flatten)]
    channel: ChannelRecord,
    video_count: i64,
}

async fn get_channel(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<ChannelDetail>> {
    let channel = state
        .store
        .get_channel(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("channel not found"))?;
    let video_count = state.store.count_channel_videos(&id).await?;
    Ok(Json(ChannelDetail {
        channel,
        video_count,
    }))
}

async fn delete_channel(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.store.delete_channel(&id).await? {
        return Err(ApiError::not_found("channel not found"));
    }
    state.cache.invalidate();
    Ok(Json(serde_json::json!({ "result": "deleted" })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoPage {
    page: usize,
    total: i64,
    videos: Vec<VideoOverview>,
}

async fn list_channel_videos(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<VideoPage>> {
    if state.store.get_channel(&id).await?.is_none() {
        return Err(ApiError::not_found("channel not found"));
    }
    let page = page_param(&params);
    let videos = state.store.list_channel_videos(&id, page, PAGE_SIZE).await?;
    let total = state.store.count_channel_videos(&id).await?;
    Ok(Json(VideoPage {
        page,
        total,
        videos,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TalentPayload {
    talent_name: String,
}

async fn set_channel_talent(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(payload): Json<TalentPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state
        .store
        .set_talent_name(&id, payload.talent_name.trim())
        .await?
    {
        return Err(ApiError::not_found("channel not found"));
    }
    state.cache.invalidate();
    Ok(Json(serde_json::json!({ "result": "updated" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointPayload {
    checkpoint_index: Option<i64>,
    video_id: Option<String>,
    offset: Option<i64>,
}

async fn set_channel_checkpoint(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(payload): Json<CheckpointPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.get_channel(&id).await?.is_none() {
        return Err(ApiError::not_found("channel not found"));
    }
    let change = match (payload.checkpoint_index, payload.video_id, payload.offset) {
        (Some(index), None, None) => CheckpointChange::Index(index),
        (None, Some(video_id), None) => CheckpointChange::AtVideo(video_id),
        (None, None, Some(offset)) => CheckpointChange::Offset(offset),
        _ => {
            return Err(ApiError::bad_request(
                "provide exactly one of checkpointIndex, videoId or offset",
            ));
        }
    };
    let body = match state.store.update_checkpoint(&id, change).await? {
        CheckpointUpdate::Updated(value) => {
            serde_json::json!({ "result": "updated", "checkpointIdx": value })
        }
        CheckpointUpdate::Invalid => serde_json::json!({ "result": "invalid" }),
    };
    state.cache.invalidate();
    Ok(Json(body))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncReport {
    inserted: usize,
}

async fn sync_channel(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<SyncReport>> {
    if state.store.get_channel(&id).await?.is_none() {
        return Err(ApiError::not_found("channel not found"));
    }
    let provider = state.provider()?;
    fetch_channel(&state.store, provider, &id).await?;
    let inserted = fetch_uploads(&state.store, provider, state.tokenizer.as_ref(), &id).await?;
    backfill_owner_tag(&state.store, &id).await?;
    state.cache.invalidate();
    Ok(Json(SyncReport { inserted }))
}

// ---- videos ----

async fn list_videos(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<VideoPage>> {
    let page = page_param(&params);
    let videos = state.store.list_videos(page, PAGE_SIZE).await?;
    let total = state.store.count_videos().await?;
    Ok(Json(VideoPage {
        page,
        total,
        videos,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetailPayload {
    #[serde(flatten)]
    video: VideoOverview,
    talents: Vec<String>,
    stream_types: Vec<String>,
}

async fn get_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<VideoDetailPayload>> {
    let video = state
        .store
        .get_video_overview(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("video not found"))?;
    let talents = list_tags(&state.store, &id, TagKind::Talent).await?;
    let stream_types = list_tags(&state.store, &id, TagKind::StreamType).await?;
    Ok(Json(VideoDetailPayload {
        video,
        talents,
        stream_types,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddVideoPayload {
    #[serde(default)]
    video_id: Option<String>,
    channel_id: String,
    title: String,
    upload_date: String,
    #[serde(default)]
    duration: i64,
    #[serde(default)]
    thumb_url: String,
}

async fn add_video(
    State(state): State<AppState>,
    Json(payload): Json<AddVideoPayload>,
) -> ApiResult<Json<VideoRecord>> {
    if payload.title.trim().is_empty() || payload.upload_date.trim().is_empty() {
        return Err(ApiError::bad_request("title and uploadDate are required"));
    }
    let video_id = match payload.video_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_owned(),
        // Manual entries without an origin ID get a minted synthetic one.
        _ => state.store.next_hex_video_id().await?,
    };
    let record = VideoRecord {
        video_id: video_id.clone(),
        channel_id: payload.channel_id.trim().to_owned(),
        title: payload.title.trim().to_owned(),
        upload_date: payload.upload_date.trim().to_owned(),
        duration: payload.duration,
        thumb_url: payload.thumb_url,
        upload_idx: 0,
    };
    if state.store.insert_video(&record).await? == InsertOutcome::AlreadyExists {
        return Err(ApiError::conflict("video already catalogued"));
    }
    state
        .store
        .insert_search_row(
            &video_id,
            &record.title,
            &state.tokenizer.tokenize_title(&record.title),
        )
        .await?;
    state.store.regenerate_upload_index(&record.channel_id).await?;
    let stored = state
        .store
        .get_video(&video_id)
        .await?
        .ok_or_else(|| ApiError::not_found("video not found after insert"))?;
    Ok(Json(stored))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateVideoPayload {
    title: String,
    upload_date: String,
    #[serde(default)]
    duration: i64,
    #[serde(default)]
    thumb_url: String,
}

async fn update_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(payload): Json<UpdateVideoPayload>,
) -> ApiResult<Json<VideoRecord>> {
    let existing = state
        .store
        .get_video(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("video not found"))?;
    state
        .store
        .update_video(
            &id,
            payload.title.trim(),
            payload.upload_date.trim(),
            payload.duration,
            &payload.thumb_url,
        )
        .await?;
    // Title changes must reach the search index; date changes the index.
    state
        .store
        .insert_search_row(
            &id,
            payload.title.trim(),
            &state.tokenizer.tokenize_title(payload.title.trim()),
        )
        .await?;
    state
        .store
        .regenerate_upload_index(&existing.channel_id)
        .await?;
    let stored = state
        .store
        .get_video(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("video not found after update"))?;
    Ok(Json(stored))
}

async fn delete_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.store.delete_video(&id).await?.is_none() {
        return Err(ApiError::not_found("video not found"));
    }
    Ok(Json(serde_json::json!({ "result": "deleted" })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TagsPayload {
    tags: Vec<String>,
}

async fn set_video_talents(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(payload): Json<TagsPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    apply_tags(&state, &id, TagKind::Talent, &payload.tags).await
}

async fn set_video_stream_types(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(payload): Json<TagsPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    apply_tags(&state, &id, TagKind::StreamType, &payload.tags).await
}

async fn apply_tags(
    state: &AppState,
    video_id: &str,
    kind: TagKind,
    tags: &[String],
) -> ApiResult<Json<serde_json::Value>> {
    if !set_tags(&state.store, video_id, kind, tags).await? {
        return Err(ApiError::not_found("video not found"));
    }
    Ok(Json(serde_json::json!({ "result": "updated" })))
}

/// Tag breakdown for a channel's dashboard charts; `from`/`to` narrow the
/// window the same way the search endpoint does.
async fn get_channel_stats(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<ChannelStats>> {
    let time_range = match (params.get("from"), params.get("to")) {
        (Some(from), Some(to)) => Some((parse_time_bound(from, false)?, parse_time_bound(to, true)?)),
        (None, None) => None,
        _ => {
            return Err(ApiError::bad_request(
                "time filtering requires both from and to",
            ));
        }
    };
    let stats = channel_stats(&state.store, &id, time_range)
        .await?
        .ok_or_else(|| ApiError::not_found("channel not found"))?;
    Ok(Json(stats))
}

// ---- search & suggestions ----

async fn search_videos(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<SearchResults>> {
    let query = SearchQuery {
        keywords: params.get("q").map(|q| q.trim().to_owned()).filter(|q| !q.is_empty()),
        talents: split_tag_param(params.get("talents")),
        stream_types: split_tag_param(params.get("streamTypes")),
        time_range: match (params.get("from"), params.get("to")) {
            (Some(from), Some(to)) => Some((
                parse_time_bound(from, false)?,
                parse_time_bound(to, true)?,
            )),
            (None, None) => None,
            _ => {
                return Err(ApiError::bad_request(
                    "time filtering requires both from and to",
                ));
            }
        },
        order: match params.get("order").map(String::as_str) {
            Some("newest") => SearchOrder::NewestFirst,
            _ => SearchOrder::Stable,
        },
    };
    let page = page_param(&params);
    let results = search(
        &state.store,
        state.tokenizer.as_ref(),
        &query,
        page,
        PAGE_SIZE,
    )
    .await?;
    Ok(Json(results))
}

/// Normalizes a time filter bound to an RFC 3339 UTC timestamp. Plain
/// dates become midnight UTC; an end-of-range date is bumped by a day so
/// the half-open window still covers it.
fn parse_time_bound(raw: &str, exclusive_end: bool) -> ApiResult<String> {
    if let Ok(timestamp) = raw.parse::<DateTime<Utc>>() {
        return Ok(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    if let Ok(date) = raw.parse::<NaiveDate>() {
        let date = if exclusive_end {
            date + Duration::days(1)
        } else {
            date
        };
        let timestamp = date.and_time(NaiveTime::MIN).and_utc();
        return Ok(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    Err(ApiError::bad_request(
        "from/to must be RFC 3339 timestamps or YYYY-MM-DD dates",
    ))
}

fn split_tag_param(raw: Option<&String>) -> Vec<String> {
    raw.map(|value| {
        value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

async fn suggest_tags(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Vec<String>>> {
    let kind = match params.get("kind").map(String::as_str) {
        Some("talent") => TagKind::Talent,
        Some("stream-type") => TagKind::StreamType,
        _ => return Err(ApiError::bad_request("kind must be talent or stream-type")),
    };
    let partial = params.get("q").map(String::as_str).unwrap_or_default();
    let suggestions = tag_suggestions(&state.store, kind, partial).await?;
    Ok(Json(suggestions))
}

async fn new_hex_vid(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let video_id = state.store.next_hex_video_id().await?;
    Ok(Json(serde_json::json!({ "videoId": video_id })))
}

// ---- downloads & scanning ----

async fn download_status(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(serde_json::json!({ "status": state.downloads.status() })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartDownloadPayload {
    video_id: String,
}

async fn start_video_download(
    State(state): State<AppState>,
    Json(payload): Json<StartDownloadPayload>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.store.video_exists(payload.video_id.trim()).await? {
        return Err(ApiError::not_found("video not found"));
    }
    state.downloads.start_single(payload.video_id.trim().to_owned());
    Ok(Json(serde_json::json!({ "result": "downloading" })))
}

async fn start_chain_download(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    state.downloads.start_chain();
    Ok(Json(serde_json::json!({ "result": "downloading" })))
}

async fn rescan_local_files(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let scan_root = state.settings.get().scan_root;
    if scan_root.is_empty() {
        return Err(ApiError::bad_request("scanRoot is not configured"));
    }
    let recorded = scan_local_videos(&state.store, Path::new(&scan_root)).await?;
    Ok(Json(serde_json::json!({ "recorded": recorded })))
}

// ---- settings ----

async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<DownloadSettings>> {
    Ok(Json(state.settings.get()))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(payload): Json<DownloadSettings>,
) -> ApiResult<Json<DownloadSettings>> {
    state.settings.update(payload)?;
    Ok(Json(state.settings.get()))
}

// ---- static frontend ----

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_web_path(&state.web_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn serve_web_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_web_path(root, request_path)?;
    let metadata = tokio::fs::metadata(&target).await;

    match metadata {
        Ok(meta) if meta.is_dir() => stream_file(root.join("index.html")).await,
        Ok(_) => stream_file(target).await,
        Err(_) => {
            if should_fallback_to_index(request_path) {
                stream_file(root.join("index.html")).await
            } else {
                Err(ApiError::not_found("file not found"))
            }
        }
    }
}

fn resolve_web_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Extension-less paths are SPA routes and get index.html.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return true;
    }
    Path::new(trimmed).extension().is_none()
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let mime = MimeGuess::from_path(&path).first_or_octet_stream();
    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, mime.as_ref().parse().unwrap());
    Ok(response)
}

fn page_param(params: &HashMap<String, String>) -> usize {
    params
        .get("page")
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|page| *page >= 1)
        .unwrap_or(1)
}
