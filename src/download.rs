#![forbid(unsafe_code)]

//! Download orchestration: a single-flight lock, a yt-dlp wrapper and the
//! sequenced chain worker that walks every channel's checkpoint forward.
//!
//! At most one download runs at a time. The authoritative guard is an
//! in-process mutex; a marker file holding the worker's PID is persisted
//! next to the database so an operator (and the API) can see a download in
//! progress, and so a crash leaves evidence. A marker whose PID is no
//! longer alive is stale and gets cleared on the next acquisition.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use nix::{sys::signal::kill, unistd::Pid};
use rand::Rng;

use crate::scan::scan_local_videos;
use crate::settings::SettingsStore;
use crate::store::{ArchiveStore, is_synthetic_id};

pub const LOCK_FILE: &str = "download.lock";

#[cfg(test)]
static YT_DLP_STUB: std::sync::Mutex<Option<PathBuf>> = std::sync::Mutex::new(None);
#[cfg(test)]
static STUB_USE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn yt_dlp_command() -> Command {
    #[cfg(test)]
    {
        if let Some(path) = YT_DLP_STUB.lock().unwrap().clone() {
            return Command::new(path);
        }
    }
    Command::new("yt-dlp")
}

fn pid_alive(pid: i32) -> bool {
    // EPERM still proves the process exists, it just belongs to someone
    // else.
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Single-flight guard for the whole download pipeline.
pub struct DownloadLock {
    path: PathBuf,
    guard: Arc<tokio::sync::Mutex<()>>,
}

/// Held while a download (or chain) runs; releases the marker on drop.
/// Owns its mutex slot, so it stays valid across await points and task
/// boundaries.
pub struct LockGuard {
    path: PathBuf,
    _held: tokio::sync::OwnedMutexGuard<()>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(self.path.clone()) {
            log::warn!("could not remove {}: {err}", self.path.display());
        }
    }
}

impl DownloadLock {
    pub fn new(archive_root: &Path) -> Self {
        Self {
            path: archive_root.join(LOCK_FILE),
            guard: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Marker existence is the externally visible "downloading" signal.
    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }

    /// Non-blocking acquisition. `None` means another download holds the
    /// lock right now.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        let Ok(held) = Arc::clone(&self.guard).try_lock_owned() else {
            return Ok(None);
        };
        if let Ok(raw) = fs::read_to_string(&self.path) {
            let recorded = raw.trim().parse::<i32>().ok();
            let own_pid = std::process::id() as i32;
            match recorded {
                Some(pid) if pid != own_pid && pid_alive(pid) => {
                    // A live foreign process owns the marker; back off.
                    drop(held);
                    return Ok(None);
                }
                _ => {
                    log::warn!(
                        "clearing stale download lock {} (pid {:?})",
                        self.path.display(),
                        recorded
                    );
                    fs::remove_file(&self.path).with_context(|| {
                        format!("removing stale lock {}", self.path.display())
                    })?;
                }
            }
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&self.path, std::process::id().to_string())
            .with_context(|| format!("writing lock marker {}", self.path.display()))?;
        Ok(Some(LockGuard {
            path: self.path.clone(),
            _held: held,
        }))
    }
}

/// Media fetcher seam; production wraps yt-dlp, tests record invocations.
pub trait Downloader: Send + Sync {
    fn download(&self, video_url: &str, dest_dir: &Path, cookie_path: Option<&Path>) -> Result<()>;
}

/// Shells out to yt-dlp, keeping the `Title [VIDEOID].ext` naming the
/// local scanner expects.
pub struct YtDlpDownloader;

impl Downloader for YtDlpDownloader {
    fn download(&self, video_url: &str, dest_dir: &Path, cookie_path: Option<&Path>) -> Result<()> {
        let mut command = yt_dlp_command();
        command
            .arg("--paths")
            .arg(dest_dir)
            .arg("--output")
            .arg("%(title)s [%(id)s].%(ext)s")
            .arg("--write-thumbnail")
            .arg("--no-progress");
        if let Some(cookies) = cookie_path
            && cookies.exists()
        {
            command.arg("--cookies").arg(cookies);
        }
        command.arg(video_url);

        let status = command
            .status()
            .context("spawning yt-dlp (is it installed and in PATH?)")?;
        if !status.success() {
            bail!("yt-dlp exited with {status} for {video_url}");
        }
        Ok(())
    }
}

/// What a single download attempt amounted to. Variants carrying the
/// channel ID feed the chain's checkpoint advance; failures are part of
/// normal operation (member-only or deleted videos) and still advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Busy,
    UnknownVideo,
    NoDownloadRoot,
    SkippedSynthetic { channel_id: String },
    Completed { channel_id: String },
    Failed { channel_id: String },
}

pub struct DownloadOrchestrator {
    store: ArchiveStore,
    settings: Arc<SettingsStore>,
    lock: DownloadLock,
    downloader: Arc<dyn Downloader>,
}

impl DownloadOrchestrator {
    pub fn new(
        store: ArchiveStore,
        settings: Arc<SettingsStore>,
        archive_root: &Path,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            store,
            settings,
            lock: DownloadLock::new(archive_root),
            downloader,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock.is_locked()
    }

    /// Downloads one video. `sequenced` marks chain-driven attempts, which
    /// observe slow-mode pacing; manual attempts trigger a local rescan on
    /// success instead.
    pub async fn download_single(&self, video_id: &str, sequenced: bool) -> Result<DownloadOutcome> {
        let Some(guard) = self.lock.try_acquire()? else {
            return Ok(DownloadOutcome::Busy);
        };
        let Some(video) = self.store.get_video(video_id).await? else {
            return Ok(DownloadOutcome::UnknownVideo);
        };
        let settings = self.settings.get();

        let outcome = if is_synthetic_id(video_id) {
            log::info!("skipping synthetic video {video_id}");
            DownloadOutcome::SkippedSynthetic {
                channel_id: video.channel_id.clone(),
            }
        } else {
            if settings.download_root.is_empty() {
                return Ok(DownloadOutcome::NoDownloadRoot);
            }
            let date_part: String = video.upload_date.chars().take(10).collect();
            let dest_dir = Path::new(&settings.download_root)
                .join(&video.channel_id)
                .join("by_upload_date")
                .join(date_part);
            fs::create_dir_all(&dest_dir)
                .with_context(|| format!("creating {}", dest_dir.display()))?;

            let downloader = Arc::clone(&self.downloader);
            let url = format!("https://www.youtube.com/watch?v={video_id}");
            let cookie_path = (!settings.cookie_path.is_empty())
                .then(|| PathBuf::from(&settings.cookie_path));
            let result = tokio::task::spawn_blocking(move || {
                downloader.download(&url, &dest_dir, cookie_path.as_deref())
            })
            .await?;

            match result {
                Ok(()) => DownloadOutcome::Completed {
                    channel_id: video.channel_id.clone(),
                },
                Err(err) => {
                    log::warn!("download of {video_id} failed: {err:#}");
                    DownloadOutcome::Failed {
                        channel_id: video.channel_id.clone(),
                    }
                }
            }
        };

        if sequenced
            && settings.slow_mode
            && !matches!(outcome, DownloadOutcome::SkippedSynthetic { .. })
        {
            tokio::time::sleep(jittered(settings.sleep_time)).await;
        }
        drop(guard);

        if !sequenced
            && matches!(outcome, DownloadOutcome::Completed { .. })
            && !settings.scan_root.is_empty()
        {
            scan_local_videos(&self.store, Path::new(&settings.scan_root)).await?;
        }
        Ok(outcome)
    }

    /// Advances the callback channel's checkpoint, then picks the next
    /// video to download: the first channel (in enumeration order) owning
    /// a video right past its checkpoint.
    pub async fn advance_and_dispatch(
        &self,
        callback_channel: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(channel_id) = callback_channel {
            self.store
                .update_checkpoint(channel_id, crate::store::CheckpointChange::Offset(1))
                .await?;
        }
        for channel in self.store.list_channels().await? {
            if is_synthetic_id(&channel.channel_id) {
                continue;
            }
            if let Some(video_id) = self
                .store
                .video_at_index(&channel.channel_id, channel.checkpoint_idx + 1)
                .await?
            {
                return Ok(Some(video_id));
            }
        }
        Ok(None)
    }

    /// The chain worker: repeatedly pick, download, advance, until no
    /// channel has anything past its checkpoint. Ends with a local rescan
    /// so finished files show up immediately. Returns the number of chain
    /// steps taken.
    pub async fn run_chain(&self) -> Result<usize> {
        let mut callback: Option<String> = None;
        let mut steps = 0;
        loop {
            let Some(video_id) = self.advance_and_dispatch(callback.as_deref()).await? else {
                break;
            };
            match self.download_single(&video_id, true).await? {
                DownloadOutcome::Busy => {
                    log::info!("chain yielding: download lock is held elsewhere");
                    return Ok(steps);
                }
                DownloadOutcome::NoDownloadRoot => {
                    log::warn!("chain stopped: no download root configured");
                    return Ok(steps);
                }
                DownloadOutcome::UnknownVideo => {
                    bail!("chain dispatched vanished video {video_id}");
                }
                DownloadOutcome::SkippedSynthetic { channel_id }
                | DownloadOutcome::Completed { channel_id }
                | DownloadOutcome::Failed { channel_id } => {
                    callback = Some(channel_id);
                    steps += 1;
                }
            }
        }
        let scan_root = self.settings.get().scan_root;
        if !scan_root.is_empty() {
            scan_local_videos(&self.store, Path::new(&scan_root)).await?;
        }
        Ok(steps)
    }
}

fn jittered(base_secs: u64) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.9..=1.1);
    Duration::from_secs_f64(base_secs as f64 * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DownloadSettings;
    use crate::store::testutil::{create_store, sample_channel, sample_video};
    use parking_lot::Mutex;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[cfg(test)]
    fn set_ytdlp_stub_path(path: PathBuf) -> YtDlpStubGuard {
        let guard = STUB_USE_LOCK.lock().unwrap();
        {
            let mut lock = YT_DLP_STUB.lock().unwrap();
            *lock = Some(path);
        }
        YtDlpStubGuard { lock: Some(guard) }
    }

    struct YtDlpStubGuard {
        lock: Option<std::sync::MutexGuard<'static, ()>>,
    }

    impl Drop for YtDlpStubGuard {
        fn drop(&mut self) {
            *YT_DLP_STUB.lock().unwrap() = None;
            self.lock.take();
        }
    }

    fn write_stub_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("yt-dlp-stub.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    /// Records every requested URL; scripted to fail on demand.
    #[derive(Default)]
    struct RecordingDownloader {
        calls: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Downloader for RecordingDownloader {
        fn download(&self, video_url: &str, _dest: &Path, _cookies: Option<&Path>) -> Result<()> {
            self.calls.lock().push(video_url.to_owned());
            if self.fail {
                bail!("scripted failure");
            }
            Ok(())
        }
    }

    fn quiet_settings(dir: &Path, download_root: &Path) -> Arc<SettingsStore> {
        let settings = SettingsStore::load(dir).unwrap();
        settings
            .update(DownloadSettings {
                slow_mode: false,
                sleep_time: 0,
                cookie_path: String::new(),
                download_root: download_root.to_string_lossy().into_owned(),
                scan_root: String::new(),
            })
            .unwrap();
        Arc::new(settings)
    }

    #[test]
    fn lock_is_mutually_exclusive_and_released() {
        let dir = tempdir().unwrap();
        let lock = DownloadLock::new(dir.path());
        assert!(!lock.is_locked());

        let guard = lock.try_acquire().unwrap().expect("first acquire");
        assert!(lock.is_locked());
        assert!(lock.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(!lock.is_locked());
        let again = lock.try_acquire().unwrap();
        assert!(again.is_some());
    }

    #[test]
    fn stale_marker_from_dead_pid_is_cleared() {
        let dir = tempdir().unwrap();
        let lock = DownloadLock::new(dir.path());
        // i32::MAX is far past any real PID space.
        fs::write(dir.path().join(LOCK_FILE), i32::MAX.to_string()).unwrap();

        let guard = lock.try_acquire().unwrap();
        assert!(guard.is_some());
    }

    #[test]
    fn marker_with_own_pid_is_treated_as_stale() {
        let dir = tempdir().unwrap();
        let lock = DownloadLock::new(dir.path());
        fs::write(dir.path().join(LOCK_FILE), std::process::id().to_string()).unwrap();
        assert!(lock.try_acquire().unwrap().is_some());
    }

    #[test]
    fn marker_of_live_foreign_process_blocks() {
        let dir = tempdir().unwrap();
        let lock = DownloadLock::new(dir.path());
        // PID 1 is always alive.
        fs::write(dir.path().join(LOCK_FILE), "1").unwrap();
        assert!(lock.try_acquire().unwrap().is_none());
        // And the marker was left alone.
        assert!(lock.is_locked());
    }

    #[tokio::test]
    async fn download_single_reports_busy_and_unknown() -> Result<()> {
        let (_temp, store) = create_store().await?;
        let dir = tempdir()?;
        let media = tempdir()?;
        let orchestrator = DownloadOrchestrator::new(
            store,
            quiet_settings(dir.path(), media.path()),
            dir.path(),
            Arc::new(RecordingDownloader::default()),
        );

        assert_eq!(
            orchestrator.download_single("missing", false).await?,
            DownloadOutcome::UnknownVideo
        );

        let _held = orchestrator.lock.try_acquire()?.expect("manual acquire");
        assert_eq!(
            orchestrator.download_single("missing", false).await?,
            DownloadOutcome::Busy
        );
        Ok(())
    }

    #[tokio::test]
    async fn download_single_completes_and_releases_lock() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        store
            .insert_video(&sample_video("vidA2345678", "C1", "2024-01-05T12:00:00Z"))
            .await?;
        store.regenerate_upload_index("C1").await?;

        let dir = tempdir()?;
        let media = tempdir()?;
        let downloader = Arc::new(RecordingDownloader::default());
        let orchestrator = DownloadOrchestrator::new(
            store,
            quiet_settings(dir.path(), media.path()),
            dir.path(),
            Arc::clone(&downloader) as Arc<dyn Downloader>,
        );

        let outcome = orchestrator.download_single("vidA2345678", false).await?;
        assert_eq!(
            outcome,
            DownloadOutcome::Completed {
                channel_id: "C1".into()
            }
        );
        assert_eq!(
            *downloader.calls.lock(),
            vec!["https://www.youtube.com/watch?v=vidA2345678".to_string()]
        );
        assert!(media.path().join("C1/by_upload_date/2024-01-05").is_dir());
        assert!(!orchestrator.is_busy());
        Ok(())
    }

    #[tokio::test]
    async fn downloads_run_on_spawned_tasks() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        store
            .insert_video(&sample_video("vidA2345678", "C1", "2024-01-05T12:00:00Z"))
            .await?;
        store.regenerate_upload_index("C1").await?;

        let dir = tempdir()?;
        let media = tempdir()?;
        let downloader = Arc::new(RecordingDownloader::default());
        let orchestrator = Arc::new(DownloadOrchestrator::new(
            store,
            quiet_settings(dir.path(), media.path()),
            dir.path(),
            Arc::clone(&downloader) as Arc<dyn Downloader>,
        ));

        // The API hands these futures to the runtime, so they have to
        // cross threads with the lock guard held inside.
        let single = Arc::clone(&orchestrator);
        let outcome =
            tokio::spawn(async move { single.download_single("vidA2345678", false).await })
                .await??;
        assert_eq!(
            outcome,
            DownloadOutcome::Completed {
                channel_id: "C1".into()
            }
        );

        let chained = Arc::clone(&orchestrator);
        let steps = tokio::spawn(async move { chained.run_chain().await }).await??;
        assert_eq!(steps, 1);
        assert!(!orchestrator.is_busy());
        Ok(())
    }

    #[tokio::test]
    async fn failed_download_still_releases_lock() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        store
            .insert_video(&sample_video("vidA2345678", "C1", "2024-01-05T12:00:00Z"))
            .await?;

        let dir = tempdir()?;
        let media = tempdir()?;
        let downloader = Arc::new(RecordingDownloader {
            calls: Mutex::new(Vec::new()),
            fail: true,
        });
        let orchestrator = DownloadOrchestrator::new(
            store,
            quiet_settings(dir.path(), media.path()),
            dir.path(),
            downloader,
        );

        let outcome = orchestrator.download_single("vidA2345678", false).await?;
        assert_eq!(
            outcome,
            DownloadOutcome::Failed {
                channel_id: "C1".into()
            }
        );
        assert!(!orchestrator.is_busy());
        Ok(())
    }

    #[tokio::test]
    async fn synthetic_videos_never_hit_the_downloader() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        store
            .insert_video(&sample_video("__0x00001__", "C1", "2024-01-05T12:00:00Z"))
            .await?;

        let dir = tempdir()?;
        let media = tempdir()?;
        let downloader = Arc::new(RecordingDownloader::default());
        let orchestrator = DownloadOrchestrator::new(
            store,
            quiet_settings(dir.path(), media.path()),
            dir.path(),
            Arc::clone(&downloader) as Arc<dyn Downloader>,
        );

        let outcome = orchestrator.download_single("__0x00001__", false).await?;
        assert_eq!(
            outcome,
            DownloadOutcome::SkippedSynthetic {
                channel_id: "C1".into()
            }
        );
        assert!(downloader.calls.lock().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn chain_walks_every_channel_and_advances_checkpoints() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        store.upsert_channel(&sample_channel("C2")).await?;
        for (id, chan, date) in [
            ("vidA2345678", "C1", "2024-01-01T00:00:00Z"),
            ("vidB2345678", "C1", "2024-02-01T00:00:00Z"),
            ("vidC2345678", "C2", "2024-01-15T00:00:00Z"),
        ] {
            store.insert_video(&sample_video(id, chan, date)).await?;
        }
        store.regenerate_upload_index("C1").await?;
        store.regenerate_upload_index("C2").await?;

        let dir = tempdir()?;
        let media = tempdir()?;
        let downloader = Arc::new(RecordingDownloader::default());
        let orchestrator = DownloadOrchestrator::new(
            store.clone(),
            quiet_settings(dir.path(), media.path()),
            dir.path(),
            Arc::clone(&downloader) as Arc<dyn Downloader>,
        );

        let steps = orchestrator.run_chain().await?;
        assert_eq!(steps, 3);
        assert_eq!(
            *downloader.calls.lock(),
            vec![
                "https://www.youtube.com/watch?v=vidA2345678".to_string(),
                "https://www.youtube.com/watch?v=vidB2345678".to_string(),
                "https://www.youtube.com/watch?v=vidC2345678".to_string(),
            ]
        );
        assert_eq!(store.get_channel("C1").await?.unwrap().checkpoint_idx, 2);
        assert_eq!(store.get_channel("C2").await?.unwrap().checkpoint_idx, 1);
        assert!(!orchestrator.is_busy());
        Ok(())
    }

    #[tokio::test]
    async fn chain_skips_synthetic_videos_but_advances_past_them() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        for (id, date) in [
            ("vidA2345678", "2024-01-01T00:00:00Z"),
            ("__0x00001__", "2024-02-01T00:00:00Z"),
            ("vidB2345678", "2024-03-01T00:00:00Z"),
        ] {
            store.insert_video(&sample_video(id, "C1", date)).await?;
        }
        store.regenerate_upload_index("C1").await?;

        let dir = tempdir()?;
        let media = tempdir()?;
        let downloader = Arc::new(RecordingDownloader::default());
        let orchestrator = DownloadOrchestrator::new(
            store.clone(),
            quiet_settings(dir.path(), media.path()),
            dir.path(),
            Arc::clone(&downloader) as Arc<dyn Downloader>,
        );

        let steps = orchestrator.run_chain().await?;
        assert_eq!(steps, 3);
        assert_eq!(
            *downloader.calls.lock(),
            vec![
                "https://www.youtube.com/watch?v=vidA2345678".to_string(),
                "https://www.youtube.com/watch?v=vidB2345678".to_string(),
            ]
        );
        assert_eq!(store.get_channel("C1").await?.unwrap().checkpoint_idx, 3);
        Ok(())
    }

    #[test]
    fn ytdlp_downloader_runs_the_stubbed_binary() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("invoked");
        let stub = write_stub_script(
            dir.path(),
            &format!("touch {}\nexit 0", marker.display()),
        );
        let _guard = set_ytdlp_stub_path(stub);

        YtDlpDownloader
            .download("https://example.invalid/v", dir.path(), None)
            .unwrap();
        assert!(marker.exists());
    }

    #[test]
    fn ytdlp_downloader_propagates_failure_status() {
        let dir = tempdir().unwrap();
        let stub = write_stub_script(dir.path(), "exit 3");
        let _guard = set_ytdlp_stub_path(stub);

        let err = YtDlpDownloader
            .download("https://example.invalid/v", dir.path(), None)
            .unwrap_err();
        assert!(err.to_string().contains("yt-dlp exited"));
    }
}
