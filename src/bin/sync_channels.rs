#![forbid(unsafe_code)]

//! Catalogue maintenance CLI, meant to run from cron. The default pass
//! syncs every tracked channel, patches missing durations and rescans the
//! local media tree; flags narrow it down to a single task.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use vtarchive_tools::config::{RuntimeOverrides, resolve_runtime_paths};
use vtarchive_tools::scan::scan_local_videos;
use vtarchive_tools::search::rebuild_search_index;
use vtarchive_tools::security::ensure_not_root;
use vtarchive_tools::settings::SettingsStore;
use vtarchive_tools::store::ArchiveStore;
use vtarchive_tools::sync::{
    backfill_owner_tag, fetch_channel, fetch_uploads, repair_zero_durations, sync_all,
};
use vtarchive_tools::tokenize::DefaultTokenizer;
use vtarchive_tools::ytapi::YouTubeProvider;

const CATALOGUE_DB_FILE: &str = "catalogue.db";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    /// Sync every channel, repair durations, rescan local files.
    Routine,
    SyncOne(String),
    Add(String),
    RepairDurations,
    Scan,
    RebuildIndex,
}

#[derive(Debug, Clone)]
struct SyncArgs {
    archive_root_override: Option<PathBuf>,
    action: Action,
}

impl SyncArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut archive_root_override: Option<PathBuf> = None;
        let mut action: Option<Action> = None;
        let mut set_action = |next: Action| -> Result<()> {
            if action.is_some() {
                bail!(
                    "--channel, --add, --repair-durations, --scan and --rebuild-index \
                     are mutually exclusive"
                );
            }
            action = Some(next);
            Ok(())
        };

        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--archive-root=") {
                archive_root_override = Some(PathBuf::from(value));
                continue;
            }
            if let Some(value) = arg.strip_prefix("--channel=") {
                set_action(Action::SyncOne(value.to_owned()))?;
                continue;
            }
            if let Some(value) = arg.strip_prefix("--add=") {
                set_action(Action::Add(value.to_owned()))?;
                continue;
            }

            match arg.as_str() {
                "--archive-root" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--archive-root requires a value"))?;
                    archive_root_override = Some(PathBuf::from(value));
                }
                "--channel" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--channel requires a channel ID"))?;
                    set_action(Action::SyncOne(value))?;
                }
                "--add" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--add requires a channel ID"))?;
                    set_action(Action::Add(value))?;
                }
                "--repair-durations" => set_action(Action::RepairDurations)?,
                "--scan" => set_action(Action::Scan)?,
                "--rebuild-index" => set_action(Action::RebuildIndex)?,
                other => {
                    bail!(
                        "unknown argument {other}; expected --archive-root, --channel, --add, \
                         --repair-durations, --scan or --rebuild-index"
                    );
                }
            }
        }

        Ok(Self {
            archive_root_override,
            action: action.unwrap_or(Action::Routine),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = SyncArgs::parse()?;
    ensure_not_root("sync_channels")?;

    let runtime_paths = resolve_runtime_paths(RuntimeOverrides {
        archive_root: args.archive_root_override.clone(),
        ..RuntimeOverrides::default()
    })?;
    let archive_root = args
        .archive_root_override
        .unwrap_or(runtime_paths.archive_root);

    let store = ArchiveStore::open(&archive_root.join(CATALOGUE_DB_FILE))
        .await
        .context("initializing catalogue store")?;
    let settings = SettingsStore::load(&archive_root)?;
    let tokenizer = DefaultTokenizer;

    // Scan and index rebuild work offline; everything else talks to the
    // origin.
    if args.action == Action::Scan {
        return rescan(&store, &settings).await;
    }
    if args.action == Action::RebuildIndex {
        let rebuilt = rebuild_search_index(&store, &tokenizer).await?;
        println!("Search index rebuilt for {rebuilt} videos");
        return Ok(());
    }

    let api_key = runtime_paths
        .youtube_api_key
        .ok_or_else(|| anyhow!("YOUTUBE_API_KEY not set"))?;
    let provider = YouTubeProvider::new(api_key);

    match args.action {
        Action::Routine => {
            let inserted = sync_all(&store, &provider, &tokenizer).await?;
            println!("Sync complete: {inserted} new videos");
            let patched = repair_zero_durations(&store, &provider).await?;
            if patched > 0 {
                println!("Patched {patched} missing durations");
            }
            rescan(&store, &settings).await?;
        }
        Action::SyncOne(channel_id) => {
            if store.get_channel(&channel_id).await?.is_none() {
                bail!("channel {channel_id} is not tracked; use --add first");
            }
            fetch_channel(&store, &provider, &channel_id).await?;
            let inserted = fetch_uploads(&store, &provider, &tokenizer, &channel_id).await?;
            backfill_owner_tag(&store, &channel_id).await?;
            println!("Synced {channel_id}: {inserted} new videos");
        }
        Action::Add(channel_id) => {
            if store.get_channel(&channel_id).await?.is_some() {
                bail!("channel {channel_id} is already tracked");
            }
            fetch_channel(&store, &provider, &channel_id).await?;
            let inserted = fetch_uploads(&store, &provider, &tokenizer, &channel_id).await?;
            println!("Added {channel_id} with {inserted} videos");
        }
        Action::RepairDurations => {
            let patched = repair_zero_durations(&store, &provider).await?;
            println!("Patched {patched} missing durations");
        }
        // Handled by the early returns above.
        Action::Scan | Action::RebuildIndex => {}
    }

    Ok(())
}

async fn rescan(store: &ArchiveStore, settings: &SettingsStore) -> Result<()> {
    let scan_root = settings.get().scan_root;
    if scan_root.is_empty() {
        println!("No scanRoot configured, skipping local scan");
        return Ok(());
    }
    let recorded = scan_local_videos(store, std::path::Path::new(&scan_root)).await?;
    println!("Local scan recorded {recorded} files");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_means_the_routine_pass() {
        let args = SyncArgs::from_iter(std::iter::empty()).unwrap();
        assert_eq!(args.action, Action::Routine);
        assert!(args.archive_root_override.is_none());
    }

    #[test]
    fn actions_parse_in_both_flag_styles() {
        let args = SyncArgs::from_iter(
            ["--archive-root=/tmp/a", "--channel", "UCabc"]
                .into_iter()
                .map(String::from),
        )
        .unwrap();
        assert_eq!(args.archive_root_override, Some(PathBuf::from("/tmp/a")));
        assert_eq!(args.action, Action::SyncOne("UCabc".into()));

        let args =
            SyncArgs::from_iter(["--add=UCdef".to_string()]).unwrap();
        assert_eq!(args.action, Action::Add("UCdef".into()));

        let args = SyncArgs::from_iter(["--repair-durations".to_string()]).unwrap();
        assert_eq!(args.action, Action::RepairDurations);

        let args = SyncArgs::from_iter(["--scan".to_string()]).unwrap();
        assert_eq!(args.action, Action::Scan);

        let args = SyncArgs::from_iter(["--rebuild-index".to_string()]).unwrap();
        assert_eq!(args.action, Action::RebuildIndex);
    }

    #[test]
    fn actions_are_mutually_exclusive() {
        let err = SyncArgs::from_iter(
            ["--scan", "--repair-durations"].into_iter().map(String::from),
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        let err = SyncArgs::from_iter(["--frobnicate".to_string()]).unwrap_err();
        assert!(err.to_string().contains("unknown argument"));
    }
}
