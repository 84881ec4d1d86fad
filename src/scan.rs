#![forbid(unsafe_code)]

//! Local media scanner. Downloaded files keep the `Title [VIDEOID].ext`
//! naming convention, so the 11-character ID sits at a fixed offset from
//! the end of the stem. The scan is a full resync: whatever the walk does
//! not see again is dropped from the local-file index.

use std::path::Path;

use anyhow::Result;
use walkdir::WalkDir;

use crate::store::ArchiveStore;

const MEDIA_EXTENSIONS: [&str; 2] = ["mp4", "webm"];

fn candidate_video_id(stem: &str) -> Option<String> {
    let chars: Vec<char> = stem.chars().collect();
    if chars.len() < 12 {
        return None;
    }
    // `Title [VIDEOID]` => the ID is the 11 characters before the closing
    // bracket.
    Some(chars[chars.len() - 12..chars.len() - 1].iter().collect())
}

/// Walks `scan_root`, records every media file whose embedded ID is
/// catalogued, and prunes index rows for files that are gone. Returns the
/// number of files recorded.
pub async fn scan_local_videos(store: &ArchiveStore, scan_root: &Path) -> Result<usize> {
    let mut seen: Vec<String> = Vec::new();
    for entry in WalkDir::new(scan_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let is_media = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                MEDIA_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            });
        if !is_media {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(video_id) = candidate_video_id(stem) else {
            continue;
        };
        if !store.video_exists(&video_id).await? {
            log::debug!("skipping uncatalogued file {}", path.display());
            continue;
        }
        store
            .upsert_local_video(&video_id, &path.to_string_lossy())
            .await?;
        if !seen.contains(&video_id) {
            seen.push(video_id);
        }
    }

    let pruned = store.prune_local_videos(&seen).await?;
    if pruned > 0 {
        log::info!("pruned {pruned} vanished local files");
    }
    Ok(seen.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testutil::{create_store, sample_channel, sample_video};
    use std::fs;

    #[test]
    fn candidate_ids_come_from_the_stem_tail() {
        assert_eq!(
            candidate_video_id("My stream [vidA2345678]").as_deref(),
            Some("vidA2345678")
        );
        assert_eq!(candidate_video_id("short").as_deref(), None);
        // Multi-byte titles must not split the extraction mid-character.
        assert_eq!(
            candidate_video_id("歌枠アーカイブ [vidB2345678]").as_deref(),
            Some("vidB2345678")
        );
    }

    #[tokio::test]
    async fn scan_records_known_media_and_prunes_gone_files() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        for id in ["vidA2345678", "vidB2345678", "vidC2345678"] {
            store
                .insert_video(&sample_video(id, "C1", "2024-01-01T00:00:00Z"))
                .await?;
        }
        // Recorded previously, but its file no longer exists.
        store
            .upsert_local_video("vidC2345678", "/media/old/vidC2345678.mp4")
            .await?;

        let media = tempfile::tempdir()?;
        let nested = media.path().join("C1/by_upload_date/2024-01-01");
        fs::create_dir_all(&nested)?;
        fs::write(nested.join("First [vidA2345678].mp4"), b"x")?;
        fs::write(media.path().join("Second [vidB2345678].webm"), b"x")?;
        fs::write(media.path().join("notes.txt"), b"x")?;
        fs::write(media.path().join("Stray [vidZ9999999].mp4"), b"x")?;

        let recorded = scan_local_videos(&store, media.path()).await?;
        assert_eq!(recorded, 2);

        let first = store.get_local_video("vidA2345678").await?.unwrap();
        assert!(first.video_path.ends_with("First [vidA2345678].mp4"));
        assert!(store.get_local_video("vidB2345678").await?.is_some());
        // Uncatalogued file ignored, vanished file pruned.
        assert!(store.get_local_video("vidZ9999999").await?.is_none());
        assert!(store.get_local_video("vidC2345678").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn rescan_is_idempotent() -> Result<()> {
        let (_temp, store) = create_store().await?;
        store.upsert_channel(&sample_channel("C1")).await?;
        store
            .insert_video(&sample_video("vidA2345678", "C1", "2024-01-01T00:00:00Z"))
            .await?;

        let media = tempfile::tempdir()?;
        fs::write(media.path().join("Only [vidA2345678].mp4"), b"x")?;

        assert_eq!(scan_local_videos(&store, media.path()).await?, 1);
        assert_eq!(scan_local_videos(&store, media.path()).await?, 1);
        assert!(store.get_local_video("vidA2345678").await?.is_some());
        Ok(())
    }
}
