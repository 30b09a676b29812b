//! M3U/M3U8 playlist reading
//!
//! DJ software rewrites a playlist each time a track starts; the playing
//! track is the last entry.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const PLAYLIST_EXTENSIONS: &[&str] = &["m3u", "m3u8"];

pub fn is_playlist(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| PLAYLIST_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Last non-empty, non-comment line
pub fn last_entry_line(contents: &str) -> Option<&str> {
    contents
        .lines()
        .map(|line| line.trim_start_matches('\u{feff}').trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .last()
}

/// Resolve an entry to an existing file: as written, then relative to the
/// playlist directory. `file://` prefixes are stripped.
pub fn resolve_entry(entry: &str, playlist_dir: &Path) -> Option<PathBuf> {
    let location = entry.strip_prefix("file://").unwrap_or(entry);
    let direct = PathBuf::from(location);
    if direct.is_absolute() && direct.exists() {
        return Some(direct);
    }
    let relative = playlist_dir.join(location);
    if relative.exists() {
        return Some(relative);
    }
    None
}

/// UTF-8 when valid, otherwise bytes read as Latin-1
fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Track the playlist currently points at.
///
/// `None` for an empty playlist, a playlist without entries, or an entry that
/// does not exist on disk.
pub fn read_current_track(playlist: &Path) -> std::io::Result<Option<PathBuf>> {
    let bytes = std::fs::read(playlist)?;
    if bytes.is_empty() {
        debug!(playlist = %playlist.display(), "Playlist is empty, ignoring for now");
        return Ok(None);
    }

    let contents = decode(&bytes);
    let Some(entry) = last_entry_line(&contents) else {
        return Ok(None);
    };

    let playlist_dir = playlist.parent().unwrap_or_else(|| Path::new("."));
    match resolve_entry(entry, playlist_dir) {
        Some(track) => Ok(Some(track)),
        None => {
            warn!(playlist = %playlist.display(), entry, "Playlist entry not found, skipping");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_last_entry_line() {
        let contents = "#EXTM3U\n#EXTINF:123,First\n/music/one.mp3\n\n#EXTINF:200,Second\n/music/two.mp3\n\n";
        assert_eq!(last_entry_line(contents), Some("/music/two.mp3"));
        assert_eq!(last_entry_line("#EXTM3U\n\n"), None);
        assert_eq!(last_entry_line("\u{feff}track.mp3\r\n"), Some("track.mp3"));
    }

    #[test]
    fn test_is_playlist() {
        assert!(is_playlist(Path::new("/a/b.m3u")));
        assert!(is_playlist(Path::new("/a/b.M3U8")));
        assert!(!is_playlist(Path::new("/a/b.mp3")));
        assert!(!is_playlist(Path::new("/a/m3u")));
    }

    #[test]
    fn test_read_current_track_resolves_relative_and_file_url() {
        let dir = TempDir::new().unwrap();
        let track = dir.path().join("song.mp3");
        std::fs::write(&track, b"x").unwrap();

        let playlist = dir.path().join("now.m3u");
        std::fs::write(&playlist, "#EXTM3U\nmissing.mp3\nsong.mp3\n").unwrap();
        assert_eq!(read_current_track(&playlist).unwrap(), Some(track.clone()));

        std::fs::write(&playlist, format!("file://{}\n", track.display())).unwrap();
        assert_eq!(read_current_track(&playlist).unwrap(), Some(track));
    }

    #[test]
    fn test_read_current_track_skips_missing_and_empty() {
        let dir = TempDir::new().unwrap();
        let playlist = dir.path().join("now.m3u8");

        std::fs::write(&playlist, "").unwrap();
        assert_eq!(read_current_track(&playlist).unwrap(), None);

        std::fs::write(&playlist, "/does/not/exist.mp3\n").unwrap();
        assert_eq!(read_current_track(&playlist).unwrap(), None);
    }

    #[test]
    fn test_latin1_entry() {
        let dir = TempDir::new().unwrap();
        let track = dir.path().join("caf\u{e9}.mp3");
        std::fs::write(&track, b"x").unwrap();

        let playlist = dir.path().join("now.m3u");
        std::fs::write(&playlist, b"caf\xe9.mp3\n").unwrap();
        assert_eq!(read_current_track(&playlist).unwrap(), Some(track));
    }
}
