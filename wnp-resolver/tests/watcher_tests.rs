//! Source watcher tests against real directories

use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wnp_common::events::{EventBus, WnpEvent};
use wnp_resolver::config::{SourceConfig, WatchMode};
use wnp_resolver::types::TrackEvent;
use wnp_resolver::watcher::SourceWatcher;

fn source(path: &Path, mode: WatchMode) -> SourceConfig {
    SourceConfig {
        id: "deck".to_string(),
        paths: vec![path.to_path_buf()],
        mode,
        poll_interval_ms: 30,
        debounce_ms: 60,
    }
}

async fn next_event(rx: &mut mpsc::Receiver<TrackEvent>) -> TrackEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for track event")
        .expect("watcher stopped")
}

async fn next_status(rx: &mut tokio::sync::broadcast::Receiver<WnpEvent>) -> bool {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for status event")
            .unwrap();
        if let WnpEvent::SourceStatusChanged { available, .. } = event {
            return available;
        }
    }
}

/// Wait long enough for mtimes to differ on coarse-grained file systems
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1100)).await;
}

#[tokio::test]
async fn test_poll_playlist_directory_emits_last_entry() {
    let dir = TempDir::new().unwrap();
    let track_a = dir.path().join("a.mp3");
    let track_b = dir.path().join("b.mp3");
    std::fs::write(&track_a, b"a").unwrap();
    std::fs::write(&track_b, b"b").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = SourceWatcher::new(source(dir.path(), WatchMode::Poll), EventBus::new(16)).spawn(tx, cancel.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(dir.path().join("now.m3u"), "#EXTM3U\na.mp3\nb.mp3\n").unwrap();

    let event = next_event(&mut rx).await;
    assert_eq!(event.source_id, "deck");
    assert_eq!(event.track_ref, track_b);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_burst_of_writes_is_coalesced() {
    let dir = TempDir::new().unwrap();
    let playlist = dir.path().join("now.m3u8");
    for name in ["1.mp3", "2.mp3", "3.mp3"] {
        std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    std::fs::write(&playlist, "").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let mut config = source(&playlist, WatchMode::Poll);
    config.debounce_ms = 400;
    let handle = SourceWatcher::new(config, EventBus::new(16)).spawn(tx, cancel.clone());

    settle().await;
    // Rewritten three times inside one debounce window
    std::fs::write(&playlist, "1.mp3\n").unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    std::fs::write(&playlist, "1.mp3\n2.mp3\n").unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    std::fs::write(&playlist, "1.mp3\n2.mp3\n3.mp3\n").unwrap();

    let event = next_event(&mut rx).await;
    assert_eq!(event.track_ref, dir.path().join("3.mp3"));
    assert!(tokio::time::timeout(Duration::from_millis(600), rx.recv()).await.is_err());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_missing_source_reported_then_recovers() {
    let dir = TempDir::new().unwrap();
    let watched = dir.path().join("playlists");

    let bus = EventBus::new(16);
    let mut status_rx = bus.subscribe();
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = SourceWatcher::new(source(&watched, WatchMode::Poll), bus).spawn(tx, cancel.clone());

    assert!(!next_status(&mut status_rx).await);

    std::fs::create_dir(&watched).unwrap();
    assert!(next_status(&mut status_rx).await);

    let track = watched.join("song.flac");
    std::fs::write(&track, b"x").unwrap();
    let event = next_event(&mut rx).await;
    assert_eq!(event.track_ref, track);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_notify_mode_sees_new_playlist() {
    let dir = TempDir::new().unwrap();
    let track = dir.path().join("song.mp3");
    std::fs::write(&track, b"x").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = SourceWatcher::new(source(dir.path(), WatchMode::Notify), EventBus::new(16)).spawn(tx, cancel.clone());

    tokio::time::sleep(Duration::from_millis(200)).await;
    std::fs::write(dir.path().join("now.m3u"), format!("{}\n", track.display())).unwrap();

    let event = next_event(&mut rx).await;
    assert_eq!(event.track_ref, track);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_rewritten_file_target_emits_each_change() {
    let dir = TempDir::new().unwrap();
    let track = dir.path().join("current.mp3");
    std::fs::write(&track, b"first").unwrap();

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = SourceWatcher::new(source(&track, WatchMode::Poll), EventBus::new(16)).spawn(tx, cancel.clone());

    settle().await;
    std::fs::write(&track, b"second").unwrap();
    assert_eq!(next_event(&mut rx).await.track_ref, track);

    // Same path, new content: a new track started
    settle().await;
    std::fs::write(&track, b"third").unwrap();
    assert_eq!(next_event(&mut rx).await.track_ref, track);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_file_target_reappearing_is_emitted_again() {
    let dir = TempDir::new().unwrap();
    let track = dir.path().join("current.mp3");
    std::fs::write(&track, b"first").unwrap();

    let bus = EventBus::new(16);
    let mut status_rx = bus.subscribe();
    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let handle = SourceWatcher::new(source(&track, WatchMode::Poll), bus).spawn(tx, cancel.clone());

    settle().await;
    std::fs::write(&track, b"second").unwrap();
    assert_eq!(next_event(&mut rx).await.track_ref, track);

    std::fs::remove_file(&track).unwrap();
    assert!(!next_status(&mut status_rx).await);

    std::fs::write(&track, b"second").unwrap();
    assert!(next_status(&mut status_rx).await);
    assert_eq!(next_event(&mut rx).await.track_ref, track);

    cancel.cancel();
    handle.await.unwrap();
}
