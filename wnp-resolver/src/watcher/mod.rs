//! Source watchers
//!
//! One long-lived task per configured source turns file changes into
//! `TrackEvent`s. A watched path is either a directory (playlists or audio
//! files inside it) or a single file. Changes come from `notify` or from
//! modification-time polling, and bursts for the same file are coalesced
//! within the debounce window (the last one wins).
//!
//! A missing path is reported once as `SourceUnavailable` and re-checked
//! every poll interval; emission for it resumes when it reappears.

pub mod m3u;

use crate::config::{SourceConfig, WatchMode};
use crate::error::ResolveError;
use crate::types::TrackEvent;
use chrono::Utc;
use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wnp_common::events::{EventBus, WnpEvent};

/// Extensions treated as playable tracks
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "m4a", "aac", "mp4", "wav", "opus", "wma", "aiff", "aif",
];

const RAW_CHANNEL_CAPACITY: usize = 1024;

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Track a changed file stands for: the entry a playlist points at, or the
/// audio file itself.
pub fn resolve_track(path: &Path) -> Option<PathBuf> {
    if m3u::is_playlist(path) {
        match m3u::read_current_track(path) {
            Ok(track) => track,
            Err(e) => {
                warn!(playlist = %path.display(), "Cannot read playlist: {}", e);
                None
            }
        }
    } else if is_audio_file(path) && path.is_file() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

/// Trailing-edge debouncer keyed by path
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record a change; a repeat inside the window pushes the deadline back
    pub fn touch(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.window);
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Remove and return the paths whose window has closed, oldest first
    pub fn take_due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut due: Vec<(PathBuf, Instant)> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(path, at)| (path.clone(), *at))
            .collect();
        due.sort_by_key(|(_, at)| *at);
        for (path, _) in &due {
            self.pending.remove(path);
        }
        due.into_iter().map(|(path, _)| path).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetKind {
    File,
    Directory,
}

struct WatchTarget {
    path: PathBuf,
    kind: TargetKind,
    available: bool,
    watcher: Option<RecommendedWatcher>,
}

impl WatchTarget {
    fn new(path: PathBuf) -> Self {
        let kind = if m3u::is_playlist(&path) || is_audio_file(&path) {
            TargetKind::File
        } else {
            TargetKind::Directory
        };
        Self {
            path,
            kind,
            available: true,
            watcher: None,
        }
    }

    fn exists(&self) -> bool {
        match self.kind {
            TargetKind::File => self.path.is_file(),
            TargetKind::Directory => self.path.is_dir(),
        }
    }

    /// Single files are watched through their directory so that replaced
    /// files keep being seen.
    fn watch_path(&self) -> PathBuf {
        match self.kind {
            TargetKind::File => self
                .path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            TargetKind::Directory => self.path.clone(),
        }
    }

    fn accepts(&self, changed: &Path) -> bool {
        match self.kind {
            TargetKind::File => changed.file_name() == self.path.file_name(),
            TargetKind::Directory => m3u::is_playlist(changed) || is_audio_file(changed),
        }
    }

    /// Candidate files with their modification times
    fn list_files(&self) -> Vec<(PathBuf, SystemTime)> {
        match self.kind {
            TargetKind::File => modified(&self.path).map(|t| vec![(self.path.clone(), t)]).unwrap_or_default(),
            TargetKind::Directory => match std::fs::read_dir(&self.path) {
                Ok(entries) => entries
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|path| path.is_file() && self.accepts(path))
                    .filter_map(|path| modified(&path).map(|t| (path, t)))
                    .collect(),
                Err(e) => {
                    debug!(path = %self.path.display(), "Cannot list directory: {}", e);
                    Vec::new()
                }
            },
        }
    }
}

fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Create(_) | EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Watches one source's paths
pub struct SourceWatcher {
    source: SourceConfig,
    event_bus: EventBus,
    targets: Vec<WatchTarget>,
    debouncer: Debouncer,
    mtimes: HashMap<PathBuf, SystemTime>,
    /// Changed file and its mtime behind the last emitted event
    last_change: Option<(PathBuf, Option<SystemTime>)>,
    raw_tx: mpsc::Sender<(usize, PathBuf)>,
    raw_rx: Option<mpsc::Receiver<(usize, PathBuf)>>,
}

impl SourceWatcher {
    pub fn new(source: SourceConfig, event_bus: EventBus) -> Self {
        let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        Self {
            targets: source.paths.iter().cloned().map(WatchTarget::new).collect(),
            debouncer: Debouncer::new(source.debounce_window()),
            source,
            event_bus,
            mtimes: HashMap::new(),
            last_change: None,
            raw_tx,
            raw_rx: Some(raw_rx),
        }
    }

    pub fn spawn(self, events: mpsc::Sender<TrackEvent>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(events, cancel))
    }

    /// Watch until cancelled or until the event receiver is dropped
    pub async fn run(mut self, events: mpsc::Sender<TrackEvent>, cancel: CancellationToken) {
        let Some(mut raw_rx) = self.raw_rx.take() else {
            return;
        };
        info!(
            source_id = %self.source.id,
            mode = ?self.source.mode,
            paths = self.targets.len(),
            "Source watcher started"
        );

        self.check_targets(Instant::now());
        if self.source.mode == WatchMode::Poll {
            self.scan(None);
        }

        let mut ticker = tokio::time::interval(self.source.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let due = self.debouncer.next_due();
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some((index, path)) = raw_rx.recv() => {
                    if let Some(target) = self.targets.get(index) {
                        if target.available && target.accepts(&path) {
                            debug!(source_id = %self.source.id, path = %path.display(), "Change notified");
                            self.debouncer.touch(path, Instant::now());
                        }
                    }
                }
                _ = ticker.tick() => {
                    let now = Instant::now();
                    self.check_targets(now);
                    if self.source.mode == WatchMode::Poll {
                        self.scan(Some(now));
                    }
                }
                _ = sleep_until_due(due) => {
                    if !self.flush(&events).await {
                        debug!(source_id = %self.source.id, "Event receiver closed");
                        break;
                    }
                }
            }
        }

        info!(source_id = %self.source.id, "Source watcher stopped");
    }

    /// Track availability transitions and (re)arm notify watches
    fn check_targets(&mut self, now: Instant) {
        for index in 0..self.targets.len() {
            let exists = self.targets[index].exists();
            let was_available = self.targets[index].available;

            if was_available && !exists {
                let target = &mut self.targets[index];
                target.available = false;
                target.watcher = None;
                if matches!(&self.last_change, Some((path, _)) if path.starts_with(&target.path)) {
                    self.last_change = None;
                }
                let error = ResolveError::SourceUnavailable(target.path.display().to_string());
                warn!(source_id = %self.source.id, "{}; re-checking every {:?}", error, self.source.poll_interval());
                self.emit_status(index, false);
                continue;
            }

            if !was_available && exists {
                self.targets[index].available = true;
                info!(source_id = %self.source.id, path = %self.targets[index].path.display(), "Source available again");
                self.emit_status(index, true);
                match self.targets[index].kind {
                    TargetKind::File => {
                        let path = self.targets[index].path.clone();
                        self.debouncer.touch(path, now);
                    }
                    TargetKind::Directory => self.baseline(index),
                }
            }

            let target = &self.targets[index];
            if self.source.mode == WatchMode::Notify && target.available && target.watcher.is_none() {
                self.arm(index);
            }
        }
    }

    fn arm(&mut self, index: usize) {
        let raw_tx = self.raw_tx.clone();
        let source_id = self.source.id.clone();
        let watch_path = self.targets[index].watch_path();

        let watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| match result {
            Ok(event) if is_relevant(&event.kind) => {
                for path in event.paths {
                    // Dropped notifications are recovered by the next change
                    let _ = raw_tx.try_send((index, path));
                }
            }
            Ok(_) => {}
            Err(e) => warn!(source_id = %source_id, "Watch error: {}", e),
        });

        let armed = watcher.and_then(|mut watcher| {
            watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        });

        match armed {
            Ok(watcher) => {
                debug!(source_id = %self.source.id, path = %watch_path.display(), "Watching");
                self.targets[index].watcher = Some(watcher);
            }
            Err(e) => warn!(
                source_id = %self.source.id,
                path = %watch_path.display(),
                "Cannot watch path, will retry: {}",
                e
            ),
        }
    }

    /// Record current mtimes of one target without reporting changes
    fn baseline(&mut self, index: usize) {
        for (path, mtime) in self.targets[index].list_files() {
            self.mtimes.insert(path, mtime);
        }
    }

    /// Poll for modified files; `None` only records a baseline
    fn scan(&mut self, now: Option<Instant>) {
        for index in 0..self.targets.len() {
            if !self.targets[index].available {
                continue;
            }
            for (path, mtime) in self.targets[index].list_files() {
                let previous = self.mtimes.insert(path.clone(), mtime);
                if let Some(now) = now {
                    if previous != Some(mtime) {
                        self.debouncer.touch(path, now);
                    }
                }
            }
        }
    }

    /// Emit events for settled changes; `false` once the receiver is gone
    async fn flush(&mut self, events: &mpsc::Sender<TrackEvent>) -> bool {
        for path in self.debouncer.take_due(Instant::now()) {
            let Some(track) = resolve_track(&path) else {
                continue;
            };
            // Repeat notifications for a write that was already reported
            let mtime = modified(&path);
            let change = (path, mtime);
            if change.1.is_some() && self.last_change.as_ref() == Some(&change) {
                debug!(source_id = %self.source.id, track = %track.display(), "Change already reported");
                continue;
            }
            self.last_change = Some(change);
            if events.send(TrackEvent::new(self.source.id.clone(), track)).await.is_err() {
                return false;
            }
        }
        true
    }

    fn emit_status(&self, index: usize, available: bool) {
        self.event_bus.emit_lossy(WnpEvent::SourceStatusChanged {
            source_id: self.source.id.clone(),
            path: self.targets[index].path.display().to_string(),
            available,
            timestamp: Utc::now(),
        });
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Spawn one watcher task per source, all feeding `events`
pub fn spawn_watchers(
    sources: &[SourceConfig],
    event_bus: &EventBus,
    events: mpsc::Sender<TrackEvent>,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    sources
        .iter()
        .map(|source| SourceWatcher::new(source.clone(), event_bus.clone()).spawn(events.clone(), cancel.child_token()))
        .collect()
}
