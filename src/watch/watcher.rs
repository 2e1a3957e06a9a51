// src/watch/watcher.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::loader::fingerprint;
use crate::engine::RuntimeEvent;

/// Editors often write a file in several steps; wait this long for the
/// burst to settle before reading it.
const SETTLE: Duration = Duration::from_millis(200);

/// Handle for the filesystem watcher.
///
/// This exists mainly so the underlying `RecommendedWatcher` is kept alive for
/// as long as needed. Dropping this handle will stop file watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Remembers the last fingerprint seen and reports real content changes.
#[derive(Debug, Clone, Default)]
pub struct FingerprintGate {
    last: Option<String>,
}

impl FingerprintGate {
    pub fn new(initial: Option<String>) -> Self {
        Self { last: initial }
    }

    /// True if `contents` differ from the last contents seen.
    pub fn changed(&mut self, contents: &str) -> bool {
        let current = fingerprint(contents);
        if self.last.as_deref() == Some(current.as_str()) {
            return false;
        }
        self.last = Some(current);
        true
    }
}

/// Watch `config_path` and send `RuntimeEvent::ReloadRequested` whenever its
/// content changes.
///
/// The parent directory is watched rather than the file itself so that
/// editors that save by rename are still seen. `initial` is the fingerprint
/// of the configuration already loaded.
pub fn spawn_config_watcher(
    config_path: impl Into<PathBuf>,
    initial: Option<String>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> Result<WatcherHandle> {
    let config_path = config_path.into();
    let config_path = config_path.canonicalize().unwrap_or(config_path);
    let dir = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Err(err) = event_tx.send(event) {
                    // We can't log via tracing here easily, so fallback to stderr.
                    eprintln!("cyclerun: failed to forward notify event: {err}");
                }
            }
            Err(err) => eprintln!("cyclerun: file watch error: {err}"),
        },
        Config::default(),
    )?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching {}", dir.display()))?;
    info!(path = %config_path.display(), "watching workflow file");

    tokio::spawn(async move {
        let mut gate = FingerprintGate::new(initial);
        while let Some(event) = event_rx.recv().await {
            if !concerns(&event, &config_path) {
                continue;
            }
            tokio::time::sleep(SETTLE).await;
            while event_rx.try_recv().is_ok() {}

            let contents = match tokio::fs::read_to_string(&config_path).await {
                Ok(contents) => contents,
                Err(err) => {
                    warn!(path = %config_path.display(), error = %err, "cannot read workflow file");
                    continue;
                }
            };
            if !gate.changed(&contents) {
                debug!("workflow file touched but unchanged");
                continue;
            }
            info!("workflow file changed; requesting reload");
            if runtime_tx.send(RuntimeEvent::ReloadRequested).await.is_err() {
                break;
            }
        }
        debug!("config watcher finished");
    });

    Ok(WatcherHandle { _inner: watcher })
}

fn concerns(event: &Event, config_path: &Path) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    let name = config_path.file_name();
    event.paths.iter().any(|p| p.file_name() == name)
}
