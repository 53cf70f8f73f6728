//! Hot-reload watcher - debounced plugin reloads on source changes

use async_trait::async_trait;
use notify::{recommended_watcher, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::application::errors::PluginResult;

/// Default quiet period before a burst of changes becomes one reload
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Something that can reload a plugin by name
#[async_trait]
pub trait ReloadTarget: Send + Sync {
    async fn reload(&self, plugin: &str) -> PluginResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    /// Explicit request, not a filesystem change
    Requested,
    Other,
}

impl From<&EventKind> for ChangeKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => ChangeKind::Created,
            EventKind::Modify(_) => ChangeKind::Modified,
            EventKind::Remove(_) => ChangeKind::Removed,
            _ => ChangeKind::Other,
        }
    }
}

/// A change attributed to one plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub plugin: String,
    pub change: ChangeKind,
}

impl WatchEvent {
    pub fn new(plugin: impl Into<String>, change: ChangeKind) -> Self {
        Self {
            plugin: plugin.into(),
            change,
        }
    }
}

/// Watches plugin directories and turns bursts of changes into single reloads
///
/// If the platform watcher cannot start, the watcher keeps running without
/// it and only `trigger` produces reloads. Each reload runs on its own task,
/// so stopping the watcher never interrupts one halfway.
pub struct HotReloadWatcher {
    tx: mpsc::Sender<WatchEvent>,
    watcher: Option<RecommendedWatcher>,
    watched: Vec<String>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl HotReloadWatcher {
    /// Start watching `plugins` (name, source directory) and spawn the debounce loop
    pub fn start(
        target: Arc<dyn ReloadTarget>,
        plugins: Vec<(String, PathBuf)>,
        debounce: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<WatchEvent>(256);

        let (watcher, watched) = match Self::watch(&plugins, tx.clone()) {
            Ok((watcher, watched)) => (Some(watcher), watched),
            Err(e) => {
                tracing::warn!("File watching unavailable, reload on demand only: {}", e);
                (None, Vec::new())
            }
        };

        let (shutdown, stopped) = oneshot::channel();
        let task = tokio::spawn(debounce_loop(rx, stopped, target, debounce));

        Self {
            tx,
            watcher,
            watched,
            shutdown,
            task,
        }
    }

    fn watch(
        plugins: &[(String, PathBuf)],
        tx: mpsc::Sender<WatchEvent>,
    ) -> notify::Result<(RecommendedWatcher, Vec<String>)> {
        let roots: Vec<(String, PathBuf)> = plugins
            .iter()
            .map(|(name, dir)| (name.clone(), dir.canonicalize().unwrap_or_else(|_| dir.clone())))
            .collect();
        let lookup = roots.clone();

        let mut watcher = recommended_watcher(move |event: notify::Result<notify::Event>| {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Watch error: {}", e);
                    return;
                }
            };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }
            let change = ChangeKind::from(&event.kind);
            for plugin in owners(&lookup, &event.paths) {
                // Use blocking_send since this callback runs in the notify thread
                let _ = tx.blocking_send(WatchEvent::new(plugin, change));
            }
        })?;

        let mut watched = Vec::new();
        for (name, dir) in &roots {
            match watcher.watch(dir, RecursiveMode::Recursive) {
                Ok(()) => {
                    tracing::debug!(plugin = %name, "Watching {}", dir.display());
                    watched.push(name.clone());
                }
                Err(e) => {
                    tracing::warn!(plugin = %name, "Cannot watch {}: {}", dir.display(), e);
                }
            }
        }
        Ok((watcher, watched))
    }

    /// Whether filesystem notifications are flowing
    pub fn is_active(&self) -> bool {
        self.watcher.is_some()
    }

    /// Plugins whose directories are being watched
    pub fn watched(&self) -> &[String] {
        &self.watched
    }

    /// Request a reload through the same debounce queue
    pub async fn trigger(&self, plugin: &str) -> bool {
        self.tx
            .send(WatchEvent::new(plugin, ChangeKind::Requested))
            .await
            .is_ok()
    }

    /// Sender for feeding events from another source
    pub fn sender(&self) -> mpsc::Sender<WatchEvent> {
        self.tx.clone()
    }

    /// Stop watching and wait for reloads already started to finish.
    /// Changes still inside their debounce window are dropped.
    pub async fn stop(self) {
        let Self {
            watcher,
            shutdown,
            task,
            ..
        } = self;
        drop(watcher);
        let _ = shutdown.send(());
        if let Err(e) = task.await {
            tracing::warn!("Hot reload loop ended abnormally: {}", e);
        }
    }
}

/// Plugins whose directory contains any of `paths`
fn owners<'a>(roots: &'a [(String, PathBuf)], paths: &[PathBuf]) -> Vec<&'a str> {
    let mut found: Vec<&str> = Vec::new();
    for path in paths {
        if is_hidden(path) {
            continue;
        }
        for (name, dir) in roots {
            if path.starts_with(dir) && !found.contains(&name.as_str()) {
                found.push(name.as_str());
            }
        }
    }
    found
}

/// Editor swap and backup files
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') || n.ends_with('~'))
}

/// Collapse events per plugin: a reload fires once its plugin has been quiet
/// for `window`. Each new event for the same plugin pushes its deadline out.
async fn debounce_loop(
    mut rx: mpsc::Receiver<WatchEvent>,
    mut stopped: oneshot::Receiver<()>,
    target: Arc<dyn ReloadTarget>,
    window: Duration,
) {
    let mut pending: HashMap<String, Instant> = HashMap::new();
    let mut running: Vec<JoinHandle<()>> = Vec::new();

    loop {
        running.retain(|reload| !reload.is_finished());
        let next = pending.values().min().copied();
        let due = async move {
            match next {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = &mut stopped => break,
            _ = due => {
                for plugin in take_due(&mut pending) {
                    running.push(spawn_reload(&target, plugin));
                }
            }
            received = rx.recv() => match received {
                Some(event) => {
                    if pending.contains_key(&event.plugin) {
                        tracing::debug!(plugin = %event.plugin, change = ?event.change, "More changes, resetting timer");
                    } else {
                        tracing::debug!(plugin = %event.plugin, change = ?event.change, "Change detected, starting debounce");
                    }
                    pending.insert(event.plugin, Instant::now() + window);
                }
                None => break,
            },
        }
    }

    for reload in running {
        let _ = reload.await;
    }
}

fn take_due(pending: &mut HashMap<String, Instant>) -> Vec<String> {
    let now = Instant::now();
    let due: Vec<String> = pending
        .iter()
        .filter(|(_, deadline)| **deadline <= now)
        .map(|(name, _)| name.clone())
        .collect();
    for plugin in &due {
        pending.remove(plugin);
    }
    due
}

fn spawn_reload(target: &Arc<dyn ReloadTarget>, plugin: String) -> JoinHandle<()> {
    let target = Arc::clone(target);
    tokio::spawn(async move {
        tracing::info!(plugin = %plugin, "Debounce complete, reloading plugin");
        if let Err(e) = target.reload(&plugin).await {
            tracing::error!(plugin = %plugin, error = %e, "Hot reload failed");
        }
    })
}
