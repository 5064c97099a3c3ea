//! Raw watch notifications → inventory lifecycle events
//!
//! ## Created
//!
//! ```text
//! library/<model>/        → settle (dir) → still there? → settle (tags) → one Added per tag file
//! library/<model>/<tag>   → Added immediately, unless <model>/ is still settling
//! ```
//!
//! ## Deleted
//!
//! ```text
//! library/<model>/<tag>   → Removed("<model>:<tag>")
//! library/<model>/        → Removed("<model>:*")
//! ```
//!
//! Renames are logged and otherwise ignored.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use futures::FutureExt;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::EntityLifecycleEvent;

use super::path::{LibraryPath, classify};

/// Kind of raw filesystem notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Deleted,
    Renamed,
}

/// Raw observation from the filesystem watch primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub full_path: PathBuf,
    pub is_directory: bool,
}

impl WatchEvent {
    pub fn created(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind: WatchEventKind::Created,
            full_path: path.into(),
            is_directory,
        }
    }

    pub fn deleted(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind: WatchEventKind::Deleted,
            full_path: path.into(),
            is_directory,
        }
    }

    pub fn renamed(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind: WatchEventKind::Renamed,
            full_path: path.into(),
            is_directory,
        }
    }
}

/// Turns raw watch events into [`EntityLifecycleEvent`]s
///
/// Cheap to clone. Each raw event is expected to be handled on its own
/// task, so the settle delays of one path never hold up another.
#[derive(Clone)]
pub struct Normalizer {
    inner: Arc<Inner>,
}

struct Inner {
    root: PathBuf,
    dir_settle: Duration,
    tag_settle: Duration,

    /// Model directories currently inside their settle delays
    settling: Mutex<HashSet<PathBuf>>,

    /// Recently announced entities, for collapsing repeated raw creates
    announced: Mutex<HashMap<String, Instant>>,

    event_tx: broadcast::Sender<EntityLifecycleEvent>,
}

impl Normalizer {
    pub fn new(
        root: impl Into<PathBuf>,
        dir_settle: Duration,
        tag_settle: Duration,
        event_tx: broadcast::Sender<EntityLifecycleEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                dir_settle,
                tag_settle,
                settling: Mutex::new(HashSet::new()),
                announced: Mutex::new(HashMap::new()),
                event_tx,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Admit and fully handle one raw event on the current task
    pub async fn handle_event(&self, event: WatchEvent) {
        if self.admit(&event) {
            self.process(event).await;
        }
    }

    /// Synchronous bookkeeping done in arrival order, before `process`.
    ///
    /// Marks new model directories as settling so that tag files landing
    /// in them are left to the directory enumeration. Returns false for a
    /// repeated create of a directory that is already settling.
    pub fn admit(&self, event: &WatchEvent) -> bool {
        if event.kind != WatchEventKind::Created || !event.is_directory {
            return true;
        }

        match classify(&self.inner.root, &event.full_path) {
            Some(LibraryPath::Model { .. }) => {
                let fresh = self.settling().insert(event.full_path.clone());
                if !fresh {
                    trace!(path = %event.full_path.display(), "directory already settling");
                }
                fresh
            }
            _ => true,
        }
    }

    /// Handle one admitted raw event.
    ///
    /// Errors and panics are logged here and never reach the watch loop.
    #[instrument(skip(self, event), fields(path = %event.full_path.display(), kind = ?event.kind))]
    pub async fn process(&self, event: WatchEvent) {
        let result = AssertUnwindSafe(self.dispatch(event)).catch_unwind().await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("failed to handle watch event: {:#}", e),
            Err(_) => error!("watch event handler panicked"),
        }
    }

    async fn dispatch(&self, event: WatchEvent) -> Result<()> {
        match event.kind {
            WatchEventKind::Created => self.on_created(&event.full_path, event.is_directory).await,
            WatchEventKind::Deleted => {
                self.on_deleted(&event.full_path);
                Ok(())
            }
            WatchEventKind::Renamed => {
                info!("rename observed, no inventory change emitted");
                Ok(())
            }
        }
    }

    async fn on_created(&self, path: &Path, is_directory: bool) -> Result<()> {
        match (classify(&self.inner.root, path), is_directory) {
            (Some(LibraryPath::Model { model }), true) => self.settle_directory(path, &model).await,

            (Some(LibraryPath::Tag { model, tag }), false) => {
                let parent_settling = path
                    .parent()
                    .is_some_and(|parent| self.settling().contains(parent));

                if parent_settling {
                    debug!("tag file inside settling directory, left to enumeration");
                } else {
                    self.announce(crate::entity_id(&model, &tag));
                }
                Ok(())
            }

            (Some(_), _) => {
                trace!("created entry does not match the library layout");
                Ok(())
            }

            (None, _) => {
                trace!("created path outside the library layout");
                Ok(())
            }
        }
    }

    async fn settle_directory(&self, path: &Path, model: &str) -> Result<()> {
        self.settling().insert(path.to_path_buf());
        let _guard = SettlingGuard {
            normalizer: self,
            path,
        };

        tokio::time::sleep(self.inner.dir_settle).await;

        if !path.is_dir() {
            debug!("model directory vanished before settling");
            return Ok(());
        }

        tokio::time::sleep(self.inner.tag_settle).await;

        // Enumerate and unmark under the same lock that tag-file creates check
        let tags = {
            let mut settling = self.settling();
            settling.remove(path);
            list_tag_files(path)
        };

        let tags = match tags {
            Ok(tags) => tags,
            Err(e) if is_not_found(&e) => {
                debug!("model directory vanished during settling");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if tags.is_empty() {
            warn!(model, "model directory still empty after settling, ignoring");
            return Ok(());
        }

        for tag in tags {
            self.announce(crate::entity_id(model, &tag));
        }

        Ok(())
    }

    fn on_deleted(&self, path: &Path) {
        let Some(parsed) = classify(&self.inner.root, path) else {
            warn!("deleted path does not match the library layout");
            return;
        };

        match &parsed {
            LibraryPath::Tag { .. } => {
                self.announced().remove(&parsed.entity_id());
            }
            LibraryPath::Model { model } => {
                let prefix = format!("{model}:");
                self.announced().retain(|id, _| !id.starts_with(&prefix));
            }
        }

        self.emit(EntityLifecycleEvent::removed(parsed.entity_id()));
    }

    /// Emit `Added` unless the same entity was announced within the settle window
    fn announce(&self, entity_id: String) {
        let window = self.inner.dir_settle + self.inner.tag_settle;
        let now = Instant::now();

        {
            let mut announced = self.announced();
            announced.retain(|_, at| now.duration_since(*at) < window);

            if announced.contains_key(&entity_id) {
                debug!(entity = %entity_id, "duplicate create collapsed");
                return;
            }
            announced.insert(entity_id.clone(), now);
        }

        self.emit(EntityLifecycleEvent::added(entity_id));
    }

    fn emit(&self, event: EntityLifecycleEvent) {
        debug!(entity = %event.entity_id, kind = ?event.kind, "emitting lifecycle event");

        if self.inner.event_tx.send(event).is_err() {
            trace!("no receivers for lifecycle event (this is OK)");
        }
    }

    fn settling(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.inner
            .settling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn announced(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.inner
            .announced
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unmarks a settling directory on every exit path
struct SettlingGuard<'a> {
    normalizer: &'a Normalizer,
    path: &'a Path,
}

impl Drop for SettlingGuard<'_> {
    fn drop(&mut self) {
        self.normalizer.settling().remove(self.path);
    }
}

/// Names of the regular files directly inside `dir`, sorted
fn list_tag_files(dir: &Path) -> Result<Vec<String>> {
    let mut tags = vec![];

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read model directory {}", dir.display()))?
    {
        let entry = entry.context("failed to read directory entry")?;
        if entry
            .file_type()
            .context("failed to stat directory entry")?
            .is_file()
        {
            tags.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    tags.sort();
    Ok(tags)
}

fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<std::io::Error>()
        .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
}
