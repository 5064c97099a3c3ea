//! Model library watcher
//!
//! Watches the library directory of the runtime's model store and turns
//! the noisy notification stream into `EntityLifecycleEvent`s.
//!
//! ## Message Flow
//!
//! ```text
//! notify thread → raw mpsc → WatcherActor ─admit→ spawn(Normalizer::process) → broadcast
//!                                ↑
//!                                └─── Commands (Shutdown)
//! ```
//!
//! If the root does not exist at startup the actor stays idle until it is
//! shut down; there is no polling for the directory to appear.

pub mod normalizer;
pub mod path;

pub use normalizer::{Normalizer, WatchEvent, WatchEventKind};
pub use path::LibraryPath;

use std::path::PathBuf;

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::EntityLifecycleEvent;
use crate::config::WatcherConfig;

/// Commands that can be sent to the WatcherActor
#[derive(Debug)]
pub enum WatcherCommand {
    /// Release the OS watch handle and stop
    Shutdown,
}

/// Actor owning the OS watch handle
pub struct WatcherActor {
    /// Dropping the watcher unsubscribes from the OS
    watcher: Option<RecommendedWatcher>,

    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,

    command_rx: mpsc::Receiver<WatcherCommand>,

    normalizer: Normalizer,
}

impl WatcherActor {
    /// Start watching `config.root`.
    ///
    /// Returns an idle actor (no watcher) when the root is missing or the
    /// watch cannot be established.
    pub fn new(
        config: &WatcherConfig,
        command_rx: mpsc::Receiver<WatcherCommand>,
        event_tx: broadcast::Sender<EntityLifecycleEvent>,
    ) -> Self {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();

        // notify reports canonical paths on some platforms
        let root = std::fs::canonicalize(&config.root).unwrap_or_else(|_| config.root.clone());
        let normalizer = Normalizer::new(
            root.clone(),
            config.dir_settle(),
            config.tag_settle(),
            event_tx,
        );

        let watcher = if !config.enabled {
            info!("model library watcher disabled");
            None
        } else if !root.is_dir() {
            warn!(
                "model library {} does not exist, watcher stays idle",
                root.display()
            );
            None
        } else {
            match start_watcher(root.clone(), raw_tx) {
                Ok(watcher) => {
                    info!("watching model library {}", root.display());
                    Some(watcher)
                }
                Err(e) => {
                    error!("failed to watch model library: {:#}", e);
                    None
                }
            }
        };

        Self {
            watcher,
            raw_rx,
            command_rx,
            normalizer,
        }
    }

    /// Run the actor's main loop
    #[instrument(skip(self), fields(root = %self.normalizer.root().display()))]
    pub async fn run(mut self) {
        debug!("starting watcher actor");

        loop {
            tokio::select! {
                Some(raw) = self.raw_rx.recv() => {
                    match raw {
                        Ok(event) => self.dispatch(event),
                        Err(e) => warn!("watch error: {e}"),
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        WatcherCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        self.watcher.take();
        debug!("watcher actor stopped");
    }

    fn dispatch(&self, event: Event) {
        for watch_event in translate(event) {
            trace!(?watch_event, "raw watch event");

            if !self.normalizer.admit(&watch_event) {
                continue;
            }

            let normalizer = self.normalizer.clone();
            tokio::spawn(async move { normalizer.process(watch_event).await });
        }
    }
}

fn start_watcher(
    root: PathBuf,
    raw_tx: mpsc::UnboundedSender<notify::Result<Event>>,
) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        // Receiver gone means the actor stopped
        let _ = raw_tx.send(res);
    })
    .context("failed to create filesystem watcher")?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", root.display()))?;

    Ok(watcher)
}

/// Map a notify event onto zero or more raw watch events
pub fn translate(event: Event) -> Vec<WatchEvent> {
    match event.kind {
        EventKind::Create(kind) => event
            .paths
            .into_iter()
            .map(|path| {
                let is_directory = match kind {
                    CreateKind::Folder => true,
                    CreateKind::File => false,
                    _ => path.is_dir(),
                };
                WatchEvent::created(path, is_directory)
            })
            .collect(),

        EventKind::Remove(kind) => event
            .paths
            .into_iter()
            .map(|path| WatchEvent::deleted(path, matches!(kind, RemoveKind::Folder)))
            .collect(),

        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .into_iter()
            .map(|path| {
                let is_directory = path.is_dir();
                WatchEvent::renamed(path, is_directory)
            })
            .collect(),

        _ => vec![],
    }
}

/// Handle for controlling a WatcherActor
#[derive(Clone)]
pub struct WatcherHandle {
    sender: mpsc::Sender<WatcherCommand>,
}

impl WatcherHandle {
    /// Spawn a watcher actor publishing to `event_tx`
    pub fn spawn(config: WatcherConfig, event_tx: broadcast::Sender<EntityLifecycleEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = WatcherActor::new(&config, cmd_rx, event_tx);

        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Stop watching and release the OS handle
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(WatcherCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
