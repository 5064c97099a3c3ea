use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

/// Top-level hub configuration
///
/// Every section is optional; a missing section falls back to its defaults.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub api: ApiSettings,
}

/// Connection settings for the model runtime
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "crate::util::get_runtime_url")]
    pub url: String,

    /// Request timeout in seconds. Switches may load multi-GB models.
    #[serde(default = "default_runtime_timeout")]
    pub timeout_secs: u64,

    /// How long the runtime should keep a switched-to model loaded
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,

    /// Upper bound on the model listing for a new connection's snapshot
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: crate::util::get_runtime_url(),
            timeout_secs: default_runtime_timeout(),
            keep_alive: default_keep_alive(),
            snapshot_timeout_ms: default_snapshot_timeout(),
        }
    }
}

impl RuntimeConfig {
    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

fn default_runtime_timeout() -> u64 {
    600
}

fn default_keep_alive() -> String {
    String::from("5m")
}

fn default_snapshot_timeout() -> u64 {
    500
}

/// Model-library watcher settings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// The `.../manifests/registry.<host>/library` directory
    #[serde(default = "default_library_root")]
    pub root: PathBuf,

    /// Wait after a model directory appears before re-checking it
    #[serde(default = "default_dir_settle_ms")]
    pub dir_settle_ms: u64,

    /// Wait for tag files to land inside a new model directory
    #[serde(default = "default_tag_settle_ms")]
    pub tag_settle_ms: u64,
}

impl WatcherConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn dir_settle(&self) -> Duration {
        Duration::from_millis(self.dir_settle_ms)
    }

    pub fn tag_settle(&self) -> Duration {
        Duration::from_millis(self.tag_settle_ms)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root: default_library_root(),
            dir_settle_ms: default_dir_settle_ms(),
            tag_settle_ms: default_tag_settle_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_library_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ollama/models/manifests/registry.ollama.ai/library")
}

fn default_dir_settle_ms() -> u64 {
    500
}

fn default_tag_settle_ms() -> u64 {
    1000
}

/// Metric aggregation settings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MetricsConfig {
    /// Samples kept per model
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Only samples younger than this feed the summary
    #[serde(default = "default_recent_window_secs")]
    pub recent_window_secs: u64,

    /// Samples used when none are recent enough
    #[serde(default = "default_fallback_samples")]
    pub fallback_samples: usize,

    /// Minimum spacing between background recomputations per model
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl MetricsConfig {
    pub fn recent_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.recent_window_secs as i64)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            recent_window_secs: default_recent_window_secs(),
            fallback_samples: default_fallback_samples(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_window_capacity() -> usize {
    1000
}

fn default_recent_window_secs() -> u64 {
    24 * 60 * 60
}

fn default_fallback_samples() -> usize {
    100
}

fn default_debounce_ms() -> u64 {
    250
}

/// HTTP/WebSocket server settings
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    #[serde(default = "crate::util::get_bind_addr")]
    pub bind: SocketAddr,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: crate::util::get_bind_addr(),
            enable_cors: true,
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
