//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Host configuration. File: ~/.config/toxhook/config.toml or /etc/toxhook/config.toml.
/// Env overrides: TOXHOOK_ITERATE_INTERVAL_MS, TOXHOOK_DOWNLOAD_DIR,
/// TOXHOOK_EVENT_QUEUE_CAPACITY, TOXHOOK_COMMAND_QUEUE_CAPACITY.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Router queues and retention (`[router]` table).
    #[serde(default)]
    pub router: toxhook_core::Config,
    /// Milliseconds between engine iterations (default 25).
    #[serde(default = "default_iterate_interval_ms")]
    pub iterate_interval_ms: u64,
    /// Where received files are written (default ./downloads).
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_iterate_interval_ms() -> u64 {
    25
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            router: toxhook_core::Config::default(),
            iterate_interval_ms: default_iterate_interval_ms(),
            download_dir: default_download_dir(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(ms) = var("TOXHOOK_ITERATE_INTERVAL_MS").and_then(|s| s.parse().ok()) {
        c.iterate_interval_ms = ms;
    }
    if let Some(dir) = var("TOXHOOK_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(dir);
    }
    if let Some(n) = var("TOXHOOK_EVENT_QUEUE_CAPACITY").and_then(|s| s.parse().ok()) {
        c.router.event_queue_capacity = n;
    }
    if let Some(n) = var("TOXHOOK_COMMAND_QUEUE_CAPACITY").and_then(|s| s.parse().ok()) {
        c.router.command_queue_capacity = n;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/toxhook/config.toml"));
    }
    out.push(PathBuf::from("/etc/toxhook/config.toml"));
    out
}

/// First existing file wins; a file that fails to parse is reported and ignored.
fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let text = match std::fs::read_to_string(&path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("cannot read {}: {e}", path.display());
            return None;
        }
    };
    match toml::from_str::<Config>(&text) {
        Ok(c) => {
            tracing::debug!("loaded config from {}", path.display());
            Some(c)
        }
        Err(e) => {
            tracing::warn!("ignoring {}: {e}", path.display());
            None
        }
    }
}
