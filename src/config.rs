// src/config.rs
// Global configuration from <global_dir>/config.json plus contract constants

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Catch-up dirty-flag debounce window.
pub const DEBOUNCE_MS: i64 = 30_000;

/// Hard deadline after which a dirty catch-up summary is recomputed even if
/// changes keep arriving.
pub const MAX_STALE_MS: i64 = 300_000;

/// Minimum interval between knowledge staleness sweeps.
pub const STALENESS_CHECK_INTERVAL_MS: i64 = 3_600_000;

/// Days without confirmation before a section is eligible for decay.
pub const DECAY_THRESHOLD_DAYS: i64 = 30;

/// Days without confirmation before a tentative section is flagged for review.
pub const REVIEW_THRESHOLD_DAYS: i64 = 90;

/// Inactivity window after which an active session is finalized.
pub const DEFAULT_SESSION_TIMEOUT_MS: i64 = 300_000;

/// Daemon control-loop poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Timeout for the consolidation LLM call.
pub const CONSOLIDATION_TIMEOUT_SECS: u64 = 60;

/// Timeout for the catch-up summarization LLM call.
pub const CATCH_UP_TIMEOUT_SECS: u64 = 30;

/// How many recent session summaries to retain per project.
pub const RECENT_SUMMARY_LIMIT: usize = 10;

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5-coder:7b".to_string()
}

/// Global config persisted at `<global_dir>/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            ollama_base_url: default_ollama_base_url(),
            ollama_model: default_ollama_model(),
        }
    }
}

impl GlobalConfig {
    /// Load config from `<global_dir>/config.json`, then apply env overrides.
    ///
    /// Loading never fails: a missing file yields defaults, a corrupt file
    /// logs a warning and yields defaults. `OLLAMA_BASE_URL` / `OLLAMA_MODEL`
    /// environment variables win over the file.
    pub fn load() -> Self {
        let path = crate::paths::global_config_file();

        let mut config = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<GlobalConfig>(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        };

        if let Ok(url) = std::env::var("OLLAMA_BASE_URL")
            && !url.trim().is_empty()
        {
            config.ollama_base_url = url;
        }
        if let Ok(model) = std::env::var("OLLAMA_MODEL")
            && !model.trim().is_empty()
        {
            config.ollama_model = model;
        }

        config
    }
}

/// Per-session tuning, currently just the inactivity timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "SessionConfig::default_timeout_ms")]
    pub timeout_ms: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

impl SessionConfig {
    fn default_timeout_ms() -> i64 {
        DEFAULT_SESSION_TIMEOUT_MS
    }

    /// Build from defaults plus the `DEVLOG_SESSION_TIMEOUT_MS` override.
    pub fn load() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("DEVLOG_SESSION_TIMEOUT_MS")
            && let Ok(ms) = raw.trim().parse::<i64>()
            && ms > 0
        {
            config.timeout_ms = ms;
        }
        config
    }
}

/// Resolve the daemon poll interval, honoring `DEVLOG_POLL_INTERVAL_MS`.
pub fn poll_interval_ms() -> u64 {
    std::env::var("DEVLOG_POLL_INTERVAL_MS")
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
}
