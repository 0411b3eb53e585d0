//! Console configuration
//!
//! Settings live in ~/.opsdeck/config.json. The WebSocket base URL is
//! derived from the HTTP base unless explicitly overridden.

mod storage;

pub use storage::{config_dir, ConfigStorage, StorageError};

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub version: u32,
    #[serde(default)]
    pub console: ConsoleConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            console: ConsoleConfig::default(),
        }
    }
}

/// Console settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Backend base URL, no trailing slash
    pub base_url: String,
    /// WebSocket base URL; derived from `base_url` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    /// Request timeout for plain API calls (seconds)
    pub request_timeout_secs: u64,
    /// Debounce applied before a file session activates (ms)
    pub file_session_debounce_ms: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            ws_url: None,
            request_timeout_secs: 30,
            file_session_debounce_ms: 300,
        }
    }
}

impl ConsoleConfig {
    /// WebSocket base URL: explicit override, or http(s) base rewritten
    /// to ws(s).
    pub fn ws_base(&self) -> String {
        if let Some(ref ws) = self.ws_url {
            return ws.trim_end_matches('/').to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("ws://{}", base)
        }
    }

    /// Join an API path onto the base URL.
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
