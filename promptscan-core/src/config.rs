use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// Environment variable holding the project API key.
pub const API_KEY_ENV: &str = "PROMPTSCAN_API_KEY";
/// Environment variable overriding the collector endpoint.
pub const BASE_URL_ENV: &str = "PROMPTSCAN_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "https://api.promptscan.ai/graphql/";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 30000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_api_key_env() -> String {
    API_KEY_ENV.to_string()
}
fn default_flush_interval_ms() -> u64 {
    5_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

/// File-backed SDK settings. Every field is optional in the file; missing
/// fields fall back to the same defaults the builder uses.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SdkConfig {
    /// Name of the environment variable that contains the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Collector endpoint. None → `PROMPTSCAN_BASE_URL`, then the public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_true")]
    pub auto_flush: bool,
    /// Total send attempts per record before it is dropped.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    /// Tags merged into every record; per-record tags win on collision.
    #[serde(default)]
    pub default_tags: BTreeMap<String, String>,
    #[serde(default)]
    pub http: HttpCfg,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: None,
            flush_interval_ms: default_flush_interval_ms(),
            auto_flush: true,
            max_retries: default_max_retries(),
            enabled: true,
            debug: false,
            default_tags: BTreeMap::new(),
            http: HttpCfg::default(),
        }
    }
}

impl SdkConfig {
    /// Load a config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::PromptScanError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::PromptScanError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::PromptScanError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::PromptScanError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::PromptScanError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::PromptScanError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<SecretString> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from)
    }

    /// Resolve the endpoint: explicit value, then environment, then default.
    pub fn resolved_base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| std::env::var(BASE_URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }
}
