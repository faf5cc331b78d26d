use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use super::PromptScanSdk;
use crate::config::{HttpCfg, SdkConfig};
use crate::error::{CoreResult, PromptScanError};
use crate::graphql::GraphQlClient;
use crate::http_client::HttpClient;
use crate::model::KeyValuePair;
use crate::transport::CollectTransport;

/// Fluent builder for [`PromptScanSdk`].
///
/// Defaults: API key from `PROMPTSCAN_API_KEY`, endpoint from
/// `PROMPTSCAN_BASE_URL` (else the public collector), 5s auto flush,
/// 3 attempts per record, collection enabled, debug logging off.
pub struct PromptScanSdkBuilder {
    api_key: Option<SecretString>,
    base_url: String,
    flush_interval: Duration,
    auto_flush: bool,
    max_retries: u32,
    enabled: bool,
    debug: bool,
    default_tags: Vec<KeyValuePair>,
    http: HttpCfg,
    transport: Option<Arc<dyn CollectTransport>>,
}

impl Default for PromptScanSdkBuilder {
    fn default() -> Self {
        Self::from_config(&SdkConfig::default())
    }
}

impl PromptScanSdkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every setting from a loaded config file.
    pub fn from_config(cfg: &SdkConfig) -> Self {
        Self {
            api_key: cfg.api_key(),
            base_url: cfg.resolved_base_url(),
            flush_interval: Duration::from_millis(cfg.flush_interval_ms),
            auto_flush: cfg.auto_flush,
            max_retries: cfg.max_retries,
            enabled: cfg.enabled,
            debug: cfg.debug,
            default_tags: cfg
                .default_tags
                .iter()
                .map(|(k, v)| KeyValuePair::new(k, v))
                .collect(),
            http: cfg.http.clone(),
            transport: None,
        }
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn flush_interval_millis(self, millis: u64) -> Self {
        self.flush_interval(Duration::from_millis(millis))
    }

    pub fn auto_flush(mut self, auto_flush: bool) -> Self {
        self.auto_flush = auto_flush;
        self
    }

    /// Total delivery attempts per record; values below 1 are treated as 1.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn default_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.default_tags.clear();
        for (k, v) in tags {
            let pair = KeyValuePair::new(k, v);
            match self.default_tags.iter_mut().find(|p| p.key == pair.key) {
                Some(existing) => existing.value = pair.value,
                None => self.default_tags.push(pair),
            }
        }
        self
    }

    pub fn http(mut self, http: HttpCfg) -> Self {
        self.http = http;
        self
    }

    /// Replace the GraphQL transport, e.g. with an in-process stub.
    pub fn transport(mut self, transport: Arc<dyn CollectTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the SDK. With auto flush enabled this must run inside a Tokio
    /// runtime, which hosts the periodic flush task.
    pub fn build(self) -> CoreResult<PromptScanSdk> {
        if self.flush_interval.is_zero() {
            return Err(PromptScanError::Validation(
                "flush interval must be greater than zero".into(),
            ));
        }
        let runtime = if self.auto_flush {
            Some(tokio::runtime::Handle::try_current().map_err(|_| {
                PromptScanError::Validation(
                    "auto flush requires a Tokio runtime; build inside one or disable auto_flush"
                        .into(),
                )
            })?)
        } else {
            None
        };

        if self.api_key.is_none() {
            tracing::warn!("PromptScan SDK is initialized without API key");
        }

        let transport: Arc<dyn CollectTransport> = match self.transport {
            Some(t) => t,
            None => {
                let http = HttpClient::from_cfg(&self.http)?;
                Arc::new(GraphQlClient::new(http, self.base_url, self.api_key))
            }
        };

        Ok(PromptScanSdk::start(
            super::SdkSettings {
                flush_interval: self.flush_interval,
                max_retries: self.max_retries.max(1),
                enabled: self.enabled,
                debug: self.debug,
                default_tags: self.default_tags,
            },
            transport,
            runtime,
        ))
    }
}
