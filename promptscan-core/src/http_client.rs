use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, PromptScanError};

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(max_idle) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(max_idle);
        }
        let inner = builder.build().map_err(|e| {
            PromptScanError::Other(anyhow::anyhow!("http client build failed: {e}"))
        })?;
        Ok(Self {
            inner,
            user_agent: format!("promptscan-rust/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// POST a JSON body and decode a JSON response.
    /// Returns the decoded body, the server's request id (if any) and latency in ms.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<(R, Option<String>, u32)> {
        let start = Instant::now();
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent);

        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req.send().await.map_err(|e| {
            tracing::debug!(error = %e, url, "collector request failed");
            PromptScanError::Unavailable {
                endpoint: url.to_string(),
            }
        })?;

        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();
        let headers = resp.headers().clone();
        let request_id = extract_request_id(&headers);

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let ra = parse_retry_after(&headers);
            return Err(map_http_error(url, status, ra, &text));
        }

        let parsed = resp.json::<R>().await.map_err(|e| PromptScanError::Http {
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })?;
        Ok((parsed, request_id, latency))
    }
}

fn extract_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    static CANDIDATES: [&str; 3] = ["x-request-id", "request-id", "x-correlation-id"];
    for k in CANDIDATES {
        if let Some(v) = headers.get(k)
            && let Ok(s) = v.to_str()
        {
            return Some(s.to_string());
        }
    }
    None
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(
    url: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> PromptScanError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => PromptScanError::RateLimited { retry_after },
        s if s.is_server_error() => PromptScanError::Unavailable {
            endpoint: url.to_string(),
        },
        s => PromptScanError::Http {
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        let mut t = s[..end].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
