//! Minimal GraphQL-over-HTTP client for the PromptScan collector.
//!
//! Requests are `POST {query, operationName, variables}` with a bearer key.
//! Key resolution per call: explicit override, then the client default;
//! with neither, the call fails with `MissingApiKey` before any I/O.

pub mod operations;

pub use operations::*;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, PromptScanError};
use crate::http_client::HttpClient;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlRequest<'a, V: Serialize> {
    query: &'static str,
    operation_name: &'static str,
    variables: &'a V,
}

#[derive(Deserialize)]
struct GraphQlResponse<D> {
    data: Option<D>,
    #[serde(default)]
    errors: Option<Vec<GraphQlErrorEntry>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

#[derive(Debug, Clone)]
pub struct GraphQlClient {
    http: HttpClient,
    endpoint: String,
    default_api_key: Option<SecretString>,
}

impl GraphQlClient {
    pub fn new(
        http: HttpClient,
        endpoint: impl Into<String>,
        default_api_key: Option<SecretString>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            default_api_key,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run an operation, authenticating with `api_key` or the client default.
    pub async fn execute<O: Operation>(&self, operation: &O, api_key: Option<&str>) -> CoreResult<O::Data> {
        let key = self.ensure_api_key(api_key)?;
        let auth = format!("Bearer {key}");
        let body = GraphQlRequest {
            query: O::DOCUMENT,
            operation_name: O::NAME,
            variables: operation,
        };

        let (resp, request_id, latency) = self
            .http
            .post_json::<_, GraphQlResponse<O::Data>>(
                &self.endpoint,
                &body,
                &[("Authorization", auth.as_str())],
            )
            .await?;

        tracing::trace!(
            operation = O::NAME,
            latency_ms = latency,
            request_id = request_id.as_deref(),
            "graphql call completed"
        );

        let errors = resp.errors.unwrap_or_default();
        match resp.data {
            Some(data) => {
                if !errors.is_empty() {
                    tracing::warn!(
                        operation = O::NAME,
                        errors = %join_messages(&errors),
                        "graphql response carried partial errors"
                    );
                }
                Ok(data)
            }
            None if !errors.is_empty() => Err(PromptScanError::GraphQl(join_messages(&errors))),
            None => Err(PromptScanError::NoData),
        }
    }

    fn ensure_api_key<'a>(&'a self, api_key: Option<&'a str>) -> CoreResult<&'a str> {
        if let Some(key) = api_key {
            return Ok(key);
        }
        if let Some(key) = &self.default_api_key {
            return Ok(key.expose_secret());
        }
        Err(PromptScanError::MissingApiKey)
    }
}

fn join_messages(errors: &[GraphQlErrorEntry]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
