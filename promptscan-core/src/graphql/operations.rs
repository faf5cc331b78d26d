//! Typed GraphQL operations understood by the PromptScan collector.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::model::GenerationRecord;

/// A GraphQL operation: its variables are the implementing value itself.
pub trait Operation: Serialize + Send + Sync {
    type Data: DeserializeOwned + Send;
    const NAME: &'static str;
    const DOCUMENT: &'static str;
}

/// `collect` mutation submitting one batch of generations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectGenerations<'a> {
    pub generations: &'a [&'a GenerationRecord],
    pub project_id: Option<String>,
}

impl Operation for CollectGenerations<'_> {
    type Data = CollectGenerationsData;
    const NAME: &'static str = "CollectGenerations";
    const DOCUMENT: &'static str = r#"mutation CollectGenerations($generations: [GenerationInput!]!, $projectId: UUID) {
  collect(generations: $generations, projectId: $projectId) {
    success
    error
  }
}"#;
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectGenerationsData {
    pub collect: CollectResult,
}

/// Collector verdict for one batch.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Describes the API key used for the call.
#[derive(Debug, Default, Serialize)]
pub struct ApiKeyQuery {}

impl Operation for ApiKeyQuery {
    type Data = ApiKeyData;
    const NAME: &'static str = "ApiKey";
    const DOCUMENT: &'static str = r#"query ApiKey {
  apiKey {
    enabled
    name
    scope
  }
}"#;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyData {
    #[serde(default)]
    pub api_key: Option<ApiKeyInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiKeyInfo {
    pub enabled: bool,
    pub name: String,
    pub scope: String,
}
