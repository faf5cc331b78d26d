use async_trait::async_trait;

use crate::error::CoreResult;
use crate::graphql::{CollectGenerations, CollectResult, GraphQlClient};
use crate::model::GenerationRecord;

/// Delivers one batch of generations sharing an API key.
///
/// The SDK owns queuing and retries; a transport only reports the outcome of
/// a single attempt. `Ok` with `success == false` and `Err` are both retried.
#[async_trait]
pub trait CollectTransport: Send + Sync {
    async fn collect(
        &self,
        generations: &[&GenerationRecord],
        api_key: Option<&str>,
    ) -> CoreResult<CollectResult>;
}

#[async_trait]
impl CollectTransport for GraphQlClient {
    async fn collect(
        &self,
        generations: &[&GenerationRecord],
        api_key: Option<&str>,
    ) -> CoreResult<CollectResult> {
        let op = CollectGenerations {
            generations,
            project_id: None,
        };
        let data = self.execute(&op, api_key).await?;
        Ok(data.collect)
    }
}
