//! Client SDK for reporting LLM generation telemetry to PromptScan.
//!
//! ```no_run
//! use promptscan_core::model::{GenerationRecord, Message};
//! use promptscan_core::PromptScanSdk;
//!
//! # async fn run() -> promptscan_core::error::CoreResult<()> {
//! let sdk = PromptScanSdk::builder().api_key("project-...").build()?;
//! sdk.collect_generation(GenerationRecord::new("gpt-4o-mini", vec![Message::user("Hi!")]));
//! sdk.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod graphql;
pub mod http_client;
pub mod model;
pub mod sdk;
pub mod transport;
#[cfg(test)]
mod test_log;

pub use sdk::{PromptScanSdk, PromptScanSdkBuilder, QueuedGeneration};
