use std::path::PathBuf;

use chrono::Utc;
use clap::Parser;
use promptscan_core::{
    PromptScanSdkBuilder,
    config::SdkConfig,
    model::{GenerationRecord, Message, Usage},
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const DEFAULT_API_KEY: &str = "project-f47ac10b-58cc-4372-a567-0e02b2c3d479";
const DEFAULT_BASE_URL: &str = "http://localhost:8020/graphql/";

#[derive(Parser)]
#[command(author, version, about = "PromptScan SDK example: report a synthetic generation", long_about = None)]
struct Cli {
    /// Defaults to a local development key when neither flag, env nor config sets one
    #[arg(long, env = "PROMPTSCAN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Defaults to a local collector when neither flag, env nor config sets one
    #[arg(long, env = "PROMPTSCAN_BASE_URL")]
    base_url: Option<String>,
    /// Optional SDK config file (TOML or JSON); flags above win over it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of generations to submit
    #[arg(long, default_value_t = 1)]
    count: usize,
    /// Turn off SDK debug logging
    #[arg(long)]
    no_debug: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,promptscan_core=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn sample_generation() -> GenerationRecord {
    GenerationRecord::new(
        "gpt-4o-mini",
        vec![
            Message::system("You are a helpful assistant!"),
            Message::user("Hi!"),
        ],
    )
    .trace_id(Uuid::new_v4().to_string())
    .id(Uuid::new_v4().to_string())
    .usage(
        Usage::tokens(20, 20, 40)
            .prompt_details(Some(0), Some(0))
            .completion_details(Some(0), Some(0)),
    )
    .tag("user_id", "xyz")
    .timestamp(Utc::now().fixed_offset())
    .costs(0.125, 0.450)
}

/// Key and endpoint to set on top of `cfg`. Flags (and their env vars) win;
/// the local development defaults apply only when `cfg` resolves nothing.
fn connection_overrides(cli: &Cli, cfg: &SdkConfig) -> (Option<String>, Option<String>) {
    let api_key = match &cli.api_key {
        Some(key) => Some(key.clone()),
        None if cfg.api_key().is_none() => Some(DEFAULT_API_KEY.to_string()),
        None => None,
    };
    let base_url = match &cli.base_url {
        Some(url) => Some(url.clone()),
        None if cfg.base_url.is_none() => Some(DEFAULT_BASE_URL.to_string()),
        None => None,
    };
    (api_key, base_url)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    tracing::info!("Starting PromptScan SDK example");

    let cfg = match &cli.config {
        Some(path) => SdkConfig::from_path(path)?,
        None => SdkConfig::default(),
    };
    let (api_key, base_url) = connection_overrides(&cli, &cfg);
    let mut builder = PromptScanSdkBuilder::from_config(&cfg);
    if let Some(api_key) = api_key {
        builder = builder.api_key(api_key);
    }
    if let Some(base_url) = base_url {
        builder = builder.base_url(base_url);
    }
    let sdk = builder.debug(!cli.no_debug).build()?;

    for _ in 0..cli.count {
        sdk.collect_generation(sample_generation());
    }
    tracing::info!(
        in_flight = sdk.estimate_generations_in_flight_count(),
        "Submitted generations"
    );

    sdk.close().await;
    Ok(())
}
