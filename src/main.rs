use anyhow::Context;
use tracing::{error, info};

use adpost::{BotConfig, ListingRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("adpost=info")),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: adpost <listing.json>")?;
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading listing file {}", path))?;
    let listing: ListingRequest =
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path))?;

    let config = BotConfig::load();
    info!("posting '{}' via {}", listing.title, config.base_url);

    let submitted = adpost::submit_listing(config, &listing).await?;
    if submitted {
        info!("done");
        Ok(())
    } else {
        error!("flow aborted before submission");
        std::process::exit(1);
    }
}
