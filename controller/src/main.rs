use anyhow::{Context, Result};
use envconfig::Envconfig;
use tracing_subscriber::EnvFilter;

use controller::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(config.log_level)
        .init();

    controller::run(config).await
}
