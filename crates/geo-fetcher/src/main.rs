//! geo-fetcher 命令行入口

use anyhow::Context;
use clap::Parser;
use geo_fetcher::Fetchers;
use geo_fetcher::cli::{Cli, CommandRunner, Commands};
use questline_shared::config::AppConfig;
use questline_shared::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::load("geo-fetcher").context("加载配置失败")?;
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    let _guard = observability::init(&config.observability).await?;

    let fetchers = Fetchers::from_config(&config)?;
    let runner = CommandRunner::new(fetchers);

    match cli.command {
        Commands::Geocode { addresses } => runner.run_geocode(&addresses).await?,
        Commands::Reverse { lat, lon } => runner.run_reverse(lat, lon).await?,
        Commands::Weather { lat, lon } => runner.run_weather(lat, lon).await?,
        Commands::Invalidate { pattern } => runner.run_invalidate(&pattern).await?,
    }

    Ok(())
}
