//! Bot Core - one trading bot instance on the shared account
//!
//! 1. Loads identity from the environment and the trading profile from disk
//! 2. Wires the cycle runner against the paper broker
//! 3. Runs the evaluate/reevaluate cycle on an interval

use anyhow::bail;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::info;

use bot_core::{load_config, BotProfile, BotRunner, PaperBroker, TradingMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    info!("Starting bot-core...");

    let config = load_config()?;
    let profile = BotProfile::load_or_default(&config.profile_path)?;
    info!(
        "Bot {} (config slot {}), {:?} mode, {} symbol(s)",
        config.bot_id,
        config.config_id,
        profile.trading_mode,
        profile.symbols.len()
    );

    if profile.trading_mode == TradingMode::Live {
        bail!("live trading needs an external broker gateway; set trading_mode: paper");
    }

    let mut paper = PaperBroker::new();
    for symbol in &profile.symbols {
        if paper.price(symbol).is_none() {
            paper = paper.with_symbol(symbol, rust_decimal::Decimal::ONE);
        }
    }
    let broker = Arc::new(paper);

    let runner = BotRunner::new(
        config.bot_id,
        config.config_id,
        profile.clone(),
        broker.clone(),
        broker.clone(),
        broker.clone(),
        broker,
    );

    let mut cycle = interval(Duration::from_secs(profile.cycle_interval_secs));
    loop {
        cycle.tick().await;
        runner.run_cycle().await;
    }
}
