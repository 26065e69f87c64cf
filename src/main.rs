pub mod clock;
pub mod collector_core;
pub mod config;
pub mod orchestrator;
pub mod signal_core;
pub mod store;

use config::Config;
use collector_core::{CollectorSettings, WebDriverFactory};
use orchestrator::Orchestrator;
use std::sync::Arc;
use store::{ResultStore, WatermarkStore};

#[tokio::main]
pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Write logs to stderr so the stream stays pipeable
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    log::info!("🚀 Starting GoalFlow...");

    // ConfigInvalid is the one process-fatal error: nothing runs until the
    // environment parses and validates
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("❌ {}", err);
            return Err(err.into());
        }
    };

    log::info!("📊 Configuration:");
    log::info!("   ├─ Competitions: {:?}", config.competitions);
    log::info!("   ├─ Lookback: {}h", config.lookback_hours);
    log::info!("   ├─ Polling interval: {:?}", config.poll_interval);
    log::info!(
        "   ├─ Interaction jitter: {:.1}s..{:.1}s",
        config.delay_min,
        config.delay_max
    );
    log::info!("   ├─ Data dir: {}", config.data_dir);
    log::info!("   ├─ Feed: {}", config.feed_url);
    log::info!("   └─ WebDriver: {}", config.webdriver_url);

    let results = ResultStore::new(&config.data_dir)?;
    let watermarks = WatermarkStore::new(&config.data_dir)?;
    let sources = Arc::new(WebDriverFactory::new(
        config.webdriver_url.clone(),
        config.source_username.clone(),
        config.source_password.clone(),
    ));

    let settings = CollectorSettings {
        feed_url: config.feed_url.clone(),
        lookback_hours: config.lookback_hours,
        poll_interval: config.poll_interval,
        delay_min: config.delay_min,
        delay_max: config.delay_max,
    };

    let mut orchestrator = Orchestrator::new(
        config.competitions.clone(),
        settings,
        sources,
        results,
        watermarks,
    );
    orchestrator.start().await;

    log::info!("🔄 Press CTRL+C to shutdown gracefully");
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => log::error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    orchestrator.stop().await;
    log::info!("✅ GoalFlow stopped");
    Ok(())
}
