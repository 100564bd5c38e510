use std::sync::Arc;

use steward::bot::Bot;
use steward::config::Config;
use steward::llm::LlmClient;
use steward::profile::NotionDirectory;
use steward::transport::TelegramTransport;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    // Missing credentials are fatal before the loop starts.
    let config = Config::from_env()?;
    info!(?config, "configuration loaded");

    steward::health::spawn(config.port).await?;

    let transport = Arc::new(TelegramTransport::new(&config.telegram_token));
    let profiles = Arc::new(NotionDirectory::new(
        &config.notion_token,
        &config.employees_db_id,
    ));
    let backend = Arc::new(LlmClient::new(&config));

    let mut bot = Bot::new(config, transport, profiles, backend)?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown signal received");
        let _ = stop_tx.send(true);
    });

    bot.run(stop_rx).await;
    info!("shutdown complete");
    Ok(())
}
