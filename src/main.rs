use dotenv::dotenv;
use std::process;
use std::sync::Arc;

mod ai;
mod bot;
mod channels;
mod config;
mod db;
mod history;

use ai::{AiClient, OpenRouterClient};
use bot::channel_manager::ChannelManager;
use bot::Bot;
use config::Config;
use db::Database;

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    };

    let db = match Database::new(&config.database_url) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            log::error!("Failed to open personality database {}: {}", config.database_url, e);
            process::exit(1);
        }
    };
    log::info!("Personality database ready at {}", config.database_url);

    let client = match OpenRouterClient::new(&config.openrouter_api_key, &config.openrouter_base_url)
    {
        Ok(client) => AiClient::OpenRouter(client),
        Err(e) => {
            log::error!("Failed to build OpenRouter client: {}", e);
            process::exit(1);
        }
    };
    let channel_manager = ChannelManager::new(config.inactivity_threshold_hours);
    let bot = Arc::new(Bot::new(db, client, channel_manager));

    let result = channels::discord::start_discord_listener(
        &config.discord_bot_token,
        config.cleanup_interval_secs,
        bot.clone(),
    )
    .await;

    bot.shutdown();

    if let Err(e) = result {
        log::error!("{}", e);
        process::exit(1);
    }
}
