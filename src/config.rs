use std::env;

/// Environment variable names - single source of truth
pub mod env_vars {
    pub const DISCORD_BOT_TOKEN: &str = "DISCORD_BOT_TOKEN";
    pub const OPENROUTER_API_KEY: &str = "OPENROUTER_API_KEY";
    pub const OPENROUTER_BASE_URL: &str = "OPENROUTER_BASE_URL";
    pub const DATABASE_URL: &str = "DATABASE_URL";
    pub const INACTIVITY_THRESHOLD_HOURS: &str = "INACTIVITY_THRESHOLD_HOURS";
    pub const CLEANUP_INTERVAL_SECS: &str = "CLEANUP_INTERVAL_SECS";
}

/// Default values
pub mod defaults {
    pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
    pub const DATABASE_URL: &str = "./.db/personalities.db";
    pub const INACTIVITY_THRESHOLD_HOURS: u64 = 24;
    pub const CLEANUP_INTERVAL_SECS: u64 = 3600;
}

#[derive(Clone)]
pub struct Config {
    pub discord_bot_token: String,
    pub openrouter_api_key: String,
    pub openrouter_base_url: String,
    pub database_url: String,
    pub inactivity_threshold_hours: u64,
    pub cleanup_interval_secs: u64,
}

impl Config {
    /// Load configuration from the environment. Missing required credentials
    /// are a startup failure - the process must not proceed without them.
    pub fn from_env() -> Result<Self, String> {
        let discord_bot_token = env::var(env_vars::DISCORD_BOT_TOKEN)
            .map_err(|_| format!("{} environment variable is required", env_vars::DISCORD_BOT_TOKEN))?;
        let openrouter_api_key = env::var(env_vars::OPENROUTER_API_KEY)
            .map_err(|_| format!("{} environment variable is required", env_vars::OPENROUTER_API_KEY))?;

        Ok(Self {
            discord_bot_token,
            openrouter_api_key,
            openrouter_base_url: env::var(env_vars::OPENROUTER_BASE_URL)
                .unwrap_or_else(|_| defaults::OPENROUTER_BASE_URL.to_string()),
            database_url: env::var(env_vars::DATABASE_URL)
                .unwrap_or_else(|_| defaults::DATABASE_URL.to_string()),
            inactivity_threshold_hours: env::var(env_vars::INACTIVITY_THRESHOLD_HOURS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::INACTIVITY_THRESHOLD_HOURS),
            cleanup_interval_secs: env::var(env_vars::CLEANUP_INTERVAL_SECS)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults::CLEANUP_INTERVAL_SECS),
        })
    }
}
