use std::{env, str::FromStr, time::Duration};

use dotenv::dotenv;
use game::betting::{DEFAULT_DAILY_BET_LIMIT, DEFAULT_ROUND_SECONDS, DEFAULT_STAKE};
use market::FeedConfig;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Rest,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "rest" | "supabase" => Ok(StoreBackend::Rest),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRules {
    pub max_daily_bets: u32,
    pub round_seconds: i64,
    pub default_stake: i64,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            max_daily_bets: DEFAULT_DAILY_BET_LIMIT,
            round_seconds: DEFAULT_ROUND_SECONDS,
            default_stake: DEFAULT_STAKE,
        }
    }
}

impl GameRules {
    pub fn countdown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.round_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,

    // Storage
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,

    // Telegram
    pub telegram_bot_token: String,
    pub init_data_max_age: Option<Duration>,

    // Security
    pub allowed_origins: Vec<String>,
    pub rate_limit: u32,

    pub rules: GameRules,

    // Price feed
    pub feed: FeedConfig,
    pub price_stream_enabled: bool,

    // Links
    pub referral_base_url: String,
    pub web_app_url: String,
    pub community_url: String,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server_host = lookup("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let server_port = parse_or(&lookup, "SERVER_PORT", 8080u16)?;

        let database_url = lookup("DATABASE_URL");
        let supabase_url = lookup("SUPABASE_URL");
        let supabase_service_key = lookup("SUPABASE_SERVICE_KEY");
        let store_backend = match lookup("STORE_BACKEND") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: "STORE_BACKEND",
                value,
            })?,
            None if database_url.is_some() => StoreBackend::Postgres,
            None if supabase_url.is_some() => StoreBackend::Rest,
            None => StoreBackend::Memory,
        };
        match store_backend {
            StoreBackend::Postgres if database_url.is_none() => {
                return Err(ConfigError::Missing("DATABASE_URL"))
            }
            StoreBackend::Rest if supabase_url.is_none() => {
                return Err(ConfigError::Missing("SUPABASE_URL"))
            }
            StoreBackend::Rest if supabase_service_key.is_none() => {
                return Err(ConfigError::Missing("SUPABASE_SERVICE_KEY"))
            }
            _ => {}
        }
        let db_max_connections = parse_or(&lookup, "DB_MAX_CONNECTIONS", 10u32)?;

        let telegram_bot_token = lookup("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        // 0 disables the freshness check
        let max_age_secs = parse_or(&lookup, "INIT_DATA_MAX_AGE", 86_400u64)?;
        let init_data_max_age = (max_age_secs > 0).then(|| Duration::from_secs(max_age_secs));

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let rate_limit = parse_or(&lookup, "RATE_LIMIT", 120u32)?;

        let defaults = GameRules::default();
        let rules = GameRules {
            max_daily_bets: parse_or(&lookup, "MAX_DAILY_BETS", defaults.max_daily_bets)?,
            round_seconds: parse_or(&lookup, "ROUND_SECONDS", defaults.round_seconds)?,
            default_stake: parse_or(&lookup, "DEFAULT_STAKE", defaults.default_stake)?,
        };
        if rules.round_seconds < 0 {
            return Err(ConfigError::Invalid {
                key: "ROUND_SECONDS",
                value: rules.round_seconds.to_string(),
            });
        }
        if rules.default_stake <= 0 {
            return Err(ConfigError::Invalid {
                key: "DEFAULT_STAKE",
                value: rules.default_stake.to_string(),
            });
        }

        let feed_defaults = FeedConfig::default();
        let feed = FeedConfig {
            symbol: lookup("PRICE_SYMBOL").unwrap_or(feed_defaults.symbol),
            coin_id: lookup("PRICE_COIN_ID").unwrap_or(feed_defaults.coin_id),
            coingecko_url: lookup("COINGECKO_URL").unwrap_or(feed_defaults.coingecko_url),
            binance_url: lookup("BINANCE_URL").unwrap_or(feed_defaults.binance_url),
            stream_url: lookup("BINANCE_STREAM_URL").unwrap_or(feed_defaults.stream_url),
            ..feed_defaults
        };
        let price_stream_enabled = parse_or(&lookup, "PRICE_STREAM_ENABLED", true)?;

        let web_app_url = lookup("WEB_APP_URL")
            .unwrap_or_else(|| "https://fragmetric-tg-miniapp.vercel.app/index.html".to_string());
        let referral_base_url =
            lookup("REFERRAL_BASE_URL").unwrap_or_else(|| "https://t.me/fragtopu_bot".to_string());
        let community_url = lookup("COMMUNITY_URL")
            .unwrap_or_else(|| "https://t.me/fragmetric_community".to_string());

        Ok(Config {
            server_host,
            server_port,
            store_backend,
            database_url,
            db_max_connections,
            supabase_url,
            supabase_service_key,
            telegram_bot_token,
            init_data_max_age,
            allowed_origins,
            rate_limit,
            rules,
            feed,
            price_stream_enabled,
            referral_base_url,
            web_app_url,
            community_url,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
