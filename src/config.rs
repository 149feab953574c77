//! Environment-driven configuration (C17, §10.3).
//!
//! Follows the teacher's `Config::from_env()` shape: load `.env` once, read each
//! variable with a typed default, never panic on a missing optional value.

#[derive(Debug, Clone)]
pub struct Config {
    // Upstream broker
    pub broker_consumer_id: String,
    pub broker_consumer_secret: String,
    pub broker_base_url: String,
    pub broker_stream_url: String,

    // Storage
    pub database_path: String,
    pub db_pool_min: u32,
    pub db_pool_max: u32,

    // Watchlist / futures
    pub extra_symbols: Vec<String>,
    pub futures_override: Option<String>,

    // Publisher
    pub ws_throttle_interval_ms: u64,

    // Connection manager
    pub ws_heartbeat_interval_secs: u64,
    pub ws_heartbeat_timeout_secs: u64,
    pub ws_queue_size: usize,
    pub ws_auth_token: String,
    pub ws_max_connections_per_ip: usize,

    // Daily reset
    pub reset_hour: u32,
    pub reset_minute: u32,
    pub reset_tz: String,

    // HTTP
    pub app_host: String,
    pub app_port: u16,
    pub cors_origins: Vec<String>,

    // Observability
    pub log_level: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env_or(key, default)
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let broker_consumer_id = env_or("BROKER_CONSUMER_ID", "");
        let broker_consumer_secret = env_or("BROKER_CONSUMER_SECRET", "");

        let futures_override = {
            let v = env_or("FUTURES_OVERRIDE", "");
            if v.is_empty() { None } else { Some(v) }
        };

        Ok(Self {
            broker_consumer_id,
            broker_consumer_secret,
            broker_base_url: env_or("BROKER_BASE_URL", "https://fc-data.example.com/"),
            broker_stream_url: env_or("BROKER_STREAM_URL", "wss://fc-datahub.example.com/"),

            database_path: env_or("DATABASE_PATH", "./market_pipeline.db"),
            db_pool_min: env_parse("DB_POOL_MIN", 2),
            db_pool_max: env_parse("DB_POOL_MAX", 10),

            extra_symbols: env_list("EXTRA_SYMBOLS", ""),
            futures_override,

            ws_throttle_interval_ms: env_parse("WS_THROTTLE_INTERVAL_MS", 500),

            ws_heartbeat_interval_secs: env_parse("WS_HEARTBEAT_INTERVAL_SECS", 30),
            ws_heartbeat_timeout_secs: env_parse("WS_HEARTBEAT_TIMEOUT_SECS", 10),
            ws_queue_size: env_parse("WS_QUEUE_SIZE", 50),
            ws_auth_token: env_or("WS_AUTH_TOKEN", ""),
            ws_max_connections_per_ip: env_parse("WS_MAX_CONNECTIONS_PER_IP", 5),

            reset_hour: env_parse("RESET_HOUR", 15),
            reset_minute: env_parse("RESET_MINUTE", 5),
            reset_tz: env_or("RESET_TZ", "Asia/Ho_Chi_Minh"),

            app_host: env_or("APP_HOST", "0.0.0.0"),
            app_port: env_parse("APP_PORT", 8000),
            cors_origins: env_list("CORS_ORIGINS", "*"),

            log_level: env_or("LOG_LEVEL", "info"),
        })
    }

    /// True when the broker credentials required for startup are present.
    pub fn has_broker_credentials(&self) -> bool {
        !self.broker_consumer_id.is_empty() && !self.broker_consumer_secret.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_symbols_are_uppercased_and_trimmed() {
        std::env::set_var("EXTRA_SYMBOLS_TEST_PROBE", " vnm, hpg ,vic");
        let list = env_list("EXTRA_SYMBOLS_TEST_PROBE", "");
        assert_eq!(list, vec!["VNM", "HPG", "VIC"]);
    }

    #[test]
    fn futures_override_empty_string_is_none() {
        std::env::remove_var("FUTURES_OVERRIDE");
        let cfg = Config::from_env().unwrap();
        assert!(cfg.futures_override.is_none());
    }
}
