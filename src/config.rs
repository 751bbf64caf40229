//! Environment-driven configuration, loaded once at startup.

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

fn env_var(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnv(key.to_string()))
}

fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Exchange REST base URL, e.g. `https://api.elections.kalshi.com/trade-api/v2`.
    pub exchange_rest_url: String,
    /// Exchange streaming WS base URL.
    pub exchange_ws_url: String,
    /// Key id identifying the signing key to the exchange.
    pub exchange_key_id: String,
    /// Path to the PEM-encoded RSA private key used for request signing.
    pub exchange_private_key_path: String,

    /// Odds-provider HTTP base URL.
    pub odds_provider_url: String,
    pub odds_provider_api_key: Option<String>,

    /// Postgres connection string for the PnLJournal.
    pub database_url: String,

    /// Operator dashboard API bind address, e.g. `0.0.0.0:8080`.
    pub dashboard_bind_addr: String,

    /// Default per-match re-evaluation tick interval.
    pub check_interval: Duration,
    /// Retest interval: how often stickiness is relaxed to discover a lower ceiling.
    pub sticky_reset_secs: u64,
    /// Hysteresis delay before cancelling a resting order that has been overbid.
    pub overbid_cancel_delay: Duration,
    /// Maker-fee round-trip buffer (cents) used in rebalance breakeven math.
    pub fee_buffer_cents: u8,
    /// Bounded worker-pool size for reconciliation I/O.
    pub reconciler_workers: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let check_interval_secs: f64 = env_parse_or("CHECK_INTERVAL_SECS", 2.0);
        let sticky_reset_secs: u64 = env_parse_or("STICKY_RESET_SECS", 30);
        let overbid_cancel_delay_secs: f64 = env_parse_or("OVERBID_CANCEL_DELAY_SECS", 10.0);

        // §6 operator-tunable floors.
        let check_interval_secs = check_interval_secs.max(0.5);
        let sticky_reset_secs = sticky_reset_secs.max(1);
        let overbid_cancel_delay_secs = overbid_cancel_delay_secs.max(1.0);

        Ok(Self {
            exchange_rest_url: env_var_or(
                "KALSHI_REST_URL",
                "https://api.elections.kalshi.com/trade-api/v2",
            ),
            exchange_ws_url: env_var_or(
                "KALSHI_WS_URL",
                "wss://api.elections.kalshi.com/trade-api/ws/v2",
            ),
            exchange_key_id: env_var("KALSHI_KEY_ID")?,
            exchange_private_key_path: env_var("KALSHI_PRIVATE_KEY_PATH")?,

            odds_provider_url: env_var_or("ODDS_PROVIDER_URL", "https://api.the-odds-api.com/v4"),
            odds_provider_api_key: env::var("ODDS_PROVIDER_API_KEY").ok(),

            database_url: env_var("DATABASE_URL")?,

            dashboard_bind_addr: env_var_or("DASHBOARD_BIND_ADDR", "0.0.0.0:8080"),

            check_interval: Duration::from_secs_f64(check_interval_secs),
            sticky_reset_secs,
            overbid_cancel_delay: Duration::from_secs_f64(overbid_cancel_delay_secs),
            fee_buffer_cents: env_parse_or("FEE_BUFFER_CENTS", 2),
            reconciler_workers: env_parse_or("RECONCILER_WORKERS", 8),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floors_are_enforced() {
        std::env::set_var("CHECK_INTERVAL_SECS", "0.01");
        std::env::set_var("STICKY_RESET_SECS", "0");
        std::env::set_var("OVERBID_CANCEL_DELAY_SECS", "0.1");
        std::env::set_var("KALSHI_KEY_ID", "test-key");
        std::env::set_var("KALSHI_PRIVATE_KEY_PATH", "/tmp/test.pem");
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");

        let settings = Settings::from_env().unwrap();
        assert!(settings.check_interval >= Duration::from_secs_f64(0.5));
        assert!(settings.sticky_reset_secs >= 1);
        assert!(settings.overbid_cancel_delay >= Duration::from_secs_f64(1.0));
    }
}
