use serde::Deserialize;
use std::time::Duration;

/// Upper bound for `HISTORY_TRANSFER_MAX_ATTEMPTS`; backoff doubles per attempt.
const MAX_HISTORY_TRANSFER_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Currency prefilled in new opportunity drafts.
    pub default_currency: String,
    /// How long a conversion waits for the history job before answering.
    pub history_transfer_timeout_ms: u64,
    pub history_transfer_max_attempts: u32,
    /// First retry delay; doubled for every further attempt.
    pub history_transfer_backoff_ms: u64,
    pub wizard_session_ttl_secs: u64,
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            default_currency: std::env::var("DEFAULT_CURRENCY")
                .unwrap_or_else(|_| "BRL".to_string())
                .trim()
                .to_uppercase(),
            history_transfer_timeout_ms: parse_env("HISTORY_TRANSFER_TIMEOUT_MS", 2_000)?,
            history_transfer_max_attempts: parse_env("HISTORY_TRANSFER_MAX_ATTEMPTS", 3)?,
            history_transfer_backoff_ms: parse_env("HISTORY_TRANSFER_BACKOFF_MS", 200)?,
            wizard_session_ttl_secs: parse_env("WIZARD_SESSION_TTL_SECS", 1_800)?,
        };

        config.validate()?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            config.database_url_prefix()
        );
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!(
            "History transfer: timeout {}ms, {} attempt(s), backoff {}ms",
            config.history_transfer_timeout_ms,
            config.history_transfer_max_attempts,
            config.history_transfer_backoff_ms
        );

        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.default_currency.len() != 3
            || !self.default_currency.chars().all(|c| c.is_ascii_uppercase())
        {
            anyhow::bail!("DEFAULT_CURRENCY must be a 3-letter ISO 4217 code");
        }
        if !(1..=MAX_HISTORY_TRANSFER_ATTEMPTS).contains(&self.history_transfer_max_attempts) {
            anyhow::bail!(
                "HISTORY_TRANSFER_MAX_ATTEMPTS must be between 1 and {}",
                MAX_HISTORY_TRANSFER_ATTEMPTS
            );
        }
        if self.wizard_session_ttl_secs == 0 {
            anyhow::bail!("WIZARD_SESSION_TTL_SECS must be positive");
        }
        Ok(())
    }

    /// First characters of the database URL, safe to log.
    fn database_url_prefix(&self) -> String {
        self.database_url.chars().take(20).collect()
    }

    pub fn history_transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.history_transfer_timeout_ms)
    }

    pub fn history_transfer_backoff(&self) -> Duration {
        Duration::from_millis(self.history_transfer_backoff_ms)
    }

    pub fn wizard_session_ttl(&self) -> Duration {
        Duration::from_secs(self.wizard_session_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: "postgresql://test".to_string(),
            port: 3000,
            default_currency: "BRL".to_string(),
            history_transfer_timeout_ms: 2_000,
            history_transfer_max_attempts: 3,
            history_transfer_backoff_ms: 200,
            wizard_session_ttl_secs: 1_800,
        }
    }

    #[test]
    fn accepts_defaults() {
        assert!(config().validate().is_ok());
        assert_eq!(config().history_transfer_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn rejects_bad_currency_and_zero_attempts() {
        let mut bad = config();
        bad.default_currency = "REAL".to_string();
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.history_transfer_max_attempts = 0;
        assert!(bad.validate().is_err());

        let mut bad = config();
        bad.history_transfer_max_attempts = 1_000;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn database_url_prefix_respects_char_boundaries() {
        let mut cfg = config();
        cfg.database_url = "postgresql://joão:çãõéíú@db/leads".to_string();
        assert_eq!(cfg.database_url_prefix(), "postgresql://joão:çã");
    }
}
