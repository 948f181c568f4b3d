//! Server settings loaded from the environment.

use chrono::TimeDelta;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub access_token_ttl: TimeDelta,
    pub refresh_token_ttl: TimeDelta,
    pub default_per_page: u64,
    pub max_per_page: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            access_token_ttl: TimeDelta::minutes(60),
            refresh_token_ttl: TimeDelta::days(30),
            default_per_page: 10,
            max_per_page: 100,
        }
    }
}

impl ServerConfig {
    /// Skips `.env` under test so runs stay hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let mut config = Self::default();
        if let Some(port) = parse_var("PORT")? {
            config.port = port;
        }
        if let Some(minutes) = parse_var("ACCESS_TOKEN_TTL_MINUTES")? {
            config.access_token_ttl = TimeDelta::minutes(minutes);
        }
        if let Some(days) = parse_var("REFRESH_TOKEN_TTL_DAYS")? {
            config.refresh_token_ttl = TimeDelta::days(days);
        }
        if let Some(per_page) = parse_var::<u64>("DEFAULT_PER_PAGE")? {
            config.default_per_page = per_page.max(1);
        }
        if let Some(max) = parse_var::<u64>("MAX_PER_PAGE")? {
            config.max_per_page = max.max(1);
        }
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(None),
    }
}
