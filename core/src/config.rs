//! Client configuration.
//!
//! `ClientConfig::default()` matches a local development server; `from_env`
//! overrides individual settings from environment variables (and a `.env`
//! file outside of tests).

use std::time::Duration;

use crate::query::DEFAULT_PER_PAGE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// When the anti-forgery cookie handshake runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfHandshake {
    /// Fetch a fresh cookie before every request.
    EveryRequest,
    /// Fetch once and reuse the token until the session ends.
    OncePerSession,
    Disabled,
}

impl std::str::FromStr for CsrfHandshake {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "every-request" => Ok(CsrfHandshake::EveryRequest),
            "once-per-session" => Ok(CsrfHandshake::OncePerSession),
            "disabled" | "off" => Ok(CsrfHandshake::Disabled),
            other => Err(format!("'{other}' is not a CSRF mode")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server origin, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Prefix of the JSON API below the origin.
    pub api_prefix: String,
    pub csrf: CsrfHandshake,
    pub default_per_page: u32,
    /// Freshness window of todo lists and details.
    pub todos_stale_time: Duration,
    pub categories_stale_time: Duration,
    pub user_stale_time: Duration,
    /// Categories that may never be deleted.
    pub protected_categories: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_prefix: "/api".to_string(),
            csrf: CsrfHandshake::EveryRequest,
            default_per_page: DEFAULT_PER_PAGE,
            todos_stale_time: Duration::from_secs(5 * 60),
            categories_stale_time: Duration::from_secs(60 * 60),
            user_stale_time: Duration::from_secs(5 * 60),
            protected_categories: vec![
                "General".to_string(),
                "Urgent".to_string(),
                "Important".to_string(),
            ],
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    /// Defaults overridden by `TODO_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let mut config = Self::default();
        if let Ok(url) = std::env::var("TODO_API_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(prefix) = std::env::var("TODO_API_PREFIX") {
            config.api_prefix = prefix;
        }
        if let Ok(mode) = std::env::var("TODO_CSRF_MODE") {
            config.csrf = mode
                .parse()
                .map_err(|e| ConfigError::InvalidValue("TODO_CSRF_MODE".to_string(), e))?;
        }
        if let Some(per_page) = parse_var::<u32>("TODO_PAGE_SIZE")? {
            config.default_per_page = per_page.max(1);
        }
        if let Some(secs) = parse_var::<u64>("TODO_LIST_STALE_SECS")? {
            config.todos_stale_time = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("TODO_CATEGORY_STALE_SECS")? {
            config.categories_stale_time = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("TODO_USER_STALE_SECS")? {
            config.user_stale_time = Duration::from_secs(secs);
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
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(None),
    }
}
