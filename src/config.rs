//! Process configuration.
//!
//! All tunables are read once from the environment at startup and carried as
//! immutable values into the components that need them. There are no hidden
//! configuration statics: the session cookie settings in particular travel as
//! a `SessionConfig` value so that every cookie written or parsed uses exactly
//! one name/path/flag set for the process lifetime.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// SameSite policy of the session cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }

    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "strict" => Ok(SameSite::Strict),
            "lax" => Ok(SameSite::Lax),
            "none" => Ok(SameSite::None),
            _ => Err(ConfigError::Invalid { name: "BLOG_SESSION_SAME_SITE", value: value.to_string() }),
        }
    }
}

/// Session cookie settings, constant for the process lifetime.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub cookie_path: String,
    /// Lifetime of a session from creation; access does not extend it.
    pub timeout: Duration,
    pub cookie_secure: bool,
    pub cookie_http_only: bool,
    pub same_site: SameSite,
    /// Minimum length of a generated session id.
    pub min_id_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "blog.session".to_string(),
            cookie_path: "/".to_string(),
            timeout: Duration::from_secs(30 * 60),
            cookie_secure: false,
            cookie_http_only: false,
            same_site: SameSite::Strict,
            min_id_length: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_port: u16,
    pub database_url: String,
    pub pool_size: u32,
    pub session: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: 8081,
            database_url: "postgres://localhost:5432/blog".to_string(),
            pool_size: 5,
            session: SessionConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw }),
        Err(_) => Ok(default),
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Build the process configuration from `BLOG_*` environment variables,
/// falling back to defaults for anything unset.
pub fn from_env() -> Result<AppConfig, ConfigError> {
    let defaults = AppConfig::default();
    let session_defaults = defaults.session.clone();

    let same_site = match std::env::var("BLOG_SESSION_SAME_SITE") {
        Ok(raw) => SameSite::parse(&raw)?,
        Err(_) => session_defaults.same_site,
    };

    // Reject names/paths that could not be written back as a header value.
    let cookie_name = env_string("BLOG_SESSION_COOKIE_NAME", &session_defaults.cookie_name);
    if !crate::cookie::valid_cookie_name(&cookie_name) {
        return Err(ConfigError::Invalid { name: "BLOG_SESSION_COOKIE_NAME", value: cookie_name });
    }
    let cookie_path = env_string("BLOG_SESSION_COOKIE_PATH", &session_defaults.cookie_path);
    if !crate::cookie::valid_cookie_path(&cookie_path) {
        return Err(ConfigError::Invalid { name: "BLOG_SESSION_COOKIE_PATH", value: cookie_path });
    }

    let session = SessionConfig {
        cookie_name,
        cookie_path,
        timeout: Duration::from_secs(env_parse(
            "BLOG_SESSION_TIMEOUT_SECS",
            session_defaults.timeout.as_secs(),
        )?),
        cookie_secure: env_parse("BLOG_SESSION_COOKIE_SECURE", session_defaults.cookie_secure)?,
        cookie_http_only: env_parse("BLOG_SESSION_COOKIE_HTTP_ONLY", session_defaults.cookie_http_only)?,
        same_site,
        min_id_length: env_parse("BLOG_SESSION_ID_MIN_LENGTH", session_defaults.min_id_length)?,
    };

    Ok(AppConfig {
        http_port: env_parse("BLOG_HTTP_PORT", defaults.http_port)?,
        database_url: env_string("BLOG_DATABASE_URL", &defaults.database_url),
        pool_size: env_parse("BLOG_DB_POOL_SIZE", defaults.pool_size)?,
        session,
    })
}
