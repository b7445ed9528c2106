//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (`KEYHOLE__*`, plus the bare `PORT`)

use serde::Deserialize;
use std::net::IpAddr;
use url::Url;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub oauth: OAuthConfig,
    pub session: SessionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public base URL the browser reaches us at (e.g., "https://login.example.com")
    pub public_url: String,
}

/// How client credentials are presented to the token endpoint
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenAuthStyle {
    /// `client_id` and `client_secret` as form fields
    #[default]
    Body,
    /// HTTP Basic authorization header
    Basic,
}

/// OAuth provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Provider name used in the `/auth/<provider>` route segment
    pub provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    /// Account endpoint queried with the bearer token
    pub account_url: String,
    /// `Accept` header sent to the account endpoint
    pub account_accept: String,
    /// A list in TOML, space separated in the environment
    #[serde(default, deserialize_with = "scope_list")]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub token_auth_style: TokenAuthStyle,
    /// Timeout for each outbound call, in seconds
    pub request_timeout_seconds: u64,
    /// Fixed anti-forgery token; generated at startup when absent
    ///
    /// One value for every login is weak CSRF protection; prefer leaving it
    /// unset outside of tests.
    pub state_token: Option<String>,
}

/// Session cookie configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Cookie name
    pub name: String,
    /// HMAC signing key (32+ bytes)
    pub signing_key: String,
    /// Encryption key (32+ bytes); sessions are signed only when absent
    pub encryption_key: Option<String>,
    /// Session max age in seconds (default: 28800 = 8 hours)
    pub max_age_seconds: i64,
    /// Set the `Secure` cookie attribute
    pub secure: bool,
}

const MIN_KEY_BYTES: usize = 32;

impl AppConfig {
    /// Load configuration from files and environment
    ///
    /// # Errors
    /// Returns `AppError::Config` if a value is missing or invalid.
    pub fn load() -> Result<Self, crate::error::AppError> {
        Self::load_from(None, std::env::var("PORT").ok())
    }

    /// `load` with an explicit environment instead of the process one
    ///
    /// `vars` replaces the process environment for the `KEYHOLE__*` layer
    /// when set; `port` is the bare `PORT` override.
    pub(crate) fn load_from(
        vars: Option<Vec<(String, String)>>,
        port: Option<String>,
    ) -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        // Values stay strings: credentials such as "007123" must not be
        // reparsed as numbers. Typed fields are converted on deserialize.
        let environment = Environment::with_prefix("KEYHOLE")
            .separator("__")
            .source(vars.map(|vars| vars.into_iter().collect()));

        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("oauth.account_accept", "application/json")?
            .set_default("oauth.request_timeout_seconds", 10)?
            .set_default("session.name", "keyhole-session")?
            .set_default("session.max_age_seconds", 28_800)?
            .set_default("session.secure", true)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment)
            // PaaS platforms hand out the listen port as a bare PORT variable
            .set_override_option("server.port", port)?
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Callback URL registered with the provider
    ///
    /// Derived from `server.public_url`, so it carries whatever scheme the
    /// deployment is reachable on.
    pub fn redirect_url(&self) -> Result<Url, crate::error::AppError> {
        let base = self.server.public_url.trim_end_matches('/');
        Url::parse(&format!("{}/auth/{}/callback", base, self.oauth.provider)).map_err(|e| {
            crate::error::AppError::Config(format!("server.public_url is not a valid URL: {e}"))
        })
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        let public_url = Url::parse(&self.server.public_url)
            .map_err(|e| AppError::Config(format!("server.public_url is not a valid URL: {e}")))?;

        match public_url.scheme() {
            "https" => {}
            "http" if is_local_host(public_url.host_str().unwrap_or_default()) => {
                tracing::warn!(
                    public_url = %self.server.public_url,
                    "Using a plain http public URL for local development"
                );
            }
            "http" => {
                return Err(AppError::Config(
                    "server.public_url must be https for non-local hosts".to_string(),
                ));
            }
            other => {
                return Err(AppError::Config(format!(
                    "server.public_url has unsupported scheme {other:?}"
                )));
            }
        }

        let provider = self.oauth.provider.as_str();
        if provider.is_empty()
            || !provider
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AppError::Config(
                "oauth.provider must be a non-empty [A-Za-z0-9_-] path segment".to_string(),
            ));
        }

        for (key, value) in [
            ("oauth.client_id", &self.oauth.client_id),
            ("oauth.client_secret", &self.oauth.client_secret),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("{key} must not be empty")));
            }
        }

        for (key, value) in [
            ("oauth.authorize_url", &self.oauth.authorize_url),
            ("oauth.token_url", &self.oauth.token_url),
            ("oauth.account_url", &self.oauth.account_url),
        ] {
            Url::parse(value)
                .map_err(|e| AppError::Config(format!("{key} is not a valid URL: {e}")))?;
        }

        if self.oauth.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "oauth.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if matches!(&self.oauth.state_token, Some(token) if token.is_empty()) {
            return Err(AppError::Config(
                "oauth.state_token must not be empty when set".to_string(),
            ));
        }

        if self.session.signing_key.len() < MIN_KEY_BYTES {
            return Err(AppError::Config(format!(
                "session.signing_key must be at least {} bytes",
                MIN_KEY_BYTES
            )));
        }

        if let Some(key) = &self.session.encryption_key {
            if key.len() < MIN_KEY_BYTES {
                return Err(AppError::Config(format!(
                    "session.encryption_key must be at least {} bytes",
                    MIN_KEY_BYTES
                )));
            }
        }

        if self.session.max_age_seconds <= 0 {
            return Err(AppError::Config(
                "session.max_age_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_host(host: &str) -> String {
    host.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn is_local_host(host: &str) -> bool {
    let host = normalized_host(host);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

/// Accept scopes as a list or as one space-separated string
fn scope_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scopes {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Scopes::deserialize(deserializer)? {
        Scopes::List(scopes) => scopes,
        Scopes::Joined(joined) => joined.split_whitespace().map(ToString::to_string).collect(),
    })
}
