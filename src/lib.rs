//! Keyhole - "Sign in with provider" over OAuth 2.0
//!
//! # Flow
//!
//! ```text
//!  GET /                      landing page, link to /auth/<provider>
//!   │
//!  GET /auth/<provider>       302 → provider authorize URL (pinned state)
//!   │
//!  GET /auth/<provider>/callback?code&state
//!   │                         check state, exchange code, seal token in cookie
//!   │                         302 → /user
//!  GET /user                  bearer call to provider account API
//!                             "Hello <email>"
//! ```
//!
//! # Modules
//!
//! - `api`: HTML pages and ops endpoints
//! - `auth`: OAuth client, session cookies, sign-in flow
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

use std::sync::Arc;

use axum::http::{StatusCode, header::LOCATION};
use axum::response::{IntoResponse, Response};

/// Application state shared across all handlers
///
/// Built once at startup and never mutated; cloning only bumps the `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// OAuth client for the configured provider
    pub oauth: Arc<auth::OAuthClient>,

    /// Cookie session store
    pub sessions: Arc<auth::SessionStore>,

    /// Pinned anti-forgery token
    pub state_token: Arc<auth::StateToken>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Build the outbound HTTP client
    /// 2. Build the OAuth client
    /// 3. Build the session store
    /// 4. Pin the anti-forgery token
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // 1. Outbound HTTP client; the timeout bounds both provider calls
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("Keyhole/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(
                config.oauth.request_timeout_seconds,
            ))
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;

        // 2. OAuth client
        let oauth = auth::OAuthClient::new(&config, http_client)?;
        tracing::info!(
            provider = %config.oauth.provider,
            redirect_url = %oauth.redirect_url(),
            "OAuth client initialized"
        );

        // 3. Session store
        let sessions = auth::SessionStore::new(&config.session);
        if config.session.encryption_key.is_none() {
            tracing::warn!("session.encryption_key not set; session cookies are signed but not encrypted");
        }

        // 4. Anti-forgery token
        let state_token = auth::StateToken::from_config(config.oauth.state_token.as_deref());

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            oauth: Arc::new(oauth),
            sessions: Arc::new(sessions),
            state_token: Arc::new(state_token),
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::trace::TraceLayer;

    Router::new()
        .merge(api::pages_router())
        .merge(auth::auth_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(api::ops_router())
}

/// `302 Found` to `location`
///
/// Axum's `Redirect` helpers only produce 303/307/308.
pub(crate) fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location)]).into_response()
}
