//! OAuth sign-in flow
//!
//! Implements the OAuth 2.0 authorization code flow against the configured
//! provider.

use axum::{
    Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::TOKEN_SESSION_KEY;
use super::session::Session;
use super::token::StoredToken;
use crate::AppState;
use crate::error::AppError;
use crate::metrics::LOGINS_TOTAL;

/// Create authentication router
///
/// Routes:
/// - GET /auth/:provider - Redirect to the provider
/// - GET /auth/:provider/callback - OAuth callback
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/auth/:provider", get(provider_redirect))
        .route("/auth/:provider/callback", get(provider_callback))
}

/// Only the configured provider has routes
fn ensure_provider(state: &AppState, provider: &str) -> Result<(), AppError> {
    if provider == state.config.oauth.provider {
        Ok(())
    } else {
        Err(AppError::NotFound)
    }
}

// =============================================================================
// Redirect
// =============================================================================

/// GET /auth/:provider
///
/// Redirects the user to the provider's authorization page with the pinned
/// anti-forgery token as `state`. Touches no session.
async fn provider_redirect(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Result<Response, AppError> {
    ensure_provider(&state, &provider)?;

    let url = state.oauth.authorization_url(state.state_token.as_str());
    LOGINS_TOTAL.with_label_values(&["started"]).inc();

    Ok(crate::found(url.as_str()))
}

// =============================================================================
// Callback
// =============================================================================

/// Query parameters from the provider callback
#[derive(Debug, Deserialize)]
struct CallbackQuery {
    /// Authorization code
    code: Option<String>,
    /// Anti-forgery state token
    state: Option<String>,
    /// Set instead of `code` when the user declined or the provider failed
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /auth/:provider/callback
///
/// # Steps
/// 1. Bail out if the provider reported an error
/// 2. Verify `state` against the pinned token
/// 3. Exchange `code` for an access token
/// 4. Store the token in the session and set the cookie
/// 5. Redirect to /user
async fn provider_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    ensure_provider(&state, &provider)?;

    let Query(query) = query.map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "Malformed callback query");
        AppError::Validation("Malformed callback parameters".to_string())
    })?;

    // 1. Provider-side failure (e.g. access_denied)
    if let Some(error) = query.error {
        LOGINS_TOTAL.with_label_values(&["denied"]).inc();
        tracing::info!(
            %error,
            description = query.error_description.as_deref().unwrap_or_default(),
            "Provider did not grant authorization"
        );
        return Err(AppError::Validation(
            "Sign-in was not completed at the provider".to_string(),
        ));
    }

    // 2. Anti-forgery check
    let returned_state = query.state.unwrap_or_default();
    if !state.state_token.matches(&returned_state) {
        LOGINS_TOTAL.with_label_values(&["state_mismatch"]).inc();
        return Err(AppError::StateMismatch);
    }

    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| AppError::Validation("Missing authorization code".to_string()))?;

    // 3. Code exchange
    let token = state.oauth.exchange(&code).await.inspect_err(|_| {
        LOGINS_TOTAL.with_label_values(&["exchange_failed"]).inc();
    })?;

    // 4. Persist in the session; an unreadable cookie is replaced
    let name = &state.config.session.name;
    let mut session = state.sessions.get(&jar, name).unwrap_or_else(|error| {
        tracing::debug!(%error, "Replacing undecodable session cookie");
        Session::new(name)
    });
    session.insert(TOKEN_SESSION_KEY, &StoredToken::from(token))?;
    let jar = state.sessions.save(&session, jar)?;

    LOGINS_TOTAL.with_label_values(&["succeeded"]).inc();
    tracing::info!(provider = %provider, "User signed in");

    // 5. Done
    Ok((jar, crate::found("/user")))
}
