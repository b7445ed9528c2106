//! Authentication extractor
//!
//! Pulls the OAuth token out of the session cookie for handlers that need a
//! signed-in user.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
    response::Response,
};
use axum_extra::extract::CookieJar;

use super::TOKEN_SESSION_KEY;
use super::token::{OAuthToken, StoredToken};
use crate::AppState;

/// Read the stored token from the request's session cookie
///
/// Every failure mode (no cookie, tampered or expired cookie, missing or
/// malformed token slot) collapses to `None`.
fn token_from_cookies(jar: &CookieJar, state: &AppState) -> Option<OAuthToken> {
    let session = match state.sessions.get(jar, &state.config.session.name) {
        Ok(session) => session,
        Err(error) => {
            tracing::debug!(%error, "Ignoring undecodable session cookie");
            return None;
        }
    };

    match session.get::<StoredToken>(TOKEN_SESSION_KEY) {
        Ok(token) => token.map(StoredToken::into_token),
        Err(error) => {
            tracing::debug!(%error, "Ignoring malformed token in session");
            None
        }
    }
}

/// Extractor for the signed-in user's OAuth token
///
/// Rejects by redirecting to the landing page, so an anonymous visitor to a
/// protected page is sent back to sign in.
///
/// # Usage
/// ```ignore
/// async fn handler(SignedIn(token): SignedIn) -> impl IntoResponse {
///     format!("token type {}", token.auth_scheme())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SignedIn(pub OAuthToken);

#[async_trait]
impl<S> FromRequestParts<S> for SignedIn
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);
        let jar = CookieJar::from_headers(&parts.headers);

        token_from_cookies(&jar, &state)
            .map(SignedIn)
            .ok_or_else(|| crate::found("/"))
    }
}
