//! HTML pages
//!
//! The landing page and the signed-in account page.

use axum::{
    Router,
    extract::State,
    response::{Html, IntoResponse},
    routing::get,
};
use reqwest::header::ACCEPT;
use serde::Deserialize;

use crate::AppState;
use crate::auth::{AuthenticatedClient, SignedIn};
use crate::error::AppError;
use crate::metrics::{UPSTREAM_REQUESTS_TOTAL, UPSTREAM_REQUEST_DURATION_SECONDS};

/// Create pages router
///
/// Routes:
/// - GET / - Landing page with the sign-in link
/// - GET /user - Greets the signed-in user by email
pub fn pages_router() -> Router<AppState> {
    Router::new()
        .route("/", get(home))
        .route("/user", get(user))
}

/// GET /
///
/// Static apart from the configured provider name, so repeated calls return
/// identical bodies.
async fn home(State(state): State<AppState>) -> impl IntoResponse {
    let provider = html_escape::encode_double_quoted_attribute(&state.config.oauth.provider);
    Html(format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Sign in</title></head>
<body>
    <a href="/auth/{provider}">Sign in with {provider}</a>
</body>
</html>
"#
    ))
}

/// Fields we read from the provider's account resource
#[derive(Debug, Deserialize)]
struct Account {
    email: String,
}

/// GET /user
///
/// Anonymous visitors are redirected to `/` by the `SignedIn` extractor.
async fn user(
    State(state): State<AppState>,
    SignedIn(token): SignedIn,
) -> Result<impl IntoResponse, AppError> {
    let client = state.oauth.authenticated_client(&token);
    let account = fetch_account(
        &client,
        &state.config.oauth.account_url,
        &state.config.oauth.account_accept,
    )
    .await?;

    Ok(Html(format!(
        "<html><body><h1>Hello {}</h1></body></html>",
        html_escape::encode_text(&account.email)
    )))
}

/// Fetch the account resource with the user's bearer token
///
/// # Errors
/// `AppError::Upstream` on network failure, a non-2xx status, or a body
/// without a string `email` field
async fn fetch_account(
    client: &AuthenticatedClient,
    url: &str,
    accept: &str,
) -> Result<Account, AppError> {
    let timer = UPSTREAM_REQUEST_DURATION_SECONDS
        .with_label_values(&["account"])
        .start_timer();
    let result = client.get(url).header(ACCEPT, accept).send().await;
    timer.observe_duration();

    let response = result.map_err(|e| {
        UPSTREAM_REQUESTS_TOTAL
            .with_label_values(&["account", "error"])
            .inc();
        AppError::Upstream(format!("account request failed: {e}"))
    })?;

    let status = response.status();
    UPSTREAM_REQUESTS_TOTAL
        .with_label_values(&["account", status.as_str()])
        .inc();

    if !status.is_success() {
        return Err(AppError::Upstream(format!(
            "account endpoint returned {status}"
        )));
    }

    response
        .json::<Account>()
        .await
        .map_err(|e| AppError::Upstream(format!("malformed account response: {e}")))
}
