//! OAuth 2.0 client
//!
//! Authorization-code grant against a single provider:
//! building the authorization URL, exchanging the code for a token, and
//! handing out an HTTP client that presents the token as a bearer credential.

use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{IntoUrl, Method, RequestBuilder};
use url::Url;

use super::token::{OAuthToken, RawTokenResponse};
use crate::config::{AppConfig, TokenAuthStyle};
use crate::error::AppError;
use crate::metrics::{UPSTREAM_REQUESTS_TOTAL, UPSTREAM_REQUEST_DURATION_SECONDS};

/// OAuth client for the configured provider
///
/// Immutable after construction and shared by all requests.
#[derive(Clone)]
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    authorize_url: Url,
    token_url: Url,
    redirect_url: Url,
    scopes: Vec<String>,
    auth_style: TokenAuthStyle,
    http: reqwest::Client,
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("authorize_url", &self.authorize_url.as_str())
            .field("token_url", &self.token_url.as_str())
            .field("redirect_url", &self.redirect_url.as_str())
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl OAuthClient {
    /// Build the client from configuration
    ///
    /// `http` is the shared outbound client; its timeout bounds every call
    /// made here.
    ///
    /// # Errors
    /// `AppError::Config` if an endpoint URL does not parse
    pub fn new(config: &AppConfig, http: reqwest::Client) -> Result<Self, AppError> {
        let parse = |key: &str, value: &str| {
            Url::parse(value).map_err(|e| AppError::Config(format!("{key} is not a valid URL: {e}")))
        };

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            client_secret: config.oauth.client_secret.clone(),
            authorize_url: parse("oauth.authorize_url", &config.oauth.authorize_url)?,
            token_url: parse("oauth.token_url", &config.oauth.token_url)?,
            redirect_url: config.redirect_url()?,
            scopes: config.oauth.scopes.clone(),
            auth_style: config.oauth.token_auth_style,
            http,
        })
    }

    pub fn redirect_url(&self) -> &Url {
        &self.redirect_url
    }

    /// URL to send the browser to for consent
    ///
    /// Deterministic for a given `state`; performs no I/O.
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", self.redirect_url.as_str());
            if !self.scopes.is_empty() {
                query.append_pair("scope", &self.scopes.join(" "));
            }
            query.append_pair("state", state);
        }
        url
    }

    /// Exchange an authorization code for a token
    ///
    /// # Errors
    /// `AppError::OAuthExchange` on network failure or timeout, a non-2xx
    /// status, a provider-reported error, or an unusable response body
    pub async fn exchange(&self, code: &str) -> Result<OAuthToken, AppError> {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
        ];

        let mut request = self
            .http
            .post(self.token_url.clone())
            .header(ACCEPT, "application/json");

        match self.auth_style {
            TokenAuthStyle::Body => {
                form.push(("client_id", self.client_id.as_str()));
                form.push(("client_secret", self.client_secret.as_str()));
            }
            TokenAuthStyle::Basic => {
                // RFC 6749 2.3.1: credentials are form-encoded before Basic encoding
                request = request.basic_auth(
                    form_encode(&self.client_id),
                    Some(form_encode(&self.client_secret)),
                );
            }
        }

        let timer = UPSTREAM_REQUEST_DURATION_SECONDS
            .with_label_values(&["token"])
            .start_timer();
        let result = request.form(&form).send().await;
        timer.observe_duration();

        let response = result.map_err(|e| {
            UPSTREAM_REQUESTS_TOTAL
                .with_label_values(&["token", "error"])
                .inc();
            AppError::OAuthExchange(format!("token endpoint request failed: {e}"))
        })?;

        let status = response.status();
        UPSTREAM_REQUESTS_TOTAL
            .with_label_values(&["token", status.as_str()])
            .inc();

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let body = response
            .text()
            .await
            .map_err(|e| AppError::OAuthExchange(format!("token response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(AppError::OAuthExchange(format!(
                "token endpoint returned {status}"
            )));
        }

        let raw = if content_type.starts_with("application/x-www-form-urlencoded")
            || content_type.starts_with("text/plain")
        {
            RawTokenResponse::from_form(&body)
        } else {
            serde_json::from_str(&body)
                .map_err(|e| AppError::OAuthExchange(format!("malformed token response: {e}")))?
        };

        let token = raw.into_token(Utc::now()).map_err(AppError::OAuthExchange)?;
        tracing::debug!(
            token_type = %token.auth_scheme(),
            expires_at = ?token.expires_at,
            "Authorization code exchanged"
        );
        Ok(token)
    }

    /// HTTP client that authenticates every request with `token`
    ///
    /// Construction cannot fail; a token that is not a valid header value
    /// surfaces as an error on the first request.
    pub fn authenticated_client(&self, token: &OAuthToken) -> AuthenticatedClient {
        AuthenticatedClient {
            http: self.http.clone(),
            authorization: token.authorization_value(),
        }
    }
}

fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Outbound HTTP client carrying a bearer credential
///
/// Shares the connection pool and timeout of the client it came from.
#[derive(Clone)]
pub struct AuthenticatedClient {
    http: reqwest::Client,
    authorization: String,
}

impl std::fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClient").finish_non_exhaustive()
    }
}

impl AuthenticatedClient {
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(AUTHORIZATION, &self.authorization)
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.request(Method::GET, url)
    }
}
