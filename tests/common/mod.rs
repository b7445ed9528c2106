//! Common test utilities for E2E tests

use std::collections::HashMap;

use axum::{
    Form, Json, Router,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use keyhole::{AppState, config};
use reqwest::header::SET_COOKIE;
use serde_json::json;
use tokio::net::TcpListener;

pub const CLIENT_ID: &str = "abc";
pub const CLIENT_SECRET: &str = "xyz";
pub const STATE_TOKEN: &str = "fixedtok";
pub const PROVIDER: &str = "demo";
pub const SESSION_NAME: &str = "keyhole-session";

/// Authorization codes the stub provider understands
pub const VALID_CODE: &str = "validcode";
pub const NO_EMAIL_CODE: &str = "noemailcode";
pub const SERVER_ERROR_CODE: &str = "servererror";
pub const GARBAGE_CODE: &str = "garbage";
pub const HUGE_EXPIRY_CODE: &str = "hugeexpiry";

/// Secret for the Basic-auth token endpoint; needs form encoding
pub const BASIC_CLIENT_SECRET: &str = "a b:c";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub provider_addr: String,
    pub state: AppState,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance backed by a stub provider
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Like `new`, with a hook to adjust configuration before startup
    pub async fn with_config(customize: impl FnOnce(&mut config::AppConfig)) -> Self {
        let provider_addr = spawn(stub_provider()).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let mut config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                public_url: addr.replace("127.0.0.1", "localhost"),
            },
            oauth: config::OAuthConfig {
                provider: PROVIDER.to_string(),
                client_id: CLIENT_ID.to_string(),
                client_secret: CLIENT_SECRET.to_string(),
                authorize_url: format!("{provider_addr}/oauth/authorize"),
                token_url: format!("{provider_addr}/oauth/token"),
                account_url: format!("{provider_addr}/account"),
                account_accept: "application/json".to_string(),
                scopes: vec!["identity".to_string()],
                token_auth_style: config::TokenAuthStyle::Body,
                request_timeout_seconds: 10,
                state_token: Some(STATE_TOKEN.to_string()),
            },
            session: config::SessionConfig {
                name: SESSION_NAME.to_string(),
                signing_key: "test-signing-key-that-is-32-bytes!".to_string(),
                encryption_key: Some("test-encryption-key-that-is-32-bytes".to_string()),
                max_age_seconds: 28_800,
                secure: true,
            },
        };
        customize(&mut config);

        let state = AppState::new(config).unwrap();
        let app = keyhole::build_router(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Never follow redirects; the tests assert on them
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        Self {
            addr,
            provider_addr,
            state,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Run the callback with `code` and the pinned state
    pub async fn callback(&self, code: &str) -> reqwest::Response {
        self.client
            .get(self.url(&format!("/auth/{PROVIDER}/callback")))
            .query(&[("code", code), ("state", STATE_TOKEN)])
            .send()
            .await
            .unwrap()
    }

    /// Complete the sign-in flow and return the `name=value` session cookie
    pub async fn sign_in(&self) -> String {
        let response = self.callback(VALID_CODE).await;
        assert_eq!(response.status(), StatusCode::FOUND);
        session_cookie(&response).expect("callback sets the session cookie")
    }

    pub async fn get_with_cookie(&self, path: &str, cookie: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .header("Cookie", cookie)
            .send()
            .await
            .unwrap()
    }
}

/// `name=value` of the session cookie set on `response`, if any
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|raw| raw.starts_with(&format!("{SESSION_NAME}=")))
        .and_then(|raw| raw.split(';').next())
        .map(ToString::to_string)
}

pub fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}

async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

// =============================================================================
// Stub provider
// =============================================================================

fn stub_provider() -> Router {
    Router::new()
        .route("/oauth/token", post(stub_token))
        .route("/oauth/token-basic", post(stub_token_basic))
        .route("/account", get(stub_account))
}

async fn stub_token(Form(form): Form<HashMap<String, String>>) -> Response {
    let field = |key: &str| form.get(key).map(String::as_str);

    if field("grant_type") != Some("authorization_code")
        || field("client_id") != Some(CLIENT_ID)
        || field("client_secret") != Some(CLIENT_SECRET)
    {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid_client" })),
        )
            .into_response();
    }

    match field("code") {
        Some(VALID_CODE) => {
            Json(json!({ "access_token": "tok123", "token_type": "bearer" })).into_response()
        }
        Some(NO_EMAIL_CODE) => {
            Json(json!({ "access_token": "tok-no-email", "token_type": "bearer" }))
                .into_response()
        }
        Some(HUGE_EXPIRY_CODE) => Json(json!({
            "access_token": "tok123",
            "token_type": "bearer",
            "expires_in": i64::MAX,
        }))
        .into_response(),
        Some(SERVER_ERROR_CODE) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        Some(GARBAGE_CODE) => (
            [("content-type", "application/json")],
            "this is not json",
        )
            .into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant" })),
        )
            .into_response(),
    }
}

/// Token endpoint that only accepts HTTP Basic client credentials
///
/// Each half of the credential pair is form-encoded before base64, so the
/// secret may itself contain `:`.
async fn stub_token_basic(headers: HeaderMap, Form(form): Form<HashMap<String, String>>) -> Response {
    let credentials = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|encoded| STANDARD.decode(encoded).ok())
        .and_then(|decoded| String::from_utf8(decoded).ok())
        .and_then(|pair| {
            let (id, secret) = pair.split_once(':')?;
            Some((form_decode(id), form_decode(secret)))
        });

    let body_has_credentials = form.contains_key("client_id") || form.contains_key("client_secret");
    let expected = Some((CLIENT_ID.to_string(), BASIC_CLIENT_SECRET.to_string()));

    if credentials != expected || body_has_credentials {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid_client" })),
        )
            .into_response();
    }

    match form.get("code").map(String::as_str) {
        Some(VALID_CODE) => {
            Json(json!({ "access_token": "tok123", "token_type": "bearer" })).into_response()
        }
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant" })),
        )
            .into_response(),
    }
}

fn form_decode(value: &str) -> String {
    url::form_urlencoded::parse(value.as_bytes())
        .next()
        .map(|(decoded, _)| decoded.into_owned())
        .unwrap_or_default()
}

async fn stub_account(headers: HeaderMap) -> Response {
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match authorization {
        "Bearer tok123" => Json(json!({ "email": "a@b.com", "id": "01234" })).into_response(),
        "Bearer tok-no-email" => Json(json!({ "id": "01234" })).into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}
