//! OAuth token types
//!
//! `OAuthToken` is what the token endpoint hands back. `StoredToken` is the
//! versioned record kept in the session cookie.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Access token received from the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    /// Authorization scheme to present the token with
    ///
    /// Providers are inconsistent about casing ("bearer", "Bearer"); an
    /// empty type means bearer.
    pub fn auth_scheme(&self) -> &str {
        if self.token_type.is_empty() || self.token_type.eq_ignore_ascii_case("bearer") {
            "Bearer"
        } else {
            &self.token_type
        }
    }

    /// Value for the `Authorization` header
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.auth_scheme(), self.access_token)
    }
}

/// Token slot schema inside the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum StoredToken {
    #[serde(rename = "1")]
    V1(OAuthToken),
}

impl From<OAuthToken> for StoredToken {
    fn from(token: OAuthToken) -> Self {
        StoredToken::V1(token)
    }
}

impl StoredToken {
    pub fn into_token(self) -> OAuthToken {
        match self {
            StoredToken::V1(token) => token,
        }
    }
}

/// Token endpoint response as it appears on the wire
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawTokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl RawTokenResponse {
    /// Parse a `application/x-www-form-urlencoded` token response
    pub fn from_form(body: &str) -> Self {
        let mut raw = Self::default();
        for (key, value) in url::form_urlencoded::parse(body.as_bytes()) {
            let value = value.into_owned();
            match key.as_ref() {
                "access_token" => raw.access_token = Some(value),
                "token_type" => raw.token_type = Some(value),
                "refresh_token" => raw.refresh_token = Some(value),
                "expires_in" => raw.expires_in = value.parse().ok(),
                "error" => raw.error = Some(value),
                "error_description" => raw.error_description = Some(value),
                _ => {}
            }
        }
        raw
    }

    /// Turn the wire response into a token
    ///
    /// Returns a description of what was wrong when the provider reported an
    /// error, omitted the access token, or sent an unrepresentable expiry.
    pub fn into_token(self, now: DateTime<Utc>) -> Result<OAuthToken, String> {
        if let Some(error) = self.error {
            return Err(match self.error_description {
                Some(description) => format!("provider returned error {error}: {description}"),
                None => format!("provider returned error {error}"),
            });
        }

        let access_token = self
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| "token response is missing access_token".to_string())?;

        let expires_at = self
            .expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| {
                Duration::try_seconds(secs)
                    .and_then(|lifetime| now.checked_add_signed(lifetime))
                    .ok_or_else(|| format!("token response has out-of-range expires_in {secs}"))
            })
            .transpose()?;

        Ok(OAuthToken {
            access_token,
            token_type: self.token_type.unwrap_or_default(),
            refresh_token: self.refresh_token.filter(|token| !token.is_empty()),
            expires_at,
        })
    }
}

/// Accept `expires_in` as either a number or a numeric string
fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(i64),
        Text(String),
    }

    Ok(match Option::<Seconds>::deserialize(deserializer)? {
        Some(Seconds::Number(secs)) => Some(secs),
        Some(Seconds::Text(text)) => text.trim().parse().ok(),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(token_type: &str) -> OAuthToken {
        OAuthToken {
            access_token: "tok123".to_string(),
            token_type: token_type.to_string(),
            refresh_token: None,
            expires_at: None,
        }
    }

    #[test]
    fn auth_scheme_normalizes_bearer() {
        assert_eq!(token("bearer").auth_scheme(), "Bearer");
        assert_eq!(token("").auth_scheme(), "Bearer");
        assert_eq!(token("MAC").auth_scheme(), "MAC");
        assert_eq!(token("bearer").authorization_value(), "Bearer tok123");
    }

    #[test]
    fn stored_token_carries_version_tag() {
        let stored = StoredToken::from(token("bearer"));
        let value = serde_json::to_value(&stored).unwrap();

        assert_eq!(value["version"], "1");
        assert_eq!(value["access_token"], "tok123");
    }

    #[test]
    fn stored_token_rejects_unknown_version() {
        let value = serde_json::json!({
            "version": "7",
            "access_token": "tok123",
            "token_type": "bearer"
        });
        assert!(serde_json::from_value::<StoredToken>(value).is_err());
    }

    #[test]
    fn json_response_with_expiry() {
        let now = Utc::now();
        let raw: RawTokenResponse = serde_json::from_str(
            r#"{"access_token":"tok123","token_type":"bearer","expires_in":"3600","refresh_token":"r1"}"#,
        )
        .unwrap();

        let token = raw.into_token(now).unwrap();
        assert_eq!(token.access_token, "tok123");
        assert_eq!(token.refresh_token.as_deref(), Some("r1"));
        assert_eq!(token.expires_at, Some(now + Duration::seconds(3600)));
    }

    #[test]
    fn form_response_is_parsed() {
        let raw = RawTokenResponse::from_form("access_token=abc&scope=user&token_type=bearer");
        let token = raw.into_token(Utc::now()).unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.expires_at, None);
    }

    #[test]
    fn missing_access_token_is_error() {
        let raw: RawTokenResponse = serde_json::from_str(r#"{"token_type":"bearer"}"#).unwrap();
        let error = raw.into_token(Utc::now()).unwrap_err();
        assert!(error.contains("access_token"));
    }

    #[test]
    fn provider_error_field_is_error() {
        let raw = RawTokenResponse::from_form(
            "error=bad_verification_code&error_description=The+code+is+incorrect",
        );
        let error = raw.into_token(Utc::now()).unwrap_err();
        assert!(error.contains("bad_verification_code"));
        assert!(error.contains("The code is incorrect"));
    }

    #[test]
    fn out_of_range_expiry_is_error() {
        let raw: RawTokenResponse = serde_json::from_str(
            r#"{"access_token":"tok123","token_type":"bearer","expires_in":9223372036854775807}"#,
        )
        .unwrap();

        let error = raw.into_token(Utc::now()).unwrap_err();
        assert!(error.contains("expires_in"));
    }

    #[test]
    fn expiry_past_calendar_end_is_error() {
        // Representable as a duration, but not once added to now
        let raw = RawTokenResponse::from_form("access_token=tok123&expires_in=9000000000000");
        assert!(raw.into_token(Utc::now()).is_err());
    }
}
