//! Anti-forgery state token
//!
//! One token is pinned for the whole process and round-tripped through the
//! provider redirect. It only proves the callback was started by a process
//! holding the same token; it is not a per-attempt CSRF token, since every
//! login shares it.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

const GENERATED_TOKEN_BYTES: usize = 32;

/// Process-wide anti-forgery token
#[derive(Clone)]
pub struct StateToken(String);

impl std::fmt::Debug for StateToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateToken(..)")
    }
}

impl StateToken {
    /// Use the configured token, or generate one from the OS random source
    pub fn from_config(configured: Option<&str>) -> Self {
        match configured {
            Some(token) => Self(token.to_string()),
            None => {
                tracing::warn!(
                    "No oauth.state_token configured; generated a process-local token. \
                     Callbacks started by another instance or before a restart will be rejected"
                );
                Self::generate()
            }
        }
    }

    pub fn generate() -> Self {
        let mut bytes = [0_u8; GENERATED_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact match against the `state` returned by the provider
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let candidate = candidate.as_bytes();
        expected.len() == candidate.len() && bool::from(expected.ct_eq(candidate))
    }
}
