//! Session management
//!
//! Sessions live entirely in a cookie. The value is a JSON envelope,
//! encrypted with AES-256-GCM when an encryption key is configured and
//! always signed with HMAC-SHA256. No server-side session storage.
//!
//! Cookie value format: `base64(body).base64(hmac_sha256(name "|" base64(body)))`

use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::SessionConfig;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const ENVELOPE_VERSION: u8 = 1;
const AES_GCM_NONCE_BYTES: usize = 12;

/// Session data
///
/// A named map of JSON values. Values are typed on the way in and parsed on
/// the way out, so a wrong shape surfaces as `AppError::SessionDecode`.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    name: String,
    values: BTreeMap<String, Value>,
    is_new: bool,
}

impl Session {
    /// Empty session that has not been saved yet
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: BTreeMap::new(),
            is_new: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when no valid cookie backed this session
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Store a value under `key`
    ///
    /// # Errors
    /// `AppError::SessionEncode` if the value cannot be serialized
    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), AppError> {
        let value = serde_json::to_value(value)
            .map_err(|e| AppError::SessionEncode(format!("value for {key:?}: {e}")))?;
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Read the value stored under `key`
    ///
    /// # Errors
    /// `AppError::SessionDecode` if a value exists but has the wrong shape
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        self.values
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone())
                    .map_err(|e| AppError::SessionDecode(format!("value for {key:?}: {e}")))
            })
            .transpose()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }
}

/// What actually gets sealed into the cookie
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u8,
    issued_at: i64,
    values: BTreeMap<String, Value>,
}

/// Cookie-backed session store
///
/// Holds only the immutable keys and cookie settings, so one instance is
/// shared by every request.
#[derive(Clone)]
pub struct SessionStore {
    signing_key: Vec<u8>,
    encryption_key: Option<[u8; 32]>,
    max_age_seconds: i64,
    secure: bool,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("encrypted", &self.encryption_key.is_some())
            .field("max_age_seconds", &self.max_age_seconds)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Build a store from the session configuration
    ///
    /// The AES-256 key is the SHA-256 digest of the configured encryption
    /// key, so any sufficiently long secret string can be used.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            signing_key: config.signing_key.as_bytes().to_vec(),
            encryption_key: config
                .encryption_key
                .as_ref()
                .map(|key| Sha256::digest(key.as_bytes()).into()),
            max_age_seconds: config.max_age_seconds,
            secure: config.secure,
        }
    }

    /// Retrieve the session named `name`, or a fresh one if there is none
    ///
    /// A cookie older than the max age counts as no cookie.
    ///
    /// # Errors
    /// `AppError::SessionDecode` if a cookie is present but fails
    /// verification, decryption or parsing. Callers treat that as
    /// "no session".
    pub fn get(&self, jar: &CookieJar, name: &str) -> Result<Session, AppError> {
        self.get_at(jar, name, Utc::now())
    }

    pub(crate) fn get_at(
        &self,
        jar: &CookieJar,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, AppError> {
        let Some(cookie) = jar.get(name) else {
            return Ok(Session::new(name));
        };

        let envelope = self.open(name, cookie.value())?;

        if now.timestamp() - envelope.issued_at > self.max_age_seconds {
            tracing::debug!(session = %name, "Session cookie expired");
            return Ok(Session::new(name));
        }

        Ok(Session {
            name: name.to_string(),
            values: envelope.values,
            is_new: false,
        })
    }

    /// Seal the session and set it as a cookie on the outgoing jar
    ///
    /// # Errors
    /// `AppError::SessionEncode` if the session cannot be serialized or
    /// encrypted
    pub fn save(&self, session: &Session, jar: CookieJar) -> Result<CookieJar, AppError> {
        self.save_at(session, jar, Utc::now())
    }

    pub(crate) fn save_at(
        &self,
        session: &Session,
        jar: CookieJar,
        now: DateTime<Utc>,
    ) -> Result<CookieJar, AppError> {
        let value = self.seal(session, now)?;

        let cookie = Cookie::build((session.name.clone(), value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::seconds(self.max_age_seconds))
            .build();

        Ok(jar.add(cookie))
    }

    fn seal(&self, session: &Session, now: DateTime<Utc>) -> Result<String, AppError> {
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            issued_at: now.timestamp(),
            values: session.values.clone(),
        };
        let payload =
            serde_json::to_vec(&envelope).map_err(|e| AppError::SessionEncode(e.to_string()))?;

        let body = match &self.encryption_key {
            Some(key) => encrypt(key, &payload)?,
            None => payload,
        };

        let body_b64 = URL_SAFE_NO_PAD.encode(body);
        let signature = self
            .mac(&session.name, &body_b64)
            .map_err(AppError::SessionEncode)?
            .finalize()
            .into_bytes();

        Ok(format!("{}.{}", body_b64, URL_SAFE_NO_PAD.encode(signature)))
    }

    fn open(&self, name: &str, value: &str) -> Result<Envelope, AppError> {
        // 1. Split into body and signature
        let (body_b64, signature_b64) = value
            .split_once('.')
            .ok_or_else(|| AppError::SessionDecode("malformed session cookie".to_string()))?;

        // 2. Verify the signature before touching the body
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AppError::SessionDecode("malformed session signature".to_string()))?;
        self.mac(name, body_b64)
            .map_err(AppError::SessionDecode)?
            .verify_slice(&signature)
            .map_err(|_| AppError::SessionDecode("session signature mismatch".to_string()))?;

        // 3. Decode and decrypt
        let body = URL_SAFE_NO_PAD
            .decode(body_b64)
            .map_err(|_| AppError::SessionDecode("malformed session body".to_string()))?;
        let payload = match &self.encryption_key {
            Some(key) => decrypt(key, &body)?,
            None => body,
        };

        // 4. Parse the envelope
        let envelope: Envelope = serde_json::from_slice(&payload)
            .map_err(|e| AppError::SessionDecode(format!("session payload: {e}")))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(AppError::SessionDecode(format!(
                "unsupported session version {}",
                envelope.version
            )));
        }

        Ok(envelope)
    }

    /// MAC over the cookie name and encoded body
    fn mac(&self, name: &str, body_b64: &str) -> Result<HmacSha256, String> {
        let mut mac =
            <HmacSha256 as Mac>::new_from_slice(&self.signing_key).map_err(|e| e.to_string())?;
        mac.update(name.as_bytes());
        mac.update(b"|");
        mac.update(body_b64.as_bytes());
        Ok(mac)
    }
}

fn encrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, AppError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| AppError::SessionEncode("invalid session encryption key".to_string()))?;

    let mut nonce = [0_u8; AES_GCM_NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), data)
        .map_err(|_| AppError::SessionEncode("session encryption failed".to_string()))?;

    let mut out = Vec::with_capacity(AES_GCM_NONCE_BYTES + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, AppError> {
    if data.len() <= AES_GCM_NONCE_BYTES {
        return Err(AppError::SessionDecode(
            "encrypted session is too short".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| AppError::SessionDecode("invalid session encryption key".to_string()))?;

    let (nonce, ciphertext) = data.split_at(AES_GCM_NONCE_BYTES);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| AppError::SessionDecode("session decryption failed".to_string()))
}
