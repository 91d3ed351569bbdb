//! Request signing for the Dr. Green API.
//!
//! Every upstream call carries `x-auth-apikey` and `x-auth-signature`. The
//! signature is computed over the exact bytes that are sent: the JSON body
//! for body-signed calls, or the URL-encoded query string (without the
//! path) for query-signed calls.
//!
//! Schemes:
//! - `HmacSha256`: HMAC-SHA256 keyed with the secret, base64 output.
//! - `RsaSha256`: RSASSA-PKCS1-v1_5 with SHA-256 using the secret as an RSA
//!   private key (PEM, base64 PEM or base64 DER), base64 output.
//! - `Sha256Digest`: base64 SHA-256 of `payload + secret`. Only used when
//!   `legacy_digest_fallback` is enabled and the RSA key cannot be imported.

use crate::config::{BodyScheme, HmacKeyEncoding, SigningConfig};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer as _};
use sha2::{Digest, Sha256};
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "x-auth-apikey";
pub const SIGNATURE_HEADER: &str = "x-auth-signature";

pub const API_KEY_ENV: &str = "DRGREEN_API_KEY";
pub const PRIVATE_KEY_ENV: &str = "DRGREEN_PRIVATE_KEY";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigningScheme {
    HmacSha256,
    RsaSha256,
    Sha256Digest,
}

impl From<BodyScheme> for SigningScheme {
    fn from(scheme: BodyScheme) -> Self {
        match scheme {
            BodyScheme::RsaSha256 => SigningScheme::RsaSha256,
            BodyScheme::HmacSha256 => SigningScheme::HmacSha256,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SigningError {
    #[error("signing secret is empty")]
    EmptySecret,
    #[error("signing secret is not valid base64: {0}")]
    InvalidHmacKey(String),
    #[error("could not import RSA private key: {0}")]
    InvalidRsaKey(String),
    #[error("missing required secret {0}")]
    MissingSecret(&'static str),
}

/// API key and private key read from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub private_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, private_key: impl Into<String>) -> Self {
        Credentials {
            api_key: api_key.into(),
            private_key: private_key.into(),
        }
    }

    pub fn from_env() -> Result<Self, SigningError> {
        Ok(Credentials {
            api_key: required_env(API_KEY_ENV)?,
            private_key: required_env(PRIVATE_KEY_ENV)?,
        })
    }
}

fn required_env(name: &'static str) -> Result<String, SigningError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(SigningError::MissingSecret(name)),
    }
}

pub struct Signer {
    secret: String,
    hmac_key: Vec<u8>,
    rsa_key: Result<RsaPrivateKey, String>,
    body_scheme: SigningScheme,
    legacy_digest_fallback: bool,
}

impl Signer {
    pub fn new(secret: &str, config: &SigningConfig) -> Result<Self, SigningError> {
        if secret.is_empty() {
            return Err(SigningError::EmptySecret);
        }

        let hmac_key = match config.hmac_key {
            HmacKeyEncoding::Raw => secret.as_bytes().to_vec(),
            HmacKeyEncoding::Base64 => STANDARD
                .decode(secret.trim())
                .map_err(|e| SigningError::InvalidHmacKey(e.to_string()))?,
        };

        let body_scheme = SigningScheme::from(config.body_scheme);
        let rsa_key = match body_scheme {
            SigningScheme::RsaSha256 => parse_rsa_key(secret),
            _ => Err("RSA signing not configured".to_string()),
        };

        if let Err(e) = &rsa_key
            && body_scheme == SigningScheme::RsaSha256
        {
            if config.legacy_digest_fallback {
                tracing::warn!(
                    error = %e,
                    "RSA key import failed, body signatures will use the legacy SHA-256 digest"
                );
            } else {
                tracing::error!(error = %e, "RSA key import failed, body-signed calls will fail");
            }
        }

        Ok(Signer {
            secret: secret.to_string(),
            hmac_key,
            rsa_key,
            body_scheme,
            legacy_digest_fallback: config.legacy_digest_fallback,
        })
    }

    /// Scheme applied to JSON bodies.
    pub fn body_scheme(&self) -> SigningScheme {
        self.body_scheme
    }

    /// Signs a URL-encoded query string (empty for calls without one).
    pub fn sign_query(&self, query: &str) -> String {
        hmac_sha256_base64(&self.hmac_key, query.as_bytes())
    }

    /// Signs a serialized JSON body with the configured body scheme.
    pub fn sign_body(&self, body: &str) -> Result<String, SigningError> {
        self.sign(self.body_scheme, body.as_bytes())
    }

    pub fn sign(&self, scheme: SigningScheme, payload: &[u8]) -> Result<String, SigningError> {
        match scheme {
            SigningScheme::HmacSha256 => Ok(hmac_sha256_base64(&self.hmac_key, payload)),
            SigningScheme::Sha256Digest => Ok(sha256_digest_base64(payload, &self.secret)),
            SigningScheme::RsaSha256 => match &self.rsa_key {
                Ok(key) => Ok(rsa_sha256_base64(key, payload)),
                Err(_) if self.legacy_digest_fallback => {
                    Ok(sha256_digest_base64(payload, &self.secret))
                }
                Err(e) => Err(SigningError::InvalidRsaKey(e.clone())),
            },
        }
    }
}

pub fn hmac_sha256_base64(key: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(payload);
    STANDARD.encode(mac.finalize().into_bytes())
}

fn sha256_digest_base64(payload: &[u8], secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hasher.update(secret.as_bytes());
    STANDARD.encode(hasher.finalize())
}

fn rsa_sha256_base64(key: &RsaPrivateKey, payload: &[u8]) -> String {
    let signing_key = SigningKey::<Sha256>::new(key.clone());
    STANDARD.encode(signing_key.sign(payload).to_bytes())
}

fn parse_rsa_key(secret: &str) -> Result<RsaPrivateKey, String> {
    // Secrets pasted into environment files often carry escaped newlines.
    let secret = secret.trim().replace("\\n", "\n");

    if secret.contains("-----BEGIN") {
        return parse_rsa_pem(&secret);
    }

    let decoded = STANDARD
        .decode(secret.split_whitespace().collect::<String>())
        .map_err(|e| format!("not PEM and not base64: {e}"))?;

    match std::str::from_utf8(&decoded) {
        Ok(text) if text.contains("-----BEGIN") => parse_rsa_pem(text),
        _ => RsaPrivateKey::from_pkcs8_der(&decoded)
            .or_else(|_| RsaPrivateKey::from_pkcs1_der(&decoded))
            .map_err(|e| e.to_string()),
    }
}

fn parse_rsa_pem(pem: &str) -> Result<RsaPrivateKey, String> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| e.to_string())
}
