use serde::Deserialize;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.drgreennft.com/api/v1";

/// Which scheme signs JSON request bodies.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BodyScheme {
    #[default]
    RsaSha256,
    HmacSha256,
}

/// How the stored private key is turned into HMAC key bytes.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HmacKeyEncoding {
    /// The secret string's bytes are the key.
    #[default]
    Raw,
    /// The secret is base64 and its decoded bytes are the key.
    Base64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
pub struct SigningConfig {
    #[serde(default)]
    pub body_scheme: BodyScheme,
    #[serde(default)]
    pub hmac_key: HmacKeyEncoding,
    /// Sign bodies with SHA-256(payload + secret) when the RSA key cannot be
    /// imported. Off unless explicitly enabled.
    #[serde(default)]
    pub legacy_digest_fallback: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: Url,
    /// Upper bound on a single upstream call, including reading the body.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub signing: SigningConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            signing: SigningConfig::default(),
        }
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_BASE_URL).expect("default base url is valid")
}

fn default_timeout_ms() -> u64 {
    20_000
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_capacity() -> u64 {
    500
}

fn default_cache_ttl() -> u64 {
    300
}
