use crate::config::UpstreamConfig;
use crate::metrics_defs::{UPSTREAM_REQUEST_DURATION, UPSTREAM_REQUESTS};
use crate::signer::{API_KEY_HEADER, Credentials, SIGNATURE_HEADER, Signer, SigningError};
use http::{Method, StatusCode};
use hyper::body::Bytes;
use serde_json::Value;
use shared::{counter, histogram};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use url::Url;
use url::form_urlencoded;

#[derive(thiserror::Error, Debug)]
pub enum DrGreenError {
    #[error("missing Dr. Green credentials: {0}")]
    MissingCredentials(String),
    #[error("signing failed: {0}")]
    Signing(#[from] SigningError),
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
    #[error("upstream request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid upstream URL: {0}")]
    InvalidUrl(String),
    #[error("could not encode request body: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("upstream returned {status}: {message}")]
    Status { status: StatusCode, message: String },
}

impl DrGreenError {
    /// Transport failures may succeed on retry, configuration errors never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            DrGreenError::Timeout(_) | DrGreenError::Network(_) => true,
            DrGreenError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Which bytes of the request the signature covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignedPart {
    Query,
    Body,
}

/// A fully described upstream call. The query pairs are encoded in the
/// order given, and that exact string is both signed and sent.
#[derive(Clone, Debug, PartialEq)]
pub struct UpstreamRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub signed: SignedPart,
}

impl UpstreamRequest {
    pub fn get(path: impl Into<String>) -> Self {
        UpstreamRequest {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
            signed: SignedPart::Query,
        }
    }

    pub fn with_body(method: Method, path: impl Into<String>, body: Value) -> Self {
        UpstreamRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
            signed: SignedPart::Body,
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    /// The canonical, URL-encoded query string.
    pub fn query_string(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.query {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

#[derive(Clone, Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body)
    }

    /// Converts a non-success status into an error carrying the upstream message.
    pub fn error_for_status(self) -> Result<Self, DrGreenError> {
        if self.status.is_success() {
            return Ok(self);
        }
        Err(DrGreenError::Status {
            status: self.status,
            message: upstream_message(&self.json().unwrap_or(Value::Null))
                .unwrap_or_else(|| String::from_utf8_lossy(&self.body).into_owned()),
        })
    }
}

/// Best-effort human readable message from an upstream error body.
pub fn upstream_message(body: &Value) -> Option<String> {
    ["message", "error", "errorMessage"]
        .iter()
        .find_map(|key| match body.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .map(|item| item.as_str().map(String::from).unwrap_or(item.to_string()))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            _ => None,
        })
}

/// Id of a client returned by `POST /dapp/clients`.
pub fn created_client_id(body: &Value) -> Option<String> {
    ["/data/id", "/data/clientId", "/id", "/clientId"]
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
        .map(str::to_string)
}

/// Client that owns an order or cart record.
pub fn owner_client_id(body: &Value) -> Option<String> {
    ["/data/clientId", "/data/client/id", "/clientId", "/client/id"]
        .iter()
        .find_map(|pointer| body.pointer(pointer).and_then(Value::as_str))
        .map(str::to_string)
}

struct Signing {
    api_key: String,
    signer: Signer,
}

/// Signed HTTP client for the Dr. Green API.
pub struct DrGreenClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    signing: Result<Signing, String>,
}

impl DrGreenClient {
    /// Missing or unusable credentials do not prevent construction; every
    /// call then fails with `MissingCredentials` so callers can answer with a
    /// configuration error instead of silently doing nothing.
    pub fn new(config: &UpstreamConfig, credentials: Result<Credentials, SigningError>) -> Self {
        let signing = credentials
            .and_then(|credentials| {
                let signer = Signer::new(&credentials.private_key, &config.signing)?;
                tracing::info!(body_scheme = ?signer.body_scheme(), "Dr. Green signing ready");
                Ok(Signing {
                    api_key: credentials.api_key,
                    signer,
                })
            })
            .map_err(|e| {
                tracing::error!(error = %e, "Dr. Green credentials unavailable");
                e.to_string()
            });

        DrGreenClient {
            client: reqwest::Client::new(),
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.timeout_ms),
            signing,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.signing.is_ok()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Signs and sends the request. Any status code is returned as a response;
    /// only transport, timeout and configuration problems are errors.
    pub async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, DrGreenError> {
        let signing = self
            .signing
            .as_ref()
            .map_err(|e| DrGreenError::MissingCredentials(e.clone()))?;

        let query = request.query_string();
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| DrGreenError::InvalidUrl(e.to_string()))?;
        if !query.is_empty() {
            url.set_query(Some(&query));
        }

        let body = request.body.as_ref().map(serde_json::to_string).transpose()?;
        let signature = match (request.signed, &body) {
            (SignedPart::Body, Some(body)) => signing.signer.sign_body(body)?,
            (SignedPart::Body, None) => signing.signer.sign_body("")?,
            (SignedPart::Query, _) => signing.signer.sign_query(&query),
        };

        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .header(API_KEY_HEADER, &signing.api_key)
            .header(SIGNATURE_HEADER, signature)
            .header(http::header::ACCEPT, "application/json");
        if let Some(body) = body {
            builder = builder
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let started = Instant::now();
        let result = timeout(self.timeout, async {
            let response = builder.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(UpstreamResponse { status, body })
        })
        .await;
        histogram!(UPSTREAM_REQUEST_DURATION).record(started.elapsed().as_secs_f64());

        let outcome = match &result {
            Err(_) => "timeout",
            Ok(Err(_)) => "network_error",
            Ok(Ok(response)) if response.status.is_success() => "success",
            Ok(Ok(_)) => "error_status",
        };
        counter!(UPSTREAM_REQUESTS, "outcome" => outcome).increment(1);

        match result {
            Err(_) => {
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    timeout = ?self.timeout,
                    "Upstream request timed out"
                );
                Err(DrGreenError::Timeout(self.timeout))
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    error = %e,
                    "Upstream request failed"
                );
                Err(DrGreenError::Network(e))
            }
            Ok(Ok(response)) => {
                tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    status = %response.status,
                    "Upstream responded"
                );
                Ok(response)
            }
        }
    }

    /// Like `send` but treats non-success statuses as errors and decodes JSON.
    pub async fn send_json(&self, request: &UpstreamRequest) -> Result<Value, DrGreenError> {
        let response = self.send(request).await?.error_for_status()?;
        Ok(response.json()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BodyScheme, SigningConfig};
    use crate::signer::hmac_sha256_base64;
    use serde_json::json;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer, timeout_ms: u64) -> UpstreamConfig {
        UpstreamConfig {
            base_url: Url::parse(&format!("{}/api/v1", server.uri())).unwrap(),
            timeout_ms,
            signing: SigningConfig {
                body_scheme: BodyScheme::HmacSha256,
                ..SigningConfig::default()
            },
        }
    }

    fn credentials() -> Result<Credentials, SigningError> {
        Ok(Credentials::new("test-api-key", "12345"))
    }

    #[tokio::test]
    async fn test_query_signed_request() {
        let server = MockServer::start().await;
        let expected_signature = hmac_sha256_base64(b"12345", b"countryCode=PRT&take=2&page=1");

        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .and(query_param("countryCode", "PRT"))
            .and(query_param("take", "2"))
            .and(header("x-auth-apikey", "test-api-key"))
            .and(header("x-auth-signature", expected_signature.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"success":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let client = DrGreenClient::new(&test_config(&server, 1_000), credentials());
        let request = UpstreamRequest::get("/strains")
            .query("countryCode", "PRT")
            .query("take", 2)
            .query("page", 1);
        let response = client.send(&request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.json().unwrap(), json!({"success": true}));
    }

    #[tokio::test]
    async fn test_body_signed_request() {
        let server = MockServer::start().await;
        let body = r#"{"test":"data"}"#;

        Mock::given(method("POST"))
            .and(path("/api/v1/dapp/clients"))
            .and(body_string(body))
            .and(header(
                "x-auth-signature",
                "08CKWklvW4j/2hc7qXQ0lgsB8+3k94YXif2dIUsk4Og=",
            ))
            .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"data":{"id":"c1"}}"#))
            .mount(&server)
            .await;

        let client = DrGreenClient::new(&test_config(&server, 1_000), credentials());
        let request =
            UpstreamRequest::with_body(Method::POST, "/dapp/clients", json!({"test": "data"}));
        let value = client.send_json(&request).await.unwrap();
        assert_eq!(value["data"]["id"], "c1");
    }

    #[tokio::test]
    async fn test_error_status_is_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/dapp/clients/missing"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string(r#"{"message":"Client not found"}"#),
            )
            .mount(&server)
            .await;

        let client = DrGreenClient::new(&test_config(&server, 1_000), credentials());
        let request = UpstreamRequest::get("/dapp/clients/missing");

        let response = client.send(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);

        let err = client.send_json(&request).await.unwrap_err();
        match err {
            DrGreenError::Status { status, message } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(message, "Client not found");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/strains"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let client = DrGreenClient::new(&test_config(&server, 200), credentials());
        let started = Instant::now();
        let err = client
            .send(&UpstreamRequest::get("/strains"))
            .await
            .unwrap_err();

        assert!(matches!(err, DrGreenError::Timeout(_)));
        assert!(err.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let server = MockServer::start().await;
        let client = DrGreenClient::new(
            &test_config(&server, 1_000),
            Err(SigningError::MissingSecret("DRGREEN_API_KEY")),
        );
        assert!(!client.is_configured());

        let err = client
            .send(&UpstreamRequest::get("/strains"))
            .await
            .unwrap_err();
        assert!(matches!(err, DrGreenError::MissingCredentials(_)));
        assert!(!err.is_retryable());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[test]
    fn test_query_string_encoding() {
        let request = UpstreamRequest::get("/dapp/clients")
            .query("search", "jane doe")
            .query_opt("status", None::<String>)
            .query("email", "a+b@example.com");
        assert_eq!(
            request.query_string(),
            "search=jane+doe&email=a%2Bb%40example.com"
        );
    }

    #[test]
    fn test_upstream_message() {
        assert_eq!(
            upstream_message(&json!({"message": ["bad image", "too dark"]})),
            Some("bad image; too dark".to_string())
        );
        assert_eq!(upstream_message(&json!({"other": 1})), None);
    }

    #[test]
    fn test_created_client_id() {
        assert_eq!(
            created_client_id(&json!({"data": {"clientId": "a"}})).as_deref(),
            Some("a")
        );
        assert_eq!(created_client_id(&json!({"id": "b"})).as_deref(), Some("b"));
        assert_eq!(created_client_id(&json!({"data": {}})), None);
    }

    #[test]
    fn test_owner_client_id() {
        assert_eq!(
            owner_client_id(&json!({"data": {"id": "ord-1", "clientId": "dg-1"}})).as_deref(),
            Some("dg-1")
        );
        assert_eq!(
            owner_client_id(&json!({"data": {"client": {"id": "dg-2"}}})).as_deref(),
            Some("dg-2")
        );
        assert_eq!(owner_client_id(&json!({"data": {"id": "ord-1"}})), None);
    }
}
