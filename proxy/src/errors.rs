use drgreen::DrGreenError;
use drgreen::client::upstream_message;
use http::StatusCode;
use hyper::body::Bytes;
use serde_json::{Value, json};
use shared::http::json_response;
use std::time::Duration;
use store::{AuthError, StoreError};

/// Failures produced by the router itself. Upstream error statuses are not
/// represented here; they are relayed by `relay_upstream_error`.
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("invalid request body: {0}")]
    InvalidRequest(String),
    #[error("Unknown action")]
    UnknownAction(String),
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden")]
    Forbidden,
    #[error("Server configuration error: {0}")]
    Configuration(String),
    #[error("Upstream request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Upstream request failed: {0}")]
    Network(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidRequest(_)
            | ProxyError::UnknownAction(_)
            | ProxyError::MissingParameter(_)
            | ProxyError::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ProxyError::Forbidden => StatusCode::FORBIDDEN,
            ProxyError::Configuration(_) | ProxyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Network(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::InvalidRequest(_) => "INVALID_REQUEST",
            ProxyError::UnknownAction(_) => "UNKNOWN_ACTION",
            ProxyError::MissingParameter(_) => "MISSING_PARAMETER",
            ProxyError::InvalidParameter { .. } => "INVALID_PARAMETER",
            ProxyError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ProxyError::Unauthorized(_) => "UNAUTHORIZED",
            ProxyError::Forbidden => "FORBIDDEN",
            ProxyError::Configuration(_) => "CONFIG_ERROR",
            ProxyError::Timeout(_) => "TIMEOUT",
            ProxyError::Network(_) => "NETWORK_ERROR",
            ProxyError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, ProxyError::Timeout(_) | ProxyError::Network(_))
    }

    pub fn to_response(&self) -> hyper::Response<Bytes> {
        let mut body = json!({
            "error": self.to_string(),
            "errorCode": self.code(),
            "retryable": self.retryable(),
        });
        match self {
            ProxyError::UnknownAction(action) => body["action"] = json!(action),
            ProxyError::MissingParameter(name) | ProxyError::InvalidParameter { name, .. } => {
                body["param"] = json!(name)
            }
            _ => {}
        }
        json_response(self.status(), &body)
    }
}

impl From<DrGreenError> for ProxyError {
    fn from(err: DrGreenError) -> Self {
        match err {
            DrGreenError::MissingCredentials(msg) => ProxyError::Configuration(msg),
            DrGreenError::Signing(e) => ProxyError::Configuration(e.to_string()),
            DrGreenError::InvalidUrl(msg) => ProxyError::Configuration(msg),
            DrGreenError::Timeout(duration) => ProxyError::Timeout(duration),
            DrGreenError::Network(e) => ProxyError::Network(e.to_string()),
            DrGreenError::Encode(e) => ProxyError::Internal(e.to_string()),
            DrGreenError::Status { status, message } => {
                ProxyError::Internal(format!("unexpected upstream status {status}: {message}"))
            }
        }
    }
}

impl From<AuthError> for ProxyError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::InvalidToken => {
                ProxyError::Unauthorized(err.to_string())
            }
            AuthError::Forbidden => ProxyError::Forbidden,
            AuthError::Store(e) => e.into(),
        }
    }
}

impl From<StoreError> for ProxyError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotConfigured(msg) => ProxyError::Configuration(msg),
            other => ProxyError::Internal(other.to_string()),
        }
    }
}

/// Error code and retryability for an upstream status the router relays.
pub fn classify_upstream_status(status: StatusCode) -> (&'static str, bool) {
    match status {
        StatusCode::UNPROCESSABLE_ENTITY => ("UPSTREAM_VALIDATION", false),
        StatusCode::CONFLICT => ("DUPLICATE", false),
        StatusCode::NOT_FOUND => ("NOT_FOUND", false),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ("UPSTREAM_AUTH", false),
        StatusCode::TOO_MANY_REQUESTS => ("RATE_LIMITED", true),
        s if s.is_server_error() => ("UPSTREAM_ERROR", true),
        _ => ("UPSTREAM_REJECTED", false),
    }
}

/// Relays a non-success upstream response with its status, wrapping the
/// original body under `upstream` next to a machine readable code.
pub fn relay_upstream_error(status: StatusCode, body: &Bytes) -> hyper::Response<Bytes> {
    let upstream: Value = serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()));
    let (code, retryable) = classify_upstream_status(status);
    let message = upstream_message(&upstream).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Upstream request failed")
            .to_string()
    });

    json_response(
        status,
        &json!({
            "error": message,
            "errorCode": code,
            "retryable": retryable,
            "upstream": upstream,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_json(response: &hyper::Response<Bytes>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    #[test]
    fn test_unknown_action_body() {
        let response = ProxyError::UnknownAction("do-magic".into()).to_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(&response);
        assert_eq!(body["error"], "Unknown action");
        assert_eq!(body["action"], "do-magic");
        assert_eq!(body["retryable"], false);
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = ProxyError::from(DrGreenError::Timeout(Duration::from_secs(20)));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.retryable());
    }

    #[test]
    fn test_missing_credentials_is_config_error() {
        let err = ProxyError::from(DrGreenError::MissingCredentials("DRGREEN_API_KEY".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert!(!err.retryable());
    }

    #[test]
    fn test_relay_document_rejection() {
        let body = Bytes::from_static(br#"{"message":"Document image is blurry"}"#);
        let response = relay_upstream_error(StatusCode::UNPROCESSABLE_ENTITY, &body);
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(&response);
        assert_eq!(json["errorCode"], "UPSTREAM_VALIDATION");
        assert_eq!(json["error"], "Document image is blurry");
        assert_eq!(json["upstream"]["message"], "Document image is blurry");
    }

    #[test]
    fn test_relay_non_json_error() {
        let body = Bytes::from_static(b"Bad Gateway");
        let response = relay_upstream_error(StatusCode::BAD_GATEWAY, &body);
        let json = body_json(&response);
        assert_eq!(json["errorCode"], "UPSTREAM_ERROR");
        assert_eq!(json["retryable"], true);
        assert_eq!(json["upstream"], "Bad Gateway");
    }
}
