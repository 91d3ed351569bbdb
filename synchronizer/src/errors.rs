use drgreen::DrGreenError;
use http::StatusCode;
use store::{AuthError, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("invalid request body: {0}")]
    InvalidRequest(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Upstream(#[from] DrGreenError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("could not transform record: {0}")]
    Transform(String),
}

impl SyncError {
    pub fn status(&self) -> StatusCode {
        match self {
            SyncError::InvalidRequest(_) | SyncError::Transform(_) => StatusCode::BAD_REQUEST,
            SyncError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            SyncError::Auth(AuthError::MissingToken | AuthError::InvalidToken) => {
                StatusCode::UNAUTHORIZED
            }
            SyncError::Auth(AuthError::Forbidden) => StatusCode::FORBIDDEN,
            SyncError::Auth(AuthError::Store(_)) | SyncError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            SyncError::Upstream(DrGreenError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            SyncError::Upstream(DrGreenError::Network(_) | DrGreenError::Status { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            SyncError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, SyncError::Upstream(e) if e.is_retryable())
    }

    pub fn code(&self) -> &'static str {
        match self {
            SyncError::InvalidRequest(_) => "INVALID_REQUEST",
            SyncError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            SyncError::Auth(AuthError::MissingToken | AuthError::InvalidToken) => "UNAUTHORIZED",
            SyncError::Auth(AuthError::Forbidden) => "FORBIDDEN",
            SyncError::Auth(AuthError::Store(StoreError::NotConfigured(_)))
            | SyncError::Store(StoreError::NotConfigured(_))
            | SyncError::Upstream(
                DrGreenError::MissingCredentials(_)
                | DrGreenError::Signing(_)
                | DrGreenError::InvalidUrl(_),
            ) => "CONFIG_ERROR",
            SyncError::Auth(AuthError::Store(_)) | SyncError::Store(_) => "STORE_ERROR",
            SyncError::Upstream(DrGreenError::Timeout(_)) => "TIMEOUT",
            SyncError::Upstream(DrGreenError::Network(_)) => "NETWORK_ERROR",
            SyncError::Upstream(_) => "UPSTREAM_ERROR",
            SyncError::Transform(_) => "TRANSFORM_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_codes() {
        let err = SyncError::from(AuthError::Forbidden);
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "FORBIDDEN");

        let err = SyncError::from(DrGreenError::MissingCredentials("DRGREEN_API_KEY".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "CONFIG_ERROR");

        let err = SyncError::from(DrGreenError::Timeout(Duration::from_secs(20)));
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code(), "TIMEOUT");
        assert!(err.retryable());

        let err = SyncError::from(StoreError::NotConfigured("SUPABASE_SERVICE_ROLE_KEY".into()));
        assert_eq!(err.code(), "CONFIG_ERROR");
    }
}
