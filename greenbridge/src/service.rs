use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use proxy::ActionRouter;
use serde_json::json;
use shared::http::{into_boxed, json_response, preflight_response};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use synchronizer::{Job, SyncApi};

/// Prefix the hosted platform puts in front of every function name.
const FUNCTIONS_PREFIX: &str = "/functions/v1";
const PROXY_FUNCTION: &str = "drgreen-proxy";
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Function name addressed by a request path, accepting both `/<name>` and
/// `/functions/v1/<name>`.
fn function_name(path: &str) -> &str {
    let path = path.strip_prefix(FUNCTIONS_PREFIX).unwrap_or(path);
    path.trim_matches('/')
}

/// Main listener: dispatches each function endpoint to its handler.
pub struct EdgeService {
    router: Arc<ActionRouter>,
    jobs: Arc<SyncApi>,
}

impl EdgeService {
    pub fn new(router: Arc<ActionRouter>, jobs: Arc<SyncApi>) -> Self {
        EdgeService { router, jobs }
    }

    async fn route(
        router: &ActionRouter,
        jobs: &SyncApi,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Response<Bytes> {
        let name = function_name(path);
        if name == PROXY_FUNCTION {
            return router.handle(method, headers, &body).await;
        }
        if let Some(job) = Job::from_name(name) {
            return jobs.handle(job, method, headers, &body).await;
        }
        if method == Method::OPTIONS {
            return preflight_response();
        }
        tracing::debug!(path, "No function at path");
        json_response(
            StatusCode::NOT_FOUND,
            &json!({"error": "Not found", "errorCode": "NOT_FOUND", "retryable": false}),
        )
    }
}

impl Service<Request<Incoming>> for EdgeService {
    type Response = Response<BoxBody<Bytes, crate::GreenbridgeError>>;
    type Error = crate::GreenbridgeError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let router = self.router.clone();
        let jobs = self.jobs.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match Limited::new(body, MAX_BODY_BYTES).collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::info!(
                        error = %e,
                        path = parts.uri.path(),
                        "Could not read request body"
                    );
                    let status = if e.downcast_ref::<LengthLimitError>().is_some() {
                        StatusCode::PAYLOAD_TOO_LARGE
                    } else {
                        StatusCode::BAD_REQUEST
                    };
                    let response = json_response(
                        status,
                        &json!({
                            "error": "Request body could not be read",
                            "errorCode": "INVALID_REQUEST",
                            "retryable": false,
                        }),
                    );
                    return Ok(into_boxed(response));
                }
            };

            let response = Self::route(
                &router,
                &jobs,
                &parts.method,
                parts.uri.path(),
                &parts.headers,
                body,
            )
            .await;
            Ok(into_boxed(response))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drgreen::config::CacheConfig;
    use drgreen::{DrGreenClient, StrainCache, UpstreamConfig};
    use store::{MemoryStore, Store};
    use synchronizer::RehomeConfig;

    fn handlers() -> (ActionRouter, SyncApi) {
        let client = Arc::new(DrGreenClient::new(
            &UpstreamConfig::default(),
            Err(drgreen::SigningError::MissingSecret("DRGREEN_API_KEY")),
        ));
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let cache = Arc::new(StrainCache::new(&CacheConfig::default()));
        (
            ActionRouter::new(client.clone(), store.clone(), cache.clone()),
            SyncApi::new(client, store, cache, RehomeConfig::default()),
        )
    }

    async fn call(method: Method, path: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let (router, jobs) = handlers();
        let response = EdgeService::route(
            &router,
            &jobs,
            &method,
            path,
            &HeaderMap::new(),
            Bytes::from(body.to_string()),
        )
        .await;
        let status = response.status();
        let body = serde_json::from_slice(response.body()).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[test]
    fn test_function_name() {
        assert_eq!(function_name("/drgreen-proxy"), "drgreen-proxy");
        assert_eq!(function_name("/functions/v1/sync-strains"), "sync-strains");
        assert_eq!(function_name("/functions/v1/drgreen-rehome/"), "drgreen-rehome");
        assert_eq!(function_name("/"), "");
    }

    #[tokio::test]
    async fn test_proxy_alias() {
        for path in ["/drgreen-proxy", "/functions/v1/drgreen-proxy"] {
            let (status, body) = call(Method::POST, path, r#"{"action": "nope"}"#).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "Unknown action");
        }
    }

    #[tokio::test]
    async fn test_jobs_require_admin() {
        for path in ["/sync-strains", "/functions/v1/sync-clients", "/drgreen-rehome"] {
            let (status, body) = call(Method::POST, path, "{}").await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
            assert_eq!(body["success"], false);
        }
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let (status, body) = call(Method::POST, "/functions/v1/other", "{}").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], "NOT_FOUND");

        let (status, _) = call(Method::OPTIONS, "/other", "").await;
        assert_eq!(status, StatusCode::OK);
    }
}
