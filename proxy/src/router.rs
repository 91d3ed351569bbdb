use crate::actions::Action;
use crate::errors::{ProxyError, relay_upstream_error};
use crate::metrics_defs::{PROXY_REJECTED, PROXY_REQUEST_DURATION, PROXY_REQUESTS};
use drgreen::client::{created_client_id, owner_client_id};
use drgreen::{DrGreenClient, StrainCache, UpstreamRequest, UpstreamResponse};
use http::{HeaderMap, Method, StatusCode};
use hyper::Response;
use hyper::body::Bytes;
use serde_json::Value;
use shared::http::{bearer_token, preflight_response, raw_json_response};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use store::auth::ADMIN_ROLE;
use store::models::{AuthUser, ClientRecord};
use store::{Store, StoreError, authorize};

/// Resolves `{action, ...params}` requests into signed upstream calls.
pub struct ActionRouter {
    client: Arc<DrGreenClient>,
    store: Arc<dyn Store>,
    cache: Arc<StrainCache>,
}

impl ActionRouter {
    pub fn new(
        client: Arc<DrGreenClient>,
        store: Arc<dyn Store>,
        cache: Arc<StrainCache>,
    ) -> Self {
        ActionRouter {
            client,
            store,
            cache,
        }
    }

    /// Answers one request. Never fails: every error becomes a JSON body with
    /// an error code and CORS headers.
    pub async fn handle(
        &self,
        method: &Method,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Response<Bytes> {
        if method == Method::OPTIONS {
            return preflight_response();
        }

        let started = Instant::now();
        let action = match self.resolve(method, body) {
            Ok(action) => action,
            Err(err) => return self.reject(err),
        };
        let name = action.kind().name();

        let response = match self.execute(&action, headers).await {
            Ok(response) => response,
            Err(err) => {
                let code = err.code();
                if err.status().is_server_error() {
                    tracing::error!(action = name, error = %err, code, "Action failed");
                } else {
                    tracing::info!(action = name, error = %err, code, "Action rejected");
                }
                err.to_response()
            }
        };

        let status = response.status().as_u16().to_string();
        counter!(PROXY_REQUESTS, "action" => name, "status" => status).increment(1);
        histogram!(PROXY_REQUEST_DURATION, "action" => name)
            .record(started.elapsed().as_secs_f64());
        response
    }

    fn resolve(&self, method: &Method, body: &Bytes) -> Result<Action, ProxyError> {
        if method != Method::POST {
            return Err(ProxyError::MethodNotAllowed);
        }
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;
        Action::from_request(&value)
    }

    fn reject(&self, err: ProxyError) -> Response<Bytes> {
        tracing::info!(error = %err, code = err.code(), "Request rejected");
        counter!(PROXY_REJECTED, "code" => err.code()).increment(1);
        err.to_response()
    }

    async fn execute(
        &self,
        action: &Action,
        headers: &HeaderMap,
    ) -> Result<Response<Bytes>, ProxyError> {
        let user = authorize(self.store.as_ref(), bearer_token(headers), action.access()).await?;
        if let Some(user) = &user {
            self.check_ownership(action, user).await?;
        }

        if let Action::GetStrain { strain_id } = action
            && let Some(body) = self.cache.get(strain_id)
        {
            return Ok(raw_json_response(StatusCode::OK, body));
        }

        let upstream = self.client.send(&action.upstream_request()).await?;
        if !upstream.status.is_success() {
            tracing::info!(
                action = action.kind().name(),
                status = upstream.status.as_u16(),
                "Upstream rejected action"
            );
            return Ok(relay_upstream_error(upstream.status, &upstream.body));
        }

        match action {
            Action::GetStrain { strain_id } => {
                self.cache.insert(strain_id, upstream.body.clone());
            }
            Action::CreateClient { data } => {
                if let Some(user) = &user {
                    self.link_created_client(user, data, &upstream).await;
                }
            }
            _ => {}
        }

        Ok(raw_json_response(upstream.status, upstream.body))
    }

    /// Non-admin callers may only act on the upstream client linked to them,
    /// including orders and carts that client owns.
    async fn check_ownership(&self, action: &Action, user: &AuthUser) -> Result<(), ProxyError> {
        let lookup = action.owner_lookup();
        if action.client_scope().is_none() && lookup.is_none() {
            return Ok(());
        }
        if self.store.has_role(&user.id, ADMIN_ROLE).await? {
            return Ok(());
        }

        let owner = match (action.client_scope(), lookup) {
            (Some(client_id), _) => Some(client_id.to_string()),
            (None, Some(lookup)) => self.resource_owner(&lookup).await?,
            (None, None) => None,
        };
        match self.store.find_client_by_user(&user.id).await? {
            Some(record) if owner.as_deref() == Some(record.drgreen_client_id.as_str()) => Ok(()),
            _ => {
                tracing::warn!(
                    user_id = %user.id,
                    action = action.kind().name(),
                    owner = owner.as_deref().unwrap_or("unknown"),
                    "Client ownership check failed"
                );
                Err(ProxyError::Forbidden)
            }
        }
    }

    /// Owning client of an order or cart. A record the upstream does not
    /// return has no known owner.
    async fn resource_owner(&self, lookup: &UpstreamRequest) -> Result<Option<String>, ProxyError> {
        let response = self.client.send(lookup).await?;
        if !response.status.is_success() {
            return Ok(None);
        }
        Ok(response.json().ok().as_ref().and_then(owner_client_id))
    }

    /// Records the projection for a freshly registered client. The upstream
    /// response is relayed whether or not this succeeds.
    async fn link_created_client(
        &self,
        user: &AuthUser,
        data: &Value,
        upstream: &UpstreamResponse,
    ) {
        let Some(client_id) = upstream.json().ok().as_ref().and_then(created_client_id) else {
            tracing::warn!(user_id = %user.id, "Created client response carried no id");
            return;
        };

        let mut record = ClientRecord::new(&user.id, client_id);
        record.email = data
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| user.email.clone());
        let name = ["firstName", "lastName"]
            .iter()
            .filter_map(|key| data.get(*key).and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        record.full_name = Some(name).filter(|n| !n.is_empty());
        record.shipping_address = data.get("shipping").cloned();
        record.country_code = data
            .pointer("/shipping/countryCode")
            .and_then(Value::as_str)
            .map(str::to_string);

        match self.store.upsert_client(&record).await {
            Ok(()) => tracing::info!(
                user_id = %user.id,
                client_id = %record.drgreen_client_id,
                "Linked new client"
            ),
            Err(StoreError::Duplicate(field)) => {
                tracing::warn!(user_id = %user.id, field, "Client already linked to another user")
            }
            Err(e) => tracing::error!(user_id = %user.id, error = %e, "Failed to link new client"),
        }
    }
}
