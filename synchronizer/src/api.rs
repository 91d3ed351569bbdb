//! HTTP entry points for the three jobs. All of them require an admin caller,
//! checked before any upstream call.

use crate::clients::{ClientSync, ClientSyncOptions};
use crate::errors::SyncError;
use crate::rehome::{RehomeConfig, RehomeOptions, Rehomer};
use crate::strains::{StrainSync, StrainSyncOptions};
use drgreen::{DrGreenClient, StrainCache};
use http::{HeaderMap, Method, StatusCode};
use hyper::Response;
use hyper::body::Bytes;
use serde::de::DeserializeOwned;
use serde_json::json;
use shared::http::{bearer_token, json_response, preflight_response};
use std::sync::Arc;
use store::{Access, Store, authorize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Job {
    SyncStrains,
    SyncClients,
    Rehome,
}

impl Job {
    pub const fn name(&self) -> &'static str {
        match self {
            Job::SyncStrains => "sync-strains",
            Job::SyncClients => "sync-clients",
            Job::Rehome => "drgreen-rehome",
        }
    }

    pub fn from_name(name: &str) -> Option<Job> {
        [Job::SyncStrains, Job::SyncClients, Job::Rehome]
            .into_iter()
            .find(|job| job.name() == name)
    }
}

/// Empty bodies select the defaults.
fn parse_options<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, SyncError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| SyncError::InvalidRequest(e.to_string()))
}

pub struct SyncApi {
    store: Arc<dyn Store>,
    strains: StrainSync,
    clients: ClientSync,
    rehomer: Rehomer,
}

impl SyncApi {
    pub fn new(
        client: Arc<DrGreenClient>,
        store: Arc<dyn Store>,
        cache: Arc<StrainCache>,
        rehome: RehomeConfig,
    ) -> Self {
        SyncApi {
            strains: StrainSync::new(client.clone(), store.clone(), cache),
            clients: ClientSync::new(client.clone(), store.clone()),
            rehomer: Rehomer::new(client, store.clone(), rehome),
            store,
        }
    }

    pub fn strains(&self) -> &StrainSync {
        &self.strains
    }

    pub fn clients(&self) -> &ClientSync {
        &self.clients
    }

    pub fn rehomer(&self) -> &Rehomer {
        &self.rehomer
    }

    pub async fn handle(
        &self,
        job: Job,
        method: &Method,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Response<Bytes> {
        if method == Method::OPTIONS {
            return preflight_response();
        }
        match self.dispatch(job, method, headers, body).await {
            Ok(response) => response,
            Err(err) => {
                if err.status().is_server_error() {
                    tracing::error!(job = job.name(), error = %err, "Job failed");
                } else {
                    tracing::info!(job = job.name(), error = %err, "Job request rejected");
                }
                json_response(
                    err.status(),
                    &json!({
                        "success": false,
                        "error": err.to_string(),
                        "errorCode": err.code(),
                        "retryable": err.retryable(),
                    }),
                )
            }
        }
    }

    async fn dispatch(
        &self,
        job: Job,
        method: &Method,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<Response<Bytes>, SyncError> {
        if method != Method::POST {
            return Err(SyncError::MethodNotAllowed);
        }
        let admin = authorize(self.store.as_ref(), bearer_token(headers), Access::Admin).await?;
        if let Some(admin) = admin {
            tracing::info!(job = job.name(), user_id = %admin.id, "Job requested");
        }

        let response = match job {
            Job::SyncStrains => {
                let options: StrainSyncOptions = parse_options(body)?;
                json_response(StatusCode::OK, &self.strains.run(&options).await?)
            }
            Job::SyncClients => {
                let options: ClientSyncOptions = parse_options(body)?;
                json_response(StatusCode::OK, &self.clients.run(&options).await?)
            }
            Job::Rehome => {
                let options: RehomeOptions = parse_options(body)?;
                json_response(StatusCode::OK, &self.rehomer.run(&options).await?)
            }
        };
        Ok(response)
    }
}
