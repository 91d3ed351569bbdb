//! Bulk re-registration of local clients whose upstream record no longer
//! resolves, for example after the API key moved to a new scope.

use crate::errors::SyncError;
use crate::metrics_defs::{REHOME_OUTCOMES, SYNC_RUN_DURATION};
use chrono::Utc;
use drgreen::client::{created_client_id, upstream_message};
use drgreen::{DrGreenClient, UpstreamRequest};
use futures::future::join_all;
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::Store;
use store::models::{AdminApproval, ClientRecord, RehomeStatus};

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RehomeConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
}

impl Default for RehomeConfig {
    fn default() -> Self {
        RehomeConfig {
            batch_size: 3,
            batch_delay_ms: 2_000,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RehomeOptions {
    /// Restricts the run to these upstream client ids.
    pub client_ids: Option<Vec<String>>,
    pub dry_run: bool,
    /// Lowers the configured batch size; larger values are clamped to it.
    pub batch_size: Option<usize>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The upstream record resolves; nothing to do.
    Resolved,
    /// Dry run: the record would be re-registered.
    WouldRehome,
    #[serde(rename_all = "camelCase")]
    Rehomed { new_client_id: String },
    Failed { error: String },
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Resolved => "resolved",
            Outcome::WouldRehome => "would_rehome",
            Outcome::Rehomed { .. } => "rehomed",
            Outcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientOutcome {
    pub user_id: String,
    pub client_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RehomeReport {
    pub success: bool,
    pub dry_run: bool,
    pub total: u32,
    pub resolved: u32,
    pub rehomed: u32,
    pub would_rehome: u32,
    pub failed: u32,
    pub results: Vec<ClientOutcome>,
}

pub struct Rehomer {
    client: Arc<DrGreenClient>,
    store: Arc<dyn Store>,
    config: RehomeConfig,
}

impl Rehomer {
    pub fn new(client: Arc<DrGreenClient>, store: Arc<dyn Store>, config: RehomeConfig) -> Self {
        Rehomer {
            client,
            store,
            config,
        }
    }

    fn batch_size(&self, options: &RehomeOptions) -> usize {
        let configured = self.config.batch_size.max(1);
        options
            .batch_size
            .map_or(configured, |requested| requested.min(configured))
            .max(1)
    }

    pub async fn run(&self, options: &RehomeOptions) -> Result<RehomeReport, SyncError> {
        let started = Instant::now();
        let mut clients = self.store.list_clients().await?;
        if let Some(ids) = &options.client_ids {
            clients.retain(|c| ids.contains(&c.drgreen_client_id));
        }

        let batch_size = self.batch_size(options);
        let delay = Duration::from_millis(self.config.batch_delay_ms);
        let mut report = RehomeReport {
            success: true,
            dry_run: options.dry_run,
            ..RehomeReport::default()
        };

        for (index, batch) in clients.chunks(batch_size).enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcomes = join_all(
                batch
                    .iter()
                    .map(|record| self.rehome_one(record.clone(), options.dry_run)),
            )
            .await;

            for (record, outcome) in batch.iter().zip(outcomes) {
                counter!(REHOME_OUTCOMES, "outcome" => outcome.as_str()).increment(1);
                match &outcome {
                    Outcome::Resolved => report.resolved += 1,
                    Outcome::WouldRehome => report.would_rehome += 1,
                    Outcome::Rehomed { .. } => report.rehomed += 1,
                    Outcome::Failed { .. } => report.failed += 1,
                }
                report.total += 1;
                report.results.push(ClientOutcome {
                    user_id: record.user_id.clone(),
                    client_id: record.drgreen_client_id.clone(),
                    outcome,
                });
            }
        }

        histogram!(SYNC_RUN_DURATION, "job" => "rehome")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            total = report.total,
            resolved = report.resolved,
            rehomed = report.rehomed,
            failed = report.failed,
            dry_run = report.dry_run,
            "Rehome finished"
        );
        Ok(report)
    }

    async fn rehome_one(&self, mut record: ClientRecord, dry_run: bool) -> Outcome {
        let probe = UpstreamRequest::get(format!("/dapp/clients/{}", record.drgreen_client_id));
        let response = match self.client.send(&probe).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    client_id = %record.drgreen_client_id,
                    error = %e,
                    "Probe failed"
                );
                let error = format!("probe failed: {e}");
                if !dry_run {
                    self.record_failure(&mut record, &error).await;
                }
                return Outcome::Failed { error };
            }
        };

        if response.status.is_success() {
            let marked =
                record.rehome_status != RehomeStatus::None || record.rehome_error.is_some();
            if !dry_run && marked {
                record.rehome_status = RehomeStatus::None;
                record.rehome_error = None;
                if let Err(e) = self.store.upsert_client(&record).await {
                    tracing::warn!(
                        client_id = %record.drgreen_client_id,
                        error = %e,
                        "Failed to reset rehome status"
                    );
                }
            }
            return Outcome::Resolved;
        }

        if dry_run {
            return Outcome::WouldRehome;
        }

        tracing::info!(
            client_id = %record.drgreen_client_id,
            status = response.status.as_u16(),
            "Client does not resolve, re-registering"
        );
        record.rehome_status = RehomeStatus::Pending;
        if let Err(e) = self.store.upsert_client(&record).await {
            return Outcome::Failed {
                error: format!("could not mark pending: {e}"),
            };
        }

        match self.register(&record).await {
            Ok(new_id) => {
                record.old_drgreen_client_id = Some(record.drgreen_client_id.clone());
                record.drgreen_client_id = new_id.clone();
                record.is_kyc_verified = false;
                record.admin_approval = AdminApproval::Pending;
                record.rehome_status = RehomeStatus::Success;
                record.rehome_error = None;
                record.rehomed_at = Some(Utc::now());
                match self.store.upsert_client(&record).await {
                    Ok(()) => Outcome::Rehomed {
                        new_client_id: new_id,
                    },
                    Err(e) => {
                        let error = format!("registered {new_id} but could not save it: {e}");
                        tracing::error!(user_id = %record.user_id, error, "Rehome not recorded");
                        Outcome::Failed { error }
                    }
                }
            }
            Err(error) => {
                tracing::warn!(
                    client_id = %record.drgreen_client_id,
                    error,
                    "Re-registration failed"
                );
                self.record_failure(&mut record, &error).await;
                Outcome::Failed { error }
            }
        }
    }

    async fn register(&self, record: &ClientRecord) -> Result<String, String> {
        let request =
            UpstreamRequest::with_body(Method::POST, "/dapp/clients", registration_body(record));
        let response = self.client.send(&request).await.map_err(|e| e.to_string())?;
        let body = response.json().unwrap_or(Value::Null);
        if !response.status.is_success() {
            return Err(upstream_message(&body)
                .unwrap_or_else(|| format!("upstream returned {}", response.status)));
        }
        created_client_id(&body).ok_or_else(|| "registration response carried no client id".into())
    }

    async fn record_failure(&self, record: &mut ClientRecord, error: &str) {
        record.rehome_status = RehomeStatus::Failed;
        record.rehome_error = Some(error.to_string());
        if let Err(e) = self.store.upsert_client(record).await {
            tracing::error!(
                user_id = %record.user_id,
                error = %e,
                "Failed to record rehome failure"
            );
        }
    }
}

/// Registration payload built from the locally held profile.
fn registration_body(record: &ClientRecord) -> Value {
    let mut body = Map::new();
    if let Some(email) = &record.email {
        body.insert("email".into(), json!(email));
    }
    if let Some(name) = &record.full_name {
        let (first, last) = name.split_once(' ').unwrap_or((name.as_str(), ""));
        body.insert("firstName".into(), json!(first));
        body.insert("lastName".into(), json!(last));
    }
    if let Some(shipping) = &record.shipping_address {
        body.insert("shipping".into(), shipping.clone());
    }
    if let Some(country) = &record.country_code {
        body.insert("countryCode".into(), json!(country));
    }
    Value::Object(body)
}
