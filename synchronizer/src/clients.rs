//! Client synchronization: links upstream clients to local identities by
//! email and keeps verification state current.

use crate::errors::SyncError;
use crate::fields;
use crate::metrics_defs::{SYNC_RECORDS, SYNC_RUN_DURATION};
use drgreen::{DrGreenClient, UpstreamRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use store::Store;
use store::models::{AdminApproval, AuthUser, ClientRecord};

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientSyncOptions {
    pub take: u32,
    pub max_pages: u32,
}

impl Default for ClientSyncOptions {
    fn default() -> Self {
        ClientSyncOptions {
            take: 100,
            max_pages: 20,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientSyncReport {
    pub success: bool,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub unlinked: u32,
    pub errors: u32,
    pub total: u32,
    /// Set when a page after the first failed; counts cover the pages before it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Outcome {
    Created,
    Updated,
    Unchanged,
    Unlinked,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
            Outcome::Unlinked => "unlinked",
        }
    }
}

/// The verification state an upstream client reports.
struct UpstreamClient {
    id: String,
    email: String,
    full_name: Option<String>,
    is_kyc_verified: bool,
    admin_approval: AdminApproval,
    country_code: Option<String>,
    shipping_address: Option<Value>,
}

impl UpstreamClient {
    fn parse(record: &Value) -> Result<Self, SyncError> {
        let id = fields::string(record, fields::CLIENT_ID)
            .ok_or_else(|| SyncError::Transform("client without id".into()))?;
        let email = fields::string(record, fields::CLIENT_EMAIL)
            .ok_or_else(|| SyncError::Transform(format!("client {id} has no email")))?;
        let name = [fields::FIRST_NAME, fields::LAST_NAME]
            .iter()
            .filter_map(|candidates| fields::string(record, candidates))
            .collect::<Vec<_>>()
            .join(" ");

        Ok(UpstreamClient {
            email: email.to_lowercase(),
            full_name: Some(name).filter(|n| !n.is_empty()),
            is_kyc_verified: fields::boolean(record, fields::KYC_VERIFIED).unwrap_or(false),
            admin_approval: fields::string(record, fields::ADMIN_APPROVAL)
                .map(|a| AdminApproval::from_upstream(&a))
                .unwrap_or_default(),
            country_code: fields::string(record, fields::CLIENT_COUNTRY),
            shipping_address: fields::SHIPPING
                .iter()
                .find_map(|key| record.get(*key).filter(|v| v.is_object()).cloned()),
            id,
        })
    }
}

pub struct ClientSync {
    client: Arc<DrGreenClient>,
    store: Arc<dyn Store>,
}

impl ClientSync {
    pub fn new(client: Arc<DrGreenClient>, store: Arc<dyn Store>) -> Self {
        ClientSync { client, store }
    }

    pub async fn run(&self, options: &ClientSyncOptions) -> Result<ClientSyncReport, SyncError> {
        let started = Instant::now();
        let users: HashMap<String, AuthUser> = self
            .store
            .list_auth_users()
            .await?
            .into_iter()
            .filter_map(|user| {
                let email = user.email.as_ref()?.trim().to_lowercase();
                Some((email, user))
            })
            .collect();

        let mut report = ClientSyncReport {
            success: true,
            ..ClientSyncReport::default()
        };
        let take = options.take.max(1);

        for page in 1..=options.max_pages {
            let request = UpstreamRequest::get("/dapp/clients")
                .query("orderBy", "desc")
                .query("take", take)
                .query("page", page);
            let body = match self.client.send_json(&request).await {
                Ok(body) => body,
                Err(e) if page > 1 => {
                    tracing::error!(page, error = %e, "Client listing failed, stopping");
                    report.success = false;
                    report.error = Some(e.to_string());
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            let records = fields::client_page(&body);
            for record in &records {
                report.total += 1;
                match self.sync_one(record, &users).await {
                    Ok(outcome) => {
                        counter!(SYNC_RECORDS, "job" => "clients", "outcome" => outcome.as_str())
                            .increment(1);
                        match outcome {
                            Outcome::Created => report.created += 1,
                            Outcome::Updated => report.updated += 1,
                            Outcome::Unchanged => report.unchanged += 1,
                            Outcome::Unlinked => report.unlinked += 1,
                        }
                    }
                    Err(e) => {
                        counter!(SYNC_RECORDS, "job" => "clients", "outcome" => "error")
                            .increment(1);
                        tracing::warn!(error = %e, "Skipping client");
                        report.errors += 1;
                    }
                }
            }

            if fields::has_next_page(&body) == Some(false) || (records.len() as u32) < take {
                break;
            }
        }

        histogram!(SYNC_RUN_DURATION, "job" => "clients")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            unlinked = report.unlinked,
            errors = report.errors,
            "Client sync finished"
        );
        Ok(report)
    }

    async fn sync_one(
        &self,
        record: &Value,
        users: &HashMap<String, AuthUser>,
    ) -> Result<Outcome, SyncError> {
        let upstream = UpstreamClient::parse(record)?;

        if let Some(mut existing) = self.store.find_client_by_drgreen_id(&upstream.id).await? {
            if existing.is_kyc_verified == upstream.is_kyc_verified
                && existing.admin_approval == upstream.admin_approval
            {
                return Ok(Outcome::Unchanged);
            }
            existing.is_kyc_verified = upstream.is_kyc_verified;
            existing.admin_approval = upstream.admin_approval;
            self.store.upsert_client(&existing).await?;
            tracing::debug!(client_id = %upstream.id, "Updated client verification state");
            return Ok(Outcome::Updated);
        }

        let Some(user) = users.get(&upstream.email) else {
            tracing::debug!(client_id = %upstream.id, "No local identity for client");
            return Ok(Outcome::Unlinked);
        };

        if let Some(linked) = self.store.find_client_by_user(&user.id).await? {
            tracing::debug!(
                user_id = %user.id,
                linked = %linked.drgreen_client_id,
                client_id = %upstream.id,
                "User already linked to another client"
            );
            return Ok(Outcome::Unchanged);
        }

        let mut record = ClientRecord::new(&user.id, &upstream.id);
        record.email = Some(upstream.email);
        record.full_name = upstream.full_name;
        record.is_kyc_verified = upstream.is_kyc_verified;
        record.admin_approval = upstream.admin_approval;
        record.country_code = upstream.country_code;
        record.shipping_address = upstream.shipping_address;
        self.store.upsert_client(&record).await?;
        tracing::info!(user_id = %user.id, client_id = %upstream.id, "Linked client");
        Ok(Outcome::Created)
    }
}
