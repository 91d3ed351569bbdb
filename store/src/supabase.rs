//! Store backed by Supabase: PostgREST for tables and GoTrue for auth.

use crate::models::{AuthUser, ClientRecord, Strain};
use crate::{Store, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

const STRAINS_TABLE: &str = "strains";
const CLIENTS_TABLE: &str = "drgreen_clients";
const ROLES_TABLE: &str = "user_roles";
const USERS_PAGE_SIZE: usize = 1000;
// Postgres unique_violation
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Deserialize)]
struct PostgrestError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

#[derive(Deserialize)]
struct UsersPage {
    users: Vec<AuthUser>,
}

#[derive(Deserialize)]
struct UpdatedAt {
    updated_at: DateTime<Utc>,
}

pub struct SupabaseStore {
    client: reqwest::Client,
    base_url: String,
    service_key: Option<String>,
}

impl SupabaseStore {
    pub fn new(url: Url, service_key: Option<String>) -> Self {
        SupabaseStore {
            client: reqwest::Client::new(),
            base_url: url.as_str().trim_end_matches('/').to_string(),
            service_key,
        }
    }

    fn service_key(&self) -> Result<&str, StoreError> {
        self.service_key
            .as_deref()
            .ok_or_else(|| StoreError::NotConfigured("missing service role key".into()))
    }

    fn rest_url(&self, table: &str, query: &[(&str, &str)]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&format!("{}/rest/v1/{table}", self.base_url))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn authed(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, StoreError> {
        let key = self.service_key()?;
        Ok(builder
            .header("apikey", key)
            .header(http::header::AUTHORIZATION, format!("Bearer {key}")))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, StoreError> {
        let url = self.rest_url(table, query)?;
        let response = self.authed(self.client.get(url))?.send().await?;
        let response = check_status(response, table).await?;
        Ok(response.json::<Vec<T>>().await?)
    }

    async fn upsert<T: serde::Serialize + Sync>(
        &self,
        table: &str,
        on_conflict: &str,
        row: &T,
    ) -> Result<(), StoreError> {
        let url = self.rest_url(table, &[("on_conflict", on_conflict)])?;
        let response = self
            .authed(self.client.post(url))?
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await?;
        check_status(response, table).await?;
        Ok(())
    }
}

/// Maps PostgREST failures, detecting unique constraint violations.
async fn check_status(
    response: reqwest::Response,
    table: &str,
) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<PostgrestError>(&text).ok();
    let is_duplicate = status == StatusCode::CONFLICT
        || parsed
            .as_ref()
            .and_then(|e| e.code.as_deref())
            .is_some_and(|code| code == UNIQUE_VIOLATION);

    if is_duplicate {
        let detail = parsed
            .and_then(|e| e.details.or(e.message))
            .unwrap_or_else(|| table.to_string());
        tracing::warn!(table, detail = %detail, "Unique constraint violation");
        return Err(StoreError::Duplicate(detail));
    }

    let message = parsed.and_then(|e| e.message).unwrap_or(text);
    tracing::error!(table, %status, message = %message, "Store request failed");
    Err(StoreError::Status { status, message })
}

#[async_trait]
impl Store for SupabaseStore {
    async fn verify_token(&self, token: &str) -> Result<Option<AuthUser>, StoreError> {
        let url = Url::parse(&format!("{}/auth/v1/user", self.base_url))?;
        let response = self
            .client
            .get(url)
            .header("apikey", self.service_key()?)
            .bearer_auth(token)
            .send()
            .await?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Ok(None),
            _ => {
                let response = check_status(response, "auth.users").await?;
                Ok(Some(response.json::<AuthUser>().await?))
            }
        }
    }

    async fn has_role(&self, user_id: &str, role: &str) -> Result<bool, StoreError> {
        let user_filter = format!("eq.{user_id}");
        let role_filter = format!("eq.{role}");
        let rows: Vec<serde_json::Value> = self
            .select(
                ROLES_TABLE,
                &[
                    ("select", "role"),
                    ("user_id", user_filter.as_str()),
                    ("role", role_filter.as_str()),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn list_auth_users(&self) -> Result<Vec<AuthUser>, StoreError> {
        let mut users = Vec::new();
        let mut page = 1;

        loop {
            let mut url = Url::parse(&format!("{}/auth/v1/admin/users", self.base_url))?;
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &USERS_PAGE_SIZE.to_string());

            let response = self.authed(self.client.get(url))?.send().await?;
            let response = check_status(response, "auth.users").await?;
            let batch = response.json::<UsersPage>().await?.users;
            let fetched = batch.len();
            users.extend(batch);

            if fetched < USERS_PAGE_SIZE {
                break;
            }
            page += 1;
        }

        tracing::debug!(count = users.len(), "Loaded auth users");
        Ok(users)
    }

    async fn latest_strain_update(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let rows: Vec<UpdatedAt> = self
            .select(
                STRAINS_TABLE,
                &[
                    ("select", "updated_at"),
                    ("order", "updated_at.desc"),
                    ("limit", "1"),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().map(|row| row.updated_at))
    }

    async fn get_strain(&self, id: &str) -> Result<Option<Strain>, StoreError> {
        let filter = format!("eq.{id}");
        let rows: Vec<Strain> = self
            .select(STRAINS_TABLE, &[("select", "*"), ("id", filter.as_str()), ("limit", "1")])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_strain(&self, strain: &Strain) -> Result<(), StoreError> {
        self.upsert(STRAINS_TABLE, "id", strain).await
    }

    async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
        self.select(CLIENTS_TABLE, &[("select", "*"), ("order", "user_id.asc")])
            .await
    }

    async fn find_client_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<ClientRecord>, StoreError> {
        let filter = format!("eq.{user_id}");
        let rows: Vec<ClientRecord> = self
            .select(
                CLIENTS_TABLE,
                &[("select", "*"), ("user_id", filter.as_str()), ("limit", "1")],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn find_client_by_drgreen_id(
        &self,
        drgreen_client_id: &str,
    ) -> Result<Option<ClientRecord>, StoreError> {
        let filter = format!("eq.{drgreen_client_id}");
        let rows: Vec<ClientRecord> = self
            .select(
                CLIENTS_TABLE,
                &[
                    ("select", "*"),
                    ("drgreen_client_id", filter.as_str()),
                    ("limit", "1"),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn upsert_client(&self, client: &ClientRecord) -> Result<(), StoreError> {
        self.upsert(CLIENTS_TABLE, "user_id", client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, headers, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> SupabaseStore {
        SupabaseStore::new(
            Url::parse(&server.uri()).unwrap(),
            Some("service-key".into()),
        )
    }

    #[tokio::test]
    async fn test_verify_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer good"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "u1", "email": "a@example.com", "aud": "x"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", "Bearer bad"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = store(&server);
        let user = store.verify_token("good").await.unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(store.verify_token("bad").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_has_role() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/user_roles"))
            .and(query_param("user_id", "eq.u1"))
            .and(query_param("role", "eq.admin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"role": "admin"}])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/user_roles"))
            .and(query_param("user_id", "eq.u2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let store = store(&server);
        assert!(store.has_role("u1", "admin").await.unwrap());
        assert!(!store.has_role("u2", "admin").await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_client_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/drgreen_clients"))
            .and(query_param("on_conflict", "user_id"))
            .and(headers(
                "prefer",
                vec!["resolution=merge-duplicates", "return=minimal"],
            ))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "code": "23505",
                "message": "duplicate key value violates unique constraint",
                "details": "Key (drgreen_client_id)=(c1) already exists."
            })))
            .mount(&server)
            .await;

        let err = store(&server)
            .upsert_client(&ClientRecord::new("u1", "c1"))
            .await
            .unwrap_err();
        match err {
            StoreError::Duplicate(detail) => assert!(detail.contains("drgreen_client_id")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upsert_strain_omits_archive_flag() {
        let server = MockServer::start().await;
        let updated_at: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
        let strain = Strain {
            id: "s1".into(),
            sku: Some("SKU-1".into()),
            name: "Blue Dream".into(),
            description: None,
            strain_type: Some("Hybrid".into()),
            thc_content: Some(18.0),
            cbd_content: Some(0.5),
            cbg_content: None,
            retail_price: Some(9.5),
            availability: true,
            stock: Some(12),
            image_url: None,
            feelings: vec!["Relaxed".into()],
            flavors: vec![],
            helps_with: vec![],
            brand_name: None,
            is_archived: true,
            updated_at,
        };

        Mock::given(method("POST"))
            .and(path("/rest/v1/strains"))
            .and(query_param("on_conflict", "id"))
            .and(body_json(json!([{
                "id": "s1",
                "sku": "SKU-1",
                "name": "Blue Dream",
                "description": null,
                "type": "Hybrid",
                "thc_content": 18.0,
                "cbd_content": 0.5,
                "cbg_content": null,
                "retail_price": 9.5,
                "availability": true,
                "stock": 12,
                "image_url": null,
                "feelings": ["Relaxed"],
                "flavors": [],
                "helps_with": [],
                "brand_name": null,
                "updated_at": "2026-01-01T00:00:00Z"
            }])))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        store(&server).upsert_strain(&strain).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_auth_users_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/admin/users"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [{"id": "u1", "email": "A@example.com"}],
                "aud": "authenticated"
            })))
            .mount(&server)
            .await;

        let users = store(&server).list_auth_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].email.as_deref(), Some("A@example.com"));
    }

    #[tokio::test]
    async fn test_missing_service_key() {
        let server = MockServer::start().await;
        let store = SupabaseStore::new(Url::parse(&server.uri()).unwrap(), None);
        assert!(matches!(
            store.list_clients().await,
            Err(StoreError::NotConfigured(_))
        ));
    }
}
