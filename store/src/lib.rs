//! Local relational store holding the strain and client projections, plus
//! the auth lookups needed to authorize admin jobs.

pub mod auth;
pub mod config;
pub mod memory;
pub mod models;
pub mod supabase;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{AuthUser, ClientRecord, Strain};

pub use auth::{Access, AuthError, authorize};
pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store is not configured: {0}")]
    NotConfigured(String),
    #[error("a record with the same {0} already exists")]
    Duplicate(String),
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("store returned {status}: {message}")]
    Status {
        status: http::StatusCode,
        message: String,
    },
    #[error("could not decode store response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid store URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Resolves a bearer token to a user. `Ok(None)` means the token is invalid.
    async fn verify_token(&self, token: &str) -> Result<Option<AuthUser>, StoreError>;

    async fn has_role(&self, user_id: &str, role: &str) -> Result<bool, StoreError>;

    async fn list_auth_users(&self) -> Result<Vec<AuthUser>, StoreError>;

    /// Most recent `updated_at` across all strain rows.
    async fn latest_strain_update(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn get_strain(&self, id: &str) -> Result<Option<Strain>, StoreError>;

    /// Insert-or-update keyed by `id`; `is_archived` of an existing row is kept.
    async fn upsert_strain(&self, strain: &Strain) -> Result<(), StoreError>;

    async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError>;

    async fn find_client_by_user(&self, user_id: &str)
    -> Result<Option<ClientRecord>, StoreError>;

    async fn find_client_by_drgreen_id(
        &self,
        drgreen_client_id: &str,
    ) -> Result<Option<ClientRecord>, StoreError>;

    /// Insert-or-update keyed by `user_id`. Fails with `Duplicate` if another
    /// user already owns the same `drgreen_client_id`.
    async fn upsert_client(&self, client: &ClientRecord) -> Result<(), StoreError>;
}
