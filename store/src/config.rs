use crate::{MemoryStore, Store, SupabaseStore};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

pub const SERVICE_ROLE_KEY_ENV: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const SUPABASE_URL_ENV: &str = "SUPABASE_URL";

#[derive(Clone, Deserialize, Debug, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    Supabase { url: Url },
    /// Process-local store, for development only.
    #[default]
    Memory,
}

/// Builds the configured store. The Supabase service key and an optional URL
/// override are read from the environment.
pub fn get_store(config: &StoreConfig) -> Arc<dyn Store> {
    match config {
        StoreConfig::Supabase { url } => {
            let url = std::env::var(SUPABASE_URL_ENV)
                .ok()
                .and_then(|value| Url::parse(&value).ok())
                .unwrap_or_else(|| url.clone());
            let service_key = std::env::var(SERVICE_ROLE_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty());
            if service_key.is_none() {
                tracing::error!("{SERVICE_ROLE_KEY_ENV} is not set, store calls will fail");
            }
            Arc::new(SupabaseStore::new(url, service_key))
        }
        StoreConfig::Memory => {
            tracing::warn!("Using the in-memory store. This is unsafe for production use.");
            Arc::new(MemoryStore::new())
        }
    }
}
