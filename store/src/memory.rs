use crate::models::{AuthUser, ClientRecord, Strain};
use crate::{Store, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

#[derive(Default)]
struct Tables {
    strains: HashMap<String, Strain>,
    // keyed by user_id
    clients: HashMap<String, ClientRecord>,
    users: Vec<AuthUser>,
    tokens: HashMap<String, String>,
    roles: HashSet<(String, String)>,
}

/// In-process store with the same uniqueness rules as the database tables.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: &str, email: &str, token: Option<&str>) {
        let mut tables = self.tables.write();
        tables.users.push(AuthUser {
            id: id.to_string(),
            email: Some(email.to_string()),
        });
        if let Some(token) = token {
            tables.tokens.insert(token.to_string(), id.to_string());
        }
    }

    pub fn add_role(&self, user_id: &str, role: &str) {
        self.tables
            .write()
            .roles
            .insert((user_id.to_string(), role.to_string()));
    }

    pub fn strain_count(&self) -> usize {
        self.tables.read().strains.len()
    }

    pub fn client_count(&self) -> usize {
        self.tables.read().clients.len()
    }

    /// Sets a strain's archive flag, as an operator would in the database.
    pub fn archive_strain(&self, id: &str) {
        if let Some(strain) = self.tables.write().strains.get_mut(id) {
            strain.is_archived = true;
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn verify_token(&self, token: &str) -> Result<Option<AuthUser>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .tokens
            .get(token)
            .and_then(|user_id| tables.users.iter().find(|u| &u.id == user_id))
            .cloned())
    }

    async fn has_role(&self, user_id: &str, role: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .read()
            .roles
            .contains(&(user_id.to_string(), role.to_string())))
    }

    async fn list_auth_users(&self) -> Result<Vec<AuthUser>, StoreError> {
        Ok(self.tables.read().users.clone())
    }

    async fn latest_strain_update(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .tables
            .read()
            .strains
            .values()
            .map(|s| s.updated_at)
            .max())
    }

    async fn get_strain(&self, id: &str) -> Result<Option<Strain>, StoreError> {
        Ok(self.tables.read().strains.get(id).cloned())
    }

    async fn upsert_strain(&self, strain: &Strain) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let is_archived = tables
            .strains
            .get(&strain.id)
            .map(|existing| existing.is_archived)
            .unwrap_or(false);
        let mut row = strain.clone();
        row.is_archived = is_archived;
        tables.strains.insert(row.id.clone(), row);
        Ok(())
    }

    async fn list_clients(&self) -> Result<Vec<ClientRecord>, StoreError> {
        let mut clients: Vec<_> = self.tables.read().clients.values().cloned().collect();
        clients.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(clients)
    }

    async fn find_client_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<ClientRecord>, StoreError> {
        Ok(self.tables.read().clients.get(user_id).cloned())
    }

    async fn find_client_by_drgreen_id(
        &self,
        drgreen_client_id: &str,
    ) -> Result<Option<ClientRecord>, StoreError> {
        Ok(self
            .tables
            .read()
            .clients
            .values()
            .find(|c| c.drgreen_client_id == drgreen_client_id)
            .cloned())
    }

    async fn upsert_client(&self, client: &ClientRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let taken = tables.clients.values().any(|existing| {
            existing.drgreen_client_id == client.drgreen_client_id
                && existing.user_id != client.user_id
        });
        if taken {
            return Err(StoreError::Duplicate("drgreen_client_id".into()));
        }
        tables
            .clients
            .insert(client.user_id.clone(), client.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn strain(id: &str, name: &str, thc: f64) -> Strain {
        Strain {
            id: id.into(),
            sku: None,
            name: name.into(),
            description: None,
            strain_type: None,
            thc_content: Some(thc),
            cbd_content: None,
            cbg_content: None,
            retail_price: None,
            availability: true,
            stock: None,
            image_url: None,
            feelings: vec![],
            flavors: vec![],
            helps_with: vec![],
            brand_name: None,
            is_archived: false,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_strain_upsert_converges() {
        let store = MemoryStore::new();
        store.upsert_strain(&strain("s1", "First", 10.0)).await.unwrap();
        store.upsert_strain(&strain("s1", "Second", 20.0)).await.unwrap();

        assert_eq!(store.strain_count(), 1);
        let row = store.get_strain("s1").await.unwrap().unwrap();
        assert_eq!(row.name, "Second");
        assert_eq!(row.thc_content, Some(20.0));
    }

    #[tokio::test]
    async fn test_archive_flag_survives_upsert() {
        let store = MemoryStore::new();
        store.upsert_strain(&strain("s1", "First", 10.0)).await.unwrap();
        store.archive_strain("s1");
        store.upsert_strain(&strain("s1", "First", 11.0)).await.unwrap();
        assert!(store.get_strain("s1").await.unwrap().unwrap().is_archived);
    }

    #[tokio::test]
    async fn test_latest_strain_update() {
        let store = MemoryStore::new();
        assert_eq!(store.latest_strain_update().await.unwrap(), None);

        let mut old = strain("s1", "Old", 1.0);
        old.updated_at = Utc::now() - Duration::hours(2);
        let new = strain("s2", "New", 1.0);
        store.upsert_strain(&old).await.unwrap();
        store.upsert_strain(&new).await.unwrap();

        assert_eq!(
            store.latest_strain_update().await.unwrap(),
            Some(new.updated_at)
        );
    }

    #[tokio::test]
    async fn test_client_uniqueness() {
        let store = MemoryStore::new();
        store
            .upsert_client(&ClientRecord::new("u1", "c1"))
            .await
            .unwrap();

        // Same user, new upstream id replaces the mapping
        store
            .upsert_client(&ClientRecord::new("u1", "c2"))
            .await
            .unwrap();
        assert_eq!(store.client_count(), 1);
        assert!(store.find_client_by_drgreen_id("c1").await.unwrap().is_none());

        // Another user cannot claim the same upstream id
        let err = store
            .upsert_client(&ClientRecord::new("u2", "c2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }
}
