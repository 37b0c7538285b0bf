//! Persistence and credential ports, with an in-memory implementation.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use aspi_core::{Credential, Granularity, JobStatus, PersistedRow, RowKey};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("row rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderRecord {
    pub id: Uuid,
    /// Adapter registry key, e.g. `a8net`.
    pub key: String,
    pub name: String,
    pub login_url: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyRecord {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountCategoryRecord {
    pub id: Uuid,
    pub property_id: Uuid,
    pub name: String,
}

/// A stored (provider, property) login pair, without the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialBinding {
    pub provider_id: Uuid,
    pub provider_key: String,
    pub provider_name: String,
    pub provider_active: bool,
    pub property_id: Uuid,
    pub property_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    pub at: DateTime<Utc>,
    pub status: JobStatus,
    pub notes: Option<String>,
}

impl RunStatus {
    pub const NOTES_LIMIT: usize = 500;

    pub fn new(at: DateTime<Utc>, status: JobStatus, notes: Option<&str>) -> Self {
        Self {
            at,
            status,
            notes: notes.map(|n| n.chars().take(Self::NOTES_LIMIT).collect()),
        }
    }
}

/// Idempotent revenue row writer. A second upsert for the same key replaces the amount.
#[async_trait]
pub trait RevenueStore: Send + Sync {
    async fn upsert(&self, row: &PersistedRow) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential(
        &self,
        provider_id: Uuid,
        property_id: Uuid,
    ) -> Result<Option<Credential>, StoreError>;
}

/// Read access used when resolving jobs, plus the provider run-status update.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn providers(&self) -> Result<Vec<ProviderRecord>, StoreError>;
    async fn provider_by_name(&self, name: &str) -> Result<Option<ProviderRecord>, StoreError>;
    async fn property_by_name(&self, name: &str) -> Result<Option<PropertyRecord>, StoreError>;
    async fn account_category(
        &self,
        property_id: Uuid,
        name: &str,
    ) -> Result<Option<AccountCategoryRecord>, StoreError>;
    async fn credential_bindings(&self) -> Result<Vec<CredentialBinding>, StoreError>;
    async fn record_run_status(&self, provider_id: Uuid, status: &RunStatus) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    providers: Vec<ProviderRecord>,
    properties: Vec<PropertyRecord>,
    categories: Vec<AccountCategoryRecord>,
    credentials: BTreeMap<(Uuid, Uuid), Credential>,
    daily: BTreeMap<RowKey, Decimal>,
    monthly: BTreeMap<RowKey, Decimal>,
    run_statuses: HashMap<Uuid, RunStatus>,
    rejected_dates: HashSet<NaiveDate>,
    upserts: usize,
}

/// Process-local store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_provider(&self, key: &str, name: &str) -> ProviderRecord {
        let record = ProviderRecord {
            id: Uuid::new_v4(),
            key: key.to_string(),
            name: name.to_string(),
            login_url: None,
            active: true,
        };
        self.state.lock().await.providers.push(record.clone());
        record
    }

    pub async fn set_provider_active(&self, provider_id: Uuid, active: bool) {
        let mut state = self.state.lock().await;
        if let Some(p) = state.providers.iter_mut().find(|p| p.id == provider_id) {
            p.active = active;
        }
    }

    pub async fn add_property(&self, name: &str) -> PropertyRecord {
        let record = PropertyRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.state.lock().await.properties.push(record.clone());
        record
    }

    pub async fn add_category(&self, property_id: Uuid, name: &str) -> AccountCategoryRecord {
        let record = AccountCategoryRecord {
            id: Uuid::new_v4(),
            property_id,
            name: name.to_string(),
        };
        self.state.lock().await.categories.push(record.clone());
        record
    }

    pub async fn add_credential(&self, provider_id: Uuid, property_id: Uuid, credential: Credential) {
        self.state
            .lock()
            .await
            .credentials
            .insert((provider_id, property_id), credential);
    }

    /// Makes every upsert for `date` fail, to exercise row-level persistence errors.
    pub async fn reject_date(&self, date: NaiveDate) {
        self.state.lock().await.rejected_dates.insert(date);
    }

    pub async fn amount(&self, granularity: Granularity, key: &RowKey) -> Option<Decimal> {
        let state = self.state.lock().await;
        match granularity {
            Granularity::Daily => state.daily.get(key).copied(),
            Granularity::Monthly => state.monthly.get(key).copied(),
        }
    }

    pub async fn rows(&self, granularity: Granularity) -> Vec<(RowKey, Decimal)> {
        let state = self.state.lock().await;
        let table = match granularity {
            Granularity::Daily => &state.daily,
            Granularity::Monthly => &state.monthly,
        };
        table.iter().map(|(k, v)| (*k, *v)).collect()
    }

    pub async fn upsert_count(&self) -> usize {
        self.state.lock().await.upserts
    }

    pub async fn run_status(&self, provider_id: Uuid) -> Option<RunStatus> {
        self.state.lock().await.run_statuses.get(&provider_id).cloned()
    }
}

#[async_trait]
impl RevenueStore for MemoryStore {
    async fn upsert(&self, row: &PersistedRow) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.rejected_dates.contains(&row.key.date) {
            return Err(StoreError::Rejected(format!("date {} is rejected", row.key.date)));
        }
        state.upserts += 1;
        let table = match row.granularity {
            Granularity::Daily => &mut state.daily,
            Granularity::Monthly => &mut state.monthly,
        };
        table.insert(row.key, row.amount);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn credential(
        &self,
        provider_id: Uuid,
        property_id: Uuid,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .credentials
            .get(&(provider_id, property_id))
            .cloned())
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn providers(&self) -> Result<Vec<ProviderRecord>, StoreError> {
        Ok(self.state.lock().await.providers.clone())
    }

    async fn provider_by_name(&self, name: &str) -> Result<Option<ProviderRecord>, StoreError> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .state
            .lock()
            .await
            .providers
            .iter()
            .find(|p| p.key.to_lowercase() == needle || p.name.to_lowercase() == needle)
            .cloned())
    }

    async fn property_by_name(&self, name: &str) -> Result<Option<PropertyRecord>, StoreError> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .state
            .lock()
            .await
            .properties
            .iter()
            .find(|p| p.name.to_lowercase() == needle)
            .cloned())
    }

    async fn account_category(
        &self,
        property_id: Uuid,
        name: &str,
    ) -> Result<Option<AccountCategoryRecord>, StoreError> {
        let needle = name.trim().to_lowercase();
        Ok(self
            .state
            .lock()
            .await
            .categories
            .iter()
            .find(|c| c.property_id == property_id && c.name.to_lowercase() == needle)
            .cloned())
    }

    async fn credential_bindings(&self) -> Result<Vec<CredentialBinding>, StoreError> {
        let state = self.state.lock().await;
        let mut out = Vec::new();
        for (provider_id, property_id) in state.credentials.keys() {
            let provider = state.providers.iter().find(|p| p.id == *provider_id);
            let property = state.properties.iter().find(|p| p.id == *property_id);
            if let (Some(provider), Some(property)) = (provider, property) {
                out.push(CredentialBinding {
                    provider_id: provider.id,
                    provider_key: provider.key.clone(),
                    provider_name: provider.name.clone(),
                    provider_active: provider.active,
                    property_id: property.id,
                    property_name: property.name.clone(),
                });
            }
        }
        out.sort_by(|a, b| {
            (a.provider_name.as_str(), a.property_name.as_str())
                .cmp(&(b.provider_name.as_str(), b.property_name.as_str()))
        });
        Ok(out)
    }

    async fn record_run_status(&self, provider_id: Uuid, status: &RunStatus) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .run_statuses
            .insert(provider_id, status.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key: RowKey, amount: i64) -> PersistedRow {
        PersistedRow {
            key,
            granularity: Granularity::Daily,
            amount: Decimal::from(amount),
        }
    }

    fn key() -> RowKey {
        RowKey {
            date: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            property_id: Uuid::new_v4(),
            account_category_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn upsert_is_last_write_wins() {
        let store = MemoryStore::new();
        let key = key();
        store.upsert(&row(key, 100)).await.unwrap();
        store.upsert(&row(key, 250)).await.unwrap();

        let rows = store.rows(Granularity::Daily).await;
        assert_eq!(rows, vec![(key, Decimal::from(250))]);
        assert!(store.rows(Granularity::Monthly).await.is_empty());
    }

    #[tokio::test]
    async fn rejected_dates_fail_without_touching_the_table() {
        let store = MemoryStore::new();
        let key = key();
        store.reject_date(key.date).await;
        assert!(matches!(
            store.upsert(&row(key, 1)).await,
            Err(StoreError::Rejected(_))
        ));
        assert_eq!(store.upsert_count().await, 0);
    }

    #[tokio::test]
    async fn names_resolve_case_insensitively() {
        let store = MemoryStore::new();
        let provider = store.add_provider("a8net", "A8.net").await;
        let property = store.add_property("Blog One").await;
        let category = store.add_category(property.id, "Affiliate Income").await;
        store
            .add_credential(provider.id, property.id, Credential::new("u", "p"))
            .await;

        assert_eq!(store.provider_by_name("a8.NET").await.unwrap(), Some(provider.clone()));
        assert_eq!(store.property_by_name("blog one").await.unwrap(), Some(property.clone()));
        assert_eq!(
            store.account_category(property.id, "affiliate income").await.unwrap(),
            Some(category)
        );
        let bindings = store.credential_bindings().await.unwrap();
        assert_eq!(bindings.len(), 1);
        assert_eq!(bindings[0].provider_key, "a8net");
    }

    #[test]
    fn run_notes_are_truncated() {
        let long = "x".repeat(800);
        let status = RunStatus::new(Utc::now(), JobStatus::Failed, Some(&long));
        assert_eq!(status.notes.map(|n| n.len()), Some(RunStatus::NOTES_LIMIT));
    }
}
