//! Postgres-backed implementation of the persistence ports.

use async_trait::async_trait;
use aspi_core::{Credential, Granularity, PersistedRow};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::store::{
    AccountCategoryRecord, CredentialBinding, CredentialStore, Directory, PropertyRecord,
    ProviderRecord, RevenueStore, RunStatus, StoreError,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn table_for(granularity: Granularity) -> &'static str {
        match granularity {
            Granularity::Daily => "daily_actuals",
            Granularity::Monthly => "actuals",
        }
    }
}

fn provider_from_row(row: &PgRow) -> Result<ProviderRecord, sqlx::Error> {
    Ok(ProviderRecord {
        id: row.try_get("id")?,
        key: row.try_get("key")?,
        name: row.try_get("name")?,
        login_url: row.try_get("login_url")?,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl RevenueStore for PgStore {
    async fn upsert(&self, row: &PersistedRow) -> Result<(), StoreError> {
        let table = Self::table_for(row.granularity);
        let sql = format!(
            r#"
            INSERT INTO {table} (date, property_id, account_category_id, provider_id, amount, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (date, property_id, account_category_id, provider_id)
            DO UPDATE SET amount = EXCLUDED.amount,
                          updated_at = NOW()
            "#
        );
        sqlx::query(&sql)
            .bind(row.key.date)
            .bind(row.key.property_id)
            .bind(row.key.account_category_id)
            .bind(row.key.provider_id)
            .bind(row.amount)
            .execute(&self.pool)
            .await?;
        debug!(table, date = %row.key.date, amount = %row.amount, "upserted revenue row");
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn credential(
        &self,
        provider_id: Uuid,
        property_id: Uuid,
    ) -> Result<Option<Credential>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT username, password
              FROM provider_credentials
             WHERE provider_id = $1
               AND property_id = $2
            "#,
        )
        .bind(provider_id)
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Credential::new(
                row.try_get::<String, _>("username")?,
                row.try_get::<String, _>("password")?,
            ))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Directory for PgStore {
    async fn providers(&self) -> Result<Vec<ProviderRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, key, name, login_url, active
              FROM providers
             ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(provider_from_row).collect::<Result<_, _>>()?)
    }

    async fn provider_by_name(&self, name: &str) -> Result<Option<ProviderRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, key, name, login_url, active
              FROM providers
             WHERE LOWER(key) = LOWER($1)
                OR LOWER(name) = LOWER($1)
             ORDER BY active DESC
             LIMIT 1
            "#,
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(provider_from_row).transpose()?)
    }

    async fn property_by_name(&self, name: &str) -> Result<Option<PropertyRecord>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM properties WHERE LOWER(name) = LOWER($1) LIMIT 1")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(PropertyRecord {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            })),
            None => Ok(None),
        }
    }

    async fn account_category(
        &self,
        property_id: Uuid,
        name: &str,
    ) -> Result<Option<AccountCategoryRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, property_id, name
              FROM account_categories
             WHERE property_id = $1
               AND LOWER(name) = LOWER($2)
             LIMIT 1
            "#,
        )
        .bind(property_id)
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(AccountCategoryRecord {
                id: row.try_get("id")?,
                property_id: row.try_get("property_id")?,
                name: row.try_get("name")?,
            })),
            None => Ok(None),
        }
    }

    async fn credential_bindings(&self) -> Result<Vec<CredentialBinding>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT pr.id AS provider_id, pr.key AS provider_key, pr.name AS provider_name,
                   pr.active AS provider_active, p.id AS property_id, p.name AS property_name
              FROM provider_credentials c
              JOIN providers pr ON pr.id = c.provider_id
              JOIN properties p ON p.id = c.property_id
             ORDER BY pr.name, p.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(CredentialBinding {
                provider_id: row.try_get("provider_id")?,
                provider_key: row.try_get("provider_key")?,
                provider_name: row.try_get("provider_name")?,
                provider_active: row.try_get("provider_active")?,
                property_id: row.try_get("property_id")?,
                property_name: row.try_get("property_name")?,
            });
        }
        Ok(out)
    }

    async fn record_run_status(&self, provider_id: Uuid, status: &RunStatus) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE providers
               SET last_run_at = $2,
                   last_run_status = $3,
                   run_notes = $4
             WHERE id = $1
            "#,
        )
        .bind(provider_id)
        .bind(status.at)
        .bind(status.status.as_str())
        .bind(status.notes.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
