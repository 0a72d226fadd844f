//! MySQL repositories (sqlx)
//!
//! Two tables, `account` and `order` (see `schema.sql`); `identifiers`,
//! `authorizations` and `contact` are JSON-encoded text blobs, timestamps
//! are unix seconds. The pool is bounded by the configured
//! `maxIdleConns`/`maxOpenConns`.

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tracing::info;

use certd_config::DatabaseConfig;

use super::{AccountRepo, OrderRepo, RepoError};
use crate::acme::OrderStatus;
use crate::model::{Account, Order};

/// sqlx-backed store implementing both repository ports.
#[derive(Debug, Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    /// Connect and size the pool from configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, RepoError> {
        let pool = MySqlPoolOptions::new()
            .min_connections(config.max_idle_conns)
            .max_connections(config.max_open_conns)
            .connect(&config.source)
            .await?;

        info!(
            max_open = config.max_open_conns,
            max_idle = config.max_idle_conns,
            "Connected to MySQL"
        );

        Ok(Self { pool })
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

fn account_from_row(row: &sqlx::mysql::MySqlRow) -> Result<Account, RepoError> {
    let contact_json: String = row.try_get("contact")?;
    let status: String = row.try_get("status")?;

    Ok(Account {
        uuid: row.try_get("uuid")?,
        contact: serde_json::from_str(&contact_json)?,
        terms_of_service_agreed: row.try_get("terms_of_service_agreed")?,
        private_key: row.try_get("private_key")?,
        status: status
            .parse()
            .map_err(|e: String| RepoError::Conflict(e))?,
        url: row.try_get("url")?,
        create_time: row.try_get("create_time")?,
    })
}

fn order_from_row(row: &sqlx::mysql::MySqlRow) -> Result<Order, RepoError> {
    let identifiers_json: String = row.try_get("identifiers")?;
    let authorizations_json: String = row.try_get("authorizations")?;
    let status: String = row.try_get("status")?;
    let certificate: Option<String> = row.try_get("certificate")?;

    Ok(Order {
        uuid: row.try_get("uuid")?,
        account_uuid: row.try_get("account_uuid")?,
        order_url: row.try_get("order_url")?,
        status: status
            .parse()
            .map_err(|e: String| RepoError::Conflict(e))?,
        expires: row.try_get("expires")?,
        not_before: row.try_get("not_before")?,
        not_after: row.try_get("not_after")?,
        identifiers: serde_json::from_str(&identifiers_json)?,
        authorizations: serde_json::from_str(&authorizations_json)?,
        finalize: row.try_get("finalize")?,
        private_key: row.try_get("private_key")?,
        csr: row.try_get("csr")?,
        certificate: certificate.filter(|c| !c.is_empty()),
        create_time: row.try_get("create_time")?,
    })
}

#[async_trait]
impl AccountRepo for MySqlStore {
    async fn create(&self, account: &Account) -> Result<(), RepoError> {
        let contact = serde_json::to_string(&account.contact)?;

        sqlx::query(
            "INSERT INTO `account` \
             (uuid, contact, terms_of_service_agreed, private_key, status, url, create_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&account.uuid)
        .bind(&contact)
        .bind(account.terms_of_service_agreed)
        .bind(&account.private_key)
        .bind(account.status.as_str())
        .bind(&account.url)
        .bind(account.create_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_uuid(&self, uuid: &str) -> Result<Account, RepoError> {
        let row = sqlx::query("SELECT * FROM `account` WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::NotFound {
                entity: "account",
                id: uuid.to_string(),
            })?;

        account_from_row(&row)
    }

    async fn exists_by_uuid(&self, uuid: &str) -> Result<bool, RepoError> {
        let row = sqlx::query("SELECT 1 FROM `account` WHERE uuid = ? LIMIT 1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn delete(&self, uuid: &str) -> Result<(), RepoError> {
        sqlx::query("DELETE FROM `account` WHERE uuid = ?")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderRepo for MySqlStore {
    async fn create(&self, order: &Order) -> Result<(), RepoError> {
        if self.exists_by_order_url(&order.order_url).await? {
            return Err(RepoError::Duplicate {
                entity: "order",
                key: format!("order_url '{}'", order.order_url),
            });
        }

        let identifiers = serde_json::to_string(&order.identifiers)?;
        let authorizations = serde_json::to_string(&order.authorizations)?;

        sqlx::query(
            "INSERT INTO `order` \
             (uuid, account_uuid, order_url, status, expires, not_before, not_after, \
              identifiers, authorizations, finalize, private_key, csr, certificate, create_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&order.uuid)
        .bind(&order.account_uuid)
        .bind(&order.order_url)
        .bind(order.status.as_str())
        .bind(&order.expires)
        .bind(&order.not_before)
        .bind(&order.not_after)
        .bind(&identifiers)
        .bind(&authorizations)
        .bind(&order.finalize)
        .bind(&order.private_key)
        .bind(&order.csr)
        .bind(order.certificate.as_deref().unwrap_or(""))
        .bind(order.create_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_by_account_and_uuid(
        &self,
        account_uuid: &str,
        uuid: &str,
    ) -> Result<Order, RepoError> {
        let row = sqlx::query("SELECT * FROM `order` WHERE account_uuid = ? AND uuid = ?")
            .bind(account_uuid)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RepoError::NotFound {
                entity: "order",
                id: uuid.to_string(),
            })?;

        order_from_row(&row)
    }

    async fn list_by_account(&self, account_uuid: &str) -> Result<Vec<Order>, RepoError> {
        let rows = sqlx::query("SELECT * FROM `order` WHERE account_uuid = ?")
            .bind(account_uuid)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, RepoError> {
        let rows = sqlx::query("SELECT * FROM `order` WHERE status = ?")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn list_valid_without_certificate(&self) -> Result<Vec<Order>, RepoError> {
        let rows = sqlx::query(
            "SELECT * FROM `order` WHERE status = 'valid' \
             AND (certificate IS NULL OR certificate = '')",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn exists_by_order_url(&self, order_url: &str) -> Result<bool, RepoError> {
        let row = sqlx::query("SELECT 1 FROM `order` WHERE order_url = ? LIMIT 1")
            .bind(order_url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn update_status(&self, uuid: &str, status: OrderStatus) -> Result<(), RepoError> {
        let result = sqlx::query("UPDATE `order` SET status = ? WHERE uuid = ?")
            .bind(status.as_str())
            .bind(uuid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound {
                entity: "order",
                id: uuid.to_string(),
            });
        }
        Ok(())
    }

    async fn update_certificate(
        &self,
        uuid: &str,
        certificate_pem: &str,
        not_before: &str,
        not_after: &str,
    ) -> Result<(), RepoError> {
        // The write-once rule is enforced in SQL so concurrent sweeps
        // cannot both land.
        let result = sqlx::query(
            "UPDATE `order` \
             SET certificate = ?, not_before = ?, not_after = ?, status = 'valid' \
             WHERE uuid = ? AND (certificate IS NULL OR certificate = '')",
        )
        .bind(certificate_pem)
        .bind(not_before)
        .bind(not_after)
        .bind(uuid)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::Conflict(format!(
                "certificate for order '{uuid}' already written or order missing"
            )));
        }
        Ok(())
    }
}
