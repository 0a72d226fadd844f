//! Repository ports
//!
//! The core consumes persistence through two async traits so the protocol
//! and business layers never see SQL. [`mysql::MySqlStore`] is the
//! production implementation; [`memory::MemoryStore`] backs tests and
//! local experiments.
//!
//! All methods are single-row transactional: each call either fully
//! happens or fully fails, and callers may retry transient failures.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::acme::OrderStatus;
use crate::model::{Account, Order};

pub mod memory;
pub mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

/// Persistence failures
#[derive(Debug, Error)]
pub enum RepoError {
    /// No row for the requested key
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness rule was violated
    #[error("{entity} with {key} already exists")]
    Duplicate { entity: &'static str, key: String },

    /// A write-once column was already written
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored JSON blob could not be encoded or decoded
    #[error("stored value corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// Backend failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Account persistence port
#[async_trait]
pub trait AccountRepo: Send + Sync {
    async fn create(&self, account: &Account) -> Result<(), RepoError>;
    async fn get_by_uuid(&self, uuid: &str) -> Result<Account, RepoError>;
    async fn exists_by_uuid(&self, uuid: &str) -> Result<bool, RepoError>;
    /// Removes the local record only; no CA deactivation is performed.
    async fn delete(&self, uuid: &str) -> Result<(), RepoError>;
}

/// Order persistence port
#[async_trait]
pub trait OrderRepo: Send + Sync {
    /// Rejects a duplicate `order_url` with [`RepoError::Duplicate`].
    async fn create(&self, order: &Order) -> Result<(), RepoError>;
    async fn get_by_account_and_uuid(
        &self,
        account_uuid: &str,
        uuid: &str,
    ) -> Result<Order, RepoError>;
    async fn list_by_account(&self, account_uuid: &str) -> Result<Vec<Order>, RepoError>;
    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, RepoError>;
    /// Orders that reached `valid` but whose chain has not been downloaded.
    async fn list_valid_without_certificate(&self) -> Result<Vec<Order>, RepoError>;
    async fn exists_by_order_url(&self, order_url: &str) -> Result<bool, RepoError>;
    async fn update_status(&self, uuid: &str, status: OrderStatus) -> Result<(), RepoError>;
    /// Stores the chain and parsed validity, and moves the order to
    /// `valid`. The certificate column is write-once; a second write is a
    /// [`RepoError::Conflict`].
    async fn update_certificate(
        &self,
        uuid: &str,
        certificate_pem: &str,
        not_before: &str,
        not_after: &str,
    ) -> Result<(), RepoError>;
}

#[async_trait]
impl<T: AccountRepo + ?Sized> AccountRepo for Arc<T> {
    async fn create(&self, account: &Account) -> Result<(), RepoError> {
        (**self).create(account).await
    }
    async fn get_by_uuid(&self, uuid: &str) -> Result<Account, RepoError> {
        (**self).get_by_uuid(uuid).await
    }
    async fn exists_by_uuid(&self, uuid: &str) -> Result<bool, RepoError> {
        (**self).exists_by_uuid(uuid).await
    }
    async fn delete(&self, uuid: &str) -> Result<(), RepoError> {
        (**self).delete(uuid).await
    }
}

#[async_trait]
impl<T: OrderRepo + ?Sized> OrderRepo for Arc<T> {
    async fn create(&self, order: &Order) -> Result<(), RepoError> {
        (**self).create(order).await
    }
    async fn get_by_account_and_uuid(
        &self,
        account_uuid: &str,
        uuid: &str,
    ) -> Result<Order, RepoError> {
        (**self).get_by_account_and_uuid(account_uuid, uuid).await
    }
    async fn list_by_account(&self, account_uuid: &str) -> Result<Vec<Order>, RepoError> {
        (**self).list_by_account(account_uuid).await
    }
    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, RepoError> {
        (**self).list_by_status(status).await
    }
    async fn list_valid_without_certificate(&self) -> Result<Vec<Order>, RepoError> {
        (**self).list_valid_without_certificate().await
    }
    async fn exists_by_order_url(&self, order_url: &str) -> Result<bool, RepoError> {
        (**self).exists_by_order_url(order_url).await
    }
    async fn update_status(&self, uuid: &str, status: OrderStatus) -> Result<(), RepoError> {
        (**self).update_status(uuid, status).await
    }
    async fn update_certificate(
        &self,
        uuid: &str,
        certificate_pem: &str,
        not_before: &str,
        not_after: &str,
    ) -> Result<(), RepoError> {
        (**self)
            .update_certificate(uuid, certificate_pem, not_before, not_after)
            .await
    }
}
