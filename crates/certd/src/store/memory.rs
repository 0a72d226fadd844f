//! In-memory repositories
//!
//! Backs the integration tests and local experiments with the same port
//! semantics as the MySQL store, including duplicate-orderUrl rejection
//! and the write-once certificate rule.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AccountRepo, OrderRepo, RepoError};
use crate::acme::OrderStatus;
use crate::model::{Account, Order};

/// HashMap-backed store implementing both repository ports.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, Account>>,
    orders: RwLock<HashMap<String, Order>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepo for MemoryStore {
    async fn create(&self, account: &Account) -> Result<(), RepoError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.uuid) {
            return Err(RepoError::Duplicate {
                entity: "account",
                key: format!("uuid '{}'", account.uuid),
            });
        }
        accounts.insert(account.uuid.clone(), account.clone());
        Ok(())
    }

    async fn get_by_uuid(&self, uuid: &str) -> Result<Account, RepoError> {
        self.accounts
            .read()
            .await
            .get(uuid)
            .cloned()
            .ok_or_else(|| RepoError::NotFound {
                entity: "account",
                id: uuid.to_string(),
            })
    }

    async fn exists_by_uuid(&self, uuid: &str) -> Result<bool, RepoError> {
        Ok(self.accounts.read().await.contains_key(uuid))
    }

    async fn delete(&self, uuid: &str) -> Result<(), RepoError> {
        self.accounts.write().await.remove(uuid);
        Ok(())
    }
}

#[async_trait]
impl OrderRepo for MemoryStore {
    async fn create(&self, order: &Order) -> Result<(), RepoError> {
        let mut orders = self.orders.write().await;
        if orders.values().any(|o| o.order_url == order.order_url) {
            return Err(RepoError::Duplicate {
                entity: "order",
                key: format!("order_url '{}'", order.order_url),
            });
        }
        orders.insert(order.uuid.clone(), order.clone());
        Ok(())
    }

    async fn get_by_account_and_uuid(
        &self,
        account_uuid: &str,
        uuid: &str,
    ) -> Result<Order, RepoError> {
        self.orders
            .read()
            .await
            .get(uuid)
            .filter(|o| o.account_uuid == account_uuid)
            .cloned()
            .ok_or_else(|| RepoError::NotFound {
                entity: "order",
                id: uuid.to_string(),
            })
    }

    async fn list_by_account(&self, account_uuid: &str) -> Result<Vec<Order>, RepoError> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.account_uuid == account_uuid)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.create_time);
        Ok(orders)
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, RepoError> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.create_time);
        Ok(orders)
    }

    async fn list_valid_without_certificate(&self) -> Result<Vec<Order>, RepoError> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.status == OrderStatus::Valid && !o.is_issued())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.create_time);
        Ok(orders)
    }

    async fn exists_by_order_url(&self, order_url: &str) -> Result<bool, RepoError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .any(|o| o.order_url == order_url))
    }

    async fn update_status(&self, uuid: &str, status: OrderStatus) -> Result<(), RepoError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(uuid).ok_or_else(|| RepoError::NotFound {
            entity: "order",
            id: uuid.to_string(),
        })?;
        order.status = status;
        Ok(())
    }

    async fn update_certificate(
        &self,
        uuid: &str,
        certificate_pem: &str,
        not_before: &str,
        not_after: &str,
    ) -> Result<(), RepoError> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(uuid).ok_or_else(|| RepoError::NotFound {
            entity: "order",
            id: uuid.to_string(),
        })?;

        if order.is_issued() {
            return Err(RepoError::Conflict(format!(
                "certificate for order '{uuid}' already written"
            )));
        }

        order.certificate = Some(certificate_pem.to_string());
        order.not_before = Some(not_before.to_string());
        order.not_after = Some(not_after.to_string());
        order.status = OrderStatus::Valid;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::Identifier;

    fn account(uuid: &str) -> Account {
        Account {
            uuid: uuid.to_string(),
            contact: vec!["mailto:ops@example.test".to_string()],
            terms_of_service_agreed: true,
            private_key: "key".to_string(),
            status: crate::acme::AccountStatus::Valid,
            url: format!("https://ca.test/acme/acct/{uuid}"),
            create_time: 1,
        }
    }

    fn order(uuid: &str, order_url: &str, status: OrderStatus) -> Order {
        Order {
            uuid: uuid.to_string(),
            account_uuid: "u1".to_string(),
            order_url: order_url.to_string(),
            status,
            expires: None,
            not_before: None,
            not_after: None,
            identifiers: vec![Identifier::dns("a.example.test")],
            authorizations: vec!["https://ca.test/acme/authz/1".to_string()],
            finalize: "https://ca.test/acme/finalize/1".to_string(),
            private_key: "key".to_string(),
            csr: "csr".to_string(),
            certificate: None,
            create_time: 1,
        }
    }

    #[tokio::test]
    async fn account_round_trip() {
        let store = MemoryStore::new();
        AccountRepo::create(&store, &account("u1")).await.unwrap();

        assert!(AccountRepo::exists_by_uuid(&store, "u1").await.unwrap());
        assert_eq!(store.get_by_uuid("u1").await.unwrap().uuid, "u1");

        AccountRepo::delete(&store, "u1").await.unwrap();
        assert!(!AccountRepo::exists_by_uuid(&store, "u1").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_account_uuid_rejected() {
        let store = MemoryStore::new();
        AccountRepo::create(&store, &account("u1")).await.unwrap();
        assert!(matches!(
            AccountRepo::create(&store, &account("u1")).await,
            Err(RepoError::Duplicate { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_order_url_rejected() {
        let store = MemoryStore::new();
        OrderRepo::create(&store, &order("o1", "https://ca.test/acme/order/1", OrderStatus::Pending))
            .await
            .unwrap();

        let err = OrderRepo::create(
            &store,
            &order("o2", "https://ca.test/acme/order/1", OrderStatus::Pending),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RepoError::Duplicate { .. }));

        assert!(store
            .exists_by_order_url("https://ca.test/acme/order/1")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn status_listing_and_update() {
        let store = MemoryStore::new();
        OrderRepo::create(&store, &order("o1", "url-1", OrderStatus::Pending))
            .await
            .unwrap();
        OrderRepo::create(&store, &order("o2", "url-2", OrderStatus::Ready))
            .await
            .unwrap();

        assert_eq!(store.list_by_status(OrderStatus::Pending).await.unwrap().len(), 1);

        store.update_status("o1", OrderStatus::Ready).await.unwrap();
        assert_eq!(store.list_by_status(OrderStatus::Ready).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn certificate_is_write_once() {
        let store = MemoryStore::new();
        OrderRepo::create(&store, &order("o1", "url-1", OrderStatus::Valid))
            .await
            .unwrap();

        assert_eq!(store.list_valid_without_certificate().await.unwrap().len(), 1);

        store
            .update_certificate("o1", "PEM", "2026-08-01T00:00:00+00:00", "2026-10-30T00:00:00+00:00")
            .await
            .unwrap();

        assert!(store.list_valid_without_certificate().await.unwrap().is_empty());

        let err = store
            .update_certificate("o1", "PEM-2", "x", "y")
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));

        let stored = store.get_by_account_and_uuid("u1", "o1").await.unwrap();
        assert_eq!(stored.certificate.as_deref(), Some("PEM"));
        assert_eq!(stored.status, OrderStatus::Valid);
    }
}
