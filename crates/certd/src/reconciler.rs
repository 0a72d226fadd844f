//! Background order reconciler
//!
//! Runs three sweeps per tick, in order:
//!
//! 1. **pending** - sync with the CA, pre-check TXT records and signal
//!    challenges once the records are visible
//! 2. **ready** - submit the stored CSR to the finalize URL
//! 3. **valid without certificate** - download and persist the chain
//!
//! Orders are independent: each gets its own conversation (nonce chain),
//! and a failure on one order never stops its siblings. Sweeps run
//! sequentially in one task, so a tick never overlaps itself; a slow tick
//! simply delays the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::acme::OrderStatus;
use crate::model::Order;
use crate::service::{OrderService, ServiceError};

/// Periodic driver advancing persisted orders through the protocol state
/// machine.
pub struct Reconciler {
    orders: Arc<OrderService>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(orders: Arc<OrderService>, interval: Duration) -> Self {
        Self { orders, interval }
    }

    /// Run until `shutdown` is cancelled. Cancellation is observed between
    /// orders, so a tick stops within the order it is currently driving.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting order reconciler"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Reconciler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick(&shutdown).await;
                }
            }
        }
    }

    /// One full pass: the three sweeps in protocol order.
    pub async fn tick(&self, shutdown: &CancellationToken) {
        debug!("Reconciler tick");
        self.sweep_pending(shutdown).await;
        self.sweep_ready(shutdown).await;
        self.sweep_certificates(shutdown).await;
    }

    async fn sweep_pending(&self, shutdown: &CancellationToken) {
        let orders = match self.orders.orders().list_by_status(OrderStatus::Pending).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "Failed to list pending orders");
                return;
            }
        };

        self.drive(shutdown, "pending", orders, |order| {
            let service = Arc::clone(&self.orders);
            async move { service.advance_pending(&order).await }
        })
        .await;
    }

    async fn sweep_ready(&self, shutdown: &CancellationToken) {
        let orders = match self.orders.orders().list_by_status(OrderStatus::Ready).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "Failed to list ready orders");
                return;
            }
        };

        self.drive(shutdown, "ready", orders, |order| {
            let service = Arc::clone(&self.orders);
            async move { service.advance_ready(&order).await }
        })
        .await;
    }

    async fn sweep_certificates(&self, shutdown: &CancellationToken) {
        let orders = match self.orders.orders().list_valid_without_certificate().await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "Failed to list valid orders without certificate");
                return;
            }
        };

        self.drive(shutdown, "certificate", orders, |order| {
            let service = Arc::clone(&self.orders);
            async move { service.advance_valid(&order).await }
        })
        .await;
    }

    /// Process a sweep's orders sequentially; log-and-continue on per-order
    /// failures.
    async fn drive<F, Fut>(
        &self,
        shutdown: &CancellationToken,
        sweep: &'static str,
        orders: Vec<Order>,
        advance: F,
    ) where
        F: Fn(Order) -> Fut,
        Fut: std::future::Future<Output = Result<(), ServiceError>>,
    {
        if orders.is_empty() {
            return;
        }

        debug!(sweep = sweep, count = orders.len(), "Sweep started");

        for order in orders {
            if shutdown.is_cancelled() {
                debug!(sweep = sweep, "Sweep interrupted by shutdown");
                return;
            }

            let order_uuid = order.uuid.clone();
            if let Err(e) = advance(order).await {
                error!(
                    sweep = sweep,
                    order_uuid = %order_uuid,
                    error = %e,
                    "Failed to advance order; continuing with next"
                );
            }
        }
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::AcmeClient;
    use crate::dns::TxtPrecheck;
    use crate::store::MemoryStore;

    fn service() -> Arc<OrderService> {
        let store = Arc::new(MemoryStore::new());
        Arc::new(OrderService::new(
            AcmeClient::new("https://ca.test/directory").unwrap(),
            store.clone(),
            store,
            Arc::new(TxtPrecheck::new(&["1.1.1.1:53".to_string()]).unwrap()),
        ))
    }

    #[tokio::test]
    async fn tick_with_empty_store_is_quiet() {
        let reconciler = Reconciler::new(service(), Duration::from_secs(180));
        // No orders anywhere: the tick must not touch the network.
        reconciler.tick(&CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let reconciler = Reconciler::new(service(), Duration::from_secs(3600));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(reconciler.run(shutdown.clone()));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reconciler did not stop after cancellation")
            .unwrap();
    }
}
