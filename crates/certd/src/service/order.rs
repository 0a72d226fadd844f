//! Order lifecycle
//!
//! Creation posts a `newOrder` and persists the CA's view together with a
//! fresh certificate key and CSR. From there the order is advanced either
//! by operator commands (challenge / finalize / certificate) or by the
//! reconciler's sweeps, which call the same `advance_*` methods. Every
//! advance refetches the server's order state first, and every status
//! write goes through the monotone guard.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acme::{
    AcmeClient, Authorization, AuthorizationStatus, ChallengeStatus, Conversation, Identifier,
    JwsSigner, NewOrderRequest, OrderResponse, OrderStatus,
};
use crate::dns::{challenge_record, DnsChallengeRecord, TxtVerifier};
use crate::keys;
use crate::model::{advance_allowed, Account, Order, OrderState};
use crate::store::{AccountRepo, OrderRepo, RepoError};

use super::ServiceError;

/// Result of an order-creation request
#[derive(Debug)]
pub enum CreateOrderOutcome {
    Created { order: Order, response: OrderResponse },
    /// The CA returned an order URL we already track. Nothing was
    /// persisted.
    AlreadyExists { order_url: String },
}

/// Stored row, or the live CA view for orders still in flight
#[derive(Debug)]
pub enum OrderView {
    Stored(Order),
    Live {
        order: Order,
        response: OrderResponse,
    },
}

/// Result of the challenge flow
#[derive(Debug)]
pub enum ChallengeOutcome {
    /// The certificate is already issued; there is nothing to validate.
    AlreadyCompleted,
    Report(ChallengeReport),
}

/// What the challenge flow found and did
#[derive(Debug)]
pub struct ChallengeReport {
    /// Every pending authorization's record passed the local pre-check.
    pub pre_check_passed: bool,
    /// Challenges were signalled to the CA for validation.
    pub triggered: bool,
    pub authorizations: Vec<Authorization>,
    pub records: Vec<DnsChallengeRecord>,
}

/// Result of a certificate request
#[derive(Debug)]
pub enum CertificateOutcome {
    Issued(Order),
    /// The CA has not published a certificate URL for this order yet.
    NotReady { status: OrderStatus },
}

/// Authorization as reported by the CA, with the derived DNS records
#[derive(Debug)]
pub struct AuthorizationView {
    pub authorization: Authorization,
    pub records: Vec<DnsChallengeRecord>,
}

/// Order business rules
pub struct OrderService {
    acme: AcmeClient,
    accounts: Arc<dyn AccountRepo>,
    orders: Arc<dyn OrderRepo>,
    precheck: Arc<dyn TxtVerifier>,
}

impl OrderService {
    pub fn new(
        acme: AcmeClient,
        accounts: Arc<dyn AccountRepo>,
        orders: Arc<dyn OrderRepo>,
        precheck: Arc<dyn TxtVerifier>,
    ) -> Self {
        Self {
            acme,
            accounts,
            orders,
            precheck,
        }
    }

    pub fn orders(&self) -> &Arc<dyn OrderRepo> {
        &self.orders
    }

    /// Open a signed conversation for an account's stored key.
    async fn conversation(&self, account: &Account) -> Result<Conversation<'_>, ServiceError> {
        let key = keys::private_key_from_pem(&account.private_key)?;
        let signer = JwsSigner::for_account(key, account.url.clone());
        Ok(self.acme.conversation(signer).await?)
    }

    /// Create an order for `domains`. The CA hands back the same order URL
    /// for identical live identifiers, so the store is deduped on it.
    pub async fn create_order(
        &self,
        user_uuid: &str,
        domains: &[String],
    ) -> Result<CreateOrderOutcome, ServiceError> {
        let account = self.accounts.get_by_uuid(user_uuid).await?;
        let mut conversation = self.conversation(&account).await?;

        let request = NewOrderRequest {
            identifiers: domains.iter().map(|d| Identifier::dns(d.as_str())).collect(),
        };
        let (response, order_url) = conversation.new_order(&request).await?;

        if self.orders.exists_by_order_url(&order_url).await? {
            debug!(order_url = %order_url, "Order already tracked");
            return Ok(CreateOrderOutcome::AlreadyExists { order_url });
        }

        let certificate_key = tokio::task::spawn_blocking(keys::generate_rsa_key)
            .await
            .map_err(|_| ServiceError::KeygenAborted)??;
        let private_key_pem = keys::private_key_to_pem(&certificate_key)?;
        let csr = keys::build_csr(&certificate_key, domains, false)?;

        let order = Order {
            uuid: Uuid::new_v4().to_string(),
            account_uuid: user_uuid.to_string(),
            order_url: order_url.clone(),
            status: response.status,
            expires: response.expires.clone(),
            not_before: response.not_before.clone(),
            not_after: response.not_after.clone(),
            identifiers: response.identifiers.clone(),
            authorizations: response.authorizations.clone(),
            finalize: response.finalize.clone(),
            private_key: private_key_pem,
            csr,
            certificate: None,
            create_time: Utc::now().timestamp(),
        };

        match self.orders.create(&order).await {
            Ok(()) => {}
            // Lost a race with a sibling request for the same identifiers.
            Err(RepoError::Duplicate { .. }) => {
                return Ok(CreateOrderOutcome::AlreadyExists { order_url });
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            order_uuid = %order.uuid,
            order_url = %order_url,
            domains = ?domains,
            "Created certificate order"
        );

        Ok(CreateOrderOutcome::Created { order, response })
    }

    /// The stored order, refreshed from the CA while no certificate has
    /// been issued yet.
    pub async fn get_order(
        &self,
        user_uuid: &str,
        order_uuid: &str,
    ) -> Result<OrderView, ServiceError> {
        let order = self
            .orders
            .get_by_account_and_uuid(user_uuid, order_uuid)
            .await?;

        if order.is_issued() {
            return Ok(OrderView::Stored(order));
        }

        let account = self.accounts.get_by_uuid(user_uuid).await?;
        let mut conversation = self.conversation(&account).await?;
        let response = conversation.get_order(&order.order_url).await?;

        self.persist_status(&order, response.status).await?;

        Ok(OrderView::Live { order, response })
    }

    pub async fn list_orders(&self, user_uuid: &str) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders.list_by_account(user_uuid).await?)
    }

    /// Current CA view of every authorization, with the derived DNS
    /// records and their pre-check results.
    pub async fn authorizations(
        &self,
        user_uuid: &str,
        order_uuid: &str,
    ) -> Result<Vec<AuthorizationView>, ServiceError> {
        let order = self
            .orders
            .get_by_account_and_uuid(user_uuid, order_uuid)
            .await?;
        let account = self.accounts.get_by_uuid(user_uuid).await?;
        let mut conversation = self.conversation(&account).await?;

        let mut views = Vec::new();
        for authorization_url in &order.authorizations {
            let authorization = conversation.get_authorization(authorization_url).await?;
            let pending = authorization.status == AuthorizationStatus::Pending;

            let mut records = Vec::new();
            if pending {
                for challenge in authorization.challenges.iter().filter(|c| c.is_dns01()) {
                    let mut record = challenge_record(
                        &authorization.identifier.value,
                        &challenge.token,
                        challenge.status,
                        conversation.signer(),
                    )?;
                    record.verified = self.precheck_record(&record).await;
                    records.push(record);
                }
            }

            views.push(AuthorizationView {
                authorization,
                records,
            });

            if !pending {
                // The order has advanced (or failed) past this
                // authorization; later ones carry no actionable records.
                break;
            }
        }

        Ok(views)
    }

    /// The two-phase challenge flow: pre-check every pending
    /// authorization's TXT record, and only when all of them are visible
    /// signal the CA to validate.
    pub async fn run_challenge(
        &self,
        user_uuid: &str,
        order_uuid: &str,
    ) -> Result<ChallengeOutcome, ServiceError> {
        let order = self
            .orders
            .get_by_account_and_uuid(user_uuid, order_uuid)
            .await?;

        if order.is_issued() {
            return Ok(ChallengeOutcome::AlreadyCompleted);
        }

        let account = self.accounts.get_by_uuid(user_uuid).await?;
        let mut conversation = self.conversation(&account).await?;

        let report = self.challenge_phases(&mut conversation, &order).await?;
        Ok(ChallengeOutcome::Report(report))
    }

    /// Shared between the command surface and the pending sweep. The
    /// conversation already belongs to this order's nonce chain.
    async fn challenge_phases(
        &self,
        conversation: &mut Conversation<'_>,
        order: &Order,
    ) -> Result<ChallengeReport, ServiceError> {
        // Phase 1: derive and pre-check every pending record.
        let mut pre_check_passed = true;
        let mut authorizations = Vec::new();
        let mut records = Vec::new();

        for authorization_url in &order.authorizations {
            let authorization = conversation.get_authorization(authorization_url).await?;

            if authorization.status != AuthorizationStatus::Pending {
                pre_check_passed = false;
                authorizations.push(authorization);
                break;
            }

            for challenge in authorization.challenges.iter().filter(|c| c.is_dns01()) {
                if challenge.status != ChallengeStatus::Pending {
                    pre_check_passed = false;
                    continue;
                }

                let mut record = challenge_record(
                    &authorization.identifier.value,
                    &challenge.token,
                    challenge.status,
                    conversation.signer(),
                )?;
                record.verified = self.precheck_record(&record).await;

                if !record.verified {
                    pre_check_passed = false;
                }
                records.push(record);
            }

            authorizations.push(authorization);
        }

        if !pre_check_passed {
            debug!(
                order_uuid = %order.uuid,
                "TXT pre-check not satisfied; waiting for operator/propagation"
            );
            return Ok(ChallengeReport {
                pre_check_passed,
                triggered: false,
                authorizations,
                records,
            });
        }

        // Phase 2: every record is visible; signal the CA to validate.
        let mut triggered = false;
        for authorization_url in &order.authorizations {
            let authorization = conversation.get_authorization(authorization_url).await?;
            if authorization.status != AuthorizationStatus::Pending {
                continue;
            }

            for challenge in authorization
                .challenges
                .iter()
                .filter(|c| c.is_dns01() && c.status == ChallengeStatus::Pending)
            {
                let posted = conversation.post_challenge(&challenge.url).await?;
                info!(
                    order_uuid = %order.uuid,
                    domain = %authorization.identifier.value,
                    challenge_url = %challenge.url,
                    status = ?posted.status,
                    "Signalled CA to validate dns-01 challenge"
                );
                triggered = true;
            }
        }

        Ok(ChallengeReport {
            pre_check_passed,
            triggered,
            authorizations,
            records,
        })
    }

    async fn precheck_record(&self, record: &DnsChallengeRecord) -> bool {
        match self.precheck.verify(&record.fqdn, &record.value).await {
            Ok(found) => found,
            Err(e) => {
                warn!(fqdn = %record.fqdn, error = %e, "TXT pre-check lookup failed");
                false
            }
        }
    }

    /// Submit the stored CSR to the order's finalize URL. The CA rejects
    /// the request unless the order is `ready`; that rejection surfaces
    /// verbatim.
    pub async fn finalize(
        &self,
        user_uuid: &str,
        order_uuid: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self
            .orders
            .get_by_account_and_uuid(user_uuid, order_uuid)
            .await?;
        let account = self.accounts.get_by_uuid(user_uuid).await?;
        let mut conversation = self.conversation(&account).await?;

        let response = conversation.finalize(&order.finalize, &order.csr).await?;
        self.persist_status(&order, response.status).await?;

        info!(
            order_uuid = %order.uuid,
            status = %response.status,
            "Finalized order"
        );

        Ok(response)
    }

    /// The stored certificate, or download-and-persist when the CA has
    /// issued one since the last look.
    pub async fn certificate(
        &self,
        user_uuid: &str,
        order_uuid: &str,
    ) -> Result<CertificateOutcome, ServiceError> {
        let order = self
            .orders
            .get_by_account_and_uuid(user_uuid, order_uuid)
            .await?;

        if let OrderState::Valid(Some(_)) = order.state() {
            return Ok(CertificateOutcome::Issued(order));
        }

        let account = self.accounts.get_by_uuid(user_uuid).await?;
        let mut conversation = self.conversation(&account).await?;
        self.download_certificate(&mut conversation, &order).await
    }

    async fn download_certificate(
        &self,
        conversation: &mut Conversation<'_>,
        order: &Order,
    ) -> Result<CertificateOutcome, ServiceError> {
        let response = conversation.get_order(&order.order_url).await?;

        let Some(certificate_url) = response.certificate.as_deref() else {
            self.persist_status(order, response.status).await?;
            return Ok(CertificateOutcome::NotReady {
                status: response.status,
            });
        };

        let chain_pem = conversation.download_certificate(certificate_url).await?;
        let (not_before, not_after) = keys::certificate_validity(&chain_pem)?;

        self.orders
            .update_certificate(
                &order.uuid,
                &chain_pem,
                &not_before.to_rfc3339(),
                &not_after.to_rfc3339(),
            )
            .await?;

        info!(
            order_uuid = %order.uuid,
            not_before = %not_before,
            not_after = %not_after,
            "Stored issued certificate"
        );

        let stored = self
            .orders
            .get_by_account_and_uuid(&order.account_uuid, &order.uuid)
            .await?;
        Ok(CertificateOutcome::Issued(stored))
    }

    // =========================================================================
    // Reconciler entry points (one order, one conversation each)
    // =========================================================================

    /// Advance one locally-`pending` order: sync status with the CA, then
    /// run the challenge flow if it is still pending there.
    pub async fn advance_pending(&self, order: &Order) -> Result<(), ServiceError> {
        let account = self.accounts.get_by_uuid(&order.account_uuid).await?;
        let mut conversation = self.conversation(&account).await?;

        let response = conversation.get_order(&order.order_url).await?;
        if response.status != OrderStatus::Pending {
            self.persist_status(order, response.status).await?;
            return Ok(());
        }

        let report = self.challenge_phases(&mut conversation, order).await?;
        debug!(
            order_uuid = %order.uuid,
            pre_check_passed = report.pre_check_passed,
            triggered = report.triggered,
            "Pending sweep processed order"
        );
        Ok(())
    }

    /// Advance one locally-`ready` order: sync status with the CA, then
    /// submit the stored CSR.
    pub async fn advance_ready(&self, order: &Order) -> Result<(), ServiceError> {
        let account = self.accounts.get_by_uuid(&order.account_uuid).await?;
        let mut conversation = self.conversation(&account).await?;

        let response = conversation.get_order(&order.order_url).await?;
        if response.status != OrderStatus::Ready {
            self.persist_status(order, response.status).await?;
            return Ok(());
        }

        let finalized = conversation.finalize(&order.finalize, &order.csr).await?;
        self.persist_status(order, finalized.status).await?;

        info!(
            order_uuid = %order.uuid,
            status = %finalized.status,
            "Ready sweep finalized order"
        );
        Ok(())
    }

    /// Download the chain for one `valid` order that has no certificate
    /// stored yet.
    pub async fn advance_valid(&self, order: &Order) -> Result<(), ServiceError> {
        let account = self.accounts.get_by_uuid(&order.account_uuid).await?;
        let mut conversation = self.conversation(&account).await?;

        match self.download_certificate(&mut conversation, order).await? {
            CertificateOutcome::Issued(_) => {}
            CertificateOutcome::NotReady { status } => {
                debug!(
                    order_uuid = %order.uuid,
                    status = %status,
                    "Certificate URL not published yet"
                );
            }
        }
        Ok(())
    }

    /// Guarded status write: the caller's `next` comes from a fresh server
    /// fetch, but a slow sweep must still never rewind a row a faster
    /// conversation already advanced.
    async fn persist_status(&self, order: &Order, next: OrderStatus) -> Result<(), ServiceError> {
        if order.status == next {
            return Ok(());
        }

        let current = self
            .orders
            .get_by_account_and_uuid(&order.account_uuid, &order.uuid)
            .await?
            .status;

        if !advance_allowed(current, next) {
            warn!(
                order_uuid = %order.uuid,
                current = %current,
                next = %next,
                "Refusing status regression"
            );
            return Ok(());
        }

        if current != next {
            self.orders.update_status(&order.uuid, next).await?;
            info!(order_uuid = %order.uuid, from = %current, to = %next, "Order status updated");
        }
        Ok(())
    }
}
