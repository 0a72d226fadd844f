//! Domain model
//!
//! Local rows for accounts and orders. The order `status` column is a cache
//! of the CA's view: it is refreshed from the server before every write and
//! must never move backwards ([`advance_allowed`]). The
//! "valid-but-no-certificate" window is made explicit by [`OrderState`],
//! where only the `Valid` arm can carry the issued chain.

use serde::{Deserialize, Serialize};

use crate::acme::{AccountStatus, Identifier, OrderStatus};

/// A registered ACME account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// External identifier chosen by the caller (unique)
    pub uuid: String,
    /// Contact URIs (`mailto:` form), serialized as JSON in the store
    pub contact: Vec<String>,
    pub terms_of_service_agreed: bool,
    /// PKCS#1 PEM RSA-4096 key; never mutated after creation. Not part of
    /// the API surface.
    #[serde(skip_serializing, default)]
    pub private_key: String,
    /// CA-assigned account state
    pub status: AccountStatus,
    /// CA-issued account URL; the JOSE `kid` for all signed requests
    pub url: String,
    /// Unix seconds
    pub create_time: i64,
}

/// A certificate order and its local protocol cache
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub uuid: String,
    pub account_uuid: String,
    /// CA-assigned order URL (unique across the store)
    pub order_url: String,
    pub status: OrderStatus,
    /// RFC 3339 strings echoed from the CA; `not_before`/`not_after`
    /// become authoritative only once `certificate` is set (parsed from
    /// the certificate itself).
    pub expires: Option<String>,
    pub not_before: Option<String>,
    pub not_after: Option<String>,
    /// `{type: "dns", value: <domain>}` pairs, JSON in the store
    pub identifiers: Vec<Identifier>,
    /// Authorization URLs, JSON in the store
    pub authorizations: Vec<String>,
    /// CA URL the CSR is POSTed to
    pub finalize: String,
    /// PKCS#1 PEM key for this certificate, distinct from the account key.
    /// Not part of the API surface.
    #[serde(skip_serializing, default)]
    pub private_key: String,
    /// base64url DER CSR, created together with `private_key`
    pub csr: String,
    /// PEM chain; write-once
    pub certificate: Option<String>,
    pub create_time: i64,
}

impl Order {
    /// The domains this order covers, in identifier order.
    pub fn domains(&self) -> Vec<String> {
        self.identifiers.iter().map(|i| i.value.clone()).collect()
    }

    pub fn is_issued(&self) -> bool {
        self.certificate.as_deref().is_some_and(|c| !c.is_empty())
    }

    /// Typed view of the cached protocol state.
    pub fn state(&self) -> OrderState {
        OrderState::from_parts(self.status, self.certificate.clone())
    }
}

/// Issued certificate material attached to a `valid` order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    pub chain_pem: String,
}

/// The order state machine, server-authoritative
///
/// `Valid(None)` is the explicit "validated but not yet downloaded" state;
/// the certificate payload appears only through [`OrderState::from_parts`]
/// once the chain has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderState {
    Pending,
    Ready,
    Processing,
    Valid(Option<IssuedCertificate>),
    Invalid,
}

impl OrderState {
    pub fn from_parts(status: OrderStatus, certificate: Option<String>) -> Self {
        match status {
            OrderStatus::Pending => OrderState::Pending,
            OrderStatus::Ready => OrderState::Ready,
            OrderStatus::Processing => OrderState::Processing,
            OrderStatus::Valid => OrderState::Valid(
                certificate
                    .filter(|c| !c.is_empty())
                    .map(|chain_pem| IssuedCertificate { chain_pem }),
            ),
            OrderStatus::Invalid => OrderState::Invalid,
        }
    }

    pub fn status(&self) -> OrderStatus {
        match self {
            OrderState::Pending => OrderStatus::Pending,
            OrderState::Ready => OrderStatus::Ready,
            OrderState::Processing => OrderStatus::Processing,
            OrderState::Valid(_) => OrderStatus::Valid,
            OrderState::Invalid => OrderStatus::Invalid,
        }
    }
}

/// Whether a persisted status may be replaced by `next`.
///
/// Writes always follow a fresh server fetch, so `next` is the CA's view:
/// forward progress and the terminal `invalid` are accepted; anything that
/// would rewind the cache is refused.
pub fn advance_allowed(current: OrderStatus, next: OrderStatus) -> bool {
    if next == current {
        return true;
    }
    if current.is_terminal() {
        return false;
    }
    next == OrderStatus::Invalid || next.rank() >= current.rank()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(status: OrderStatus, certificate: Option<&str>) -> Order {
        Order {
            uuid: "o-1".to_string(),
            account_uuid: "u-1".to_string(),
            order_url: "https://ca.test/acme/order/1".to_string(),
            status,
            expires: None,
            not_before: None,
            not_after: None,
            identifiers: vec![Identifier::dns("a.example.test")],
            authorizations: vec!["https://ca.test/acme/authz/1".to_string()],
            finalize: "https://ca.test/acme/finalize/1".to_string(),
            private_key: String::new(),
            csr: String::new(),
            certificate: certificate.map(|c| c.to_string()),
            create_time: 0,
        }
    }

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(advance_allowed(OrderStatus::Pending, OrderStatus::Ready));
        assert!(advance_allowed(OrderStatus::Ready, OrderStatus::Processing));
        assert!(advance_allowed(OrderStatus::Processing, OrderStatus::Valid));
        assert!(advance_allowed(OrderStatus::Pending, OrderStatus::Valid));
    }

    #[test]
    fn regressions_are_refused() {
        assert!(!advance_allowed(OrderStatus::Ready, OrderStatus::Pending));
        assert!(!advance_allowed(OrderStatus::Valid, OrderStatus::Processing));
        assert!(!advance_allowed(OrderStatus::Valid, OrderStatus::Pending));
    }

    #[test]
    fn invalid_wins_from_any_live_state() {
        assert!(advance_allowed(OrderStatus::Pending, OrderStatus::Invalid));
        assert!(advance_allowed(OrderStatus::Ready, OrderStatus::Invalid));
        assert!(advance_allowed(OrderStatus::Processing, OrderStatus::Invalid));
    }

    #[test]
    fn terminal_states_never_move() {
        assert!(!advance_allowed(OrderStatus::Valid, OrderStatus::Invalid));
        assert!(!advance_allowed(OrderStatus::Invalid, OrderStatus::Valid));
        assert!(advance_allowed(OrderStatus::Valid, OrderStatus::Valid));
    }

    #[test]
    fn same_status_is_a_no_op() {
        assert!(advance_allowed(OrderStatus::Pending, OrderStatus::Pending));
        assert!(advance_allowed(OrderStatus::Invalid, OrderStatus::Invalid));
    }

    #[test]
    fn valid_without_download_has_no_certificate_payload() {
        let state = order(OrderStatus::Valid, None).state();
        assert_eq!(state, OrderState::Valid(None));

        let state = order(OrderStatus::Valid, Some("")).state();
        assert_eq!(state, OrderState::Valid(None));
    }

    #[test]
    fn valid_with_chain_carries_it() {
        let state = order(OrderStatus::Valid, Some("-----BEGIN CERTIFICATE-----")).state();
        match state {
            OrderState::Valid(Some(cert)) => {
                assert!(cert.chain_pem.starts_with("-----BEGIN CERTIFICATE-----"));
            }
            other => panic!("expected issued state, got {other:?}"),
        }
    }

    #[test]
    fn non_valid_states_map_plainly() {
        assert_eq!(order(OrderStatus::Pending, None).state(), OrderState::Pending);
        assert_eq!(order(OrderStatus::Invalid, None).state(), OrderState::Invalid);
        assert_eq!(
            OrderState::Valid(None).status(),
            OrderStatus::Valid
        );
    }

    #[test]
    fn domains_follow_identifier_order() {
        let mut o = order(OrderStatus::Pending, None);
        o.identifiers = vec![
            Identifier::dns("b.example.test"),
            Identifier::dns("a.example.test"),
        ];
        assert_eq!(o.domains(), vec!["b.example.test", "a.example.test"]);
    }
}
