//! ACME wire types (RFC 8555)
//!
//! Request payloads and response bodies exchanged with the CA. Field names
//! follow the protocol's camelCase JSON; unknown fields are ignored so the
//! client stays compatible with CA-specific extensions.

use serde::{Deserialize, Serialize};

/// Service-discovery document returned by the directory endpoint
/// (RFC 8555 §7.1.1).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,
    /// Absent when the CA does not implement pre-authorization.
    #[serde(default)]
    pub new_authz: Option<String>,
    #[serde(default)]
    pub revoke_cert: Option<String>,
    #[serde(default)]
    pub key_change: Option<String>,
    #[serde(default)]
    pub meta: Option<DirectoryMeta>,
}

/// Optional directory metadata
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
    #[serde(default)]
    pub terms_of_service: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub caa_identities: Vec<String>,
    #[serde(default)]
    pub external_account_required: bool,
}

/// Structured ACME problem document (RFC 8555 §6.7), returned with
/// `application/problem+json` on errors.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(default, rename = "type")]
    pub problem_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub subproblems: Vec<Subproblem>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Subproblem {
    #[serde(default, rename = "type")]
    pub problem_type: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub identifier: Option<Identifier>,
}

impl Problem {
    /// Whether this problem is the anti-replay rejection that warrants one
    /// retry with a fresh nonce.
    pub fn is_bad_nonce(&self) -> bool {
        self.problem_type
            .as_deref()
            .is_some_and(|t| t == "urn:ietf:params:acme:error:badNonce")
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.problem_type.as_deref().unwrap_or("unknown"),
            self.detail.as_deref().unwrap_or("no detail")
        )
    }
}

/// A resource to be authorized, always `{type: "dns", value: <domain>}` here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub identifier_type: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(domain: impl Into<String>) -> Self {
        Self {
            identifier_type: "dns".to_string(),
            value: domain.into(),
        }
    }
}

/// `newAccount` request payload (RFC 8555 §7.3)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccountRequest {
    pub contact: Vec<String>,
    pub terms_of_service_agreed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub only_return_existing: bool,
}

/// Account object returned by the CA
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub status: AccountStatus,
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default)]
    pub terms_of_service_agreed: bool,
    /// URL listing this account's orders, fetched via POST-as-GET.
    #[serde(default)]
    pub orders: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// CA-assigned account state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Valid => "valid",
            AccountStatus::Deactivated => "deactivated",
            AccountStatus::Revoked => "revoked",
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(AccountStatus::Valid),
            "deactivated" => Ok(AccountStatus::Deactivated),
            "revoked" => Ok(AccountStatus::Revoked),
            other => Err(format!("unknown account status '{other}'")),
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `newOrder` request payload (RFC 8555 §7.4)
#[derive(Debug, Clone, Serialize)]
pub struct NewOrderRequest {
    pub identifiers: Vec<Identifier>,
}

/// Order object returned by the CA
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub status: OrderStatus,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub not_before: Option<String>,
    #[serde(default)]
    pub not_after: Option<String>,
    pub identifiers: Vec<Identifier>,
    /// Authorization URLs, one per identifier.
    pub authorizations: Vec<String>,
    /// URL the CSR is POSTed to once every authorization is valid.
    pub finalize: String,
    /// Present once the order reaches `valid`.
    #[serde(default)]
    pub certificate: Option<String>,
}

/// Order state as reported by the CA (RFC 8555 §7.1.6)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Ready => "ready",
            OrderStatus::Processing => "processing",
            OrderStatus::Valid => "valid",
            OrderStatus::Invalid => "invalid",
        }
    }

    /// Position in the protocol's forward progression. `invalid` is a
    /// terminal error and ranks alongside `valid` so neither can be
    /// overwritten by an earlier state.
    pub fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Ready => 1,
            OrderStatus::Processing => 2,
            OrderStatus::Valid => 3,
            OrderStatus::Invalid => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Valid | OrderStatus::Invalid)
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "ready" => Ok(OrderStatus::Ready),
            "processing" => Ok(OrderStatus::Processing),
            "valid" => Ok(OrderStatus::Valid),
            "invalid" => Ok(OrderStatus::Invalid),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization object (RFC 8555 §7.1.4)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub expires: Option<String>,
    pub challenges: Vec<AcmeChallenge>,
    #[serde(default)]
    pub wildcard: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// A single validation method offered within an authorization
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcmeChallenge {
    /// Challenge type, e.g. `dns-01`.
    #[serde(rename = "type")]
    pub challenge_type: String,
    pub status: ChallengeStatus,
    pub url: String,
    pub token: String,
    #[serde(default)]
    pub validated: Option<String>,
    #[serde(default)]
    pub error: Option<Problem>,
}

impl AcmeChallenge {
    pub fn is_dns01(&self) -> bool {
        self.challenge_type == "dns-01"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// `finalize` request payload: the CSR as base64url DER, no padding.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizePayload {
    pub csr: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lets_encrypt_directory() {
        let body = r#"{
            "newNonce": "https://ca.test/acme/new-nonce",
            "newAccount": "https://ca.test/acme/new-acct",
            "newOrder": "https://ca.test/acme/new-order",
            "revokeCert": "https://ca.test/acme/revoke-cert",
            "keyChange": "https://ca.test/acme/key-change",
            "meta": {
                "termsOfService": "https://ca.test/terms",
                "website": "https://ca.test",
                "caaIdentities": ["ca.test"],
                "externalAccountRequired": false
            }
        }"#;

        let dir: Directory = serde_json::from_str(body).unwrap();
        assert_eq!(dir.new_nonce, "https://ca.test/acme/new-nonce");
        assert_eq!(dir.new_order, "https://ca.test/acme/new-order");
        assert!(dir.new_authz.is_none());
        let meta = dir.meta.unwrap();
        assert_eq!(meta.caa_identities, vec!["ca.test"]);
        assert!(!meta.external_account_required);
    }

    #[test]
    fn parses_order_response() {
        let body = r#"{
            "status": "pending",
            "expires": "2026-08-09T00:00:00Z",
            "identifiers": [{"type": "dns", "value": "a.example.test"}],
            "authorizations": ["https://ca.test/acme/authz/1"],
            "finalize": "https://ca.test/acme/finalize/1"
        }"#;

        let order: OrderResponse = serde_json::from_str(body).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.identifiers[0], Identifier::dns("a.example.test"));
        assert!(order.certificate.is_none());
    }

    #[test]
    fn parses_authorization_with_challenges() {
        let body = r#"{
            "identifier": {"type": "dns", "value": "a.example.test"},
            "status": "pending",
            "expires": "2026-08-09T00:00:00Z",
            "challenges": [
                {
                    "type": "dns-01",
                    "status": "pending",
                    "url": "https://ca.test/acme/chall/1",
                    "token": "tok-1"
                },
                {
                    "type": "http-01",
                    "status": "pending",
                    "url": "https://ca.test/acme/chall/2",
                    "token": "tok-2"
                }
            ]
        }"#;

        let authz: Authorization = serde_json::from_str(body).unwrap();
        assert_eq!(authz.status, AuthorizationStatus::Pending);
        let dns: Vec<_> = authz.challenges.iter().filter(|c| c.is_dns01()).collect();
        assert_eq!(dns.len(), 1);
        assert_eq!(dns[0].token, "tok-1");
    }

    #[test]
    fn bad_nonce_problem_detected() {
        let problem: Problem = serde_json::from_str(
            r#"{"type": "urn:ietf:params:acme:error:badNonce", "detail": "stale nonce"}"#,
        )
        .unwrap();
        assert!(problem.is_bad_nonce());

        let other: Problem = serde_json::from_str(
            r#"{"type": "urn:ietf:params:acme:error:rateLimited", "detail": "slow down"}"#,
        )
        .unwrap();
        assert!(!other.is_bad_nonce());
    }

    #[test]
    fn order_status_round_trips_through_strings() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Ready,
            OrderStatus::Processing,
            OrderStatus::Valid,
            OrderStatus::Invalid,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn new_account_request_omits_only_return_existing_when_false() {
        let req = NewAccountRequest {
            contact: vec!["mailto:ops@example.test".to_string()],
            terms_of_service_agreed: true,
            only_return_existing: false,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("onlyReturnExisting"));
        assert!(json.contains("termsOfServiceAgreed"));
    }
}
