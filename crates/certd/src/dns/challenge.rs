//! DNS-01 challenge record derivation (RFC 8555 §8.4)
//!
//! The record the operator must publish is:
//!
//! ```text
//! _acme-challenge.<domain>.  TXT  base64url(SHA-256(keyAuthorization))
//! ```
//!
//! where `keyAuthorization = token + "." + base64url(thumbprint(accountKey))`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::acme::{ChallengeStatus, JwsSigner, SigningError};

/// Build the key authorization for a challenge token with the account key.
pub fn key_authorization(token: &str, signer: &JwsSigner) -> Result<String, SigningError> {
    Ok(format!("{}.{}", token, signer.thumbprint()?))
}

/// The TXT owner name for a domain's challenge, with trailing dot. A
/// wildcard label is dropped: `*.example.com` is proven via the base
/// domain's record.
pub fn challenge_fqdn(domain: &str) -> String {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    format!("_acme-challenge.{base}.")
}

/// The TXT record value: base64url SHA-256 of the key authorization, no
/// padding.
pub fn txt_value(key_authorization: &str) -> String {
    let digest = Sha256::digest(key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// One derived DNS challenge record, as reported to operators
#[derive(Debug, Clone, Serialize)]
pub struct DnsChallengeRecord {
    /// Domain under validation
    pub domain: String,
    /// TXT owner name (`_acme-challenge.<domain>.`)
    pub fqdn: String,
    #[serde(rename = "type")]
    pub record_type: &'static str,
    /// Expected TXT value
    pub value: String,
    /// CA-issued challenge token
    pub token: String,
    /// Challenge status as last reported by the CA
    pub status: ChallengeStatus,
    /// Whether the local pre-check found the record
    pub verified: bool,
}

/// Derive the full record for one domain's dns-01 challenge.
pub fn challenge_record(
    domain: &str,
    token: &str,
    status: ChallengeStatus,
    signer: &JwsSigner,
) -> Result<DnsChallengeRecord, SigningError> {
    let key_auth = key_authorization(token, signer)?;

    Ok(DnsChallengeRecord {
        domain: domain.to_string(),
        fqdn: challenge_fqdn(domain),
        record_type: "TXT",
        value: txt_value(&key_auth),
        token: token.to_string(),
        status,
        verified: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    fn test_signer() -> JwsSigner {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        JwsSigner::for_account(key, "https://ca.test/acme/acct/1")
    }

    #[test]
    fn fqdn_has_prefix_and_trailing_dot() {
        assert_eq!(challenge_fqdn("a.example.test"), "_acme-challenge.a.example.test.");
        assert_eq!(
            challenge_fqdn("deep.sub.example.test"),
            "_acme-challenge.deep.sub.example.test."
        );
    }

    #[test]
    fn wildcard_uses_base_domain() {
        assert_eq!(challenge_fqdn("*.example.test"), "_acme-challenge.example.test.");
    }

    #[test]
    fn key_authorization_is_token_dot_thumbprint() {
        let signer = test_signer();
        let key_auth = key_authorization("tok-123", &signer).unwrap();

        let (token, thumb) = key_auth.split_once('.').unwrap();
        assert_eq!(token, "tok-123");
        assert_eq!(thumb, signer.thumbprint().unwrap());
    }

    #[test]
    fn txt_value_is_unpadded_base64url_sha256() {
        let value = txt_value("token.thumbprint");

        // SHA-256 is 32 bytes; base64url without padding is 43 characters.
        assert_eq!(value.len(), 43);
        assert!(!value.contains('+'));
        assert!(!value.contains('/'));
        assert!(!value.contains('='));

        // Deterministic, and sensitive to the input.
        assert_eq!(value, txt_value("token.thumbprint"));
        assert_ne!(value, txt_value("token.other-thumbprint"));
    }

    #[test]
    fn challenge_record_derivation() {
        let signer = test_signer();
        let record =
            challenge_record("a.example.test", "tok-9", ChallengeStatus::Pending, &signer).unwrap();

        assert_eq!(record.domain, "a.example.test");
        assert_eq!(record.fqdn, "_acme-challenge.a.example.test.");
        assert_eq!(record.record_type, "TXT");
        assert_eq!(record.token, "tok-9");
        assert!(!record.verified);

        let key_auth = key_authorization("tok-9", &signer).unwrap();
        assert_eq!(record.value, txt_value(&key_auth));
    }
}
