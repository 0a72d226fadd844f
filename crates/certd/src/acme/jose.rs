//! JOSE envelope construction for ACME requests
//!
//! Every request after the directory/new-nonce fetch is a flattened JWS
//! signed with the account key (RS256). The protected header carries the
//! target `url`, the current `nonce`, and exactly one of `jwk` (newAccount
//! only) or `kid` (the CA-issued account URL, for everything else).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// JWS construction failure
#[derive(Debug, Error)]
pub enum SigningError {
    /// Header or payload could not be serialized
    #[error("failed to encode JWS component: {0}")]
    Encode(#[from] serde_json::Error),

    /// The RSA signing operation itself failed
    #[error("RS256 signing failed: {0}")]
    Sign(#[from] rsa::signature::Error),
}

/// RSA public key as a JWK (RFC 7517)
///
/// Field order is the RFC 7638 canonical order (`e`, `kty`, `n`); serde
/// serializes in declaration order, so `canonical_json` is just the plain
/// serialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub e: String,
    pub kty: String,
    pub n: String,
}

impl Jwk {
    /// Build the JWK for an RSA public key.
    pub fn from_rsa_public(key: &RsaPublicKey) -> Self {
        Self {
            e: URL_SAFE_NO_PAD.encode(key.e().to_bytes_be()),
            kty: "RSA".to_string(),
            n: URL_SAFE_NO_PAD.encode(key.n().to_bytes_be()),
        }
    }

    /// RFC 7638 thumbprint: base64url(SHA-256(canonical JWK JSON)), no
    /// padding.
    pub fn thumbprint(&self) -> Result<String, SigningError> {
        let canonical = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&canonical);
        Ok(URL_SAFE_NO_PAD.encode(digest))
    }
}

/// Flattened JWS JSON serialization (RFC 7515 §7.2.1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlattenedJws {
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

#[derive(Serialize)]
struct ProtectedHeader<'a> {
    alg: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<&'a Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<&'a str>,
    nonce: &'a str,
    url: &'a str,
}

/// Signs ACME request bodies with an account (or registration) key.
///
/// Before the CA has issued an account URL the signer embeds the public key
/// as `jwk`; once the URL is known it is carried as `kid` instead.
pub struct JwsSigner {
    key: RsaPrivateKey,
    jwk: Jwk,
    key_id: Option<String>,
}

impl JwsSigner {
    /// Signer for a key not yet registered with the CA (`jwk` mode).
    pub fn for_registration(key: RsaPrivateKey) -> Self {
        let jwk = Jwk::from_rsa_public(&key.to_public_key());
        Self {
            key,
            jwk,
            key_id: None,
        }
    }

    /// Signer for a registered account (`kid` mode).
    pub fn for_account(key: RsaPrivateKey, account_url: impl Into<String>) -> Self {
        let jwk = Jwk::from_rsa_public(&key.to_public_key());
        Self {
            key,
            jwk,
            key_id: Some(account_url.into()),
        }
    }

    /// Switch to `kid` mode after the CA assigns the account URL.
    pub fn set_key_id(&mut self, account_url: impl Into<String>) {
        self.key_id = Some(account_url.into());
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// The signer's public key as a JWK.
    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// RFC 7638 thumbprint of the signing key, as used by the DNS-01
    /// key authorization.
    pub fn thumbprint(&self) -> Result<String, SigningError> {
        self.jwk.thumbprint()
    }

    /// Sign `payload` for `url`, consuming `nonce`. An empty payload
    /// produces the POST-as-GET form (`"payload": ""`).
    pub fn sign(&self, url: &str, nonce: &str, payload: &str) -> Result<String, SigningError> {
        let header = ProtectedHeader {
            alg: "RS256",
            jwk: if self.key_id.is_none() {
                Some(&self.jwk)
            } else {
                None
            },
            kid: self.key_id.as_deref(),
            nonce,
            url,
        };

        let protected = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload.as_bytes());

        let signing_input = format!("{protected}.{payload_b64}");
        let signing_key = SigningKey::<Sha256>::new(self.key.clone());
        let signature = signing_key.try_sign(signing_input.as_bytes())?;

        let jws = FlattenedJws {
            protected,
            payload: payload_b64,
            signature: URL_SAFE_NO_PAD.encode(signature.to_bytes()),
        };

        Ok(serde_json::to_string(&jws)?)
    }
}

impl std::fmt::Debug for JwsSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwsSigner")
            .field("key_id", &self.key_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::VerifyingKey;
    use rsa::signature::Verifier;

    fn test_key() -> RsaPrivateKey {
        // 2048 bits keeps test runtime reasonable; production keys are 4096.
        RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap()
    }

    fn decode_header(jws_json: &str) -> serde_json::Value {
        let jws: FlattenedJws = serde_json::from_str(jws_json).unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(jws.protected).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn rfc7638_thumbprint_vector() {
        // The RSA example key from RFC 7638 §3.1.
        let jwk = Jwk {
            e: "AQAB".to_string(),
            kty: "RSA".to_string(),
            n: "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw"
                .to_string(),
        };

        assert_eq!(
            jwk.thumbprint().unwrap(),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn registration_signer_embeds_jwk_never_kid() {
        let signer = JwsSigner::for_registration(test_key());
        let jws = signer
            .sign("https://ca.test/acme/new-acct", "nonce-1", "{}")
            .unwrap();

        let header = decode_header(&jws);
        assert_eq!(header["alg"], "RS256");
        assert_eq!(header["nonce"], "nonce-1");
        assert_eq!(header["url"], "https://ca.test/acme/new-acct");
        assert!(header.get("jwk").is_some());
        assert!(header.get("kid").is_none());
        assert_eq!(header["jwk"]["kty"], "RSA");
    }

    #[test]
    fn account_signer_carries_kid_never_jwk() {
        let signer = JwsSigner::for_account(test_key(), "https://ca.test/acme/acct/17");
        let jws = signer
            .sign("https://ca.test/acme/order/5", "nonce-2", "")
            .unwrap();

        let header = decode_header(&jws);
        assert_eq!(header["kid"], "https://ca.test/acme/acct/17");
        assert!(header.get("jwk").is_none());
    }

    #[test]
    fn post_as_get_payload_is_empty_string() {
        let signer = JwsSigner::for_account(test_key(), "https://ca.test/acme/acct/17");
        let jws_json = signer
            .sign("https://ca.test/acme/order/5", "nonce-3", "")
            .unwrap();

        let jws: FlattenedJws = serde_json::from_str(&jws_json).unwrap();
        assert_eq!(jws.payload, "");
    }

    #[test]
    fn signature_verifies_over_signing_input() {
        let key = test_key();
        let verifying_key = VerifyingKey::<Sha256>::new(key.to_public_key());

        let signer = JwsSigner::for_account(key, "https://ca.test/acme/acct/17");
        let jws_json = signer
            .sign("https://ca.test/acme/chall/9", "nonce-4", "{}")
            .unwrap();
        let jws: FlattenedJws = serde_json::from_str(&jws_json).unwrap();

        let signing_input = format!("{}.{}", jws.protected, jws.payload);
        let signature_bytes = URL_SAFE_NO_PAD.decode(jws.signature).unwrap();
        let signature = rsa::pkcs1v15::Signature::try_from(signature_bytes.as_slice()).unwrap();

        verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .unwrap();
    }

    #[test]
    fn set_key_id_switches_modes() {
        let mut signer = JwsSigner::for_registration(test_key());
        assert!(signer.key_id().is_none());

        signer.set_key_id("https://ca.test/acme/acct/42");
        let jws = signer
            .sign("https://ca.test/acme/new-order", "nonce-5", "{}")
            .unwrap();
        let header = decode_header(&jws);
        assert_eq!(header["kid"], "https://ca.test/acme/acct/42");
        assert!(header.get("jwk").is_none());
    }
}
