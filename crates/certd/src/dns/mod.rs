//! DNS-01 challenge engine
//!
//! - [`challenge`] - key-authorization and TXT record derivation
//! - [`precheck`] - local verification that the operator has published the
//!   record, gating the signal to the CA

pub mod challenge;
pub mod precheck;

pub use challenge::{
    challenge_fqdn, challenge_record, key_authorization, txt_value, DnsChallengeRecord,
};
pub use precheck::{normalize_resolver, PrecheckError, TxtPrecheck, TxtVerifier};
