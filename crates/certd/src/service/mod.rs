//! Business rules over the protocol client and the repositories
//!
//! - [`account`] - account registration and lookup
//! - [`order`] - order lifecycle: creation, authorization views, the
//!   two-phase challenge flow, finalize, certificate retrieval
//!
//! Services own no HTTP-framework types; the command surface in
//! [`crate::http`] adapts requests onto them, and the reconciler drives
//! the same order methods on a timer.

use thiserror::Error;

use crate::acme::{AcmeError, SigningError};
use crate::dns::PrecheckError;
use crate::keys::CryptoError;
use crate::store::RepoError;

pub mod account;
pub mod order;

pub use account::{AccountService, RegisterOutcome};
pub use order::{
    AuthorizationView, CertificateOutcome, ChallengeOutcome, ChallengeReport, CreateOrderOutcome,
    OrderService, OrderView,
};

/// Failures surfaced by the service layer
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Acme(#[from] AcmeError),

    #[error(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Precheck(#[from] PrecheckError),

    /// Key generation task was cancelled by runtime shutdown
    #[error("background key generation aborted")]
    KeygenAborted,
}
