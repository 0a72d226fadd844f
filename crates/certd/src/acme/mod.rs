//! ACME v2 protocol client (RFC 8555)
//!
//! The protocol core, independent of persistence and of the HTTP command
//! surface:
//!
//! - [`types`] - wire types for the directory, accounts, orders,
//!   authorizations, challenges and problem documents
//! - [`jose`] - JWK thumbprints and the flattened-JWS signer (RS256)
//! - [`client`] - [`AcmeClient`] and per-nonce-chain [`Conversation`]s
//! - [`error`] - the transport/protocol error taxonomy
//!
//! All signed traffic flows through a [`Conversation`], which threads each
//! response's `Replay-Nonce` into the next request and retries a `badNonce`
//! rejection exactly once.

pub mod client;
pub mod error;
pub mod jose;
pub mod types;

pub use client::{AcmeClient, Conversation};
pub use error::AcmeError;
pub use jose::{Jwk, JwsSigner, SigningError};
pub use types::{
    AccountResponse, AccountStatus, AcmeChallenge, Authorization, AuthorizationStatus,
    ChallengeStatus, Directory, Identifier, NewAccountRequest, NewOrderRequest, OrderResponse,
    OrderStatus, Problem,
};
