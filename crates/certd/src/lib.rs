//! certd - ACME v2 certificate management daemon
//!
//! Obtains and renews X.509 certificates from an ACME v2 CA (RFC 8555)
//! using the DNS-01 challenge flow. Operators drive it through a small
//! HTTP command API; a background reconciler advances every persisted
//! order toward an issued certificate.
//!
//! # Architecture
//!
//! - [`acme`] - the protocol client: wire types, JOSE signing, nonce-chained
//!   conversations
//! - [`dns`] - DNS-01 record derivation and the local TXT pre-check
//! - [`keys`] - RSA-4096 keys, PKCS#1 PEM, CSR construction
//! - [`model`] - account/order rows and the order state machine
//! - [`store`] - repository ports with MySQL and in-memory implementations
//! - [`service`] - business rules over client and repositories
//! - [`reconciler`] - the periodic sweep driver
//! - [`http`] - the axum command surface

pub mod acme;
pub mod dns;
pub mod http;
pub mod keys;
pub mod model;
pub mod reconciler;
pub mod service;
pub mod store;

pub use reconciler::Reconciler;
