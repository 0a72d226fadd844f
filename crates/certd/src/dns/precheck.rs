//! Local TXT pre-check
//!
//! Before asking the CA to validate a dns-01 challenge, certd queries
//! recursive resolvers itself and only signals the CA once the expected
//! record is visible. A miss is a wait signal (the operator has not
//! published the record, or it has not propagated), never a hard failure.
//!
//! Resolver selection: the configured list when non-empty, otherwise the
//! system resolvers from `/etc/resolv.conf`, otherwise public recursors.
//! Queries go out over UDP with a 10 second timeout; each resolver is also
//! registered over TCP so truncated answers are retried there.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{
    NameServerConfig, ResolverConfig, ResolverOpts, ServerOrderingStrategy,
};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Per-nameserver query timeout
const DNS_TIMEOUT: Duration = Duration::from_secs(10);

/// Public recursors used when no resolvers are configured and the system
/// configuration cannot be read.
const FALLBACK_RESOLVERS: [&str; 2] = ["1.1.1.1:53", "8.8.8.8:53"];

/// Errors raised while building the resolver or performing lookups
#[derive(Debug, Error)]
pub enum PrecheckError {
    /// A configured resolver address could not be parsed
    #[error("invalid resolver address '{address}'")]
    InvalidResolver { address: String },

    /// The DNS lookup failed for a reason other than an absent record
    #[error("TXT lookup for '{fqdn}' failed: {message}")]
    Lookup { fqdn: String, message: String },
}

/// Ensure a resolver address carries a port, defaulting to 53.
pub fn normalize_resolver(address: &str) -> Result<SocketAddr, PrecheckError> {
    let candidate = address.trim();
    if let Ok(addr) = candidate.parse::<SocketAddr>() {
        return Ok(addr);
    }
    format!("{candidate}:53")
        .parse()
        .map_err(|_| PrecheckError::InvalidResolver {
            address: address.to_string(),
        })
}

/// Port for TXT verification, so the challenge flow can be exercised
/// without live DNS.
#[async_trait]
pub trait TxtVerifier: Send + Sync {
    /// `Ok(true)` when the record is visible with the expected value,
    /// `Ok(false)` when it is absent or different (a wait signal).
    async fn verify(&self, fqdn: &str, expected: &str) -> Result<bool, PrecheckError>;
}

/// Verifies published TXT records against the expected challenge value.
#[derive(Debug)]
pub struct TxtPrecheck {
    resolver: TokioResolver,
}

impl TxtPrecheck {
    /// Build a pre-checker over the configured resolver list. An empty
    /// list falls back to `/etc/resolv.conf`, then to public recursors.
    pub fn new(resolvers: &[String]) -> Result<Self, PrecheckError> {
        let (config, mut opts) = if resolvers.is_empty() {
            Self::system_or_fallback_config()
        } else {
            let mut config = ResolverConfig::new();
            for address in resolvers {
                let addr = normalize_resolver(address)?;
                // UDP first; the TCP entry lets truncated answers retry.
                config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
                config.add_name_server(NameServerConfig::new(addr, Protocol::Tcp));
            }
            let mut opts = ResolverOpts::default();
            // The configured list is an ordered preference.
            opts.server_ordering_strategy = ServerOrderingStrategy::UserProvidedOrder;
            (config, opts)
        };

        opts.timeout = DNS_TIMEOUT;
        opts.attempts = 2;
        // Pre-checks must observe propagation, not yesterday's answer.
        opts.cache_size = 0;

        let resolver =
            Resolver::builder_with_config(config, TokioConnectionProvider::default())
                .with_options(opts)
                .build();

        Ok(Self { resolver })
    }

    fn system_or_fallback_config() -> (ResolverConfig, ResolverOpts) {
        match hickory_resolver::system_conf::read_system_conf() {
            Ok((config, opts)) => {
                debug!("Using system resolvers for TXT pre-check");
                (config, opts)
            }
            Err(e) => {
                warn!(error = %e, "Failed to read system resolver config, using public recursors");
                let mut config = ResolverConfig::new();
                for address in FALLBACK_RESOLVERS {
                    let addr: SocketAddr = address.parse().expect("static resolver address");
                    config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
                    config.add_name_server(NameServerConfig::new(addr, Protocol::Tcp));
                }
                (config, ResolverOpts::default())
            }
        }
    }

    /// Whether `fqdn` currently resolves to a TXT record whose first
    /// string equals `expected`. `Ok(false)` means "not yet" — an absent
    /// record or a mismatch; both are wait signals.
    pub async fn verify(&self, fqdn: &str, expected: &str) -> Result<bool, PrecheckError> {
        match self.resolver.txt_lookup(fqdn).await {
            Ok(records) => {
                for record in records.iter() {
                    let first = record
                        .txt_data()
                        .first()
                        .map(|data| String::from_utf8_lossy(data).to_string())
                        .unwrap_or_default();

                    trace!(
                        fqdn = %fqdn,
                        found = %first,
                        expected = %expected,
                        "Comparing TXT answer"
                    );

                    if first == expected {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Err(e) => {
                // NXDOMAIN / NOERROR-without-records are the normal state
                // before the operator publishes the record.
                let message = e.to_string().to_lowercase();
                if message.contains("no records found")
                    || message.contains("nxdomain")
                    || message.contains("record not found")
                {
                    Ok(false)
                } else {
                    Err(PrecheckError::Lookup {
                        fqdn: fqdn.to_string(),
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl TxtVerifier for TxtPrecheck {
    async fn verify(&self, fqdn: &str, expected: &str) -> Result<bool, PrecheckError> {
        TxtPrecheck::verify(self, fqdn, expected).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_appends_default_port() {
        assert_eq!(
            normalize_resolver("1.1.1.1").unwrap(),
            "1.1.1.1:53".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn normalize_keeps_explicit_port() {
        assert_eq!(
            normalize_resolver("223.5.5.5:5353").unwrap(),
            "223.5.5.5:5353".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn normalize_rejects_garbage() {
        assert!(matches!(
            normalize_resolver("not a resolver"),
            Err(PrecheckError::InvalidResolver { .. })
        ));
    }

    #[tokio::test]
    async fn builds_with_explicit_resolvers() {
        let precheck = TxtPrecheck::new(&["1.1.1.1:53".to_string(), "8.8.8.8".to_string()]);
        assert!(precheck.is_ok());
    }

    #[tokio::test]
    async fn builds_with_empty_list() {
        assert!(TxtPrecheck::new(&[]).is_ok());
    }

    #[tokio::test]
    async fn rejects_invalid_configured_resolver() {
        let err = TxtPrecheck::new(&["".to_string()]).unwrap_err();
        assert!(matches!(err, PrecheckError::InvalidResolver { .. }));
    }
}
