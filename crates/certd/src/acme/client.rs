//! ACME transport
//!
//! [`AcmeClient`] resolves the CA's directory and hands out fresh nonces;
//! [`Conversation`] owns one nonce chain and performs the signed operations
//! (new-account, new-order, POST-as-GET reads, challenge trigger, finalize,
//! certificate download).
//!
//! An ACME conversation is strictly sequential: each response's
//! `Replay-Nonce` becomes the next request's nonce, so a conversation must
//! never be shared between orders. The reconciler opens one per order.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Response, StatusCode};
use tracing::{debug, trace, warn};

use super::error::AcmeError;
use super::jose::JwsSigner;
use super::types::{
    AccountResponse, AcmeChallenge, Authorization, Directory, FinalizePayload, NewAccountRequest,
    NewOrderRequest, OrderResponse, Problem,
};

const JOSE_CONTENT_TYPE: &str = "application/jose+json";
const REPLAY_NONCE: &str = "Replay-Nonce";

/// Timeout for each HTTP exchange with the CA
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts for network-class failures (first try included)
const TRANSPORT_ATTEMPTS: u32 = 3;

/// Base backoff delay, doubled per attempt
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// HTTP client for one ACME CA, addressed by its directory URL.
///
/// The directory URL is injected from configuration; production and staging
/// differ only in config.
#[derive(Debug, Clone)]
pub struct AcmeClient {
    http: reqwest::Client,
    directory_url: String,
}

impl AcmeClient {
    pub fn new(directory_url: impl Into<String>) -> Result<Self, AcmeError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("certd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            directory_url: directory_url.into(),
        })
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// Fetch the CA's service-discovery document.
    pub async fn directory(&self) -> Result<Directory, AcmeError> {
        let url = self.directory_url.clone();
        let response = self
            .with_transport_retry(|| self.http.get(&url).send())
            .await?;
        decode_json(response, &url).await
    }

    /// Obtain a fresh nonce via HEAD on the directory's newNonce endpoint.
    pub async fn new_nonce(&self, new_nonce_url: &str) -> Result<String, AcmeError> {
        let response = self
            .with_transport_retry(|| self.http.head(new_nonce_url).send())
            .await?;

        if response.content_length().is_some_and(|len| len > 0) {
            return Err(AcmeError::Nonce(
                "new-nonce response carried a non-empty body".to_string(),
            ));
        }

        extract_nonce(&response).ok_or(AcmeError::MissingHeader {
            header: REPLAY_NONCE,
            url: new_nonce_url.to_string(),
        })
    }

    /// Start a signed conversation: fetches the directory and seeds the
    /// nonce chain.
    pub async fn conversation(&self, signer: JwsSigner) -> Result<Conversation<'_>, AcmeError> {
        let directory = self.directory().await?;
        let nonce = self.new_nonce(&directory.new_nonce).await?;
        trace!(directory_url = %self.directory_url, "Opened ACME conversation");

        Ok(Conversation {
            client: self,
            directory,
            signer,
            nonce: Some(nonce),
        })
    }

    /// POST a serialized JWS, retrying network-class failures with bounded
    /// exponential backoff. Protocol rejections are never retried here.
    async fn post_jose(&self, url: &str, body: &str) -> Result<Response, AcmeError> {
        self.with_transport_retry(|| {
            self.http
                .post(url)
                .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
                .body(body.to_string())
                .send()
        })
        .await
    }

    async fn with_transport_retry<F, Fut>(&self, mut request: F) -> Result<Response, AcmeError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Response, reqwest::Error>>,
    {
        let mut delay = RETRY_BASE_DELAY;
        let mut last_err: Option<AcmeError> = None;

        for attempt in 0..TRANSPORT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }

            match request().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let err = AcmeError::Transport(e);
                    if !err.is_transient() {
                        return Err(err);
                    }
                    warn!(
                        attempt = attempt + 1,
                        error = %err,
                        "Transient ACME transport failure"
                    );
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.expect("at least one attempt"))
    }
}

/// One signed ACME conversation: a signer plus its nonce chain.
pub struct Conversation<'a> {
    client: &'a AcmeClient,
    directory: Directory,
    signer: JwsSigner,
    nonce: Option<String>,
}

impl Conversation<'_> {
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn signer(&self) -> &JwsSigner {
        &self.signer
    }

    /// Register a new account (`jwk`-signed). Returns the account object
    /// and the CA-issued account URL from the `Location` header; the
    /// conversation switches to `kid` mode for subsequent requests.
    pub async fn new_account(
        &mut self,
        request: &NewAccountRequest,
    ) -> Result<(AccountResponse, String), AcmeError> {
        let url = self.directory.new_account.clone();
        let payload = serde_json::to_string(request)
            .map_err(|e| AcmeError::Signing(super::jose::SigningError::Encode(e)))?;

        let response = self.post(&url, &payload).await?;
        let location = extract_location(&response, &url)?;
        let account: AccountResponse = decode_json(response, &url).await?;

        self.signer.set_key_id(location.clone());
        debug!(account_url = %location, status = %account.status, "Registered ACME account");

        Ok((account, location))
    }

    /// Submit a new order for the given identifiers. Returns the order and
    /// its CA-assigned URL. Re-submitting identical identifiers while the
    /// previous order is live yields the same URL; callers dedupe on it.
    pub async fn new_order(
        &mut self,
        request: &NewOrderRequest,
    ) -> Result<(OrderResponse, String), AcmeError> {
        let url = self.directory.new_order.clone();
        let payload = serde_json::to_string(request)
            .map_err(|e| AcmeError::Signing(super::jose::SigningError::Encode(e)))?;

        let response = self.post(&url, &payload).await?;
        let location = extract_location(&response, &url)?;
        let order: OrderResponse = decode_json(response, &url).await?;

        debug!(order_url = %location, status = %order.status, "Created ACME order");

        Ok((order, location))
    }

    /// POST-as-GET the order object.
    pub async fn get_order(&mut self, order_url: &str) -> Result<OrderResponse, AcmeError> {
        let response = self.post(order_url, "").await?;
        decode_json(response, order_url).await
    }

    /// POST-as-GET an authorization object.
    pub async fn get_authorization(
        &mut self,
        authorization_url: &str,
    ) -> Result<Authorization, AcmeError> {
        let response = self.post(authorization_url, "").await?;
        decode_json(response, authorization_url).await
    }

    /// Signal the CA that a challenge is ready to be validated (empty JSON
    /// object body per RFC 8555 §7.5.1).
    pub async fn post_challenge(
        &mut self,
        challenge_url: &str,
    ) -> Result<AcmeChallenge, AcmeError> {
        let response = self.post(challenge_url, "{}").await?;
        decode_json(response, challenge_url).await
    }

    /// Submit the CSR to the order's finalize URL. The CA rejects this
    /// unless the order is `ready`.
    pub async fn finalize(
        &mut self,
        finalize_url: &str,
        csr_b64: &str,
    ) -> Result<OrderResponse, AcmeError> {
        let payload = serde_json::to_string(&FinalizePayload {
            csr: csr_b64.to_string(),
        })
        .map_err(|e| AcmeError::Signing(super::jose::SigningError::Encode(e)))?;

        let response = self.post(finalize_url, &payload).await?;
        decode_json(response, finalize_url).await
    }

    /// Download the issued certificate chain
    /// (`application/pem-certificate-chain`, treated as opaque text).
    pub async fn download_certificate(
        &mut self,
        certificate_url: &str,
    ) -> Result<String, AcmeError> {
        let response = self.post(certificate_url, "").await?;
        let url = certificate_url.to_string();
        response
            .text()
            .await
            .map_err(|e| AcmeError::InvalidResponse {
                url,
                message: e.to_string(),
            })
    }

    /// Sign and send one request, threading the nonce chain. A `badNonce`
    /// rejection is retried exactly once with the fresh nonce the CA
    /// supplies alongside the rejection.
    async fn post(&mut self, url: &str, payload: &str) -> Result<Response, AcmeError> {
        let mut retried_bad_nonce = false;

        loop {
            let nonce = match self.nonce.take() {
                Some(nonce) => nonce,
                None => self.client.new_nonce(&self.directory.new_nonce).await?,
            };

            let body = self.signer.sign(url, &nonce, payload)?;
            let response = self.client.post_jose(url, &body).await?;

            // Every CA response, including rejections, carries the next
            // nonce of the chain.
            self.nonce = extract_nonce(&response);

            if response.status().is_success() {
                return Ok(response);
            }

            let status = response.status();
            let problem = decode_problem(response, status).await;

            if problem.is_bad_nonce() && !retried_bad_nonce {
                warn!(url = %url, "CA rejected nonce, retrying once with a fresh one");
                retried_bad_nonce = true;
                continue;
            }

            return Err(AcmeError::Protocol(problem));
        }
    }
}

impl std::fmt::Debug for Conversation<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("directory_url", &self.client.directory_url)
            .field("kid", &self.signer.key_id())
            .field("has_nonce", &self.nonce.is_some())
            .finish()
    }
}

fn extract_nonce(response: &Response) -> Option<String> {
    response
        .headers()
        .get(REPLAY_NONCE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn extract_location(response: &Response, url: &str) -> Result<String, AcmeError> {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(AcmeError::MissingHeader {
            header: "Location",
            url: url.to_string(),
        })
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    response: Response,
    url: &str,
) -> Result<T, AcmeError> {
    let url = url.to_string();
    response.json().await.map_err(|e| AcmeError::InvalidResponse {
        url,
        message: e.to_string(),
    })
}

/// Decode a non-2xx body as a problem document, falling back to the raw
/// body so the CA's words are never lost.
async fn decode_problem(response: Response, status: StatusCode) -> Problem {
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str(&body).unwrap_or_else(|_| Problem {
        problem_type: None,
        title: None,
        detail: Some(if body.is_empty() {
            format!("HTTP {status}")
        } else {
            body
        }),
        status: Some(status.as_u16()),
        subproblems: Vec::new(),
    })
}
