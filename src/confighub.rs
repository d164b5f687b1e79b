//! Config Hub: the external registry publishing the current set of peer
//! proxies, plus the side-channel fetch of each peer's certificate.

use crate::consts::{DEFAULT_CERT_PORT, DEFAULT_PUBLIC_PORT, REFRESH_FETCH_TIMEOUT};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    fmt::{Debug, Display},
    future::Future,
    sync::{Arc, Mutex},
};

/// A peer record as published by the Config Hub. The TLS certificate is not
/// part of the record; it is fetched out-of-band from the peer's plaintext
/// cert side-channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Peer name, unique within the registry.
    pub name: String,
    /// Peer host, optionally with the public HTTPS port (`host` or
    /// `host:port`).
    pub ip: String,
    /// The peer's orderflow signing identity.
    pub ecdsa_pubkey_address: Address,
    /// Port of the peer's cert side-channel, when it differs from the
    /// default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_port: Option<u16>,
}

impl PeerInfo {
    fn host(&self) -> &str {
        self.ip.split(':').next().unwrap_or(&self.ip)
    }

    /// The advertised public HTTPS URL of the peer proxy.
    pub fn public_url(&self) -> String {
        if self.ip.contains(':') {
            format!("https://{}", self.ip)
        } else {
            format!("https://{}:{}", self.ip, DEFAULT_PUBLIC_PORT)
        }
    }

    /// The plaintext endpoint serving the peer's certificate PEM.
    pub fn cert_url(&self) -> String {
        format!("http://{}:{}/cert", self.host(), self.cert_port.unwrap_or(DEFAULT_CERT_PORT))
    }
}

/// The registry publishing the current set of peer orderflow proxies,
/// abstracted to allow testing implementations.
pub trait ConfigHub {
    /// The error type returned when fetching peers fails.
    type Error: Debug + Display;

    /// Get the current list of peers from the registry.
    fn fetch_peers(&self) -> impl Future<Output = Result<Vec<PeerInfo>, Self::Error>> + Send;
}

/// Credentials registered with the hub on startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyCredentials {
    pub ecdsa_pubkey_address: Address,
    pub tls_cert: String,
}

/// Errors that can occur when registering credentials with the Config Hub.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("registration unsuccessful: {0}")]
    Unsuccessful(String),
}

/// An HTTP Config Hub client.
#[derive(Debug, Clone)]
pub struct HubClient {
    inner: reqwest::Client,
    url: String,
}

impl HubClient {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REFRESH_FETCH_TIMEOUT)
            .build()
            .expect("to build config hub client");
        Self { inner: client, url }
    }

    /// Register this proxy's signer address and certificate with the hub.
    pub async fn register(&self, credentials: &ProxyCredentials) -> Result<(), RegisterError> {
        let endpoint = format!("{}/api/l1-builder/v1/register_credentials/orderflow_proxy", self.url);
        let response = self.inner.post(endpoint).json(credentials).send().await?;
        let status = response.status();
        if !status.is_success() {
            let e = response.text().await.unwrap_or_default();
            return Err(RegisterError::Unsuccessful(e));
        }
        Ok(())
    }
}

impl ConfigHub for HubClient {
    type Error = reqwest::Error;

    async fn fetch_peers(&self) -> Result<Vec<PeerInfo>, Self::Error> {
        let endpoint = format!("{}/api/l1-builder/v1/builders", self.url);
        let response = self.inner.get(endpoint).send().await?;
        response.json().await
    }
}

/// A Config Hub backed by an in-process list, used when no hub endpoint is
/// configured and by tests.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigHub {
    peers: Arc<Mutex<Vec<PeerInfo>>>,
}

impl StaticConfigHub {
    pub fn new(peers: Vec<PeerInfo>) -> Self {
        Self { peers: Arc::new(Mutex::new(peers)) }
    }

    /// Replace the published peer list.
    pub fn set_peers(&self, peers: Vec<PeerInfo>) {
        *self.peers.lock().expect("static hub lock poisoned") = peers;
    }
}

impl ConfigHub for StaticConfigHub {
    type Error = Infallible;

    async fn fetch_peers(&self) -> Result<Vec<PeerInfo>, Infallible> {
        Ok(self.peers.lock().expect("static hub lock poisoned").clone())
    }
}

/// Fetch a peer's certificate PEM from its plaintext cert side-channel.
pub async fn fetch_peer_certificate(
    client: &reqwest::Client,
    peer: &PeerInfo,
) -> Result<String, reqwest::Error> {
    client.get(peer.cert_url()).send().await?.error_for_status()?.text().await
}
