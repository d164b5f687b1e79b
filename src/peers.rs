//! The peer mesh: one signed, certificate-pinned RPC client per peer, and
//! the refresh task keeping the set in sync with the Config Hub.

use crate::{
    confighub::{fetch_peer_certificate, ConfigHub},
    consts::{FLASHBOTS_SIGNATURE_HEADER, REFRESH_FETCH_TIMEOUT, RPC_CALL_TIMEOUT},
    forwarder::spawn_rpc_forwarder,
    jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, JsonRpcResponseTy},
    metrics::METRICS,
    types::ParsedRequest,
    utils::build_signature_header,
};
use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use axum::http::header::CONTENT_TYPE;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;

const PEERS: &str = "peers";

/// Errors building an RPC client.
#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    #[error("invalid peer certificate: {0}")]
    Certificate(#[source] reqwest::Error),
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
}

/// Errors from a single outbound RPC call.
#[derive(Debug, thiserror::Error)]
pub enum RpcCallError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i32, message: JsonRpcError },
}

impl RpcCallError {
    /// Low-cardinality label for failure metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Transport(error) if error.is_timeout() => "timeout",
            Self::Transport(error) if error.is_connect() => "connect",
            Self::Transport(_) => "transport",
            Self::Serialize(_) => "serialize",
            Self::Rpc { .. } => "rpc",
        }
    }
}

/// A JSON-RPC client that signs every request with the proxy's orderflow
/// signer. Peer clients additionally pin the peer's self-signed certificate
/// as their sole trust root.
#[derive(Debug, Clone)]
pub struct SignedRpcClient {
    name: String,
    url: String,
    client: reqwest::Client,
    signer: PrivateKeySigner,
}

impl SignedRpcClient {
    /// Create a client without certificate pinning (local builder, archive).
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        signer: PrivateKeySigner,
    ) -> Result<Self, RpcClientError> {
        let client = reqwest::Client::builder()
            .timeout(RPC_CALL_TIMEOUT)
            .build()
            .map_err(RpcClientError::Build)?;
        Ok(Self { name: name.into(), url: url.into(), client, signer })
    }

    /// Create a client that only trusts the given certificate PEM.
    pub fn with_pinned_certificate(
        name: impl Into<String>,
        url: impl Into<String>,
        signer: PrivateKeySigner,
        cert_pem: &str,
    ) -> Result<Self, RpcClientError> {
        let certificate = reqwest::Certificate::from_pem(cert_pem.as_bytes())
            .map_err(RpcClientError::Certificate)?;
        let client = reqwest::Client::builder()
            .timeout(RPC_CALL_TIMEOUT)
            .https_only(true)
            .tls_built_in_root_certs(false)
            .add_root_certificate(certificate)
            .build()
            .map_err(RpcClientError::Build)?;
        Ok(Self { name: name.into(), url: url.into(), client, signer })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform a signed JSON-RPC call with a single parameter, mapping
    /// error responses into [`RpcCallError::Rpc`].
    pub async fn call(
        &self,
        method: &str,
        param: serde_json::Value,
    ) -> Result<(), RpcCallError> {
        let request = JsonRpcRequest::new(1, method, param);
        let body = serde_json::to_vec(&request)?;
        let signature = build_signature_header(&self.signer, &body);

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, mime::APPLICATION_JSON.as_ref())
            .header(FLASHBOTS_SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await?;

        let response: JsonRpcResponse<serde_json::Value> = response.json().await?;
        if let JsonRpcResponseTy::Error { code, message } = response.result_or_error {
            return Err(RpcCallError::Rpc { code, message });
        }
        Ok(())
    }
}

/// A fully-resolved peer: the registry record plus its certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub name: String,
    pub public_url: String,
    pub identity_address: Address,
    pub cert_pem: String,
}

impl Peer {
    /// Two peers are equivalent when identity, URL and certificate all match;
    /// any difference requires a client rebuild.
    pub fn equivalent(&self, other: &Peer) -> bool {
        self.identity_address == other.identity_address &&
            self.public_url == other.public_url &&
            self.cert_pem == other.cert_pem
    }
}

/// A connected peer: its record plus the sender feeding its dispatch task.
#[derive(Debug)]
pub struct PeerHandle {
    pub peer: Peer,
    pub sender: mpsc::UnboundedSender<Arc<ParsedRequest>>,
}

pub type PeerMap = HashMap<String, Arc<PeerHandle>>;

/// The current peer set. The map is immutable once published; the refresh
/// task swaps the whole pointer, so readers holding a snapshot may deliver to
/// a removed peer at most once.
#[derive(Debug, Default)]
pub struct PeerSet {
    inner: RwLock<Arc<PeerMap>>,
}

impl PeerSet {
    /// The current peer map.
    pub fn snapshot(&self) -> Arc<PeerMap> {
        self.inner.read().expect("peer set lock poisoned").clone()
    }

    /// Atomically replace the peer map.
    pub fn publish(&self, map: Arc<PeerMap>) {
        *self.inner.write().expect("peer set lock poisoned") = map;
    }

    /// Find the name of the peer with the given signing identity.
    pub fn find_peer_name(&self, address: Address) -> Option<String> {
        self.snapshot()
            .values()
            .find(|handle| handle.peer.identity_address == address)
            .map(|handle| handle.peer.name.clone())
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Periodically refreshes the peer set from the Config Hub, fetching each
/// peer's certificate over the plaintext side-channel and rebuilding clients
/// whose identity, URL or certificate changed.
#[derive(Debug)]
pub struct PeersUpdater<H> {
    hub: H,
    peers: Arc<PeerSet>,
    signer: PrivateKeySigner,
    local_address: Address,
    cert_client: reqwest::Client,
    interval: Duration,
    cancel: CancellationToken,
}

impl<H: ConfigHub + Send + Sync + 'static> PeersUpdater<H> {
    pub fn new(
        hub: H,
        peers: Arc<PeerSet>,
        signer: PrivateKeySigner,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let cert_client = reqwest::Client::builder()
            .timeout(REFRESH_FETCH_TIMEOUT)
            .build()
            .expect("to build cert fetch client");
        let local_address = signer.address();
        Self { hub, peers, signer, local_address, cert_client, interval, cancel }
    }

    /// Run the refresh loop until cancelled.
    pub async fn run(self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    debug!(target: PEERS, "peer updater cancelled");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
            let _ = self.refresh().await;
        }
    }

    /// Perform one refresh tick. A hub failure leaves the current set in
    /// place; a failing cert fetch or client build keeps that peer's previous
    /// entry and never drains the rest.
    pub async fn refresh(&self) -> Result<(), H::Error> {
        let infos = match self.hub.fetch_peers().await {
            Ok(infos) => infos,
            Err(error) => {
                METRICS.peer_refresh_failures.inc();
                error!(target: PEERS, %error, "failed to fetch peers from config hub");
                return Err(error);
            }
        };

        let prev = self.peers.snapshot();
        let mut next = PeerMap::with_capacity(infos.len());

        for info in infos {
            // Skip self.
            if info.ecdsa_pubkey_address == self.local_address {
                continue;
            }
            let previous = prev.get(&info.name);

            let cert_pem = match fetch_peer_certificate(&self.cert_client, &info).await {
                Ok(pem) => pem,
                Err(error) => {
                    METRICS.peer_cert_fetch_failures.with_label_values(&[&info.name]).inc();
                    warn!(target: PEERS, peer = %info.name, %error, "failed to fetch peer certificate");
                    if let Some(handle) = previous {
                        next.insert(info.name.clone(), handle.clone());
                    }
                    continue;
                }
            };

            let candidate = Peer {
                name: info.name.clone(),
                public_url: info.public_url(),
                identity_address: info.ecdsa_pubkey_address,
                cert_pem,
            };

            if let Some(handle) = previous {
                if handle.peer.equivalent(&candidate) {
                    next.insert(info.name.clone(), handle.clone());
                    continue;
                }
                info!(target: PEERS, peer = %info.name, "received peer configuration update");
            } else {
                info!(target: PEERS, peer = %info.name, "received new peer configuration");
            }

            match self.connect(candidate) {
                Ok(handle) => {
                    next.insert(info.name, Arc::new(handle));
                }
                Err(error) => {
                    error!(target: PEERS, peer = %info.name, %error, "failed to build peer client");
                    if let Some(handle) = previous {
                        next.insert(info.name.clone(), handle.clone());
                    }
                }
            }
        }

        for name in prev.keys() {
            if !next.contains_key(name) {
                info!(target: PEERS, peer = %name, "peer removed from configuration");
            }
        }

        // Re-publishing an unchanged set would needlessly invalidate the
        // shared pointer, so leave it alone.
        let unchanged = next.len() == prev.len() &&
            next.iter().all(|(name, handle)| {
                prev.get(name).is_some_and(|previous| Arc::ptr_eq(previous, handle))
            });
        if !unchanged {
            self.peers.publish(Arc::new(next));
        }

        METRICS.peer_count.set(self.peers.len() as i64);
        Ok(())
    }

    fn connect(&self, peer: Peer) -> Result<PeerHandle, RpcClientError> {
        let client = SignedRpcClient::with_pinned_certificate(
            peer.name.clone(),
            peer.public_url.clone(),
            self.signer.clone(),
            &peer.cert_pem,
        )?;
        let sender = spawn_rpc_forwarder(client);
        Ok(PeerHandle { peer, sender })
    }
}
