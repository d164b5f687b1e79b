//! Background workers draining the share and archive queues.
//!
//! The share worker fans each request out to the local builder and, for
//! locally-produced requests, to every connected peer. Deliveries are
//! at-most-once: failures are recorded in metrics and never retried. Each
//! target has its own serial dispatch task, so ordering is preserved per
//! target while targets progress independently.

use crate::{
    metrics::METRICS,
    peers::{PeerSet, SignedRpcClient},
    types::ParsedRequest,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::*;

const FORWARDER: &str = "forwarder";

/// Spawn a dispatch task performing one in-flight signed RPC call at a time
/// against the given target. Returns the sender feeding it.
pub fn spawn_rpc_forwarder(client: SignedRpcClient) -> mpsc::UnboundedSender<Arc<ParsedRequest>> {
    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<Arc<ParsedRequest>>();
    debug!(target: FORWARDER, name = %client.name(), url = %client.url(), "spawning rpc forwarder");

    tokio::spawn(async move {
        while let Some(request) = request_rx.recv().await {
            deliver(&client, &request).await;
        }
        debug!(target: FORWARDER, name = %client.name(), "terminating forwarder");
    });

    request_tx
}

/// Deliver a single request, recording the outcome per target.
async fn deliver(client: &SignedRpcClient, request: &ParsedRequest) {
    let param = match request.payload.param_value() {
        Ok(param) => param,
        Err(error) => {
            error!(target: FORWARDER, name = %client.name(), %error, "failed to encode request payload");
            return;
        }
    };

    match client.call(request.method(), param).await {
        Ok(()) => {
            METRICS.rpc_success.with_label_values(&[client.name()]).inc();
            trace!(target: FORWARDER, name = %client.name(), method = request.method(), "request delivered");
        }
        Err(error) => {
            METRICS.rpc_failure.with_label_values(&[client.name(), error.reason()]).inc();
            warn!(target: FORWARDER, name = %client.name(), method = request.method(), %error, "failed to deliver request");
        }
    }
}

/// Consumes the share queue and produces outbound deliveries.
///
/// Every request goes to the local builder. Locally-produced requests
/// additionally fan out to all currently-connected peers; public requests do
/// not, as their origin already multicast them.
#[derive(Debug)]
pub struct ShareWorker {
    request_rx: mpsc::Receiver<Arc<ParsedRequest>>,
    builder_tx: mpsc::UnboundedSender<Arc<ParsedRequest>>,
    peers: Arc<PeerSet>,
}

impl ShareWorker {
    pub fn new(
        request_rx: mpsc::Receiver<Arc<ParsedRequest>>,
        builder_tx: mpsc::UnboundedSender<Arc<ParsedRequest>>,
        peers: Arc<PeerSet>,
    ) -> Self {
        Self { request_rx, builder_tx, peers }
    }

    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            self.dispatch(request);
        }
        debug!(target: FORWARDER, "share queue closed, share worker exiting");
    }

    fn dispatch(&self, request: Arc<ParsedRequest>) {
        if self.builder_tx.send(request.clone()).is_err() {
            warn!(target: FORWARDER, "builder forwarder is gone");
        }

        if request.public_endpoint {
            return;
        }

        let peers = self.peers.snapshot();
        trace!(target: FORWARDER, peers = peers.len(), method = request.method(), "fanning out to peers");
        for handle in peers.values() {
            if handle.sender.send(request.clone()).is_err() {
                warn!(target: FORWARDER, peer = %handle.peer.name, "failed to enqueue forwarding request");
            }
        }
    }
}

/// Consumes the archive queue and forwards local-origin records, verbatim,
/// to the archival sink. Without a configured sink the queue is drained and
/// counted.
#[derive(Debug)]
pub struct ArchiveWorker {
    request_rx: mpsc::Receiver<Arc<ParsedRequest>>,
    sink: Option<SignedRpcClient>,
}

impl ArchiveWorker {
    pub fn new(
        request_rx: mpsc::Receiver<Arc<ParsedRequest>>,
        sink: Option<SignedRpcClient>,
    ) -> Self {
        Self { request_rx, sink }
    }

    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            match self.sink {
                Some(ref sink) => deliver(sink, &request).await,
                None => METRICS.archive_skipped.inc(),
            }
        }
        debug!(target: FORWARDER, "archive queue closed, archive worker exiting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        peers::{Peer, PeerHandle, PeerMap},
        types::{EthSendBundleArgs, RequestPayload},
    };
    use alloy_primitives::{bytes, Address, U64};
    use std::time::Duration;

    fn request(public_endpoint: bool) -> Arc<ParsedRequest> {
        let bundle = EthSendBundleArgs {
            txs: vec![bytes!("aa")],
            block_number: U64::from(0x10),
            min_timestamp: None,
            max_timestamp: None,
            reverting_tx_hashes: vec![],
            replacement_uuid: None,
            signing_address: None,
        };
        Arc::new(ParsedRequest::new(
            public_endpoint,
            Address::ZERO,
            String::new(),
            RequestPayload::EthSendBundle(bundle),
        ))
    }

    fn peer_set_with_sender() -> (Arc<PeerSet>, mpsc::UnboundedReceiver<Arc<ParsedRequest>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = PeerHandle {
            peer: Peer {
                name: "peer-a".to_string(),
                public_url: "https://127.0.0.1:5544".to_string(),
                identity_address: Address::ZERO,
                cert_pem: String::new(),
            },
            sender,
        };
        let peers = Arc::new(PeerSet::default());
        let mut map = PeerMap::new();
        map.insert("peer-a".to_string(), Arc::new(handle));
        peers.publish(Arc::new(map));
        (peers, receiver)
    }

    #[tokio::test]
    async fn local_requests_reach_builder_and_peers() {
        let (share_tx, share_rx) = mpsc::channel(8);
        let (builder_tx, mut builder_rx) = mpsc::unbounded_channel();
        let (peers, mut peer_rx) = peer_set_with_sender();

        tokio::spawn(ShareWorker::new(share_rx, builder_tx, peers).run());

        share_tx.send(request(false)).await.unwrap();
        let to_builder = builder_rx.recv().await.unwrap();
        assert!(!to_builder.public_endpoint);
        let to_peer = peer_rx.recv().await.unwrap();
        assert_eq!(to_peer.method(), "eth_sendBundle");
    }

    #[tokio::test]
    async fn public_requests_skip_peer_fanout() {
        let (share_tx, share_rx) = mpsc::channel(8);
        let (builder_tx, mut builder_rx) = mpsc::unbounded_channel();
        let (peers, mut peer_rx) = peer_set_with_sender();

        tokio::spawn(ShareWorker::new(share_rx, builder_tx, peers).run());

        share_tx.send(request(true)).await.unwrap();
        assert!(builder_rx.recv().await.is_some());

        // No peer delivery follows.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn peer_dispatch_preserves_enqueue_order() {
        let (share_tx, share_rx) = mpsc::channel(8);
        let (builder_tx, _builder_rx) = mpsc::unbounded_channel();
        let (peers, mut peer_rx) = peer_set_with_sender();

        tokio::spawn(ShareWorker::new(share_rx, builder_tx, peers).run());

        let mut sent = Vec::new();
        for block in [0x10u64, 0x11, 0x12] {
            let bundle = EthSendBundleArgs {
                txs: vec![bytes!("aa")],
                block_number: U64::from(block),
                min_timestamp: None,
                max_timestamp: None,
                reverting_tx_hashes: vec![],
                replacement_uuid: None,
                signing_address: None,
            };
            let request = Arc::new(ParsedRequest::new(
                false,
                Address::ZERO,
                String::new(),
                RequestPayload::EthSendBundle(bundle),
            ));
            sent.push(request.fingerprint);
            share_tx.send(request).await.unwrap();
        }

        for expected in sent {
            let received = peer_rx.recv().await.unwrap();
            assert_eq!(received.fingerprint, expected);
        }
    }

    #[tokio::test]
    async fn archive_worker_drains_without_sink() {
        let (archive_tx, archive_rx) = mpsc::channel(8);
        let worker = ArchiveWorker::new(archive_rx, None);
        let handle = tokio::spawn(worker.run());

        archive_tx.send(request(false)).await.unwrap();
        drop(archive_tx);
        handle.await.unwrap();
    }
}
