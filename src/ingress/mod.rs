//! The three ingress surfaces: public HTTPS, local HTTPS and the plaintext
//! certificate side-channel. Handlers authenticate, validate, normalise,
//! deduplicate and enqueue; everything past the queues is fire-and-forget.

use crate::{
    block_number::BlockNumberSource,
    cache::DedupCache,
    consts::{
        BID_SUBSIDISE_BLOCK_METHOD, ETH_CANCEL_BUNDLE_METHOD, ETH_SEND_BUNDLE_METHOD,
        ETH_SEND_RAW_TRANSACTION_METHOD, FLASHBOTS_PEER_NAME, MEV_SEND_BUNDLE_METHOD, UNKNOWN,
    },
    jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse},
    metrics::METRICS,
    peers::PeerSet,
    types::{
        BidSubsidiseBlockArgs, EthCancelBundleArgs, EthSendBundleArgs, EthSendRawTransactionArgs,
        MevBundleMetadata, MevSendBundleArgs, ParsedRequest, RequestPayload,
    },
    utils::recover_signature_header,
    validation::{
        validate_eth_cancel_bundle, validate_eth_send_bundle, validate_eth_send_raw_transaction,
        validate_mev_send_bundle,
    },
};
use alloy_primitives::Address;
use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
};
use flate2::read::GzDecoder;
use std::{io::Read as _, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::*;

pub mod error;
use error::IngressError;

const INGRESS: &str = "ingress";

/// Shared state of the ingress handlers.
#[derive(Debug)]
pub struct OrderflowIngress {
    /// The distinguished signer with elevated rights.
    pub flashbots_signer: Option<Address>,
    /// The current peer set, also the public-surface allow-list.
    pub peers: Arc<PeerSet>,
    pub dedup_cache: DedupCache,
    pub block_numbers: BlockNumberSource,
    /// How far past the current block a public bundle may target.
    pub max_block_lookahead: u64,
    pub gzip_enabled: bool,
    pub share_tx: mpsc::Sender<Arc<ParsedRequest>>,
    pub archive_tx: mpsc::Sender<Arc<ParsedRequest>>,
    pub shutdown: CancellationToken,
    /// PEM of this proxy's certificate, served on the cert surface.
    pub cert_pem: String,
}

impl OrderflowIngress {
    pub async fn public_handler(
        State(ingress): State<Arc<Self>>,
        headers: HeaderMap,
        body: axum::body::Bytes,
    ) -> JsonRpcResponse<()> {
        Self::serve(ingress, headers, body, true).await
    }

    pub async fn local_handler(
        State(ingress): State<Arc<Self>>,
        headers: HeaderMap,
        body: axum::body::Bytes,
    ) -> JsonRpcResponse<()> {
        Self::serve(ingress, headers, body, false).await
    }

    /// Handler for the plaintext cert surface: the proxy's certificate PEM,
    /// unauthenticated.
    pub async fn cert_handler(State(ingress): State<Arc<Self>>) -> impl IntoResponse {
        ([(header::CONTENT_TYPE, "application/x-pem-file")], ingress.cert_pem.clone())
    }

    async fn serve(
        ingress: Arc<Self>,
        headers: HeaderMap,
        body: axum::body::Bytes,
        public_endpoint: bool,
    ) -> JsonRpcResponse<()> {
        let endpoint = if public_endpoint { "public" } else { "local" };

        // Reject new work once shutdown has begun, before listeners close.
        if ingress.shutdown.is_cancelled() {
            return JsonRpcResponse::error(None, JsonRpcError::Unavailable);
        }

        let body = match maybe_decompress(ingress.gzip_enabled, &headers, body) {
            Ok(decompressed) => decompressed,
            Err(error) => return JsonRpcResponse::error(None, error),
        };

        // NOTE: Signature is mandatory on both JSON-RPC surfaces.
        let signer = match recover_signature_header(&headers, &body) {
            Ok(signer) => signer,
            Err(error) => {
                trace!(target: INGRESS, endpoint, %error, "error verifying request signature");
                return JsonRpcResponse::error(
                    None,
                    IngressError::Signature(error).into_jsonrpc_error(),
                );
            }
        };

        let mut request: JsonRpcRequest<serde_json::Value> =
            match JsonRpcRequest::from_bytes(&body) {
                Ok(request) => request,
                Err(error) => {
                    trace!(target: INGRESS, endpoint, "error parsing JSON-RPC request");
                    METRICS.json_rpc_parse_errors.with_label_values(&[UNKNOWN]).inc();
                    return JsonRpcResponse::error(None, error);
                }
            };
        let id = request.id;

        trace!(target: INGRESS, endpoint, %signer, id, method = request.method, "serving JSON-RPC request");

        if !matches!(
            request.method.as_str(),
            ETH_SEND_BUNDLE_METHOD |
                MEV_SEND_BUNDLE_METHOD |
                ETH_CANCEL_BUNDLE_METHOD |
                ETH_SEND_RAW_TRANSACTION_METHOD |
                BID_SUBSIDISE_BLOCK_METHOD
        ) {
            trace!(target: INGRESS, method = request.method, "method not supported");
            return JsonRpcResponse::error(Some(id), JsonRpcError::MethodNotFound);
        }

        let Some(param) = request.take_single_param() else {
            METRICS.json_rpc_parse_errors.with_label_values(&[request.method.as_str()]).inc();
            return JsonRpcResponse::error(Some(id), JsonRpcError::InvalidParams);
        };

        let result = match request.method.as_str() {
            ETH_SEND_BUNDLE_METHOD => {
                ingress.on_eth_send_bundle(param, public_endpoint, signer).await
            }
            MEV_SEND_BUNDLE_METHOD => {
                ingress.on_mev_send_bundle(param, public_endpoint, signer).await
            }
            ETH_CANCEL_BUNDLE_METHOD => {
                ingress.on_eth_cancel_bundle(param, public_endpoint, signer).await
            }
            ETH_SEND_RAW_TRANSACTION_METHOD => {
                ingress.on_eth_send_raw_transaction(param, public_endpoint, signer).await
            }
            _ => ingress.on_bid_subsidise_block(param, public_endpoint, signer).await,
        };

        match result {
            Ok(()) => JsonRpcResponse::result(id, ()),
            Err(error) => {
                if error.is_validation() {
                    METRICS.validation_errors.with_label_values(&[request.method.as_str()]).inc();
                }
                debug!(target: INGRESS, endpoint, method = request.method, %error, "request rejected");
                JsonRpcResponse::error(Some(id), error.into_jsonrpc_error())
            }
        }
    }

    async fn on_eth_send_bundle(
        &self,
        param: serde_json::Value,
        public_endpoint: bool,
        signer: Address,
    ) -> Result<(), IngressError> {
        let mut bundle: EthSendBundleArgs = serde_json::from_value(param)?;

        let current_block = self.block_numbers.block_number().await?;
        validate_eth_send_bundle(&bundle, public_endpoint, current_block, self.max_block_lookahead)?;

        let peer_name = if public_endpoint {
            self.resolve_public_peer(signer)?
        } else {
            // Downstream peers observe the originating local producer.
            bundle.signing_address = Some(signer);
            String::new()
        };

        self.finish(ParsedRequest::new(
            public_endpoint,
            signer,
            peer_name,
            RequestPayload::EthSendBundle(bundle),
        ))
    }

    async fn on_mev_send_bundle(
        &self,
        param: serde_json::Value,
        public_endpoint: bool,
        signer: Address,
    ) -> Result<(), IngressError> {
        let mut bundle: MevSendBundleArgs = serde_json::from_value(param)?;

        let current_block = self.block_numbers.block_number().await?;
        validate_mev_send_bundle(&bundle, public_endpoint, current_block, self.max_block_lookahead)?;

        let peer_name = if public_endpoint {
            self.resolve_public_peer(signer)?
        } else {
            bundle.metadata = Some(MevBundleMetadata { signer: Some(signer) });
            String::new()
        };

        self.finish(ParsedRequest::new(
            public_endpoint,
            signer,
            peer_name,
            RequestPayload::MevSendBundle(bundle),
        ))
    }

    async fn on_eth_cancel_bundle(
        &self,
        param: serde_json::Value,
        public_endpoint: bool,
        signer: Address,
    ) -> Result<(), IngressError> {
        let mut cancel: EthCancelBundleArgs = serde_json::from_value(param)?;
        validate_eth_cancel_bundle(&cancel, public_endpoint)?;

        let peer_name = if public_endpoint {
            self.resolve_public_peer(signer)?
        } else {
            cancel.signing_address = Some(signer);
            String::new()
        };

        self.finish(ParsedRequest::new(
            public_endpoint,
            signer,
            peer_name,
            RequestPayload::EthCancelBundle(cancel),
        ))
    }

    async fn on_eth_send_raw_transaction(
        &self,
        param: serde_json::Value,
        public_endpoint: bool,
        signer: Address,
    ) -> Result<(), IngressError> {
        let raw_tx: EthSendRawTransactionArgs = serde_json::from_value(param)?;
        validate_eth_send_raw_transaction(&raw_tx.0)?;

        let peer_name =
            if public_endpoint { self.resolve_public_peer(signer)? } else { String::new() };

        self.finish(ParsedRequest::new(
            public_endpoint,
            signer,
            peer_name,
            RequestPayload::EthSendRawTransaction(raw_tx),
        ))
    }

    async fn on_bid_subsidise_block(
        &self,
        param: serde_json::Value,
        public_endpoint: bool,
        signer: Address,
    ) -> Result<(), IngressError> {
        let bid: BidSubsidiseBlockArgs = serde_json::from_value(param)?;

        if !public_endpoint {
            return Err(IngressError::SubsidyWrongEndpoint);
        }
        if self.flashbots_signer != Some(signer) {
            return Err(IngressError::SubsidyWrongCaller);
        }

        self.finish(ParsedRequest::new(
            public_endpoint,
            signer,
            FLASHBOTS_PEER_NAME.to_string(),
            RequestPayload::BidSubsidiseBlock(bid),
        ))
    }

    /// Resolve the peer name for a public-surface signer: the Flashbots
    /// signer or the identity of a currently-known peer.
    fn resolve_public_peer(&self, signer: Address) -> Result<String, IngressError> {
        if self.flashbots_signer == Some(signer) {
            return Ok(FLASHBOTS_PEER_NAME.to_string());
        }
        self.peers.find_peer_name(signer).ok_or(IngressError::UnknownPeer)
    }

    /// Deduplicate and enqueue. Duplicates and queue-full drops both return
    /// success so upstream producers are not encouraged to retry.
    fn finish(&self, request: ParsedRequest) -> Result<(), IngressError> {
        let endpoint = if request.public_endpoint { "public" } else { "local" };
        METRICS.requests_total.with_label_values(&[request.method(), endpoint]).inc();

        if let Some(fingerprint) = request.fingerprint {
            if self.dedup_cache.contains(&fingerprint) {
                trace!(target: INGRESS, %fingerprint, "request already processed");
                METRICS.requests_duplicate.with_label_values(&[request.origin()]).inc();
                return Ok(());
            }
            self.dedup_cache.insert(fingerprint);
            METRICS.dedup_cache_entries.set(self.dedup_cache.entry_count() as i64);
        }

        let request = Arc::new(request);
        enqueue(&self.share_tx, "share", request.clone());
        if !request.public_endpoint {
            enqueue(&self.archive_tx, "archive", request);
        }
        Ok(())
    }
}

/// Non-blocking enqueue. A full queue trades delivery for availability: the
/// drop is counted and the client still sees success.
fn enqueue(
    queue_tx: &mpsc::Sender<Arc<ParsedRequest>>,
    queue: &'static str,
    request: Arc<ParsedRequest>,
) {
    match queue_tx.try_send(request) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            METRICS.queue_dropped.with_label_values(&[queue]).inc();
            warn!(target: INGRESS, queue, "queue full, dropping request");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(target: INGRESS, queue, "queue closed, dropping request");
        }
    }
}

/// Attempt to decompress the body if the `content-encoding` header is set to
/// `gzip`.
pub fn maybe_decompress(
    gzip_enabled: bool,
    headers: &HeaderMap,
    body: axum::body::Bytes,
) -> Result<Vec<u8>, JsonRpcError> {
    if gzip_enabled && headers.get(header::CONTENT_ENCODING).is_some_and(|enc| enc == "gzip") {
        let mut decompressed = Vec::new();
        GzDecoder::new(&body[..])
            .read_to_end(&mut decompressed)
            .map_err(|_| JsonRpcError::ParseError)?;
        Ok(decompressed)
    } else {
        Ok(body.to_vec())
    }
}
