//! Wire types for the five supported submission methods and the parsed
//! request record flowing through the share and archive queues.

use crate::consts::{
    BID_SUBSIDISE_BLOCK_METHOD, ETH_CANCEL_BUNDLE_METHOD, ETH_SEND_BUNDLE_METHOD,
    ETH_SEND_RAW_TRANSACTION_METHOD, MEV_SEND_BUNDLE_METHOD,
};
use alloy_primitives::{keccak256, Address, Bytes, B256, U64};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Namespace for deterministic request fingerprints.
const FINGERPRINT_NAMESPACE: Uuid = Uuid::from_u128(0x1d04_73c5_9b2e_4e51_a8f3_6d0b_24c7_91aa);

/// Arguments of `eth_sendBundle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthSendBundleArgs {
    /// Raw EIP-2718 encoded transactions.
    pub txs: Vec<Bytes>,
    /// The block this bundle targets.
    #[serde(default)]
    pub block_number: U64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timestamp: Option<u64>,
    /// Hashes of transactions allowed to revert.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reverting_tx_hashes: Vec<B256>,
    /// Key under which this bundle replaces (or cancels) a prior one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_uuid: Option<String>,
    /// The producer on whose behalf this bundle was submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_address: Option<Address>,
}

impl EthSendBundleArgs {
    /// Deterministic fingerprint used for deduplication. Replaceable bundles
    /// are keyed by their replacement key, everything else by the content
    /// tuple (target block, transaction hashes, revert policy).
    pub fn fingerprint(&self) -> Uuid {
        let mut buf = Vec::new();
        if let Some(ref replacement_uuid) = self.replacement_uuid {
            buf.extend_from_slice(replacement_uuid.as_bytes());
            if let Some(signer) = self.signing_address {
                buf.extend_from_slice(signer.as_slice());
            }
        } else {
            buf.extend_from_slice(&self.block_number.to::<u64>().to_be_bytes());
            for tx in &self.txs {
                buf.extend_from_slice(keccak256(tx).as_slice());
            }
            for hash in &self.reverting_tx_hashes {
                buf.extend_from_slice(hash.as_slice());
            }
        }
        Uuid::new_v5(&FINGERPRINT_NAMESPACE, &buf)
    }
}

/// Block range an MEV Share bundle may land in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MevBundleInclusion {
    pub block: U64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_block: Option<U64>,
}

/// A single element of an MEV Share bundle body: either a raw transaction or
/// a nested bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MevBundleBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle: Option<Box<MevSendBundleArgs>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_revert: Option<bool>,
}

/// Refund constraint of an MEV Share bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MevBundleRefund {
    pub body_idx: usize,
    pub percent: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MevBundleValidity {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refund: Vec<MevBundleRefund>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MevBundleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<Address>,
}

/// Arguments of `mev_sendBundle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MevSendBundleArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub inclusion: MevBundleInclusion,
    #[serde(default)]
    pub body: Vec<MevBundleBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<MevBundleValidity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MevBundleMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_uuid: Option<String>,
}

impl MevSendBundleArgs {
    pub fn fingerprint(&self) -> Uuid {
        let mut buf = Vec::new();
        if let Some(ref replacement_uuid) = self.replacement_uuid {
            buf.extend_from_slice(replacement_uuid.as_bytes());
            if let Some(signer) = self.metadata.as_ref().and_then(|m| m.signer) {
                buf.extend_from_slice(signer.as_slice());
            }
        } else {
            self.content_bytes(&mut buf);
        }
        Uuid::new_v5(&FINGERPRINT_NAMESPACE, &buf)
    }

    fn content_bytes(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.inclusion.block.to::<u64>().to_be_bytes());
        let max_block = self.inclusion.max_block.unwrap_or(self.inclusion.block);
        buf.extend_from_slice(&max_block.to::<u64>().to_be_bytes());
        for item in &self.body {
            if let Some(ref tx) = item.tx {
                buf.extend_from_slice(keccak256(tx).as_slice());
            }
            if let Some(ref bundle) = item.bundle {
                bundle.content_bytes(buf);
            }
            buf.push(item.can_revert.unwrap_or(false) as u8);
        }
    }
}

/// Arguments of `eth_cancelBundle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthCancelBundleArgs {
    pub replacement_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_address: Option<Address>,
}

/// Arguments of `eth_sendRawTransaction`: a single raw EIP-2718 encoded
/// transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EthSendRawTransactionArgs(pub Bytes);

impl EthSendRawTransactionArgs {
    /// Hash of the raw transaction.
    pub fn tx_hash(&self) -> B256 {
        keccak256(&self.0)
    }

    pub fn fingerprint(&self) -> Uuid {
        Uuid::new_v5(&FINGERPRINT_NAMESPACE, self.tx_hash().as_slice())
    }
}

/// Arguments of `bid_subsidiseBlock`: the block number to subsidise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BidSubsidiseBlockArgs(pub U64);

impl BidSubsidiseBlockArgs {
    pub fn fingerprint(&self) -> Uuid {
        Uuid::new_v5(&FINGERPRINT_NAMESPACE, &self.0.to::<u64>().to_be_bytes())
    }
}

/// The payload of a parsed request. Exactly one variant per request; the
/// method name is derived from the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPayload {
    EthSendBundle(EthSendBundleArgs),
    MevSendBundle(MevSendBundleArgs),
    EthCancelBundle(EthCancelBundleArgs),
    EthSendRawTransaction(EthSendRawTransactionArgs),
    BidSubsidiseBlock(BidSubsidiseBlockArgs),
}

impl RequestPayload {
    /// The JSON-RPC method this payload was submitted under.
    pub fn method(&self) -> &'static str {
        match self {
            Self::EthSendBundle(_) => ETH_SEND_BUNDLE_METHOD,
            Self::MevSendBundle(_) => MEV_SEND_BUNDLE_METHOD,
            Self::EthCancelBundle(_) => ETH_CANCEL_BUNDLE_METHOD,
            Self::EthSendRawTransaction(_) => ETH_SEND_RAW_TRANSACTION_METHOD,
            Self::BidSubsidiseBlock(_) => BID_SUBSIDISE_BLOCK_METHOD,
        }
    }

    /// Content fingerprint for deduplication. Cancellations have none so they
    /// are never suppressed.
    pub fn fingerprint(&self) -> Option<Uuid> {
        match self {
            Self::EthSendBundle(bundle) => Some(bundle.fingerprint()),
            Self::MevSendBundle(bundle) => Some(bundle.fingerprint()),
            Self::EthCancelBundle(_) => None,
            Self::EthSendRawTransaction(tx) => Some(tx.fingerprint()),
            Self::BidSubsidiseBlock(bid) => Some(bid.fingerprint()),
        }
    }

    /// Serialize the payload back into the single JSON-RPC parameter it was
    /// received as, for verbatim forwarding.
    pub fn param_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::EthSendBundle(bundle) => serde_json::to_value(bundle),
            Self::MevSendBundle(bundle) => serde_json::to_value(bundle),
            Self::EthCancelBundle(cancel) => serde_json::to_value(cancel),
            Self::EthSendRawTransaction(tx) => serde_json::to_value(tx),
            Self::BidSubsidiseBlock(bid) => serde_json::to_value(bid),
        }
    }
}

/// A validated, normalised submission together with its ingress metadata.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    /// Whether the request arrived on the public surface.
    pub public_endpoint: bool,
    /// The address recovered from the request signature header.
    pub signer: Address,
    /// Name of the sending peer. Empty for local producers, `"flashbots"` for
    /// the Flashbots signer.
    pub peer_name: String,
    /// Time of receipt.
    pub received_at: OffsetDateTime,
    /// Content fingerprint, if the method is deduplicated.
    pub fingerprint: Option<Uuid>,
    pub payload: RequestPayload,
}

impl ParsedRequest {
    pub fn new(
        public_endpoint: bool,
        signer: Address,
        peer_name: String,
        payload: RequestPayload,
    ) -> Self {
        Self {
            public_endpoint,
            signer,
            peer_name,
            received_at: OffsetDateTime::now_utc(),
            fingerprint: payload.fingerprint(),
            payload,
        }
    }

    pub fn method(&self) -> &'static str {
        self.payload.method()
    }

    /// Label used in per-origin metrics.
    pub fn origin(&self) -> &str {
        if self.peer_name.is_empty() {
            "local"
        } else {
            &self.peer_name
        }
    }
}
