//! Semantic validation of incoming submissions, driven by the current
//! upstream block number and the ingress surface.

use crate::types::{EthCancelBundleArgs, EthSendBundleArgs, MevSendBundleArgs};

/// Default number of blocks a public bundle may target past the current one.
pub const DEFAULT_MAX_BLOCK_LOOKAHEAD: u64 = 5;

/// Supported MEV Share bundle versions.
const SUPPORTED_MEV_BUNDLE_VERSIONS: [&str; 2] = ["beta-1", "v0.1"];

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("bundle contains no transactions")]
    EmptyBundle,
    #[error("target block is not set")]
    MissingTargetBlock,
    #[error("target block {target} outside window [{min}, {max}]")]
    BlockOutOfWindow { target: u64, min: u64, max: u64 },
    #[error("max block {max_block} is below target block {target}")]
    InvertedBlockRange { target: u64, max_block: u64 },
    #[error("unsupported bundle version {0}")]
    UnsupportedVersion(String),
    #[error("bundle body is empty")]
    EmptyBody,
    #[error("bundle body item must contain exactly one of tx or bundle")]
    AmbiguousBodyItem,
    #[error("replacement uuid is not set")]
    MissingReplacementUuid,
    #[error("signing address is not set")]
    MissingSigningAddress,
    #[error("empty transaction data")]
    EmptyRawTransaction,
}

impl ValidationError {
    /// The payload field the error refers to, surfaced in the JSON-RPC error
    /// body.
    pub fn field(&self) -> &'static str {
        match self {
            Self::EmptyBundle | Self::EmptyRawTransaction => "txs",
            Self::MissingTargetBlock | Self::BlockOutOfWindow { .. } => "blockNumber",
            Self::InvertedBlockRange { .. } => "maxBlock",
            Self::UnsupportedVersion(_) => "version",
            Self::EmptyBody | Self::AmbiguousBodyItem => "body",
            Self::MissingReplacementUuid => "replacementUuid",
            Self::MissingSigningAddress => "signingAddress",
        }
    }
}

/// The window of acceptable target blocks for the given surface. The local
/// surface only accepts the current block and its direct successor; the
/// public surface accepts the configured lookahead.
fn block_window(public_endpoint: bool, current_block: u64, lookahead: u64) -> (u64, u64) {
    if public_endpoint {
        (current_block, current_block.saturating_add(lookahead))
    } else {
        (current_block, current_block.saturating_add(1))
    }
}

fn check_block_in_window(
    target: u64,
    public_endpoint: bool,
    current_block: u64,
    lookahead: u64,
) -> Result<(), ValidationError> {
    let (min, max) = block_window(public_endpoint, current_block, lookahead);
    if target < min || target > max {
        return Err(ValidationError::BlockOutOfWindow { target, min, max });
    }
    Ok(())
}

pub fn validate_eth_send_bundle(
    bundle: &EthSendBundleArgs,
    public_endpoint: bool,
    current_block: u64,
    lookahead: u64,
) -> Result<(), ValidationError> {
    if bundle.txs.is_empty() {
        return Err(ValidationError::EmptyBundle);
    }
    let target = bundle.block_number.to::<u64>();
    if target == 0 {
        return Err(ValidationError::MissingTargetBlock);
    }
    check_block_in_window(target, public_endpoint, current_block, lookahead)
}

pub fn validate_mev_send_bundle(
    bundle: &MevSendBundleArgs,
    public_endpoint: bool,
    current_block: u64,
    lookahead: u64,
) -> Result<(), ValidationError> {
    if let Some(ref version) = bundle.version {
        if !SUPPORTED_MEV_BUNDLE_VERSIONS.contains(&version.as_str()) {
            return Err(ValidationError::UnsupportedVersion(version.clone()));
        }
    }

    // An empty body with a replacement key is a cancellation and flows
    // through unchanged.
    if bundle.body.is_empty() {
        return if bundle.replacement_uuid.is_some() {
            Ok(())
        } else {
            Err(ValidationError::EmptyBody)
        };
    }
    validate_mev_bundle_body(bundle)?;

    let target = bundle.inclusion.block.to::<u64>();
    if target == 0 {
        return Err(ValidationError::MissingTargetBlock);
    }
    if let Some(max_block) = bundle.inclusion.max_block.map(|b| b.to::<u64>()) {
        if max_block < target {
            return Err(ValidationError::InvertedBlockRange { target, max_block });
        }
    }
    check_block_in_window(target, public_endpoint, current_block, lookahead)
}

/// Structural check of the (possibly nested) bundle body: every item carries
/// exactly one of a raw transaction or a nested bundle.
fn validate_mev_bundle_body(bundle: &MevSendBundleArgs) -> Result<(), ValidationError> {
    for item in &bundle.body {
        match (&item.tx, &item.bundle) {
            (Some(_), None) => {}
            (None, Some(inner)) => {
                if inner.body.is_empty() {
                    return Err(ValidationError::EmptyBody);
                }
                validate_mev_bundle_body(inner)?;
            }
            _ => return Err(ValidationError::AmbiguousBodyItem),
        }
    }
    Ok(())
}

pub fn validate_eth_cancel_bundle(
    cancel: &EthCancelBundleArgs,
    public_endpoint: bool,
) -> Result<(), ValidationError> {
    if cancel.replacement_uuid.is_empty() {
        return Err(ValidationError::MissingReplacementUuid);
    }
    // Local cancellations get the caller's recovered address stamped in
    // afterwards, so only public ones must already carry an identity.
    if public_endpoint && cancel.signing_address.is_none() {
        return Err(ValidationError::MissingSigningAddress);
    }
    Ok(())
}

pub fn validate_eth_send_raw_transaction(raw_tx: &[u8]) -> Result<(), ValidationError> {
    if raw_tx.is_empty() {
        return Err(ValidationError::EmptyRawTransaction);
    }
    Ok(())
}
