use crate::consts::FLASHBOTS_SIGNATURE_HEADER;
use alloy_consensus::crypto::secp256k1::recover_signer;
use alloy_primitives::{eip191_hash_message, keccak256, Address};
use alloy_signer::{Signature, SignerSync as _};
use alloy_signer_local::PrivateKeySigner;
use axum::http::HeaderMap;
use std::str::FromStr as _;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The signature header is absent.
    #[error("request signature missing")]
    Missing,
    /// The header is malformed, the signature does not recover, or the
    /// recovered address does not match the claimed one.
    #[error("invalid request signature")]
    Invalid,
}

/// Sign and build the signature header in the form of `signer_address:signature`.
///
/// The signed message is the EIP-191 hash of the hex-encoded keccak digest of
/// the request body (the Flashbots signing scheme).
pub fn build_signature_header(signer: &PrivateKeySigner, body: &[u8]) -> String {
    let body_hash = keccak256(body);
    let signature =
        signer.sign_message_sync(format!("{body_hash:?}").as_bytes()).expect("to sign message");
    format!("{:?}:{}", signer.address(), signature)
}

/// Parse the signature from the request headers and recover the signing
/// address, checking it against the claimed one.
pub fn recover_signature_header(
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Address, SignatureError> {
    let header = headers.get(FLASHBOTS_SIGNATURE_HEADER).ok_or(SignatureError::Missing)?;
    let (address, signature) = header
        .to_str()
        .ok()
        .and_then(|header| header.split_once(':'))
        .ok_or(SignatureError::Invalid)?;
    let address = Address::from_str(address).map_err(|_| SignatureError::Invalid)?;
    let signature = Signature::from_str(signature).map_err(|_| SignatureError::Invalid)?;

    let hash_str = format!("{:?}", keccak256(body));
    let message_hash = eip191_hash_message(hash_str.as_bytes());
    let signer = recover_signer(&signature, message_hash).map_err(|_| SignatureError::Invalid)?;

    if signer != address {
        return Err(SignatureError::Invalid);
    }
    Ok(signer)
}

/// Helpers shared between unit and integration tests.
pub mod testutils {
    use super::build_signature_header;
    use crate::consts::FLASHBOTS_SIGNATURE_HEADER;
    use alloy_signer_local::PrivateKeySigner;
    use serde_json::json;

    /// Build a signed JSON-RPC request body for the given method and single
    /// parameter. Returns the body and the value of the signature header.
    pub fn signed_json_request(
        signer: &PrivateKeySigner,
        method: &str,
        param: serde_json::Value,
    ) -> (Vec<u8>, String) {
        let request = json!({
            "id": 1,
            "jsonrpc": "2.0",
            "method": method,
            "params": [param],
        });
        let body = serde_json::to_vec(&request).expect("to serialize request");
        let header = build_signature_header(signer, &body);
        (body, header)
    }

    /// Name of the signature header, re-exported for test call sites.
    pub const SIGNATURE_HEADER: &str = FLASHBOTS_SIGNATURE_HEADER;
}
