use crate::{
    block_number::BlockNumberError, jsonrpc::JsonRpcError, utils::SignatureError,
    validation::ValidationError,
};

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// Semantic validation failure.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Missing or invalid request signature.
    #[error(transparent)]
    Signature(#[from] SignatureError),
    /// The upstream block number could not be determined.
    #[error(transparent)]
    BlockNumber(#[from] BlockNumberError),
    /// Malformed method parameter.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// Public-surface signer not in the allow-list.
    #[error("unknown peer")]
    UnknownPeer,
    /// Subsidy called on the local surface.
    #[error("subsidy called on local endpoint")]
    SubsidyWrongEndpoint,
    /// Subsidy called publicly by a non-Flashbots signer.
    #[error("subsidy called by non-flashbots signer")]
    SubsidyWrongCaller,
}

impl IngressError {
    /// Convert [`IngressError`] into [`JsonRpcError`].
    pub fn into_jsonrpc_error(self) -> JsonRpcError {
        match self {
            Self::Validation(error) => {
                JsonRpcError::ValidationFailed { field: error.field(), reason: error.to_string() }
            }
            Self::Signature(SignatureError::Missing) => JsonRpcError::SignatureMissing,
            Self::Signature(SignatureError::Invalid) => JsonRpcError::SignatureInvalid,
            // Block fetch failures are an internal condition, not the caller's.
            Self::BlockNumber(_) => JsonRpcError::Internal,
            Self::Serde(_) => JsonRpcError::InvalidParams,
            Self::UnknownPeer => JsonRpcError::UnknownPeer,
            Self::SubsidyWrongEndpoint => JsonRpcError::SubsidyWrongEndpoint,
            Self::SubsidyWrongCaller => JsonRpcError::SubsidyWrongCaller,
        }
    }

    /// Returns `true` if it is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
