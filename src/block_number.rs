//! Read-through cache of the upstream chain head, used to drive block-window
//! validation.

use crate::{
    consts::{BLOCK_NUMBER_CACHE_TTL, RPC_CALL_TIMEOUT},
    jsonrpc::{JsonRpcRequest, JsonRpcResponse, JsonRpcResponseTy},
};
use std::{
    sync::RwLock,
    time::{Duration, Instant},
};

#[derive(Debug, thiserror::Error)]
pub enum BlockNumberError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("upstream returned error: {0}")]
    Rpc(String),
    #[error("invalid block number: {0}")]
    InvalidNumber(String),
}

#[derive(Debug, Clone, Copy)]
struct CachedBlock {
    number: u64,
    fetched_at: Instant,
}

#[derive(Debug)]
enum Inner {
    /// `eth_blockNumber` against a configured upstream.
    Remote { client: reqwest::Client, endpoint: String, cache: RwLock<Option<CachedBlock>> },
    /// A fixed block number, for tests and offline runs.
    Fixed(u64),
}

/// Source of the current block number with a short read-through cache.
/// Stale reads within the TTL are acceptable.
#[derive(Debug)]
pub struct BlockNumberSource {
    inner: Inner,
    ttl: Duration,
}

impl BlockNumberSource {
    pub fn new(endpoint: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RPC_CALL_TIMEOUT)
            .build()
            .expect("to build block number client");
        Self {
            inner: Inner::Remote { client, endpoint, cache: RwLock::new(None) },
            ttl: BLOCK_NUMBER_CACHE_TTL,
        }
    }

    /// A source that always reports the given block number.
    pub fn fixed(number: u64) -> Self {
        Self { inner: Inner::Fixed(number), ttl: BLOCK_NUMBER_CACHE_TTL }
    }

    /// The current block number, refreshed from upstream when the cached
    /// value is older than the TTL.
    pub async fn block_number(&self) -> Result<u64, BlockNumberError> {
        let (client, endpoint, cache) = match &self.inner {
            Inner::Fixed(number) => return Ok(*number),
            Inner::Remote { client, endpoint, cache } => (client, endpoint, cache),
        };

        if let Some(cached) = *cache.read().expect("block cache lock poisoned") {
            if cached.fetched_at.elapsed() <= self.ttl {
                return Ok(cached.number);
            }
        }

        let number = fetch_block_number(client, endpoint).await?;
        *cache.write().expect("block cache lock poisoned") =
            Some(CachedBlock { number, fetched_at: Instant::now() });
        Ok(number)
    }
}

async fn fetch_block_number(
    client: &reqwest::Client,
    endpoint: &str,
) -> Result<u64, BlockNumberError> {
    let request = JsonRpcRequest::<serde_json::Value> {
        id: 1,
        jsonrpc: crate::jsonrpc::JSONRPC_VERSION_2.to_owned(),
        method: "eth_blockNumber".to_owned(),
        params: Some(vec![]),
    };
    let response: JsonRpcResponse<String> =
        client.post(endpoint).json(&request).send().await?.json().await?;

    match response.result_or_error {
        JsonRpcResponseTy::Result(number) => parse_block_number(&number),
        JsonRpcResponseTy::Error { message, .. } => Err(BlockNumberError::Rpc(message.to_string())),
    }
}

fn parse_block_number(number: &str) -> Result<u64, BlockNumberError> {
    let digits = number.strip_prefix("0x").unwrap_or(number);
    u64::from_str_radix(digits, 16)
        .map_err(|_| BlockNumberError::InvalidNumber(number.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_block_number_hex() {
        assert_eq!(parse_block_number("0x10").unwrap(), 16);
        assert_eq!(parse_block_number("0x0").unwrap(), 0);
        assert!(parse_block_number("nonsense").is_err());
    }

    #[tokio::test]
    async fn fixed_source_reports_constant() {
        let source = BlockNumberSource::fixed(42);
        assert_eq!(source.block_number().await.unwrap(), 42);
    }
}
