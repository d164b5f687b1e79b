use std::time::Duration;

/// Header name for the Flashbots request signature, in the form
/// `signer_address:signature`.
pub const FLASHBOTS_SIGNATURE_HEADER: &str = "X-Flashbots-Signature";

/// JSON-RPC method name for sending bundles.
pub const ETH_SEND_BUNDLE_METHOD: &str = "eth_sendBundle";

/// JSON-RPC method name for sending MEV Share bundles.
pub const MEV_SEND_BUNDLE_METHOD: &str = "mev_sendBundle";

/// JSON-RPC method name for cancelling bundles.
pub const ETH_CANCEL_BUNDLE_METHOD: &str = "eth_cancelBundle";

/// JSON-RPC method name for sending raw transactions.
pub const ETH_SEND_RAW_TRANSACTION_METHOD: &str = "eth_sendRawTransaction";

/// JSON-RPC method name for block subsidy bids.
pub const BID_SUBSIDISE_BLOCK_METHOD: &str = "bid_subsidiseBlock";

pub const UNKNOWN: &str = "unknown";

/// Peer-name tag for requests signed by the Flashbots signer.
pub const FLASHBOTS_PEER_NAME: &str = "flashbots";

/// The maximum request size in bytes (30 MiB).
pub const MAX_REQUEST_SIZE_BYTES: usize = 30 * 1024 * 1024;

/// Default public HTTPS port of peer proxies.
pub const DEFAULT_PUBLIC_PORT: u16 = 5544;

/// Default port of the plaintext certificate side-channel.
pub const DEFAULT_CERT_PORT: u16 = 14727;

/// Per-call timeout for outbound RPC deliveries.
pub const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for peer registry and peer certificate fetches.
pub const REFRESH_FETCH_TIMEOUT: Duration = Duration::from_secs(3);

/// TTL of the cached upstream block number.
pub const BLOCK_NUMBER_CACHE_TTL: Duration = Duration::from_secs(3);

/// Grace period for worker drain and server close on shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
