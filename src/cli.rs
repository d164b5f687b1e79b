use crate::{consts::MAX_REQUEST_SIZE_BYTES, validation::DEFAULT_MAX_BLOCK_LOOKAHEAD};
use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use clap::{Parser, ValueHint};
use std::{net::SocketAddr, str::FromStr, time::Duration};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Signed JSON-RPC orderflow gateway")]
pub struct MeshProxyArgs {
    /// Listen socket address of the local HTTPS surface.
    #[clap(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:9090")]
    pub listen_addr: SocketAddr,

    /// Listen socket address of the public HTTPS surface.
    #[clap(long, env = "PUBLIC_LISTEN_ADDR", default_value = "0.0.0.0:5544")]
    pub public_listen_addr: SocketAddr,

    /// Listen socket address of the plaintext certificate surface.
    #[clap(long, env = "CERT_LISTEN_ADDR", default_value = "0.0.0.0:14727")]
    pub cert_listen_addr: SocketAddr,

    /// Address of this proxy reachable from outside. Added to the generated
    /// certificate hosts.
    #[clap(long, env = "EXTERNAL_ADDR", default_value = "127.0.0.1")]
    pub external_addr: String,

    /// The URL of the local builder receiving all orderflow.
    #[clap(long, value_hint = ValueHint::Url, env = "BUILDER_ENDPOINT", default_value = "http://127.0.0.1:8546")]
    pub builder_endpoint: String,

    /// The JSON-RPC upstream queried for `eth_blockNumber`.
    #[clap(long, value_hint = ValueHint::Url, env = "ETH_ENDPOINT", default_value = "http://127.0.0.1:8545")]
    pub eth_endpoint: String,

    /// The archival sink for local orderflow. Archiving is disabled when
    /// unset.
    #[clap(long, value_hint = ValueHint::Url, env = "ARCHIVE_ENDPOINT")]
    pub archive_endpoint: Option<String>,

    /// The URL of the Config Hub publishing the peer set. An empty static
    /// registry is used when unset.
    #[clap(long, value_hint = ValueHint::Url, env = "CONFIG_HUB_ENDPOINT")]
    pub config_hub_endpoint: Option<String>,

    /// The Flashbots signer address with elevated rights.
    #[clap(long, env = "FLASHBOTS_SIGNER_ADDRESS")]
    pub flashbots_signer: Option<Address>,

    /// The orderflow signer of this proxy.
    #[clap(long, env = "ORDERFLOW_SIGNER", hide_env_values = true)]
    pub orderflow_signer: Option<PrivateKeySigner>,

    /// Validity of the generated certificate.
    #[clap(long, value_parser = humantime::parse_duration, default_value = "365d")]
    pub cert_duration: Duration,

    /// Hosts of the generated certificate.
    #[clap(long, value_delimiter = ',', default_value = "127.0.0.1,localhost")]
    pub cert_hosts: Vec<String>,

    /// How far past the current block a public bundle may target.
    #[clap(long, default_value_t = DEFAULT_MAX_BLOCK_LOOKAHEAD)]
    pub max_block_lookahead: u64,

    /// Capacity of the share queue.
    #[clap(long, default_value_t = 1024)]
    pub share_queue_size: usize,

    /// Capacity of the archive queue.
    #[clap(long, default_value_t = 1024)]
    pub archive_queue_size: usize,

    /// Capacity of the dedup cache, in fingerprints.
    #[clap(long, default_value_t = 100_000)]
    pub dedup_cache_size: u64,

    /// Peer registry refresh interval in seconds.
    #[clap(long, default_value_t = 30)]
    pub peer_update_interval_s: u64,

    /// The maximum request size in bytes.
    #[clap(long, default_value_t = MAX_REQUEST_SIZE_BYTES)]
    pub max_request_size: usize,

    /// Prometheus metrics listen address. Metrics are served on
    /// `$metrics-addr/metrics`.
    #[clap(long, env = "METRICS_ADDR", default_value = "127.0.0.1:8090")]
    pub metrics_addr: SocketAddr,

    /// Outputs logs in JSON format if enabled.
    #[clap(long = "log-json", default_value_t = false, env = "LOG_JSON")]
    pub log_json: bool,

    /// Log debug messages.
    #[clap(long = "log-debug", default_value_t = false, env = "LOG_DEBUG")]
    pub log_debug: bool,

    /// Generate a uuid and add it to all log messages.
    #[clap(long = "log-uid", default_value_t = false)]
    pub log_uid: bool,

    /// Add a `service` tag to all log messages.
    #[clap(long = "log-service", env = "LOG_SERVICE")]
    pub log_service: Option<String>,

    /// Flag indicating whether GZIP support is enabled.
    #[clap(long = "http.enable-gzip", default_value_t = false)]
    pub gzip_enabled: bool,
}

impl Default for MeshProxyArgs {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from_str("127.0.0.1:0").expect("valid address"),
            public_listen_addr: SocketAddr::from_str("127.0.0.1:0").expect("valid address"),
            cert_listen_addr: SocketAddr::from_str("127.0.0.1:0").expect("valid address"),
            external_addr: "127.0.0.1".to_string(),
            builder_endpoint: "http://127.0.0.1:8546".to_string(),
            eth_endpoint: "http://127.0.0.1:8545".to_string(),
            archive_endpoint: None,
            config_hub_endpoint: None,
            flashbots_signer: None,
            orderflow_signer: None,
            cert_duration: Duration::from_secs(60 * 60 * 24 * 365),
            cert_hosts: vec!["127.0.0.1".to_string(), "localhost".to_string()],
            max_block_lookahead: DEFAULT_MAX_BLOCK_LOOKAHEAD,
            share_queue_size: 1024,
            archive_queue_size: 1024,
            dedup_cache_size: 100_000,
            peer_update_interval_s: 30,
            max_request_size: MAX_REQUEST_SIZE_BYTES,
            metrics_addr: SocketAddr::from_str("127.0.0.1:0").expect("valid address"),
            log_json: false,
            log_debug: false,
            log_uid: false,
            log_service: None,
            gzip_enabled: false,
        }
    }
}

impl MeshProxyArgs {
    /// Set the local builder endpoint.
    pub fn builder_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.builder_endpoint = endpoint.into();
        self
    }

    /// Set the block number upstream.
    pub fn eth_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.eth_endpoint = endpoint.into();
        self
    }

    /// Set the archival sink endpoint.
    pub fn archive_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.archive_endpoint = Some(endpoint.into());
        self
    }

    /// Set the Flashbots signer address.
    pub fn flashbots_signer(mut self, address: Address) -> Self {
        self.flashbots_signer = Some(address);
        self
    }

    /// Set the share queue capacity.
    pub fn share_queue_size(mut self, size: usize) -> Self {
        self.share_queue_size = size;
        self
    }

    /// Enable support for gzip encoded requests.
    pub fn gzip_enabled(mut self) -> Self {
        self.gzip_enabled = true;
        self
    }
}
