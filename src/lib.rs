//! Orderflow gateway for a mesh of mutually-replicating proxies.
//!
//! Receives signed bundle and transaction submissions from trusted local
//! producers and untrusted remote peers, validates and deduplicates them, and
//! fans each submission out to the local builder and every connected peer.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use std::{future::IntoFuture, io, net::TcpListener as StdTcpListener, sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};
use tracing::*;

use alloy_signer_local::PrivateKeySigner;

pub mod block_number;
pub mod cache;
pub mod cli;
pub mod confighub;
pub mod consts;
pub mod forwarder;
pub mod ingress;
pub mod jsonrpc;
pub mod metrics;
pub mod peers;
pub mod tls;
pub mod types;
pub mod utils;
pub mod validation;

use crate::{
    block_number::BlockNumberSource,
    cache::DedupCache,
    cli::MeshProxyArgs,
    confighub::{ConfigHub, HubClient, ProxyCredentials, StaticConfigHub},
    consts::SHUTDOWN_TIMEOUT,
    forwarder::{spawn_rpc_forwarder, ArchiveWorker, ShareWorker},
    ingress::OrderflowIngress,
    peers::{PeerSet, PeersUpdater, SignedRpcClient},
    tls::{generate_tls_identity, TlsIdentity},
};

/// Initialize tracing with an env-filter and an optional JSON layer.
pub fn init_tracing(log_json: bool, log_debug: bool) {
    let default_level = if log_debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let registry = tracing_subscriber::registry().with(
        EnvFilter::builder().with_default_directive(default_level.into()).from_env_lossy(),
    );
    if log_json {
        let _ = registry.with(tracing_subscriber::fmt::layer().json()).try_init();
    } else {
        let _ = registry.with(tracing_subscriber::fmt::layer()).try_init();
    }
}

/// The pre-bound listeners of the four HTTP surfaces. Binding up front makes
/// listener failures startup errors.
#[derive(Debug)]
pub struct Listeners {
    pub public: StdTcpListener,
    pub local: StdTcpListener,
    pub cert: StdTcpListener,
    pub metrics: Option<StdTcpListener>,
}

impl Listeners {
    /// Bind all surfaces from the configured addresses.
    pub fn bind(args: &MeshProxyArgs) -> io::Result<Self> {
        Ok(Self {
            public: bind_std(args.public_listen_addr)?,
            local: bind_std(args.listen_addr)?,
            cert: bind_std(args.cert_listen_addr)?,
            metrics: Some(bind_std(args.metrics_addr)?),
        })
    }
}

fn bind_std(addr: std::net::SocketAddr) -> io::Result<StdTcpListener> {
    let listener = StdTcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

/// Generate the proxy's TLS identity from the configured hosts, always
/// including the advertised external address.
fn generate_identity(args: &MeshProxyArgs) -> Result<TlsIdentity, tls::TlsIdentityError> {
    let mut hosts = args.cert_hosts.clone();
    if !hosts.contains(&args.external_addr) {
        hosts.push(args.external_addr.clone());
    }
    generate_tls_identity(&hosts, args.cert_duration)
}

/// Run the proxy until the shutdown token is cancelled.
pub async fn run(args: MeshProxyArgs, shutdown: CancellationToken) -> eyre::Result<()> {
    // Failure to generate the identity or to bind a listener is fatal.
    let identity = generate_identity(&args)?;
    let listeners = Listeners::bind(&args)?;

    let signer = match args.orderflow_signer.clone() {
        Some(signer) => signer,
        None => {
            warn!("No orderflow signer was configured, using a random signer. Fix this by passing `--orderflow-signer <PRIVATE KEY>`");
            PrivateKeySigner::random()
        }
    };

    match args.config_hub_endpoint.clone() {
        Some(url) => {
            debug!(url, "running with config hub");
            let hub = HubClient::new(url);
            let credentials = ProxyCredentials {
                ecdsa_pubkey_address: signer.address(),
                tls_cert: identity.cert_pem.clone(),
            };
            if let Err(error) = hub.register(&credentials).await {
                warn!(%error, "failed to register credentials with config hub");
            }
            run_with_hub(args, hub, identity, signer, listeners, shutdown).await
        }
        None => {
            warn!("no config hub endpoint configured, running with a static empty registry");
            let hub = StaticConfigHub::default();
            run_with_hub(args, hub, identity, signer, listeners, shutdown).await
        }
    }
}

/// Run the proxy against the given registry, identity and listeners. Split
/// out of [`run`] so tests can inject a static registry and pre-bound
/// listeners.
pub async fn run_with_hub<H>(
    args: MeshProxyArgs,
    hub: H,
    identity: TlsIdentity,
    signer: PrivateKeySigner,
    listeners: Listeners,
    shutdown: CancellationToken,
) -> eyre::Result<()>
where
    H: ConfigHub + Send + Sync + 'static,
{
    // Harmless when a process-level provider is already installed.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    info!(address = %signer.address(), "orderflow signer configured");
    let tls_config = RustlsConfig::from_pem(
        identity.cert_pem.clone().into_bytes(),
        identity.key_pem.clone().into_bytes(),
    )
    .await?;

    // Peer set and refresh task. The initial refresh is synchronous; a
    // failing registry at startup is fatal.
    let peers = Arc::new(PeerSet::default());
    let updater = PeersUpdater::new(
        hub,
        peers.clone(),
        signer.clone(),
        Duration::from_secs(args.peer_update_interval_s),
        shutdown.clone(),
    );
    updater.refresh().await.map_err(|error| eyre::eyre!("initial peer refresh failed: {error}"))?;
    tokio::spawn(updater.run());

    // Queues and workers.
    let (share_tx, share_rx) = mpsc::channel(args.share_queue_size);
    let (archive_tx, archive_rx) = mpsc::channel(args.archive_queue_size);

    let builder_client =
        SignedRpcClient::new("local-builder", args.builder_endpoint.clone(), signer.clone())?;
    let builder_tx = spawn_rpc_forwarder(builder_client);
    let share_worker = tokio::spawn(ShareWorker::new(share_rx, builder_tx, peers.clone()).run());

    let archive_sink = match args.archive_endpoint.clone() {
        Some(endpoint) => Some(SignedRpcClient::new("archive", endpoint, signer.clone())?),
        None => {
            warn!("no archive endpoint configured, local orderflow will not be archived");
            None
        }
    };
    let archive_worker = tokio::spawn(ArchiveWorker::new(archive_rx, archive_sink).run());

    let ingress = Arc::new(OrderflowIngress {
        flashbots_signer: args.flashbots_signer,
        peers,
        dedup_cache: DedupCache::new(args.dedup_cache_size),
        block_numbers: BlockNumberSource::new(args.eth_endpoint.clone()),
        max_block_lookahead: args.max_block_lookahead,
        gzip_enabled: args.gzip_enabled,
        share_tx,
        archive_tx,
        shutdown: shutdown.clone(),
        cert_pem: identity.cert_pem.clone(),
    });

    // Public and local HTTPS surfaces share the method set; the subsidy gate
    // differs per handler.
    let public_router = Router::new()
        .route("/", post(OrderflowIngress::public_handler))
        .route("/health", get(|| async {}))
        .route("/livez", get(|| async {}))
        .layer(DefaultBodyLimit::max(args.max_request_size))
        .with_state(ingress.clone());
    let local_router = Router::new()
        .route("/", post(OrderflowIngress::local_handler))
        .route("/health", get(|| async {}))
        .route("/livez", get(|| async {}))
        .layer(DefaultBodyLimit::max(args.max_request_size))
        .with_state(ingress.clone());
    let cert_router =
        Router::new().route("/cert", get(OrderflowIngress::cert_handler)).with_state(ingress.clone());

    let public_handle = axum_server::Handle::new();
    let local_handle = axum_server::Handle::new();

    let addr = listeners.public.local_addr()?;
    info!(target: "ingress", ?addr, "starting public ingress server");
    let public_server = axum_server::from_tcp_rustls(listeners.public, tls_config.clone())
        .handle(public_handle.clone())
        .serve(public_router.into_make_service());

    let addr = listeners.local.local_addr()?;
    info!(target: "ingress", ?addr, "starting local ingress server");
    let local_server = axum_server::from_tcp_rustls(listeners.local, tls_config)
        .handle(local_handle.clone())
        .serve(local_router.into_make_service());

    let addr = listeners.cert.local_addr()?;
    info!(target: "ingress", ?addr, "starting cert server");
    let cert_server = axum::serve(TcpListener::from_std(listeners.cert)?, cert_router)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move { shutdown.cancelled().await }
        });

    if let Some(metrics_listener) = listeners.metrics {
        let metrics_router = Router::new().route("/metrics", get(|| async { metrics::render() }));
        let addr = metrics_listener.local_addr()?;
        info!(?addr, "starting metrics server");
        let metrics_server = axum::serve(TcpListener::from_std(metrics_listener)?, metrics_router)
            .with_graceful_shutdown({
                let shutdown = shutdown.clone();
                async move { shutdown.cancelled().await }
            });
        tokio::spawn(serve_logged("metrics", metrics_server));
    }

    // Propagate shutdown into the TLS acceptors.
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown.cancelled().await;
            public_handle.graceful_shutdown(Some(SHUTDOWN_TIMEOUT));
            local_handle.graceful_shutdown(Some(SHUTDOWN_TIMEOUT));
        }
    });

    // Server errors past startup are logged, not fatal.
    tokio::join!(
        serve_logged("public", public_server),
        serve_logged("local", local_server),
        serve_logged("cert", cert_server),
    );

    // Dropping the ingress state closes the queues; the workers drain what is
    // left within the grace period.
    drop(ingress);
    let drain = async {
        let _ = share_worker.await;
        let _ = archive_worker.await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await.is_err() {
        warn!("workers did not drain within the grace period");
    }

    info!("meshproxy stopped");
    Ok(())
}

async fn serve_logged(name: &'static str, server: impl IntoFuture<Output = io::Result<()>>) {
    if let Err(error) = server.await {
        error!(server = name, %error, "server error");
    }
}
