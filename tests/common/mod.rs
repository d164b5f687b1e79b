//! Shared helpers for the end-to-end tests: mock builder/archive receivers,
//! mock TLS peers, a mock eth node, and proxy spawn helpers.
#![allow(dead_code)]

use alloy_signer_local::PrivateKeySigner;
use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use meshproxy::{
    cli::MeshProxyArgs,
    confighub::{PeerInfo, StaticConfigHub},
    consts::FLASHBOTS_SIGNATURE_HEADER,
    jsonrpc::{JsonRpcRequest, JsonRpcResponse},
    run_with_hub,
    tls::{generate_tls_identity, TlsIdentity},
    utils::testutils::signed_json_request,
    Listeners,
};
use std::{
    net::{SocketAddr, TcpListener as StdTcpListener},
    sync::Arc,
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn install_crypto() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// A JSON-RPC request captured by a mock receiver.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub params: Vec<serde_json::Value>,
    pub signature: Option<String>,
}

async fn capture_handler(
    State(captured_tx): State<Arc<mpsc::UnboundedSender<CapturedRequest>>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> JsonRpcResponse<serde_json::Value> {
    let request: JsonRpcRequest<serde_json::Value> = match JsonRpcRequest::from_bytes(&body) {
        Ok(request) => request,
        Err(error) => return JsonRpcResponse::error(None, error),
    };
    let _ = captured_tx.send(CapturedRequest {
        method: request.method.clone(),
        params: request.params.clone().unwrap_or_default(),
        signature: headers
            .get(FLASHBOTS_SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(String::from),
    });
    JsonRpcResponse::result(request.id, serde_json::Value::Null)
}

fn capture_router() -> (Router, mpsc::UnboundedReceiver<CapturedRequest>) {
    let (captured_tx, captured_rx) = mpsc::unbounded_channel();
    let router =
        Router::new().route("/", post(capture_handler)).with_state(Arc::new(captured_tx));
    (router, captured_rx)
}

/// A plain-HTTP mock JSON-RPC receiver (local builder, archive sink).
pub struct RpcReceiver {
    pub addr: SocketAddr,
    pub requests: mpsc::UnboundedReceiver<CapturedRequest>,
}

impl RpcReceiver {
    pub async fn spawn() -> Self {
        let (router, requests) = capture_router();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Receive the next captured request, or `None` after `timeout`.
    pub async fn recv(&mut self, timeout: Duration) -> Option<CapturedRequest> {
        tokio::time::timeout(timeout, self.requests.recv()).await.ok().flatten()
    }
}

/// A mock peer proxy: a TLS JSON-RPC receiver with its own self-signed
/// identity and a plaintext cert side-channel.
pub struct MockPeer {
    pub name: String,
    pub signer: PrivateKeySigner,
    pub identity: TlsIdentity,
    pub rpc_addr: SocketAddr,
    pub cert_addr: SocketAddr,
    pub requests: mpsc::UnboundedReceiver<CapturedRequest>,
}

impl MockPeer {
    pub async fn spawn(name: &str) -> Self {
        install_crypto();
        let identity =
            generate_tls_identity(&["127.0.0.1".to_string()], Duration::from_secs(3600)).unwrap();

        let (router, requests) = capture_router();
        let rpc_listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        rpc_listener.set_nonblocking(true).unwrap();
        let rpc_addr = rpc_listener.local_addr().unwrap();
        let tls_config = RustlsConfig::from_pem(
            identity.cert_pem.clone().into_bytes(),
            identity.key_pem.clone().into_bytes(),
        )
        .await
        .unwrap();
        tokio::spawn(async move {
            axum_server::from_tcp_rustls(rpc_listener, tls_config)
                .serve(router.into_make_service())
                .await
                .unwrap();
        });

        let cert_pem = identity.cert_pem.clone();
        let cert_router = Router::new().route("/cert", get(move || async move { cert_pem.clone() }));
        let cert_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let cert_addr = cert_listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(cert_listener, cert_router).await.unwrap();
        });

        Self {
            name: name.to_string(),
            signer: PrivateKeySigner::random(),
            identity,
            rpc_addr,
            cert_addr,
            requests,
        }
    }

    /// The registry record pointing at this mock peer.
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            name: self.name.clone(),
            ip: format!("127.0.0.1:{}", self.rpc_addr.port()),
            ecdsa_pubkey_address: self.signer.address(),
            cert_port: Some(self.cert_addr.port()),
        }
    }

    pub async fn recv(&mut self, timeout: Duration) -> Option<CapturedRequest> {
        tokio::time::timeout(timeout, self.requests.recv()).await.ok().flatten()
    }
}

/// A mock eth node answering `eth_blockNumber` with a fixed block.
pub async fn spawn_eth_node(block: u64) -> String {
    let router = Router::new().route(
        "/",
        post(move |Json(request): Json<serde_json::Value>| async move {
            let id = request["id"].as_u64().unwrap_or(1);
            Json(serde_json::json!({
                "id": id,
                "jsonrpc": "2.0",
                "result": format!("0x{block:x}"),
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A proxy under test, with its surfaces and registry.
pub struct TestProxy {
    pub public_url: String,
    pub local_url: String,
    pub cert_url: String,
    pub cert_pem: String,
    pub signer: PrivateKeySigner,
    pub hub: StaticConfigHub,
    pub shutdown: CancellationToken,
    pub client: reqwest::Client,
}

impl TestProxy {
    /// Spawn a proxy with the given args against a static registry and wait
    /// until its surfaces serve.
    pub async fn spawn(args: MeshProxyArgs, hub: StaticConfigHub) -> Self {
        install_crypto();
        let identity = generate_tls_identity(
            &["127.0.0.1".to_string(), "localhost".to_string()],
            Duration::from_secs(3600),
        )
        .unwrap();
        let signer = PrivateKeySigner::random();
        let shutdown = CancellationToken::new();

        let public = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let local = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let cert = StdTcpListener::bind("127.0.0.1:0").unwrap();
        for listener in [&public, &local, &cert] {
            listener.set_nonblocking(true).unwrap();
        }
        let public_url = format!("https://{}/", public.local_addr().unwrap());
        let local_url = format!("https://{}/", local.local_addr().unwrap());
        let cert_url = format!("http://{}/cert", cert.local_addr().unwrap());

        let listeners = Listeners { public, local, cert, metrics: None };
        tokio::spawn(run_with_hub(
            args,
            hub.clone(),
            identity.clone(),
            signer.clone(),
            listeners,
            shutdown.clone(),
        ));

        // The proxy accepts its own self-signed certificate only.
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();

        // Wait for the cert surface to come up.
        let plain = reqwest::Client::new();
        for _ in 0..100 {
            if let Ok(response) = plain.get(&cert_url).send().await {
                if response.status().is_success() {
                    return Self {
                        public_url,
                        local_url,
                        cert_url,
                        cert_pem: identity.cert_pem,
                        signer,
                        hub,
                        shutdown,
                        client,
                    };
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("proxy did not come up");
    }

    /// Send a signed JSON-RPC request to the given surface.
    pub async fn send(
        &self,
        url: &str,
        signer: &PrivateKeySigner,
        method: &str,
        param: serde_json::Value,
    ) -> (reqwest::StatusCode, JsonRpcResponse<serde_json::Value>) {
        let (body, signature) = signed_json_request(signer, method, param);
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header(FLASHBOTS_SIGNATURE_HEADER, signature)
            .body(body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        let body = response.bytes().await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }
}
