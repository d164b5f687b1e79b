//! End-to-end scenarios over real listeners: a proxy with a mock builder, a
//! mock archive sink, a mock eth node and mock TLS peers.

use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use meshproxy::{
    cli::MeshProxyArgs,
    confighub::StaticConfigHub,
    jsonrpc::{JsonRpcError, JsonRpcResponseTy},
    utils::testutils::signed_json_request,
};
use serde_json::json;
use std::time::Duration;

mod common;
use common::{spawn_eth_node, MockPeer, RpcReceiver, TestProxy};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE: Duration = Duration::from_millis(300);

fn bundle_param(block: &str) -> serde_json::Value {
    json!({ "txs": ["0xaabbcc"], "blockNumber": block })
}

fn assert_error(response: &meshproxy::jsonrpc::JsonRpcResponse<serde_json::Value>, expected: JsonRpcError) {
    match &response.result_or_error {
        JsonRpcResponseTy::Error { code, message } => {
            assert_eq!(message, &expected);
            assert_eq!(*code, expected.code());
        }
        JsonRpcResponseTy::Result(result) => panic!("expected error, got result {result:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_bundle_fans_out_to_builder_and_peers() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut builder = RpcReceiver::spawn().await;
    let mut archive = RpcReceiver::spawn().await;
    let eth = spawn_eth_node(0x10).await;
    let mut peer = MockPeer::spawn("peer-b").await;

    let hub = StaticConfigHub::new(vec![peer.info()]);
    let args = MeshProxyArgs::default()
        .builder_endpoint(builder.url())
        .archive_endpoint(archive.url())
        .eth_endpoint(eth);
    let proxy = TestProxy::spawn(args, hub).await;

    let producer = PrivateKeySigner::random();
    let (status, response) =
        proxy.send(&proxy.local_url, &producer, "eth_sendBundle", bundle_param("0x10")).await;
    assert!(status.is_success());
    assert!(matches!(response.result_or_error, JsonRpcResponseTy::Result(_)));

    // The builder receives the bundle with the producer stamped in.
    let captured = builder.recv(RECV_TIMEOUT).await.expect("builder delivery");
    assert_eq!(captured.method, "eth_sendBundle");
    let signing_address: Address =
        serde_json::from_value(captured.params[0]["signingAddress"].clone()).unwrap();
    assert_eq!(signing_address, producer.address());

    // Every peer receives the same bundle, signed by the proxy.
    let forwarded = peer.recv(RECV_TIMEOUT).await.expect("peer delivery");
    assert_eq!(forwarded.method, "eth_sendBundle");
    assert_eq!(forwarded.params[0]["signingAddress"], captured.params[0]["signingAddress"]);
    let signature = forwarded.signature.expect("forwarded request is signed");
    let claimed: Address = signature.split(':').next().unwrap().parse().unwrap();
    assert_eq!(claimed, proxy.signer.address());

    // Local-origin requests are archived as well.
    let archived = archive.recv(RECV_TIMEOUT).await.expect("archive delivery");
    assert_eq!(archived.method, "eth_sendBundle");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn public_bundle_from_known_peer_is_not_refanned() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut builder = RpcReceiver::spawn().await;
    let eth = spawn_eth_node(0x10).await;
    let mut peer = MockPeer::spawn("peer-a").await;

    let hub = StaticConfigHub::new(vec![peer.info()]);
    let args = MeshProxyArgs::default().builder_endpoint(builder.url()).eth_endpoint(eth);
    let proxy = TestProxy::spawn(args, hub).await;

    let (status, _) =
        proxy.send(&proxy.public_url, &peer.signer, "eth_sendBundle", bundle_param("0x12")).await;
    assert!(status.is_success());

    // Builder delivery only; the origin already multicast to the mesh.
    assert!(builder.recv(RECV_TIMEOUT).await.is_some());
    assert!(peer.recv(SILENCE).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn public_surface_rejects_unknown_and_unsigned() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut builder = RpcReceiver::spawn().await;
    let eth = spawn_eth_node(0x10).await;

    let args = MeshProxyArgs::default().builder_endpoint(builder.url()).eth_endpoint(eth);
    let proxy = TestProxy::spawn(args, StaticConfigHub::default()).await;

    // Validly signed, but the signer is no known peer.
    let stranger = PrivateKeySigner::random();
    let (status, response) =
        proxy.send(&proxy.public_url, &stranger, "eth_sendBundle", bundle_param("0x10")).await;
    assert_eq!(status, reqwest::StatusCode::FORBIDDEN);
    assert_error(&response, JsonRpcError::UnknownPeer);

    // Unsigned request.
    let (body, _) = signed_json_request(&stranger, "eth_sendBundle", bundle_param("0x10"));
    let response = proxy
        .client
        .post(&proxy.public_url)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    // Tampered signature.
    let (body, signature) = signed_json_request(&stranger, "eth_sendBundle", bundle_param("0x10"));
    let response = proxy
        .client
        .post(&proxy.local_url)
        .header("Content-Type", "application/json")
        .header("X-Flashbots-Signature", signature)
        .body([body, b" ".to_vec()].concat())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    assert!(builder.recv(SILENCE).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subsidy_is_public_flashbots_only() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut builder = RpcReceiver::spawn().await;
    let eth = spawn_eth_node(0x10).await;
    let flashbots = PrivateKeySigner::random();

    let args = MeshProxyArgs::default()
        .builder_endpoint(builder.url())
        .eth_endpoint(eth)
        .flashbots_signer(flashbots.address());
    let proxy = TestProxy::spawn(args, StaticConfigHub::default()).await;

    // Public, non-Flashbots caller.
    let outsider = PrivateKeySigner::random();
    let (_, response) =
        proxy.send(&proxy.public_url, &outsider, "bid_subsidiseBlock", json!("0x10")).await;
    assert_error(&response, JsonRpcError::SubsidyWrongCaller);

    // Local surface, even for Flashbots.
    let (_, response) =
        proxy.send(&proxy.local_url, &flashbots, "bid_subsidiseBlock", json!("0x10")).await;
    assert_error(&response, JsonRpcError::SubsidyWrongEndpoint);
    assert!(builder.recv(SILENCE).await.is_none());

    // Public Flashbots caller goes through to the builder.
    let (status, _) =
        proxy.send(&proxy.public_url, &flashbots, "bid_subsidiseBlock", json!("0x10")).await;
    assert!(status.is_success());
    let captured = builder.recv(RECV_TIMEOUT).await.expect("builder delivery");
    assert_eq!(captured.method, "bid_subsidiseBlock");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identical_raw_transactions_are_deduplicated() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut builder = RpcReceiver::spawn().await;
    let eth = spawn_eth_node(0x10).await;

    let args = MeshProxyArgs::default().builder_endpoint(builder.url()).eth_endpoint(eth);
    let proxy = TestProxy::spawn(args, StaticConfigHub::default()).await;

    let producer = PrivateKeySigner::random();
    for _ in 0..2 {
        let (status, response) = proxy
            .send(&proxy.local_url, &producer, "eth_sendRawTransaction", json!("0xbeef"))
            .await;
        // The duplicate also reports success, to avoid encouraging retries.
        assert!(status.is_success());
        assert!(matches!(response.result_or_error, JsonRpcResponseTy::Result(_)));
    }

    assert!(builder.recv(RECV_TIMEOUT).await.is_some());
    assert!(builder.recv(SILENCE).await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn identical_cancellations_both_flow() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut builder = RpcReceiver::spawn().await;
    let eth = spawn_eth_node(0x10).await;

    let args = MeshProxyArgs::default().builder_endpoint(builder.url()).eth_endpoint(eth);
    let proxy = TestProxy::spawn(args, StaticConfigHub::default()).await;

    let producer = PrivateKeySigner::random();
    let cancel = json!({ "replacementUuid": "49e1fa26" });
    for _ in 0..2 {
        let (status, _) =
            proxy.send(&proxy.local_url, &producer, "eth_cancelBundle", cancel.clone()).await;
        assert!(status.is_success());
    }

    assert!(builder.recv(RECV_TIMEOUT).await.is_some());
    assert!(builder.recv(RECV_TIMEOUT).await.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cert_surface_serves_identity() {
    let _ = tracing_subscriber::fmt::try_init();
    let eth = spawn_eth_node(0x10).await;
    let args = MeshProxyArgs::default().eth_endpoint(eth);
    let proxy = TestProxy::spawn(args, StaticConfigHub::default()).await;

    let pem = reqwest::get(&proxy.cert_url).await.unwrap().text().await.unwrap();
    assert_eq!(pem, proxy.cert_pem);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peer_certificate_rotation_rebuilds_trust() {
    let _ = tracing_subscriber::fmt::try_init();
    let builder = RpcReceiver::spawn().await;
    let eth = spawn_eth_node(0x10).await;
    let mut peer = MockPeer::spawn("peer-b").await;

    let hub = StaticConfigHub::new(vec![peer.info()]);
    let mut args =
        MeshProxyArgs::default().builder_endpoint(builder.url()).eth_endpoint(eth);
    args.peer_update_interval_s = 1;
    let proxy = TestProxy::spawn(args, hub.clone()).await;

    let producer = PrivateKeySigner::random();
    proxy.send(&proxy.local_url, &producer, "eth_sendBundle", bundle_param("0x10")).await;
    assert!(peer.recv(RECV_TIMEOUT).await.is_some());

    // The peer restarts with a fresh identity: new endpoints, new
    // certificate, same name and signing key.
    let mut rotated = MockPeer::spawn("peer-b").await;
    rotated.signer = peer.signer.clone();
    hub.set_peers(vec![rotated.info()]);

    // After the next refresh, deliveries use the new trust root.
    tokio::time::sleep(Duration::from_secs(2)).await;
    proxy.send(&proxy.local_url, &producer, "eth_sendBundle", bundle_param("0x11")).await;
    let forwarded = rotated.recv(RECV_TIMEOUT).await.expect("delivery after rotation");
    assert_eq!(forwarded.method, "eth_sendBundle");
    assert!(peer.recv(SILENCE).await.is_none());
}
