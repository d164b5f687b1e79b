use clap::Parser;
use meshproxy::{cli::MeshProxyArgs, consts::SHUTDOWN_TIMEOUT, init_tracing};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument as _};

fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    let args = MeshProxyArgs::parse();
    init_tracing(args.log_json, args.log_debug);

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    let uid = args.log_uid.then(uuid::Uuid::new_v4);
    let span = match (args.log_service.clone(), uid) {
        (Some(service), Some(uid)) => tracing::info_span!("meshproxy", service, %uid),
        (Some(service), None) => tracing::info_span!("meshproxy", service),
        (None, Some(uid)) => tracing::info_span!("meshproxy", %uid),
        (None, None) => tracing::Span::none(),
    };
    let result = tokio_runtime.block_on(run_with_shutdown(args).instrument(span));

    info!("Main task finished. Shutting down tokio runtime");
    wait_tokio_runtime_shutdown(tokio_runtime, Duration::from_secs(5));

    result
}

async fn run_with_shutdown(args: MeshProxyArgs) -> eyre::Result<()> {
    let shutdown = CancellationToken::new();
    let mut proxy = Box::pin(meshproxy::run(args, shutdown.clone()));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        result = &mut proxy => return result,
    }

    // Trigger graceful shutdown and give the proxy a bounded window to drain.
    shutdown.cancel();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, proxy).await {
        Ok(result) => result,
        Err(_) => {
            error!("graceful shutdown timed out");
            Ok(())
        }
    }
}

/// `drop(tokio_runtime)` would block the current thread until its pools
/// (including the blocking pool) are shut down. Drop it on a separate thread
/// and wait for a bounded time instead.
fn wait_tokio_runtime_shutdown(tokio_runtime: tokio::runtime::Runtime, timeout: Duration) {
    let (tx, rx) = std::sync::mpsc::channel();
    let handle = std::thread::Builder::new()
        .name("tokio-runtime-shutdown".to_string())
        .spawn(move || {
            drop(tokio_runtime);
            let _ = tx.send(());
        });

    if handle.is_ok() {
        let _ = rx.recv_timeout(timeout).inspect_err(|error| {
            tracing::debug!(%error, "tokio runtime shutdown timed out");
        });
    }
}
