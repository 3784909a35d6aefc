//! Web server

use crate::cli;

use std::io::{Error, ErrorKind};
use std::path::PathBuf;
use std::{net::SocketAddr, str::FromStr, time::Duration};

use axum::ServiceExt;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use expanduser::expanduser;
use tokio::signal;

/// Serve the airmetrics API
///
/// Returns once the server has shut down.
///
/// # Arguments
///
/// * `args`: Command line arguments
/// * `service`: The [crate::app::Service] to serve
pub async fn serve(args: &cli::CommandLineArgs, service: crate::app::Service) -> std::io::Result<()> {
    let addr = SocketAddr::from_str(&format!("{}:{}", args.host, args.port)).map_err(|err| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("invalid host name, IP address or port number: {}", err),
        )
    })?;

    // Catch ctrl+c and try to shutdown gracefully
    let handle = Handle::new();
    tokio::spawn(shutdown_signal(
        handle.clone(),
        args.graceful_shutdown_timeout,
    ));

    if args.https {
        let abs_cert_file = tls_file(&args.cert_file, "certificate")?;
        let abs_key_file = tls_file(&args.key_file, "key")?;
        // Set up TLS config
        let tls_config = RustlsConfig::from_pem_file(abs_cert_file, abs_key_file).await?;
        tracing::info!("listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(service.into_make_service())
            .await
    } else {
        tracing::info!("listening on http://{}", addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(service.into_make_service())
            .await
    }
}

/// Expand `~` in a TLS file path and check that the file exists.
fn tls_file(path: &str, kind: &str) -> std::io::Result<PathBuf> {
    let expanded = expanduser(path).map_err(|err| {
        Error::new(
            err.kind(),
            format!(
                "failed to expand ~ in TLS {} path, please provide an absolute path instead: {}",
                kind, err
            ),
        )
    })?;
    if !expanded.exists() {
        return Err(Error::new(
            ErrorKind::NotFound,
            format!(
                "TLS {} file expected at '{}' but not found",
                kind,
                expanded.display()
            ),
        ));
    }
    expanded.canonicalize()
}

/// Graceful shutdown handler
///
/// Installs signal handlers to catch Ctrl-C or SIGTERM and trigger a graceful shutdown.
async fn shutdown_signal(handle: Handle, timeout: u64) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
    // Force shutdown if graceful shutdown takes longer than the timeout
    handle.graceful_shutdown(Some(Duration::from_secs(timeout)));
}
