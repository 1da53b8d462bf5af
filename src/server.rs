//! Web server

use crate::cli;
use crate::error::DapError;

use std::{io, net::SocketAddr, str::FromStr, time::Duration};

use axum::ServiceExt;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use expanduser::expanduser;
use tokio::signal;

/// Serve the DAP service
///
/// # Arguments
///
/// * `args`: Command line arguments
/// * `service`: The [crate::app::Service] to serve
pub async fn serve(
    args: &cli::CommandLineArgs,
    service: crate::app::Service,
) -> Result<(), DapError> {
    let addr = SocketAddr::from_str(&format!("{}:{}", args.host, args.port)).map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
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
        let cert_file = tls_file(&args.cert_file, "certificate")?;
        let key_file = tls_file(&args.key_file, "key")?;
        let tls_config = RustlsConfig::from_pem_file(cert_file, key_file).await?;
        tracing::info!("listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(service.into_make_service())
            .await?;
    } else {
        tracing::info!("listening on http://{}", addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(service.into_make_service())
            .await?;
    }
    Ok(())
}

/// Expand and check the path to a TLS file.
fn tls_file(path: &str, what: &str) -> Result<std::path::PathBuf, DapError> {
    let path = expanduser(path)?;
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("TLS {} file expected at '{}' but not found", what, path.display()),
        )
        .into());
    }
    Ok(path.canonicalize()?)
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
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install signal handler: {}", err);
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
    handle.graceful_shutdown(Some(Duration::from_secs(timeout)));
}
