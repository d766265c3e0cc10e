//! Sorted upload server binary.
//!
//! Accepts single-file multipart uploads, files them under `upload/<extension>`
//! with a millisecond timestamp prefix, and serves stored files back through a
//! `path` query parameter that is confined to the upload directory.

mod atomic;
mod config;
mod error;
mod etag;
mod files;
mod http;
mod logging;
mod storage;
mod upload;

#[cfg(test)]
mod test_support;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::http::build_cors_layer;
use crate::storage::Storage;
use crate::upload::UploadPolicy;

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let root = std::path::absolute(PathBuf::from(&args.root))?;
    let storage = Arc::new(Storage::new(root));
    storage.ensure_root().await?;
    let policy = Arc::new(UploadPolicy::new(args.max_file_size));
    info!(
        root = %storage.root_path().display(),
        upload_dir = %storage.upload_dir().display(),
        max_file_size = policy.max_file_size(),
        "storage ready"
    );

    let app = build_router(
        storage,
        policy,
        build_cors_layer(args.cors_origins.as_deref()),
    );

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("Server is running on {}", addr);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

/// Routes and layers shared by the binary and the router tests.
pub(crate) fn build_router(
    storage: Arc<Storage>,
    policy: Arc<UploadPolicy>,
    cors: Option<CorsLayer>,
) -> Router {
    let body_limit = policy.request_body_limit();
    let mut app = Router::new()
        .route(
            "/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/get-file", get(files::download_file))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let client_ip = http::client_ip(request);
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(policy));

    if let Some(cors_layer) = cors {
        app = app.layer(cors_layer);
    }
    app
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
