//! dirdrop server binary.
//!
//! Exposes a directory tree over HTTP for browsing, download and multipart
//! upload. The main entry point parses configuration, prepares the root
//! directory, builds the Axum router and runs the listener until a
//! termination signal drains it.

mod atomic;
mod config;
mod error;
mod files;
mod health;
mod http;
mod listing;
mod logging;
mod middleware;
mod routes;
mod server;
mod storage;
mod timeout;
mod upload;

use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::health::Health;
use crate::server::{ServeError, Server, shutdown_signal};
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the dirdrop server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    logging::init_logging(args.log_format);
    info!("Server is starting...");

    let storage = Arc::new(Storage::new(PathBuf::from(&args.root_dir)));
    if let Err(err) = storage.ensure_root().await {
        error!(root = %storage.root_path().display(), error = %err, "unable to create root directory");
        return Err(err);
    }
    let upload_config = Arc::new(UploadConfig {
        max_size: args.max_upload_size,
    });
    let health = Arc::new(Health::new());

    let app = routes::build_router(storage.clone(), upload_config, health.clone());

    let host = args
        .bind
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    info!(
        root = %storage.root_path().display(),
        max_upload_size = args.max_upload_size,
        "Listening on {}",
        addr
    );

    let server = Server::new(addr, health);
    let mut states = server.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            debug!(?state, "server state changed");
        }
    });

    match server.run(app, shutdown_signal()).await {
        Ok(()) => Ok(()),
        Err(ServeError::ShutdownTimeout(grace)) => {
            error!(grace_period = ?grace, "Could not gracefully shutdown the server");
            std::process::exit(1);
        }
        Err(ServeError::Io(err)) => {
            error!(error = %err, "Listen failed");
            Err(err)
        }
    }
}
