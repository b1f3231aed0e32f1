use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use metadata_common::errors::ServiceError;
use metadata_common::kubernetes::{get_k8s_client, push_ca_bundle};
use tls_listener::TlsListener;
use tokio::sync::watch;

use crate::admission::AdmissionCodec;
use crate::certs::{CertificateReloader, CertificateStore};
use crate::config::InjectorConfig;
use crate::debounce::{run_reload_loop, Debouncer};
use crate::files_watcher::{watch_dir, FilesWatcher};
use crate::injector::ClusterEnvironment;
use crate::logging::{init_logging, parse_log_level};
use crate::readiness::readiness_handler;
use crate::server::{accept_stream, bind, serve, HEADER_READ_TIMEOUT};
use crate::webhook::{webhook_router, InjectorContext};

mod admission;
mod certs;
mod config;
mod debounce;
mod errors;
mod files_watcher;
mod injector;
mod logging;
mod readiness;
mod server;
mod webhook;

pub type Acceptor = tokio_rustls::TlsAcceptor;

async fn push_ca_bundle_file(
    webhook_config_name: &str,
    webhook_name: &str,
    ca_bundle_file: &Path,
) -> Result<(), ServiceError> {
    let ca_bundle = std::fs::read(ca_bundle_file).map_err(|e| {
        ServiceError::from_string(format!("Unable to read {:?}: {}", ca_bundle_file, e))
    })?;
    let client = get_k8s_client().await?;
    push_ca_bundle(client, webhook_config_name, webhook_name, &ca_bundle).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for SIGINT: {}", e);
            futures::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {}", e);
                futures::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = futures::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Got SIGINT"),
        _ = terminate => info!("Got SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = InjectorConfig::parse();
    let (level, invalid_level) = parse_log_level(&config.log_level);
    init_logging(config.log_config_file.as_deref(), level)?;
    if invalid_level {
        warn!(
            "Invalid log level {:?}, falling back to {}",
            config.log_level, level
        );
    }
    info!(
        "Starting k8s-metadata-injector for cluster {}",
        config.cluster_name
    );

    // Without a certificate the server still starts, readiness reports it
    let store = Arc::new(CertificateStore::new(
        config.tls_cert_file.clone(),
        config.tls_key_file.clone(),
    ));
    if let Err(e) = store.reload() {
        error!("{}", e);
    }

    if let Some((webhook_config_name, webhook_name, ca_bundle_file)) = config.ca_bundle_target() {
        if let Err(e) = push_ca_bundle_file(webhook_config_name, webhook_name, ca_bundle_file).await
        {
            error!("Unable to push CA bundle: {}", e);
        }
    }

    let (watcher, events) = match FilesWatcher::new(watch_dir(store.cert_path())) {
        Ok(w) => {
            let (watcher, events) = w.into_parts();
            (Some(watcher), Some(events))
        }
        Err(e) => {
            error!("{}, certificates will not be reloaded", e);
            (None, None)
        }
    };

    let context = Arc::new(InjectorContext {
        environment: ClusterEnvironment::new(&config.cluster_name),
        codec: AdmissionCodec::default(),
        timeout: config.timeout,
    });
    let tls_acceptor: Acceptor = Arc::new(store.server_config()).into();
    let webhook_incoming = TlsListener::new(tls_acceptor, bind(&config.webhook_addr())?);
    let health_incoming = accept_stream(bind(&config.health_addr())?);
    info!(
        "Listening on {} (webhook) and {} (health)",
        config.webhook_addr(),
        config.health_addr()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let webhook_server = tokio::spawn(serve(
        "webhook",
        webhook_incoming,
        move |req, peer| webhook_router(req, Arc::clone(&context), peer),
        shutdown_rx.clone(),
        config.timeout,
        HEADER_READ_TIMEOUT,
    ));
    let health_store = Arc::clone(&store);
    let health_server = tokio::spawn(serve(
        "health",
        health_incoming,
        move |req, _peer| readiness_handler(req, Arc::clone(&health_store)),
        shutdown_rx,
        config.timeout,
        HEADER_READ_TIMEOUT,
    ));

    run_reload_loop(
        events,
        Debouncer::new(config.reload_debounce),
        store.as_ref(),
        shutdown_signal(),
    )
    .await;

    let _ = shutdown_tx.send(true);
    for (name, server) in [("webhook", webhook_server), ("health", health_server)] {
        if let Err(e) = server.await {
            error!("{} server task failed: {}", name, e);
        }
    }
    drop(watcher);
    info!("k8s-metadata-injector stopped");
    Ok(())
}
