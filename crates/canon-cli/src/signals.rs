//! Signal handling: Ctrl+C cancels the running command, SIGHUP reloads the
//! configuration.

use std::sync::Arc;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use canon_core::CanonEngine;

use crate::app::ConfigSource;

/// Cancel `token` on Ctrl+C.
pub fn cancel_on_interrupt(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling");
            token.cancel();
        }
    })
}

/// Reload the configuration into `engine`. A configuration that fails to
/// load or validate leaves the current one in place.
pub fn reload(engine: &CanonEngine, source: &ConfigSource) {
    match source.load() {
        Ok(config) => {
            if let Err(e) = engine.reconfigure(config) {
                warn!("Rejected reloaded configuration: {}", e);
            }
        }
        Err(e) => warn!("Failed to reload configuration: {:#}", e),
    }
}

/// Reload the configuration on every SIGHUP.
#[cfg(unix)]
pub fn reload_on_hangup(engine: Arc<CanonEngine>, source: ConfigSource) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to install SIGHUP handler: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            info!("SIGHUP received, reloading configuration");
            reload(&engine, &source);
        }
    })
}

#[cfg(not(unix))]
pub fn reload_on_hangup(_engine: Arc<CanonEngine>, _source: ConfigSource) -> JoinHandle<()> {
    tokio::spawn(async {})
}
