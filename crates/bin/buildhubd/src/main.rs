//! buildhubd entry point: logging, wiring, signals.
//!
//! - `SIGHUP` re-reads the configuration; an invalid file is logged and the
//!   running automations are left untouched.
//! - `SIGINT` / `SIGTERM` stop every automation and exit.

use std::sync::Arc;

use buildhub_adapter_virtual::VirtualNode;
use buildhub_app::registry::Registry;
use buildhubd::config::Config;
use buildhubd::fleet::Fleet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.filter)?)
        .init();

    // Devices
    let node = Arc::new(VirtualNode::from_config(&config.virtual_node)?);
    tracing::info!(devices = node.device_names().len(), "virtual node ready");
    let registry = Arc::new(Registry::builder().fallback(node).build());

    // Automations
    let cancel = CancellationToken::new();
    let mut fleet = Fleet::new(registry, &cancel).with_pull_options(config.sources.pull_options());
    fleet.apply(&config.automations).await;
    tracing::info!(path = %Config::path().display(), "buildhubd started");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut reloads = ReloadSignal::install();

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            () = reloads.recv() => match Config::load() {
                Ok(config) => {
                    tracing::info!("configuration reloaded");
                    fleet.apply(&config.automations).await;
                }
                Err(err) => {
                    tracing::error!(%err, "invalid configuration, keeping the running one");
                }
            },
        }
    }

    tracing::info!("shutting down");
    fleet.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                wait_ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            () = wait_ctrl_c() => {}
            _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    wait_ctrl_c().await;
}

async fn wait_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl+C"),
        Err(err) => {
            tracing::error!(%err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    }
}

/// `SIGHUP` listener, installed once so no signal is missed while a
/// reload is being applied.
struct ReloadSignal {
    #[cfg(unix)]
    hangup: Option<tokio::signal::unix::Signal>,
}

impl ReloadSignal {
    fn install() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let hangup = signal(SignalKind::hangup())
                .inspect_err(|err| tracing::error!(%err, "failed to install SIGHUP handler"))
                .ok();
            Self { hangup }
        }

        #[cfg(not(unix))]
        Self {}
    }

    /// Resolves on the next `SIGHUP`; never where there is no such signal.
    async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(hangup) = self.hangup.as_mut()
            && hangup.recv().await.is_some()
        {
            tracing::info!("received SIGHUP");
            return;
        }
        std::future::pending::<()>().await;
    }
}
