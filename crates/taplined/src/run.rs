//! Pipeline wiring
//!
//! Starts the sinks, spawns the forwarding task that feeds the dispatcher,
//! runs the selected source until a shutdown signal, then drains and stops
//! everything in order: source first, then the sinks (each flushing its
//! queue), with the checkpoint already flushed by the source itself.

use tokio::sync::{mpsc, watch};
use tracing::{error, info};

use tapline_cdc::mysql::MySqlSource;
use tapline_cdc::postgres::PostgresSource;
use tapline_cdc::{ChangeRecord, Result};
use tapline_publish::{Dispatcher, SinkRegistry};

use crate::config::{AppConfig, SourceSettings};

/// Bound of the source → dispatcher channel. The dispatcher only copies
/// and try-sends, so this never backs up for long.
const EVENT_CHANNEL_DEPTH: usize = 1024;

pub async fn run(config: AppConfig) -> Result<()> {
    config.policy.log_summary();

    let registry = SinkRegistry::from_configs(&config.sinks);
    if registry.is_empty() {
        info!("no active sinks configured; events will be decoded and discarded");
    }
    registry.start_all().await;

    let dispatcher = Dispatcher::new(registry.handles());
    let (event_tx, mut event_rx) = mpsc::channel::<ChangeRecord>(EVENT_CHANNEL_DEPTH);
    let forwarder = tokio::spawn(async move {
        while let Some(record) = event_rx.recv().await {
            dispatcher.dispatch(&record);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let result = match config.source {
        SourceSettings::MySql(source_config) => {
            MySqlSource::new(source_config, config.policy)
                .run(event_tx, shutdown_rx)
                .await
        }
        SourceSettings::Postgres(source_config) => {
            PostgresSource::new(source_config, config.policy)
                .run(event_tx, shutdown_rx)
                .await
        }
    };
    // The source dropped its sender; the forwarder drains and exits.
    if let Err(e) = forwarder.await {
        error!(error = %e, "dispatch task failed");
    }

    registry.stop_all().await;

    result
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(e) => {
                error!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
