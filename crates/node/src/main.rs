mod demo;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use herald_events::channel::PRESENCE_EVENT_NAME;
use herald_events::{EventBus, PresenceEvent, PubSubEvent, SequenceGate};
use herald_presence::{PresenceConfig, PresenceService, PresenceStore, WatchdogStrategy};
use herald_store::MemoryStore;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::demo::DemoUsers;

/// How long shutdown waits for each background task.
const TASK_SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_node=debug,herald_presence=debug,herald_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = PresenceConfig::from_env().context("Invalid presence configuration")?;
    tracing::info!(
        ttl_secs = config.ttl.as_secs(),
        expiry_grace_ms = config.expiry_grace.as_millis() as u64,
        scan_count = config.scan_count,
        watchdog = ?config.watchdog,
        "Loaded presence configuration"
    );

    let cancel = CancellationToken::new();

    // --- Store ---
    let store = Arc::new(MemoryStore::new());
    let reaper_handle = tokio::spawn(
        Arc::clone(&store).run_reaper(config.reaper_interval, cancel.child_token()),
    );
    tracing::info!("Memory store created");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let logger_handle = tokio::spawn(log_presence_events(
        event_bus.subscribe(),
        cancel.child_token(),
    ));
    tracing::info!("Event bus created");

    // --- Presence ---
    let presence = match config.watchdog {
        WatchdogStrategy::Timer => {
            PresenceStore::new(store.clone(), event_bus.clone(), &config)
        }
        WatchdogStrategy::Keyspace => PresenceStore::with_keyspace_notifications(
            store.clone(),
            event_bus.clone(),
            &config,
            store.expirations(),
        ),
    };
    let service = Arc::new(PresenceService::new(presence, &config));
    tracing::info!("Presence service started");

    // --- Demo traffic ---
    let demo_cancel = CancellationToken::new();
    let demo_handle = DemoUsers::from_env().map(|users| {
        tokio::spawn(demo::run_demo(
            Arc::clone(&service),
            users,
            config.ttl / 2,
            demo_cancel.clone(),
        ))
    });

    shutdown_signal().await;

    // --- Shutdown ---
    demo_cancel.cancel();
    if let Some(handle) = demo_handle {
        if tokio::time::timeout(TASK_SHUTDOWN_WAIT, handle).await.is_err() {
            tracing::warn!(task = "demo driver", "Background task did not stop in time");
        }
    }

    service.shutdown().await;
    tracing::info!("Presence watchdogs cancelled");

    cancel.cancel();
    for (name, handle) in [("reaper", reaper_handle), ("event logger", logger_handle)] {
        if tokio::time::timeout(TASK_SHUTDOWN_WAIT, handle).await.is_err() {
            tracing::warn!(task = name, "Background task did not stop in time");
        }
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Log every presence event on the bus, dropping stale and duplicate
/// deliveries per tenant channel.
async fn log_presence_events(
    mut rx: broadcast::Receiver<PubSubEvent>,
    cancel: CancellationToken,
) {
    let mut gates: HashMap<String, SequenceGate> = HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(envelope) if envelope.name == PRESENCE_EVENT_NAME => {
                    let event: PresenceEvent = match envelope.decode() {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!(error = %e, channel = %envelope.channel, "Undecodable presence event");
                            continue;
                        }
                    };
                    let gate = gates.entry(envelope.channel.clone()).or_default();
                    if !gate.admit(&event) {
                        tracing::debug!(
                            user_id = %event.user_id,
                            sequence_num = event.sequence_num(),
                            "Dropping stale presence event"
                        );
                        continue;
                    }
                    tracing::info!(
                        channel = %envelope.channel,
                        user_id = %event.user_id,
                        departed = ?event.ephemeral.departed.as_ref().map(ToString::to_string),
                        arrived = ?event.ephemeral.arrived.as_ref().map(ToString::to_string),
                        sequence_num = event.sequence_num(),
                        "Presence changed"
                    );
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Presence event logger lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
