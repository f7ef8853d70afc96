//! Corral control plane service.
//!
//! Wires the in-process bus, the device registry, and the lease manager
//! together, then runs the expiry sweeper until shutdown.

use std::sync::Arc;

use corral_control::{CommandDispatcher, DispatchConfig, LeaseConfig, LeaseControl, LeaseService};
use corral_registry::MemoryRegistry;
use corral_wire::{Bus, ChannelRouter, LocalBus, Transactor, GLOBAL_CHANNEL};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Bus address this service publishes commands from.
const ORIGIN_CHANNEL: &str = "control";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,corral=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting corral control plane");

    let bus = Arc::new(LocalBus::new());
    let router = Arc::new(ChannelRouter::new());
    let registry = Arc::new(MemoryRegistry::new());

    // Drain the shared channel so agent registrations and leaves reach
    // the service handlers.
    let _pump = corral_wire::spawn_pump(bus.subscribe(GLOBAL_CHANNEL), Arc::clone(&router));

    let txn = Arc::new(Transactor::new(
        Arc::clone(&bus) as Arc<dyn Bus>,
        Arc::clone(&router),
        ORIGIN_CHANNEL,
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(txn, DispatchConfig::default()));

    let mut config = LeaseConfig::default();
    if let Some(secs) = std::env::var("CORRAL_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse().ok())
    {
        config.sweep_interval = std::time::Duration::from_secs(secs);
    }
    let sweep_interval = config.sweep_interval;
    let service = Arc::new(LeaseService::new(registry, dispatcher, config));
    service.attach(&router);

    // Log lifecycle events as they happen.
    let mut events = service.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!(?event, "lifecycle event");
        }
    });

    // Reclaim devices from groups whose window has passed.
    let sweeper_service = Arc::clone(&service);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            match sweeper_service.expire_due().await {
                Ok(0) => {}
                Ok(expired) => tracing::info!(expired, "sweeper expired groups"),
                Err(err) => tracing::warn!(error = %err, "sweeper failed"),
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
