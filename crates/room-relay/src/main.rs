//! Room Relay
//!
//! Signaling server for Parley's peer-mesh video rooms: tracks room
//! membership, fans out join/leave/state notifications, and forwards
//! opaque negotiation payloads between session pairs.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Spawn the registry and relay actors
//! 3. Bind the TCP signaling front end
//! 4. Wait for shutdown signal, then cancel the actor tree

#![warn(clippy::pedantic)]

use std::sync::Arc;

use room_relay::actors::{RegistryActorHandle, SignalRelayActorHandle};
use room_relay::config::Config;
use room_relay::metrics::RelayMetrics;
use room_relay::server::SignalServer;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Relay");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        relay_id = %config.relay_id,
        bind_address = %config.bind_address,
        max_frame_bytes = config.max_frame_bytes,
        outbound_buffer = config.outbound_buffer,
        "Configuration loaded successfully"
    );

    let metrics = RelayMetrics::new();
    let registry = RegistryActorHandle::new(config.relay_id.clone(), Arc::clone(&metrics));
    let relay = SignalRelayActorHandle::new(Arc::clone(&metrics));
    let cancel_token = CancellationToken::new();

    let server = SignalServer::bind(
        &config,
        registry.clone(),
        relay.clone(),
        cancel_token.child_token(),
    )
    .await?;

    info!(
        local_addr = %server.local_addr(),
        "Signaling front end listening"
    );

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    cancel_token.cancel();
    registry.cancel();
    relay.cancel();

    // Give the actor tree a moment to drain before reporting.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    info!(
        sessions = metrics.sessions(),
        rooms = metrics.rooms(),
        signals_relayed = metrics.signals_relayed(),
        signals_dropped = metrics.signals_dropped(),
        "Room Relay stopped"
    );

    Ok(())
}
