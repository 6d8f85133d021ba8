//! In-process relay harness and convergence helpers.

use room_relay::actors::{RegistryActorHandle, SignalRelayActorHandle};
use room_relay::config::Config;
use room_relay::errors::RelayServerError;
use room_relay::metrics::RelayMetrics;
use room_relay::server::SignalServer;

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// A live room relay bound to an ephemeral local port.
pub struct RelayHarness {
    /// Address clients should connect to.
    pub addr: SocketAddr,
    /// Registry handle, for direct membership assertions.
    pub registry: RegistryActorHandle,
    /// Relay handle.
    pub relay: SignalRelayActorHandle,
    /// Shared counters.
    pub metrics: Arc<RelayMetrics>,
    cancel_token: CancellationToken,
}

impl RelayHarness {
    /// Spawn a relay on `127.0.0.1:0`.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind.
    pub async fn spawn() -> Result<Self, RelayServerError> {
        let vars = HashMap::from([(
            "RELAY_BIND_ADDRESS".to_string(),
            "127.0.0.1:0".to_string(),
        )]);
        let config =
            Config::from_vars(&vars).map_err(|e| RelayServerError::Config(e.to_string()))?;

        let metrics = RelayMetrics::new();
        let registry =
            RegistryActorHandle::new("relay-harness".to_string(), Arc::clone(&metrics));
        let relay = SignalRelayActorHandle::new(Arc::clone(&metrics));
        let cancel_token = CancellationToken::new();

        let server = SignalServer::bind(
            &config,
            registry.clone(),
            relay.clone(),
            cancel_token.child_token(),
        )
        .await?;

        Ok(Self {
            addr: server.local_addr(),
            registry,
            relay,
            metrics,
            cancel_token,
        })
    }

    /// Stop the server and the actor tree.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
        self.registry.cancel();
        self.relay.cancel();
    }
}

impl Drop for RelayHarness {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Poll `check` until it returns true or the timeout elapses. Returns
/// whether the condition converged.
///
/// Mesh convergence is asynchronous by nature (frames cross a socket,
/// links negotiate); assertions on it should poll rather than sleep a
/// fixed amount.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}
