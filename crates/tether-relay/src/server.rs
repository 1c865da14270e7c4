//! Relay server assembly.
//!
//! Ties the registry, router, and endpoint multiplexer together, owns the
//! background tasks, and runs the shutdown sequence: stop accepting
//! upgrades, cancel the sweep and the processor, fail every pending
//! request, then close transports connections-first, devices second.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{RelayConfig, ServerConfig};
use crate::endpoints::{AppState, build_router};
use crate::registry::DeviceRegistry;
use crate::router::MessageRouter;

/// The assembled relay.
pub struct RelayServer {
    registry: Arc<DeviceRegistry>,
    router: Arc<MessageRouter>,
    server_config: Arc<ServerConfig>,
    started_at: Instant,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayServer {
    /// Assemble a relay from its configuration.
    pub fn new(config: RelayConfig, server_config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(DeviceRegistry::new(config));
        let router = Arc::new(MessageRouter::new(registry.clone()));
        Arc::new(Self {
            registry,
            router,
            server_config: Arc::new(server_config),
            started_at: Instant::now(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// The device registry.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// The message router.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Listener-level configuration.
    pub fn server_config(&self) -> &ServerConfig {
        &self.server_config
    }

    /// Build the axum application serving both endpoint families.
    pub fn app(&self) -> Router {
        build_router(AppState {
            registry: self.registry.clone(),
            router: self.router.clone(),
            server_config: self.server_config.clone(),
            started_at: self.started_at,
        })
    }

    /// Spawn the registry sweeper, the router processor, the registry
    /// event listener, and (when detailed logging is on) the stats logger.
    /// Idempotent.
    pub fn start_background(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        tasks.push(self.registry.clone().spawn_sweeper());
        tasks.push(self.router.clone().spawn_processor());
        tasks.push(self.router.clone().spawn_registry_listener());
        if self.registry.config().enable_detailed_logging {
            tasks.push(self.spawn_stats_logger());
        }
        info!(tasks = tasks.len(), "Relay background tasks started");
    }

    fn spawn_stats_logger(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let router = self.router.clone();
        let period = registry.config().metrics_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let stats = registry.stats();
                info!(
                    devices = stats.total,
                    clients = router.connection_count(),
                    queued = router.total_backlog(),
                    messages = stats.total_messages,
                    "Relay stats"
                );
            }
        })
    }

    /// Serve upgrades on `listener` until `shutdown` resolves, then run the
    /// teardown sequence.
    ///
    /// # Errors
    ///
    /// Returns the listener's I/O error, if any. Teardown errors are only
    /// logged.
    pub async fn serve(
        &self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        self.start_background();
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "Relay listening");
        }
        let result = axum::serve(listener, self.app())
            .with_graceful_shutdown(shutdown)
            .await;
        self.stop().await;
        result
    }

    /// Run the shutdown sequence without a listener.
    pub async fn stop(&self) {
        info!("Relay shutting down");
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        // Pending requests fail with "Router cleanup", then client
        // connections close, then device transports.
        self.router.shutdown().await;
        self.registry.close_all();
        info!("Relay shutdown complete");
    }
}

#[cfg(test)]
mod tests;
