//! # Tether Relay - Multi-Tenant CDP Broker
//!
//! The relay lets automation clients drive remote browsers whose only
//! reachable interface is an installed extension tunnelling the Chrome
//! DevTools Protocol through an outbound WebSocket. Each extension is one
//! **device**; the relay accepts many devices and many clients, routes each
//! client to one device, synthesizes a handful of CDP methods locally, and
//! forwards everything else bidirectionally.
//!
//! This crate handles:
//! - The device registry: register, heartbeat, conflict resolution, and
//!   stale-device eviction, guarded by a per-device lifecycle state machine
//! - The message router: per-client pending-request tracking, response
//!   correlation, event fan-out, priorities, retries, and local handling of
//!   `Browser.*`, `Target.*`, and a subset of `Page.*`
//! - The WebSocket endpoint multiplexer: the legacy `/extension` + `/cdp`
//!   family and the enhanced `/v2/device`, `/v2/cdp/{deviceId}`,
//!   `/v2/control` family, both thin layers over the same engine
//!
//! ## Running a relay
//!
//! ```no_run
//! use tether_relay::{RelayConfig, RelayServer, ServerConfig};
//!
//! # async fn example() -> std::io::Result<()> {
//! let server = RelayServer::new(RelayConfig::default(), ServerConfig::default());
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! server
//!     .serve(listener, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! # }
//! ```
//!
//! ## Module organization
//!
//! - [`registry`] - device records, lifecycle, conflict resolution
//! - [`router`] - pending tables, local synthesis, fan-out
//! - [`endpoints`] - WebSocket upgrade handlers for both families
//! - [`control`] - operator reports and commands
//! - [`server`] - assembly and shutdown sequencing

pub mod backlog;
pub mod config;
pub mod control;
pub mod device;
pub mod endpoints;
pub mod error;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;

pub use config::{RelayConfig, ServerConfig};
pub use device::{DeviceCapabilities, DeviceRecord, DeviceState};
pub use error::{ErrorKind, RelayError};
pub use registry::{DeviceRegistry, RegistryEvent};
pub use router::MessageRouter;
pub use server::RelayServer;
pub use transport::{Transport, close_codes};
