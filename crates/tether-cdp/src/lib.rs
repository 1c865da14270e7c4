//! # Tether CDP - Relay Message Codec
//!
//! Wire types for the Tether relay: Chrome DevTools Protocol frames,
//! v2 structured envelopes, and the legacy extension control messages.
//!
//! This crate handles:
//! - CDP frame serialization and classification (request / response / event)
//! - The enveloped v2 frame shape (`{type, id, timestamp, data, metadata}`)
//! - Legacy `type`-discriminated extension messages (`device_register`,
//!   `ping`, `pong`, `connection_info`)
//! - Malformed-frame rejection that never requires tearing down a socket
//!
//! The relay forwards CDP frames it does not own, so `params` and `result`
//! stay opaque [`serde_json::Value`]s; no static typing is attempted across
//! the CDP surface.
//!
//! ## Classifying an inbound extension frame
//!
//! ```
//! use tether_cdp::ExtensionFrame;
//!
//! let frame = ExtensionFrame::parse(r#"{"type":"ping","deviceId":"dev-1"}"#).unwrap();
//! assert!(matches!(frame, ExtensionFrame::Control(_)));
//!
//! let frame = ExtensionFrame::parse(r#"{"id":1,"result":{}}"#).unwrap();
//! assert!(matches!(frame, ExtensionFrame::Cdp(_)));
//! ```

pub mod envelope;
pub mod error;
pub mod extension;
pub mod frame;

pub use envelope::{Envelope, types as envelope_types};
pub use error::CodecError;
pub use extension::{DeviceInfo, ExtensionFrame, ExtensionMessage, TargetInfo};
pub use frame::{CdpErrorObject, CdpFrame, MessageId, CDP_SERVER_ERROR};
