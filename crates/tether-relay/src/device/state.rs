//! Device lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a device connection.
///
/// Only `Active` devices accept CDP routing; everything else yields a
/// DEVICE_NOT_ACTIVE error. `Closed` is terminal, `Error` is recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    /// Socket accepted, nothing proven yet.
    Connecting,
    /// Registration received, capabilities under validation.
    Authenticating,
    /// Accepted into the registry, not yet routable.
    Registered,
    /// Routable.
    Active,
    /// Orderly teardown in progress.
    Disconnecting,
    /// Terminal.
    Closed,
    /// Failed but eligible for re-registration.
    Error,
}

impl DeviceState {
    /// Whether the `self -> next` edge is in the permitted set.
    pub fn can_transition_to(self, next: Self) -> bool {
        use DeviceState::{
            Active, Authenticating, Closed, Connecting, Disconnecting, Error, Registered,
        };
        match self {
            Connecting => matches!(next, Authenticating | Error | Closed),
            Authenticating => matches!(next, Registered | Error | Closed),
            Registered => matches!(next, Active | Disconnecting | Error),
            Active => matches!(next, Disconnecting | Error | Registered),
            Disconnecting => matches!(next, Closed),
            Error => matches!(next, Connecting | Closed | Active),
            Closed => false,
        }
    }

    /// Whether CDP traffic may be routed to a device in this state.
    pub fn accepts_routing(self) -> bool {
        self == Self::Active
    }

    /// Whether a register call may install a record in this state.
    pub fn accepts_registration(self) -> bool {
        matches!(self, Self::Connecting | Self::Authenticating)
    }

    /// Whether the state machine can never leave this state.
    pub fn is_terminal(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "CONNECTING",
            Self::Authenticating => "AUTHENTICATING",
            Self::Registered => "REGISTERED",
            Self::Active => "ACTIVE",
            Self::Disconnecting => "DISCONNECTING",
            Self::Closed => "CLOSED",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}
