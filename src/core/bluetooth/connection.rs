//! Connection state machine for sensor peripherals
//! Platform callbacks arrive in no guaranteed order, so an illegal transition
//! is silently ignored rather than reported.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Connection state of a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Seen by a scan, no connect issued yet
    Discovering,
    /// Platform connect call issued
    Connecting,
    /// Link up, services discovered or being discovered
    Connected,
}

/// Things that happen to a peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// Seen during a scan and not already known.
    Observed,
    /// A connect was issued by the coordinator or the user.
    ConnectIssued,
    /// Platform reported connection success.
    ConnectSucceeded,
    /// Platform reported connection failure.
    ConnectFailed,
    /// Platform reported the link dropped.
    Disconnected,
    /// The user forgot the device.
    Forgotten,
}

impl ConnectionState {
    pub const ALL: [ConnectionState; 4] = [
        ConnectionState::Disconnected,
        ConnectionState::Discovering,
        ConnectionState::Connecting,
        ConnectionState::Connected,
    ];

    /// State reached by applying `event`, or `None` if the event is not legal here.
    pub const fn next(self, event: ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent as E;
        use ConnectionState as S;
        match (self, event) {
            (S::Disconnected, E::Observed) => Some(S::Discovering),
            (S::Disconnected | S::Discovering, E::ConnectIssued) => Some(S::Connecting),
            (S::Connecting, E::ConnectSucceeded) => Some(S::Connected),
            (S::Connecting, E::ConnectFailed) => Some(S::Disconnected),
            (S::Connected, E::Disconnected) => Some(S::Disconnected),
            // A cancelled connect can also be reported as a disconnection.
            (S::Connecting, E::Disconnected) => Some(S::Disconnected),
            (S::Discovering | S::Connecting | S::Connected, E::Forgotten) => Some(S::Disconnected),
            _ => None,
        }
    }

    /// Whether moving straight to `target` is one of the platform-driven transitions.
    /// Forced disconnects go through [`ConnectionEvent::Forgotten`] instead.
    pub const fn can_transition_to(self, target: ConnectionState) -> bool {
        use ConnectionState as S;
        matches!(
            (self, target),
            (S::Disconnected, S::Discovering)
                | (S::Disconnected | S::Discovering, S::Connecting)
                | (S::Connecting, S::Connected)
                | (S::Connecting | S::Connected, S::Disconnected)
        )
    }

    pub const fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Connecting or connected.
    pub const fn is_linked(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Discovering => write!(f, "Discovering"),
            ConnectionState::Connecting => write!(f, "Connecting..."),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// A transition that was actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Applies `event` to `state` in place. Returns `None` (state untouched) when illegal.
pub fn apply(state: &mut ConnectionState, event: ConnectionEvent) -> Option<Transition> {
    let from = *state;
    let to = from.next(event)?;
    *state = to;
    Some(Transition { from, to })
}

/// Moves `state` to `target` if that is a legal platform-driven transition.
pub fn transition_to(state: &mut ConnectionState, target: ConnectionState) -> Option<Transition> {
    let from = *state;
    if !from.can_transition_to(target) {
        return None;
    }
    *state = target;
    Some(Transition { from, to: target })
}
