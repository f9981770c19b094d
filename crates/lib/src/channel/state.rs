//! Connection lifecycle: one table decides every state change.

use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed,
}

/// Everything that can move a connection between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Owner asked to connect.
    Connect,
    /// Transport reported open.
    Opened,
    /// Transport failed (open, read or write).
    TransportError,
    /// Transport closed without a close request.
    UnexpectedClose,
    /// Owner asked to close.
    CloseRequested,
    /// Transport finished shutting down after a close request.
    TransportClosed,
}

impl ConnectionState {
    /// Next state for `event`, or `None` when the event is not legal here.
    pub fn on(self, event: ChannelEvent) -> Option<ConnectionState> {
        use ChannelEvent::*;
        use ConnectionState::*;
        match (self, event) {
            (Idle | Closed | Failed, Connect) => Some(Connecting),
            (Connecting, Opened) => Some(Open),
            (Connecting, TransportError) => Some(Failed),
            (Open, TransportError | UnexpectedClose) => Some(Failed),
            (Connecting | Open, CloseRequested) => Some(Closing),
            // nothing to release
            (Idle | Failed, CloseRequested) => Some(Closed),
            (Closing, TransportClosed | TransportError | UnexpectedClose) => Some(Closed),
            _ => None,
        }
    }

    /// Whether `connect` may start a new cycle from here.
    pub fn can_connect(self) -> bool {
        self.on(ChannelEvent::Connect).is_some()
    }

    /// Idle, Closed and Failed hold no transport.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Failed
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelEvent::*;
    use super::ConnectionState::*;
    use super::*;

    const ALL_STATES: [ConnectionState; 6] = [Idle, Connecting, Open, Closing, Closed, Failed];

    #[test]
    fn open_is_only_reachable_from_connecting() {
        for state in ALL_STATES {
            for event in [Connect, Opened, TransportError, UnexpectedClose, CloseRequested, TransportClosed] {
                if state.on(event) == Some(Open) {
                    assert_eq!((state, event), (Connecting, Opened));
                }
            }
        }
    }

    #[test]
    fn connect_allowed_only_without_live_transport() {
        let allowed: Vec<_> = ALL_STATES.into_iter().filter(|s| s.can_connect()).collect();
        assert_eq!(allowed, vec![Idle, Closed, Failed]);
    }

    #[test]
    fn close_path_goes_through_closing() {
        assert_eq!(Open.on(CloseRequested), Some(Closing));
        assert_eq!(Connecting.on(CloseRequested), Some(Closing));
        assert_eq!(Closing.on(TransportClosed), Some(Closed));
        assert_eq!(Closed.on(CloseRequested), None);
    }

    #[test]
    fn failures() {
        assert_eq!(Connecting.on(TransportError), Some(Failed));
        assert_eq!(Open.on(UnexpectedClose), Some(Failed));
        assert_eq!(Failed.on(CloseRequested), Some(Closed));
        assert_eq!(Idle.on(Opened), None);
        assert_eq!(Closed.on(Opened), None);
    }
}
