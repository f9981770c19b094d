//! Real-time hub channel.
//!
//! A [`ChannelManager`] owns one transport at a time (open → active → closed), writes outbound
//! frames and hands inbound frames to the [`SubscriberRegistry`]. Reconnecting is an opt-in
//! policy layered on top ([`spawn_reconnect`]), never part of the manager itself.

mod frame;
mod manager;
mod reconnect;
mod state;
mod subscribers;
mod transport;

pub use frame::{Frame, FrameError};
pub use manager::{ChannelError, ChannelManager};
pub use reconnect::{spawn_reconnect, Backoff};
pub use state::{ChannelEvent, ConnectionState};
pub use subscribers::{FrameFilter, SubscriberRegistry, SubscriptionId};
pub use transport::{Connector, Transport, TransportError, TransportEvent, WsConnector};
