//! Transport seam under [`ProctorChannel`](super::ProctorChannel).
//!
//! A transport delivers whole text frames in order. Framing, parsing and
//! state tracking all live in the channel itself.

use crate::protocol::ChannelAddress;
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by transports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// Inbound half of a connection. Ends when the peer goes away.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// An established full-duplex connection.
pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Establishes connections to channel addresses.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &ChannelAddress) -> Result<Connection, ChannelError>;
}
