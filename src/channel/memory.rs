//! In-process transport.
//!
//! Each successful connect hands a [`MemoryPeer`] to the paired
//! [`MemoryListener`], which plays the server role: it reads what the client
//! sent and pushes frames back. Connections can be refused or held in
//! `Connecting` to exercise the channel state machine.

use super::transport::{ChannelError, Connection, Connector};
use crate::protocol::ChannelAddress;
use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, watch};

/// Connector whose connections terminate in the same process.
pub struct MemoryConnector {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
    gate: watch::Sender<bool>,
}

impl MemoryConnector {
    /// Create a connector and the listener receiving its connections.
    pub fn new() -> (Self, MemoryListener) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let (gate, _) = watch::channel(true);
        (
            Self {
                accepted,
                refuse: AtomicBool::new(false),
                gate,
            },
            MemoryListener { incoming },
        )
    }

    /// Make subsequent connects fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Keep connects pending until [`release_connections`](Self::release_connections).
    pub fn hold_connections(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_connections(&self) {
        self.gate.send_replace(true);
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &ChannelAddress) -> Result<Connection, ChannelError> {
        let mut gate = self.gate.subscribe();
        let released = gate.wait_for(|open| *open).await.is_ok();
        if !released {
            return Err(refused(address, "connector dropped"));
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(refused(address, "connection refused"));
        }

        let (client_tx, server_rx) = fmpsc::unbounded::<String>();
        let (server_tx, client_rx) = fmpsc::unbounded::<String>();

        let peer = MemoryPeer {
            address: address.clone(),
            from_client: server_rx,
            to_client: server_tx,
        };
        self.accepted
            .send(peer)
            .map_err(|_| refused(address, "listener closed"))?;

        let sink = client_tx.sink_map_err(|e| ChannelError::Transport(e.to_string()));
        let stream = client_rx.map(Ok::<String, ChannelError>);

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn refused(address: &ChannelAddress, reason: &str) -> ChannelError {
    ChannelError::Connect {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

/// Server side of a [`MemoryConnector`].
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next established connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }
}

/// Server end of one in-memory connection.
pub struct MemoryPeer {
    address: ChannelAddress,
    from_client: fmpsc::UnboundedReceiver<String>,
    to_client: fmpsc::UnboundedSender<String>,
}

impl MemoryPeer {
    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }

    /// Push a raw frame to the client. Returns false once the client is gone.
    pub fn push(&self, frame: impl Into<String>) -> bool {
        self.to_client.unbounded_send(frame.into()).is_ok()
    }

    /// Next frame sent by the client; `None` once the client closed.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// Frames already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = self.from_client.try_next() {
            frames.push(frame);
        }
        frames
    }

    /// Drop the connection from the server side.
    pub fn disconnect(self) {}
}
