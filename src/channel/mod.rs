//! Typed, best-effort duplex channel bound to one proctoring endpoint.
//!
//! A [`ProctorChannel`] walks `Connecting → Open → Closed`. Sends are only
//! accepted while `Open`; everything else is dropped on the spot and never
//! delivered later. Inbound frames are parsed into the channel's message type
//! and handed to a single [`Subscription`]; frames that fail to parse are
//! discarded without affecting the connection. There is no reconnect: once
//! `Closed`, a channel stays closed.

pub mod memory;
pub mod transport;
pub mod ws;

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use transport::{ChannelError, Connection, Connector, FrameSink, FrameStream};
pub use ws::WebSocketConnector;

use crate::protocol::ChannelAddress;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Open => write!(f, "open"),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a channel ended up `Closed`. The first recorded reason wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called or the channel was dropped.
    Requested,
    /// The transport never connected.
    ConnectFailed,
    /// The transport went away while open.
    ClosedUnexpectedly,
}

/// Frame counters for one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub frames_received: u64,
    pub frames_malformed: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    dropped: AtomicU64,
    received: AtomicU64,
    malformed: AtomicU64,
}

struct Shared {
    address: ChannelAddress,
    state: watch::Sender<ChannelState>,
    close_reason: OnceLock<CloseReason>,
    counters: Counters,
}

impl Shared {
    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Move `Connecting → Open`. Fails if the channel was closed meanwhile.
    fn mark_open(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ChannelState::Connecting {
                *state = ChannelState::Open;
                true
            } else {
                false
            }
        })
    }

    fn mark_closed(&self, reason: CloseReason) {
        let _ = self.close_reason.set(reason);
        self.state.send_if_modified(|state| {
            let changed = *state != ChannelState::Closed;
            *state = ChannelState::Closed;
            changed
        });
    }
}

/// Cloneable send handle for a [`ProctorChannel`].
///
/// Lets asynchronous continuations send without owning the channel. Follows
/// the same rule: only frames sent while `Open` are transmitted.
#[derive(Clone)]
pub struct ChannelSender {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ChannelSender {
    /// Send one message. Returns whether it was handed to the transport.
    ///
    /// Never fails: sends outside `Open` are counted as dropped and discarded.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        if self.shared.state() != ChannelState::Open {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(address = %self.shared.address, "channel not open, dropping frame");
            return false;
        }

        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(address = %self.shared.address, error = %e, "failed to encode frame");
                return false;
            }
        };

        if self.outbound.send(text).is_ok() {
            self.shared.counters.sent.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }
}

/// Explicit subscription to a channel's parsed inbound messages.
///
/// Yields `None` as soon as the channel is closed, even if frames are still
/// buffered, so no handler runs after teardown.
pub struct Subscription<In> {
    inbound: mpsc::UnboundedReceiver<In>,
    cancel: CancellationToken,
}

impl<In> Subscription<In> {
    pub async fn next(&mut self) -> Option<In> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            message = self.inbound.recv() => message,
        }
    }
}

/// A typed duplex channel to one [`ChannelAddress`].
///
/// `In` is the inbound message type. Dropping the channel closes it.
pub struct ProctorChannel<In> {
    shared: Arc<Shared>,
    sender: ChannelSender,
    cancel: CancellationToken,
    inbound: Option<mpsc::UnboundedReceiver<In>>,
}

impl<In> ProctorChannel<In>
where
    In: DeserializeOwned + Send + 'static,
{
    /// Start connecting to `address`. Returns immediately in `Connecting`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(connector: Arc<dyn Connector>, address: ChannelAddress) -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        let shared = Arc::new(Shared {
            address: address.clone(),
            state,
            close_reason: OnceLock::new(),
            counters: Counters::default(),
        });
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tracing::debug!(address = %address, "opening proctor channel");
        tokio::spawn(drive::<In>(
            connector,
            Arc::clone(&shared),
            outbound_rx,
            inbound_tx,
            cancel.clone(),
        ));

        Self {
            sender: ChannelSender {
                shared: Arc::clone(&shared),
                outbound: outbound_tx,
            },
            shared,
            cancel,
            inbound: Some(inbound_rx),
        }
    }
}

impl<In> ProctorChannel<In> {
    pub fn address(&self) -> &ChannelAddress {
        &self.shared.address
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Wait until the channel leaves `Connecting`.
    pub async fn wait_until_settled(&self) -> ChannelState {
        let mut changes = self.shared.state.subscribe();
        changes
            .wait_for(|s| *s != ChannelState::Connecting)
            .await
            .map(|state| *state)
            .unwrap_or(ChannelState::Closed)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.close_reason.get().copied()
    }

    /// Send one message; see [`ChannelSender::send`].
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        self.sender.send(message)
    }

    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Take the inbound subscription. Only the first call returns one.
    pub fn subscribe(&mut self) -> Option<Subscription<In>> {
        self.inbound.take().map(|inbound| Subscription {
            inbound,
            cancel: self.cancel.clone(),
        })
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.shared.mark_closed(CloseReason::Requested);
        self.cancel.cancel();
        tracing::debug!(address = %self.shared.address, "proctor channel closed");
    }

    pub fn stats(&self) -> ChannelStats {
        let c = &self.shared.counters;
        ChannelStats {
            frames_sent: c.sent.load(Ordering::Relaxed),
            frames_dropped: c.dropped.load(Ordering::Relaxed),
            frames_received: c.received.load(Ordering::Relaxed),
            frames_malformed: c.malformed.load(Ordering::Relaxed),
        }
    }
}

impl<In> Drop for ProctorChannel<In> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connection driver: connects, then pumps frames until cancelled or the
/// transport ends.
async fn drive<In>(
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<In>,
    cancel: CancellationToken,
) where
    In: DeserializeOwned + Send + 'static,
{
    let address = shared.address.clone();

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            shared.mark_closed(CloseReason::Requested);
            return;
        }
        result = connector.connect(&address) => result,
    };

    let Connection {
        mut sink,
        mut stream,
    } = match connected {
        Ok(connection) => connection,
        Err(e) => {
            tracing::warn!(address = %address, error = %e, "proctor channel failed to connect");
            shared.mark_closed(CloseReason::ConnectFailed);
            return;
        }
    };

    if !shared.mark_open() {
        let _ = sink.close().await;
        return;
    }
    tracing::info!(address = %address, "proctor channel open");

    let reason = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break CloseReason::Requested,
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(e) = sink.send(text).await {
                        tracing::warn!(address = %address, error = %e, "proctor channel send failed");
                        break CloseReason::ClosedUnexpectedly;
                    }
                }
                None => break CloseReason::Requested,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(text)) => match serde_json::from_str::<In>(&text) {
                    Ok(message) => {
                        shared.counters.received.fetch_add(1, Ordering::Relaxed);
                        let _ = inbound.send(message);
                    }
                    Err(e) => {
                        shared.counters.malformed.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(address = %address, error = %e, "discarding malformed frame");
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(address = %address, error = %e, "proctor channel transport error");
                    break CloseReason::ClosedUnexpectedly;
                }
                None => {
                    tracing::warn!(address = %address, "proctor channel closed by peer");
                    break CloseReason::ClosedUnexpectedly;
                }
            },
        }
    };

    shared.mark_closed(reason);
    if reason == CloseReason::Requested {
        let _ = sink.close().await;
    }
}
