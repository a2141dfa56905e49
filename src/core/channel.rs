//! Channel abstraction: the open data channel between the two endpoints.
//!
//! The connection layer (WebRTC data channel, QUIC stream, TCP framing —
//! whatever the embedding application uses) implements [`TransferChannel`]
//! and feeds inbound traffic to the engine as [`ChannelEvent`]s. The engine
//! never opens or closes the channel itself.

use anyhow::Result;
use bytes::Bytes;

use crate::core::protocol::ControlMessage;

/// Outbound surface of the data channel.
///
/// `send_*` enqueue onto the transport's outbound buffer and return
/// immediately; `buffered_amount` reports how many of those bytes have not
/// yet been flushed to the wire. The upload driver polls it to apply
/// backpressure (see [`crate::core::config::BUFFER_LIMIT`]).
pub trait TransferChannel: Send + Sync {
    /// Enqueue a structured control message.
    fn send_control(&self, msg: &ControlMessage) -> Result<()>;

    /// Enqueue a raw binary chunk frame.
    fn send_binary(&self, payload: Bytes) -> Result<()>;

    /// Bytes enqueued but not yet flushed to the wire.
    fn buffered_amount(&self) -> usize;
}

/// Inbound channel traffic and lifecycle, delivered to the engine in the
/// order the transport produced it.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A decoded control message.
    Control(ControlMessage),
    /// A raw binary chunk frame for the currently active download.
    Binary(Bytes),
    /// The channel is open and ready.
    Open,
    /// The channel closed. Terminal: the session is over.
    Closed,
    /// The channel failed. Terminal: the session is over.
    Error(String),
}
