//! Peer-to-peer file transfer engine.
//!
//! dropwire implements the transfer protocol and flow-control core for a
//! two-endpoint file sharing session: chunked streaming over a reliable,
//! order-preserving message channel with bounded outbound buffering, a FIFO
//! queue of pending uploads processed one at a time, bidirectional
//! cancellation, and progress/throughput accounting.
//!
//! The crate deliberately excludes connection bootstrap and rendering.
//! Those live behind three seams the embedding application implements:
//!
//! - [`core::channel::TransferChannel`] — the open data channel
//! - [`core::io::SinkProvider`] / [`core::io::FileSource`] — local storage
//! - [`core::presenter::Presenter`] — lifecycle/progress callbacks
//!
//! The engine itself runs as a single actor task; see [`core::engine`].

pub mod core;
pub mod utils;

pub use crate::core::channel::{ChannelEvent, TransferChannel};
pub use crate::core::engine::{EngineHandle, TransferEngine};
pub use crate::core::io::{FileSink, FileSource, SinkProvider};
pub use crate::core::presenter::Presenter;
pub use crate::core::protocol::ControlMessage;
pub use crate::core::task::{Direction, TaskStatus};
