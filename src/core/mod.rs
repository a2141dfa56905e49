//! Transfer core: protocol vocabulary, queue, engine, and collaborator seams.

pub mod channel;
pub mod config;
pub mod engine;
pub mod heartbeat;
pub mod io;
pub mod presenter;
pub mod protocol;
pub mod queue;
pub mod task;
