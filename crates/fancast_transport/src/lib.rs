//! fancast_transport
//!
//! The WebSocket-facing side of the broadcaster: the listener/accept loop,
//! the per-connection session tasks (sender, receiver, keepalive), the wire
//! frame types, and the `Server` supervisor that ties the engine tasks and
//! the listener together and owns graceful shutdown.

pub mod frame;
pub mod server;
pub mod websocket;

pub use frame::{ClientFrame, PublishedFrame};
pub use server::Server;

#[cfg(test)]
mod tests;
