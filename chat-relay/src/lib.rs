//! Realtime chat relay over an event bus style WebSocket bridge.
//!
//! Clients register for the `chat.to.client` address, publish short messages
//! to `chat.to.server`, and receive every message plus join/leave notices
//! carrying the number of connected clients. Each module owns one concern:
//!
//! - [`presence`] keeps the atomic online counter.
//! - [`notice`] defines the outbound payloads and message validation.
//! - [`event`] describes inbound events and the acknowledgment token.
//! - [`bridge`] validates inbound events and turns them into notices.
//! - [`broadcaster`] queues presence notices and drains them from a task.
//! - [`hub`] fans serialized notices out to every connection.
//! - [`frame`] is the JSON frame protocol spoken over the socket.
//! - [`transport`] runs the axum WebSocket endpoint and per-client sessions.
//! - [`server`] wires everything onto an already-bound listener.
//! - [`cli`] parses the command line for the binary.

pub mod bridge;
pub mod broadcaster;
pub mod cli;
pub mod event;
pub mod frame;
pub mod hub;
pub mod notice;
pub mod presence;
pub mod server;
pub mod transport;
