//! Multi-client TCP line relay.
//!
//! Every newline-terminated line a client sends is broadcast to every
//! connected client, the sender included. A client that sends `STOP` is
//! disconnected; Ctrl-C drains the whole relay.
//!
//! - [`relay`] runs the accept loop and the shutdown sequence.
//! - [`session`] holds the per-client reader and writer tasks.
//! - [`hub`] fans a line out to every client's outbound queue.
//! - [`registry`] tracks connected clients in connection order.
//! - [`shutdown`] owns the one-shot shutdown signal.
//! - [`listener`] abstracts over where connections come from.
//! - [`line`] is the newline protocol, [`cli`] the command line.

pub mod cli;
pub mod hub;
pub mod line;
pub mod listener;
pub mod registry;
pub mod relay;
pub mod session;
pub mod shutdown;

pub use relay::{Relay, RelaySettings};
