//! The chat application: message records, the priority-scheduled sender,
//! the server and the client.

pub mod client;
pub mod message;
pub mod priority;
pub mod server;
pub mod ui;

use crate::addr::Port;

/// The well-known logical port the chat server accepts on.
pub const CHAT_PORT: Port = 5000;
