//! Ribcage: a chat-bot host.
//!
//! Keeps a real-time messaging session open, initializes a fixed set of
//! plugins once the first connection succeeds, and routes inbound messages
//! to the listeners those plugins register. Also builds a `help` command
//! table from plugin metadata and offers a numbered "what can you do?" menu.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod storage;

pub mod connection;
pub mod host;
pub mod server;
pub mod session;
pub mod transport;

pub mod help;
pub mod menu;
pub mod plugins;
