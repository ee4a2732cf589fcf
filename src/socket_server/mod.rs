//! Real-time socket server
//!
//! One WebSocket per client; every request is a task code plus a body, and
//! every reply goes back through the hub.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Socket server                              │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  client ──frame──► reader ──spawn per frame──► Router::dispatch         │
//! │                                                  │                      │
//! │                                    handler table (Task -> handler)      │
//! │                                                  │                      │
//! │                          broadcast-classed? ─────┴──── otherwise        │
//! │                               │                          │              │
//! │                               ▼                          ▼              │
//! │                        Hub: Broadcast             Hub: Unicast(id)      │
//! │                               │                          │              │
//! │                               └───► outbound queue ◄─────┘              │
//! │                                          │                              │
//! │  client ◄──frame / ping──────────── writer                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol
//!
//! See [`protocol`] for the envelopes and task codes.

pub mod connection;
pub mod handlers;
pub mod hub;
pub mod protocol;
pub mod router;

pub use connection::handle_connection;
pub use hub::{ConnectionHandle, ConnectionId, HubHandle};
pub use protocol::{IncomingMessage, OutgoingMessage, Task};
pub use router::{AppContext, Router};
