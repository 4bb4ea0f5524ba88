//! Multi-tenant WhatsApp bridge.
//!
//! Keeps one persistent WhatsApp connection per merchant, routes inbound
//! customer messages to an external AI response service, and exposes HTTP
//! endpoints to connect, query, send, and delete sessions. The protocol
//! client itself is an external collaborator plugged in through the
//! [`transport`] seam.

pub mod clients;
pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod router;
pub mod store;
pub mod transport;
pub mod vault;
