//! Protocol transport seam.
//!
//! The WhatsApp client library is an external collaborator: the bridge only
//! sees an opaque connection that emits QR / open / close / message /
//! credential events and accepts a send-message call. Production adapters
//! implement [`Connector`] and [`Connection`]; the bundled
//! [`memory::MemoryConnector`] is an in-process loopback for development and
//! tests.

pub mod jid;
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound message event as delivered by the transport adapter.
///
/// Adapters flatten plain and extended-text payloads into `text`; anything
/// without a text body arrives as `None` and is dropped by the router.
#[derive(Debug, Clone)]
pub struct Inbound {
    /// Full routing identifier of the sender, e.g. `15551234567@s.whatsapp.net`.
    pub sender_jid: String,
    pub text: Option<String>,
    /// True when the message is our own echo.
    pub from_self: bool,
}

/// Why a connection closed. Drives the reconnect decision: an explicit
/// logout is final, anything else is retried with backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    LoggedOut,
    Error(String),
}

/// Events emitted by a live connection, in protocol delivery order.
#[derive(Debug, Clone)]
pub enum ConnectorEvent {
    /// A pairing QR challenge; the payload is the raw code to render.
    Qr(String),
    /// The connection is open and authenticated.
    Open { jid: String },
    /// Updated credential material to persist before the next protocol action.
    CredentialsUpdate(Vec<u8>),
    Message(Inbound),
    Closed(CloseReason),
}

/// A live protocol connection for one merchant.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn send_text(&self, jid: &str, text: &str) -> Result<()>;

    /// Explicit logout; the adapter emits `Closed(LoggedOut)` afterwards.
    async fn logout(&self) -> Result<()>;

    /// True once the connection has an authenticated identity.
    fn is_authenticated(&self) -> bool;
}

/// Factory opening one connection per merchant.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection for `merchant_id`, seeding it with previously
    /// persisted credential bytes when available. Events flow through
    /// `events` until the connection closes.
    async fn connect(
        &self,
        merchant_id: &str,
        credentials: Option<Vec<u8>>,
        events: mpsc::Sender<ConnectorEvent>,
    ) -> Result<Arc<dyn Connection>>;
}
