//! Bridge error taxonomy.
//!
//! Collaborator failures (DB or AI service) are always non-fatal and stay
//! inside the router; the variants here are what crosses module boundaries
//! and what the HTTP facade maps onto status codes.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// No session exists for the requested merchant (HTTP 404).
    #[error("no active session for merchant {0}")]
    NotFound(String),

    /// A send was attempted without a live connection handle (HTTP 500).
    #[error("WhatsApp session not active for merchant {0}")]
    NoActiveSession(String),

    /// A protocol send did not complete (HTTP 408 on the send endpoint).
    #[error("WhatsApp send timed out: {0}")]
    SendTimeout(String),

    /// Protocol-level failure from the transport adapter.
    #[error("transport error: {0}")]
    Transport(String),

    /// DB or AI collaborator unreachable or returned an error.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Credential vault I/O failure.
    #[error("credential storage error: {0}")]
    Credential(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Collaborator(err.to_string())
    }
}
