//! In-process loopback transport.
//!
//! Stands in for a real WhatsApp adapter during development and in tests:
//! records every outbound send, lets tests inject inbound events, and walks
//! through the same pairing flow (QR when no credentials, open when seeded).

use super::{CloseReason, Connection, Connector, ConnectorEvent};
use crate::error::{BridgeError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// A message recorded by the loopback transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub merchant_id: String,
    pub jid: String,
    pub text: String,
}

struct Link {
    tx: mpsc::Sender<ConnectorEvent>,
    conn: Arc<MemoryConnection>,
}

#[derive(Default)]
pub struct MemoryConnector {
    links: Mutex<HashMap<String, Link>>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    fail_sends: Arc<AtomicBool>,
    connects: AtomicUsize,
    qr_seq: AtomicU64,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `connect` calls so far, across all merchants.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// All messages sent over any loopback connection, in order.
    pub async fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    /// Make every subsequent `send_text` fail with a timeout.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Inject an event into a merchant's live connection.
    pub async fn emit(&self, merchant_id: &str, event: ConnectorEvent) {
        let links = self.links.lock().await;
        if let Some(link) = links.get(merchant_id) {
            let _ = link.tx.send(event).await;
        }
    }

    /// Simulate a completed QR scan: new credential material, then open.
    pub async fn complete_pairing(&self, merchant_id: &str, credentials: &[u8]) {
        {
            let links = self.links.lock().await;
            if let Some(link) = links.get(merchant_id) {
                link.conn.authed.store(true, Ordering::SeqCst);
            }
        }
        self.emit(merchant_id, ConnectorEvent::CredentialsUpdate(credentials.to_vec()))
            .await;
        self.emit(
            merchant_id,
            ConnectorEvent::Open {
                jid: format!("{merchant_id}@s.whatsapp.net"),
            },
        )
        .await;
    }

    /// Simulate a connection drop with the given close reason.
    pub async fn disconnect(&self, merchant_id: &str, reason: CloseReason) {
        {
            let links = self.links.lock().await;
            if let Some(link) = links.get(merchant_id) {
                link.conn.authed.store(false, Ordering::SeqCst);
            }
        }
        self.emit(merchant_id, ConnectorEvent::Closed(reason)).await;
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        merchant_id: &str,
        credentials: Option<Vec<u8>>,
        events: mpsc::Sender<ConnectorEvent>,
    ) -> Result<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        let conn = Arc::new(MemoryConnection {
            merchant_id: merchant_id.to_string(),
            authed: AtomicBool::new(credentials.is_some()),
            tx: events.clone(),
            sent: self.sent.clone(),
            fail_sends: self.fail_sends.clone(),
        });

        self.links.lock().await.insert(
            merchant_id.to_string(),
            Link {
                tx: events.clone(),
                conn: conn.clone(),
            },
        );

        if credentials.is_some() {
            let _ = events
                .send(ConnectorEvent::Open {
                    jid: format!("{merchant_id}@s.whatsapp.net"),
                })
                .await;
        } else {
            let seq = self.qr_seq.fetch_add(1, Ordering::SeqCst);
            let _ = events
                .send(ConnectorEvent::Qr(format!("wa-pair-{merchant_id}-{seq}")))
                .await;
        }

        Ok(conn)
    }
}

pub struct MemoryConnection {
    merchant_id: String,
    authed: AtomicBool,
    tx: mpsc::Sender<ConnectorEvent>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send_text(&self, jid: &str, text: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(BridgeError::SendTimeout(format!(
                "loopback send to {jid} failed"
            )));
        }
        self.sent.lock().await.push(SentMessage {
            merchant_id: self.merchant_id.clone(),
            jid: jid.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.authed.store(false, Ordering::SeqCst);
        let _ = self
            .tx
            .send(ConnectorEvent::Closed(CloseReason::LoggedOut))
            .await;
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.authed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pairing_flow_emits_qr_then_open() {
        let connector = MemoryConnector::new();
        let (tx, mut rx) = mpsc::channel(8);
        let conn = connector.connect("42", None, tx).await.unwrap();
        assert!(!conn.is_authenticated());
        assert!(matches!(rx.recv().await, Some(ConnectorEvent::Qr(_))));

        connector.complete_pairing("42", b"creds").await;
        assert!(matches!(
            rx.recv().await,
            Some(ConnectorEvent::CredentialsUpdate(_))
        ));
        assert!(matches!(rx.recv().await, Some(ConnectorEvent::Open { .. })));
        assert!(conn.is_authenticated());
    }

    #[tokio::test]
    async fn seeded_credentials_open_immediately() {
        let connector = MemoryConnector::new();
        let (tx, mut rx) = mpsc::channel(8);
        let conn = connector.connect("42", Some(b"creds".to_vec()), tx).await.unwrap();
        assert!(conn.is_authenticated());
        assert!(matches!(rx.recv().await, Some(ConnectorEvent::Open { .. })));
    }

    #[tokio::test]
    async fn sends_are_recorded_and_failures_injectable() {
        let connector = MemoryConnector::new();
        let (tx, _rx) = mpsc::channel(8);
        let conn = connector.connect("42", Some(b"c".to_vec()), tx).await.unwrap();

        conn.send_text("1555@s.whatsapp.net", "hello").await.unwrap();
        let sent = connector.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "hello");

        connector.set_fail_sends(true);
        assert!(conn.send_text("1555@s.whatsapp.net", "again").await.is_err());
    }
}
