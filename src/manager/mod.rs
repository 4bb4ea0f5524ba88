//! Connection lifecycle management.
//!
//! One live protocol connection per merchant: creation, credential
//! persistence, QR caching, reconnect-after-drop with bounded exponential
//! backoff, explicit delete. Each connection gets its own event pump task
//! consuming the transport's event stream; credential updates are persisted
//! durably before the pump advances to the next event.

use crate::config::ReconnectPolicy;
use crate::error::{BridgeError, Result};
use crate::router::MessageRouter;
use crate::store::{ConnStatus, SessionStore};
use crate::transport::{CloseReason, Connection, Connector, ConnectorEvent};
use crate::vault::CredentialVault;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct ConnectionManager {
    store: Arc<SessionStore>,
    vault: CredentialVault,
    connector: Arc<dyn Connector>,
    router: Arc<MessageRouter>,
    policy: ReconnectPolicy,
    /// Reconnect attempts per merchant; reset when a connection opens.
    attempts: Mutex<HashMap<String, u32>>,
}

impl ConnectionManager {
    pub fn new(
        store: Arc<SessionStore>,
        vault: CredentialVault,
        connector: Arc<dyn Connector>,
        router: Arc<MessageRouter>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            store,
            vault,
            connector,
            router,
            policy,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Open a connection for a merchant. A merchant with a live handle or a
    /// start already in flight is a no-op, so concurrent calls never create
    /// two connections: the Connecting reservation is taken in one
    /// write-lock critical section before the first await.
    pub async fn start_connection(self: &Arc<Self>, merchant_id: &str) -> Result<()> {
        if !self.store.try_begin_connect(merchant_id).await {
            tracing::debug!(
                "wa: connection already live or starting for merchant {}",
                merchant_id
            );
            return Ok(());
        }

        let credentials = match self.vault.load(merchant_id).await {
            Ok(c) => c,
            Err(e) => {
                self.store
                    .set_status(merchant_id, ConnStatus::Disconnected)
                    .await;
                return Err(e);
            }
        };
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let conn = match self.connector.connect(merchant_id, credentials, tx).await {
            Ok(conn) => conn,
            Err(e) => {
                self.store
                    .set_status(merchant_id, ConnStatus::Disconnected)
                    .await;
                return Err(e);
            }
        };

        self.store.insert_handle(merchant_id, conn.clone()).await;
        tracing::info!("wa: connection started for merchant {}", merchant_id);
        self.spawn_pump(merchant_id.to_string(), conn, rx);
        Ok(())
    }

    /// Log out and forget a merchant: protocol logout, in-memory handle and
    /// QR removed, durable credential material deleted. A merchant waiting
    /// out a reconnect backoff can also be deleted; the pending reconnect
    /// is cancelled instead of logged out.
    pub async fn delete_connection(&self, merchant_id: &str) -> Result<()> {
        match self.store.handle(merchant_id).await {
            Some(handle) => {
                self.store.set_status(merchant_id, ConnStatus::Closing).await;
                handle
                    .logout()
                    .await
                    .map_err(|e| BridgeError::Internal(format!("logout failed: {e}")))?;
            }
            None => {
                if self.store.status(merchant_id).await != ConnStatus::Reconnecting {
                    return Err(BridgeError::NotFound(merchant_id.to_string()));
                }
                tracing::info!(
                    "wa: cancelling pending reconnect for merchant {}",
                    merchant_id
                );
            }
        }

        self.store.remove_connection(merchant_id).await;
        self.store.remove_qr(merchant_id).await;
        self.attempts.lock().await.remove(merchant_id);
        self.vault
            .remove(merchant_id)
            .await
            .map_err(|e| BridgeError::Internal(format!("credential cleanup failed: {e}")))?;

        tracing::info!("wa: merchant {} logged out and deleted", merchant_id);
        Ok(())
    }

    /// Startup recovery: reconnect every merchant with persisted
    /// credentials, sequentially. Individual failures are logged and skipped.
    pub async fn recover_all(self: &Arc<Self>) {
        let merchants = match self.vault.list_merchants().await {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("recovery: cannot list persisted sessions: {}", e);
                return;
            }
        };
        tracing::info!("recovery: {} persisted session(s) found", merchants.len());

        for merchant_id in merchants {
            tracing::info!("recovery: reconnecting merchant {}", merchant_id);
            if let Err(e) = self.start_connection(&merchant_id).await {
                tracing::error!("recovery: reconnect failed for {}: {}", merchant_id, e);
            }
        }
    }

    fn spawn_pump(
        self: &Arc<Self>,
        merchant_id: String,
        conn: Arc<dyn Connection>,
        mut rx: mpsc::Receiver<ConnectorEvent>,
    ) {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ConnectorEvent::CredentialsUpdate(bytes) => {
                        // Best-effort, but awaited so the write lands before
                        // any later event depends on it.
                        if let Err(e) = mgr.vault.save(&merchant_id, &bytes).await {
                            tracing::warn!(
                                "wa: credential persist failed for {}: {}",
                                merchant_id,
                                e
                            );
                        }
                    }
                    ConnectorEvent::Qr(payload) => {
                        mgr.store.set_qr(&merchant_id, &payload).await;
                        mgr.store
                            .set_status(&merchant_id, ConnStatus::AwaitingQr)
                            .await;
                        tracing::info!("wa: QR generated for merchant {}", merchant_id);
                        tracing::debug!("wa: QR payload for {}: {}", merchant_id, payload);
                    }
                    ConnectorEvent::Open { jid } => {
                        mgr.store.set_status(&merchant_id, ConnStatus::Open).await;
                        mgr.attempts.lock().await.remove(&merchant_id);
                        tracing::info!("wa: merchant {} connected as {}", merchant_id, jid);
                    }
                    ConnectorEvent::Message(msg) => {
                        mgr.router.handle_inbound(&merchant_id, &msg, &conn).await;
                    }
                    ConnectorEvent::Closed(reason) => {
                        mgr.handle_close(&merchant_id, reason).await;
                        break;
                    }
                }
            }
        });
    }

    /// Close handling: an explicit logout is final, anything else retries
    /// with backoff up to the policy ceiling.
    async fn handle_close(self: &Arc<Self>, merchant_id: &str, reason: CloseReason) {
        match reason {
            CloseReason::LoggedOut => {
                tracing::info!("wa: merchant {} logged out, not reconnecting", merchant_id);
                self.store.remove_connection(merchant_id).await;
                self.store.remove_qr(merchant_id).await;
                self.attempts.lock().await.remove(merchant_id);
            }
            CloseReason::Error(cause) => {
                self.store.clear_handle(merchant_id).await;

                let attempt = {
                    let mut attempts = self.attempts.lock().await;
                    let entry = attempts.entry(merchant_id.to_string()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if attempt > self.policy.max_retries {
                    tracing::error!(
                        "wa: merchant {} dropped ({}), retry ceiling of {} reached, giving up",
                        merchant_id,
                        cause,
                        self.policy.max_retries
                    );
                    self.store
                        .set_status(merchant_id, ConnStatus::Disconnected)
                        .await;
                    return;
                }

                let delay = self.backoff_delay(attempt);
                tracing::warn!(
                    "wa: merchant {} dropped ({}), reconnect attempt {}/{} in {:?}",
                    merchant_id,
                    cause,
                    attempt,
                    self.policy.max_retries,
                    delay
                );
                self.store
                    .set_status(merchant_id, ConnStatus::Reconnecting)
                    .await;
                tokio::time::sleep(delay).await;

                // Deleting a merchant mid-backoff cancels the reconnect.
                if self.store.status(merchant_id).await != ConnStatus::Reconnecting {
                    tracing::info!("wa: reconnect cancelled for merchant {}", merchant_id);
                    return;
                }

                if let Err(e) = self.start_connection(merchant_id).await {
                    tracing::error!("wa: reconnect failed for {}: {}", merchant_id, e);
                    self.store
                        .set_status(merchant_id, ConnStatus::Disconnected)
                        .await;
                }
            }
        }
    }

    /// Exponential backoff capped at the policy maximum, with half jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let capped = backoff_base_ms(self.policy.base_delay_ms, self.policy.max_delay_ms, attempt);
        let jittered = capped / 2 + rand::rng().random_range(0..=capped / 2);
        Duration::from_millis(jittered)
    }
}

/// Pre-jitter backoff for a given attempt (1-based): `base * 2^(attempt-1)`
/// capped at `max`.
fn backoff_base_ms(base: u64, max: u64, attempt: u32) -> u64 {
    let shift = (attempt.saturating_sub(1)).min(16);
    base.saturating_mul(1u64 << shift).min(max)
}
