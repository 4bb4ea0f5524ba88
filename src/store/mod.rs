//! In-memory session store.
//!
//! Three maps behind RwLocks: merchant → connection handle + status,
//! merchant → last QR payload, customer number → conversation context.
//! The store owns no persistence; the DB collaborator is the source of truth
//! for contexts and this map is a TTL-bounded cache in front of it.

use crate::transport::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Observable per-merchant connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Disconnected,
    Connecting,
    AwaitingQr,
    Open,
    Reconnecting,
    Closing,
}

/// The (merchant, product) pair a customer's messages are routed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationContext {
    pub merchant_id: String,
    pub product_id: String,
}

struct MerchantConnection {
    handle: Option<Arc<dyn Connection>>,
    status: ConnStatus,
}

struct ContextEntry {
    ctx: ConversationContext,
    stored_at: Instant,
}

pub struct SessionStore {
    connections: RwLock<HashMap<String, MerchantConnection>>,
    qr_codes: RwLock<HashMap<String, String>>,
    contexts: RwLock<HashMap<String, ContextEntry>>,
    /// `None` disables eviction.
    context_ttl: Option<Duration>,
}

impl SessionStore {
    pub fn new(context_ttl: Option<Duration>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            qr_codes: RwLock::new(HashMap::new()),
            contexts: RwLock::new(HashMap::new()),
            context_ttl,
        }
    }

    // ── connections ──────────────────────────────────────────────────

    /// Store the live handle for a merchant, keeping the current status.
    pub async fn insert_handle(&self, merchant_id: &str, handle: Arc<dyn Connection>) {
        let mut map = self.connections.write().await;
        let entry = map
            .entry(merchant_id.to_string())
            .or_insert(MerchantConnection {
                handle: None,
                status: ConnStatus::Connecting,
            });
        entry.handle = Some(handle);
    }

    pub async fn handle(&self, merchant_id: &str) -> Option<Arc<dyn Connection>> {
        self.connections
            .read()
            .await
            .get(merchant_id)
            .and_then(|c| c.handle.clone())
    }

    pub async fn has_handle(&self, merchant_id: &str) -> bool {
        self.handle(merchant_id).await.is_some()
    }

    /// True iff a live handle exists with an authenticated identity.
    pub async fn is_connected(&self, merchant_id: &str) -> bool {
        match self.handle(merchant_id).await {
            Some(handle) => handle.is_authenticated(),
            None => false,
        }
    }

    /// Atomically reserve the right to open a connection for a merchant:
    /// fails when a live handle exists or another caller already holds the
    /// Connecting reservation. Single write-lock critical section, so two
    /// concurrent starts cannot both pass.
    pub async fn try_begin_connect(&self, merchant_id: &str) -> bool {
        let mut map = self.connections.write().await;
        match map.get_mut(merchant_id) {
            Some(entry) => {
                if entry.handle.is_some() || entry.status == ConnStatus::Connecting {
                    return false;
                }
                entry.status = ConnStatus::Connecting;
                true
            }
            None => {
                map.insert(
                    merchant_id.to_string(),
                    MerchantConnection {
                        handle: None,
                        status: ConnStatus::Connecting,
                    },
                );
                true
            }
        }
    }

    /// Upsert the status for a merchant without touching the handle.
    pub async fn set_status(&self, merchant_id: &str, status: ConnStatus) {
        let mut map = self.connections.write().await;
        map.entry(merchant_id.to_string())
            .and_modify(|c| c.status = status)
            .or_insert(MerchantConnection {
                handle: None,
                status,
            });
    }

    /// Current status; an unknown merchant reads as Disconnected.
    pub async fn status(&self, merchant_id: &str) -> ConnStatus {
        self.connections
            .read()
            .await
            .get(merchant_id)
            .map(|c| c.status)
            .unwrap_or(ConnStatus::Disconnected)
    }

    /// Drop the handle but keep the entry (used while reconnecting).
    pub async fn clear_handle(&self, merchant_id: &str) {
        if let Some(entry) = self.connections.write().await.get_mut(merchant_id) {
            entry.handle = None;
        }
    }

    /// Remove the merchant entirely (logout or delete).
    pub async fn remove_connection(&self, merchant_id: &str) {
        self.connections.write().await.remove(merchant_id);
    }

    // ── QR codes ─────────────────────────────────────────────────────

    pub async fn set_qr(&self, merchant_id: &str, payload: &str) {
        self.qr_codes
            .write()
            .await
            .insert(merchant_id.to_string(), payload.to_string());
    }

    pub async fn qr(&self, merchant_id: &str) -> Option<String> {
        self.qr_codes.read().await.get(merchant_id).cloned()
    }

    pub async fn remove_qr(&self, merchant_id: &str) {
        self.qr_codes.write().await.remove(merchant_id);
    }

    // ── conversation contexts ────────────────────────────────────────

    /// Overwrite the context for a customer number (last write wins).
    pub async fn set_context(&self, customer_number: &str, ctx: ConversationContext) {
        self.contexts.write().await.insert(
            customer_number.to_string(),
            ContextEntry {
                ctx,
                stored_at: Instant::now(),
            },
        );
    }

    /// Context for a customer number; expired entries behave as absent and
    /// are removed on the way out.
    pub async fn context(&self, customer_number: &str) -> Option<ConversationContext> {
        {
            let map = self.contexts.read().await;
            match map.get(customer_number) {
                Some(entry) if !self.is_expired(entry) => return Some(entry.ctx.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // The entry looked expired under the read lock; re-validate under
        // the write lock so a fresh overwrite racing in between survives.
        let mut map = self.contexts.write().await;
        match map.get(customer_number) {
            Some(entry) if self.is_expired(entry) => {
                map.remove(customer_number);
                None
            }
            Some(entry) => Some(entry.ctx.clone()),
            None => None,
        }
    }

    pub async fn clear_context(&self, customer_number: &str) {
        self.contexts.write().await.remove(customer_number);
    }

    /// Sweep out every expired context; returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let mut map = self.contexts.write().await;
        let before = map.len();
        map.retain(|_, entry| !self.is_expired(entry));
        before - map.len()
    }

    /// Background sweep evicting expired contexts every `period`, so
    /// entries for customers who never message again do not pile up.
    pub fn spawn_purge_sweep(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let purged = store.purge_expired().await;
                if purged > 0 {
                    tracing::debug!("store: purged {} expired context(s)", purged);
                }
            }
        })
    }

    fn is_expired(&self, entry: &ContextEntry) -> bool {
        match self.context_ttl {
            Some(ttl) => entry.stored_at.elapsed() > ttl,
            None => false,
        }
    }
}
