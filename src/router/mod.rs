//! Inbound message routing.
//!
//! One call per protocol message event: suppress echoes and empty payloads,
//! classify session-init links vs ordinary chat, resolve the conversation
//! context (memory first, DB collaborator on miss), and dispatch to the AI
//! service. Collaborator failures never propagate past this module; the
//! customer either gets nothing or the onboarding prompt.

use crate::clients::{AiClient, DbClient};
use crate::store::{ConversationContext, SessionStore};
use crate::transport::{jid, Connection, Inbound};
use std::sync::Arc;

/// Sentinel prefix of a session-init message: `IA-AUTO:<merchant>-<product>`.
pub const SESSION_INIT_PREFIX: &str = "IA-AUTO:";

/// Sent to customers messaging without any usable conversation context.
pub const ONBOARDING_PROMPT: &str = "👋 Bonjour ! Pour commencer, cliquez d’abord sur un lien \
     d’annonce afin d’associer votre demande à un produit.";

pub struct MessageRouter {
    store: Arc<SessionStore>,
    db: DbClient,
    ai: AiClient,
}

impl MessageRouter {
    pub fn new(store: Arc<SessionStore>, db: DbClient, ai: AiClient) -> Self {
        Self { store, db, ai }
    }

    /// Process one inbound message for `merchant_id`, replying over `conn`.
    /// Never fails: every error path is logged and the event dropped.
    pub async fn handle_inbound(&self, merchant_id: &str, msg: &Inbound, conn: &Arc<dyn Connection>) {
        if msg.from_self {
            return;
        }
        let text = match msg.text.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => return,
        };

        let customer = jid::bare_number(&msg.sender_jid).to_string();
        tracing::info!("router: message from {} via merchant {}", customer, merchant_id);

        if let Some(rest) = text.strip_prefix(SESSION_INIT_PREFIX) {
            match parse_session_init(rest) {
                Some(ctx) => self.handle_session_init(&customer, msg, ctx, conn).await,
                None => {
                    tracing::warn!(
                        "router: malformed session-init from {}: {:?}",
                        customer,
                        text
                    );
                }
            }
            // A session-init message never falls through to chat handling.
            return;
        }

        self.handle_chat(&customer, msg, text, conn).await;
    }

    /// Session-init link: overwrite the local context, best-effort persist,
    /// then ask the AI service for the opening reply.
    async fn handle_session_init(
        &self,
        customer: &str,
        msg: &Inbound,
        ctx: ConversationContext,
        conn: &Arc<dyn Connection>,
    ) {
        tracing::info!(
            "router: session-init from {}: merchant={} product={}",
            customer,
            ctx.merchant_id,
            ctx.product_id
        );
        self.store.set_context(customer, ctx.clone()).await;

        if let Err(e) = self
            .db
            .save_session(customer, &ctx.merchant_id, &ctx.product_id)
            .await
        {
            tracing::warn!("router: session save failed for {}: {}", customer, e);
        }

        match self
            .ai
            .initial_reply(&ctx.merchant_id, &ctx.product_id, customer)
            .await
        {
            Ok(reply) => {
                if let Err(e) = conn.send_text(&msg.sender_jid, &reply).await {
                    tracing::error!("router: initial reply send to {} failed: {}", customer, e);
                }
            }
            Err(e) => {
                tracing::error!("router: AI initial reply for {} failed: {}", customer, e);
            }
        }
    }

    /// Ordinary chat: memory context first, one DB lookup on miss, then the
    /// chat AI — or the onboarding prompt when no context exists anywhere.
    async fn handle_chat(
        &self,
        customer: &str,
        msg: &Inbound,
        text: &str,
        conn: &Arc<dyn Connection>,
    ) {
        let ctx = match self.store.context(customer).await {
            Some(ctx) => Some(ctx),
            None => match self.db.find_session(customer).await {
                Ok(record) => {
                    let ctx = ConversationContext {
                        merchant_id: record.ecommercant_id,
                        product_id: record.produit_id,
                    };
                    tracing::info!("router: context hydrated from DB for {}", customer);
                    self.store.set_context(customer, ctx.clone()).await;
                    Some(ctx)
                }
                Err(e) => {
                    tracing::info!("router: no persisted context for {}: {}", customer, e);
                    None
                }
            },
        };

        match ctx {
            Some(ctx) => {
                match self
                    .ai
                    .chat_reply(&ctx.merchant_id, &ctx.product_id, text)
                    .await
                {
                    Ok(reply) => {
                        if let Err(e) = conn.send_text(&msg.sender_jid, &reply).await {
                            tracing::error!("router: chat reply send to {} failed: {}", customer, e);
                        }
                    }
                    Err(e) => {
                        tracing::error!("router: AI chat reply for {} failed: {}", customer, e);
                    }
                }
            }
            None => {
                if let Err(e) = conn.send_text(&msg.sender_jid, ONBOARDING_PROMPT).await {
                    tracing::error!("router: onboarding prompt send to {} failed: {}", customer, e);
                }
            }
        }
    }
}

/// Strict parse of the payload after the sentinel prefix: exactly
/// `<merchant>-<product>`, one hyphen, both halves non-empty, no stray
/// colon sections. Anything else is rejected.
fn parse_session_init(rest: &str) -> Option<ConversationContext> {
    if rest.contains(':') {
        return None;
    }
    let mut parts = rest.split('-');
    let merchant = parts.next()?;
    let product = parts.next()?;
    if parts.next().is_some() || merchant.is_empty() || product.is_empty() {
        return None;
    }
    Some(ConversationContext {
        merchant_id: merchant.to_string(),
        product_id: product.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryConnector;
    use crate::transport::Connector;
    use mockito::{Matcher, ServerGuard};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn inbound(number: &str, text: &str) -> Inbound {
        Inbound {
            sender_jid: format!("{number}@s.whatsapp.net"),
            text: Some(text.to_string()),
            from_self: false,
        }
    }

    async fn setup(server: &ServerGuard) -> (MemoryConnector, Arc<dyn Connection>, MessageRouter) {
        let connector = MemoryConnector::new();
        let (tx, _rx) = mpsc::channel(8);
        let conn = connector
            .connect("42", Some(b"creds".to_vec()), tx)
            .await
            .unwrap();

        let store = Arc::new(SessionStore::new(None));
        let router = MessageRouter::new(
            store,
            DbClient::new(&server.url()),
            AiClient::new(&server.url()),
        );
        (connector, conn, router)
    }

    #[test]
    fn session_init_parsing_is_strict() {
        assert_eq!(
            parse_session_init("42-7"),
            Some(ConversationContext {
                merchant_id: "42".into(),
                product_id: "7".into(),
            })
        );
        for bad in ["", "42", "42-", "-7", "42-7-9", "42-7:x"] {
            assert_eq!(parse_session_init(bad), None, "accepted {bad:?}");
        }
    }

    #[tokio::test]
    async fn session_init_sets_context_and_sends_initial_reply() {
        let mut server = mockito::Server::new_async().await;
        let save = server
            .mock("POST", "/api/session/save")
            .match_body(Matcher::Json(json!({
                "numero_client": "15551234567",
                "ecommercant_id": "42",
                "produit_id": "7",
            })))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let generate = server
            .mock("POST", "/api/ia/generer-reponse")
            .match_body(Matcher::Json(json!({
                "ecommercant_id": "42",
                "produit_id": "7",
                "numero_client": "15551234567",
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"reponse":"Bienvenue !"}"#)
            .expect(1)
            .create_async()
            .await;

        let (connector, conn, router) = setup(&server).await;
        router
            .handle_inbound("42", &inbound("15551234567", "IA-AUTO:42-7"), &conn)
            .await;

        let ctx = router.store.context("15551234567").await.unwrap();
        assert_eq!(ctx.merchant_id, "42");
        assert_eq!(ctx.product_id, "7");

        let sent = connector.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "Bienvenue !");
        assert_eq!(sent[0].jid, "15551234567@s.whatsapp.net");

        save.assert_async().await;
        generate.assert_async().await;
    }

    #[tokio::test]
    async fn session_init_survives_db_save_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/session/save")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("POST", "/api/ia/generer-reponse")
            .with_header("content-type", "application/json")
            .with_body(r#"{"reponse":"ok"}"#)
            .create_async()
            .await;

        let (connector, conn, router) = setup(&server).await;
        router
            .handle_inbound("42", &inbound("1555", "IA-AUTO:42-7"), &conn)
            .await;

        // Context is cached and the reply still goes out.
        assert!(router.store.context("1555").await.is_some());
        assert_eq!(connector.sent_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn malformed_session_init_is_dropped_silently() {
        let mut server = mockito::Server::new_async().await;
        let generate = server
            .mock("POST", "/api/ia/generer-reponse")
            .expect(0)
            .create_async()
            .await;

        let (connector, conn, router) = setup(&server).await;
        router
            .handle_inbound("42", &inbound("1555", "IA-AUTO:42-7-9"), &conn)
            .await;

        assert!(router.store.context("1555").await.is_none());
        assert!(connector.sent_messages().await.is_empty());
        generate.assert_async().await;
    }

    #[tokio::test]
    async fn memory_context_skips_the_db_lookup() {
        let mut server = mockito::Server::new_async().await;
        let find = server
            .mock("GET", "/api/session/find")
            .expect(0)
            .create_async()
            .await;
        let chat = server
            .mock("POST", "/api/ia/chat")
            .match_body(Matcher::Json(json!({
                "ecommercant_id": "42",
                "produit_id": "7",
                "message_client": "bonjour",
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"reponse":"salut"}"#)
            .expect(1)
            .create_async()
            .await;

        let (connector, conn, router) = setup(&server).await;
        router
            .store
            .set_context(
                "1555",
                ConversationContext {
                    merchant_id: "42".into(),
                    product_id: "7".into(),
                },
            )
            .await;

        router
            .handle_inbound("42", &inbound("1555", "bonjour"), &conn)
            .await;

        assert_eq!(connector.sent_messages().await[0].text, "salut");
        find.assert_async().await;
        chat.assert_async().await;
    }

    #[tokio::test]
    async fn db_hydration_happens_once_then_memory_wins() {
        let mut server = mockito::Server::new_async().await;
        let find = server
            .mock("GET", "/api/session/find")
            .match_query(Matcher::UrlEncoded("numero_client".into(), "1555".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"ecommercant_id":"42","produit_id":"7"}"#)
            .expect(1)
            .create_async()
            .await;
        let chat = server
            .mock("POST", "/api/ia/chat")
            .with_header("content-type", "application/json")
            .with_body(r#"{"reponse":"ok"}"#)
            .expect(2)
            .create_async()
            .await;

        let (connector, conn, router) = setup(&server).await;
        router
            .handle_inbound("42", &inbound("1555", "premier"), &conn)
            .await;
        router
            .handle_inbound("42", &inbound("1555", "deuxième"), &conn)
            .await;

        assert_eq!(connector.sent_messages().await.len(), 2);
        find.assert_async().await;
        chat.assert_async().await;
    }

    #[tokio::test]
    async fn no_context_anywhere_sends_the_onboarding_prompt() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/session/find")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;
        let chat = server
            .mock("POST", "/api/ia/chat")
            .expect(0)
            .create_async()
            .await;

        let (connector, conn, router) = setup(&server).await;
        router
            .handle_inbound("42", &inbound("1555", "bonjour"), &conn)
            .await;

        let sent = connector.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, ONBOARDING_PROMPT);
        chat.assert_async().await;
    }

    #[tokio::test]
    async fn echoes_and_empty_payloads_are_ignored() {
        let server = mockito::Server::new_async().await;
        let (connector, conn, router) = setup(&server).await;

        let mut echo = inbound("1555", "IA-AUTO:42-7");
        echo.from_self = true;
        router.handle_inbound("42", &echo, &conn).await;

        let empty = Inbound {
            sender_jid: "1555@s.whatsapp.net".into(),
            text: None,
            from_self: false,
        };
        router.handle_inbound("42", &empty, &conn).await;

        assert!(connector.sent_messages().await.is_empty());
        assert!(router.store.context("1555").await.is_none());
    }
}
