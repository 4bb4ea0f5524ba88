//! HTTP collaborators: the session-persistence service and the AI response
//! service. Field names follow the collaborator wire format exactly
//! (`numero_client`, `ecommercant_id`, `produit_id`, `message_client`,
//! `reponse`). No retries and no timeouts beyond the client defaults; every
//! failure surfaces as a `Collaborator` error for the caller to log.

use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct SaveSessionBody<'a> {
    numero_client: &'a str,
    ecommercant_id: &'a str,
    produit_id: &'a str,
}

/// A persisted conversation context as returned by the DB service.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionRecord {
    pub ecommercant_id: String,
    pub produit_id: String,
}

/// Client for the session-persistence service.
#[derive(Debug, Clone)]
pub struct DbClient {
    http: reqwest::Client,
    base_url: String,
}

impl DbClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `POST /api/session/save` — persist a customer → (merchant, product)
    /// association.
    pub async fn save_session(
        &self,
        numero_client: &str,
        ecommercant_id: &str,
        produit_id: &str,
    ) -> Result<()> {
        let url = format!("{}/api/session/save", self.base_url);
        self.http
            .post(&url)
            .json(&SaveSessionBody {
                numero_client,
                ecommercant_id,
                produit_id,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// `GET /api/session/find?numero_client=…` — look up the persisted
    /// association for a customer number.
    pub async fn find_session(&self, numero_client: &str) -> Result<SessionRecord> {
        let url = format!("{}/api/session/find", self.base_url);
        let record = self
            .http
            .get(&url)
            .query(&[("numero_client", numero_client)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(record)
    }
}

#[derive(Debug, Serialize)]
struct InitialReplyBody<'a> {
    ecommercant_id: &'a str,
    produit_id: &'a str,
    numero_client: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatReplyBody<'a> {
    ecommercant_id: &'a str,
    produit_id: &'a str,
    message_client: &'a str,
}

#[derive(Debug, Deserialize)]
struct AiReply {
    reponse: String,
}

/// Client for the AI response service.
#[derive(Debug, Clone)]
pub struct AiClient {
    http: reqwest::Client,
    base_url: String,
}

impl AiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// `POST /api/ia/generer-reponse` — opening message for a fresh
    /// session-init link.
    pub async fn initial_reply(
        &self,
        ecommercant_id: &str,
        produit_id: &str,
        numero_client: &str,
    ) -> Result<String> {
        let url = format!("{}/api/ia/generer-reponse", self.base_url);
        let reply: AiReply = self
            .http
            .post(&url)
            .json(&InitialReplyBody {
                ecommercant_id,
                produit_id,
                numero_client,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(reply.reponse)
    }

    /// `POST /api/ia/chat` — response to an ordinary customer message.
    pub async fn chat_reply(
        &self,
        ecommercant_id: &str,
        produit_id: &str,
        message_client: &str,
    ) -> Result<String> {
        let url = format!("{}/api/ia/chat", self.base_url);
        let reply: AiReply = self
            .http
            .post(&url)
            .json(&ChatReplyBody {
                ecommercant_id,
                produit_id,
                message_client,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(reply.reponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn save_session_posts_the_wire_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/session/save")
            .match_body(Matcher::Json(json!({
                "numero_client": "15551234567",
                "ecommercant_id": "42",
                "produit_id": "7",
            })))
            .with_status(200)
            .create_async()
            .await;

        let db = DbClient::new(&server.url());
        db.save_session("15551234567", "42", "7").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn find_session_decodes_the_record() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/session/find")
            .match_query(Matcher::UrlEncoded(
                "numero_client".into(),
                "15551234567".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ecommercant_id":"42","produit_id":"7"}"#)
            .create_async()
            .await;

        let db = DbClient::new(&server.url());
        let record = db.find_session("15551234567").await.unwrap();
        assert_eq!(record.ecommercant_id, "42");
        assert_eq!(record.produit_id, "7");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn find_session_miss_is_a_collaborator_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/session/find")
            .with_status(404)
            .create_async()
            .await;

        let db = DbClient::new(&server.url());
        let err = db.find_session("000").await.unwrap_err();
        assert!(matches!(err, BridgeError::Collaborator(_)));
    }

    #[tokio::test]
    async fn initial_reply_returns_the_response_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/ia/generer-reponse")
            .match_body(Matcher::Json(json!({
                "ecommercant_id": "42",
                "produit_id": "7",
                "numero_client": "15551234567",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"reponse":"Bonjour !"}"#)
            .create_async()
            .await;

        let ai = AiClient::new(&server.url());
        let text = ai.initial_reply("42", "7", "15551234567").await.unwrap();
        assert_eq!(text, "Bonjour !");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn chat_reply_sends_the_customer_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/ia/chat")
            .match_body(Matcher::Json(json!({
                "ecommercant_id": "42",
                "produit_id": "7",
                "message_client": "combien ça coûte ?",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"reponse":"15 euros"}"#)
            .create_async()
            .await;

        let ai = AiClient::new(&server.url());
        let text = ai.chat_reply("42", "7", "combien ça coûte ?").await.unwrap();
        assert_eq!(text, "15 euros");
        mock.assert_async().await;
    }
}
