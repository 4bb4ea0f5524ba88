//! HTTP facade over the session store and connection manager.
//!
//! Status codes and body shapes follow the bridge contract: plain text for
//! connect/QR errors, `{connected}` / `{success, message}` / `{error}` JSON
//! elsewhere, 408 for a failed protocol send. CORS is wide open; the facade
//! sits behind the platform's own gateway.

use crate::error::BridgeError;
use crate::manager::ConnectionManager;
use crate::store::SessionStore;
use crate::transport::jid;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use qrcode::render::svg;
use qrcode::QrCode;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub manager: Arc<ConnectionManager>,
    pub default_country_code: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/connect/{id}", get(connect))
        .route("/whatsapp/connected/{id}", get(connected))
        .route("/whatsapp/qr/{id}", get(qr_page))
        .route("/whatsapp/send", post(send))
        .route("/whatsapp/{id}", delete(delete_session))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /connect/{id} — start a connection unless one is already live.
/// Returns immediately; the QR becomes available asynchronously.
async fn connect(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.store.is_connected(&id).await {
        return format!("WhatsApp session already active for merchant {id}").into_response();
    }
    match state.manager.start_connection(&id).await {
        Ok(()) => {
            format!("connection started for merchant {id}; QR available shortly").into_response()
        }
        Err(e) => {
            tracing::error!("http: connect failed for {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to start connection: {e}"),
            )
                .into_response()
        }
    }
}

/// GET /whatsapp/connected/{id} — `{connected: bool}`.
async fn connected(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let connected = state.store.is_connected(&id).await;
    Json(json!({ "connected": connected })).into_response()
}

/// GET /whatsapp/qr/{id} — HTML page with the QR embedded as inline SVG,
/// or 404 while no QR has been generated yet.
async fn qr_page(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let payload = match state.store.qr(&id).await {
        Some(p) => p,
        None => {
            return (
                StatusCode::NOT_FOUND,
                "QR code not ready for this merchant",
            )
                .into_response();
        }
    };

    let image = match QrCode::new(payload.as_bytes()) {
        Ok(code) => code
            .render::<svg::Color>()
            .min_dimensions(256, 256)
            .build(),
        Err(e) => {
            tracing::error!("http: QR render failed for {}: {}", id, e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to render QR code",
            )
                .into_response();
        }
    };

    Html(format!(
        "<html>\n  <body>\n    <h2>WhatsApp QR for merchant {id}</h2>\n    {image}\n  </body>\n</html>"
    ))
    .into_response()
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    ecommercant_id: String,
    phone: String,
    message: String,
}

/// POST /whatsapp/send — send a text to a phone number through a merchant's
/// session. 500 without a live session, 408 when the protocol send fails.
async fn send(State(state): State<AppState>, Json(req): Json<SendRequest>) -> Response {
    let handle = match state.store.handle(&req.ecommercant_id).await {
        Some(h) => h,
        None => {
            let err = BridgeError::NoActiveSession(req.ecommercant_id.clone());
            return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
        }
    };

    let target = jid::to_jid(&req.phone, &state.default_country_code);
    tracing::info!(
        "http: sending for merchant {} to {}",
        req.ecommercant_id,
        target
    );

    match handle.send_text(&target, &req.message).await {
        Ok(()) => Json(json!({ "success": true, "message": "message sent" })).into_response(),
        Err(e) => {
            tracing::error!("http: send to {} failed: {}", target, e);
            (
                StatusCode::REQUEST_TIMEOUT,
                "WhatsApp send timed out; the number may be invalid or disconnected",
            )
                .into_response()
        }
    }
}

/// DELETE /whatsapp/{id} — logout, clear memory, delete credential material.
async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.manager.delete_connection(&id).await {
        Ok(()) => {
            Json(json!({ "success": true, "message": "session disconnected" })).into_response()
        }
        Err(BridgeError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no active session for this id" })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!("http: delete failed for {}: {}", id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
