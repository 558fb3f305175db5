use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;

use crate::config::{resolve_database_url, BotConfig};
use crate::dispatch::Dispatcher;
use crate::gemini::GeminiClient;
use crate::realtime::Broadcaster;
use crate::session::SessionManager;
use crate::store::{ContactStore, PgContactStore};
use crate::transport::{
    phone_chat_id, verify_webhook_signature, ChatTransport, WhatsAppTransport,
};
use crate::types::{AppState, EventEnvelopeIn, InboundMessage, UpdateContactBody};

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

async fn status_payload(state: &AppState) -> Value {
    let status = state.transport.status();
    json!({
        "isReady": status.is_ready,
        "isAuthenticated": status.is_authenticated,
        "sessionCount": state.sessions.session_count().await,
    })
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

async fn get_contacts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let contacts = state.store.all_contacts().await;
    Json(json!({ "contacts": contacts }))
}

/// Allowed contacts shaped for the admin send dropdown.
async fn get_allowed_contacts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let contacts = state
        .store
        .allowed_contacts()
        .await
        .into_iter()
        .map(|contact| {
            json!({
                "id": contact.whatsapp_id,
                "number": contact.phone_number,
                "name": contact.name,
            })
        })
        .collect::<Vec<_>>();
    Json(json!({ "contacts": contacts }))
}

async fn put_contact(
    Path(contact_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpdateContactBody>,
) -> impl IntoResponse {
    if body.name.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "name is required" })),
        )
            .into_response();
    }
    let is_allowed = body.is_allowed.unwrap_or(true);
    let Some(contact) = state
        .store
        .upsert_contact(&contact_id, body.name.trim(), is_allowed)
        .await
    else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "unable to update contact" })),
        )
            .into_response();
    };

    // Removal from the allow-list drops the live session only.
    if !is_allowed {
        state.sessions.clear_session(&contact_id).await;
        state
            .broadcaster
            .log(format!("Contact {contact_id} removed from allow-list"), "info")
            .await;
    }

    Json(json!({ "contact": contact })).into_response()
}

async fn delete_contact(
    Path(contact_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    state.sessions.clear_session(&contact_id).await;
    if let Err(err) = state.store.delete_contact(&contact_id).await {
        state.broadcaster.log(err, "error").await;
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "unable to delete contact" })),
        )
            .into_response();
    }
    Json(json!({ "success": true, "message": "Contact deleted successfully" })).into_response()
}

async fn whatsapp_webhook_verify(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let mode = params.get("hub.mode").cloned().unwrap_or_default();
    let verify_token = params.get("hub.verify_token").cloned().unwrap_or_default();
    let challenge = params.get("hub.challenge").cloned().unwrap_or_default();

    if mode == "subscribe"
        && !challenge.is_empty()
        && !state.webhook_verify_token.is_empty()
        && verify_token == state.webhook_verify_token
    {
        return (StatusCode::OK, challenge).into_response();
    }

    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": "invalid webhook verification token" })),
    )
        .into_response()
}

async fn whatsapp_webhook_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_webhook_signature(&state.webhook_app_secret, signature_header, &body) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid webhook signature" })),
        )
            .into_response();
    }

    let payload = serde_json::from_slice::<Value>(&body).unwrap_or_else(|_| json!({}));
    let messages = parse_webhook_messages(&payload);
    let received = messages.len();
    for inbound in messages {
        let dispatcher = state.dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.handle_inbound(inbound).await;
        });
    }

    Json(json!({ "received": received })).into_response()
}

/// Flattens a Cloud API webhook payload into normalized inbound events.
/// Anything without usable content (status callbacks, reactions with no
/// text) is skipped.
pub fn parse_webhook_messages(payload: &Value) -> Vec<InboundMessage> {
    let mut out = Vec::new();
    let entries = payload
        .get("entry")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for entry in entries {
        let changes = entry
            .get("changes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for change in changes {
            let value = change.get("value").cloned().unwrap_or_else(|| json!({}));
            let profile_names = webhook_profile_names(&value);
            let messages = value
                .get("messages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for message in messages {
                let from = message.get("from").and_then(Value::as_str).unwrap_or("");
                if from.is_empty() {
                    continue;
                }
                let Some((text, has_media, media_type)) = webhook_message_content(&message)
                else {
                    continue;
                };
                let display_name = profile_names.get(from).cloned().unwrap_or_default();
                out.push(InboundMessage {
                    from_id: phone_chat_id(from),
                    display_name,
                    text,
                    has_media,
                    media_type,
                });
            }
        }
    }
    out
}

fn webhook_profile_names(value: &Value) -> HashMap<String, String> {
    let mut names = HashMap::new();
    let contacts = value
        .get("contacts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for contact in contacts {
        let wa_id = contact.get("wa_id").and_then(Value::as_str).unwrap_or("");
        let name = contact
            .get("profile")
            .and_then(|p| p.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if !wa_id.is_empty() && !name.is_empty() {
            names.insert(wa_id.to_string(), name.to_string());
        }
    }
    names
}

fn webhook_message_content(message: &Value) -> Option<(String, bool, Option<String>)> {
    let msg_type = message
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_ascii_lowercase();

    if msg_type == "text" {
        let text = message
            .get("text")
            .and_then(|v| v.get("body"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        return if text.is_empty() {
            None
        } else {
            Some((text, false, None))
        };
    }

    // Media message: forward the caption (possibly empty) with the media
    // kind so the model is told what it cannot see.
    if matches!(
        msg_type.as_str(),
        "image" | "video" | "audio" | "voice" | "document" | "sticker"
    ) {
        let caption = message
            .get(&msg_type)
            .and_then(|v| v.get("caption"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim()
            .to_string();
        return Some((caption, true, Some(msg_type)));
    }

    None
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (client_id, mut rx) = state.broadcaster.register().await;
    state
        .broadcaster
        .log("Web interface connected", "success")
        .await;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // New dashboards get the recent log backlog and the current status.
    let backlog = state.broadcaster.log_backlog().await;
    state.broadcaster.emit_to(client_id, "logs", backlog).await;
    let status = status_payload(&state).await;
    state.broadcaster.emit_to(client_id, "status", status).await;

    while let Some(Ok(message)) = ws_receiver.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        let Ok(envelope) = serde_json::from_str::<EventEnvelopeIn>(&text) else {
            continue;
        };

        match envelope.event.as_str() {
            "request-status" => {
                let status = status_payload(&state).await;
                state.broadcaster.emit_to(client_id, "status", status).await;
            }
            "admin-send-message" => {
                let to = envelope
                    .data
                    .get("to")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let message = envelope
                    .data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                state.dispatcher.send_admin_message(to, message).await;
            }
            "clear-history" => {
                let contact_id = envelope
                    .data
                    .get("contactId")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if contact_id.is_empty() {
                    continue;
                }
                state.sessions.clear_session(contact_id).await;
                match state.store.clear_history(contact_id).await {
                    Ok(()) => {
                        state
                            .broadcaster
                            .log(
                                format!("Cleared conversation history for {contact_id}"),
                                "success",
                            )
                            .await;
                    }
                    Err(err) => state.broadcaster.log(err, "error").await,
                }
            }
            _ => {}
        }
    }

    state.broadcaster.unregister(client_id).await;
    state
        .broadcaster
        .log("Web interface disconnected", "warning")
        .await;
    send_task.abort();
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/contacts", get(get_contacts))
        .route("/api/allowed-contacts", get(get_allowed_contacts))
        .route(
            "/api/contacts/{contact_id}",
            put(put_contact).delete(delete_contact),
        )
        .route(
            "/api/whatsapp/webhook",
            get(whatsapp_webhook_verify).post(whatsapp_webhook_event),
        )
        .route("/ws", get(ws_handler))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

pub async fn run() {
    let _ = dotenvy::dotenv();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3000);
    let database_url = resolve_database_url();
    let config = BotConfig::from_env();

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to postgres (set DATABASE_URL or POSTGRES_* env vars)");

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("failed to run sqlx migrations");

    let http = reqwest::Client::new();
    let broadcaster = Arc::new(Broadcaster::new());
    let store = Arc::new(PgContactStore::new(db));
    let model = Arc::new(GeminiClient::new(http.clone(), &config));
    let transport = Arc::new(WhatsAppTransport::new(
        http,
        std::env::var("WHATSAPP_ACCESS_TOKEN").unwrap_or_default(),
        std::env::var("WHATSAPP_PHONE_NUMBER_ID").unwrap_or_default(),
    ));
    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        model,
        broadcaster.clone(),
        config.fallback_message.clone(),
        config.max_live_sessions,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        sessions.clone(),
        transport.clone(),
        broadcaster.clone(),
    ));

    let state = Arc::new(AppState {
        store,
        sessions,
        dispatcher,
        broadcaster: broadcaster.clone(),
        transport: transport.clone(),
        webhook_verify_token: std::env::var("WHATSAPP_VERIFY_TOKEN").unwrap_or_default(),
        webhook_app_secret: std::env::var("WHATSAPP_APP_SECRET").unwrap_or_default(),
    });

    // Periodic status tick keeps reconnecting dashboards current.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(30));
            loop {
                tick.tick().await;
                let status = status_payload(&state).await;
                state.broadcaster.emit("status", status).await;
            }
        });
    }

    let app = router(state.clone());

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    broadcaster
        .log(format!("Server started on http://{addr}"), "setup")
        .await;
    let allowed = state.store.allowed_contacts().await.len();
    broadcaster
        .log(format!("Allowed contacts: {allowed}"), "info")
        .await;
    broadcaster
        .log(
            format!(
                "GEMINI_API_KEY: {}",
                if config.gemini_api_key.trim().is_empty() {
                    "missing"
                } else {
                    "configured"
                }
            ),
            "info",
        )
        .await;

    axum::serve(listener, app)
        .await
        .expect("server runtime failure");
}
