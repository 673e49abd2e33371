// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! WebSocket bridge — translates browser WebSocket connections to chat
//! requests and relays the client event stream back as JSON text frames.
//!
//! Each connection gets its own publisher (an mpsc channel drained into the
//! socket) and its own orchestrator built from the shared factory.  An
//! in-flight request is aborted cooperatively when the client disconnects;
//! session state already written to history is preserved.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use maestro_core::Orchestrator;
use maestro_events::{EventPublisher, WebSocketPublisher};
use maestro_tools::{ElicitationBroker, ElicitationResponse};

use crate::command::ChatCommand;

/// Builds a per-connection orchestrator around the connection's publisher.
pub type OrchestratorFactory =
    Arc<dyn Fn(Arc<dyn EventPublisher>) -> Arc<Orchestrator> + Send + Sync>;

#[derive(Clone)]
pub struct GatewayState {
    pub factory: OrchestratorFactory,
    pub broker: Arc<ElicitationBroker>,
    pub default_model: String,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: std::net::SocketAddr, state: GatewayState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("gateway listening on {addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Value>(64);
    let publisher: Arc<dyn EventPublisher> = Arc::new(WebSocketPublisher::new(outbound_tx));
    let orchestrator = (state.factory)(publisher.clone());

    // The session bound to this connection, created lazily on first chat.
    let mut session_id: Option<Uuid> = None;
    // The in-flight request task, aborted on disconnect.
    let mut in_flight: Option<tokio::task::JoinHandle<()>> = None;

    loop {
        tokio::select! {
            // Outgoing event from the pipeline.
            event = outbound_rx.recv() => {
                match event {
                    Some(event) => {
                        if let Ok(text) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
            // Incoming command from the client.
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(
                            &text,
                            &state,
                            &orchestrator,
                            &publisher,
                            &mut session_id,
                            &mut in_flight,
                        )
                        .await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!("WebSocket recv error: {e}");
                        break;
                    }
                }
            }
        }
    }

    // Cooperative cancellation: stop the pipeline, keep session state.
    if let Some(task) = in_flight.take() {
        task.abort();
    }
    debug!("WebSocket connection closed");
}

async fn handle_command(
    text: &str,
    state: &GatewayState,
    orchestrator: &Arc<Orchestrator>,
    publisher: &Arc<dyn EventPublisher>,
    session_id: &mut Option<Uuid>,
    in_flight: &mut Option<tokio::task::JoinHandle<()>>,
) {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            publisher
                .send_json(json!({"type": "error", "message": format!("invalid JSON command: {e}")}))
                .await;
            return;
        }
    };

    match value["type"].as_str() {
        Some("chat") => {
            let command: ChatCommand = match serde_json::from_value(value) {
                Ok(command) => command,
                Err(e) => {
                    publisher
                        .send_json(
                            json!({"type": "error", "message": format!("invalid chat command: {e}")}),
                        )
                        .await;
                    return;
                }
            };

            // Resolve (or create) the connection's session.
            let id = match command.session_id.or(*session_id) {
                Some(id) => id,
                None => {
                    let session = orchestrator
                        .create_session(command.user_email.as_deref())
                        .await;
                    session.id
                }
            };
            *session_id = Some(id);

            let request = command.into_request(id, &state.default_model);
            let orchestrator = orchestrator.clone();
            let publisher = publisher.clone();
            *in_flight = Some(tokio::spawn(async move {
                if let Err(e) = orchestrator.execute(request).await {
                    warn!("chat request failed: {e}");
                    publisher
                        .send_json(json!({"type": "error", "message": e.to_string()}))
                        .await;
                }
            }));
        }
        Some("elicitation_response") => {
            let Some(elicitation_id) = value["elicitation_id"].as_str() else {
                publisher
                    .send_json(json!({"type": "error", "message": "missing elicitation_id"}))
                    .await;
                return;
            };
            let response: ElicitationResponse =
                serde_json::from_value(value.clone()).unwrap_or_default();
            if !state.broker.resolve(elicitation_id, response).await {
                warn!("elicitation response for unknown id {elicitation_id}");
            }
        }
        Some("end_session") => {
            let target = value["session_id"]
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .or(*session_id);
            if let Some(id) = target {
                orchestrator.end_session(id).await;
                if *session_id == Some(id) {
                    *session_id = None;
                }
                publisher
                    .send_json(json!({
                        "type": "session_reset",
                        "session_id": id.to_string(),
                        "message": "Session ended."
                    }))
                    .await;
            }
        }
        other => {
            publisher
                .send_json(json!({
                    "type": "error",
                    "message": format!("unknown command type: {other:?}")
                }))
                .await;
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
