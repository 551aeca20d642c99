//! WebSocket endpoint for the realtime gateway.
//!
//! # Data Flow
//! ```text
//! Client ──text frames──→ reader task ──→ gateway.handle_text
//! Client ←─text/Close──── writer task ←── gateway outbound queue
//! ```
//!
//! # Design Decisions
//! - Upgrades are refused with 503 once shutdown began
//! - Either task ending tears down the other and unregisters the client
//! - Ping/pong handled by axum

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::http::server::AppState;
use crate::realtime::{ChatGateway, Outbound};

const SHUTDOWN_REASON: &str = "Server is shutting down";

/// `GET /ws`
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() || state.gateway.is_closing() {
        return (StatusCode::SERVICE_UNAVAILABLE, SHUTDOWN_REASON).into_response();
    }
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

fn shutdown_frame() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::AWAY,
        reason: SHUTDOWN_REASON.into(),
    }))
}

async fn handle_socket(mut socket: WebSocket, gateway: Arc<ChatGateway>) {
    // Shutdown may have started between the upgrade check and here.
    let Some((id, mut outbound)) = gateway.register() else {
        let _ = socket.send(shutdown_frame()).await;
        return;
    };

    let (mut sink, mut stream) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink.send(shutdown_frame()).await;
                    break;
                }
            }
        }
    });

    let reader_gateway = gateway.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => reader_gateway.handle_text(id, text.as_str()),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    gateway.unregister(id);
}
