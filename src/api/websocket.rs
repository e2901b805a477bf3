//! WebSocket session channel for interactive terminals.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::handlers::AppState;
use super::types::WsMessage;
use crate::error::TunnelError;
use crate::session::SessionId;
use crate::terminal::{EventSink, TerminalEvent, TerminalMultiplexer};

/// Terminal events buffered per connection.
const EVENT_QUEUE: usize = 256;
/// Direct replies buffered per connection.
const REPLY_QUEUE: usize = 32;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection = SessionId::for_connection();
    info!(connection = %connection, "session channel opened");

    let (mut sink, mut stream) = socket.split();
    let (event_tx, mut event_rx) = mpsc::channel::<TerminalEvent>(EVENT_QUEUE);
    let (reply_tx, mut reply_rx) = mpsc::channel::<Message>(REPLY_QUEUE);

    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                Some(event) = event_rx.recv() => encode(&WsMessage::from(event)),
                Some(frame) = reply_rx.recv() => Some(frame),
                else => break,
            };
            let Some(frame) = frame else { continue };
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(data)) => {
                let _ = reply_tx.send(Message::Pong(data)).await;
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                debug!(connection = %connection, "socket error: {}", e);
                break;
            }
        };

        let reply = match serde_json::from_str::<WsMessage>(&text) {
            Ok(msg) => handle_message(&state.terminals, &connection, msg, &event_tx).await,
            Err(e) => Some(WsMessage::error(&TunnelError::BadRequest(e.to_string()))),
        };
        if let Some(frame) = reply.as_ref().and_then(encode) {
            if reply_tx.send(frame).await.is_err() {
                break;
            }
        }
    }

    // Terminals hold clones of the event sender; their next delivery fails
    // once the writer is gone and they detach. The shells keep running.
    writer.abort();
    info!(connection = %connection, "session channel closed");
}

fn encode(msg: &WsMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("cannot encode frame: {}", e);
            None
        }
    }
}

/// Act on one client frame; the return value is sent straight back.
pub async fn handle_message(
    terminals: &TerminalMultiplexer,
    connection: &SessionId,
    msg: WsMessage,
    events: &EventSink,
) -> Option<WsMessage> {
    match msg {
        WsMessage::CreateTerminal { session_id } => {
            let session = match session_id {
                Some(raw) => match SessionId::parse(&raw) {
                    Ok(id) => id,
                    Err(e) => return Some(WsMessage::error(&e)),
                },
                None => connection.clone(),
            };
            match terminals.create(&session, events.clone()).await {
                Ok(_) => None,
                Err(e) => {
                    warn!(connection = %connection, session = %session, "create-terminal failed: {}", e);
                    Some(WsMessage::error(&e))
                }
            }
        }
        // Only honored for the terminal this connection is attached to.
        WsMessage::TerminalInput { term_id, input } => {
            terminals.input(&term_id, events, input.into_bytes()).await;
            None
        }
        WsMessage::TerminalResize { term_id, cols, rows } => {
            terminals.resize(&term_id, events, cols, rows);
            None
        }
        WsMessage::Ping => Some(WsMessage::Pong),
        other => {
            debug!(connection = %connection, "ignoring server-side frame from client: {:?}", other);
            None
        }
    }
}
