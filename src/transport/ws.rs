//! WebSocket transport
//!
//! `GET /ws` upgrades to a socket that carries one JSON envelope per text
//! frame in both directions.

use super::Session;
use crate::health::AppState;
use crate::protocol::envelope::Envelope;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// WebSocket connection handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (outbound, inbound) = mpsc::unbounded_channel();
        let session = state.container.open_session(outbound);
        handle_socket(socket, session, inbound).await;
    })
}

async fn handle_socket(
    mut socket: WebSocket,
    session: Session,
    mut outbound: mpsc::UnboundedReceiver<Envelope>,
) {
    let session_id = session.id();
    let cancel = session.cancellation();
    info!(%session_id, "WebSocket connected");

    loop {
        tokio::select! {
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => match Envelope::from_json(text.as_str()) {
                    Ok(envelope) => session.handle(envelope),
                    Err(err) => warn!(%session_id, error = %err, "Ignoring malformed frame"),
                },
                Some(Ok(Message::Binary(data))) => {
                    warn!(%session_id, bytes = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(%session_id, ?frame, "Peer closed socket");
                    break;
                }
                Some(Err(err)) => {
                    error!(%session_id, error = %err, "WebSocket error");
                    break;
                }
                None => break,
            },
            envelope = outbound.recv() => {
                let Some(envelope) = envelope else { break };
                let text = match envelope.to_json() {
                    Ok(text) => text,
                    Err(err) => {
                        error!(
                            %session_id,
                            kind = envelope.kind(),
                            error = %err,
                            "Envelope serialization failed"
                        );
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    debug!(%session_id, "Send failed, closing");
                    break;
                }
            }
            _ = cancel.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    session.close();
    info!(%session_id, "WebSocket disconnected");
}
