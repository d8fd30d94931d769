use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use log::debug;
use tokio::sync::mpsc;

use crate::server::Server;
use crate::sync::TransportKind;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(server): State<Arc<Server>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, server))
}

/// One connection: register with the broadcaster (which queues the
/// handshake), then drain the client queue into the socket until either side
/// goes away. Deregistration runs exactly once on the way out; the
/// broadcaster tolerates a second call if the registry was already drained
/// by shutdown.
pub async fn handle_socket(socket: WebSocket, server: Arc<Server>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let coordinator = server.coordinator();
    let client = server
        .broadcaster()
        .register(TransportKind::WebSocket, tx, || coordinator.current());

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            queued = rx.recv() => match queued {
                Some(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                // Sender dropped: the broadcaster closed us (shutdown).
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(other)) => {
                    tracing::trace!("ignoring client frame: {:?}", other);
                }
            },
        }
    }

    server.broadcaster().deregister(client.id());
    debug!(target: "sync", "ws client {} gone", client.id());
}
