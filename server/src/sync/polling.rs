//! Long-poll fallback transport: the same per-client message queue as the
//! WebSocket path, drained by HTTP requests instead of a socket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::debug;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::server::Server;
use crate::sync::TransportKind;

/// How long a poll request may hang waiting for the first message.
const POLL_WINDOW: Duration = Duration::from_secs(25);

type MessageQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>;

/// Receiver halves of polling clients' queues, keyed by client id. The
/// sender half lives in the broadcaster's registry like any other client.
#[derive(Default)]
pub struct PollingSessions {
    sessions: Mutex<HashMap<u64, MessageQueue>>,
}

impl PollingSessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: u64, rx: mpsc::UnboundedReceiver<String>) {
        self.sessions
            .lock()
            .insert(id, Arc::new(tokio::sync::Mutex::new(rx)));
    }

    fn get(&self, id: u64) -> Option<MessageQueue> {
        self.sessions.lock().get(&id).cloned()
    }

    fn remove(&self, id: u64) -> bool {
        self.sessions.lock().remove(&id).is_some()
    }

    pub fn clear(&self) {
        self.sessions.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

/// `POST /__vesper/poll` — handshake. Registers the client and hands back
/// the id used to drain its queue.
pub async fn handshake(State(server): State<Arc<Server>>) -> impl IntoResponse {
    let (tx, rx) = mpsc::unbounded_channel();
    let coordinator = server.coordinator();
    let client = server
        .broadcaster()
        .register(TransportKind::Polling, tx, || coordinator.current());
    server.polling().insert(client.id(), rx);

    debug!(target: "sync", "polling client {} connected", client.id());
    Json(serde_json::json!({ "client": client.id() }))
}

/// `GET /__vesper/poll/{id}` — drain queued messages. Hangs up to the poll
/// window for the first message, then flushes whatever else is queued.
pub async fn drain(State(server): State<Arc<Server>>, Path(id): Path<u64>) -> Response {
    let Some(queue) = server.polling().get(id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut rx = queue.lock().await;
    let mut batch = Vec::new();

    match timeout(POLL_WINDOW, rx.recv()).await {
        Err(_) => {} // window elapsed with nothing to say
        Ok(Some(first)) => {
            batch.push(first);
            while let Ok(more) = rx.try_recv() {
                batch.push(more);
            }
        }
        Ok(None) => {
            // Sender gone: the broadcaster closed this client.
            drop(rx);
            server.polling().remove(id);
            server.broadcaster().deregister(id);
        }
    }

    // Messages are already encoded JSON objects; join them into an array.
    let body = format!("[{}]", batch.join(","));
    ([("content-type", "application/json")], body).into_response()
}

/// `DELETE /__vesper/poll/{id}` — explicit client teardown.
pub async fn close(State(server): State<Arc<Server>>, Path(id): Path<u64>) -> StatusCode {
    server.polling().remove(id);
    server.broadcaster().deregister(id);
    StatusCode::NO_CONTENT
}
