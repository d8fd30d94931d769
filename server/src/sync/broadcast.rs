use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::debug;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::build::{BuildSnapshot, BuildState};
use crate::pipeline::BuildStats;

use super::protocol::{ProgressPayload, SyncMessage, encode};

/// How a client is attached to the live update channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebSocket,
    Polling,
}

/// Display hints and feature flags announced to every client on handshake,
/// derived from the server configuration.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub hot: bool,
    pub live_reload: bool,
    pub overlay: bool,
    pub progress: bool,
    pub logging: String,
}

/// One live browser session. Messages pushed through `send` arrive at the
/// transport in push order; that per-client ordering is the protocol's one
/// hard guarantee.
pub struct ClientConnection {
    id: u64,
    kind: TransportKind,
    // Taken on shutdown so the transport's drain loop sees its queue close
    // even while the transport still holds an Arc to this connection.
    sender: Mutex<Option<mpsc::UnboundedSender<String>>>,
    last_known_hash: Mutex<Option<String>>,
    alive: AtomicBool,
}

impl ClientConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Push a message onto this client's queue. A dead transport turns the
    /// send into a silent no-op and reports `false` so the caller can prune.
    fn send(&self, message: &SyncMessage) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        if sender.send(encode(message)).is_err() {
            self.alive.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn shut_down(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.sender.lock().take();
    }
}

/// Fan-out layer between the build coordinator and the connected clients.
///
/// Owns the connection registry. Broadcast loops iterate over a snapshot of
/// the registry, so clients may connect or drop mid-broadcast without
/// corrupting the iteration; a failed send only prunes that one client.
pub struct Broadcaster {
    options: SyncOptions,
    clients: Mutex<BTreeMap<u64, Arc<ClientConnection>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            clients: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Register a new client and queue its handshake: feature flags and
    /// display hints first, then the current build state, so a late joiner
    /// is never silently behind.
    ///
    /// The build state is read and the handshake queued while the registry
    /// is locked: a build completing concurrently is either seen by the
    /// handshake or broadcast to the client right after insertion — never
    /// lost between the two.
    pub fn register(
        &self,
        kind: TransportKind,
        sender: mpsc::UnboundedSender<String>,
        current: impl FnOnce() -> BuildSnapshot,
    ) -> Arc<ClientConnection> {
        let client = Arc::new(ClientConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            kind,
            sender: Mutex::new(Some(sender)),
            last_known_hash: Mutex::new(None),
            alive: AtomicBool::new(true),
        });

        let mut clients = self.clients.lock();

        if self.options.hot {
            client.send(&SyncMessage::Hot);
        }
        if self.options.live_reload {
            client.send(&SyncMessage::LiveReload);
        }
        client.send(&SyncMessage::Overlay {
            data: self.options.overlay,
        });
        client.send(&SyncMessage::Progress {
            data: self.options.progress,
        });
        client.send(&SyncMessage::Log {
            data: self.options.logging.clone(),
        });

        match current().state {
            BuildState::Idle | BuildState::Building => {
                client.send(&SyncMessage::Invalid);
            }
            BuildState::Done(stats) => {
                self.send_outcome(&client, &stats, true);
            }
            BuildState::Errored(message) => {
                client.send(&SyncMessage::Error { data: message });
            }
        }

        clients.insert(client.id, Arc::clone(&client));
        debug!(target: "sync", "client {} connected ({:?})", client.id, kind);
        client
    }

    /// Remove a client. Safe to call any number of times for the same id and
    /// during an in-progress broadcast.
    pub fn deregister(&self, id: u64) -> bool {
        match self.clients.lock().remove(&id) {
            Some(client) => {
                client.shut_down();
                debug!(target: "sync", "client {} disconnected", id);
                true
            }
            None => false,
        }
    }

    /// A build was invalidated: tell everyone, fire and forget.
    pub fn on_invalid(&self) {
        self.broadcast(&SyncMessage::Invalid);
    }

    /// A build finished: push the ordered outcome sequence to every client.
    pub fn on_done(&self, stats: &BuildStats) {
        let mut dead = Vec::new();
        for client in self.snapshot() {
            if !self.send_outcome(&client, stats, false) {
                dead.push(client.id);
            }
        }
        for id in dead {
            self.deregister(id);
        }
    }

    pub fn on_progress(&self, percent: f64, msg: &str) {
        self.broadcast(&SyncMessage::ProgressUpdate {
            data: ProgressPayload {
                percent,
                msg: msg.to_string(),
            },
        });
    }

    pub fn on_error(&self, message: &str) {
        self.broadcast(&SyncMessage::Error {
            data: message.to_string(),
        });
    }

    pub fn on_content_changed(&self, path: &str) {
        self.broadcast(&SyncMessage::ContentChanged {
            data: Some(path.to_string()),
        });
    }

    pub fn on_static_changed(&self, path: &str) {
        self.broadcast(&SyncMessage::StaticChanged {
            data: Some(path.to_string()),
        });
    }

    /// Graceful teardown: `close` to every client, then drop the registry.
    /// Dropping the senders ends each transport's drain loop.
    pub fn close_all(&self) {
        let clients = std::mem::take(&mut *self.clients.lock());
        for client in clients.values() {
            client.send(&SyncMessage::Close);
            client.shut_down();
        }
    }

    /// The outcome sequence for one client: `still-ok` when a clean rebuild
    /// left the client's hash current, otherwise `hash` first, then
    /// `warnings` if any, then the terminal `errors` or `ok`. The `hash`
    /// message always precedes the outcome, never the other way around.
    fn send_outcome(&self, client: &ClientConnection, stats: &BuildStats, force: bool) -> bool {
        let mut last_known = client.last_known_hash.lock();

        if !force && stats.is_clean() && last_known.as_deref() == Some(stats.hash.as_str()) {
            return client.send(&SyncMessage::StillOk);
        }

        if !client.send(&SyncMessage::Hash {
            data: stats.hash.clone(),
        }) {
            return false;
        }
        *last_known = Some(stats.hash.clone());

        if !stats.warnings.is_empty() {
            client.send(&SyncMessage::Warnings {
                data: stats.warnings.clone(),
                params: None,
            });
        }

        if stats.has_errors() {
            client.send(&SyncMessage::Errors {
                data: stats.errors.clone(),
            })
        } else {
            client.send(&SyncMessage::Ok)
        }
    }

    fn broadcast(&self, message: &SyncMessage) {
        let mut dead = Vec::new();
        for client in self.snapshot() {
            if !client.send(message) {
                dead.push(client.id);
            }
        }
        for id in dead {
            self.deregister(id);
        }
    }

    /// Stable, registration-ordered view of the registry for one broadcast.
    fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.clients.lock().values().cloned().collect()
    }
}
