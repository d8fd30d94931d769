mod config;
pub mod errors;
mod files;
mod lifecycle;

pub use config::{ClientHints, PortMode, PortValue, ServerConfig};
pub use lifecycle::LifecycleState;

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use axum::Router;
use axum::routing::{get, post};
use log::info;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use vesper_shared::{VesperError, VesperResult};

use crate::artifacts::ArtifactStore;
use crate::build::BuildCoordinator;
use crate::pipeline::BuildPipeline;
use crate::sync::polling::{self, PollingSessions};
use crate::sync::{Broadcaster, SyncOptions, ws};

type StopCallback = Box<dyn FnOnce() + Send>;

/// The dev server: owns the artifact store, the build coordinator, the
/// broadcast coordinator and the HTTP surface, and sequences their
/// startup and shutdown.
pub struct Server {
    // Handle back to the owning Arc, for tasks and router state.
    weak: Weak<Server>,
    config: ServerConfig,
    pipeline: Arc<dyn BuildPipeline>,
    store: Arc<ArtifactStore>,
    broadcaster: Arc<Broadcaster>,
    polling: PollingSessions,
    // Fresh per start cycle; handlers grab the current one per request.
    coordinator: Mutex<Arc<BuildCoordinator>>,
    state_tx: watch::Sender<LifecycleState>,
    inner: Mutex<Inner>,
    on_stop: Mutex<Option<StopCallback>>,
}

/// Resources owned by one start/stop cycle.
#[derive(Default)]
struct Inner {
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<watch::Sender<()>>,
    serve_task: Option<JoinHandle<()>>,
    coordinator_task: Option<JoinHandle<()>>,
    watcher_abort: Option<AbortHandle>,
    signal_abort: Option<AbortHandle>,
}

impl Server {
    pub fn new(config: ServerConfig, pipeline: Arc<dyn BuildPipeline>) -> Arc<Self> {
        let options = SyncOptions {
            hot: config.hot,
            live_reload: config.live_reload,
            overlay: config.client.overlay,
            progress: config.client.progress,
            logging: config.client.logging.clone(),
        };
        let (state_tx, _) = watch::channel(LifecycleState::Created);

        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            config,
            pipeline,
            store: Arc::new(ArtifactStore::new()),
            broadcaster: Arc::new(Broadcaster::new(options)),
            polling: PollingSessions::new(),
            coordinator: Mutex::new(Arc::new(BuildCoordinator::new())),
            state_tx,
            inner: Mutex::new(Inner::default()),
            on_stop: Mutex::new(None),
        })
    }

    /// The owning Arc. Infallible while any caller holds the server.
    fn shared(&self) -> Arc<Self> {
        self.weak.upgrade().expect("server instance dropped")
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn polling(&self) -> &PollingSessions {
        &self.polling
    }

    pub fn coordinator(&self) -> Arc<BuildCoordinator> {
        Arc::clone(&self.coordinator.lock())
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// The bound address while listening.
    pub fn address(&self) -> Option<SocketAddr> {
        self.inner.lock().local_addr
    }

    /// Callback invoked exactly once when the next stop completes.
    pub fn on_stop(&self, callback: impl FnOnce() + Send + 'static) {
        *self.on_stop.lock() = Some(Box::new(callback));
    }

    /// Resolve once the instance reaches `Stopped`. Lets an embedder park
    /// until a signal-driven or programmatic stop finishes.
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.state_tx.subscribe();
        while *rx.borrow_and_update() != LifecycleState::Stopped {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Bring the server up: validate configuration, bind the port, subscribe
    /// the build pipeline's hooks, then serve. By the time this returns the
    /// listener is accepting requests and the pipeline is observed.
    ///
    /// A second `start` while running is a no-op.
    pub async fn start(&self) -> VesperResult<()> {
        eprintln!("DBG start: entry");
        // Fail fast on configuration before any resource is acquired.
        let port_mode = self.config.validate()?;
        eprintln!("DBG start: validated");

        {
            let _guard = self.inner.lock();
            eprintln!("DBG start: inner locked");
            match *self.state_tx.borrow() {
                LifecycleState::Starting | LifecycleState::Listening => {
                    info!(target: "server", "start ignored, server already running");
                    return Ok(());
                }
                LifecycleState::Stopping => {
                    return Err(VesperError::Lifecycle("server is stopping".into()));
                }
                LifecycleState::Created | LifecycleState::Stopped => {
                    eprintln!("DBG start: before send_replace");
                    self.state_tx.send_replace(LifecycleState::Starting);
                    eprintln!("DBG start: after send_replace");
                }
            }
        }

        eprintln!("DBG start: calling start_inner");
        match self.start_inner(port_mode).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Roll back so a later start, or a stop, stays well-defined.
                let _guard = self.inner.lock();
                self.state_tx.send_replace(LifecycleState::Created);
                Err(e)
            }
        }
    }

    async fn start_inner(&self, port_mode: PortMode) -> VesperResult<()> {
        eprintln!("DBG start_inner: binding");
        let listener = lifecycle::bind(&self.config.host, port_mode).await?;
        eprintln!("DBG start_inner: bound");
        let local_addr = listener
            .local_addr()
            .map_err(|e| VesperError::Lifecycle(format!("no local address: {}", e)))?;

        // Subscribe pipeline hooks before the listener serves its first
        // request, so no build event can be missed by a connecting client.
        let coordinator = Arc::new(BuildCoordinator::new());
        let coordinator_task = Arc::clone(&coordinator).start(
            Arc::clone(&self.pipeline),
            Arc::clone(&self.store),
            Arc::clone(&self.broadcaster),
        )?;
        *self.coordinator.lock() = coordinator;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(());
        let app = self.router();
        let serve_task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                log::error!(target: "server", "listener error: {}", e);
            }
        });

        let watcher_abort = match lifecycle::spawn_change_watcher(&self.shared()) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!(target: "server", "change watcher disabled: {}", e);
                None
            }
        };
        let signal_abort = self
            .config
            .setup_exit_signals
            .then(|| lifecycle::spawn_signal_listener(self.shared()));

        {
            let mut inner = self.inner.lock();
            inner.local_addr = Some(local_addr);
            inner.shutdown_tx = Some(shutdown_tx);
            inner.serve_task = Some(serve_task);
            inner.coordinator_task = Some(coordinator_task);
            inner.watcher_abort = watcher_abort;
            inner.signal_abort = signal_abort;
            self.state_tx.send_replace(LifecycleState::Listening);
        }

        eprintln!("DBG start_inner: listening, returning");
        info!(target: "server", "server running on http://{}", local_addr);
        Ok(())
    }

    /// Wind the server down: stop accepting, close every client, stop the
    /// pipeline, release the port, then fire the stop callback. Re-entrant
    /// stops coalesce against the stop already in flight; stopping a server
    /// that never started is a no-op.
    pub async fn stop(&self) -> VesperResult<()> {
        let taken = {
            let mut inner = self.inner.lock();
            match *self.state_tx.borrow() {
                LifecycleState::Created | LifecycleState::Stopped => return Ok(()),
                LifecycleState::Stopping => None,
                LifecycleState::Starting | LifecycleState::Listening => {
                    self.state_tx.send_replace(LifecycleState::Stopping);
                    Some(std::mem::take(&mut *inner))
                }
            }
        };

        let Some(inner) = taken else {
            // Queue against the stop already in flight.
            let mut rx = self.state_tx.subscribe();
            while *rx.borrow_and_update() != LifecycleState::Stopped {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            return Ok(());
        };

        self.shutdown(inner).await;

        if let Some(callback) = self.on_stop.lock().take() {
            callback();
        }
        self.state_tx.send_replace(LifecycleState::Stopped);
        info!(target: "server", "server stopped");
        Ok(())
    }

    async fn shutdown(&self, inner: Inner) {
        // 1. Stop accepting new connections.
        if let Some(shutdown_tx) = inner.shutdown_tx {
            let _ = shutdown_tx.send(());
        }

        // 2. Close every live update channel; `close` goes out first.
        self.broadcaster.close_all();
        self.polling.clear();

        // 3. Tear down the build pipeline watch. Closing the coordinator
        // releases any request still deferred on a build.
        let coordinator = self.coordinator();
        coordinator.close();
        if let Err(e) = self.pipeline.close().await {
            log::warn!(target: "server", "pipeline close failed: {}", e);
        }
        if let Some(task) = inner.coordinator_task {
            task.abort();
        }

        // 4. Wait the listener out; the port is free once this returns.
        if let Some(task) = inner.serve_task {
            let _ = task.await;
        }
        if let Some(handle) = inner.watcher_abort {
            handle.abort();
        }
        if let Some(handle) = inner.signal_abort {
            handle.abort();
        }
    }

    pub(crate) fn router(&self) -> Router {
        Router::new()
            .route("/", get(files::serve_index_handler))
            .route("/__vesper/ws", get(ws::ws_handler))
            .route("/__vesper/poll", post(polling::handshake))
            .route(
                "/__vesper/poll/{id}",
                get(polling::drain).delete(polling::close),
            )
            .route("/{*file}", get(files::serve_artifact_handler))
            .with_state(self.shared())
    }
}
