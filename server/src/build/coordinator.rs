use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info};
use tokio::sync::{mpsc, watch};
use vesper_shared::VesperResult;

use crate::artifacts::{Artifact, ArtifactStore, ArtifactTree};
use crate::pipeline::{BuildPipeline, BuildStats, PipelineEvent};
use crate::sync::Broadcaster;

/// Where the pipeline currently is.
#[derive(Debug, Clone, Default)]
pub enum BuildState {
    /// Watch mode is starting; the first build has not reported yet.
    #[default]
    Idle,
    Building,
    /// Last build finished; assets have been moved into the artifact store,
    /// the stats keep hash and diagnostics.
    Done(Arc<BuildStats>),
    /// The pipeline died. Non-retryable; the server keeps serving the error.
    Errored(String),
}

impl BuildState {
    /// True while a request for build output has to be deferred.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, BuildState::Idle | BuildState::Building)
    }
}

/// The coordinator's published state: one monotonic generation per
/// invalidate/done cycle plus the current [`BuildState`].
#[derive(Debug, Clone, Default)]
pub struct BuildSnapshot {
    pub generation: u64,
    pub state: BuildState,
}

/// Owns the pipeline lifecycle: subscribes its hooks, tracks whether a build
/// is in flight, applies finished output to the artifact store, and feeds
/// the broadcast coordinator.
pub struct BuildCoordinator {
    state_tx: watch::Sender<BuildSnapshot>,
    closed: AtomicBool,
}

impl BuildCoordinator {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(BuildSnapshot::default());
        Self {
            state_tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn current(&self) -> BuildSnapshot {
        self.state_tx.borrow().clone()
    }

    /// Subscribe the pipeline's hooks and start applying its events. By the
    /// time this returns, the pipeline is being observed; the event loop
    /// itself runs on its own task.
    pub fn start(
        self: Arc<Self>,
        pipeline: Arc<dyn BuildPipeline>,
        store: Arc<ArtifactStore>,
        broadcaster: Arc<Broadcaster>,
    ) -> VesperResult<tokio::task::JoinHandle<()>> {
        let (tx, rx) = mpsc::unbounded_channel();
        pipeline.watch(tx)?;

        Ok(tokio::spawn(self.event_loop(rx, store, broadcaster)))
    }

    async fn event_loop(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<PipelineEvent>,
        store: Arc<ArtifactStore>,
        broadcaster: Arc<Broadcaster>,
    ) {
        // Generations invalidated but not yet completed, oldest first.
        let mut in_flight: VecDeque<u64> = VecDeque::new();

        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::Invalid => {
                    let generation = self.state_tx.borrow().generation + 1;
                    in_flight.push_back(generation);
                    debug!(target: "build", "build {} invalidated", generation);
                    self.state_tx.send_replace(BuildSnapshot {
                        generation,
                        state: BuildState::Building,
                    });
                    broadcaster.on_invalid();
                }

                PipelineEvent::Progress { percent, message } => {
                    broadcaster.on_progress(percent, &message);
                }

                PipelineEvent::Done(mut stats) => {
                    let generation = in_flight
                        .pop_front()
                        .unwrap_or_else(|| self.state_tx.borrow().generation);

                    if !in_flight.is_empty() {
                        // A newer invalidation already superseded this
                        // result; it must not overwrite the in-flight state.
                        debug!(
                            target: "build",
                            "discarding stale build {} ({})", generation, stats.hash
                        );
                        continue;
                    }

                    let assets = std::mem::take(&mut stats.assets);
                    let mut tree = ArtifactTree::with_capacity(assets.len());
                    for asset in assets {
                        tree.insert(asset.path, Artifact::new(asset.content, asset.mtime));
                    }
                    store.replace(tree);

                    info!(
                        target: "build",
                        "build {} done ({}, {} errors, {} warnings)",
                        generation,
                        stats.hash,
                        stats.errors.len(),
                        stats.warnings.len()
                    );

                    let stats = Arc::new(stats);
                    self.state_tx.send_replace(BuildSnapshot {
                        generation,
                        state: BuildState::Done(Arc::clone(&stats)),
                    });
                    broadcaster.on_done(&stats);
                }

                PipelineEvent::Failed(message) => {
                    error!(target: "build", "pipeline failed: {}", message);
                    in_flight.clear();
                    let generation = self.state_tx.borrow().generation;
                    self.state_tx.send_replace(BuildSnapshot {
                        generation,
                        state: BuildState::Errored(message.clone()),
                    });
                    broadcaster.on_error(&message);
                }
            }
        }

        debug!(target: "build", "pipeline event channel closed");
    }

    /// Suspend until no build is in flight, then return the snapshot that
    /// satisfied the wait. All concurrent waiters resume from the same
    /// transition; dropping the returned future abandons the wait without
    /// side effects.
    pub async fn wait_until_idle(&self) -> BuildSnapshot {
        let mut rx = self.state_tx.subscribe();
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if !snapshot.state.is_in_flight() || self.closed.load(Ordering::SeqCst) {
                return snapshot;
            }
            if rx.changed().await.is_err() {
                return self.state_tx.borrow().clone();
            }
        }
    }

    /// Stop deferring requests; pending and future waiters resume with the
    /// current snapshot. Called during server shutdown.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Wake waiters so they observe the closed flag.
        self.state_tx.send_modify(|_| {});
    }
}

impl Default for BuildCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
