use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::task::AbortHandle;
use vesper_shared::{VesperError, VesperResult};

use crate::server::Server;
use crate::server::config::PortMode;
use crate::watcher::FileWatcher;

/// Lifecycle of one server instance. Transitions are one-directional within
/// a start/stop cycle; an explicit `start` re-arms a `Stopped` instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Starting,
    Listening,
    Stopping,
    Stopped,
}

/// Base port for `"auto"` port search.
pub const DEFAULT_BASE_PORT: u16 = 8080;

/// Maximum attempts in auto port mode.
const MAX_PORT_RETRIES: u16 = 10;

/// Poll granularity for the static/watch-path change watcher.
const CHANGE_POLL: Duration = Duration::from_millis(300);

/// Acquire the listener. A fixed port is a single attempt that fails fast;
/// `auto` searches upward from the base port.
pub async fn bind(host: &str, mode: PortMode) -> VesperResult<TcpListener> {
    match mode {
        PortMode::Fixed(port) => TcpListener::bind((host, port)).await.map_err(|e| {
            VesperError::Lifecycle(format!("failed to bind {}:{}: {}", host, port, e))
        }),
        PortMode::Auto => bind_with_retry(host, DEFAULT_BASE_PORT).await,
    }
}

async fn bind_with_retry(host: &str, base_port: u16) -> VesperResult<TcpListener> {
    for offset in 0..MAX_PORT_RETRIES {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind((host, port)).await {
            Ok(listener) => {
                if offset > 0 {
                    info!(target: "server", "port {} in use, using {} instead", base_port, port);
                }
                return Ok(listener);
            }
            Err(_) if offset + 1 < MAX_PORT_RETRIES => continue,
            Err(e) => {
                return Err(VesperError::Lifecycle(format!(
                    "failed to bind after {} attempts (ports {}-{}): {}",
                    MAX_PORT_RETRIES, base_port, port, e
                )));
            }
        }
    }
    unreachable!()
}

/// Watch the configured extra paths and the static root, broadcasting
/// `content-changed` / `static-changed` to clients. Returns `None` when
/// nothing is configured to watch.
pub fn spawn_change_watcher(server: &Arc<Server>) -> VesperResult<Option<AbortHandle>> {
    let config = server.config();
    if config.watch_paths.is_empty() && config.static_root.is_none() {
        return Ok(None);
    }

    let mut watcher = FileWatcher::new()?;
    for path in &config.watch_paths {
        watcher.watch(path)?;
    }
    let static_root = match &config.static_root {
        Some(root) => {
            watcher.watch(root)?;
            vesper_shared::canonicalize_with_strip(root).ok()
        }
        None => None,
    };

    let server = Arc::clone(server);
    let task = tokio::spawn(async move {
        let mut tick = tokio::time::interval(CHANGE_POLL);
        loop {
            tick.tick().await;
            watcher.process_filtered_events(|event| {
                for path in &event.paths {
                    let display = path.display().to_string();
                    let in_static = static_root
                        .as_ref()
                        .is_some_and(|root| path.starts_with(root));
                    if in_static {
                        server.broadcaster().on_static_changed(&display);
                    } else {
                        server.broadcaster().on_content_changed(&display);
                    }
                }
            });
        }
    });

    Ok(Some(task.abort_handle()))
}

/// Install the signal-driven shutdown path: the first SIGINT/SIGTERM stops
/// the server gracefully and exits; a second signal during shutdown forces
/// the exit instead of hanging. The returned handle removes the listener.
pub fn spawn_signal_listener(server: Arc<Server>) -> AbortHandle {
    let task = tokio::spawn(async move {
        wait_for_signal().await;
        info!(target: "server", "shutdown signal received, stopping gracefully");

        // Run the stop on its own task so this listener being removed
        // during teardown cannot cancel the teardown itself.
        let stopping = Arc::clone(&server);
        let stop = tokio::spawn(async move {
            if let Err(e) = stopping.stop().await {
                error!(target: "server", "graceful stop failed: {}", e);
            }
        });

        tokio::select! {
            _ = stop => std::process::exit(0),
            _ = wait_for_signal() => {
                warn!(target: "server", "second signal received, exiting immediately");
                std::process::exit(1);
            }
        }
    });

    task.abort_handle()
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (Ok(mut sigint), Ok(mut sigterm)) = (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) else {
            let _ = tokio::signal::ctrl_c().await;
            return;
        };

        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
