use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info};
use sha2::{Digest, Sha256};
use vesper_shared::{VesperError, VesperResult, canonicalize_with_strip};

use crate::watcher::FileWatcher;
use super::{BuildPipeline, BuildStats, OutputFile, PipelineEvent, PipelineEvents};

/// How long to sit on a change before rescanning, so editor save bursts
/// collapse into one build.
const DEBOUNCE: Duration = Duration::from_millis(80);

/// Poll granularity for the watch loop; bounds how long `close` lingers.
const WATCH_TICK: Duration = Duration::from_millis(250);

/// A demo pipeline that treats a directory tree as the build output: every
/// file becomes an artifact, the build hash is a digest over the whole tree,
/// and any filtered change triggers an invalidate/rescan cycle.
///
/// Useful for serving a prebuilt site with live reload, and as the reference
/// implementation of the pipeline contract.
pub struct DirectoryPipeline {
    root: PathBuf,
    closed: Arc<AtomicBool>,
}

impl DirectoryPipeline {
    pub fn new<P: AsRef<Path>>(root: P) -> VesperResult<Self> {
        let root = canonicalize_with_strip(root.as_ref())
            .map_err(|_| VesperError::FileNotFound(root.as_ref().display().to_string()))?;

        Ok(Self {
            root,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the tree and produce a full build: one artifact per file, hash
    /// over every (path, content) pair.
    fn scan(root: &Path) -> VesperResult<BuildStats> {
        let mut assets = Vec::new();
        Self::scan_dir(root, root, &mut assets)?;
        assets.sort_by(|a, b| a.path.cmp(&b.path));

        let mut hasher = Sha256::new();
        for asset in &assets {
            hasher.update(asset.path.as_bytes());
            hasher.update(&asset.content);
        }
        let mut hash = format!("{:x}", hasher.finalize());
        hash.truncate(20);

        Ok(BuildStats {
            hash,
            warnings: Vec::new(),
            errors: Vec::new(),
            assets,
        })
    }

    fn scan_dir(root: &Path, dir: &Path, assets: &mut Vec<OutputFile>) -> VesperResult {
        for entry in fs_err::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                Self::scan_dir(root, &path, assets)?;
            } else if file_type.is_file() {
                let content = fs_err::read(&path)?;
                let mtime = entry
                    .metadata()?
                    .modified()
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                assets.push(OutputFile {
                    path: virtual_path(root, &path),
                    content,
                    mtime,
                });
            }
        }
        Ok(())
    }

    fn watch_loop(root: PathBuf, closed: Arc<AtomicBool>, events: PipelineEvents) {
        let mut watcher = match FileWatcher::new().and_then(|mut w| {
            w.watch(&root)?;
            Ok(w)
        }) {
            Ok(w) => w,
            Err(e) => {
                let _ = events.send(PipelineEvent::Failed(e.to_string()));
                return;
            }
        };

        loop {
            if closed.load(Ordering::SeqCst) {
                debug!(target: "pipeline", "watch loop closed");
                break;
            }

            let Some(result) = watcher.recv_event_timeout(WATCH_TICK) else {
                continue;
            };

            let relevant = match result {
                Ok(event) => event.paths.iter().any(|p| watcher.should_process(p)),
                Err(e) => {
                    log::warn!(target: "pipeline", "watch error: {:?}", e);
                    false
                }
            };
            if !relevant {
                continue;
            }

            if events.send(PipelineEvent::Invalid).is_err() {
                break;
            }

            // Collapse the rest of the save burst before rescanning.
            std::thread::sleep(DEBOUNCE);
            watcher.process_filtered_events(|_| {});

            let done = Self::scan(&root)
                .context("directory rescan failed")
                .map_err(VesperError::from);
            let event = match done {
                Ok(stats) => {
                    info!(target: "pipeline", "rebuilt {} files ({})", stats.assets.len(), stats.hash);
                    PipelineEvent::Done(stats)
                }
                Err(e) => PipelineEvent::Failed(e.to_string()),
            };
            if events.send(event).is_err() {
                break;
            }
        }

        // Keep the watcher alive for the whole loop.
        drop(watcher);
    }
}

#[async_trait]
impl BuildPipeline for DirectoryPipeline {
    fn watch(&self, events: PipelineEvents) -> VesperResult<()> {
        // Re-arm after a previous close so a restarted server watches again.
        self.closed.store(false, Ordering::SeqCst);

        events
            .send(PipelineEvent::Invalid)
            .map_err(|_| VesperError::Pipeline("event channel closed before watch".into()))?;

        let initial = Self::scan(&self.root).context("initial directory scan failed")?;
        info!(target: "pipeline", "scanned {} files ({})", initial.assets.len(), initial.hash);
        events
            .send(PipelineEvent::Done(initial))
            .map_err(|_| VesperError::Pipeline("event channel closed before watch".into()))?;

        let root = self.root.clone();
        let closed = Arc::clone(&self.closed);
        std::thread::Builder::new()
            .name("vesper-dir-watch".into())
            .spawn(move || Self::watch_loop(root, closed, events))?;

        Ok(())
    }

    async fn close(&self) -> VesperResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn virtual_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut virt = String::from("/");
    virt.push_str(&rel.to_string_lossy().replace('\\', "/"));
    virt
}
