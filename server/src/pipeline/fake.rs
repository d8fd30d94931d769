//! Scripted pipeline used by the coordinator/server tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use vesper_shared::VesperResult;

use super::{BuildPipeline, BuildStats, Diagnostic, OutputFile, PipelineEvent, PipelineEvents};

#[derive(Default)]
pub struct FakePipeline {
    events: Mutex<Option<PipelineEvents>>,
    close_calls: AtomicUsize,
}

impl FakePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalid(&self) {
        self.emit(PipelineEvent::Invalid);
    }

    pub fn progress(&self, percent: f64, message: &str) {
        self.emit(PipelineEvent::Progress {
            percent,
            message: message.to_string(),
        });
    }

    pub fn done(&self, stats: BuildStats) {
        self.emit(PipelineEvent::Done(stats));
    }

    pub fn fail(&self, message: &str) {
        self.emit(PipelineEvent::Failed(message.to_string()));
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn emit(&self, event: PipelineEvent) {
        let guard = self.events.lock();
        let tx = guard.as_ref().expect("watch() not called");
        tx.send(event).expect("coordinator dropped its receiver");
    }
}

#[async_trait]
impl BuildPipeline for FakePipeline {
    fn watch(&self, events: PipelineEvents) -> VesperResult<()> {
        // Re-watch replaces the subscription, mirroring a restarted server.
        *self.events.lock() = Some(events);
        Ok(())
    }

    async fn close(&self) -> VesperResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn clean_stats(hash: &str) -> BuildStats {
    BuildStats {
        hash: hash.to_string(),
        warnings: Vec::new(),
        errors: Vec::new(),
        assets: vec![
            OutputFile {
                path: "/index.html".to_string(),
                content: b"<html><head></head><body>ok</body></html>".to_vec(),
                mtime: SystemTime::UNIX_EPOCH,
            },
            OutputFile {
                path: "/app.js".to_string(),
                content: format!("console.log(\"{hash}\")").into_bytes(),
                mtime: SystemTime::UNIX_EPOCH,
            },
        ],
    }
}

pub fn stats_with_warnings(hash: &str, warnings: &[&str]) -> BuildStats {
    let mut stats = clean_stats(hash);
    stats.warnings = warnings.iter().map(|w| Diagnostic::new(*w)).collect();
    stats
}

pub fn stats_with_errors(hash: &str, errors: &[&str]) -> BuildStats {
    let mut stats = clean_stats(hash);
    stats.errors = errors
        .iter()
        .map(|e| Diagnostic::in_file(*e, "src/main.js"))
        .collect();
    stats
}
