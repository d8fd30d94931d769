pub mod dir;
#[cfg(test)]
pub mod fake;

use std::time::SystemTime;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use vesper_shared::VesperResult;

pub use dir::DirectoryPipeline;

/// A diagnostic the pipeline reports for one build. Serialized verbatim into
/// `warnings`/`errors` protocol messages.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: None,
        }
    }

    pub fn in_file(message: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            file: Some(file.into()),
        }
    }
}

/// One output file emitted by a build, addressed by its virtual path
/// (leading `/`).
#[derive(Debug, Clone)]
pub struct OutputFile {
    pub path: String,
    pub content: Vec<u8>,
    pub mtime: SystemTime,
}

/// Everything a finished build exposes to the server.
#[derive(Debug, Clone)]
pub struct BuildStats {
    pub hash: String,
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
    pub assets: Vec<OutputFile>,
}

impl BuildStats {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Lifecycle events a pipeline delivers while in watch mode.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A new compilation started; previous output is about to go stale.
    Invalid,
    /// Compilation progress, forwarded to clients as `progress-update`.
    Progress { percent: f64, message: String },
    /// A build finished. Stats carry the hash, diagnostics and output tree.
    Done(BuildStats),
    /// The pipeline died and will not produce further builds.
    Failed(String),
}

pub type PipelineEvents = mpsc::UnboundedSender<PipelineEvent>;

/// The build pipeline as the server sees it: a black box that enters watch
/// mode, delivers typed lifecycle events over a channel, and can be torn
/// down. The coordinator depends only on this interface, so tests substitute
/// a scripted fake.
#[async_trait]
pub trait BuildPipeline: Send + Sync {
    /// Begin watch mode. Events must arrive in lifecycle order: every `Done`
    /// is preceded by its `Invalid`.
    fn watch(&self, events: PipelineEvents) -> VesperResult<()>;

    /// Stop watch mode and release resources. Idempotent.
    async fn close(&self) -> VesperResult<()>;
}
