use serde::Serialize;

use crate::pipeline::Diagnostic;

/// Wire messages pushed over the live update channel. Every message encodes
/// to `{"type": ..., "data"?: ..., "params"?: ...}` regardless of transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SyncMessage {
    #[serde(rename = "liveReload")]
    LiveReload,

    #[serde(rename = "hot")]
    Hot,

    /// A new compilation started; the client's current bundle is stale.
    #[serde(rename = "invalid")]
    Invalid,

    /// The hash of the build whose outcome messages follow.
    #[serde(rename = "hash")]
    Hash { data: String },

    /// Rebuild finished clean and the client is already on this hash.
    #[serde(rename = "still-ok")]
    StillOk,

    #[serde(rename = "ok")]
    Ok,

    /// A watched file changed outside the pipeline.
    #[serde(rename = "content-changed")]
    ContentChanged {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },

    /// A static-root file changed.
    #[serde(rename = "static-changed")]
    StaticChanged {
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },

    #[serde(rename = "warnings")]
    Warnings {
        data: Vec<Diagnostic>,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<serde_json::Value>,
    },

    /// Terminal outcome of a failed build; carries the diagnostics.
    #[serde(rename = "errors")]
    Errors { data: Vec<Diagnostic> },

    /// A server-side failure outside the compile cycle.
    #[serde(rename = "error")]
    Error { data: String },

    #[serde(rename = "close")]
    Close,

    /// Client display hint: show the in-page error overlay.
    #[serde(rename = "overlay")]
    Overlay { data: bool },

    /// Client display hint: report build progress.
    #[serde(rename = "progress")]
    Progress { data: bool },

    #[serde(rename = "progress-update")]
    ProgressUpdate { data: ProgressPayload },

    /// Client console verbosity hint, forwarded verbatim from config.
    #[serde(rename = "log")]
    Log { data: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressPayload {
    pub percent: f64,
    pub msg: String,
}

/// Encode a message for the wire. A payload that refuses to serialize must
/// not block the broadcast, so the failure collapses into a generic `error`
/// message instead.
pub fn encode<T: Serialize>(message: &T) -> String {
    match serde_json::to_string(message) {
        Ok(encoded) => encoded,
        Err(e) => {
            log::warn!(target: "sync", "dropping unserializable message: {}", e);
            serde_json::json!({
                "type": "error",
                "data": format!("failed to serialize server message: {e}"),
            })
            .to_string()
        }
    }
}
