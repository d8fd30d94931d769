use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::build::{BuildSnapshot, BuildState};
use crate::pipeline::fake::{clean_stats, stats_with_errors, stats_with_warnings};

use super::broadcast::{Broadcaster, SyncOptions, TransportKind};
use super::protocol::{ProgressPayload, SyncMessage, encode};

fn options() -> SyncOptions {
    SyncOptions {
        hot: true,
        live_reload: true,
        overlay: true,
        progress: false,
        logging: "info".to_string(),
    }
}

fn building_snapshot() -> BuildSnapshot {
    BuildSnapshot {
        generation: 1,
        state: BuildState::Building,
    }
}

fn done_snapshot(hash: &str) -> BuildSnapshot {
    BuildSnapshot {
        generation: 1,
        state: BuildState::Done(Arc::new(clean_stats(hash))),
    }
}

fn attach(
    broadcaster: &Broadcaster,
    snapshot: &BuildSnapshot,
) -> (u64, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let client = broadcaster.register(TransportKind::WebSocket, tx, || snapshot.clone());
    (client.id(), rx)
}

fn drain_types(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
    let mut types = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        types.push(value["type"].as_str().unwrap().to_string());
    }
    types
}

#[test]
fn messages_encode_to_tagged_json() {
    assert_eq!(
        encode(&SyncMessage::Hash {
            data: "abc123".into()
        }),
        r#"{"type":"hash","data":"abc123"}"#
    );
    assert_eq!(encode(&SyncMessage::StillOk), r#"{"type":"still-ok"}"#);
    assert_eq!(encode(&SyncMessage::LiveReload), r#"{"type":"liveReload"}"#);
    assert_eq!(
        encode(&SyncMessage::StaticChanged { data: None }),
        r#"{"type":"static-changed"}"#
    );
    assert_eq!(
        encode(&SyncMessage::ProgressUpdate {
            data: ProgressPayload {
                percent: 42.0,
                msg: "emitting".into()
            }
        }),
        r#"{"type":"progress-update","data":{"percent":42.0,"msg":"emitting"}}"#
    );
}

#[test]
fn unserializable_payload_degrades_to_error_message() {
    struct Poison;
    impl Serialize for Poison {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("circular structure"))
        }
    }

    let encoded = encode(&Poison);
    let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();
    assert_eq!(value["type"], "error");
}

#[test]
fn handshake_while_building_announces_invalid() {
    let broadcaster = Broadcaster::new(options());
    let (_, mut rx) = attach(&broadcaster, &building_snapshot());

    let types = drain_types(&mut rx);
    assert_eq!(
        types,
        vec!["hot", "liveReload", "overlay", "progress", "log", "invalid"]
    );
    assert!(!types.contains(&"ok".to_string()));
}

#[test]
fn handshake_after_done_announces_hash_then_ok() {
    let broadcaster = Broadcaster::new(options());
    let (_, mut rx) = attach(&broadcaster, &done_snapshot("h1"));

    let types = drain_types(&mut rx);
    let hash_pos = types.iter().position(|t| t == "hash").unwrap();
    let ok_pos = types.iter().position(|t| t == "ok").unwrap();
    assert!(hash_pos < ok_pos);
}

#[test]
fn warning_build_orders_hash_warnings_ok() {
    let broadcaster = Broadcaster::new(options());
    let (_, mut rx) = attach(&broadcaster, &building_snapshot());
    drain_types(&mut rx);

    broadcaster.on_done(&stats_with_warnings("h2", &["unused import"]));
    assert_eq!(drain_types(&mut rx), vec!["hash", "warnings", "ok"]);
}

#[test]
fn error_build_terminates_with_errors_not_ok() {
    let broadcaster = Broadcaster::new(options());
    let (_, mut rx) = attach(&broadcaster, &building_snapshot());
    drain_types(&mut rx);

    broadcaster.on_done(&stats_with_errors("h3", &["syntax error"]));
    assert_eq!(drain_types(&mut rx), vec!["hash", "errors"]);
}

#[test]
fn invalid_always_precedes_the_outcome() {
    let broadcaster = Broadcaster::new(options());
    let (_, mut rx) = attach(&broadcaster, &building_snapshot());
    drain_types(&mut rx);

    broadcaster.on_invalid();
    broadcaster.on_done(&clean_stats("h4"));

    assert_eq!(drain_types(&mut rx), vec!["invalid", "hash", "ok"]);
}

#[test]
fn clean_rebuild_with_same_hash_collapses_to_still_ok() {
    let broadcaster = Broadcaster::new(options());
    let (_, mut rx) = attach(&broadcaster, &building_snapshot());
    drain_types(&mut rx);

    broadcaster.on_done(&clean_stats("h5"));
    drain_types(&mut rx);

    broadcaster.on_invalid();
    broadcaster.on_done(&clean_stats("h5"));
    assert_eq!(drain_types(&mut rx), vec!["invalid", "still-ok"]);
}

#[test]
fn dead_client_does_not_block_the_others() {
    let broadcaster = Broadcaster::new(options());
    let (_, mut rx_a) = attach(&broadcaster, &building_snapshot());
    let (_, rx_b) = attach(&broadcaster, &building_snapshot());
    let (_, mut rx_c) = attach(&broadcaster, &building_snapshot());
    drain_types(&mut rx_a);
    drain_types(&mut rx_c);

    // Client B's transport is gone before the broadcast.
    drop(rx_b);

    broadcaster.on_done(&clean_stats("h6"));

    assert_eq!(drain_types(&mut rx_a), vec!["hash", "ok"]);
    assert_eq!(drain_types(&mut rx_c), vec!["hash", "ok"]);
    // The dead connection was pruned along the way.
    assert_eq!(broadcaster.client_count(), 2);
}

#[test]
fn deregistration_is_idempotent() {
    let broadcaster = Broadcaster::new(options());
    let (id, _rx) = attach(&broadcaster, &building_snapshot());

    assert!(broadcaster.deregister(id));
    assert!(!broadcaster.deregister(id));
    assert_eq!(broadcaster.client_count(), 0);
}

#[test]
fn close_all_says_goodbye_and_drains_the_registry() {
    let broadcaster = Broadcaster::new(options());
    let (_, mut rx_a) = attach(&broadcaster, &done_snapshot("h7"));
    let (_, mut rx_b) = attach(&broadcaster, &done_snapshot("h7"));
    drain_types(&mut rx_a);
    drain_types(&mut rx_b);

    broadcaster.close_all();

    assert_eq!(drain_types(&mut rx_a), vec!["close"]);
    assert_eq!(drain_types(&mut rx_b), vec!["close"]);
    assert_eq!(broadcaster.client_count(), 0);
    // Senders are dropped, so the transports' drain loops terminate.
    assert!(rx_a.try_recv().is_err());
}

#[test]
fn rapid_cycles_lose_no_messages() {
    let broadcaster = Broadcaster::new(options());
    let (_, mut rx) = attach(&broadcaster, &building_snapshot());
    drain_types(&mut rx);

    for i in 0..10 {
        broadcaster.on_invalid();
        broadcaster.on_done(&clean_stats(&format!("h{i}")));
    }

    let types = drain_types(&mut rx);
    assert_eq!(types.iter().filter(|t| *t == "invalid").count(), 10);
    assert_eq!(types.iter().filter(|t| *t == "hash").count(), 10);
    assert_eq!(types.iter().filter(|t| *t == "ok").count(), 10);
}

#[test]
fn injects_script_into_head() {
    let html = "<html><head><title>t</title></head><body></body></html>";
    let injected = super::inject_client_script(html);
    let script_pos = injected.find("<script>").unwrap();
    let head_close = injected.find("</head>").unwrap();
    assert!(script_pos < head_close);
    assert!(injected.contains("__vesper/ws"));
}
