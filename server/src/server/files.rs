use std::sync::Arc;
use std::time::SystemTime;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Response, StatusCode, header};
use chrono::{DateTime, Utc};
use log::debug;
use vesper_shared::{VesperError, canonicalize_with_strip};

use crate::artifacts::{content_type, is_html_path, normalize_url_path};
use crate::build::BuildState;
use crate::pipeline::Diagnostic;
use crate::server::Server;
use crate::server::errors::{error_page, error_response};
use crate::sync::inject_client_script;

pub async fn serve_index_handler(State(server): State<Arc<Server>>) -> Response<Body> {
    serve_path(server, "/").await
}

pub async fn serve_artifact_handler(
    State(server): State<Arc<Server>>,
    Path(file): Path<String>,
) -> Response<Body> {
    serve_path(server, &file).await
}

/// Resolve one request against the build output. While a build is in flight
/// the response is deferred, then resolution re-checks the fresh tree; a
/// client that disconnects mid-wait just drops this future.
async fn serve_path(server: Arc<Server>, raw: &str) -> Response<Body> {
    eprintln!("DBG serve_path enter {raw}");
    let snapshot = server.coordinator().wait_until_idle().await;
    eprintln!("DBG serve_path got snapshot {:?}", snapshot.state);
    let path = normalize_url_path(raw);

    // Build trouble renders as page content in dev rather than a failure.
    match &snapshot.state {
        BuildState::Errored(message) => {
            if server.config().errors_as_page && is_html_path(&path) {
                return html_page(error_page(
                    "Build pipeline failed",
                    &[Diagnostic::new(message.clone())],
                ));
            }
            if !server.config().errors_as_page {
                return plain(StatusCode::INTERNAL_SERVER_ERROR, message.clone());
            }
        }
        BuildState::Done(stats) if stats.has_errors() => {
            if server.config().errors_as_page && is_html_path(&path) {
                return html_page(error_page("Build failed", &stats.errors));
            }
        }
        _ => {}
    }

    eprintln!("DBG serve_path before store snapshot");
    let tree = server.store().snapshot();
    eprintln!("DBG serve_path after store snapshot, keys={}", tree.len());
    if let Some(artifact) = tree.get(&path) {
        debug!(target: "server", "serving {} from build output", path);
        eprintln!("DBG serve_path building artifact_response");
        let r = artifact_response(&server, &path, &artifact.content, artifact.mtime);
        eprintln!("DBG serve_path artifact_response done");
        return r;
    }

    serve_static(&server, &path).await
}

/// Fall through to the static root on disk for paths the build output does
/// not cover.
async fn serve_static(server: &Arc<Server>, path: &str) -> Response<Body> {
    let Some(static_root) = server.config().static_root.clone() else {
        return plain(StatusCode::NOT_FOUND, format!("Cannot GET {}", path));
    };

    let relative = path.trim_start_matches('/').to_string();
    let candidate = static_root.join(&relative);

    // Canonicalize and re-check containment so `..` segments cannot escape
    // the static root.
    let resolved = match canonicalize_with_strip(&candidate) {
        Ok(resolved) => resolved,
        Err(_) => return plain(StatusCode::NOT_FOUND, format!("Cannot GET {}", path)),
    };
    let root = canonicalize_with_strip(&static_root).unwrap_or(static_root);
    if !resolved.starts_with(&root) || !resolved.is_file() {
        return plain(StatusCode::NOT_FOUND, format!("Cannot GET {}", path));
    }

    let content = match fs_err::read(&resolved) {
        Ok(content) => content,
        Err(e) => return VesperError::from(e).response().map(Body::from),
    };
    let mtime = fs_err::metadata(&resolved)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH);

    debug!(target: "server", "serving {} from static root", path);
    artifact_response(server, path, &content, mtime)
}

/// Common response shape for in-memory and static content: caching disabled
/// so no stale copy survives a rebuild, metadata reflecting the snapshot
/// that answered the request.
fn artifact_response(
    server: &Arc<Server>,
    path: &str,
    content: &[u8],
    mtime: SystemTime,
) -> Response<Body> {
    let config = server.config();

    let body: Vec<u8> = if is_html_path(path) && (config.hot || config.live_reload) {
        let html = String::from_utf8_lossy(content);
        inject_client_script(&html).into_bytes()
    } else {
        content.to_vec()
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(path))
        .header(header::CONTENT_LENGTH, body.len())
        .header(header::CACHE_CONTROL, "no-store")
        .header(header::LAST_MODIFIED, http_date(mtime))
        .body(Body::from(body))
        .unwrap()
}

fn html_page(html: String) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from(html))
        .unwrap()
}

fn plain(status: StatusCode, message: String) -> Response<Body> {
    error_response(message, status).map(Body::from)
}

fn http_date(mtime: SystemTime) -> String {
    DateTime::<Utc>::from(mtime)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
