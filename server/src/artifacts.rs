use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;

/// One compiled output file held in memory.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub content: Arc<[u8]>,
    pub mtime: SystemTime,
}

impl Artifact {
    pub fn new(content: Vec<u8>, mtime: SystemTime) -> Self {
        Self {
            content: content.into(),
            mtime,
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Mapping from absolute virtual path (leading `/`) to artifact.
pub type ArtifactTree = HashMap<String, Artifact>;

/// In-memory, write-through view of the latest build output tree.
///
/// The tree is replaced wholesale each time the pipeline emits a new output
/// snapshot. Readers clone the inner `Arc` and keep a consistent view for the
/// whole request, even while a newer tree lands underneath them.
pub struct ArtifactStore {
    tree: RwLock<Arc<ArtifactTree>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Swap in a freshly built tree. Single writer: the build coordinator.
    pub fn replace(&self, tree: ArtifactTree) {
        *self.tree.write() = Arc::new(tree);
    }

    /// A consistent snapshot of the current tree.
    pub fn snapshot(&self) -> Arc<ArtifactTree> {
        self.tree.read().clone()
    }
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a request path to the virtual-path form used as tree keys:
/// query/fragment stripped, leading slash, `/` mapped to `/index.html`.
pub fn normalize_url_path(raw: &str) -> String {
    let path = raw.split(['?', '#']).next().unwrap_or(raw);
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };

    if normalized.ends_with('/') {
        normalized.push_str("index.html");
    }

    normalized
}

/// MIME type inferred from the file extension.
pub fn content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" | "cjs" => "application/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "wasm" => "application/wasm",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

pub fn is_html_path(path: &str) -> bool {
    path.ends_with(".html") || path.ends_with(".htm") || path.ends_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(bytes: &[u8]) -> Artifact {
        Artifact::new(bytes.to_vec(), SystemTime::UNIX_EPOCH)
    }

    #[test]
    fn snapshot_is_isolated_from_replacement() {
        let store = ArtifactStore::new();
        let mut tree = ArtifactTree::new();
        tree.insert("/app.js".to_string(), artifact(b"old"));
        store.replace(tree);

        let before = store.snapshot();

        let mut tree = ArtifactTree::new();
        tree.insert("/app.js".to_string(), artifact(b"new"));
        store.replace(tree);

        assert_eq!(&*before["/app.js"].content, b"old");
        assert_eq!(&*store.snapshot()["/app.js"].content, b"new");
    }

    #[test]
    fn normalizes_request_paths() {
        assert_eq!(normalize_url_path("/"), "/index.html");
        assert_eq!(normalize_url_path("app.js"), "/app.js");
        assert_eq!(normalize_url_path("/app.js?v=1"), "/app.js");
        assert_eq!(normalize_url_path("/docs/"), "/docs/index.html");
    }

    #[test]
    fn infers_content_type() {
        assert_eq!(content_type("/a/b/app.js"), "application/javascript");
        assert_eq!(content_type("/style.css"), "text/css");
        assert_eq!(content_type("/index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("/app.js.map"), "application/json");
        assert_eq!(content_type("/blob"), "application/octet-stream");
    }
}
