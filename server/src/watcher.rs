use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, channel};
use std::time::Duration;
use vesper_shared::{VesperResult, canonicalize_with_strip};

/// A filesystem watcher that filters the raw notify stream down to events a
/// dev server cares about: known source/asset extensions, with editor
/// temp/backup noise and explicitly ignored directories dropped.
///
/// Drives the directory pipeline's rebuild cycle and the static/watch-path
/// change broadcasts.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<Result<Event, notify::Error>>,
    allowed_extensions: HashSet<String>,
    ignored_paths: Vec<PathBuf>,
}

impl FileWatcher {
    pub fn new() -> VesperResult<Self> {
        Self::with_poll_interval(Duration::from_millis(100))
    }

    pub fn with_poll_interval(poll_interval: Duration) -> VesperResult<Self> {
        let (tx, rx) = channel();

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default().with_poll_interval(poll_interval),
        )?;

        let allowed_extensions = [
            // Scripts and styles
            "js", "jsx", "ts", "tsx", "mjs", "cjs", "css", "scss", "sass", "less",
            // Markup and data
            "html", "htm", "json", "md", "txt", "xml", // Assets
            "png", "jpg", "jpeg", "gif", "svg", "webp", "avif", "ico", "woff", "woff2", "ttf",
            "otf", "wasm", "map",
        ]
        .iter()
        .map(|&s| s.to_string())
        .collect();

        Ok(Self {
            watcher,
            rx,
            allowed_extensions,
            ignored_paths: Vec::new(),
        })
    }

    pub fn watch<P: AsRef<Path>>(&mut self, path: P) -> VesperResult {
        self.watcher
            .watch(path.as_ref(), RecursiveMode::Recursive)?;
        Ok(())
    }

    /// Adds a path to the ignored list. The path is canonicalized first; a
    /// path that does not exist is silently skipped.
    pub fn add_ignored_path<P: AsRef<Path>>(&mut self, path: P) -> VesperResult {
        let path_ref = path.as_ref();

        if path_ref.exists() {
            let canonical = canonicalize_with_strip(path_ref)?;
            if !self.ignored_paths.contains(&canonical) {
                self.ignored_paths.push(canonical);
            }
        }
        Ok(())
    }

    /// Next raw event, blocking until one arrives or the channel closes.
    pub fn recv_event(&self) -> Result<Event, notify::Error> {
        self.rx
            .recv()
            .map_err(|_| notify::Error::generic("watch channel disconnected"))?
    }

    /// Next raw event without blocking.
    pub fn try_recv_event(&self) -> Option<Result<Event, notify::Error>> {
        self.rx.try_recv().ok()
    }

    /// Next raw event, waiting at most `timeout`.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<Result<Event, notify::Error>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Drain currently queued events, invoking `callback` for those that
    /// survive filtering.
    pub fn process_filtered_events<F>(&self, mut callback: F)
    where
        F: FnMut(Event),
    {
        while let Some(res) = self.try_recv_event() {
            match res {
                Ok(event) => {
                    if event.paths.iter().any(|path| self.should_process(path)) {
                        tracing::trace!("watch event: {:?}", event.paths);
                        callback(event);
                    }
                }
                Err(e) => log::warn!(target: "watcher", "watch error: {:?}", e),
            }
        }
    }

    /// Whether a changed path is interesting: allowed extension, not a
    /// temporary/backup file, not under an ignored directory.
    pub fn should_process(&self, path: &Path) -> bool {
        !self.is_ignored_path(path) && self.is_allowed_file(path)
    }

    fn is_allowed_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.allowed_extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    fn is_ignored_path(&self, path: &Path) -> bool {
        if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            if is_temporary_file(file_name) {
                return true;
            }
        }

        if let Ok(canonical) = canonicalize_with_strip(path) {
            self.ignored_paths
                .iter()
                .any(|ignored| canonical.starts_with(ignored))
        } else {
            false
        }
    }
}

fn is_temporary_file(file_name: &str) -> bool {
    // Editor backup/swap files
    if file_name.ends_with('~')
        || file_name.ends_with(".swp")
        || file_name.ends_with(".swo")
        || file_name.ends_with(".swx")
    {
        return true;
    }

    // Emacs auto-save files
    if file_name.starts_with('#') && file_name.ends_with('#') {
        return true;
    }

    if file_name.starts_with(".~") || file_name.ends_with(".tmp") || file_name.ends_with(".temp") {
        return true;
    }

    // JetBrains safe-write files
    if file_name.ends_with("___jb_tmp___") || file_name.ends_with("___jb_old___") {
        return true;
    }

    file_name.ends_with(".bak") || file_name.ends_with(".backup")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_temporary_files() {
        assert!(is_temporary_file("index.html~"));
        assert!(is_temporary_file(".index.html.swp"));
        assert!(is_temporary_file("#scratch.js#"));
        assert!(is_temporary_file("upload.tmp"));
        assert!(is_temporary_file("app.js___jb_tmp___"));
        assert!(!is_temporary_file("index.html"));
        assert!(!is_temporary_file("backup_notes.md"));
    }

    #[test]
    fn filters_by_extension() {
        let watcher = FileWatcher::new().unwrap();
        assert!(watcher.should_process(Path::new("/srv/app/main.ts")));
        assert!(watcher.should_process(Path::new("/srv/app/style.css")));
        assert!(!watcher.should_process(Path::new("/srv/app/core.lock")));
        assert!(!watcher.should_process(Path::new("/srv/app/no_extension")));
        assert!(!watcher.should_process(Path::new("/srv/app/main.ts.swp")));
    }

    #[test]
    fn ignores_registered_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ignored = dir.path().join("dist");
        std::fs::create_dir_all(&ignored).unwrap();
        let inside = ignored.join("bundle.js");
        std::fs::write(&inside, "x").unwrap();

        let mut watcher = FileWatcher::new().unwrap();
        watcher.add_ignored_path(&ignored).unwrap();

        assert!(!watcher.should_process(&inside));
    }
}
