//! File watching for live reload.
//!
//! Raw notify events are coalesced: once a change arrives, further changes
//! are collected until the tree has been quiet for the debounce window, then
//! the distinct paths go out as one batch.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches a set of directories and reports changed paths in batches.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
}

impl FileWatcher {
    /// Watch `paths` recursively. Changes under any of `ignore` are dropped.
    pub fn new(
        paths: &[PathBuf],
        ignore: Vec<PathBuf>,
    ) -> Result<(Self, async_mpsc::Receiver<Vec<PathBuf>>), std::io::Error> {
        let (sync_tx, sync_rx) = mpsc::channel();
        let (async_tx, async_rx) = async_mpsc::channel(16);

        let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, _>| {
            if let Ok(event) = res {
                let _ = sync_tx.send(event);
            }
        })
        .map_err(std::io::Error::other)?;

        for path in paths {
            if path.exists() {
                watcher
                    .watch(path, RecursiveMode::Recursive)
                    .map_err(std::io::Error::other)?;
            }
        }

        std::thread::spawn(move || {
            while let Ok(event) = sync_rx.recv() {
                let mut batch = BTreeSet::new();
                collect(&event, &ignore, &mut batch);

                while let Ok(event) = sync_rx.recv_timeout(DEBOUNCE) {
                    collect(&event, &ignore, &mut batch);
                }

                if batch.is_empty() {
                    continue;
                }
                tracing::debug!("{} changed path(s)", batch.len());
                if async_tx.blocking_send(batch.into_iter().collect()).is_err() {
                    break;
                }
            }
        });

        Ok((Self { _watcher: watcher }, async_rx))
    }
}

fn collect(event: &notify::Event, ignore: &[PathBuf], batch: &mut BTreeSet<PathBuf>) {
    if !is_content_change(&event.kind) {
        return;
    }
    batch.extend(
        event
            .paths
            .iter()
            .filter(|p| !is_ignored(p, ignore))
            .cloned(),
    );
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

fn is_ignored(path: &Path, ignore: &[PathBuf]) -> bool {
    ignore.iter().any(|dir| path.starts_with(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn batches_file_changes() {
        let temp = tempdir().unwrap();
        let root = temp.path().canonicalize().unwrap();

        let (watcher, mut rx) = FileWatcher::new(&[root.clone()], Vec::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        fs::write(root.join("a.js"), "1").unwrap();
        fs::write(root.join("b.js"), "2").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("timeout waiting for file watch event")
            .expect("channel should not be closed");
        drop(watcher);

        assert!(batch.iter().any(|p| p.ends_with("a.js")), "{batch:?}");
    }

    #[test]
    fn ignores_paths_under_excluded_dirs() {
        let ignore = vec![PathBuf::from("/site/dist")];
        assert!(is_ignored(Path::new("/site/dist/js/a.js"), &ignore));
        assert!(!is_ignored(Path::new("/site/src/js/a.js"), &ignore));
    }
}
