//! Watch mode: index everything once, then follow the filesystem.

use crate::error::{IndexError, LiveError};
use crate::indexer::Indexer;
use crate::watcher::{ChangeWatcher, WatcherConfig};
use std::sync::Arc;
use std::time::Instant;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct LiveIndexer {
    indexer: Arc<Indexer>,
    config: WatcherConfig,
}

impl LiveIndexer {
    pub fn new(indexer: Arc<Indexer>, config: WatcherConfig) -> Self {
        Self { indexer, config }
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    /// Runs until `cancel` fires or the event stream ends.
    ///
    /// Cancellation, even during the initial index, is a clean exit. A
    /// watcher that cannot be set up is an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), LiveError> {
        let start = Instant::now();
        for root in &self.config.paths {
            let indexer = Arc::clone(&self.indexer);
            let dir = root.clone();
            let token = cancel.clone();
            match task::spawn_blocking(move || indexer.index_directory(&dir, &token)).await? {
                Ok(()) => {}
                Err(IndexError::Cancelled) => return Ok(()),
                Err(source) => {
                    return Err(LiveError::InitialIndex {
                        path: root.clone(),
                        source,
                    })
                }
            }
        }

        let stats = self.indexer.stats();
        info!(
            "Initial indexing complete: {} files, {} nodes, {} edges in {:?}",
            stats.files_indexed,
            stats.nodes_total,
            stats.edges_total,
            start.elapsed()
        );
        let indexer = Arc::clone(&self.indexer);
        task::spawn_blocking(move || {
            indexer.run_post_index_all();
            indexer.reset_changes();
        })
        .await?;

        let config = self.config.clone();
        let watcher = task::spawn_blocking(move || ChangeWatcher::new(config)).await??;
        let mut events = watcher.start(cancel.clone()).await?;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        debug!("{} {}", event.op, event.path.display());
                        let indexer = Arc::clone(&self.indexer);
                        task::spawn_blocking(move || indexer.handle_event(&event)).await?;
                    }
                    None => break,
                },
            }
        }

        watcher.close();
        if let Err(e) = self.indexer.store().flush() {
            warn!("Failed to flush graph store: {}", e);
        }
        info!("Stopped watching");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{IndexerConfig, PostIndexHook};
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;
    use thicket_core::{Node, NodeFilter, ParserRegistry};
    use thicket_graph::{GraphStore, MemoryStore};
    use tokio::time::sleep;

    fn live(root: &Path, store: Arc<MemoryStore>) -> LiveIndexer {
        let config = IndexerConfig {
            repo_roots: vec![root.to_path_buf()],
            ..IndexerConfig::default()
        };
        let indexer = Indexer::new(store, Arc::new(ParserRegistry::with_defaults()), config);
        LiveIndexer::new(
            Arc::new(indexer),
            WatcherConfig::new(vec![root.to_path_buf()], Vec::new()),
        )
    }

    async fn wait_for(store: &MemoryStore, file: &str, present: bool) -> bool {
        for _ in 0..100 {
            let found = !store.query_nodes(&NodeFilter::by_file(file)).unwrap().is_empty();
            if found == present {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_follows_changes_until_cancelled() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("a.rs"), "fn a() {}").unwrap();

        let store = Arc::new(MemoryStore::new());
        let live = Arc::new(live(&root, store.clone()));
        let cancel = CancellationToken::new();
        let handle = {
            let live = Arc::clone(&live);
            let cancel = cancel.clone();
            tokio::spawn(async move { live.run(cancel).await })
        };

        assert!(wait_for(&store, "a.rs", true).await);
        sleep(Duration::from_millis(200)).await;

        fs::write(root.join("b.rs"), "fn b() {}").unwrap();
        assert!(wait_for(&store, "b.rs", true).await);

        fs::remove_file(root.join("a.rs")).unwrap();
        assert!(wait_for(&store, "a.rs", false).await);

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(live.indexer().changed_files().contains(&"b.rs".to_string()));
    }

    #[tokio::test]
    async fn test_missing_root_is_fatal() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let live = live(&missing, Arc::new(MemoryStore::new()));

        let err = live.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LiveError::InitialIndex { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_is_clean() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        let live = live(dir.path(), Arc::new(MemoryStore::new()));

        let cancel = CancellationToken::new();
        cancel.cancel();
        live.run(cancel).await.unwrap();
    }

    /// Blocks until the test opens it, recording whether it was opened.
    struct Gate {
        open: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
        passed: std::sync::Mutex<Option<bool>>,
    }

    impl PostIndexHook for Gate {
        fn run(&self, _store: &dyn GraphStore, _groups: &BTreeMap<String, Vec<Node>>) {
            let opened = self
                .open
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(3))
                .is_ok();
            *self.passed.lock().unwrap() = Some(opened);
        }
    }

    #[tokio::test]
    async fn test_indexing_leaves_the_runtime_free() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::write(root.join("a.rs"), "fn a() {}").unwrap();

        let (open, gate_rx) = std::sync::mpsc::channel();
        let gate = Arc::new(Gate {
            open: std::sync::Mutex::new(gate_rx),
            passed: std::sync::Mutex::new(None),
        });
        let indexer = Indexer::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ParserRegistry::with_defaults()),
            IndexerConfig {
                repo_roots: vec![root.clone()],
                ..IndexerConfig::default()
            },
        )
        .with_post_index_hook(gate.clone());
        let live = Arc::new(LiveIndexer::new(
            Arc::new(indexer),
            WatcherConfig::new(vec![root.clone()], Vec::new()),
        ));

        let cancel = CancellationToken::new();
        let handle = {
            let live = Arc::clone(&live);
            let cancel = cancel.clone();
            tokio::spawn(async move { live.run(cancel).await })
        };

        // Single-threaded runtime: this only runs if the hook is off-thread.
        sleep(Duration::from_millis(100)).await;
        open.send(()).unwrap();

        let mut passed = None;
        for _ in 0..100 {
            passed = *gate.passed.lock().unwrap();
            if passed.is_some() {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(passed, Some(true));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
