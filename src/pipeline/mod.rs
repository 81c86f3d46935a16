//! Concurrent store pipeline
//!
//! A fixed pool of workers drains a [`PackageStream`] and writes every
//! successfully packaged chart to the storage backend.
//!
//! Failure policy:
//! - a descriptor that failed packaging is logged and skipped
//! - a failed store is fatal: it becomes the run's error and the worker that
//!   hit it stops taking new descriptors. Sibling workers are not cancelled;
//!   they finish whatever they are storing and keep draining the stream.

mod stream;

pub use stream::{package_channel, PackageSender, PackageStream};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::config::DEFAULT_CONCURRENCY;
use crate::storage::{StorageBackend, StoreError};

/// Outcome of one pipeline run
#[derive(Debug, Default)]
pub struct StoreResult {
    /// Packages persisted by the backend
    pub stored_count: usize,
    /// Descriptors skipped because packaging had failed
    pub skipped_count: usize,
    /// First store failure observed, if any
    pub error: Option<StoreError>,
    /// Total time in milliseconds
    pub total_time_ms: u64,
}

impl StoreResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// State shared by all workers of one run
#[derive(Default)]
struct Shared {
    stored: AtomicUsize,
    skipped: AtomicUsize,
    /// First error wins; later ones are only logged
    error: Mutex<Option<StoreError>>,
}

impl Shared {
    fn record_error(&self, worker: usize, err: StoreError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(err);
        } else {
            warn!(worker, error = %err, "additional store failure");
        }
    }
}

/// Store pipeline configuration
#[derive(Debug, Clone, Copy)]
pub struct StorePipeline {
    concurrency: usize,
}

impl StorePipeline {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Store every package in `stream` with `concurrency` workers
    ///
    /// Returns once all workers have stopped, either because the stream is
    /// exhausted or because they hit a store failure.
    #[instrument(
        skip(self, backend, stream),
        fields(backend = backend.scheme(), concurrency = self.concurrency)
    )]
    pub async fn store_all(
        &self,
        backend: Arc<dyn StorageBackend>,
        stream: PackageStream,
    ) -> StoreResult {
        let start = Instant::now();
        let stream = Arc::new(stream);
        let shared = Arc::new(Shared::default());

        let mut handles = Vec::with_capacity(self.concurrency);
        for worker_id in 0..self.concurrency {
            let backend = Arc::clone(&backend);
            let stream = Arc::clone(&stream);
            let shared = Arc::clone(&shared);

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, backend, stream, shared).await;
            }));
        }

        let results = futures::future::join_all(handles).await;
        for (worker_id, result) in results.into_iter().enumerate() {
            if let Err(e) = result {
                error!(worker = worker_id, "storage worker aborted: {}", e);
                shared.record_error(
                    worker_id,
                    StoreError::WorkerAborted {
                        worker: worker_id,
                        message: e.to_string(),
                    },
                );
            }
        }

        let result = StoreResult {
            stored_count: shared.stored.load(Ordering::SeqCst),
            skipped_count: shared.skipped.load(Ordering::SeqCst),
            error: shared.error.lock().take(),
            total_time_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Store pipeline completed: {} stored, {} skipped, {} in {}ms",
            result.stored_count,
            result.skipped_count,
            if result.is_success() { "no errors" } else { "failed" },
            result.total_time_ms
        );

        result
    }
}

impl Default for StorePipeline {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

/// Store all packages in `stream` with `concurrency` workers
pub async fn store_all(
    backend: Arc<dyn StorageBackend>,
    stream: PackageStream,
    concurrency: usize,
) -> StoreResult {
    StorePipeline::new(concurrency).store_all(backend, stream).await
}

async fn worker_loop(
    worker_id: usize,
    backend: Arc<dyn StorageBackend>,
    stream: Arc<PackageStream>,
    shared: Arc<Shared>,
) {
    while let Some(descriptor) = stream.next().await {
        let file = match descriptor.result {
            Ok(file) => file,
            Err(e) => {
                error!(worker = worker_id, chart = %descriptor.source, "skipping chart: {}", e);
                shared.skipped.fetch_add(1, Ordering::SeqCst);
                continue;
            }
        };

        match backend.store(&file).await {
            Ok(stored) => {
                shared.stored.fetch_add(1, Ordering::SeqCst);
                debug!(
                    worker = worker_id,
                    key = %stored.key,
                    size = stored.size,
                    public_url = stored.public_url.as_deref().unwrap_or(""),
                    "stored package"
                );
            }
            Err(e) => {
                error!(worker = worker_id, key = %file.key, "store failed, worker stopping: {}", e);
                shared.record_error(worker_id, e);
                break;
            }
        }
    }

    debug!(worker = worker_id, "storage worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChartDir, PackageDescriptor, PackageFile};
    use crate::packaging::PackagingError;
    use crate::storage::memory::MemoryStore;
    use std::time::Duration;

    fn ok(name: &str) -> PackageDescriptor {
        PackageDescriptor::ok(
            ChartDir::new(format!("/src/{}", name)),
            PackageFile::from_bytes(format!("{}-1.0.0.tgz", name), name.as_bytes().to_vec()),
        )
    }

    fn broken(name: &str) -> PackageDescriptor {
        PackageDescriptor::failed(
            ChartDir::new(format!("/src/{}", name)),
            PackagingError::Other(format!("{} has no version", name)),
        )
    }

    fn backend(store: &Arc<MemoryStore>) -> Arc<dyn StorageBackend> {
        store.clone()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_all_succeed_for_any_worker_count() {
        let n = 7;
        for concurrency in 1..=n + 3 {
            let store = Arc::new(MemoryStore::new());
            let descriptors = (0..n).map(|i| ok(&format!("chart{}", i))).collect();

            let stream = PackageStream::from_descriptors(descriptors);
            let result = store_all(backend(&store), stream, concurrency).await;

            assert_eq!(result.stored_count, n, "concurrency {}", concurrency);
            assert_eq!(result.skipped_count, 0);
            assert!(result.error.is_none());
            assert_eq!(store.len(), n);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_packaging_errors_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let stream = PackageStream::from_descriptors(vec![ok("a"), ok("b"), broken("c"), ok("d")]);

        let result = store_all(backend(&store), stream, 2).await;

        assert_eq!(result.stored_count, 3);
        assert_eq!(result.skipped_count, 1);
        assert!(result.is_success());
        assert_eq!(store.keys(), vec!["a-1.0.0.tgz", "b-1.0.0.tgz", "d-1.0.0.tgz"]);
        assert!(!store.calls().iter().any(|k| k.starts_with("c-")));
    }

    #[tokio::test]
    async fn test_sequential_failure_stops_worker() {
        let store = Arc::new(MemoryStore::new());
        store.fail_on("b-1.0.0.tgz");
        let stream = PackageStream::from_descriptors(vec![ok("a"), ok("b")]);

        let result = store_all(backend(&store), stream, 1).await;

        assert_eq!(result.stored_count, 1);
        match result.error {
            Some(StoreError::Rejected { key, .. }) => assert_eq!(key, "b-1.0.0.tgz"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(store.keys(), vec!["a-1.0.0.tgz"]);
    }

    #[tokio::test]
    async fn test_single_worker_is_ordered_and_stops_at_first_failure() {
        let store = Arc::new(MemoryStore::new());
        store.fail_on("c-1.0.0.tgz");
        let stream = PackageStream::from_descriptors(vec![
            ok("a"),
            broken("x"),
            ok("b"),
            ok("c"),
            ok("d"),
            ok("e"),
        ]);

        let result = store_all(backend(&store), stream, 1).await;

        assert_eq!(result.stored_count, 2);
        assert_eq!(result.skipped_count, 1);
        assert!(result.error.is_some());
        assert_eq!(store.calls(), vec!["a-1.0.0.tgz", "b-1.0.0.tgz", "c-1.0.0.tgz"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_failure_with_concurrency() {
        let n = 12;
        let store = Arc::new(MemoryStore::new().with_delay(Duration::from_millis(5)));
        store.fail_on("chart5-1.0.0.tgz");
        let descriptors = (0..n).map(|i| ok(&format!("chart{}", i))).collect();

        let stream = PackageStream::from_descriptors(descriptors);
        let result = store_all(backend(&store), stream, 4).await;

        assert!(result.error.is_some());
        assert!(result.stored_count <= n - 1);
        assert_eq!(result.stored_count, store.len());
        assert!(!store.contains("chart5-1.0.0.tgz"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_worker_failing_drains_nothing_more() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..6 {
            store.fail_on(&format!("chart{}-1.0.0.tgz", i));
        }
        let descriptors = (0..6).map(|i| ok(&format!("chart{}", i))).collect();

        let stream = PackageStream::from_descriptors(descriptors);
        let result = store_all(backend(&store), stream, 2).await;

        assert_eq!(result.stored_count, 0);
        assert!(result.error.is_some());
        // each worker stops after its own failure
        assert_eq!(store.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let store = Arc::new(MemoryStore::new());
        let stream = PackageStream::from_descriptors(Vec::new());
        let result = store_all(backend(&store), stream, 5).await;

        assert_eq!(result.stored_count, 0);
        assert_eq!(result.skipped_count, 0);
        assert!(result.error.is_none());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rerun_overwrites_same_keys() {
        let store = Arc::new(MemoryStore::new());
        for _ in 0..2 {
            let stream = PackageStream::from_descriptors(vec![ok("a"), ok("b"), ok("c")]);
            let result = store_all(backend(&store), stream, 3).await;
            assert_eq!(result.stored_count, 3);
        }

        assert_eq!(store.keys(), vec!["a-1.0.0.tgz", "b-1.0.0.tgz", "c-1.0.0.tgz"]);
        assert_eq!(store.write_count(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_live_channel_with_slow_producer() {
        let store = Arc::new(MemoryStore::new());
        let (tx, stream) = package_channel(1);
        let producer = tokio::spawn(async move {
            for name in ["a", "b", "c", "d"] {
                tokio::time::sleep(Duration::from_millis(2)).await;
                tx.send(ok(name)).await.unwrap();
            }
            tx.send(broken("e")).await.unwrap();
        });

        let result = StorePipeline::new(3).store_all(backend(&store), stream).await;
        producer.await.unwrap();

        assert_eq!(result.stored_count, 4);
        assert_eq!(result.skipped_count, 1);
        assert!(result.is_success());
    }

    #[test]
    fn test_zero_concurrency_clamped() {
        assert_eq!(StorePipeline::new(0).concurrency(), 1);
        assert_eq!(StorePipeline::default().concurrency(), DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_store_all_blocking_runtime() {
        let store = Arc::new(MemoryStore::new());
        let result = tokio_test::block_on(store_all(
            backend(&store),
            PackageStream::from_descriptors(vec![ok("a")]),
            1,
        ));
        assert_eq!(result.stored_count, 1);
    }
}
