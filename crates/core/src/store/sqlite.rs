//! SQLite-backed key-value store with a single batching writer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot};

use super::writer::{self, Job};
use super::{KeyValueStore, connection};
use crate::Error;

/// Writer tuning for a [`Store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// How long an idle writer with nothing to commit stays alive.
    pub keepalive: Duration,
    /// Longest a write may sit uncommitted.
    pub commit_spacing: Duration,
    /// Capacity of the job queue; producers wait once it is full.
    pub queue_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { keepalive: Duration::from_secs(2), commit_spacing: Duration::from_secs(2), queue_depth: 64 }
    }
}

/// Point-in-time writer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Writers spawned since the store was opened.
    pub writers_spawned: u64,
    /// Whether a writer currently holds the running flag.
    pub writer_running: bool,
    /// Most writer tasks ever alive at once.
    pub peak_concurrent_writers: usize,
}

/// State shared between the handle and every writer generation.
pub(crate) struct Shared {
    pub(crate) path: PathBuf,
    pub(crate) config: StoreConfig,
    pub(crate) sender: mpsc::Sender<Job>,
    pub(crate) queue: Mutex<mpsc::Receiver<Job>>,
    /// Jobs counted by producers and not yet taken off the queue.
    pub(crate) pending: AtomicUsize,
    pub(crate) running: AtomicBool,
    pub(crate) closing: AtomicBool,
    pub(crate) writers_spawned: AtomicU64,
    /// Writer tasks currently alive, counted from task start to exit.
    pub(crate) live_writers: AtomicUsize,
    pub(crate) peak_writers: AtomicUsize,
}

/// Durable key to bytes store backed by one SQLite file.
///
/// Every operation is funnelled through a single writer task that owns the
/// database connection. Reads wait for their answer; writes and deletes
/// return as soon as the job is queued and become durable at the next commit.
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Open (or create) the store at `path`.
    ///
    /// Missing parent directories are created and the schema is applied once
    /// up front so a bad path fails here rather than inside the writer.
    pub async fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self, Error> {
        if config.queue_depth == 0 {
            return Err(Error::InvalidInput("queue_depth must be greater than 0".into()));
        }

        let path = std::path::absolute(path.as_ref())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = connection::open(&path).await?;
        if let Err(e) = conn.close().await {
            tracing::warn!(error = %e, "failed to close schema connection");
        }

        let (sender, receiver) = mpsc::channel(config.queue_depth);
        let shared = Shared {
            path,
            config,
            sender,
            queue: Mutex::new(receiver),
            pending: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            writers_spawned: AtomicU64::new(0),
            live_writers: AtomicUsize::new(0),
            peak_writers: AtomicUsize::new(0),
        };

        tracing::debug!(path = %shared.path.display(), "opened store");
        Ok(Self { shared: Arc::new(shared) })
    }

    /// Absolute path of the database file.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Fetch the bytes stored under `key`.
    ///
    /// Returns `Ok(None)` when no row matches and `Err(Error::WriterFailed)`
    /// when the writer could not answer.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let (reply, answer) = oneshot::channel();
        self.submit(Job::Get { key: key.to_string(), reply }).await?;
        answer
            .await
            .map_err(|_| Error::WriterFailed("writer exited before answering".into()))?
    }

    /// Queue an upsert of `value` under `key`.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        self.submit(Job::Set { key: key.to_string(), value }).await
    }

    /// Queue removal of `key`.
    pub async fn delete(&self, key: &str) -> Result<(), Error> {
        self.submit(Job::Delete { key: key.to_string() }).await
    }

    /// Commit everything queued so far and wait for it to reach disk.
    pub async fn flush(&self) -> Result<(), Error> {
        let (reply, answer) = oneshot::channel();
        self.submit(Job::Flush { reply }).await?;
        answer
            .await
            .map_err(|_| Error::WriterFailed("writer exited before committing".into()))?
    }

    /// Ask the writer to finish the queue and retire without waiting out its
    /// keepalive. Already queued jobs still run. Later submissions are still
    /// accepted; their writer exits as soon as the queue is empty.
    pub fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);

        if self.shared.running.load(Ordering::SeqCst) {
            self.shared.pending.fetch_add(1, Ordering::SeqCst);
            if self.shared.sender.try_send(Job::Wake).is_err() {
                // Queue is busy; the writer will see the flag after the next job.
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            writers_spawned: self.shared.writers_spawned.load(Ordering::SeqCst),
            writer_running: self.shared.running.load(Ordering::SeqCst),
            peak_concurrent_writers: self.shared.peak_writers.load(Ordering::SeqCst),
        }
    }

    async fn submit(&self, job: Job) -> Result<(), Error> {
        let guard = PendingGuard::new(&self.shared);
        writer::ensure_running(&self.shared);
        self.shared.sender.send(job).await.map_err(|_| Error::QueueClosed)?;
        guard.landed();
        Ok(())
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.shared.path)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

/// Counts a job as pending for as long as its submission is in flight, and
/// uncounts it if the submission is abandoned before landing on the queue.
struct PendingGuard<'a> {
    shared: &'a Shared,
    landed: bool,
}

impl<'a> PendingGuard<'a> {
    fn new(shared: &'a Shared) -> Self {
        shared.pending.fetch_add(1, Ordering::SeqCst);
        Self { shared, landed: false }
    }

    fn landed(mut self) {
        self.landed = true;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.landed {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl KeyValueStore for Store {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Store::get(self, key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        Store::set(self, key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        Store::delete(self, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinSet;

    fn fast_config() -> StoreConfig {
        StoreConfig {
            keepalive: Duration::from_millis(100),
            commit_spacing: Duration::from_millis(50),
            queue_depth: 8,
        }
    }

    async fn open_temp(config: StoreConfig) -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("nested").join("bucket.db"), config).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_get_missing() {
        let (_dir, store) = open_temp(fast_config()).await;
        assert_eq!(store.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (_dir, store) = open_temp(fast_config()).await;
        store.set("k", b"value".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"value".to_vec()));
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let (_dir, store) = open_temp(StoreConfig { commit_spacing: Duration::from_secs(60), ..fast_config() }).await;
        store.set("k", b"v1".to_vec()).await.unwrap();
        store.set("k", b"v2".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_delete_removes_value() {
        let (_dir, store) = open_temp(fast_config()).await;
        store.set("k", b"v".to_vec()).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_open_creates_parent_directories() {
        let (dir, store) = open_temp(fast_config()).await;
        assert!(dir.path().join("nested").is_dir());
        assert!(store.path().is_absolute());
    }

    #[tokio::test]
    async fn test_zero_queue_depth_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = Store::open(dir.path().join("b.db"), StoreConfig { queue_depth: 0, ..fast_config() }).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_flush_makes_writes_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket.db");
        let config = StoreConfig { commit_spacing: Duration::from_secs(60), ..fast_config() };

        let store = Store::open(&path, config.clone()).await.unwrap();
        store.set("k", b"durable".to_vec()).await.unwrap();
        store.flush().await.unwrap();

        let other = Store::open(&path, config).await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), Some(b"durable".to_vec()));
    }

    #[tokio::test]
    async fn test_writes_commit_after_spacing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket.db");
        let config = StoreConfig { keepalive: Duration::from_secs(5), ..fast_config() };

        let store = Store::open(&path, config.clone()).await.unwrap();
        store.set("k", b"spaced".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Writer is still alive (long keepalive), so only the spacing commit
        // can have made the value visible to a second connection.
        assert!(store.stats().writer_running);
        let other = Store::open(&path, config).await.unwrap();
        assert_eq!(other.get("k").await.unwrap(), Some(b"spaced".to_vec()));
    }

    #[tokio::test]
    async fn test_idle_writer_retires_and_respawns() {
        let (_dir, store) = open_temp(fast_config()).await;
        store.set("a", b"1".to_vec()).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.stats().writers_spawned, 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!store.stats().writer_running);

        assert_eq!(store.get("a").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.stats().writers_spawned, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_writer_under_concurrency() {
        let (_dir, store) = open_temp(StoreConfig { keepalive: Duration::from_millis(5), ..fast_config() }).await;
        let store = Arc::new(store);

        let mut tasks = JoinSet::new();
        for worker in 0..8 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                for i in 0..25 {
                    let key = format!("k{}", i % 5);
                    match i % 3 {
                        0 => store.set(&key, format!("{worker}:{i}").into_bytes()).await.unwrap(),
                        1 => {
                            store.get(&key).await.unwrap();
                        }
                        _ => store.delete(&key).await.unwrap(),
                    }
                    if i % 7 == 0 {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        let stats = store.stats();
        assert!(stats.writers_spawned >= 1);
        assert_eq!(stats.peak_concurrent_writers, 1);
    }

    #[tokio::test]
    async fn test_live_writer_count_sees_overlapping_tasks() {
        let (_dir, store) = open_temp(fast_config()).await;

        // Bypass the running flag: two tasks alive at once must show up in the peak.
        let first = tokio::spawn(writer::run(Arc::clone(&store.shared)));
        let second = tokio::spawn(writer::run(Arc::clone(&store.shared)));
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(store.stats().peak_concurrent_writers, 2);
    }

    #[tokio::test]
    async fn test_close_retires_writer_promptly() {
        let (_dir, store) = open_temp(StoreConfig { keepalive: Duration::from_secs(30), ..fast_config() }).await;
        store.set("k", b"v".to_vec()).await.unwrap();
        store.flush().await.unwrap();
        assert!(store.stats().writer_running);

        store.close();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!store.stats().writer_running);

        // Still usable after close.
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    async fn drop_bucket_table(path: &Path) {
        let conn = tokio_rusqlite::Connection::open(path).await.unwrap();
        conn.call(|conn| conn.execute_batch("DROP TABLE bucket")).await.unwrap();
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_new_writer_recreates_missing_table() {
        let (_dir, store) = open_temp(fast_config()).await;
        store.set("a", b"1".to_vec()).await.unwrap();
        store.flush().await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!store.stats().writer_running);
        drop_bucket_table(store.path()).await;

        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("b", b"2".to_vec()).await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_failed_get_in_live_writer_then_respawn() {
        let (_dir, store) = open_temp(StoreConfig { keepalive: Duration::from_secs(30), ..fast_config() }).await;
        store.set("a", b"1".to_vec()).await.unwrap();
        store.flush().await.unwrap();
        assert!(store.stats().writer_running);
        assert_eq!(store.stats().writers_spawned, 1);

        drop_bucket_table(store.path()).await;

        let result = store.get("a").await;
        assert!(matches!(result, Err(Error::WriterFailed(_))), "got {result:?}");

        store.set("b", b"2".to_vec()).await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.stats().writers_spawned, 2);
    }

    #[tokio::test]
    async fn test_failed_set_in_live_writer_then_respawn() {
        let (_dir, store) = open_temp(StoreConfig { keepalive: Duration::from_secs(30), ..fast_config() }).await;
        store.set("a", b"1".to_vec()).await.unwrap();
        store.flush().await.unwrap();

        drop_bucket_table(store.path()).await;

        // The failing write takes the writer down; the queued read runs on a new one.
        store.set("b", b"lost".to_vec()).await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), None);
        assert_eq!(store.stats().writers_spawned, 2);

        store.set("c", b"3".to_vec()).await.unwrap();
        assert_eq!(store.get("c").await.unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn test_get_reports_failure_distinct_from_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucket.db");
        let store = Store::open(&path, fast_config()).await.unwrap();

        // Replace the database file with a directory so the writer cannot open it.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let result = store.get("k").await;
        assert!(matches!(result, Err(Error::WriterFailed(_))));
    }
}
