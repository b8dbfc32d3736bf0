//! Bounded concurrent hashing.
//!
//! A [`HashingPool`] caps how many hash computations run at once. Callers
//! beyond the cap wait for a slot in FIFO order (tokio's semaphore is fair);
//! they are never rejected. The pool is an explicit handle: construct it once
//! and clone it into every component that hashes.

use std::io::Read;
use std::sync::Arc;

use beacon_core::hash::{sha256, sha256_reader, Digest, StreamHasher};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::error::{Result, RuntimeError};

#[derive(Debug)]
struct PoolInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    stream_chunk_size: usize,
}

/// Cloneable handle to a bounded hashing pool.
#[derive(Debug, Clone)]
pub struct HashingPool {
    inner: Arc<PoolInner>,
}

impl HashingPool {
    /// Create a pool admitting at most `capacity` concurrent computations.
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_chunk_size(capacity, beacon_core::hash::DEFAULT_CHUNK_SIZE)
    }

    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        Self::with_chunk_size(config.capacity, config.stream_chunk_size)
    }

    fn with_chunk_size(capacity: usize, stream_chunk_size: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(RuntimeError::InvalidArgument(
                "pool capacity must be at least 1".to_string(),
            ));
        }
        if stream_chunk_size == 0 {
            return Err(RuntimeError::InvalidArgument(
                "stream chunk size must be at least 1".to_string(),
            ));
        }
        Ok(HashingPool {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                stream_chunk_size,
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Slots not currently held.
    pub fn available_slots(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Default chunk size for [`hash_stream`](Self::hash_stream).
    pub fn stream_chunk_size(&self) -> usize {
        self.inner.stream_chunk_size
    }

    /// Stop admitting work. Running computations finish; waiters and later
    /// callers get [`RuntimeError::PoolClosed`].
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        if self.inner.semaphore.available_permits() == 0 {
            debug!(capacity = self.inner.capacity, "hashing pool saturated, waiting for a slot");
        }
        self.inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RuntimeError::PoolClosed)
    }

    /// Run a CPU-bound job on the blocking thread pool while holding a slot.
    ///
    /// The slot moves into the blocking task, so it stays held until the job
    /// returns even if the awaiting future is dropped.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.acquire().await?;
        let output = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await?;
        Ok(output)
    }

    /// SHA256 of a buffer.
    pub async fn hash<B>(&self, data: B) -> Result<Digest>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        self.run(move || sha256(data.as_ref())).await
    }

    /// SHA256 of an async stream read in `chunk_size` pieces, plus the number
    /// of bytes consumed.
    ///
    /// The digest equals [`hash`](Self::hash) over the concatenated bytes. A
    /// read error aborts with that error and the partial count is dropped.
    pub async fn hash_stream<R>(&self, mut reader: R, chunk_size: usize) -> Result<(Digest, u64)>
    where
        R: AsyncRead + Unpin,
    {
        if chunk_size == 0 {
            return Err(RuntimeError::InvalidArgument(
                "chunk size must be at least 1".to_string(),
            ));
        }

        let _permit = self.acquire().await?;
        let mut buffer = vec![0u8; chunk_size];
        let mut hasher = StreamHasher::new();
        loop {
            let n = reader.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        let (digest, bytes_read) = hasher.finalize();
        trace!(bytes_read, "hashed stream");
        Ok((digest, bytes_read))
    }

    /// Like [`hash_stream`](Self::hash_stream) for blocking readers such as
    /// files, run on the blocking thread pool.
    pub async fn hash_reader<R>(&self, reader: R, chunk_size: usize) -> Result<(Digest, u64)>
    where
        R: Read + Send + 'static,
    {
        if chunk_size == 0 {
            return Err(RuntimeError::InvalidArgument(
                "chunk size must be at least 1".to_string(),
            ));
        }
        let outcome = self.run(move || sha256_reader(reader, chunk_size)).await?;
        Ok(outcome?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_hash_is_deterministic() {
        let pool = HashingPool::new(2).unwrap();
        let a = pool.hash(b"hello".to_vec()).await.unwrap();
        let b = pool.hash(b"hello".to_vec()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a, sha256(b"hello"));
    }

    #[tokio::test]
    async fn test_rejects_zero_capacity() {
        assert!(matches!(
            HashingPool::new(0),
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_exceeds_capacity() {
        let cap = 3;
        let pool = HashingPool::new(cap).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..(cap + 1) * 2 {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), cap);
        assert_eq!(pool.available_slots(), cap);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_extra_submission_waits_for_slot() {
        let pool = HashingPool::new(1).unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let holder = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.run(move || {
                    let _ = release_rx.recv();
                })
                .await
            })
        };
        while pool.available_slots() != 0 {
            tokio::task::yield_now().await;
        }

        let waiter = pool.hash(b"queued".to_vec());
        tokio::pin!(waiter);
        let early = tokio::time::timeout(Duration::from_millis(50), &mut waiter).await;
        assert!(early.is_err(), "second job ran while the only slot was held");

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();
        assert_eq!(waiter.await.unwrap(), sha256(b"queued"));
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = HashingPool::new(1).unwrap();
        pool.close();
        assert!(matches!(
            pool.hash(b"x".to_vec()).await,
            Err(RuntimeError::PoolClosed)
        ));
    }

    #[tokio::test]
    async fn test_hash_stream_counts_bytes() {
        let pool = HashingPool::new(1).unwrap();
        let data = vec![7u8; 20_000];
        let (digest, count) = pool.hash_stream(&data[..], 1000).await.unwrap();
        assert_eq!(digest, sha256(&data));
        assert_eq!(count, 20_000);
    }

    #[tokio::test]
    async fn test_hash_stream_rejects_zero_chunk() {
        let pool = HashingPool::new(1).unwrap();
        assert!(matches!(
            pool.hash_stream(&b"abc"[..], 0).await,
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_hash_stream_propagates_read_error() {
        let pool = HashingPool::new(1).unwrap();
        let reader = failing_stream();
        let result = pool.hash_stream(reader, 4).await;
        assert!(matches!(result, Err(RuntimeError::Io(_))));
        assert_eq!(pool.available_slots(), 1);
    }

    fn failing_stream() -> impl AsyncRead + Unpin {
        AsyncReadExt::chain(&b"partial"[..], FailingRead)
    }

    struct FailingRead;

    impl AsyncRead for FailingRead {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "stream reset",
            )))
        }
    }

    #[tokio::test]
    async fn test_hash_reader_matches_hash() {
        let pool = HashingPool::new(1).unwrap();
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let (digest, count) = pool
            .hash_reader(std::io::Cursor::new(data.clone()), 333)
            .await
            .unwrap();
        assert_eq!(digest, sha256(&data));
        assert_eq!(count, data.len() as u64);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_stream_digest_independent_of_chunk_size(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            chunk in 1usize..1024,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (digest, count, direct) = runtime.block_on(async {
                let pool = HashingPool::new(2).unwrap();
                let (digest, count) = pool.hash_stream(&data[..], chunk).await.unwrap();
                let direct = pool.hash(data.clone()).await.unwrap();
                (digest, count, direct)
            });
            prop_assert_eq!(digest, direct);
            prop_assert_eq!(count, data.len() as u64);
        }
    }
}
