//! Per-store reader-writer coordination.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A per-store reader-writer lock.
///
/// Any number of readers may hold the lock concurrently; a writer
/// excludes all readers and other writers. Acquisition suspends the
/// calling task without blocking the rest of the process. No ordering is
/// guaranteed beyond mutual exclusion. The lock lives and dies with the
/// store instance; two processes pointed at the same physical backend are
/// not coordinated.
#[derive(Debug, Default)]
pub struct ReaderWriterLock {
    inner: RwLock<()>,
}

impl ReaderWriterLock {
    /// Create a new lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the shared reader side.
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read().await
    }

    /// Acquire the exclusive writer side.
    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_readers_are_shared() {
        let lock = ReaderWriterLock::new();
        let a = lock.read().await;
        let b = lock.read().await;
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn test_writer_is_exclusive() {
        let lock = Arc::new(ReaderWriterLock::new());
        let running_writers = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let running_writers = running_writers.clone();
            handles.push(tokio::spawn(async move {
                let _guard = lock.write().await;
                let concurrent = running_writers.fetch_add(1, Ordering::SeqCst);
                assert_eq!(concurrent, 0);
                tokio::task::yield_now().await;
                running_writers.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
    }
}
