//! Advisory per-book locks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use quire_core::BookId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per book, created on first use. Holding the guard
/// serializes whatever read-then-write sequence the owner guards with it.
#[derive(Default)]
pub(crate) struct BookLocks {
    locks: Mutex<HashMap<BookId, Arc<AsyncMutex<()>>>>,
}

impl BookLocks {
    pub(crate) async fn lock(&self, book_id: &BookId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(book_id.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock of a deleted book.
    pub(crate) fn forget(&self, book_id: &BookId) {
        self.locks.lock().remove(book_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_book_serializes() {
        let locks = Arc::new(BookLocks::default());
        let book = BookId::new("b");

        let guard = locks.lock(&book).await;
        let contender = {
            let locks = locks.clone();
            let book = book.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&book).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Other books are independent.
        let _other = locks.lock(&BookId::new("c")).await;

        drop(guard);
        contender.await.unwrap();
    }
}
