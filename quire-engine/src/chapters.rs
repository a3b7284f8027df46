//! Chapter service and reorder engine.
//!
//! Order changes are planned by [`quire_core::order`] and applied as one
//! single-row `update` per planned chapter, dispatched concurrently with
//! no rollback. Every move, insert, delete and recompaction holds the
//! book's lock from the fetch until the last update resolves, so two
//! reorders on the same book never interleave.
//!
//! Book totals have their own per-book lock. Content saves take only that
//! one, so autosave never queues behind a reorder.
//!
//! Watchers of a book see a [`ChapterSnapshot`] that is only ever replaced
//! by a complete, sorted, dense collection.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use quire_core::{
    append_order, check_dense, compact_after_delete, count_words, models::validate_title,
    move_chapter, recompact, BookId, Chapter, ChapterEvent, ChapterId, Error, OrderPlan, Result,
    UserId,
};
use quire_store::{Filter, RecordStore, Row, CHAPTERS};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::locks::BookLocks;
use crate::records::{book_chapters, field, from_row, owned_book, refresh_totals, to_row};

/// Published view of one book's chapters, sorted by order.
pub type ChapterSnapshot = Arc<Vec<Chapter>>;

const EVENT_CAPACITY: usize = 256;

/// Fields supplied when creating a chapter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewChapter {
    pub title: String,

    #[serde(default)]
    pub content: Option<String>,
}

pub struct ChapterService {
    store: Arc<dyn RecordStore>,
    locks: BookLocks,
    totals: BookLocks,
    snapshots: Mutex<HashMap<BookId, watch::Sender<ChapterSnapshot>>>,
    events: broadcast::Sender<ChapterEvent>,
}

impl ChapterService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            locks: BookLocks::default(),
            totals: BookLocks::default(),
            snapshots: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Change events for every book.
    pub fn events(&self) -> broadcast::Receiver<ChapterEvent> {
        self.events.subscribe()
    }

    /// Watch a book's chapter collection. The receiver starts at the
    /// current stored state.
    pub async fn subscribe(
        &self,
        owner: &UserId,
        book_id: &BookId,
    ) -> Result<watch::Receiver<ChapterSnapshot>> {
        owned_book(self.store.as_ref(), owner, book_id).await?;
        let chapters = book_chapters(self.store.as_ref(), book_id).await?;
        if check_dense(&chapters).is_ok() {
            self.publish(book_id, chapters);
        }
        let mut snapshots = self.snapshots.lock();
        let sender = snapshots
            .entry(book_id.clone())
            .or_insert_with(|| watch::channel(Arc::new(Vec::new())).0);
        Ok(sender.subscribe())
    }

    /// Chapters of a book ordered by `order`.
    pub async fn list(&self, owner: &UserId, book_id: &BookId) -> Result<Vec<Chapter>> {
        owned_book(self.store.as_ref(), owner, book_id).await?;
        book_chapters(self.store.as_ref(), book_id).await
    }

    pub async fn get(&self, owner: &UserId, chapter_id: &ChapterId) -> Result<Chapter> {
        let chapter = self.fetch(chapter_id).await?;
        match owned_book(self.store.as_ref(), owner, &chapter.book_id).await {
            Ok(_) => Ok(chapter),
            Err(Error::NotFound { .. }) => Err(Error::chapter_not_found(chapter_id)),
            Err(err) => Err(err),
        }
    }

    /// Append a chapter at `N + 1`.
    pub async fn create(&self, owner: &UserId, book_id: &BookId, new: NewChapter) -> Result<Chapter> {
        let title = validate_title(&new.title)?;
        owned_book(self.store.as_ref(), owner, book_id).await?;

        let _guard = self.locks.lock(book_id).await;
        let stored = book_chapters(self.store.as_ref(), book_id).await?;
        let mut chapters = self.ensure_dense(book_id, stored).await?;
        let chapter = self.append(book_id, title, new.content, &mut chapters).await?;
        self.publish(book_id, chapters);
        Ok(chapter)
    }

    /// Create a chapter and place it at `position` (append, then move).
    /// Returns the new chapter and the re-sorted collection.
    pub async fn insert_chapter_at(
        &self,
        owner: &UserId,
        book_id: &BookId,
        new: NewChapter,
        position: i64,
    ) -> Result<(Chapter, Vec<Chapter>)> {
        let title = validate_title(&new.title)?;
        owned_book(self.store.as_ref(), owner, book_id).await?;

        let _guard = self.locks.lock(book_id).await;
        let stored = book_chapters(self.store.as_ref(), book_id).await?;
        check_position(position, stored.len() + 1)?;
        let mut chapters = self.ensure_dense(book_id, stored).await?;

        let chapter = self.append(book_id, title, new.content, &mut chapters).await?;
        let chapters = self
            .reorder_locked(book_id, &chapters, &chapter.id, position)
            .await?;
        let placed = chapters
            .iter()
            .find(|c| c.id == chapter.id)
            .cloned()
            .unwrap_or(chapter);
        Ok((placed, chapters))
    }

    pub async fn rename(&self, owner: &UserId, chapter_id: &ChapterId, title: &str) -> Result<Chapter> {
        let title = validate_title(title)?;
        let chapter = self.get(owner, chapter_id).await?;
        let row = self
            .store
            .update(CHAPTERS, chapter_id.as_str(), field("title", title.clone()))
            .await?;
        let updated: Chapter = from_row(row)?;

        self.patch_snapshot(&updated);
        self.emit(ChapterEvent::Renamed {
            book_id: chapter.book_id,
            chapter_id: chapter_id.clone(),
            title,
        });
        Ok(updated)
    }

    /// Persist a chapter's content with its fresh word count, then
    /// re-derive the book total.
    ///
    /// Touches only `content`, `word_count` and `last_autosave`, so it does
    /// not take the reorder lock. The total is re-derived under the book's
    /// totals lock.
    pub async fn save_content(
        &self,
        owner: &UserId,
        chapter_id: &ChapterId,
        content: String,
    ) -> Result<Chapter> {
        let chapter = self.get(owner, chapter_id).await?;
        let word_count = count_words(&content);

        let mut fields = Row::new();
        fields.insert("content".into(), content.into());
        fields.insert("word_count".into(), word_count.into());
        fields.insert("last_autosave".into(), Utc::now().to_rfc3339().into());
        let row = self.store.update(CHAPTERS, chapter_id.as_str(), fields).await?;
        let updated: Chapter = from_row(row)?;
        debug!(%chapter_id, word_count, "chapter content saved");

        self.sync_totals(&chapter.book_id).await?;
        self.patch_snapshot(&updated);
        self.emit(ChapterEvent::ContentSaved {
            book_id: chapter.book_id,
            chapter_id: chapter_id.clone(),
            word_count,
        });
        Ok(updated)
    }

    /// Move a chapter to `new_order`, returning the re-sorted collection.
    pub async fn move_chapter(
        &self,
        owner: &UserId,
        chapter_id: &ChapterId,
        new_order: i64,
    ) -> Result<Vec<Chapter>> {
        let chapter = self.get(owner, chapter_id).await?;
        let book_id = chapter.book_id;

        let _guard = self.locks.lock(&book_id).await;
        let stored = book_chapters(self.store.as_ref(), &book_id).await?;
        check_position(new_order, stored.len())?;
        let chapters = self.ensure_dense(&book_id, stored).await?;
        self.reorder_locked(&book_id, &chapters, chapter_id, new_order)
            .await
    }

    /// Delete a chapter and renumber the survivors `1..=N-1`.
    pub async fn delete(&self, owner: &UserId, chapter_id: &ChapterId) -> Result<Vec<Chapter>> {
        let chapter = self.get(owner, chapter_id).await?;
        let book_id = chapter.book_id;

        let _guard = self.locks.lock(&book_id).await;
        let chapters = book_chapters(self.store.as_ref(), &book_id).await?;
        let order = chapters
            .iter()
            .find(|c| &c.id == chapter_id)
            .map_or(chapter.order, |c| c.order);
        let (survivors, plan) = compact_after_delete(&chapters, chapter_id)?;

        self.store.delete(CHAPTERS, chapter_id.as_str()).await?;
        info!(%book_id, %chapter_id, order, "chapter deleted");
        self.emit(ChapterEvent::Deleted {
            book_id: book_id.clone(),
            chapter_id: chapter_id.clone(),
            order,
        });

        let dispatched = self.dispatch(&book_id, &plan).await;
        let totals = self.sync_totals(&book_id).await;
        // The chapter is gone even when renumbering failed part way.
        self.publish(&book_id, survivors.clone());
        dispatched?;
        totals?;
        Ok(survivors)
    }

    /// Rebuild a dense `1..=N` sequence from the stored orders and
    /// re-derive the book total.
    ///
    /// Recovery path after [`Error::PartialReorderFailure`].
    pub async fn recompact(&self, owner: &UserId, book_id: &BookId) -> Result<Vec<Chapter>> {
        owned_book(self.store.as_ref(), owner, book_id).await?;
        let _guard = self.locks.lock(book_id).await;
        let chapters = book_chapters(self.store.as_ref(), book_id).await?;
        let ranked = self.recompact_locked(book_id, &chapters).await?;
        self.sync_totals(book_id).await?;
        Ok(ranked)
    }

    /// Forget per-book state after the book itself was deleted.
    pub fn forget_book(&self, book_id: &BookId) {
        self.locks.forget(book_id);
        self.totals.forget(book_id);
        self.snapshots.lock().remove(book_id);
    }

    /// Re-derive the stored book total. Serialized per book so a slow
    /// refresh cannot land after a newer one.
    async fn sync_totals(&self, book_id: &BookId) -> Result<u32> {
        let _guard = self.totals.lock(book_id).await;
        refresh_totals(self.store.as_ref(), book_id).await
    }

    async fn fetch(&self, chapter_id: &ChapterId) -> Result<Chapter> {
        self.store
            .select(CHAPTERS, &Filter::new().eq("id", chapter_id.as_str()), None)
            .await?
            .into_iter()
            .next()
            .map(from_row)
            .transpose()?
            .ok_or_else(|| Error::chapter_not_found(chapter_id))
    }

    /// Insert a chapter at `N + 1` and add it to `chapters`. Caller holds
    /// the book lock.
    async fn append(
        &self,
        book_id: &BookId,
        title: String,
        content: Option<String>,
        chapters: &mut Vec<Chapter>,
    ) -> Result<Chapter> {
        let chapter = Chapter::new(book_id.clone(), title, content, append_order(chapters));
        let row = self.store.insert(CHAPTERS, to_row(&chapter)?).await?;
        let chapter: Chapter = from_row(row)?;
        info!(%book_id, chapter_id = %chapter.id, order = chapter.order, "chapter created");

        if chapter.word_count > 0 {
            self.sync_totals(book_id).await?;
        }
        self.emit(ChapterEvent::Created {
            book_id: book_id.clone(),
            chapter_id: chapter.id.clone(),
            order: chapter.order,
        });
        chapters.push(chapter.clone());
        Ok(chapter)
    }

    /// Repair the stored sequence if an earlier reorder left it non-dense.
    /// Caller holds the book lock.
    async fn ensure_dense(&self, book_id: &BookId, chapters: Vec<Chapter>) -> Result<Vec<Chapter>> {
        match check_dense(&chapters) {
            Ok(()) => Ok(chapters),
            Err(err) => {
                warn!(%book_id, error = %err, "stored order drifted, recompacting");
                self.recompact_locked(book_id, &chapters).await
            }
        }
    }

    async fn reorder_locked(
        &self,
        book_id: &BookId,
        chapters: &[Chapter],
        chapter_id: &ChapterId,
        new_order: i64,
    ) -> Result<Vec<Chapter>> {
        let (moved, plan) = move_chapter(chapters, chapter_id, new_order)?;
        let Some(update) = plan.update_for(chapter_id).cloned() else {
            self.publish(book_id, moved.clone());
            return Ok(moved);
        };

        self.dispatch(book_id, &plan).await?;
        info!(%book_id, %chapter_id, from = update.from, to = update.to, writes = plan.len(), "chapter moved");
        self.emit(ChapterEvent::Moved {
            book_id: book_id.clone(),
            chapter_id: chapter_id.clone(),
            from: update.from,
            to: update.to,
        });
        self.publish(book_id, moved.clone());
        Ok(moved)
    }

    async fn recompact_locked(&self, book_id: &BookId, chapters: &[Chapter]) -> Result<Vec<Chapter>> {
        let (ranked, plan) = recompact(chapters);
        self.dispatch(book_id, &plan).await?;
        if !plan.is_empty() {
            info!(%book_id, changed = plan.len(), "chapter order recompacted");
        }
        self.emit(ChapterEvent::Recompacted {
            book_id: book_id.clone(),
            changed: plan.len(),
        });
        self.publish(book_id, ranked.clone());
        Ok(ranked)
    }

    /// Issue every planned order write concurrently and classify the
    /// outcome. Nothing is rolled back.
    async fn dispatch(&self, book_id: &BookId, plan: &OrderPlan) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }

        let store = self.store.as_ref();
        let writes = plan.updates.iter().map(|update| async move {
            let result = store
                .update(CHAPTERS, update.chapter_id.as_str(), field("order", update.to))
                .await;
            (update, result)
        });

        let mut failed = Vec::new();
        let mut first_error = None;
        for (update, result) in join_all(writes).await {
            if let Err(err) = result {
                warn!(%book_id, chapter_id = %update.chapter_id, to = update.to, error = %err, "order update failed");
                first_error.get_or_insert(err);
                failed.push(update.chapter_id.clone());
            }
        }

        let attempted = plan.len();
        match first_error {
            None => Ok(()),
            Some(err) if failed.len() == attempted => Err(err.into()),
            Some(_) => Err(Error::PartialReorderFailure {
                applied: attempted - failed.len(),
                attempted,
                failed,
            }),
        }
    }

    fn publish(&self, book_id: &BookId, chapters: Vec<Chapter>) {
        let snapshot = Arc::new(chapters);
        let mut snapshots = self.snapshots.lock();
        match snapshots.get(book_id) {
            Some(sender) => {
                sender.send_replace(snapshot);
            }
            None => {
                snapshots.insert(book_id.clone(), watch::channel(snapshot).0);
            }
        }
    }

    /// Swap an updated chapter into its book's snapshot, keeping the
    /// snapshot's order for it.
    fn patch_snapshot(&self, updated: &Chapter) {
        let snapshots = self.snapshots.lock();
        if let Some(sender) = snapshots.get(&updated.book_id) {
            sender.send_if_modified(|snapshot| {
                let Some(pos) = snapshot.iter().position(|c| c.id == updated.id) else {
                    return false;
                };
                let chapters = Arc::make_mut(snapshot);
                let order = chapters[pos].order;
                chapters[pos] = Chapter {
                    order,
                    ..updated.clone()
                };
                true
            });
        }
    }

    fn emit(&self, event: ChapterEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Reject positions outside `1..=len` before anything is written.
fn check_position(requested: i64, len: usize) -> Result<()> {
    if requested < 1 || requested > len as i64 {
        return Err(Error::InvalidOrder { requested, len });
    }
    Ok(())
}
