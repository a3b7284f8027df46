//! Book service: CRUD, progress and export, scoped to an owner.

use std::sync::Arc;

use quire_core::{
    render_manuscript, Book, BookId, BookPatch, BookProgress, NewBook, Result, UserId,
};
use quire_store::{Filter, OrderBy, RecordStore, BOOKS};
use tracing::info;

use crate::records::{book_chapters, from_row, from_rows, owned_book, to_row};

pub struct BookService {
    store: Arc<dyn RecordStore>,
    default_target: u32,
}

impl BookService {
    pub fn new(store: Arc<dyn RecordStore>, default_target: u32) -> Self {
        Self {
            store,
            default_target,
        }
    }

    /// Books owned by `owner`, newest first.
    pub async fn list(&self, owner: &UserId) -> Result<Vec<Book>> {
        let rows = self
            .store
            .select(
                BOOKS,
                &Filter::new().eq("user_id", owner.as_str()),
                Some(&OrderBy::desc("created_at")),
            )
            .await?;
        from_rows(rows)
    }

    /// Books any owner has marked public, newest first.
    pub async fn list_public(&self) -> Result<Vec<Book>> {
        let rows = self
            .store
            .select(
                BOOKS,
                &Filter::new().eq("is_public", true),
                Some(&OrderBy::desc("created_at")),
            )
            .await?;
        from_rows(rows)
    }

    pub async fn get(&self, owner: &UserId, id: &BookId) -> Result<Book> {
        owned_book(self.store.as_ref(), owner, id).await
    }

    /// Create an empty draft book.
    pub async fn create(&self, owner: &UserId, new: NewBook) -> Result<Book> {
        let book = new.into_book(owner.clone(), self.default_target)?;
        let row = self.store.insert(BOOKS, to_row(&book)?).await?;
        let book: Book = from_row(row)?;
        info!(book_id = %book.id, %owner, target = book.target_word_count, "book created");
        Ok(book)
    }

    /// Apply a partial update. Validation happens before the store is
    /// touched.
    pub async fn update(&self, owner: &UserId, id: &BookId, patch: BookPatch) -> Result<Book> {
        let fields = patch.to_fields()?;
        let book = self.get(owner, id).await?;
        if fields.is_empty() {
            return Ok(book);
        }
        let row = self.store.update(BOOKS, id.as_str(), fields).await?;
        from_row(row)
    }

    /// Delete a book; its chapters go with it.
    pub async fn delete(&self, owner: &UserId, id: &BookId) -> Result<()> {
        self.get(owner, id).await?;
        self.store.delete(BOOKS, id.as_str()).await?;
        info!(book_id = %id, "book deleted");
        Ok(())
    }

    pub async fn progress(&self, owner: &UserId, id: &BookId) -> Result<BookProgress> {
        BookProgress::of(&self.get(owner, id).await?)
    }

    /// Markdown manuscript of the whole book.
    pub async fn manuscript(&self, owner: &UserId, id: &BookId) -> Result<String> {
        let book = self.get(owner, id).await?;
        let chapters = book_chapters(self.store.as_ref(), id).await?;
        render_manuscript(&book, &chapters)
    }
}
