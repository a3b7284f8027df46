//! Typed views of store rows.

use quire_core::{Book, BookId, Chapter, Error, Result};
use quire_store::{Filter, OrderBy, RecordStore, Row, StoreError, BOOKS, CHAPTERS};
use serde::{de::DeserializeOwned, Serialize};

pub(crate) fn to_row<T: Serialize>(value: &T) -> Result<Row> {
    match serde_json::to_value(value).map_err(StoreError::from)? {
        serde_json::Value::Object(row) => Ok(row),
        other => Err(Error::StoreFailure(format!("expected an object row, got {other}"))),
    }
}

pub(crate) fn from_row<T: DeserializeOwned>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(row.into()).map_err(StoreError::from)?)
}

pub(crate) fn from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter().map(from_row).collect()
}

/// Single-column partial row.
pub(crate) fn field(column: &str, value: impl Into<serde_json::Value>) -> Row {
    let mut row = Row::new();
    row.insert(column.to_string(), value.into());
    row
}

/// The book `id` if it is owned by `owner`. Foreign books are reported as
/// missing.
pub(crate) async fn owned_book(
    store: &dyn RecordStore,
    owner: &quire_core::UserId,
    id: &BookId,
) -> Result<Book> {
    let filter = Filter::new()
        .eq("id", id.as_str())
        .eq("user_id", owner.as_str());
    store
        .select(BOOKS, &filter, None)
        .await?
        .into_iter()
        .next()
        .map(from_row)
        .transpose()?
        .ok_or_else(|| Error::book_not_found(id))
}

/// All chapters of a book, sorted by order.
pub(crate) async fn book_chapters(store: &dyn RecordStore, book_id: &BookId) -> Result<Vec<Chapter>> {
    let rows = store
        .select(
            CHAPTERS,
            &Filter::new().eq("book_id", book_id.as_str()),
            Some(&OrderBy::asc("order")),
        )
        .await?;
    let mut chapters: Vec<Chapter> = from_rows(rows)?;
    chapters.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(chapters)
}

/// Re-derive a book's `current_word_count` from its chapters and store it.
pub(crate) async fn refresh_totals(store: &dyn RecordStore, book_id: &BookId) -> Result<u32> {
    let total = book_chapters(store, book_id)
        .await?
        .iter()
        .fold(0u32, |sum, c| sum.saturating_add(c.word_count));
    store
        .update(BOOKS, book_id.as_str(), field("current_word_count", total))
        .await?;
    tracing::debug!(%book_id, total, "book totals refreshed");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_core::UserId;
    use quire_store::MemoryStore;

    #[tokio::test]
    async fn test_totals_follow_chapters() {
        let store = MemoryStore::new();
        let book = quire_core::NewBook {
            title: "T".into(),
            ..Default::default()
        }
        .into_book(UserId::new("u"), 1000)
        .unwrap();
        store.insert(BOOKS, to_row(&book).unwrap()).await.unwrap();

        for text in ["one two", "three four five"] {
            let chapter = Chapter::new(book.id.clone(), "c", Some(text.into()), 1);
            store.insert(CHAPTERS, to_row(&chapter).unwrap()).await.unwrap();
        }

        assert_eq!(refresh_totals(&store, &book.id).await.unwrap(), 5);
        let stored = owned_book(&store, &UserId::new("u"), &book.id).await.unwrap();
        assert_eq!(stored.current_word_count, 5);

        let foreign = owned_book(&store, &UserId::new("someone-else"), &book.id).await;
        assert!(matches!(foreign, Err(Error::NotFound { .. })));
    }
}
