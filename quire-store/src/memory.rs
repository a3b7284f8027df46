//! In-process record store.
//!
//! Tables are vectors of rows behind a lock. Inserted rows get an `id`
//! (UUID v4) and `created_at` when the caller leaves them out, and deleting
//! a row removes dependent rows according to the configured cascades, the
//! way the hosted database's foreign keys would.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::{Filter, OrderBy, RecordStore, Row, StoreError, BOOKS, CHAPTERS};

/// `ON DELETE CASCADE` rule: deleting a `parent` row deletes every
/// `child` row whose `column` equals the parent id.
#[derive(Debug, Clone)]
struct Cascade {
    parent: String,
    child: String,
    column: String,
}

pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    cascades: Vec<Cascade>,
}

impl MemoryStore {
    /// Empty store with the books → chapters cascade.
    pub fn new() -> Self {
        Self::without_cascades().with_cascade(BOOKS, CHAPTERS, "book_id")
    }

    pub fn without_cascades() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            cascades: Vec::new(),
        }
    }

    pub fn with_cascade(
        mut self,
        parent: impl Into<String>,
        child: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        self.cascades.push(Cascade {
            parent: parent.into(),
            child: child.into(),
            column: column.into(),
        });
        self
    }

    /// Number of rows currently in `table`.
    pub fn count(&self, table: &str) -> usize {
        self.tables.read().get(table).map(Vec::len).unwrap_or(0)
    }

    fn delete_cascading(&self, tables: &mut HashMap<String, Vec<Row>>, table: &str, id: &str) {
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|row| row_id(row) != Some(id));
        }

        for cascade in self.cascades.iter().filter(|c| c.parent == table) {
            let doomed: Vec<String> = tables
                .get(&cascade.child)
                .map(|rows| {
                    rows.iter()
                        .filter(|row| row.get(&cascade.column).and_then(Value::as_str) == Some(id))
                        .filter_map(|row| row_id(row).map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();

            if !doomed.is_empty() {
                debug!(table = %cascade.child, parent = %id, rows = doomed.len(), "cascading delete");
            }
            for child_id in doomed {
                self.delete_cascading(tables, &cascade.child, &child_id);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read();
        let mut rows: Vec<Row> = tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();
        if let Some(order) = order {
            rows.sort_by(|a, b| order.compare(a, b));
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, StoreError> {
        if row_id(&row).is_none() {
            row.insert("id".into(), uuid::Uuid::new_v4().to_string().into());
        }
        if !row.contains_key("created_at") {
            row.insert("created_at".into(), Utc::now().to_rfc3339().into());
        }

        let mut tables = self.tables.write();
        let rows = tables.entry(table.to_string()).or_default();
        if rows.iter().any(|r| row_id(r) == row_id(&row)) {
            return Err(StoreError::Constraint(format!(
                "duplicate id {} in {table}",
                row_id(&row).unwrap_or_default()
            )));
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, id: &str, fields: Row) -> Result<Row, StoreError> {
        let mut tables = self.tables.write();
        let row = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| row_id(r) == Some(id)))
            .ok_or_else(|| StoreError::RowNotFound {
                table: table.to_string(),
                id: id.to_string(),
            })?;

        for (column, value) in fields {
            if column == "id" {
                continue;
            }
            row.insert(column, value);
        }
        Ok(row.clone())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        self.delete_cascading(&mut tables, table, id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_timestamp() {
        let store = MemoryStore::new();
        let stored = store.insert(BOOKS, row(json!({"title": "T"}))).await.unwrap();
        assert!(stored.get("id").and_then(Value::as_str).is_some());
        assert!(stored.contains_key("created_at"));

        let dup = store.insert(BOOKS, stored.clone()).await;
        assert!(matches!(dup, Err(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_select_filters_and_sorts() {
        let store = MemoryStore::new();
        for (id, order) in [("c", 3), ("a", 1), ("b", 2)] {
            store
                .insert(CHAPTERS, row(json!({"id": id, "book_id": "b1", "order": order})))
                .await
                .unwrap();
        }
        store
            .insert(CHAPTERS, row(json!({"id": "x", "book_id": "b2", "order": 1})))
            .await
            .unwrap();

        let rows = store
            .select(CHAPTERS, &Filter::new().eq("book_id", "b1"), Some(&OrderBy::asc("order")))
            .await
            .unwrap();
        let ids: Vec<&str> = rows.iter().filter_map(row_id).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        store
            .insert(CHAPTERS, row(json!({"id": "a", "title": "Old", "order": 1})))
            .await
            .unwrap();

        let updated = store
            .update(CHAPTERS, "a", row(json!({"order": 2, "id": "hijack"})))
            .await
            .unwrap();
        assert_eq!(updated["order"], 2);
        assert_eq!(updated["title"], "Old");
        assert_eq!(updated["id"], "a");

        let missing = store.update(CHAPTERS, "zzz", Row::new()).await;
        assert!(matches!(missing, Err(StoreError::RowNotFound { .. })));
    }

    #[tokio::test]
    async fn test_book_delete_cascades_to_chapters() {
        let store = MemoryStore::new();
        store.insert(BOOKS, row(json!({"id": "b1"}))).await.unwrap();
        store.insert(BOOKS, row(json!({"id": "b2"}))).await.unwrap();
        for (id, book) in [("c1", "b1"), ("c2", "b1"), ("c3", "b2")] {
            store
                .insert(CHAPTERS, row(json!({"id": id, "book_id": book})))
                .await
                .unwrap();
        }

        store.delete(BOOKS, "b1").await.unwrap();
        assert_eq!(store.count(BOOKS), 1);
        assert_eq!(store.count(CHAPTERS), 1);

        // Deleting something already gone is not an error.
        store.delete(BOOKS, "b1").await.unwrap();
    }
}
