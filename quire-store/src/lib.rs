//! # quire-store
//!
//! The record store is an external collaborator: a table-oriented service
//! with `select`, `insert`, `update` and `delete` and nothing else. In
//! particular there is no reorder primitive and no multi-row transaction,
//! which is why the engine plans order changes as batches of single-row
//! updates.
//!
//! Two implementations ship here: [`MemoryStore`] for tests and local
//! development, and [`RestStore`] for PostgREST-compatible backends.

pub mod error;
pub mod memory;
pub mod query;
pub mod rest;

use async_trait::async_trait;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use query::{Filter, OrderBy};
pub use rest::RestStore;

/// Table holding book rows.
pub const BOOKS: &str = "books";

/// Table holding chapter rows.
pub const CHAPTERS: &str = "chapters";

/// A persisted record: a flat JSON object keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Table-oriented persistence interface.
///
/// Every call is independent; failures are opaque to callers and never
/// retried here.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows of `table` matching `filter`, optionally sorted.
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Row>, StoreError>;

    /// Insert a row, returning it as stored (with generated columns).
    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError>;

    /// Merge `fields` into the row with primary key `id`.
    async fn update(&self, table: &str, id: &str, fields: Row) -> Result<Row, StoreError>;

    /// Delete the row with primary key `id`, cascading to dependent rows.
    async fn delete(&self, table: &str, id: &str) -> Result<(), StoreError>;
}
