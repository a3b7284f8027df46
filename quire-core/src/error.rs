//! Error taxonomy shared by every quire crate.

use std::fmt;

use quire_types::ChapterId;
use thiserror::Error;

/// Which kind of record a lookup failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Book,
    Chapter,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Book => f.write_str("book"),
            EntityKind::Chapter => f.write_str("chapter"),
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Unknown (or foreign-owned) book or chapter.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Target position outside `1..=len`.
    #[error("invalid order {requested}: expected a position in 1..={len}")]
    InvalidOrder { requested: i64, len: usize },

    /// Non-positive target word count.
    #[error("invalid target word count {0}: must be positive")]
    InvalidTarget(i64),

    /// Opaque failure reported by the record store.
    #[error("record store failure: {0}")]
    StoreFailure(String),

    /// Some, but not all, order updates of a move or compaction committed.
    /// The stored sequence may be non-dense until the book is recompacted.
    #[error("reorder partially applied: {applied} of {attempted} order updates committed")]
    PartialReorderFailure {
        applied: usize,
        attempted: usize,
        failed: Vec<ChapterId>,
    },

    /// Stored orders for a book do not form `1..=N`.
    #[error("chapter order of book {book_id} is inconsistent: {detail}")]
    InconsistentOrder { book_id: String, detail: String },

    /// Malformed request data (empty title, selection off a char boundary).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Rendering a book for export failed.
    #[error("manuscript export failed: {0}")]
    Export(#[from] serde_yaml::Error),

    /// The text a suggestion was computed for has since changed.
    #[error("suggestion no longer matches the content at {start}..{end}")]
    StaleSuggestion { start: usize, end: usize },
}

impl Error {
    pub fn book_not_found(id: impl fmt::Display) -> Self {
        Error::NotFound {
            kind: EntityKind::Book,
            id: id.to_string(),
        }
    }

    pub fn chapter_not_found(id: impl fmt::Display) -> Self {
        Error::NotFound {
            kind: EntityKind::Chapter,
            id: id.to_string(),
        }
    }

    /// Input validation errors are raised before anything is mutated and
    /// can be fixed by the caller resubmitting corrected input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::InvalidOrder { .. }
                | Error::InvalidTarget(_)
                | Error::InvalidInput(_)
                | Error::StaleSuggestion { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
