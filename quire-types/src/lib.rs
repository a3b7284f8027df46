//! Shared types for quire
//!
//! This crate provides the identifiers and change events used across the
//! quire workspace: who owns a book, which book a chapter belongs to, and
//! what happened to a chapter.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Authenticated owner identifier (the `sub` of a user token)
    UserId
);

string_id!(
    /// Book identifier
    BookId
);

string_id!(
    /// Chapter identifier
    ChapterId
);

impl BookId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl ChapterId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Chapter change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChapterEvent {
    /// A chapter was appended at `order`
    Created {
        book_id: BookId,
        chapter_id: ChapterId,
        order: u32,
    },

    /// A chapter title changed
    Renamed {
        book_id: BookId,
        chapter_id: ChapterId,
        title: String,
    },

    /// A chapter moved from one position to another
    Moved {
        book_id: BookId,
        chapter_id: ChapterId,
        from: u32,
        to: u32,
    },

    /// Chapter content was persisted
    ContentSaved {
        book_id: BookId,
        chapter_id: ChapterId,
        word_count: u32,
    },

    /// A chapter was deleted and its siblings compacted
    Deleted {
        book_id: BookId,
        chapter_id: ChapterId,
        order: u32,
    },

    /// The book's order sequence was rebuilt from the store
    Recompacted { book_id: BookId, changed: usize },
}

impl ChapterEvent {
    /// Book the event belongs to.
    pub fn book_id(&self) -> &BookId {
        match self {
            ChapterEvent::Created { book_id, .. }
            | ChapterEvent::Renamed { book_id, .. }
            | ChapterEvent::Moved { book_id, .. }
            | ChapterEvent::ContentSaved { book_id, .. }
            | ChapterEvent::Deleted { book_id, .. }
            | ChapterEvent::Recompacted { book_id, .. } => book_id,
        }
    }
}
