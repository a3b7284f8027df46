//! Content model structs for books and chapters.
//!
//! Field names match the persisted row shapes, so these types round-trip
//! through the record store as plain JSON objects.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use quire_types::{BookId, ChapterId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::words::count_optional;

/// Default writing goal for a freshly created book.
pub const DEFAULT_TARGET_WORD_COUNT: u32 = 50_000;

/// Lifecycle status of a book, set by its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    #[default]
    Draft,
    InProgress,
    Completed,
    Published,
}

impl FromStr for BookStatus {
    type Err = Error;

    /// Accepts the stored names and their spaced, any-case spellings
    /// ("In Progress").
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace(' ', "_").as_str() {
            "draft" => Ok(BookStatus::Draft),
            "in_progress" => Ok(BookStatus::InProgress),
            "completed" => Ok(BookStatus::Completed),
            "published" => Ok(BookStatus::Published),
            _ => Err(Error::InvalidInput(format!("unknown book status: {s}"))),
        }
    }
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Draft => "draft",
            BookStatus::InProgress => "in_progress",
            BookStatus::Completed => "completed",
            BookStatus::Published => "published",
        }
    }
}

/// A writing project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,

    /// Owner of the book
    pub user_id: UserId,

    pub title: String,

    #[serde(default)]
    pub subtitle: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub genre: Option<String>,

    /// User-set goal, always positive
    pub target_word_count: u32,

    /// Sum of chapter word counts, maintained eagerly on every save
    #[serde(default)]
    pub current_word_count: u32,

    #[serde(default)]
    pub status: BookStatus,

    #[serde(default)]
    pub is_public: bool,

    pub created_at: DateTime<Utc>,
}

/// A chapter of a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: ChapterId,

    pub book_id: BookId,

    pub title: String,

    #[serde(default)]
    pub content: Option<String>,

    /// Tokenization of `content` at the last successful save
    #[serde(default)]
    pub word_count: u32,

    /// 1-based position, dense within the book
    pub order: u32,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub last_autosave: Option<DateTime<Utc>>,
}

impl Chapter {
    /// Build a chapter appended at `order`, counting its initial content.
    pub fn new(
        book_id: BookId,
        title: impl Into<String>,
        content: Option<String>,
        order: u32,
    ) -> Self {
        let word_count = count_optional(content.as_deref());
        Self {
            id: ChapterId::generate(),
            book_id,
            title: title.into(),
            content,
            word_count,
            order,
            created_at: Utc::now(),
            last_autosave: None,
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Fields supplied when creating a book
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewBook {
    pub title: String,

    #[serde(default)]
    pub subtitle: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub genre: Option<String>,

    /// Kept signed so non-positive input can be rejected explicitly
    #[serde(default)]
    pub target_word_count: Option<i64>,
}

impl NewBook {
    /// Validate and turn into a stored book owned by `owner`.
    pub fn into_book(self, owner: UserId, default_target: u32) -> Result<Book> {
        let title = validate_title(&self.title)?;
        let target = match self.target_word_count {
            Some(raw) => validate_target(raw)?,
            None => default_target,
        };

        Ok(Book {
            id: BookId::generate(),
            user_id: owner,
            title,
            subtitle: non_empty(self.subtitle),
            description: non_empty(self.description),
            genre: non_empty(self.genre),
            target_word_count: target,
            current_word_count: 0,
            status: BookStatus::Draft,
            is_public: false,
            created_at: Utc::now(),
        })
    }
}

/// Partial update of a book's owner-editable fields
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_word_count: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BookStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

impl BookPatch {
    /// Validate the patch and render it as the partial row sent to the store.
    pub fn to_fields(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut fields = serde_json::Map::new();
        if let Some(title) = &self.title {
            fields.insert("title".into(), validate_title(title)?.into());
        }
        if let Some(subtitle) = &self.subtitle {
            fields.insert("subtitle".into(), subtitle.clone().into());
        }
        if let Some(description) = &self.description {
            fields.insert("description".into(), description.clone().into());
        }
        if let Some(genre) = &self.genre {
            fields.insert("genre".into(), genre.clone().into());
        }
        if let Some(raw) = self.target_word_count {
            fields.insert("target_word_count".into(), validate_target(raw)?.into());
        }
        if let Some(status) = self.status {
            fields.insert("status".into(), status.as_str().into());
        }
        if let Some(is_public) = self.is_public {
            fields.insert("is_public".into(), is_public.into());
        }
        Ok(fields)
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.subtitle.is_none()
            && self.description.is_none()
            && self.genre.is_none()
            && self.target_word_count.is_none()
            && self.status.is_none()
            && self.is_public.is_none()
    }
}

/// Reject non-positive (or absurdly large) word count goals.
pub fn validate_target(raw: i64) -> Result<u32> {
    if raw <= 0 {
        return Err(Error::InvalidTarget(raw));
    }
    u32::try_from(raw).map_err(|_| Error::InvalidTarget(raw))
}

/// Titles are trimmed and must not be empty.
pub fn validate_title(raw: &str) -> Result<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(Error::InvalidInput("title must not be empty".into()));
    }
    Ok(title.to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_book_defaults() {
        let book = NewBook {
            title: "  The Long Road ".into(),
            genre: Some(String::new()),
            ..NewBook::default()
        }
        .into_book(UserId::new("u1"), DEFAULT_TARGET_WORD_COUNT)
        .unwrap();

        assert_eq!(book.title, "The Long Road");
        assert_eq!(book.target_word_count, 50_000);
        assert_eq!(book.current_word_count, 0);
        assert_eq!(book.status, BookStatus::Draft);
        assert!(!book.is_public);
        assert!(book.genre.is_none());
    }

    #[test]
    fn test_target_must_be_positive() {
        let err = NewBook {
            title: "x".into(),
            target_word_count: Some(0),
            ..NewBook::default()
        }
        .into_book(UserId::new("u1"), 10)
        .unwrap_err();
        assert!(matches!(err, Error::InvalidTarget(0)));

        let patch = BookPatch {
            target_word_count: Some(-5),
            ..BookPatch::default()
        };
        assert!(matches!(patch.to_fields(), Err(Error::InvalidTarget(-5))));
    }

    #[test]
    fn test_patch_fields() {
        let patch = BookPatch {
            status: Some(BookStatus::InProgress),
            is_public: Some(true),
            ..BookPatch::default()
        };
        let fields = patch.to_fields().unwrap();
        assert_eq!(fields["status"], "in_progress");
        assert_eq!(fields["is_public"], true);
        assert_eq!(fields.len(), 2);
        assert!(BookPatch::default().is_empty());
    }

    #[test]
    fn test_chapter_counts_initial_content() {
        let chapter = Chapter::new(BookId::new("b"), "One", Some("a b c".into()), 1);
        assert_eq!(chapter.word_count, 3);
        assert!(chapter.last_autosave.is_none());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("In Progress".parse::<BookStatus>().unwrap(), BookStatus::InProgress);
        assert_eq!("published".parse::<BookStatus>().unwrap(), BookStatus::Published);
        assert!(matches!(
            "archived".parse::<BookStatus>(),
            Err(Error::InvalidInput(_))
        ));
    }
}
