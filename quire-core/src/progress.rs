//! Book progress towards its word count goal.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::Book;

/// Percentage of `target` reached by `current`, capped at 100.
pub fn progress_percent(current: u64, target: i64) -> Result<f64> {
    if target <= 0 {
        return Err(Error::InvalidTarget(target));
    }
    Ok((100.0 * current as f64 / target as f64).min(100.0))
}

/// Read-only progress view of a book
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookProgress {
    pub current_word_count: u32,
    pub target_word_count: u32,
    pub percent: f64,
    /// Words still missing; zero once the goal is reached
    pub remaining: u32,
    /// The goal is met; completing the book is still the owner's call
    pub goal_reached: bool,
}

impl BookProgress {
    pub fn of(book: &Book) -> Result<Self> {
        let percent = progress_percent(
            book.current_word_count as u64,
            book.target_word_count as i64,
        )?;
        Ok(Self {
            current_word_count: book.current_word_count,
            target_word_count: book.target_word_count,
            percent,
            remaining: book.target_word_count.saturating_sub(book.current_word_count),
            goal_reached: book.current_word_count >= book.target_word_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBook, DEFAULT_TARGET_WORD_COUNT};
    use quire_types::UserId;

    #[test]
    fn test_percent() {
        assert_eq!(progress_percent(0, 100).unwrap(), 0.0);
        assert_eq!(progress_percent(25, 100).unwrap(), 25.0);
        assert_eq!(progress_percent(100, 100).unwrap(), 100.0);
    }

    #[test]
    fn test_percent_is_capped() {
        assert_eq!(progress_percent(250_000, 50_000).unwrap(), 100.0);
        assert_eq!(progress_percent(u64::MAX, 1).unwrap(), 100.0);
    }

    #[test]
    fn test_non_positive_target() {
        assert!(matches!(progress_percent(10, 0), Err(Error::InvalidTarget(0))));
        assert!(matches!(progress_percent(10, -3), Err(Error::InvalidTarget(-3))));
    }

    #[test]
    fn test_book_progress_view() {
        let mut book = NewBook {
            title: "Draft".into(),
            ..NewBook::default()
        }
        .into_book(UserId::new("u"), DEFAULT_TARGET_WORD_COUNT)
        .unwrap();
        book.current_word_count = 12_500;

        let view = BookProgress::of(&book).unwrap();
        assert_eq!(view.percent, 25.0);
        assert_eq!(view.remaining, 37_500);
        assert!(!view.goal_reached);
    }
}
