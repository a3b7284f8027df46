//! # quire-core
//!
//! Core library for the quire writing-project manager.
//!
//! This crate holds everything that can be reasoned about without a network:
//! the book/chapter content model, the dense chapter order index and its
//! move/compaction planner, the word counting rule, progress arithmetic,
//! and the small text helpers the editor relies on.

pub mod config;
pub mod error;
pub mod format;
pub mod manuscript;
pub mod models;
pub mod order;
pub mod progress;
pub mod suggest;
pub mod words;

pub use config::Config;
pub use error::{EntityKind, Error, Result};
pub use format::{apply_emphasis, Emphasis, Formatted};
pub use manuscript::render_manuscript;
pub use models::{Book, BookPatch, BookStatus, Chapter, NewBook};
pub use order::{
    append_order, check_dense, compact_after_delete, move_chapter, recompact, OrderIndex,
    OrderPlan, OrderUpdate,
};
pub use progress::{progress_percent, BookProgress};
pub use suggest::{apply_suggestion, locate_suggestions, LocatedSuggestion, Suggestion, SuggestionCategory};
pub use words::count_words;

pub use quire_types::{BookId, ChapterEvent, ChapterId, UserId};
