//! # quire-engine
//!
//! Stateful services on top of a [`RecordStore`](quire_store::RecordStore):
//!
//! - [`ChapterService`]: chapter CRUD and the reorder engine. Move, insert,
//!   delete and recompaction run under a per-book lock, dispatch their
//!   order updates concurrently, and publish sorted snapshots to watchers.
//! - [`BookService`]: book CRUD, progress and manuscript export. Book
//!   totals are re-derived eagerly from chapter word counts.
//! - [`AutosaveCoordinator`]: the debounce/single-flight state machine for
//!   one open chapter.
//! - [`Proofreader`]: the third-party proofreading boundary.

pub mod autosave;
pub mod books;
pub mod chapters;
mod locks;
pub mod proofread;
mod records;

pub use autosave::{
    AutosaveCoordinator, AutosaveError, AutosaveSettings, AutosaveState, AutosaveStatus,
    ChapterSink, ContentSink, SavedContent,
};
pub use books::BookService;
pub use chapters::{ChapterService, ChapterSnapshot, NewChapter};
pub use proofread::{review, OpenAiProofreader, ProofreadError, Proofreader};
