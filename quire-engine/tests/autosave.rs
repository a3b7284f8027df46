//! Autosave state machine under paused time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use quire_core::{count_words, Error, NewBook, UserId};
use quire_engine::{
    AutosaveCoordinator, AutosaveError, AutosaveSettings, AutosaveState, BookService,
    ChapterService, ChapterSink, ContentSink, NewChapter, SavedContent,
};
use quire_store::MemoryStore;
use tokio::time::sleep;

/// Records every persist call; fails the next `fail_next` of them.
#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<String>>,
    fail_next: AtomicU32,
    delay: Duration,
}

impl RecordingSink {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ContentSink for RecordingSink {
    async fn persist(&self, content: String) -> quire_core::Result<SavedContent> {
        self.calls.lock().push(content.clone());
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let failing = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::StoreFailure("store unreachable".into()));
        }
        Ok(SavedContent {
            word_count: count_words(&content),
            saved_at: Utc::now(),
        })
    }
}

fn settings() -> AutosaveSettings {
    AutosaveSettings {
        debounce: Duration::from_secs(30),
        max_retries: 10,
        max_retry_delay: Duration::from_secs(300),
    }
}

fn start(sink: &Arc<RecordingSink>, settings: AutosaveSettings) -> AutosaveCoordinator {
    AutosaveCoordinator::spawn(sink.clone(), String::new(), settings)
}

#[tokio::test(start_paused = true)]
async fn test_edits_within_debounce_collapse_into_one_save() {
    let sink = Arc::new(RecordingSink::default());
    let session = start(&sink, settings());

    session.edit("E1");
    sleep(Duration::from_secs(10)).await;
    session.edit("E1 E2");
    assert_eq!(session.status().state, AutosaveState::Dirty);

    // Debounce restarted at the second edit.
    sleep(Duration::from_secs(25)).await;
    assert!(sink.calls().is_empty());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(sink.calls(), ["E1 E2"]);
    let status = session.status();
    assert_eq!(status.state, AutosaveState::Idle);
    assert_eq!(status.saved_word_count, 2);
    assert!(status.last_saved_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_save_retries_on_next_cycle() {
    let sink = Arc::new(RecordingSink::default());
    sink.fail_next.store(1, Ordering::SeqCst);
    let session = start(&sink, settings());

    session.edit("first draft");
    sleep(Duration::from_secs(31)).await;
    assert_eq!(sink.calls().len(), 1);
    let status = session.status();
    assert_eq!(status.state, AutosaveState::Dirty);
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.last_error.is_some());

    // Not retried immediately.
    sleep(Duration::from_secs(20)).await;
    assert_eq!(sink.calls().len(), 1);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(sink.calls(), ["first draft", "first draft"]);
    let status = session.status();
    assert_eq!(status.state, AutosaveState::Idle);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retries_pause_after_limit_until_next_edit() {
    let sink = Arc::new(RecordingSink::default());
    sink.fail_next.store(100, Ordering::SeqCst);
    let session = start(
        &sink,
        AutosaveSettings {
            max_retries: 2,
            ..settings()
        },
    );

    session.edit("x");
    sleep(Duration::from_secs(1000)).await;
    assert_eq!(sink.calls().len(), 2);
    assert_eq!(session.status().state, AutosaveState::Dirty);
    assert_eq!(session.status().consecutive_failures, 2);

    sink.fail_next.store(0, Ordering::SeqCst);
    session.edit("x y");
    sleep(Duration::from_secs(31)).await;
    assert_eq!(sink.calls().len(), 3);
    assert_eq!(session.status().state, AutosaveState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_edit_during_save_is_saved_afterwards() {
    let sink = Arc::new(RecordingSink::with_delay(Duration::from_secs(10)));
    let session = start(&sink, settings());

    session.edit("a");
    sleep(Duration::from_secs(31)).await;
    assert_eq!(session.status().state, AutosaveState::Saving);

    session.edit("a b");
    sleep(Duration::from_secs(14)).await;
    // First save resolved at t=40 without being cancelled.
    assert_eq!(sink.calls(), ["a"]);
    assert_eq!(session.status().state, AutosaveState::Dirty);
    assert_eq!(session.status().saved_word_count, 1);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(sink.calls(), ["a", "a b"]);
    let status = session.status();
    assert_eq!(status.state, AutosaveState::Idle);
    assert_eq!(status.saved_word_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_save_skips_debounce() {
    let sink = Arc::new(RecordingSink::default());
    let session = start(&sink, settings());

    session.edit("one two three");
    let saved = session.save_now().await.unwrap();
    assert_eq!(saved.word_count, 3);
    assert_eq!(sink.calls().len(), 1);

    // The pending debounce was consumed by the manual save.
    sleep(Duration::from_secs(60)).await;
    assert_eq!(sink.calls().len(), 1);
    assert_eq!(session.status().state, AutosaveState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_manual_save_joins_covering_flight() {
    let sink = Arc::new(RecordingSink::with_delay(Duration::from_secs(10)));
    let session = start(&sink, settings());

    session.edit("hello there");
    sleep(Duration::from_secs(31)).await;
    let saved = session.save_now().await.unwrap();
    assert_eq!(saved.word_count, 2);
    assert_eq!(sink.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manual_save_reports_failure() {
    let sink = Arc::new(RecordingSink::default());
    sink.fail_next.store(1, Ordering::SeqCst);
    let session = start(&sink, settings());

    session.edit("doomed");
    let err = session.save_now().await.unwrap_err();
    assert!(matches!(err, AutosaveError::SaveFailed(_)));
    assert_eq!(session.status().state, AutosaveState::Dirty);
}

#[tokio::test(start_paused = true)]
async fn test_buffer_reports_unsaved_edits() {
    let sink = Arc::new(RecordingSink::default());
    let session = AutosaveCoordinator::spawn(sink.clone(), "stored text".into(), settings());
    assert_eq!(session.buffer().await.unwrap(), "stored text");

    session.edit("typed but not saved");
    assert_eq!(session.buffer().await.unwrap(), "typed but not saved");
    assert!(sink.calls().is_empty());

    session.close().await.unwrap();
    assert_eq!(session.buffer().await, Err(AutosaveError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_close_flushes_pending_edits() {
    let sink = Arc::new(RecordingSink::default());
    let session = start(&sink, settings());

    session.edit("last words");
    let saved = session.close().await.unwrap().unwrap();
    assert_eq!(saved.word_count, 2);
    assert_eq!(sink.calls(), ["last words"]);

    let clean = start(&sink, settings());
    assert_eq!(clean.close().await, Ok(None));
    assert_eq!(sink.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_surfaces_final_failure() {
    let sink = Arc::new(RecordingSink::default());
    sink.fail_next.store(1, Ordering::SeqCst);
    let session = start(&sink, settings());

    session.edit("unsaved");
    let err = session.close().await.unwrap_err();
    assert!(matches!(err, AutosaveError::SaveFailed(_)));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_handle_still_flushes() {
    let sink = Arc::new(RecordingSink::default());
    let session = start(&sink, settings());
    session.edit("keep me");
    drop(session);

    sleep(Duration::from_millis(1)).await;
    assert_eq!(sink.calls(), ["keep me"]);
}

#[tokio::test]
async fn test_chapter_sink_persists_to_store() {
    let store = Arc::new(MemoryStore::new());
    let books = BookService::new(store.clone(), 1_000);
    let chapters = Arc::new(ChapterService::new(store.clone()));
    let owner = UserId::new("writer");

    let book = books
        .create(
            &owner,
            NewBook {
                title: "Notebook".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let chapter = chapters
        .create(
            &owner,
            &book.id,
            NewChapter {
                title: "One".into(),
                content: None,
            },
        )
        .await
        .unwrap();

    let sink = Arc::new(ChapterSink::new(chapters.clone(), owner.clone(), chapter.id.clone()));
    let session = AutosaveCoordinator::spawn(sink, String::new(), settings());
    session.edit("it was a dark and stormy night");
    let saved = session.save_now().await.unwrap();
    assert_eq!(saved.word_count, 7);
    session.close().await.unwrap();

    let stored = chapters.get(&owner, &chapter.id).await.unwrap();
    assert_eq!(stored.content.as_deref(), Some("it was a dark and stormy night"));
    assert!(stored.last_autosave.is_some());

    let progress = books.progress(&owner, &book.id).await.unwrap();
    assert_eq!(progress.current_word_count, 7);
    assert!((progress.percent - 0.7).abs() < 1e-9);
}
