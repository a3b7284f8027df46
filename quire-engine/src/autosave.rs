//! Autosave coordination for one open chapter.
//!
//! A session is a task that owns the editor buffer's latest value, one
//! debounce deadline and at most one in-flight persist call:
//!
//! ```text
//!   edit ──► Dirty ──(quiet for debounce)──► Saving ──ok──► Idle
//!              ▲                               │
//!              └──────────── error / edits ◄───┘
//! ```
//!
//! Edits are fire-and-forget messages, so typing never waits on the store.
//! An edit that arrives while a save is in flight re-arms the deadline;
//! the follow-up save starts once the in-flight one resolves. After a
//! failure the next attempt waits `debounce * 2^(k-1)` (capped) for the
//! k-th consecutive failure, and automatic attempts stop after
//! `max_retries` until the next edit or manual save.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use quire_core::{config::AutosaveConfig, count_words, ChapterId, UserId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::chapters::ChapterService;

/// Where a session's content goes.
#[async_trait]
pub trait ContentSink: Send + Sync + 'static {
    async fn persist(&self, content: String) -> quire_core::Result<SavedContent>;
}

/// Outcome of a successful persist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedContent {
    pub word_count: u32,
    pub saved_at: DateTime<Utc>,
}

/// Persists into a stored chapter on behalf of its owner.
pub struct ChapterSink {
    chapters: Arc<ChapterService>,
    owner: UserId,
    chapter_id: ChapterId,
}

impl ChapterSink {
    pub fn new(chapters: Arc<ChapterService>, owner: UserId, chapter_id: ChapterId) -> Self {
        Self {
            chapters,
            owner,
            chapter_id,
        }
    }
}

#[async_trait]
impl ContentSink for ChapterSink {
    async fn persist(&self, content: String) -> quire_core::Result<SavedContent> {
        let chapter = self
            .chapters
            .save_content(&self.owner, &self.chapter_id, content)
            .await?;
        Ok(SavedContent {
            word_count: chapter.word_count,
            saved_at: chapter.last_autosave.unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutosaveError {
    #[error("editing session is closed")]
    Closed,

    #[error("save failed: {0}")]
    SaveFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AutosaveState {
    /// Buffer matches the last successful save
    Idle,
    /// Unsaved edits are waiting for the debounce deadline
    Dirty,
    /// A persist call is in flight
    Saving,
}

/// Observable state of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutosaveStatus {
    pub state: AutosaveState,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub saved_word_count: u32,
    pub buffer_word_count: u32,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveSettings {
    pub debounce: Duration,
    pub max_retries: u32,
    pub max_retry_delay: Duration,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self::from(&AutosaveConfig::default())
    }
}

impl From<&AutosaveConfig> for AutosaveSettings {
    fn from(config: &AutosaveConfig) -> Self {
        Self {
            debounce: config.debounce(),
            max_retries: config.max_retries,
            max_retry_delay: config.max_retry_delay(),
        }
    }
}

impl AutosaveSettings {
    /// Delay before the next automatic attempt after `failures`
    /// consecutive failures.
    pub fn retry_delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.debounce
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

type SaveReply = oneshot::Sender<Result<SavedContent, AutosaveError>>;

enum Command {
    Edit(String),
    SaveNow(SaveReply),
    Buffer(oneshot::Sender<String>),
    Close(oneshot::Sender<Result<Option<SavedContent>, AutosaveError>>),
}

/// Handle to one chapter's autosave session.
pub struct AutosaveCoordinator {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<AutosaveStatus>,
}

impl AutosaveCoordinator {
    /// Start a session whose buffer initially holds the stored `content`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(sink: Arc<dyn ContentSink>, content: String, settings: AutosaveSettings) -> Self {
        let words = count_words(&content);
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(AutosaveStatus {
            state: AutosaveState::Idle,
            last_saved_at: None,
            saved_word_count: words,
            buffer_word_count: words,
            consecutive_failures: 0,
            last_error: None,
        });

        let session = Session {
            sink,
            settings,
            commands: rx,
            status: status_tx,
            buffer: content,
            generation: 0,
            saved_generation: 0,
            deadline: None,
            in_flight: None,
            waiters: Vec::new(),
            failures: 0,
            closing: false,
            close_reply: None,
            done: false,
        };
        tokio::spawn(session.run());

        Self { commands, status }
    }

    /// Record the buffer's new content. Never blocks; if the session has
    /// ended the edit is dropped and the caller keeps its buffer.
    pub fn edit(&self, content: impl Into<String>) {
        if self.commands.send(Command::Edit(content.into())).is_err() {
            warn!("edit after autosave session ended");
        }
    }

    /// Save now, skipping the debounce. Resolves with the outcome of the
    /// save covering the buffer as of this call.
    pub async fn save_now(&self) -> Result<SavedContent, AutosaveError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SaveNow(reply))
            .map_err(|_| AutosaveError::Closed)?;
        rx.await.map_err(|_| AutosaveError::Closed)?
    }

    /// The buffer as of every edit sent before this call, saved or not.
    pub async fn buffer(&self) -> Result<String, AutosaveError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Buffer(reply))
            .map_err(|_| AutosaveError::Closed)?;
        rx.await.map_err(|_| AutosaveError::Closed)
    }

    /// Flush pending content and end the session. `None` means there was
    /// nothing left to save. Later edits are dropped.
    pub async fn close(&self) -> Result<Option<SavedContent>, AutosaveError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Close(reply))
            .map_err(|_| AutosaveError::Closed)?;
        rx.await.map_err(|_| AutosaveError::Closed)?
    }

    pub fn status(&self) -> AutosaveStatus {
        self.status.borrow().clone()
    }

    /// Receiver that sees every status change.
    pub fn watch(&self) -> watch::Receiver<AutosaveStatus> {
        self.status.clone()
    }
}

struct InFlight {
    generation: u64,
    future: BoxFuture<'static, quire_core::Result<SavedContent>>,
}

struct Session {
    sink: Arc<dyn ContentSink>,
    settings: AutosaveSettings,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<AutosaveStatus>,

    buffer: String,
    /// Bumped on every edit
    generation: u64,
    /// Newest generation known to be persisted
    saved_generation: u64,

    deadline: Option<Instant>,
    in_flight: Option<InFlight>,
    /// Manual saves waiting for a save covering their generation
    waiters: Vec<(u64, SaveReply)>,
    failures: u32,

    closing: bool,
    close_reply: Option<oneshot::Sender<Result<Option<SavedContent>, AutosaveError>>>,
    done: bool,
}

impl Session {
    async fn run(mut self) {
        while !self.done {
            let deadline = match self.in_flight {
                None => self.deadline,
                Some(_) => None,
            };

            tokio::select! {
                command = self.commands.recv(), if !self.closing => match command {
                    Some(Command::Edit(content)) => self.on_edit(content),
                    Some(Command::SaveNow(reply)) => self.on_save_now(reply),
                    Some(Command::Buffer(reply)) => {
                        let _ = reply.send(self.buffer.clone());
                    }
                    Some(Command::Close(reply)) => self.on_close(Some(reply)),
                    // Handle dropped without close: still flush.
                    None => self.on_close(None),
                },
                (generation, result) = wait_in_flight(&mut self.in_flight) => {
                    self.on_saved(generation, result);
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.start_save();
                }
            }
        }
        debug!("autosave session ended");
    }

    fn on_edit(&mut self, content: String) {
        self.buffer = content;
        self.generation += 1;
        self.deadline = Some(Instant::now() + self.settings.debounce);
        self.publish(None);
    }

    fn on_save_now(&mut self, reply: SaveReply) {
        self.waiters.push((self.generation, reply));
        match self.in_flight.as_ref().map(|flight| flight.generation) {
            None => self.start_save(),
            // The in-flight save already covers this buffer.
            Some(generation) if generation == self.generation => {}
            // Follow up as soon as the in-flight save resolves.
            Some(_) => self.deadline = Some(Instant::now()),
        }
    }

    fn on_close(&mut self, reply: Option<oneshot::Sender<Result<Option<SavedContent>, AutosaveError>>>) {
        self.closing = true;
        self.close_reply = reply;
        self.deadline = None;

        if self.in_flight.is_some() {
            return;
        }
        if self.is_dirty() {
            self.start_save();
        } else {
            self.finish(Ok(None));
        }
    }

    fn start_save(&mut self) {
        self.deadline = None;
        let generation = self.generation;
        let content = self.buffer.clone();
        let sink = self.sink.clone();
        debug!(generation, bytes = content.len(), "autosave started");

        self.in_flight = Some(InFlight {
            generation,
            future: Box::pin(async move { sink.persist(content).await }),
        });
        self.publish(None);
    }

    fn on_saved(&mut self, generation: u64, result: quire_core::Result<SavedContent>) {
        self.in_flight = None;

        match result {
            Ok(saved) => {
                self.failures = 0;
                self.saved_generation = self.saved_generation.max(generation);
                debug!(generation, words = saved.word_count, "autosave succeeded");
                self.answer_waiters(generation, Ok(saved.clone()));
                self.publish(Some(Ok(&saved)));

                if self.closing {
                    if self.is_dirty() {
                        self.start_save();
                    } else {
                        self.finish(Ok(Some(saved)));
                    }
                }
            }
            Err(err) => {
                self.failures += 1;
                let message = err.to_string();
                warn!(generation, failures = self.failures, error = %message, "autosave failed");
                self.answer_waiters(generation, Err(AutosaveError::SaveFailed(message.clone())));

                if self.closing {
                    self.publish(Some(Err(&message)));
                    self.finish(Err(AutosaveError::SaveFailed(message)));
                    return;
                }

                // Newer edits already armed the deadline.
                if self.generation == generation {
                    if self.failures < self.settings.max_retries {
                        self.deadline =
                            Some(Instant::now() + self.settings.retry_delay(self.failures));
                    } else {
                        info!(failures = self.failures, "autosave retries paused until next edit");
                        self.deadline = None;
                    }
                }
                self.publish(Some(Err(&message)));
            }
        }
    }

    fn answer_waiters(&mut self, generation: u64, outcome: Result<SavedContent, AutosaveError>) {
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|(wanted, _)| *wanted <= generation);
        self.waiters = pending;
        for (_, reply) in ready {
            let _ = reply.send(outcome.clone());
        }
    }

    fn finish(&mut self, outcome: Result<Option<SavedContent>, AutosaveError>) {
        if let Some(reply) = self.close_reply.take() {
            let _ = reply.send(outcome);
        }
        // Remaining manual saves see the session as closed.
        self.waiters.clear();
        self.done = true;
    }

    fn is_dirty(&self) -> bool {
        self.generation != self.saved_generation
    }

    fn publish(&self, outcome: Option<Result<&SavedContent, &String>>) {
        let state = if self.in_flight.is_some() {
            AutosaveState::Saving
        } else if self.is_dirty() || self.failures > 0 {
            AutosaveState::Dirty
        } else {
            AutosaveState::Idle
        };
        let buffer_word_count = count_words(&self.buffer);
        let failures = self.failures;

        self.status.send_modify(|status| {
            status.state = state;
            status.buffer_word_count = buffer_word_count;
            status.consecutive_failures = failures;
            match outcome {
                Some(Ok(saved)) => {
                    status.last_saved_at = Some(saved.saved_at);
                    status.saved_word_count = saved.word_count;
                    status.last_error = None;
                }
                Some(Err(message)) => status.last_error = Some(message.clone()),
                None => {}
            }
        });
    }
}

async fn wait_in_flight(
    slot: &mut Option<InFlight>,
) -> (u64, quire_core::Result<SavedContent>) {
    match slot {
        Some(flight) => (flight.generation, (&mut flight.future).await),
        None => std::future::pending().await,
    }
}
