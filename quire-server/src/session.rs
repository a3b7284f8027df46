//! Live editing sessions.
//!
//! One autosave coordinator per open chapter, shared by every socket that
//! has the chapter open. The last socket to leave flushes and closes it.

use std::collections::{hash_map, HashMap};
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use quire_core::{Chapter, ChapterEvent, ChapterId, UserId};
use quire_engine::{
    AutosaveCoordinator, AutosaveError, AutosaveSettings, AutosaveStatus, ChapterService,
    ChapterSink, ChapterSnapshot, SavedContent,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

struct Entry {
    coordinator: Arc<AutosaveCoordinator>,
    sockets: usize,
}

pub struct SessionHub {
    chapters: Arc<ChapterService>,
    settings: AutosaveSettings,
    sessions: Mutex<HashMap<ChapterId, Entry>>,
}

impl SessionHub {
    pub fn new(chapters: Arc<ChapterService>, settings: AutosaveSettings) -> Self {
        Self {
            chapters,
            settings,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a socket to the chapter's session, starting one from the
    /// stored content if none is live. The returned chapter carries the
    /// live buffer, unsaved edits included.
    pub async fn join(
        &self,
        owner: &UserId,
        chapter_id: &ChapterId,
    ) -> Result<(Chapter, Arc<AutosaveCoordinator>), crate::error::ApiError> {
        // Read under the map lock: a closing session flushes while holding
        // it, so the stored content is never older than the last session.
        let mut sessions = self.sessions.lock().await;
        let mut chapter = self.chapters.get(owner, chapter_id).await?;
        let entry = match sessions.entry(chapter_id.clone()) {
            hash_map::Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                chapter.content = Some(entry.coordinator.buffer().await?);
                entry
            }
            hash_map::Entry::Vacant(vacant) => {
                debug!(%chapter_id, "editing session started");
                let sink = Arc::new(ChapterSink::new(
                    self.chapters.clone(),
                    owner.clone(),
                    chapter_id.clone(),
                ));
                vacant.insert(Entry {
                    coordinator: Arc::new(AutosaveCoordinator::spawn(
                        sink,
                        chapter.content_str().to_string(),
                        self.settings,
                    )),
                    sockets: 0,
                })
            }
        };
        entry.sockets += 1;
        Ok((chapter, entry.coordinator.clone()))
    }

    /// The chapter as its editors see it: the live buffer when a session
    /// is open, the stored content otherwise.
    pub async fn current(
        &self,
        owner: &UserId,
        chapter_id: &ChapterId,
    ) -> Result<Chapter, crate::error::ApiError> {
        let live = self
            .sessions
            .lock()
            .await
            .get(chapter_id)
            .map(|e| e.coordinator.clone());
        let mut chapter = self.chapters.get(owner, chapter_id).await?;
        if let Some(coordinator) = live {
            chapter.content = Some(coordinator.buffer().await?);
        }
        Ok(chapter)
    }

    /// Detach a socket. The last one out flushes pending edits.
    pub async fn leave(&self, chapter_id: &ChapterId) -> Result<Option<SavedContent>, AutosaveError> {
        let mut sessions = self.sessions.lock().await;
        let Some(entry) = sessions.get_mut(chapter_id) else {
            return Ok(None);
        };
        entry.sockets = entry.sockets.saturating_sub(1);
        if entry.sockets > 0 {
            return Ok(None);
        }
        // Flush while holding the map so a rejoin cannot start from stale
        // stored content.
        let closed = match sessions.remove(chapter_id) {
            Some(entry) => entry.coordinator.close().await,
            None => Ok(None),
        };
        debug!(%chapter_id, "editing session closed");
        closed
    }

    /// Persist `content` for a chapter. Goes through the live session when
    /// there is one so its buffer does not later overwrite the write.
    pub async fn save_content(
        &self,
        owner: &UserId,
        chapter_id: &ChapterId,
        content: String,
    ) -> Result<Chapter, crate::error::ApiError> {
        let live = self
            .sessions
            .lock()
            .await
            .get(chapter_id)
            .map(|e| e.coordinator.clone());
        match live {
            Some(coordinator) => {
                self.chapters.get(owner, chapter_id).await?;
                coordinator.edit(content);
                coordinator.save_now().await?;
                Ok(self.chapters.get(owner, chapter_id).await?)
            }
            None => Ok(self.chapters.save_content(owner, chapter_id, content).await?),
        }
    }

    pub async fn live(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Flush every live session. Used on shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<(ChapterId, Entry)> = self.sessions.lock().await.drain().collect();
        for (chapter_id, entry) in drained {
            if let Err(err) = entry.coordinator.close().await {
                warn!(%chapter_id, %err, "unsaved edits lost at shutdown");
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Edit { content: String },
    Save,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChapterMessage {
    Snapshot { chapter: Chapter },
    Status { status: AutosaveStatus },
    Saved { saved: SavedContent },
    Error { message: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BookMessage {
    Chapters { chapters: Vec<Chapter> },
    Event { event: ChapterEvent },
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, msg: &T) -> bool {
    match serde_json::to_string(msg) {
        Ok(text) => socket.send(WsMessage::Text(text.into())).await.is_ok(),
        Err(err) => {
            warn!(%err, "failed to encode websocket message");
            true
        }
    }
}

/// Drive one editor socket until it closes.
pub async fn run_chapter_socket(
    mut socket: WebSocket,
    hub: Arc<SessionHub>,
    chapter: Chapter,
    coordinator: Arc<AutosaveCoordinator>,
) {
    let chapter_id = chapter.id.clone();

    let opened = send_json(&mut socket, &ChapterMessage::Snapshot { chapter }).await
        && send_json(
            &mut socket,
            &ChapterMessage::Status {
                status: coordinator.status(),
            },
        )
        .await;
    if opened {
        pump_editor(&mut socket, &coordinator, &chapter_id).await;
    }

    match hub.leave(&chapter_id).await {
        Ok(Some(saved)) => info!(%chapter_id, words = saved.word_count, "flushed on close"),
        Ok(None) => {}
        Err(err) => warn!(%chapter_id, %err, "edits not saved when the editor closed"),
    }
}

async fn pump_editor(
    socket: &mut WebSocket,
    coordinator: &AutosaveCoordinator,
    chapter_id: &ChapterId,
) {
    let mut status_rx = coordinator.watch();
    loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                if !send_json(socket, &ChapterMessage::Status { status }).await {
                    break;
                }
            }
            inbound = socket.recv() => {
                let reply = match inbound {
                    Some(Ok(WsMessage::Text(txt))) => match serde_json::from_str::<ClientMessage>(&txt) {
                        Ok(ClientMessage::Edit { content }) => {
                            coordinator.edit(content);
                            None
                        }
                        Ok(ClientMessage::Save) => Some(match coordinator.save_now().await {
                            Ok(saved) => ChapterMessage::Saved { saved },
                            Err(err) => ChapterMessage::Error { message: err.to_string() },
                        }),
                        Err(err) => {
                            warn!(%chapter_id, %err, "ignoring malformed editor message");
                            Some(ChapterMessage::Error { message: err.to_string() })
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(%chapter_id, %err, "editor socket error");
                        break;
                    }
                    _ => None,
                };
                if let Some(reply) = reply {
                    if !send_json(socket, &reply).await {
                        break;
                    }
                }
            }
        }
    }
}

/// Stream a book's chapter list and change events to an overview socket.
pub async fn run_book_socket(
    mut socket: WebSocket,
    mut snapshots: watch::Receiver<ChapterSnapshot>,
    mut events: broadcast::Receiver<ChapterEvent>,
    book_id: quire_core::BookId,
) {
    let initial = (**snapshots.borrow_and_update()).clone();
    if !send_json(&mut socket, &BookMessage::Chapters { chapters: initial }).await {
        return;
    }

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let chapters = (**snapshots.borrow_and_update()).clone();
                if !send_json(&mut socket, &BookMessage::Chapters { chapters }).await {
                    break;
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) if event.book_id() == &book_id => {
                        if !send_json(&mut socket, &BookMessage::Event { event }).await {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!(%book_id, missed, "book socket lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}
