use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use quire_core::{
    apply_emphasis, apply_suggestion, BookId, BookPatch, ChapterId, Emphasis, LocatedSuggestion,
    NewBook, UserId,
};
use quire_engine::{review, BookService, ChapterService, NewChapter, Proofreader};
use quire_store::RecordStore;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    auth::{AuthError, AuthState, Owner},
    config::ServerConfig,
    error::{ApiError, ApiResult},
    ratelimit::RateLimiter,
    session::{run_book_socket, run_chapter_socket, SessionHub},
};

/// Idle rate-limit buckets are dropped after this long.
const BUCKET_MAX_AGE: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct AppState {
    pub books: Arc<BookService>,
    pub chapters: Arc<ChapterService>,
    pub sessions: Arc<SessionHub>,
    pub proofreader: Option<Arc<dyn Proofreader>>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        config: &ServerConfig,
        proofreader: Option<Arc<dyn Proofreader>>,
    ) -> Self {
        let chapters = Arc::new(ChapterService::new(store.clone()));
        Self {
            books: Arc::new(BookService::new(
                store,
                config.app.books.default_target_word_count,
            )),
            sessions: Arc::new(SessionHub::new(chapters.clone(), config.autosave())),
            chapters,
            proofreader,
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
        }
    }
}

pub fn router(state: AppState, auth_state: AuthState) -> Router {
    Router::new()
        // Public endpoints (no auth required)
        .route("/healthz", get(healthz))
        // Books
        .route("/api/books", get(list_books).post(create_book))
        .route("/api/books/public", get(list_public_books))
        .route(
            "/api/books/{book_id}",
            get(get_book).patch(update_book).delete(delete_book),
        )
        .route("/api/books/{book_id}/progress", get(book_progress))
        .route("/api/books/{book_id}/manuscript", get(book_manuscript))
        .route(
            "/api/books/{book_id}/chapters",
            get(list_chapters).post(create_chapter),
        )
        .route("/api/books/{book_id}/chapters/recompact", post(recompact))
        // Chapters
        .route(
            "/api/chapters/{chapter_id}",
            get(get_chapter).patch(rename_chapter).delete(delete_chapter),
        )
        .route("/api/chapters/{chapter_id}/order", put(move_chapter))
        .route("/api/chapters/{chapter_id}/content", put(save_content))
        .route("/api/chapters/{chapter_id}/proofread", post(proofread))
        .route(
            "/api/chapters/{chapter_id}/suggestions/apply",
            post(apply_suggestion_to_chapter),
        )
        .route("/api/format", post(format_selection))
        // Live editing
        .route("/ws/chapters/{chapter_id}", get(ws_chapter))
        .route("/ws/books/{book_id}", get(ws_book))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(auth_state))
        .with_state(state)
}

pub async fn serve(config: ServerConfig) -> Result<()> {
    let store = config.build_store()?;
    let proofreader = config.build_proofreader();

    let auth_state = AuthState {
        keystore: Arc::new(config.auth.build_keystore()),
        require_auth: config.auth.require_auth,
    };
    if !auth_state.keystore.has_keys() {
        info!("no JWT secret configured; requests act as the anonymous owner");
    }

    let state = AppState::new(store, &config, proofreader);
    state.rate_limiter.spawn_cleanup(BUCKET_MAX_AGE);
    let sessions = state.sessions.clone();
    let app = router(state, auth_state);

    info!(addr = %config.listen_addr, "quire listening");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("flushing open editing sessions");
    sessions.close_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Spend one write token for `owner`.
async fn check_rate_limit(state: &AppState, owner: &UserId) -> Result<(), AuthError> {
    if let Err(retry_after) = state.rate_limiter.check(owner.as_str()).await {
        return Err(AuthError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        });
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Books
// ─────────────────────────────────────────────────────────────────────────────

async fn list_books(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.books.list(&owner).await?))
}

/// Every owner's public books. Still goes through `Owner` so a daemon
/// that requires tokens does not list them to anonymous callers.
async fn list_public_books(
    State(state): State<AppState>,
    Owner(_): Owner,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.books.list_public().await?))
}

async fn create_book(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(new): Json<NewBook>,
) -> ApiResult<impl IntoResponse> {
    check_rate_limit(&state, &owner).await?;
    let book = state.books.create(&owner, new).await?;
    Ok((StatusCode::CREATED, Json(book)))
}

async fn get_book(
    Path(book_id): Path<BookId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.books.get(&owner, &book_id).await?))
}

async fn update_book(
    Path(book_id): Path<BookId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(patch): Json<BookPatch>,
) -> ApiResult<impl IntoResponse> {
    check_rate_limit(&state, &owner).await?;
    Ok(Json(state.books.update(&owner, &book_id, patch).await?))
}

async fn delete_book(
    Path(book_id): Path<BookId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    check_rate_limit(&state, &owner).await?;
    state.books.delete(&owner, &book_id).await?;
    state.chapters.forget_book(&book_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn book_progress(
    Path(book_id): Path<BookId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.books.progress(&owner, &book_id).await?))
}

async fn book_manuscript(
    Path(book_id): Path<BookId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    let markdown = state.books.manuscript(&owner, &book_id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        markdown,
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chapters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateChapterRequest {
    #[serde(flatten)]
    chapter: NewChapter,
    /// 1-based position; appended when absent
    position: Option<i64>,
}

async fn list_chapters(
    Path(book_id): Path<BookId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chapters.list(&owner, &book_id).await?))
}

async fn create_chapter(
    Path(book_id): Path<BookId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<CreateChapterRequest>,
) -> ApiResult<impl IntoResponse> {
    check_rate_limit(&state, &owner).await?;
    let chapter = match req.position {
        Some(position) => {
            state
                .chapters
                .insert_chapter_at(&owner, &book_id, req.chapter, position)
                .await?
                .0
        }
        None => state.chapters.create(&owner, &book_id, req.chapter).await?,
    };
    Ok((StatusCode::CREATED, Json(chapter)))
}

async fn recompact(
    Path(book_id): Path<BookId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    check_rate_limit(&state, &owner).await?;
    Ok(Json(state.chapters.recompact(&owner, &book_id).await?))
}

async fn get_chapter(
    Path(chapter_id): Path<ChapterId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chapters.get(&owner, &chapter_id).await?))
}

#[derive(Deserialize)]
struct RenameRequest {
    title: String,
}

async fn rename_chapter(
    Path(chapter_id): Path<ChapterId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<RenameRequest>,
) -> ApiResult<impl IntoResponse> {
    check_rate_limit(&state, &owner).await?;
    Ok(Json(
        state.chapters.rename(&owner, &chapter_id, &req.title).await?,
    ))
}

async fn delete_chapter(
    Path(chapter_id): Path<ChapterId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> ApiResult<impl IntoResponse> {
    check_rate_limit(&state, &owner).await?;
    Ok(Json(state.chapters.delete(&owner, &chapter_id).await?))
}

#[derive(Deserialize)]
struct MoveRequest {
    order: i64,
}

async fn move_chapter(
    Path(chapter_id): Path<ChapterId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<MoveRequest>,
) -> ApiResult<impl IntoResponse> {
    check_rate_limit(&state, &owner).await?;
    Ok(Json(
        state
            .chapters
            .move_chapter(&owner, &chapter_id, req.order)
            .await?,
    ))
}

#[derive(Deserialize)]
struct ContentRequest {
    content: String,
}

async fn save_content(
    Path(chapter_id): Path<ChapterId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(req): Json<ContentRequest>,
) -> ApiResult<impl IntoResponse> {
    check_rate_limit(&state, &owner).await?;
    let chapter = state
        .sessions
        .save_content(&owner, &chapter_id, req.content)
        .await?;
    Ok(Json(chapter))
}

// ─────────────────────────────────────────────────────────────────────────────
// Proofreading and formatting
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct ProofreadRequest {
    start: Option<usize>,
    end: Option<usize>,
}

impl ProofreadRequest {
    fn selection(&self, len: usize) -> Option<Range<usize>> {
        if self.start.is_none() && self.end.is_none() {
            return None;
        }
        Some(self.start.unwrap_or(0)..self.end.unwrap_or(len))
    }
}

async fn proofread(
    Path(chapter_id): Path<ChapterId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
    body: Option<Json<ProofreadRequest>>,
) -> ApiResult<impl IntoResponse> {
    let proofreader = state
        .proofreader
        .clone()
        .ok_or(ApiError::Unavailable("proofreading"))?;
    check_rate_limit(&state, &owner).await?;

    let req = body.map(|Json(req)| req).unwrap_or_default();
    let chapter = state.sessions.current(&owner, &chapter_id).await?;
    let content = chapter.content_str();
    let suggestions = review(
        proofreader.as_ref(),
        content,
        req.selection(content.len()),
    )
    .await?;
    Ok(Json(suggestions))
}

async fn apply_suggestion_to_chapter(
    Path(chapter_id): Path<ChapterId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(located): Json<LocatedSuggestion>,
) -> ApiResult<impl IntoResponse> {
    check_rate_limit(&state, &owner).await?;
    let chapter = state.sessions.current(&owner, &chapter_id).await?;
    let content = apply_suggestion(chapter.content_str(), &located)?;
    let chapter = state
        .sessions
        .save_content(&owner, &chapter_id, content)
        .await?;
    Ok(Json(chapter))
}

#[derive(Deserialize)]
struct FormatRequest {
    content: String,
    start: usize,
    end: usize,
    emphasis: Emphasis,
}

async fn format_selection(Json(req): Json<FormatRequest>) -> ApiResult<impl IntoResponse> {
    let formatted = apply_emphasis(&req.content, req.start..req.end, req.emphasis)?;
    Ok(Json(json!({
        "content": formatted.content,
        "cursor": formatted.cursor,
    })))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSockets
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_chapter(
    Path(chapter_id): Path<ChapterId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
    ws: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    state.chapters.get(&owner, &chapter_id).await?;
    let hub = state.sessions.clone();
    Ok(ws.on_upgrade(move |socket| async move {
        let joined = hub.join(&owner, &chapter_id).await;
        match joined {
            Ok((chapter, coordinator)) => {
                run_chapter_socket(socket, hub, chapter, coordinator).await
            }
            Err(err) => warn!(%chapter_id, ?err, "could not open editing session"),
        }
    }))
}

async fn ws_book(
    Path(book_id): Path<BookId>,
    State(state): State<AppState>,
    Owner(owner): Owner,
    ws: WebSocketUpgrade,
) -> ApiResult<impl IntoResponse> {
    let snapshots = state.chapters.subscribe(&owner, &book_id).await?;
    let events = state.chapters.events();
    Ok(ws.on_upgrade(move |socket| run_book_socket(socket, snapshots, events, book_id)))
}
