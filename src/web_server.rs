use std::convert::Infallible;
use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    serve, Json, Router,
};
use futures::stream::{self, Stream};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::constants::*;
use crate::document::{extract_text, UploadedFile};
use crate::error::{AppError, SessionError};
use crate::export::write_transcript;
use crate::gateway::ModelGateway;
use crate::session::{collect_reply, Message, PendingReply, Phase, Session, TurnStart};
use crate::store::{SessionHandle, SessionStore};
use crate::turns::TurnLimiter;

/// Uploads larger than this are refused before extraction.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    sessions: Arc<SessionStore>,
    gateway: Arc<dyn ModelGateway>,
}

impl AppState {
    pub fn new(config: &Config, gateway: Arc<dyn ModelGateway>) -> Self {
        Self {
            templates: Arc::new(create_minijinja_env(config)),
            sessions: Arc::new(SessionStore::new(TurnLimiter::default())),
            gateway,
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Live session named by the request cookie. Lookups never create one;
    /// only a successful upload does.
    async fn existing(&self, headers: &HeaderMap) -> Option<(Uuid, SessionHandle)> {
        let id = session_id(headers)?;
        let handle = self.sessions.get(&id).await?;
        Some((id, handle))
    }

    async fn snapshot(&self, headers: &HeaderMap) -> SessionSnapshot {
        match self.existing(headers).await {
            Some((_, handle)) => SessionSnapshot::of(&*handle.lock().await, None),
            None => SessionSnapshot::of(&Session::new(), None),
        }
    }
}

// Minijinja Environment setup
fn create_minijinja_env(config: &Config) -> AutoReloader {
    let dir = config.templates_dir.clone();
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&dir));
        notifier.watch_path(&dir, true);
        Ok(env)
    })
}

fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
}

fn session_cookie(id: &Uuid) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"
    ))
    .map_err(|e| AppError::Internal(e.to_string()))
}

fn with_cookie(mut response: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(cookie) = cookie {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

/// What the page needs to draw the conversation.
#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub messages: Vec<Message>,
    pub exportable: bool,
    pub in_flight: bool,
    pub notice: Option<String>,
}

impl SessionSnapshot {
    fn of(session: &Session, notice: Option<String>) -> Self {
        let notice = notice.or_else(|| match session.phase() {
            Phase::NoDocument => Some(UPLOAD_REQUIRED.to_string()),
            Phase::Closed => Some(CLOSING_NOTICE.to_string()),
            Phase::DocumentLoaded | Phase::Conversing => None,
        });
        Self {
            phase: session.phase(),
            messages: session.messages().to_vec(),
            exportable: session.exportable(),
            in_flight: session.is_in_flight(),
            notice,
        }
    }
}

async fn index_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    let snapshot = state.snapshot(&headers).await;

    let env = state.templates.acquire_env()?;
    let html = env.get_template("index.html")?.render(minijinja::context! {
        title => PAGE_TITLE,
        intro => PAGE_INTRO,
        upload_label => UPLOAD_LABEL,
        chat_placeholder => CHAT_PLACEHOLDER,
        thinking => THINKING,
        download_label => EXPORT_BUTTON_LABEL,
        cursor => STREAM_CURSOR,
        user_label => EXPORT_USER_LABEL,
        assistant_label => EXPORT_ASSISTANT_LABEL,
        session => snapshot,
    })?;
    Ok(Html(html))
}

async fn snapshot_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<SessionSnapshot> {
    Json(state.snapshot(&headers).await)
}

async fn end_session_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Some(id) = session_id(&headers) {
        state.sessions.remove(&id).await;
    }
    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Ok(expired) = HeaderValue::from_str(&format!("{SESSION_COOKIE}=; Path=/; Max-Age=0")) {
        response.headers_mut().insert(header::SET_COOKIE, expired);
    }
    response
}

async fn read_upload(multipart: &mut Multipart) -> Result<UploadedFile, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let mime = field.content_type().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {e}")))?;
        let mut file = UploadedFile::new(bytes.to_vec(), mime);
        if let Some(name) = file_name {
            file = file.with_file_name(name);
        }
        return Ok(file);
    }
    Err(AppError::BadRequest("missing `file` field".to_string()))
}

async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let existing = state.existing(&headers).await;
    let file = read_upload(&mut multipart).await?;
    info!(mime = %file.declared_mime, bytes = file.bytes.len(), "document uploaded");

    if let Some((_, handle)) = &existing {
        let session = handle.lock().await;
        if session.document_text().is_some() {
            info!("document already loaded; ignoring upload");
            let snapshot = SessionSnapshot::of(&session, Some(UPLOAD_READY.to_string()));
            return Ok(Json(snapshot).into_response());
        }
    }

    // Extraction failures leave no session behind.
    let text = extract_text(file)?;
    let (id, handle, created) = state
        .sessions
        .get_or_create(existing.map(|(id, _)| id))
        .await;
    let cookie = if created {
        Some(session_cookie(&id)?)
    } else {
        None
    };

    let opening = handle.lock().await.begin_document(text);
    let notice = match opening {
        None => UPLOAD_READY.to_string(),
        Some(opening) => {
            // The opening call runs in its own task so it completes even if
            // this request is dropped, and the session lock is free while
            // the model answers.
            let task = tokio::spawn(drive_opening(
                state.gateway.clone(),
                handle.clone(),
                opening,
            ));
            match task.await {
                Ok(false) => format!("{UPLOAD_SUCCESS}{UPLOAD_READY}"),
                Ok(true) => SERVICE_ERROR_NOTICE.to_string(),
                Err(e) => {
                    let error = AppError::Internal(format!("opening task failed: {e}"));
                    return Ok(with_cookie(error.into_response(), cookie));
                }
            }
        }
    };

    info!(session = %id, "document loaded");
    let snapshot = SessionSnapshot::of(&*handle.lock().await, Some(notice));
    Ok(with_cookie(Json(snapshot).into_response(), cookie))
}

/// Asks for the opening question and stores it. Returns whether it failed.
async fn drive_opening(
    gateway: Arc<dyn ModelGateway>,
    session: SessionHandle,
    opening: String,
) -> bool {
    let reply = gateway.generate(&opening).await;
    let failed = reply.is_err();
    session.lock().await.finish_document(reply);
    failed
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Events pushed to the page while a reply is produced.
#[derive(Debug)]
enum ReplyEvent {
    Fragment(String),
    Notice(&'static str),
    Done { message: Message, exportable: bool },
}

impl ReplyEvent {
    fn into_sse(self) -> Result<Event, axum::Error> {
        match self {
            ReplyEvent::Fragment(text) => {
                Event::default().event("fragment").json_data(serde_json::json!({ "text": text }))
            }
            ReplyEvent::Notice(text) => {
                Event::default().event("notice").json_data(serde_json::json!({ "text": text }))
            }
            ReplyEvent::Done {
                message,
                exportable,
            } => Event::default().event("done").json_data(serde_json::json!({
                "message": message,
                "exportable": exportable,
            })),
        }
    }
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::BadRequest("message is empty".to_string()));
    }
    let (id, handle) = state
        .existing(&headers)
        .await
        .ok_or(SessionError::NoDocument)?;

    // Stored exactly as typed.
    let start = handle.lock().await.begin_turn(&request.message)?;
    let pending = match start {
        TurnStart::Accepted(pending) => pending,
        TurnStart::Closed => {
            info!(session = %id, "input rejected after the turn limit");
            let events = stream::iter([ReplyEvent::Notice(CLOSING_NOTICE).into_sse()]);
            return Ok(Sse::new(events).into_response());
        }
    };

    // The reply is driven by its own task so the turn is always finished,
    // even if the client goes away mid-stream.
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(drive_reply(state.gateway.clone(), handle, pending, tx));

    let events = reply_events(rx);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}

fn reply_events(
    rx: mpsc::UnboundedReceiver<ReplyEvent>,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event.into_sse(), rx))
    })
}

async fn drive_reply(
    gateway: Arc<dyn ModelGateway>,
    session: SessionHandle,
    pending: PendingReply,
    tx: mpsc::UnboundedSender<ReplyEvent>,
) {
    let reply = collect_reply(gateway.as_ref(), &pending, |fragment| {
        // A closed receiver only means the page stopped listening.
        let _ = tx.send(ReplyEvent::Fragment(fragment.to_string()));
    })
    .await;
    let failed = reply.is_err();

    let (message, exportable) = {
        let mut session = session.lock().await;
        let message = session.finish_turn(reply);
        (message, session.exportable())
    };
    if failed {
        let _ = tx.send(ReplyEvent::Notice(SERVICE_ERROR_NOTICE));
    }
    if tx.send(ReplyEvent::Done { message, exportable }).is_err() {
        warn!("client disconnected before the reply finished");
    }
}

/// `filename*` value per RFC 5987.
fn encode_filename(name: &str) -> String {
    let mut out = String::from("UTF-8''");
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

async fn export_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let (_, handle) = state
        .existing(&headers)
        .await
        .ok_or(AppError::NotExportable)?;
    let bytes = {
        let session = handle.lock().await;
        if !session.exportable() {
            return Err(AppError::NotExportable);
        }
        write_transcript(session.messages())?
    };

    let disposition = format!(
        "attachment; filename=\"reflection.docx\"; filename*={}",
        encode_filename(EXPORT_FILE_NAME)
    );
    let disposition =
        HeaderValue::from_str(&disposition).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(MIME_DOCX)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// Builds the application router around `gateway`.
pub fn build_router(config: &Config, gateway: Arc<dyn ModelGateway>) -> Router {
    router(config, AppState::new(config, gateway))
}

/// Router over an existing `state`, for callers that keep a handle on it.
pub fn router(config: &Config, state: AppState) -> Router {
    // Serve static files from the configured directory
    let static_files_service =
        ServeDir::new(&config.static_dir).not_found_service(tower::service_fn(|_| async {
            Ok::<_, Infallible>((StatusCode::NOT_FOUND, Body::from("Not Found")).into_response())
        }));

    Router::new()
        .route("/", get(index_handler))
        .route(
            "/api/session",
            get(snapshot_handler).delete(end_session_handler),
        )
        .route("/api/upload", post(upload_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/export", get(export_handler))
        .nest_service("/static", static_files_service)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

pub async fn start_web_server(
    port: u16,
    config: Arc<Config>,
    gateway: Arc<dyn ModelGateway>,
) -> Result<()> {
    let app = build_router(&config, gateway);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    info!("Web server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_is_read_from_cookie_header() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("theme=dark; {SESSION_COOKIE}={id}; other=1")).unwrap(),
        );
        assert_eq!(session_id(&headers), Some(id));
    }

    #[test]
    fn test_bad_session_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("coach_session=not-a-uuid"),
        );
        assert_eq!(session_id(&headers), None);
        assert_eq!(session_id(&HeaderMap::new()), None);
    }

    #[test]
    fn test_filename_is_percent_encoded() {
        assert_eq!(
            encode_filename("振り返り.docx"),
            "UTF-8''%E6%8C%AF%E3%82%8A%E8%BF%94%E3%82%8A.docx"
        );
        assert_eq!(encode_filename("a b.txt"), "UTF-8''a%20b.txt");
    }

    #[test]
    fn test_snapshot_notice_follows_phase() {
        let session = Session::new();
        let snapshot = SessionSnapshot::of(&session, None);
        assert_eq!(snapshot.phase, Phase::NoDocument);
        assert_eq!(snapshot.notice.as_deref(), Some(UPLOAD_REQUIRED));

        let snapshot = SessionSnapshot::of(&session, Some("custom".to_string()));
        assert_eq!(snapshot.notice.as_deref(), Some("custom"));
    }
}
