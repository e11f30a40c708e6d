//! SSE session engine.
//!
//! Every MCP client holds one long-lived `GET /sse` stream and POSTs its
//! JSON-RPC traffic to the per-session message endpoint announced in the
//! opening `event: endpoint` frame (a plain URI, never JSON). Responses are
//! written back to the owning stream as `data:` frames and mirrored in the
//! HTTP response body, because clients consume either path.
//!
//! The session table is the single writer for session state. Per-session
//! writes are serialized through a bounded channel; a write to a gone client
//! deregisters the session instead of retrying.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{Principal, peer_identity};
use crate::errors::codes;
use crate::mcp::{Dispatcher, JsonRpcRequest};
use crate::runtime::SessionSettings;

/// Path clients POST their JSON-RPC messages to.
pub const MESSAGES_PATH: &str = "/messages";

/// Buffered frames per session before the client counts as gone.
const SESSION_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct SessionTable {
    inner: Arc<Inner>,
}

struct Inner {
    settings: SessionSettings,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

struct SessionEntry {
    tx: mpsc::Sender<Event>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    principal: String,
}

impl SessionTable {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a session, evicting the least-recently-active one when the
    /// global bound is hit.
    pub fn open(&self, principal: &str) -> (Uuid, mpsc::Receiver<Event>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        let mut sessions = self.inner.write_sessions();
        if sessions.len() >= self.inner.settings.max_sessions {
            let evict = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_activity())
                .map(|(id, _)| *id);
            if let Some(evicted) = evict
                && let Some(entry) = sessions.remove(&evicted)
            {
                info!(
                    session_id = %evicted,
                    principal = %entry.principal,
                    age_secs = entry.created_at.elapsed().as_secs(),
                    "evicted least-recently-active session"
                );
            }
        }

        let now = Instant::now();
        sessions.insert(
            id,
            SessionEntry {
                tx,
                created_at: now,
                last_activity: Mutex::new(now),
                principal: principal.to_string(),
            },
        );
        debug!(session_id = %id, principal = %principal, "session opened");
        (id, rx)
    }

    /// Mark activity. Returns false for unknown or expired sessions.
    pub fn touch(&self, id: Uuid) -> bool {
        let sessions = self.inner.read_sessions();
        match sessions.get(&id) {
            Some(entry) => {
                entry.touch();
                true
            }
            None => false,
        }
    }

    /// Serialize one frame onto the session's stream. A refused write means
    /// the client is gone; the session is deregistered, not retried.
    pub fn send(&self, id: Uuid, event: Event) -> bool {
        let delivered = {
            let sessions = self.inner.read_sessions();
            match sessions.get(&id) {
                Some(entry) => entry.tx.try_send(event).is_ok(),
                None => return false,
            }
        };

        if !delivered {
            warn!(session_id = %id, "stream write refused, deregistering session");
            self.remove(id);
        }
        delivered
    }

    pub fn remove(&self, id: Uuid) -> bool {
        self.inner.remove(id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.read_sessions().len()
    }

    /// Close sessions idle past the configured timeout. Returns how many.
    pub fn sweep_idle(&self) -> usize {
        let idle_timeout = self.inner.settings.idle_timeout;
        let mut sessions = self.inner.write_sessions();
        let expired: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, entry)| entry.last_activity().elapsed() >= idle_timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(entry) = sessions.remove(id) {
                info!(session_id = %id, principal = %entry.principal, "closed idle session");
            }
        }
        expired.len()
    }

    /// Background sweeper at a coarse interval.
    pub fn spawn_sweeper(&self, cancellation: CancellationToken) {
        let table = self.clone();
        let interval = self.inner.settings.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = table.sweep_idle();
                        if swept > 0 {
                            debug!(swept, "idle sweep");
                        }
                    }
                }
            }
        });
    }

    fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    fn guard(&self, id: Uuid) -> SessionGuard {
        SessionGuard {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Inner {
    fn read_sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, SessionEntry>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_sessions(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, SessionEntry>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn remove(&self, id: Uuid) -> bool {
        self.write_sessions().remove(&id).is_some()
    }
}

impl SessionEntry {
    fn last_activity(&self) -> Instant {
        match self.last_activity.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn touch(&self) {
        if let Ok(mut guard) = self.last_activity.lock() {
            *guard = Instant::now();
        }
    }
}

/// Deregisters the session when its response stream drops, whichever side
/// closed first.
struct SessionGuard {
    id: Uuid,
    inner: Weak<Inner>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade()
            && inner.remove(self.id)
        {
            debug!(session_id = %self.id, "session stream closed");
        }
    }
}

#[derive(Clone)]
pub struct SseState {
    pub sessions: SessionTable,
    pub dispatcher: Arc<Dispatcher>,
}

/// The protected transport surface: `GET /sse` and `POST /messages`.
pub fn routes(state: SseState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/sse", get(open_session))
        .route(MESSAGES_PATH, post(deliver_message))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

/// `GET /sse`: allocate a session and stream frames. The first frame names
/// the message endpoint; keepalive comments follow every 30 seconds.
#[tracing::instrument(skip_all)]
async fn open_session(State(state): State<SseState>, request: Request) -> Response {
    let principal = request
        .extensions()
        .get::<Principal>()
        .map(|p| p.subject.clone())
        .unwrap_or_else(|| peer_identity(&request));

    let (id, rx) = state.sessions.open(&principal);
    let keepalive = state.sessions.settings().keepalive;

    let endpoint = format!("{MESSAGES_PATH}?session_id={id}");
    let bootstrap = Event::default().event("endpoint").data(endpoint);

    let guard = state.sessions.guard(id);
    let frames = ReceiverStream::new(rx).map(move |event| {
        let _session = &guard;
        Ok::<Event, Infallible>(event)
    });
    let stream = futures::stream::once(async move { Ok(bootstrap) }).chain(frames);

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(keepalive).text("keepalive"))
        .into_response()
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: Uuid,
}

/// `POST /messages?session_id=<id>`: bind a JSON-RPC message to a session.
/// Notifications return 204; requests are answered on both the stream and
/// the HTTP body.
#[tracing::instrument(skip_all, fields(session_id = %query.session_id))]
async fn deliver_message(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    Json(payload): Json<Value>,
) -> Response {
    if !state.sessions.touch(query.session_id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "unknown_session",
                "message": "session is missing or expired; reconnect to /sse",
            })),
        )
            .into_response();
    }

    let request: JsonRpcRequest = match serde_json::from_value(payload) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "jsonrpc": "2.0",
                    "id": null,
                    "error": {
                        "code": codes::PARSE_ERROR,
                        "message": format!("malformed JSON-RPC message: {e}"),
                    },
                })),
            )
                .into_response();
        }
    };

    let Some(response) = state.dispatcher.dispatch(request).await else {
        return StatusCode::NO_CONTENT.into_response();
    };

    let rendered = match serde_json::to_string(&response) {
        Ok(rendered) => rendered,
        Err(e) => {
            warn!("response serialization failed: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    state
        .sessions
        .send(query.session_id, Event::default().data(rendered.clone()));

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        rendered,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(max_sessions: usize, idle_timeout: Duration) -> SessionSettings {
        SessionSettings {
            max_sessions,
            idle_timeout,
            sweep_interval: Duration::from_secs(60),
            keepalive: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn sessions_open_and_count() {
        let table = SessionTable::new(settings(10, Duration::from_secs(300)));
        let (id, _rx) = table.open("client-1");
        assert_eq!(table.active_count(), 1);
        assert!(table.touch(id));
        assert!(table.remove(id));
        assert!(!table.touch(id));
    }

    #[tokio::test]
    async fn the_bound_evicts_the_least_recently_active_session() {
        let table = SessionTable::new(settings(2, Duration::from_secs(300)));
        let (first, _first_rx) = table.open("a");
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (second, mut second_rx) = table.open("b");

        // Touch the oldest so the other becomes the eviction candidate.
        assert!(table.touch(first));
        let (_third, _third_rx) = table.open("c");

        assert_eq!(table.active_count(), 2);
        assert!(table.touch(first));
        assert!(!table.touch(second));
        // The evicted session's channel is closed.
        assert!(matches!(
            second_rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn idle_sessions_are_swept() {
        let table = SessionTable::new(settings(10, Duration::ZERO));
        let (_id, _rx) = table.open("sleepy");
        assert_eq!(table.sweep_idle(), 1);
        assert_eq!(table.active_count(), 0);
    }

    #[tokio::test]
    async fn active_sessions_survive_the_sweep() {
        let table = SessionTable::new(settings(10, Duration::from_secs(300)));
        let (_id, _rx) = table.open("busy");
        assert_eq!(table.sweep_idle(), 0);
        assert_eq!(table.active_count(), 1);
    }

    #[tokio::test]
    async fn sending_to_a_gone_client_deregisters_the_session() {
        let table = SessionTable::new(settings(10, Duration::from_secs(300)));
        let (id, rx) = table.open("flaky");
        drop(rx);
        assert!(!table.send(id, Event::default().data("x")));
        assert_eq!(table.active_count(), 0);
    }

    #[tokio::test]
    async fn delivered_frames_arrive_in_order() {
        let table = SessionTable::new(settings(10, Duration::from_secs(300)));
        let (id, mut rx) = table.open("ordered");
        assert!(table.send(id, Event::default().data("one")));
        assert!(table.send(id, Event::default().data("two")));
        // Frames drain in FIFO order from the bounded channel.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
    }
}
