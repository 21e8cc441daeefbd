//! Axum router and all HTTP/WebSocket handlers for dvt-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.

use std::{convert::Infallible, future, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use dvt_engine::{SessionError, StartRequest};
use dvt_schemas::{MonitorEvent, SessionId, TimeFilter};
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{
        ErrorResponse, HealthResponse, SessionsResponse, StartedResponse, StoppedResponse,
        WsReply, WsRequest,
    },
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/sessions", get(list_sessions).post(start_session))
        .route("/v1/sessions/:id", delete(stop_session))
        .route("/v1/sessions/:id/filter", post(update_filter))
        .route("/v1/sessions/:id/stream", get(stream))
        .route("/v1/ws", get(ws_handler))
        .with_state(state)
}

fn not_found(id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("unknown session {id}"),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// /v1/sessions
// ---------------------------------------------------------------------------

pub(crate) async fn list_sessions(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let sessions = st.sessions.list().await;
    (StatusCode::OK, Json(SessionsResponse { sessions }))
}

pub(crate) async fn start_session(
    State(st): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Response {
    match st.start_session(req).await {
        Ok((session_id, _rx)) => {
            info!(session_id = %session_id, "session started over http");
            (
                StatusCode::OK,
                Json(StartedResponse {
                    message: "monitoring started".to_string(),
                    session_id,
                }),
            )
                .into_response()
        }
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

pub(crate) async fn stop_session(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Some(session_id) = SessionId::parse(&id) else {
        return not_found(&id);
    };
    if !st.stop_session(&session_id).await {
        return not_found(&id);
    }
    (
        StatusCode::OK,
        Json(WsReply::MonitoringStopped(StoppedResponse {
            message: "monitoring stopped".to_string(),
        })),
    )
        .into_response()
}

pub(crate) async fn update_filter(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(filter): Json<TimeFilter>,
) -> Response {
    let Some(session_id) = SessionId::parse(&id) else {
        return not_found(&id);
    };
    match st.sessions.update_time_filter(&session_id, filter).await {
        Ok(()) => (StatusCode::OK, Json(WsReply::FilterUpdated(filter))).into_response(),
        Err(SessionError::UnknownSession(_)) => not_found(&id),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/sessions/:id/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let Some(session_id) = SessionId::parse(&id) else {
        return not_found(&id);
    };
    let Some(rx) = st.subscribe(&session_id).await else {
        return not_found(&id);
    };

    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let events = broadcast_to_sse(rx);
    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

/// Ends right after the session's terminal event, or when the bus closes.
fn broadcast_to_sse(
    rx: broadcast::Receiver<MonitorEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    futures_util::stream::unfold(Some(BroadcastStream::new(rx)), |open| async move {
        let mut events = open?;
        loop {
            let Ok(ev) = events.next().await? else {
                continue;
            };
            let rest = if ev.is_terminal() { None } else { Some(events) };
            return Some((ev, rest));
        }
    })
    .filter_map(|ev| async move {
        let data = serde_json::to_string(&ev.payload()).ok()?;
        Some(Ok(Event::default().event(ev.event_type()).data(data)))
    })
}

// ---------------------------------------------------------------------------
// GET /v1/ws
// ---------------------------------------------------------------------------

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(st): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, st))
}

/// The session this connection currently observes.
struct Watched {
    id: SessionId,
    rx: broadcast::Receiver<MonitorEvent>,
}

async fn handle_socket(socket: WebSocket, st: Arc<AppState>) {
    let (mut outbound, mut inbound) = socket.split();
    let mut watched: Option<Watched> = None;

    loop {
        tokio::select! {
            frame = inbound.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let reply = handle_request(&st, &text, &mut watched).await;
                if send_json(&mut outbound, &reply).await.is_err() {
                    break;
                }
            }
            next = next_event(&mut watched) => {
                let Some(ev) = next else {
                    watched = None;
                    continue;
                };
                let terminal = ev.is_terminal();
                if send_json(&mut outbound, &ev).await.is_err() {
                    break;
                }
                if terminal {
                    watched = None;
                }
            }
        }
    }

    // Socket gone: same as stop.
    if let Some(w) = watched {
        if st.disconnect(&w.id).await {
            info!(session_id = %w.id, "observer disconnected; session stopped");
        }
    }
}

async fn handle_request(st: &AppState, text: &str, watched: &mut Option<Watched>) -> WsReply {
    let req: WsRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(err) => {
            warn!(error = %err, "unparseable websocket frame");
            return WsReply::error(format!("invalid request: {err}"));
        }
    };

    match req {
        WsRequest::StartUnifiedMonitoring(start) => {
            if let Some(prev) = watched.take() {
                st.stop_session(&prev.id).await;
            }
            match st.start_session(start).await {
                Ok((id, rx)) => {
                    info!(session_id = %id, "session started over websocket");
                    *watched = Some(Watched { id, rx });
                    WsReply::MonitoringStarted(StartedResponse {
                        message: "monitoring started".to_string(),
                        session_id: id,
                    })
                }
                Err(err) => WsReply::error(err.to_string()),
            }
        }
        WsRequest::StopMonitoring => {
            if let Some(prev) = watched.take() {
                st.stop_session(&prev.id).await;
            }
            WsReply::MonitoringStopped(StoppedResponse {
                message: "monitoring stopped".to_string(),
            })
        }
        WsRequest::UpdateTimeFilter(filter) => {
            let Some(w) = watched.as_ref() else {
                return WsReply::error("no active session");
            };
            match st.sessions.update_time_filter(&w.id, filter).await {
                Ok(()) => WsReply::FilterUpdated(filter),
                Err(err) => WsReply::error(err.to_string()),
            }
        }
    }
}

/// Next event of the watched session; pending forever when nothing is
/// watched, `None` once the bus closes.
async fn next_event(watched: &mut Option<Watched>) -> Option<MonitorEvent> {
    let Some(w) = watched.as_mut() else {
        return future::pending().await;
    };
    loop {
        match w.rx.recv().await {
            Ok(ev) => return Some(ev),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(session_id = %w.id, skipped, "observer lagging; events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn send_json<S, T>(sink: &mut S, value: &T) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
    T: Serialize,
{
    let text = serde_json::to_string(value).map_err(|_| ())?;
    sink.send(Message::Text(text)).await.map_err(|_| ())
}
