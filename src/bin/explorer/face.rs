//! HTTP surface: start sessions, read progress, stream it over SSE.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use saas_explorer::{ExploreTarget, ExplorerError, Orchestrator, ProgressRegistry};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often the event stream re-reads a session's progress.
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Keep-alive records sent for an unknown session before the stream ends.
const MAX_UNKNOWN_POLLS: u32 = 15;
/// Extra ports tried when the requested one is taken.
const PORT_FALLBACKS: u16 = 9;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSession {
    url: Option<String>,
    platform_name: Option<String>,
    platform_url: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/{id}", get(get_session))
        .route("/sessions/{id}/events", get(session_events))
        .route("/sessions/{id}/cancel", post(cancel_session))
        .route("/sessions/{id}/report", get(get_report))
        .route("/reports", get(list_reports))
        .route(
            "/favicon.ico",
            get(|| async { StatusCode::NO_CONTENT }),
        )
        .with_state(state)
}

/// Binds `addr`, or the next free port among the few after it.
async fn bind_with_fallback(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let mut last_err = None;
    for offset in 0..=PORT_FALLBACKS {
        let candidate = SocketAddr::new(addr.ip(), addr.port().saturating_add(offset));
        match tokio::net::TcpListener::bind(candidate).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                warn!(addr = %candidate, error = %e, "port unavailable");
                last_err = Some(e);
                if addr.port() == 0 {
                    break;
                }
            }
        }
    }
    let err = last_err
        .map(anyhow::Error::from)
        .unwrap_or_else(|| anyhow::anyhow!("no port to bind"));
    Err(err.context(format!(
        "could not bind {addr} or the {PORT_FALLBACKS} ports after it"
    )))
}

pub async fn serve(state: AppState, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = bind_with_fallback(addr).await?;
    info!(addr = %listener.local_addr()?, "explorer API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    let message = message.into();
    (status, Json(json!({ "success": false, "error": message }))).into_response()
}

async fn create_session(
    State(state): State<AppState>,
    Json(payload): Json<CreateSession>,
) -> Response {
    let Some(url) = payload.platform_url.or(payload.url) else {
        return failure(StatusCode::BAD_REQUEST, "URL is required");
    };
    let target = match ExploreTarget::parse(&url, payload.platform_name.as_deref()) {
        Ok(target) => target,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.to_string()),
    };
    let session_id = state.orchestrator.start(target);
    info!(session_id = %session_id, url = %url, "session started");
    Json(json!({ "success": true, "sessionId": session_id })).into_response()
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.registry().get(&id) {
        Some(progress) => Json(progress).into_response(),
        None => failure(StatusCode::NOT_FOUND, ExplorerError::SessionNotFound(id).to_string()),
    }
}

async fn cancel_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.orchestrator.cancel(&id) {
        Json(json!({ "success": true, "sessionId": id })).into_response()
    } else {
        failure(StatusCode::NOT_FOUND, format!("no running session: {id}"))
    }
}

async fn get_report(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.store().load_report(&id).await {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => failure(StatusCode::NOT_FOUND, format!("no report for session {id}")),
        Err(e) => {
            error!(session_id = %id, error = %e, "failed to load report");
            failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn list_reports(State(state): State<AppState>) -> Response {
    match state.orchestrator.store().list_reports().await {
        Ok(reports) => Json(json!({ "success": true, "reports": reports })).into_response(),
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

struct Poll {
    registry: ProgressRegistry,
    session_id: String,
    ticker: Interval,
    misses: u32,
    finished: bool,
}

/// Full progress record every [`POLL_INTERVAL`]; a keep-alive record while
/// the session is unknown. Ends right after a terminal status is sent, or
/// after [`MAX_UNKNOWN_POLLS`] keep-alives.
fn progress_stream(
    registry: ProgressRegistry,
    session_id: String,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let poll = Poll {
        registry,
        session_id,
        ticker,
        misses: 0,
        finished: false,
    };
    futures::stream::unfold(poll, |mut poll| async move {
        if poll.finished {
            return None;
        }
        poll.ticker.tick().await;
        let event = match poll.registry.get(&poll.session_id) {
            Some(progress) => {
                poll.finished = progress.status.is_terminal();
                Event::default().json_data(&progress)
            }
            None => {
                poll.misses += 1;
                poll.finished = poll.misses >= MAX_UNKNOWN_POLLS;
                if poll.finished {
                    info!(session_id = %poll.session_id, "session unknown, closing progress stream");
                }
                Event::default()
                    .json_data(json!({ "type": "keepalive", "sessionId": poll.session_id }))
            }
        };
        Some((event, poll))
    })
}

async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    info!(session_id = %id, "progress stream opened");
    Sse::new(progress_stream(state.orchestrator.registry().clone(), id))
}
