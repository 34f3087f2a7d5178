//! HTTP surface: agent and orchestrator events streamed as Server-Sent Events

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures::stream::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rho_agent::parallel::OrchestratorEvent;
use rho_agent::{Agent, AgentEvent, AgentHandle};

use crate::runtime::Runtime;

/// One chat session: a conversation that runs at most one loop at a time
struct Session {
    agent: Arc<tokio::sync::Mutex<Agent>>,
    handle: AgentHandle,
}

#[derive(Clone)]
pub struct AppState {
    runtime: Arc<Runtime>,
    sessions: Arc<Mutex<HashMap<String, Arc<Session>>>>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    fn session(&self, id: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(id.to_string()).or_insert_with(|| {
            debug!(session = id, "Creating session");
            let agent = self.runtime.agent(id);
            let handle = agent.handle();
            Arc::new(Session {
                agent: Arc::new(tokio::sync::Mutex::new(agent)),
                handle,
            })
        });
        Arc::clone(session)
    }
}

#[derive(Deserialize)]
struct MessageRequest {
    content: String,
}

#[derive(Deserialize)]
struct ParallelRequest {
    goal: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions/{id}/messages", post(post_message))
        .route("/sessions/{id}/stop", post(stop_session))
        .route("/sessions/{id}", axum::routing::delete(delete_session))
        .route("/parallel", post(run_parallel))
        .with_state(state)
}

/// Serve until ctrl-c; running loops are asked to stop on the way out
pub async fn serve(runtime: Arc<Runtime>, bind: &str) -> anyhow::Result<()> {
    let state = AppState::new(runtime);
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

/// POST /sessions/{id}/messages - run the loop on one user message, streaming its events
async fn post_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> Response {
    if request.content.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "content must not be empty");
    }
    let session = state.session(&id);
    let Ok(mut agent) = Arc::clone(&session.agent).try_lock_owned() else {
        return error_response(StatusCode::CONFLICT, format!("session {id} is already running"));
    };

    let rx = agent.subscribe();
    session.handle.link_parent(state.shutdown.child_token());
    tokio::spawn(async move {
        match agent.prompt(&request.content).await {
            Ok(outcome) => debug!(
                session = %id,
                iterations = outcome.iterations,
                tool_calls = outcome.tool_calls,
                success = outcome.is_success(),
                "Run finished"
            ),
            Err(e) => warn!(session = %id, error = %e, "Run did not start"),
        }
    });

    sse_response(event_stream(rx, |e: &AgentEvent| (e.name(), e.is_terminal())))
}

#[derive(Debug, Default, Deserialize)]
struct StopQuery {
    /// Also cancel tool calls already executing
    #[serde(default)]
    force: bool,
}

/// POST /sessions/{id}/stop[?force=true] - stop the running loop. Without
/// `force` a tool call in flight is allowed to finish.
async fn stop_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StopQuery>,
) -> Response {
    let Some(session) = state.sessions.lock().get(&id).cloned() else {
        return error_response(StatusCode::NOT_FOUND, format!("no session {id}"));
    };
    let running = session.handle.is_running();
    if running {
        info!(session = %id, force = query.force, "Stop requested");
        if query.force {
            session.handle.abort_now();
        } else {
            session.handle.abort();
        }
    }
    Json(json!({ "stopping": running, "force": query.force })).into_response()
}

/// DELETE /sessions/{id} - drop the conversation; refused while it runs
async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let mut sessions = state.sessions.lock();
    match sessions.get(&id) {
        None => error_response(StatusCode::NOT_FOUND, format!("no session {id}")),
        Some(session) if session.handle.is_running() => {
            error_response(StatusCode::CONFLICT, format!("session {id} is running"))
        }
        Some(_) => {
            sessions.remove(&id);
            state.runtime.forget_session(&id);
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// POST /parallel - plan a goal into lanes and stream orchestrator events
async fn run_parallel(State(state): State<AppState>, Json(request): Json<ParallelRequest>) -> Response {
    if request.goal.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "goal must not be empty");
    }
    let orchestrator = state.runtime.orchestrator();
    let rx = orchestrator.subscribe();
    let cancel = state.shutdown.child_token();

    tokio::spawn(async move {
        match orchestrator.run(&request.goal, cancel).await {
            Ok(summary) => info!(
                manifest = %summary.manifest_id,
                merged = summary.merged,
                failed = summary.failed,
                "Parallel run finished"
            ),
            Err(e) => warn!(error = %e, "Parallel run failed"),
        }
    });

    sse_response(event_stream(rx, |e: &OrchestratorEvent| (e.name(), e.is_terminal())))
}

/// Forward broadcast events as SSE frames until a terminal event
fn event_stream<T, F>(
    mut rx: broadcast::Receiver<T>,
    describe: F,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    T: Serialize + Clone + Send + 'static,
    F: Fn(&T) -> (&'static str, bool) + Send + 'static,
{
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let (name, terminal) = describe(&event);
                    match serde_json::to_string(&event) {
                        Ok(data) => yield Ok(Event::default().event(name).data(data)),
                        Err(e) => warn!(event = name, error = %e, "Failed to serialize event"),
                    }
                    if terminal {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("ping"));
    ([(header::CACHE_CONTROL, "no-cache")], sse).into_response()
}
