use crate::core::SessionEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chatsync_proto::protocol::{
    AutoSelectConfig, CandidateBrowser, Command, SelectionMode, SessionSnapshot, TimestampedEvent,
};
use chatsync_proto::state::SnapshotStore;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    store: SnapshotStore,
    event_tx: mpsc::Sender<SessionEvent>,
}

#[derive(Deserialize)]
struct SearchBody {
    text: String,
}

#[derive(Serialize)]
struct DelayStatus {
    delay_secs: f64,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    store: SnapshotStore,
    event_tx: mpsc::Sender<SessionEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState { store, event_tx });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/window", get(get_window))
        .route("/api/candidates", get(get_candidates))
        .route("/api/select/:id", post(select))
        .route("/api/unselect", post(unselect))
        .route("/api/reset", post(reset))
        .route("/api/search", post(search))
        .route("/api/mode/:mode", post(set_mode))
        .route("/api/auto-select", post(set_auto_select))
        .route("/api/delay/:seconds", post(set_delay))
        .route("/api/delay", get(get_delay))
        .route("/api/catalog/reload", post(reload_catalog))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    if state.event_tx.send(SessionEvent::ClientCommand(cmd)).await.is_err() {
        error!("Failed to forward HTTP command");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<SessionSnapshot> {
    Json(state.store.get().await)
}

async fn get_window(State(state): State<HttpState>) -> Json<Vec<TimestampedEvent>> {
    Json(state.store.get().await.window)
}

async fn get_candidates(State(state): State<HttpState>) -> Result<Json<CandidateBrowser>, StatusCode> {
    // only offered while no stream is on screen
    state
        .store
        .get()
        .await
        .view
        .browser
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn select(State(state): State<HttpState>, Path(id): Path<String>) -> StatusCode {
    info!("HTTP API: select {}", id);
    send(&state, Command::Select { candidate_id: id }).await
}

async fn unselect(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: unselect");
    send(&state, Command::Unselect).await
}

async fn reset(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: reset");
    send(&state, Command::Reset).await
}

async fn search(State(state): State<HttpState>, Json(body): Json<SearchBody>) -> StatusCode {
    send(&state, Command::SetSearchText { text: body.text }).await
}

async fn set_mode(State(state): State<HttpState>, Path(mode): Path<String>) -> StatusCode {
    match mode.parse::<SelectionMode>() {
        Ok(mode) => {
            info!("HTTP API: mode {}", mode.label());
            send(&state, Command::SetMode { mode }).await
        }
        Err(e) => {
            info!("HTTP API: {}", e);
            StatusCode::BAD_REQUEST
        }
    }
}

async fn set_auto_select(
    State(state): State<HttpState>,
    Json(config): Json<AutoSelectConfig>,
) -> StatusCode {
    send(&state, Command::SetAutoSelectConfig { config }).await
}

async fn set_delay(State(state): State<HttpState>, Path(seconds): Path<f64>) -> StatusCode {
    if !seconds.is_finite() {
        return StatusCode::BAD_REQUEST;
    }
    info!("HTTP API: delay {}s", seconds);
    send(&state, Command::SetDelay { seconds }).await
}

async fn get_delay(State(state): State<HttpState>) -> Json<DelayStatus> {
    Json(DelayStatus {
        delay_secs: state.store.get().await.delay_secs,
    })
}

async fn reload_catalog(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: reload catalog");
    send(&state, Command::ReloadCatalog).await
}
