use crate::core::HubEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use nowplaying_proto::protocol::{HubState, MediaSnapshot, PlayerCommand};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
struct HttpState {
    event_tx: mpsc::Sender<HubEvent>,
    state_rx: watch::Receiver<HubState>,
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    rev: u64,
}

pub fn router(event_tx: mpsc::Sender<HubEvent>, state_rx: watch::Receiver<HubState>) -> Router {
    let app_state = HttpState { event_tx, state_rx };

    // Extension popups fetch from their own origin.
    Router::new()
        .route("/api/info", get(get_info))
        .route("/api/state", get(get_state))
        .route("/api/command/:command", post(send_command))
        .route("/api/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    event_tx: mpsc::Sender<HubEvent>,
    state_rx: watch::Receiver<HubState>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(event_tx, state_rx);

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

async fn get_info(
    State(state): State<HttpState>,
) -> Result<Json<Option<MediaSnapshot>>, StatusCode> {
    let (reply_tx, reply_rx) = oneshot::channel();
    if state.event_tx.send(HubEvent::GetInfo(reply_tx)).await.is_err() {
        error!("Failed to query hub core");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    reply_rx
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

async fn get_state(State(state): State<HttpState>) -> Json<HubState> {
    let current = state.state_rx.borrow().clone();
    Json(current)
}

async fn send_command(State(state): State<HttpState>, Path(token): Path<String>) -> StatusCode {
    let command = match token.parse::<PlayerCommand>() {
        Ok(c) => c,
        Err(e) => {
            warn!("HTTP API: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    info!("HTTP API: command {}", command);
    if state.event_tx.send(HubEvent::SendCommand(command)).await.is_err() {
        error!("Failed to send {} command", command);
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn health(State(state): State<HttpState>) -> Json<Health> {
    let rev = state.state_rx.borrow().rev;
    Json(Health { status: "ok", rev })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HubCore;
    use nowplaying_proto::protocol::{MediaReport, SourceId};

    async fn start() -> (String, mpsc::Sender<HubEvent>) {
        let (core, state_rx) = HubCore::new();
        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(core.run(event_rx));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(event_tx.clone(), state_rx);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), event_tx)
    }

    #[tokio::test]
    async fn test_info_and_command_routes() {
        let (base, event_tx) = start().await;
        let client = reqwest::Client::new();

        let empty: Option<MediaSnapshot> = client
            .get(format!("{}/api/info", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(empty, None);

        let (commands_tx, mut commands_rx) = mpsc::channel(4);
        event_tx
            .send(HubEvent::ReporterConnected {
                source_id: SourceId(7),
                commands: commands_tx,
            })
            .await
            .unwrap();
        event_tx
            .send(HubEvent::Update {
                source_id: SourceId(7),
                report: MediaReport::new("X", true, 1),
            })
            .await
            .unwrap();

        let media: Option<MediaSnapshot> = client
            .get(format!("{}/api/info", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(media.unwrap().source_id, SourceId(7));

        let status = client
            .post(format!("{}/api/command/rewind", base))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::ACCEPTED);
        assert_eq!(commands_rx.recv().await, Some(PlayerCommand::Rewind));

        let status = client
            .post(format!("{}/api/command/shuffle", base))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    }
}
