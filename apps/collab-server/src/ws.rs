use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use collaboration::{ProjectId, Scope, Subscription, TrackId};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::{api::ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    project_id: Option<ProjectId>,
    track_id: Option<TrackId>,
}

impl WsQuery {
    fn scope(&self) -> Result<Scope, ApiError> {
        match (self.project_id, self.track_id) {
            (Some(id), None) => Ok(Scope::Project(id)),
            (None, Some(id)) => Ok(Scope::Track(id)),
            _ => Err(ApiError::BadRequest(
                "exactly one of project_id or track_id is required".into(),
            )),
        }
    }
}

/// GET /ws?project_id=|track_id= streams change events for one scope
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let scope = query.scope()?;
    // subscribe before the handshake so nothing published meanwhile is lost
    let subscription = state.service.subscribe(scope);
    debug!(
        "{} now has {} subscribers",
        scope,
        state.service.broadcaster().subscriber_count(scope)
    );
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, subscription)))
}

async fn handle_socket(socket: WebSocket, mut subscription: Subscription) {
    let scope = subscription.scope();
    info!("WebSocket subscribed to {}", scope);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Forward change events to this client
    let event_tx = tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if event_tx.send(Message::Text(json)).is_err() {
                        debug!("Failed to forward event: channel closed");
                        return;
                    }
                }
                Err(e) => error!("Failed to serialize change event: {}", e),
            }
        }
        // topic closed, e.g. the project was deleted
        let _ = event_tx.send(Message::Close(None));
    });

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = ws_tx.send(msg).await {
                debug!("Failed to send message to WebSocket: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    // The stream is read-only; incoming frames only manage the connection
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                debug!("WebSocket closed by client");
                break;
            }
            Ok(_) => {
                debug!("Ignoring client message on {}", scope);
            }
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        }
    }

    forward_task.abort();
    send_task.abort();
    info!("WebSocket unsubscribed from {}", scope);
}
