//! WebSocket room transport
//!
//! Peers connect to `/rooms/{name}`. The first frame must be a JSON join
//! message; after that binary frames carry 16 kHz mono PCM16LE audio in both
//! directions and agent data messages arrive as JSON text frames. The first
//! peer of a room causes one agent job to be dispatched for it.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, broadcast};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{LocalRoom, Outbound, Participant};
use crate::voice::audio::{pcm16_to_samples, samples_to_pcm16};
use crate::{Error, Result};

/// Starts the agent job for a newly created room
pub type JobDispatcher = Arc<dyn Fn(LocalRoom) + Send + Sync>;

/// First frame sent by a peer
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientHello {
    Join {
        identity: String,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
}

#[derive(Clone)]
struct ServerState {
    rooms: Arc<Mutex<HashMap<String, LocalRoom>>>,
    dispatcher: JobDispatcher,
}

/// Hosts rooms over WebSocket
pub struct RoomServer {
    state: ServerState,
    port: u16,
}

impl RoomServer {
    #[must_use]
    pub fn new(port: u16, dispatcher: JobDispatcher) -> Self {
        Self {
            state: ServerState {
                rooms: Arc::new(Mutex::new(HashMap::new())),
                dispatcher,
            },
            port,
        }
    }

    /// Room routes
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/rooms/{name}", get(ws_upgrade))
            .with_state(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve rooms until the listener fails
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound or the server fails
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind room server: {e}")))?;

        tracing::info!(port = self.port, "room server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Config(format!("room server error: {e}")))?;
        Ok(())
    }
}

async fn ws_upgrade(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, name))
}

/// Metadata may arrive as a string or as inline JSON
fn metadata_string(value: Option<serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

async fn handle_socket(socket: WebSocket, state: ServerState, name: String) {
    let (mut sender, mut receiver) = socket.split();

    let participant = loop {
        let Some(Ok(msg)) = receiver.next().await else {
            return;
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientHello>(&text) {
                Ok(ClientHello::Join { identity, metadata }) => {
                    break Participant::new(identity, metadata_string(metadata));
                }
                Err(e) => {
                    tracing::warn!(room = %name, error = %e, "invalid join message");
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                }
            },
            Message::Close(_) => return,
            _ => {}
        }
    };

    let peer = participant.identity.clone();

    // Join and the closing leave both happen under the registry lock
    let (room, mut outbound) = {
        let mut rooms = state.rooms.lock().await;
        let (room, created) = match rooms.get(&name) {
            Some(room) if !room.is_closed() => (room.clone(), false),
            _ => {
                let room = LocalRoom::new(&name);
                rooms.insert(name.clone(), room.clone());
                (room, true)
            }
        };
        let outbound = room.subscribe();
        room.join(participant);
        if created {
            tracing::info!(room = %name, "dispatching agent job");
            (state.dispatcher)(room.clone());
        }
        (room, outbound)
    };

    let mut send_task = tokio::spawn(async move {
        loop {
            let message = match outbound.recv().await {
                Ok(Outbound::Audio(samples)) => {
                    Message::Binary(samples_to_pcm16(&samples).into())
                }
                Ok(Outbound::Data(signal)) => match serde_json::to_string(&signal) {
                    Ok(text) => Message::Text(text.into()),
                    Err(_) => continue,
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "peer lagging behind agent output");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let recv_room = room.clone();
    let recv_peer = peer.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Binary(bytes) => {
                    recv_room.push_audio(&recv_peer, pcm16_to_samples(&bytes));
                }
                Message::Text(text) => {
                    tracing::trace!(len = text.len(), "ignoring text frame after join");
                }
                Message::Close(_) => {
                    tracing::info!(identity = %recv_peer, "peer closed connection");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let mut rooms = state.rooms.lock().await;
    if room.leave(&peer) {
        room.close();
        if rooms.get(&name).is_some_and(LocalRoom::is_closed) {
            rooms.remove(&name);
        }
    }
}
