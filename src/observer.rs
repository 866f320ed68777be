//! Log observer endpoint
//!
//! `POST /api/logs` accepts `{level?, message}` and fans the entry out to
//! every `GET /api/logs` server-sent-event subscriber. This is the endpoint
//! the telemetry sidecar reports to.

use std::convert::Infallible;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use futures::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{Error, Result};

/// Entries buffered per subscriber before the slowest ones start dropping
const CHANNEL_CAPACITY: usize = 256;

/// A log entry as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    #[serde(default = "default_level")]
    level: String,
    message: String,
}

fn default_level() -> String {
    "INFO".to_string()
}

/// Broadcast hub behind the observer routes
#[derive(Debug, Clone)]
pub struct LogObserver {
    tx: broadcast::Sender<LogEntry>,
}

impl Default for LogObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl LogObserver {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Stamp and broadcast an entry, returning the number of subscribers
    /// that received it
    pub fn publish(&self, level: impl Into<String>, message: impl Into<String>) -> usize {
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let entry = LogEntry {
            level: level.into(),
            message: message.into(),
            timestamp: Some(timestamp),
        };
        self.tx.send(entry).unwrap_or(0)
    }

    /// Subscribe to future entries
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    /// Routes for `/api/logs`
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/logs", get(stream_logs).post(ingest))
            .with_state(self.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Serve the observer until the listener fails
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound or the server fails
    pub async fn serve(self, port: u16) -> Result<()> {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind log observer: {e}")))?;

        tracing::info!(port, "log observer listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Config(format!("log observer error: {e}")))?;
        Ok(())
    }
}

async fn ingest(State(observer): State<LogObserver>, body: Bytes) -> Response {
    match serde_json::from_slice::<IngestRequest>(&body) {
        Ok(req) => {
            let delivered = observer.publish(req.level, req.message);
            tracing::trace!(delivered, "log entry broadcast");
            Json(serde_json::json!({ "success": true })).into_response()
        }
        Err(e) => {
            tracing::debug!(error = %e, "rejected log entry");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "Invalid request" })),
            )
                .into_response()
        }
    }
}

async fn stream_logs(
    State(observer): State<LogObserver>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let greeting = LogEntry {
        level: "INFO".to_string(),
        message: "Log stream connected".to_string(),
        timestamp: None,
    };

    let entries = BroadcastStream::new(observer.subscribe()).filter_map(|item| async move {
        match item {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!(error = %e, "log subscriber lagged");
                None
            }
        }
    });

    let events = stream::once(async move { greeting })
        .chain(entries)
        .map(|entry| Ok(to_event(&entry)));

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_event(entry: &LogEntry) -> Event {
    Event::default().data(serde_json::to_string(entry).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_subscribers() {
        let observer = LogObserver::new();
        let mut rx = observer.subscribe();
        assert_eq!(observer.publish("INFO", "hello"), 1);

        let entry = rx.try_recv().unwrap();
        assert_eq!(entry.level, "INFO");
        assert_eq!(entry.message, "hello");
        assert!(entry.timestamp.is_some());
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        assert_eq!(LogObserver::new().publish("DEBUG", "nobody"), 0);
    }

    #[test]
    fn ingest_level_defaults_to_info() {
        let req: IngestRequest = serde_json::from_str(r#"{"message":"m"}"#).unwrap();
        assert_eq!(req.level, "INFO");
    }
}
