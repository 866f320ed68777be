//! Real-time rooms the agent joins
//!
//! A room carries remote participants (with their opaque metadata) and their
//! audio. The session only depends on the [`Room`] and [`RoomConnector`]
//! traits; [`LocalRoom`] is the in-process implementation the WebSocket
//! transport in [`ws`] hosts.

mod local;
pub mod ws;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use local::{LocalConnector, LocalRoom, Outbound};
pub use ws::{JobDispatcher, RoomServer};

use crate::Result;

/// A remote peer in a room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub identity: String,
    /// Opaque metadata string supplied by the peer
    pub metadata: Option<String>,
}

impl Participant {
    #[must_use]
    pub fn new(identity: impl Into<String>, metadata: Option<String>) -> Self {
        Self {
            identity: identity.into(),
            metadata,
        }
    }
}

/// Something that happened in the room
#[derive(Debug, Clone)]
pub enum RoomEvent {
    ParticipantJoined(Participant),
    ParticipantLeft { identity: String },
    /// Mono 16 kHz audio from a participant
    Audio { identity: String, samples: Vec<f32> },
    /// The room closed
    Disconnected,
}

/// Data messages the agent publishes alongside its audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentSignal {
    /// What the user said
    Transcript { text: String },
    /// What the agent is about to say
    AgentText { text: String },
    /// Agent speech was cut off by the user
    Interrupted,
}

/// The agent's view of a joined room
#[async_trait]
pub trait Room: Send + Sync {
    fn name(&self) -> &str;

    /// Remote participants currently present, in join order
    fn remote_participants(&self) -> Vec<Participant>;

    /// Publish agent audio (mono, 16 kHz)
    ///
    /// # Errors
    ///
    /// Returns error if the room is closed
    async fn publish_audio(&self, samples: &[f32]) -> Result<()>;

    /// Publish a data message
    ///
    /// # Errors
    ///
    /// Returns error if the room is closed
    async fn publish_data(&self, signal: &AgentSignal) -> Result<()>;
}

/// A room joined by the agent together with its event stream
pub struct ConnectedRoom {
    pub room: Arc<dyn Room>,
    pub events: mpsc::Receiver<RoomEvent>,
}

/// Joins a room on behalf of the agent
#[async_trait]
pub trait RoomConnector: Send + Sync {
    /// # Errors
    ///
    /// Returns `Error::Room` if the room cannot be joined
    async fn connect(&self) -> Result<ConnectedRoom>;
}
