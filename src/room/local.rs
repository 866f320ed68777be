//! In-process room

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use super::{AgentSignal, ConnectedRoom, Participant, Room, RoomConnector, RoomEvent};
use crate::{Error, Result};

/// Events buffered for the agent before incoming audio starts dropping
const EVENT_CAPACITY: usize = 512;

/// Outbound messages buffered per transport subscriber
const OUTBOUND_CAPACITY: usize = 256;

/// Agent output delivered to every transport subscriber
#[derive(Debug, Clone)]
pub enum Outbound {
    Audio(Vec<f32>),
    Data(AgentSignal),
}

struct Inner {
    name: String,
    participants: Mutex<Vec<Participant>>,
    agent: Mutex<Option<mpsc::Sender<RoomEvent>>>,
    outbound: broadcast::Sender<Outbound>,
    closed: AtomicBool,
}

/// A room living in this process
///
/// The transport side calls [`join`](Self::join), [`push_audio`](Self::push_audio)
/// and [`leave`](Self::leave); the agent side connects through
/// [`connector`](Self::connector).
#[derive(Clone)]
pub struct LocalRoom {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalRoom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRoom")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalRoom {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (outbound, _) = broadcast::channel(OUTBOUND_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                participants: Mutex::new(Vec::new()),
                agent: Mutex::new(None),
                outbound,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Add a participant, replacing any earlier one with the same identity
    pub fn join(&self, participant: Participant) {
        {
            let mut participants = lock(&self.inner.participants);
            participants.retain(|p| p.identity != participant.identity);
            participants.push(participant.clone());
        }
        tracing::info!(
            room = %self.inner.name,
            identity = %participant.identity,
            "participant joined"
        );
        self.notify(RoomEvent::ParticipantJoined(participant));
    }

    /// Remove a participant, returning whether the room is now empty
    pub fn leave(&self, identity: &str) -> bool {
        let empty = {
            let mut participants = lock(&self.inner.participants);
            participants.retain(|p| p.identity != identity);
            participants.is_empty()
        };
        tracing::info!(room = %self.inner.name, identity, "participant left");
        self.notify(RoomEvent::ParticipantLeft {
            identity: identity.to_string(),
        });
        empty
    }

    /// Deliver participant audio to the agent
    pub fn push_audio(&self, identity: &str, samples: Vec<f32>) {
        self.notify(RoomEvent::Audio {
            identity: identity.to_string(),
            samples,
        });
    }

    /// Receive agent output
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.inner.outbound.subscribe()
    }

    /// Close the room and tell the agent
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(room = %self.inner.name, "room closed");
        self.notify(RoomEvent::Disconnected);
        lock(&self.inner.agent).take();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Connector the agent joins this room through
    #[must_use]
    pub fn connector(&self) -> LocalConnector {
        LocalConnector { room: self.clone() }
    }

    fn notify(&self, event: RoomEvent) {
        let Some(tx) = lock(&self.inner.agent).clone() else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            tracing::debug!(room = %self.inner.name, error = %e, "agent event dropped");
        }
    }

    fn publish(&self, message: Outbound) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Room(format!("room {} is closed", self.inner.name)));
        }
        // No subscribers is fine: nobody is listening right now
        let _ = self.inner.outbound.send(message);
        Ok(())
    }
}

#[async_trait]
impl Room for LocalRoom {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn remote_participants(&self) -> Vec<Participant> {
        lock(&self.inner.participants).clone()
    }

    async fn publish_audio(&self, samples: &[f32]) -> Result<()> {
        self.publish(Outbound::Audio(samples.to_vec()))
    }

    async fn publish_data(&self, signal: &AgentSignal) -> Result<()> {
        self.publish(Outbound::Data(signal.clone()))
    }
}

/// Joins the agent to a [`LocalRoom`]
#[derive(Debug, Clone)]
pub struct LocalConnector {
    room: LocalRoom,
}

#[async_trait]
impl RoomConnector for LocalConnector {
    async fn connect(&self) -> Result<ConnectedRoom> {
        if self.room.is_closed() {
            return Err(Error::Room(format!("room {} is closed", self.room.name())));
        }

        let mut agent = lock(&self.room.inner.agent);
        if agent.is_some() {
            return Err(Error::Room(format!(
                "an agent is already connected to room {}",
                self.room.name()
            )));
        }
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        *agent = Some(tx);
        drop(agent);

        tracing::debug!(room = %self.room.name(), "agent connected");
        Ok(ConnectedRoom {
            room: Arc::new(self.room.clone()),
            events: rx,
        })
    }
}
