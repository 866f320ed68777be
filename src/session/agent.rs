//! The voice agent and its running session
//!
//! An [`Agent`] is fixed at construction: instructions, tools and speech
//! bindings cannot change afterwards. [`AgentSession::start`] binds it to a
//! connected room and spawns two tasks:
//!
//! - the listener drains room audio through VAD and the turn detector and
//!   never waits on a reply, so user speech is heard while the agent thinks
//! - the responder works through committed turns and session commands in
//!   order: STT → chat (with tool rounds) → TTS → playback
//!
//! Agent audio plays from its own task so that user speech detected while it
//! plays can cut it off.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::config::SessionConfig;
use crate::llm::{ChatMessage, ChatModel};
use crate::room::{AgentSignal, ConnectedRoom, Room, RoomEvent};
use crate::tools::{ToolDefinition, ToolSet};
use crate::voice::{
    FRAME_SAMPLES, SAMPLE_RATE, SpeechToText, TextToSpeech, TurnDetector, TurnSignal,
    VoiceActivityDetector, samples_to_wav,
};
use crate::{Error, Result};

/// A configured voice agent
pub struct Agent {
    instructions: String,
    config: SessionConfig,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("tools", &self.config.tools)
            .field("flags", &self.config.flags)
            .finish_non_exhaustive()
    }
}

impl Agent {
    #[must_use]
    pub fn new(instructions: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            instructions: instructions.into(),
            config,
        }
    }

    #[must_use]
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    #[must_use]
    pub const fn tools(&self) -> &ToolSet {
        &self.config.tools
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }
}

/// Work for the responder, handled strictly in arrival order
enum Work {
    Turn(Vec<f32>),
    Say {
        text: String,
        allow_interruptions: bool,
        done: oneshot::Sender<Result<()>>,
    },
    GenerateReply {
        instructions: String,
        allow_interruptions: bool,
        done: oneshot::Sender<Result<()>>,
    },
}

/// A running agent session
pub struct AgentSession {
    room: String,
    tool_names: Vec<String>,
    work: mpsc::UnboundedSender<Work>,
    listener: JoinHandle<()>,
    responder: JoinHandle<()>,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("room", &self.room)
            .field("tool_names", &self.tool_names)
            .finish_non_exhaustive()
    }
}

impl AgentSession {
    /// Bind `agent` to a connected room and start the audio pipeline
    #[must_use]
    pub fn start(agent: Agent, connected: ConnectedRoom) -> Self {
        let room_name = connected.room.name().to_string();
        let tool_names = agent
            .config
            .tools
            .names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let (work, work_rx) = mpsc::unbounded_channel();
        let playback = PlaybackSlot::default();
        let Agent {
            instructions,
            config,
        } = agent;

        let listener = Listener {
            room: Arc::clone(&connected.room),
            vad: config.vad,
            turn_detector: config.turn_detector,
            playback: playback.clone(),
            work: work.clone(),
        };
        let responder = Responder {
            room: connected.room,
            history: vec![ChatMessage::system(instructions)],
            tools: config.tools,
            llm: config.llm,
            stt: config.stt,
            tts: config.tts,
            max_tool_rounds: config.max_tool_rounds.max(1),
            playback,
        };

        tracing::info!(room = %room_name, tools = ?tool_names, "agent session started");
        let listener = tokio::spawn(listener.run(connected.events));
        let responder = tokio::spawn(responder.run(work_rx));

        Self {
            room: room_name,
            tool_names,
            work,
            listener,
            responder,
        }
    }

    /// Name of the room the session is bound to
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Tools exposed to the model, fixed for the session's lifetime
    #[must_use]
    pub fn tool_names(&self) -> &[String] {
        &self.tool_names
    }

    /// Speak a fixed line
    ///
    /// Resolves once playback has started.
    ///
    /// # Errors
    ///
    /// Returns error if the session has ended or synthesis fails
    pub async fn say(&self, text: impl Into<String>, allow_interruptions: bool) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Work::Say {
            text: text.into(),
            allow_interruptions,
            done,
        })?;
        rx.await.map_err(|_| session_ended())?
    }

    /// Have the model produce and speak a reply guided by `instructions`
    ///
    /// # Errors
    ///
    /// Returns error if the session has ended, or the completion or
    /// synthesis fails
    pub async fn generate_reply(
        &self,
        instructions: impl Into<String>,
        allow_interruptions: bool,
    ) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.send(Work::GenerateReply {
            instructions: instructions.into(),
            allow_interruptions,
            done,
        })?;
        rx.await.map_err(|_| session_ended())?
    }

    /// Whether the room side of the session has finished
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.listener.is_finished()
    }

    /// Wait for the room to disconnect, then stop any reply still in flight
    pub async fn closed(self) {
        if let Err(e) = self.listener.await {
            tracing::error!(room = %self.room, error = %e, "agent listener panicked");
        }

        drop(self.work);
        self.responder.abort();
        if let Err(e) = self.responder.await
            && e.is_panic()
        {
            tracing::error!(room = %self.room, error = %e, "agent responder panicked");
        }
    }

    fn send(&self, work: Work) -> Result<()> {
        self.work.send(work).map_err(|_| session_ended())
    }
}

fn session_ended() -> Error {
    Error::Room("agent session has ended".to_string())
}

struct Playback {
    task: JoinHandle<()>,
    interruptible: bool,
}

/// The agent audio currently playing, shared by listener and responder
#[derive(Clone, Default)]
struct PlaybackSlot(Arc<Mutex<Option<Playback>>>);

impl PlaybackSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Playback>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `playback`, cutting off whatever was playing
    fn replace(&self, playback: Playback) {
        if let Some(old) = self.lock().replace(playback) {
            old.task.abort();
        }
    }

    /// Stop interruptible audio that is still playing
    ///
    /// Returns whether anything was cut off.
    fn interrupt(&self) -> bool {
        let mut slot = self.lock();
        let playing = slot
            .as_ref()
            .is_some_and(|p| p.interruptible && !p.task.is_finished());
        if playing && let Some(playback) = slot.take() {
            playback.task.abort();
        }
        playing
    }

    fn stop(&self) {
        if let Some(playback) = self.lock().take() {
            playback.task.abort();
        }
    }
}

/// Drains room events without ever waiting on a reply
struct Listener {
    room: Arc<dyn Room>,
    vad: Arc<dyn VoiceActivityDetector>,
    turn_detector: Box<dyn TurnDetector>,
    playback: PlaybackSlot,
    work: mpsc::UnboundedSender<Work>,
}

impl Listener {
    async fn run(mut self, mut events: mpsc::Receiver<RoomEvent>) {
        let room = self.room.name().to_string();

        while let Some(event) = events.recv().await {
            match event {
                RoomEvent::Audio { samples, .. } => self.handle_audio(&samples).await,
                RoomEvent::ParticipantJoined(p) => {
                    tracing::debug!(
                        room = %room,
                        identity = %p.identity,
                        "participant joined mid-session"
                    );
                }
                RoomEvent::ParticipantLeft { identity } => {
                    tracing::debug!(room = %room, identity = %identity, "participant left");
                }
                RoomEvent::Disconnected => break,
            }
        }

        self.playback.stop();
        tracing::info!(room = %room, "agent session ended");
    }

    async fn handle_audio(&mut self, frame: &[f32]) {
        let is_speech = self.vad.is_speech(frame);

        if is_speech && self.playback.interrupt() {
            tracing::info!("agent speech interrupted by user");
            if let Err(e) = self.room.publish_data(&AgentSignal::Interrupted).await {
                tracing::debug!(error = %e, "failed to publish interruption");
            }
        }

        match self.turn_detector.push(frame, is_speech) {
            TurnSignal::TurnEnded(audio) => {
                tracing::debug!(samples = audio.len(), "queueing user turn");
                if self.work.send(Work::Turn(audio)).is_err() {
                    tracing::debug!("responder gone, dropping user turn");
                }
            }
            TurnSignal::SpeechStarted => tracing::trace!("user speech started"),
            TurnSignal::Idle | TurnSignal::Listening | TurnSignal::Discarded => {}
        }
    }
}

/// Turns committed turns and commands into spoken replies
struct Responder {
    room: Arc<dyn Room>,
    history: Vec<ChatMessage>,
    tools: ToolSet,
    llm: Arc<dyn ChatModel>,
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    max_tool_rounds: usize,
    playback: PlaybackSlot,
}

impl Responder {
    async fn run(mut self, mut work: mpsc::UnboundedReceiver<Work>) {
        while let Some(item) = work.recv().await {
            match item {
                Work::Turn(audio) => {
                    if let Err(e) = self.handle_turn(&audio).await {
                        tracing::error!(error = %e, "failed to handle user turn");
                    }
                }
                Work::Say {
                    text,
                    allow_interruptions,
                    done,
                } => {
                    self.history.push(ChatMessage::assistant(&text));
                    let result = self.speak(&text, allow_interruptions).await;
                    let _ = done.send(result);
                }
                Work::GenerateReply {
                    instructions,
                    allow_interruptions,
                    done,
                } => {
                    let result = match self.respond(Some(ChatMessage::system(instructions))).await {
                        Ok(reply) => self.speak(&reply, allow_interruptions).await,
                        Err(e) => Err(e),
                    };
                    let _ = done.send(result);
                }
            }
        }
    }

    async fn handle_turn(&mut self, audio: &[f32]) -> Result<()> {
        let wav = samples_to_wav(audio, SAMPLE_RATE)?;
        let transcript = self.stt.transcribe(&wav).await?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            tracing::debug!("empty transcript, ignoring turn");
            return Ok(());
        }

        tracing::info!(transcript = %transcript, "user turn");
        self.room
            .publish_data(&AgentSignal::Transcript {
                text: transcript.to_string(),
            })
            .await?;

        self.history.push(ChatMessage::user(transcript));
        let reply = self.respond(None).await?;
        self.speak(&reply, true).await
    }

    /// Run completions until the model answers in text
    ///
    /// Tool calls are executed and their results fed back; a failed call is
    /// reported to the model as `error: ...`. After `max_tool_rounds` rounds
    /// tools are withheld so the model has to answer.
    async fn respond(&mut self, instructions: Option<ChatMessage>) -> Result<String> {
        let mut convo = self.history.clone();
        let keep_from = convo.len() + usize::from(instructions.is_some());
        convo.extend(instructions);

        let definitions = self.tools.definitions();
        let mut round = 0;

        let reply = loop {
            let offered: &[ToolDefinition] = if round < self.max_tool_rounds {
                definitions.as_slice()
            } else {
                &[]
            };
            let completion = self.llm.complete(&convo, offered).await?;

            if !completion.wants_tools() || round >= self.max_tool_rounds {
                break completion.content.unwrap_or_default().trim().to_string();
            }

            round += 1;
            tracing::debug!(round, calls = completion.tool_calls.len(), "model requested tools");
            convo.push(ChatMessage::assistant_tool_calls(
                completion.content,
                completion.tool_calls.clone(),
            ));

            for call in completion.tool_calls {
                let output = match self
                    .tools
                    .execute(&call.function.name, &call.function.arguments)
                    .await
                {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::warn!(tool = %call.function.name, error = %e, "tool call failed");
                        format!("error: {e}")
                    }
                };
                convo.push(ChatMessage::tool(call.id, output));
            }
        };

        self.history.extend(convo.drain(keep_from..));
        self.history.push(ChatMessage::assistant(&reply));
        Ok(reply)
    }

    /// Synthesize `text` and start playing it, replacing any current playback
    async fn speak(&mut self, text: &str, allow_interruptions: bool) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }

        let samples = self.tts.synthesize(text).await?;
        self.room
            .publish_data(&AgentSignal::AgentText {
                text: text.to_string(),
            })
            .await?;

        let room = Arc::clone(&self.room);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(frame_duration());
            for frame in samples.chunks(FRAME_SAMPLES) {
                ticker.tick().await;
                if let Err(e) = room.publish_audio(frame).await {
                    tracing::debug!(error = %e, "playback stopped");
                    return;
                }
            }
            tracing::trace!("playback finished");
        });

        self.playback.replace(Playback {
            task,
            interruptible: allow_interruptions,
        });
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn frame_duration() -> Duration {
    Duration::from_millis((FRAME_SAMPLES as u64 * 1000) / u64::from(SAMPLE_RATE))
}
