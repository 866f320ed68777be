//! Beacon RAG - Retrieval-augmented voice agent
//!
//! This library provides the pieces of a voice assistant that answers from a
//! document corpus:
//! - A persistent semantic index (built once, reloaded on restart)
//! - The `query_info` retrieval tool the conversational model can call
//! - Per-room session orchestration over a speech pipeline
//! - A best-effort telemetry sidecar and the log observer it reports to
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               Room transport (WebSocket)             │
//! └────────────────────┬────────────────────────────────┘
//!                      │ one job per room
//! ┌────────────────────▼────────────────────────────────┐
//! │                Session orchestrator                  │
//! │  flags  │  Agent  │  VAD/turns  │  STT/LLM/TTS      │
//! └────────────────────┬────────────────────────────────┘
//!                      │ query_info
//! ┌────────────────────▼────────────────────────────────┐
//! │        Retrieval  →  Semantic index (sqlite-vec)     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod observer;
pub mod retrieval;
pub mod room;
pub mod session;
pub mod telemetry;
pub mod tools;
pub mod voice;

pub use config::Config;
pub use context::AppContext;
pub use error::{Error, Result};
pub use index::{IndexHandle, SemanticIndex, ensure_index};
pub use retrieval::{QueryEngine, QueryInfoTool};
pub use session::{AgentSession, entrypoint};
pub use telemetry::{Level, Telemetry};
