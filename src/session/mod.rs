//! Voice session orchestration

mod agent;
mod config;
mod metadata;
mod orchestrator;

pub use agent::{Agent, AgentSession};
pub use config::{SessionConfig, tools_for};
pub use metadata::{FeatureFlags, ParticipantMetadata, resolve_feature_flags};
pub use orchestrator::{
    AGENT_INSTRUCTIONS, GREETING, GREETING_INSTRUCTIONS, SessionPhase, entrypoint, run_job,
};
