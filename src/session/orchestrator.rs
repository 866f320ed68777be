//! Per-room job entrypoint
//!
//! Runs strictly in sequence: connect, wait out the peer grace period,
//! resolve feature flags from participant metadata, build the agent, start
//! the session, then greet.

use std::sync::Arc;

use super::agent::{Agent, AgentSession};
use super::config::SessionConfig;
use super::metadata::resolve_feature_flags;
use crate::config::GreetingMode;
use crate::context::AppContext;
use crate::room::RoomConnector;
use crate::telemetry::Level;
use crate::Result;

/// Conversational instructions for the voice agent
pub const AGENT_INSTRUCTIONS: &str = "You are a helpful voice AI assistant with access to \
documentation. Use the query_info tool to find relevant information when users ask questions. \
IMPORTANT: Since you are a voice assistant, respond in plain text only - no markdown formatting, \
no emojis, no code blocks, no asterisks or special characters. Use simple, conversational \
language that sounds natural when spoken aloud.";

/// Opening line
pub const GREETING: &str = "Hey, how can I help you today?";

/// Instructions for a generated opening line
pub const GREETING_INSTRUCTIONS: &str = "Greet the user and offer your assistance.";

/// Phases a job moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    AwaitingPeer,
    ResolvingFeatureFlag,
    Configuring,
    Active,
    Terminal,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::AwaitingPeer => "awaiting_peer",
            Self::ResolvingFeatureFlag => "resolving_feature_flag",
            Self::Configuring => "configuring",
            Self::Active => "active",
            Self::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

fn enter(room: &str, phase: SessionPhase) {
    tracing::info!(room, %phase, "session phase");
}

/// Start the agent for one room
///
/// Returns the running session once the greeting has started playing.
///
/// # Errors
///
/// Returns error if the room cannot be joined
pub async fn entrypoint(
    ctx: Arc<AppContext>,
    connector: &dyn RoomConnector,
) -> Result<AgentSession> {
    enter("-", SessionPhase::Connecting);
    let connected = connector.connect().await?;
    let room = connected.room.name().to_string();

    enter(&room, SessionPhase::AwaitingPeer);
    tokio::time::sleep(ctx.config.session.peer_grace).await;

    enter(&room, SessionPhase::ResolvingFeatureFlag);
    let flags = resolve_feature_flags(&connected.room.remote_participants());
    ctx.telemetry
        .report_best_effort(Level::Info, format!("RAG enabled: {}", flags.rag_enabled));

    enter(&room, SessionPhase::Configuring);
    let config = SessionConfig::build(&ctx, flags);
    tracing::info!(room = %room, tools = ?config.tools.names(), "using tools");
    let agent = Agent::new(AGENT_INSTRUCTIONS, config);

    enter(&room, SessionPhase::Active);
    let session = AgentSession::start(agent, connected);

    let greeting = match ctx.config.session.greeting_mode {
        GreetingMode::Say => session.say(GREETING, true).await,
        GreetingMode::Generate => session.generate_reply(GREETING_INSTRUCTIONS, true).await,
    };
    if let Err(e) = greeting {
        tracing::warn!(room = %room, error = %e, "greeting failed");
        ctx.telemetry
            .report_best_effort(Level::Warning, format!("greeting failed: {e}"));
    }

    Ok(session)
}

/// Run one room's job to completion
pub async fn run_job(ctx: Arc<AppContext>, connector: impl RoomConnector) {
    match entrypoint(ctx, &connector).await {
        Ok(session) => {
            let room = session.room().to_string();
            session.closed().await;
            enter(&room, SessionPhase::Terminal);
        }
        Err(e) => {
            tracing::error!(error = %e, "agent job failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instructions_name_the_tool() {
        assert!(AGENT_INSTRUCTIONS.contains(crate::retrieval::QUERY_INFO_TOOL));
    }

    #[test]
    fn phase_display() {
        assert_eq!(SessionPhase::ResolvingFeatureFlag.to_string(), "resolving_feature_flag");
    }
}
