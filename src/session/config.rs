//! Immutable per-conversation configuration

use std::sync::Arc;

use super::metadata::FeatureFlags;
use crate::context::AppContext;
use crate::llm::ChatModel;
use crate::tools::{Tool, ToolSet};
use crate::voice::{SpeechToText, TextToSpeech, TurnDetector, VoiceActivityDetector};

/// Everything a session needs, resolved before it starts
pub struct SessionConfig {
    pub flags: FeatureFlags,
    pub tools: ToolSet,
    pub llm: Arc<dyn ChatModel>,
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub vad: Arc<dyn VoiceActivityDetector>,
    pub turn_detector: Box<dyn TurnDetector>,
    /// Max tool-call rounds per reply
    pub max_tool_rounds: usize,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("flags", &self.flags)
            .field("tools", &self.tools)
            .field("llm", &self.llm.model_id())
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Bind services from the process context for the given flags
    #[must_use]
    pub fn build(ctx: &AppContext, flags: FeatureFlags) -> Self {
        let retrieval: Arc<dyn Tool> = Arc::new(ctx.query_info_tool());
        Self {
            flags,
            tools: tools_for(flags, retrieval),
            llm: (ctx.models)(),
            stt: ctx.speech.stt(),
            tts: ctx.speech.tts(),
            vad: ctx.speech.vad(),
            turn_detector: ctx.speech.turn_detector(),
            max_tool_rounds: ctx.config.session.max_tool_rounds,
        }
    }
}

/// The retrieval tool alone when enabled, nothing otherwise
#[must_use]
pub fn tools_for(flags: FeatureFlags, retrieval: Arc<dyn Tool>) -> ToolSet {
    if flags.rag_enabled {
        ToolSet::new().with(retrieval)
    } else {
        ToolSet::new()
    }
}
