//! Process-wide context shared by every session
//!
//! Built once at startup, after the index is ready, and handed to each room
//! job explicitly.

use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{EmbeddingProvider, OpenAiEmbedder};
use crate::index::{self, BuildOptions, IndexHandle};
use crate::llm::{ModelFactory, openai_factory};
use crate::retrieval::QueryInfoTool;
use crate::telemetry::Telemetry;
use crate::voice::{BasetenSpeech, SpeechServices};
use crate::Result;

/// Shared services for all sessions
pub struct AppContext {
    pub config: Arc<Config>,
    pub index: IndexHandle,
    pub telemetry: Telemetry,
    /// Produces completion model bindings
    pub models: ModelFactory,
    pub speech: Arc<dyn SpeechServices>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("index", &self.index)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl AppContext {
    /// Build or load the index and bind the hosted services
    ///
    /// # Errors
    ///
    /// Returns error if the index cannot be built or loaded
    pub async fn initialize(config: Config) -> Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(OpenAiEmbedder::new(config.api_key.clone(), &config.embedding));

        let index = index::ensure_index_with(
            &config.index.data_dir,
            &config.index.persist_dir,
            embedder,
            &BuildOptions::from(&config.index),
        )
        .await?;

        let telemetry = Telemetry::new(&config.telemetry);
        let models = openai_factory(config.api_key.clone(), config.inference.clone());
        let speech: Arc<dyn SpeechServices> =
            Arc::new(BasetenSpeech::new(&config.api_key, &config.voice));

        Ok(Self::from_parts(config, index, telemetry, models, speech))
    }

    /// Assemble a context from already-built parts
    #[must_use]
    pub fn from_parts(
        config: Config,
        index: IndexHandle,
        telemetry: Telemetry,
        models: ModelFactory,
        speech: Arc<dyn SpeechServices>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            index,
            telemetry,
            models,
            speech,
        }
    }

    /// The retrieval tool bound to this context
    #[must_use]
    pub fn query_info_tool(&self) -> QueryInfoTool {
        QueryInfoTool::new(
            Arc::clone(&self.index),
            self.telemetry.clone(),
            Arc::clone(&self.models),
            self.config.index.top_k,
        )
    }
}
