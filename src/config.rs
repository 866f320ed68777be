//! Configuration management for the RAG voice agent
//!
//! Everything is read from the environment (optionally seeded from a `.env`
//! file by the binary). The only required value is the inference API key;
//! every other setting has a default matching the deployed services.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::{Error, Result};

/// Environment variable holding the inference API key
pub const API_KEY_ENV: &str = "BASETEN_API_KEY";

/// Default OpenAI-compatible inference base URL
pub const DEFAULT_INFERENCE_URL: &str = "https://inference.baseten.co/v1";

/// Default completion model for both the conversation and the retrieval tool
pub const DEFAULT_LLM_MODEL: &str = "deepseek-ai/DeepSeek-V3-0324";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "BAAI/bge-small-en-v1.5";

/// Output dimension of the default embedding model
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// Default STT model endpoint
pub const DEFAULT_STT_ENDPOINT: &str =
    "https://model-8w6kke53.api.baseten.co/environments/production/predict";

/// Default TTS model endpoint
pub const DEFAULT_TTS_ENDPOINT: &str =
    "https://model-6wg11gjw.api.baseten.co/environments/production/predict";

/// Default log observer endpoint for the telemetry sidecar
pub const DEFAULT_TELEMETRY_URL: &str = "http://localhost:3000/api/logs";

/// Agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Inference API key (shared by LLM, embeddings, STT and TTS)
    pub api_key: SecretString,

    /// Completion model configuration
    pub inference: InferenceConfig,

    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,

    /// Speech pipeline configuration
    pub voice: VoiceConfig,

    /// Semantic index locations and build parameters
    pub index: IndexConfig,

    /// Per-session orchestration settings
    pub session: SessionSettings,

    /// Telemetry sidecar configuration
    pub telemetry: TelemetryConfig,

    /// Room server configuration
    pub server: ServerConfig,
}

/// Completion model configuration
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// OpenAI-compatible base URL (without `/chat/completions`)
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature, if the model default should be overridden
    pub temperature: Option<f32>,
}

/// Embedding provider configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible base URL (without `/embeddings`)
    pub base_url: String,

    /// Embedding model identifier
    pub model: String,

    /// Vector dimension produced by the model
    pub dimensions: usize,
}

/// Speech pipeline configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT predict endpoint
    pub stt_endpoint: String,

    /// TTS predict endpoint
    pub tts_endpoint: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// Upper bound on generated TTS tokens per utterance
    pub tts_max_tokens: u32,

    /// RMS energy above which a frame counts as speech
    pub vad_threshold: f32,

    /// Silence after speech that commits a user turn
    pub turn_silence: Duration,

    /// Minimum speech needed before a turn can be committed
    pub min_speech: Duration,
}

/// Semantic index locations and build parameters
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Directory holding the source documents
    pub data_dir: PathBuf,

    /// Directory holding the persisted index
    pub persist_dir: PathBuf,

    /// Target chunk size in characters
    pub chunk_size: usize,

    /// Overlap carried from one chunk into the next, in characters
    pub chunk_overlap: usize,

    /// Texts per embedding request during the build
    pub embed_batch_size: usize,

    /// Chunks retrieved per query
    pub top_k: usize,
}

/// How the opening utterance is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GreetingMode {
    /// Speak the fixed greeting line
    #[default]
    Say,
    /// Ask the LLM to generate a greeting
    Generate,
}

/// Per-session orchestration settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Time to wait after connecting before reading peer metadata
    pub peer_grace: Duration,

    /// How the opening utterance is produced
    pub greeting_mode: GreetingMode,

    /// Max tool-call rounds per user turn
    pub max_tool_rounds: usize,
}

/// Telemetry sidecar configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Enable the sidecar
    pub enabled: bool,

    /// Observer endpoint accepting `{level, message}` JSON
    pub url: String,

    /// Per-post timeout
    pub timeout: Duration,
}

/// Room server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port the room WebSocket server listens on
    pub port: u16,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_INFERENCE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            temperature: None,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_INFERENCE_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIM,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_endpoint: DEFAULT_STT_ENDPOINT.to_string(),
            tts_endpoint: DEFAULT_TTS_ENDPOINT.to_string(),
            tts_voice: "tara".to_string(),
            tts_max_tokens: 2000,
            vad_threshold: 0.03,
            turn_silence: Duration::from_millis(500),
            min_speech: Duration::from_millis(300),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            persist_dir: PathBuf::from("query-engine-storage"),
            chunk_size: 1024,
            chunk_overlap: 128,
            embed_batch_size: 32,
            top_k: 4,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            peer_grace: Duration::from_secs(1),
            greeting_mode: GreetingMode::Say,
            max_tool_rounds: 5,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: DEFAULT_TELEMETRY_URL.to_string(),
            timeout: Duration::from_secs(1),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 18791 }
    }
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingCredential` if `BASETEN_API_KEY` is unset or
    /// empty, or `Error::Config` if a variable has an unparseable value
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// # Errors
    ///
    /// Returns `Error::MissingCredential` if the API key is absent, or
    /// `Error::Config` if a variable has an unparseable value
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Checked first so nothing else is evaluated without a credential
        let api_key = lookup(API_KEY_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(Error::MissingCredential(API_KEY_ENV))?;

        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let inference_defaults = InferenceConfig::default();
        let inference = InferenceConfig {
            base_url: var("RAG_LLM_BASE_URL").unwrap_or(inference_defaults.base_url),
            model: var("RAG_LLM_MODEL").unwrap_or(inference_defaults.model),
            temperature: parse_opt(var("RAG_LLM_TEMPERATURE"), "RAG_LLM_TEMPERATURE")?,
        };

        let embedding_defaults = EmbeddingConfig::default();
        let embedding = EmbeddingConfig {
            base_url: var("RAG_EMBEDDING_BASE_URL").unwrap_or(embedding_defaults.base_url),
            model: var("RAG_EMBEDDING_MODEL").unwrap_or(embedding_defaults.model),
            dimensions: parse_opt(var("RAG_EMBEDDING_DIM"), "RAG_EMBEDDING_DIM")?
                .unwrap_or(embedding_defaults.dimensions),
        };
        if embedding.dimensions == 0 {
            return Err(Error::Config("RAG_EMBEDDING_DIM must be positive".to_string()));
        }

        let voice_defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            stt_endpoint: var("RAG_STT_ENDPOINT").unwrap_or(voice_defaults.stt_endpoint),
            tts_endpoint: var("RAG_TTS_ENDPOINT").unwrap_or(voice_defaults.tts_endpoint),
            tts_voice: var("RAG_TTS_VOICE").unwrap_or(voice_defaults.tts_voice),
            tts_max_tokens: parse_opt(var("RAG_TTS_MAX_TOKENS"), "RAG_TTS_MAX_TOKENS")?
                .unwrap_or(voice_defaults.tts_max_tokens),
            vad_threshold: parse_opt(var("RAG_VAD_THRESHOLD"), "RAG_VAD_THRESHOLD")?
                .unwrap_or(voice_defaults.vad_threshold),
            turn_silence: parse_opt(var("RAG_TURN_SILENCE_MS"), "RAG_TURN_SILENCE_MS")?
                .map_or(voice_defaults.turn_silence, Duration::from_millis),
            min_speech: parse_opt(var("RAG_MIN_SPEECH_MS"), "RAG_MIN_SPEECH_MS")?
                .map_or(voice_defaults.min_speech, Duration::from_millis),
        };

        let index_defaults = IndexConfig::default();
        let index = IndexConfig {
            data_dir: var("RAG_DATA_DIR").map_or(index_defaults.data_dir, PathBuf::from),
            persist_dir: var("RAG_PERSIST_DIR").map_or(index_defaults.persist_dir, PathBuf::from),
            chunk_size: parse_opt(var("RAG_CHUNK_SIZE"), "RAG_CHUNK_SIZE")?
                .unwrap_or(index_defaults.chunk_size),
            chunk_overlap: parse_opt(var("RAG_CHUNK_OVERLAP"), "RAG_CHUNK_OVERLAP")?
                .unwrap_or(index_defaults.chunk_overlap),
            embed_batch_size: parse_opt(var("RAG_EMBED_BATCH_SIZE"), "RAG_EMBED_BATCH_SIZE")?
                .unwrap_or(index_defaults.embed_batch_size)
                .max(1),
            top_k: parse_opt(var("RAG_TOP_K"), "RAG_TOP_K")?
                .unwrap_or(index_defaults.top_k)
                .max(1),
        };
        if index.chunk_overlap >= index.chunk_size {
            return Err(Error::Config(
                "RAG_CHUNK_OVERLAP must be smaller than RAG_CHUNK_SIZE".to_string(),
            ));
        }

        let session_defaults = SessionSettings::default();
        let session = SessionSettings {
            peer_grace: parse_opt(var("RAG_PEER_GRACE_MS"), "RAG_PEER_GRACE_MS")?
                .map_or(session_defaults.peer_grace, Duration::from_millis),
            greeting_mode: match var("RAG_GREETING_MODE").as_deref() {
                None | Some("say") => GreetingMode::Say,
                Some("generate") => GreetingMode::Generate,
                Some(other) => {
                    return Err(Error::Config(format!(
                        "RAG_GREETING_MODE must be \"say\" or \"generate\", got {other:?}"
                    )));
                }
            },
            max_tool_rounds: parse_opt(var("RAG_MAX_TOOL_ROUNDS"), "RAG_MAX_TOOL_ROUNDS")?
                .unwrap_or(session_defaults.max_tool_rounds)
                .max(1),
        };

        let telemetry_defaults = TelemetryConfig::default();
        let telemetry = TelemetryConfig {
            enabled: parse_opt(var("RAG_TELEMETRY_ENABLED"), "RAG_TELEMETRY_ENABLED")?
                .unwrap_or(telemetry_defaults.enabled),
            url: var("RAG_TELEMETRY_URL").unwrap_or(telemetry_defaults.url),
            timeout: telemetry_defaults.timeout,
        };

        let server = ServerConfig {
            port: parse_opt(var("RAG_PORT"), "RAG_PORT")?.unwrap_or(ServerConfig::default().port),
        };

        Ok(Self {
            api_key: SecretString::from(api_key),
            inference,
            embedding,
            voice,
            index,
            session,
            telemetry,
            server,
        })
    }
}

/// Parse an optional variable, naming it in the error
fn parse_opt<T>(value: Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| Error::Config(format!("invalid {name}={v:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_api_key_is_specific_error() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, Error::MissingCredential(API_KEY_ENV)));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let err = Config::from_lookup(lookup_from(&[(API_KEY_ENV, "   ")])).unwrap_err();
        assert!(matches!(err, Error::MissingCredential(_)));
    }

    #[test]
    fn missing_key_wins_over_other_bad_values() {
        let err = Config::from_lookup(lookup_from(&[("RAG_TOP_K", "lots")])).unwrap_err();
        assert!(matches!(err, Error::MissingCredential(_)));
    }

    #[test]
    fn defaults_applied() {
        let config = Config::from_lookup(lookup_from(&[(API_KEY_ENV, "key")])).unwrap();
        assert_eq!(config.api_key.expose_secret(), "key");
        assert_eq!(config.inference.base_url, DEFAULT_INFERENCE_URL);
        assert_eq!(config.inference.model, DEFAULT_LLM_MODEL);
        assert_eq!(config.embedding.dimensions, DEFAULT_EMBEDDING_DIM);
        assert_eq!(config.index.persist_dir, PathBuf::from("query-engine-storage"));
        assert_eq!(config.session.peer_grace, Duration::from_secs(1));
        assert_eq!(config.session.greeting_mode, GreetingMode::Say);
        assert_eq!(config.telemetry.timeout, Duration::from_secs(1));
        assert!(config.telemetry.enabled);
    }

    #[test]
    fn overrides_applied() {
        let config = Config::from_lookup(lookup_from(&[
            (API_KEY_ENV, "key"),
            ("RAG_LLM_MODEL", "other-model"),
            ("RAG_PEER_GRACE_MS", "250"),
            ("RAG_DATA_DIR", "/srv/docs"),
            ("RAG_GREETING_MODE", "generate"),
            ("RAG_TELEMETRY_ENABLED", "false"),
        ]))
        .unwrap();
        assert_eq!(config.inference.model, "other-model");
        assert_eq!(config.session.peer_grace, Duration::from_millis(250));
        assert_eq!(config.index.data_dir, PathBuf::from("/srv/docs"));
        assert_eq!(config.session.greeting_mode, GreetingMode::Generate);
        assert!(!config.telemetry.enabled);
    }

    #[test]
    fn invalid_number_rejected() {
        let err = Config::from_lookup(lookup_from(&[(API_KEY_ENV, "key"), ("RAG_TOP_K", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("RAG_TOP_K"));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let err = Config::from_lookup(lookup_from(&[
            (API_KEY_ENV, "key"),
            ("RAG_CHUNK_SIZE", "100"),
            ("RAG_CHUNK_OVERLAP", "100"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
