//! Shared test utilities
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use beacon_rag::embedding::EmbeddingProvider;
use beacon_rag::index::{self, IndexHandle};
use beacon_rag::llm::{ChatCompletion, ChatMessage, ChatModel, ModelFactory};
use beacon_rag::tools::ToolDefinition;
use beacon_rag::voice::{
    EnergyVad, SilenceTurnDetector, SpeechServices, SpeechToText, TextToSpeech, TurnDetector,
    VoiceActivityDetector,
};
use beacon_rag::{AppContext, Config, Result, Telemetry};

/// Vocabulary the fake embedder projects text onto
const VOCAB: [&str; 8] = [
    "deploy", "billing", "refund", "password", "nightly", "invoice", "reset", "support",
];

/// Deterministic embedder counting how often it is asked for vectors
#[derive(Debug, Default)]
pub struct KeywordEmbedder {
    pub batch_calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_id(&self) -> &str {
        "keyword-test"
    }

    fn dimensions(&self) -> usize {
        VOCAB.len()
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

#[allow(clippy::cast_precision_loss)]
fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = VOCAB.iter().map(|w| lower.matches(w).count() as f32).collect();
    // Keep every vector non-zero
    v[VOCAB.len() - 1] += 0.1;
    v
}

/// A request the scripted model received
#[derive(Debug, Clone)]
pub struct Request {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<String>,
}

/// Chat model replaying scripted completions and recording requests
///
/// Once the script runs out it answers with `fallback`.
#[derive(Debug)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<ChatCompletion>>,
    fallback: String,
    latency: Duration,
    pub requests: Mutex<Vec<Request>>,
}

impl ScriptedModel {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            latency: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Take `latency` to answer every request
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn then(self, completion: ChatCompletion) -> Self {
        self.script.lock().unwrap().push_back(completion);
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted-test"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatCompletion> {
        self.requests.lock().unwrap().push(Request {
            messages: messages.to_vec(),
            tools: tools.iter().map(|t| t.function.name.clone()).collect(),
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| ChatCompletion::text(self.fallback.clone())))
    }
}

/// Factory handing out the same model every time
pub fn factory(model: &Arc<ScriptedModel>) -> ModelFactory {
    let model = Arc::clone(model);
    Arc::new(move || Arc::clone(&model) as Arc<dyn ChatModel>)
}

/// STT returning a fixed transcript
#[derive(Debug)]
pub struct FixedStt {
    pub transcript: String,
    /// Sample count of every turn transcribed
    pub heard: Mutex<Vec<u32>>,
}

#[async_trait]
impl SpeechToText for FixedStt {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        let reader = hound::WavReader::new(std::io::Cursor::new(wav)).unwrap();
        self.heard.lock().unwrap().push(reader.len());
        Ok(self.transcript.clone())
    }
}

/// TTS producing a fixed amount of near-silent audio per utterance
#[derive(Debug)]
pub struct FixedTts {
    pub samples: usize,
    pub spoken: Mutex<Vec<String>>,
}

#[async_trait]
impl TextToSpeech for FixedTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(vec![0.001; self.samples])
    }
}

/// Local speech services for tests
pub struct FakeSpeech {
    pub stt: Arc<FixedStt>,
    pub tts: Arc<FixedTts>,
}

impl FakeSpeech {
    pub fn new(transcript: &str, tts_samples: usize) -> Self {
        Self {
            stt: Arc::new(FixedStt {
                transcript: transcript.to_string(),
                heard: Mutex::new(Vec::new()),
            }),
            tts: Arc::new(FixedTts {
                samples: tts_samples,
                spoken: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl SpeechServices for FakeSpeech {
    fn stt(&self) -> Arc<dyn SpeechToText> {
        self.stt.clone()
    }

    fn tts(&self) -> Arc<dyn TextToSpeech> {
        self.tts.clone()
    }

    fn vad(&self) -> Arc<dyn VoiceActivityDetector> {
        Arc::new(EnergyVad::default())
    }

    fn turn_detector(&self) -> Box<dyn TurnDetector> {
        Box::new(SilenceTurnDetector::new(
            Duration::from_millis(100),
            Duration::from_millis(200),
        ))
    }
}

/// One 100 ms frame of loud audio
pub fn loud_frame() -> Vec<f32> {
    vec![0.5; beacon_rag::voice::FRAME_SAMPLES]
}

/// One 100 ms frame of silence
pub fn silent_frame() -> Vec<f32> {
    vec![0.0; beacon_rag::voice::FRAME_SAMPLES]
}

/// Config from a fixed variable set with a short peer grace period
pub fn test_config(extra: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = [
        ("BASETEN_API_KEY", "test-key"),
        ("RAG_PEER_GRACE_MS", "20"),
        ("RAG_TELEMETRY_ENABLED", "false"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (k, v) in extra {
        vars.insert((*k).to_string(), (*v).to_string());
    }
    Config::from_lookup(|key| vars.get(key).cloned()).expect("test config")
}

/// Write a small corpus under `dir`
pub fn write_corpus(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("deploys.md"),
        "Deploy schedule\n\nThe deploy pipeline runs nightly at two in the morning.",
    )
    .unwrap();
    std::fs::write(
        dir.join("billing.txt"),
        "Billing questions\n\nA refund is issued to the original invoice within five days.",
    )
    .unwrap();
    std::fs::write(
        dir.join("accounts.md"),
        "Accounts\n\nTo reset a password, contact support from the login page.",
    )
    .unwrap();
}

/// Build an index over the fixture corpus in `root`
pub async fn fixture_index(root: &Path, embedder: Arc<KeywordEmbedder>) -> IndexHandle {
    let corpus = root.join("data");
    write_corpus(&corpus);
    index::ensure_index(&corpus, &root.join("storage"), embedder)
        .await
        .expect("fixture index")
}

/// Context over the fixture corpus with fake model and speech
pub async fn test_context(
    root: &Path,
    config: Config,
    model: &Arc<ScriptedModel>,
    speech: Arc<FakeSpeech>,
) -> Arc<AppContext> {
    let index = fixture_index(root, Arc::new(KeywordEmbedder::default())).await;
    Arc::new(AppContext::from_parts(
        config,
        index,
        Telemetry::disabled(),
        factory(model),
        speech,
    ))
}
