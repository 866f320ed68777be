//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::audio;
use crate::{Error, Result};

/// Sample rate of raw PCM returned by the synthesis endpoint
pub const TTS_RAW_SAMPLE_RATE: u32 = 24_000;

/// Synthesizes agent speech
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Synthesize `text` into mono samples at the session sample rate
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>>;
}

/// TTS backed by a hosted predict endpoint
pub struct BasetenTts {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    voice: String,
    max_tokens: u32,
}

impl BasetenTts {
    #[must_use]
    pub fn new(
        api_key: SecretString,
        endpoint: impl Into<String>,
        voice: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            voice: voice.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl TextToSpeech for BasetenTts {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        tracing::debug!(text_len = text.len(), voice = %self.voice, "starting synthesis");

        let body = serde_json::json!({
            "prompt": text,
            "voice": self.voice,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Api-Key {}", self.api_key.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "TTS request failed");
                Error::Tts(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "TTS API error");
            return Err(Error::Tts(format!("TTS API error {status}: {body}")));
        }

        let bytes = response.bytes().await.map_err(|e| Error::Tts(e.to_string()))?;
        let samples = audio::decode_audio(&bytes, TTS_RAW_SAMPLE_RATE)?;

        tracing::debug!(samples = samples.len(), "synthesis complete");
        Ok(samples)
    }
}
