//! Speech-to-text (STT) processing

use async_trait::async_trait;
use base64::Engine as _;
use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Transcribes a finished user utterance
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe WAV audio to text
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

/// STT backed by a hosted Whisper-style predict endpoint
pub struct BasetenStt {
    client: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
}

impl BasetenStt {
    #[must_use]
    pub fn new(api_key: SecretString, endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl SpeechToText for BasetenStt {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let body = serde_json::json!({
            "audio": {
                "audio_b64": base64::engine::general_purpose::STANDARD.encode(wav),
            }
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Api-Key {}", self.api_key.expose_secret()))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "STT request failed");
                Error::Stt(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "STT API error");
            return Err(Error::Stt(format!("STT API error {status}: {body}")));
        }

        let value: serde_json::Value = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse STT response");
            Error::Stt(format!("invalid STT response: {e}"))
        })?;

        let transcript = extract_transcript(&value)
            .ok_or_else(|| Error::Stt("STT response has no transcript".to_string()))?;

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// Read `text`, or join `segments[].text`
fn extract_transcript(value: &serde_json::Value) -> Option<String> {
    if let Some(text) = value.get("text").and_then(serde_json::Value::as_str) {
        return Some(text.trim().to_string());
    }

    let segments = value.get("segments")?.as_array()?;
    let joined = segments
        .iter()
        .filter_map(|s| s.get("text").and_then(serde_json::Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_from_text_field() {
        let v = serde_json::json!({ "text": " hello there " });
        assert_eq!(extract_transcript(&v).as_deref(), Some("hello there"));
    }

    #[test]
    fn transcript_from_segments() {
        let v = serde_json::json!({
            "segments": [{ "text": "hello" }, { "text": " world " }],
            "language_code": "en"
        });
        assert_eq!(extract_transcript(&v).as_deref(), Some("hello world"));
    }

    #[test]
    fn transcript_missing() {
        assert!(extract_transcript(&serde_json::json!({ "status": "ok" })).is_none());
    }
}
