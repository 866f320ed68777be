//! Speech pipeline services
//!
//! STT and TTS run against hosted endpoints; voice activity and end-of-turn
//! detection run locally on the session's 16 kHz audio.

pub mod audio;
mod stt;
mod tts;
mod vad;

use std::sync::Arc;

use secrecy::SecretString;

pub use audio::{FRAME_SAMPLES, SAMPLE_RATE, samples_to_wav};
pub use stt::{BasetenStt, SpeechToText};
pub use tts::{BasetenTts, TTS_RAW_SAMPLE_RATE, TextToSpeech};
pub use vad::{
    EnergyVad, SilenceTurnDetector, TurnDetector, TurnSignal, VoiceActivityDetector,
    calculate_energy,
};

use crate::config::VoiceConfig;

/// Source of the four speech bindings a session needs
pub trait SpeechServices: Send + Sync {
    fn stt(&self) -> Arc<dyn SpeechToText>;

    fn tts(&self) -> Arc<dyn TextToSpeech>;

    fn vad(&self) -> Arc<dyn VoiceActivityDetector>;

    /// A fresh turn detector (they are stateful, one per session)
    fn turn_detector(&self) -> Box<dyn TurnDetector>;
}

/// Hosted STT/TTS with local energy VAD and silence turn detection
pub struct BasetenSpeech {
    stt: Arc<BasetenStt>,
    tts: Arc<BasetenTts>,
    vad: Arc<EnergyVad>,
    config: VoiceConfig,
}

impl BasetenSpeech {
    #[must_use]
    pub fn new(api_key: &SecretString, config: &VoiceConfig) -> Self {
        Self {
            stt: Arc::new(BasetenStt::new(api_key.clone(), &config.stt_endpoint)),
            tts: Arc::new(BasetenTts::new(
                api_key.clone(),
                &config.tts_endpoint,
                &config.tts_voice,
                config.tts_max_tokens,
            )),
            vad: Arc::new(EnergyVad::new(config.vad_threshold)),
            config: config.clone(),
        }
    }
}

impl SpeechServices for BasetenSpeech {
    fn stt(&self) -> Arc<dyn SpeechToText> {
        self.stt.clone()
    }

    fn tts(&self) -> Arc<dyn TextToSpeech> {
        self.tts.clone()
    }

    fn vad(&self) -> Arc<dyn VoiceActivityDetector> {
        self.vad.clone()
    }

    fn turn_detector(&self) -> Box<dyn TurnDetector> {
        Box::new(SilenceTurnDetector::new(
            self.config.min_speech,
            self.config.turn_silence,
        ))
    }
}
