//! Voice activity and end-of-turn detection
//!
//! A frame counts as speech when its RMS energy exceeds a threshold. The turn
//! detector accumulates frames once speech starts and commits the turn after
//! enough speech followed by enough silence.

use std::time::Duration;

use super::audio::SAMPLE_RATE;

/// Default RMS energy threshold
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.03;

/// Classifies audio frames as speech or non-speech
pub trait VoiceActivityDetector: Send + Sync {
    fn is_speech(&self, frame: &[f32]) -> bool;
}

/// Energy-threshold detector
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(DEFAULT_ENERGY_THRESHOLD)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn is_speech(&self, frame: &[f32]) -> bool {
        calculate_energy(frame) > self.threshold
    }
}

/// RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Outcome of feeding one frame to a [`TurnDetector`]
#[derive(Debug, Clone, PartialEq)]
pub enum TurnSignal {
    /// No user speech in progress
    Idle,
    /// User started speaking with this frame
    SpeechStarted,
    /// User turn in progress
    Listening,
    /// User turn committed, with the captured audio
    TurnEnded(Vec<f32>),
    /// Speech was too short to count as a turn
    Discarded,
}

/// Decides when a user has finished speaking
pub trait TurnDetector: Send {
    /// Feed one frame along with the VAD decision for it
    fn push(&mut self, frame: &[f32], is_speech: bool) -> TurnSignal;

    /// Drop any partial turn
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Listening,
}

/// Commits a turn after a minimum amount of speech followed by silence
#[derive(Debug)]
pub struct SilenceTurnDetector {
    min_speech_samples: usize,
    silence_samples: usize,
    state: State,
    buffer: Vec<f32>,
    speech_counter: usize,
    silence_counter: usize,
}

impl SilenceTurnDetector {
    #[must_use]
    pub fn new(min_speech: Duration, silence: Duration) -> Self {
        Self {
            min_speech_samples: duration_to_samples(min_speech),
            silence_samples: duration_to_samples(silence).max(1),
            state: State::Idle,
            buffer: Vec::new(),
            speech_counter: 0,
            silence_counter: 0,
        }
    }
}

impl Default for SilenceTurnDetector {
    fn default() -> Self {
        Self::new(Duration::from_millis(300), Duration::from_millis(500))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn duration_to_samples(d: Duration) -> usize {
    (d.as_secs_f64() * f64::from(SAMPLE_RATE)).round() as usize
}

impl TurnDetector for SilenceTurnDetector {
    fn push(&mut self, frame: &[f32], is_speech: bool) -> TurnSignal {
        match self.state {
            State::Idle => {
                if !is_speech {
                    return TurnSignal::Idle;
                }
                self.state = State::Listening;
                self.buffer.clear();
                self.buffer.extend_from_slice(frame);
                self.speech_counter = frame.len();
                self.silence_counter = 0;
                tracing::trace!("speech started");
                TurnSignal::SpeechStarted
            }
            State::Listening => {
                self.buffer.extend_from_slice(frame);
                if is_speech {
                    self.speech_counter += frame.len();
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += frame.len();
                }

                if self.silence_counter < self.silence_samples {
                    return TurnSignal::Listening;
                }

                if self.speech_counter >= self.min_speech_samples {
                    tracing::debug!(
                        samples = self.buffer.len(),
                        speech = self.speech_counter,
                        "user turn complete"
                    );
                    let audio = std::mem::take(&mut self.buffer);
                    self.reset();
                    TurnSignal::TurnEnded(audio)
                } else {
                    tracing::trace!(speech = self.speech_counter, "speech too short, discarding");
                    self.reset();
                    TurnSignal::Discarded
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state = State::Idle;
        self.buffer.clear();
        self.speech_counter = 0;
        self.silence_counter = 0;
    }
}
