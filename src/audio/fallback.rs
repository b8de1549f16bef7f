//! Local speech fallback.
//!
//! When the TTS endpoint is unreachable or answers with the fallback header,
//! speech is rendered locally: a soft synthetic voice tone whose duration
//! tracks the text at a natural speaking pace. The fallback never fails, so a
//! queued item always produces a playback and the queue keeps draining.

use crate::audio::sentiment::Sentiment;
use crate::audio::sink::PcmClip;
use crate::audio::SpeechItem;
use tracing::debug;

/// Average speaking pace used to size fallback clips, in words per minute.
const WORDS_PER_MINUTE: f32 = 150.0;
/// Base frequency of the synthetic voice in Hz.
const VOICE_HZ: f32 = 180.0;
/// Peak amplitude of the rendered tone.
const AMPLITUDE: f32 = 0.25;

/// Voice installed on the local synthesizer.
#[derive(Debug, Clone)]
pub struct VoiceProfile {
    pub name: String,
    pub lang: String,
}

impl VoiceProfile {
    #[must_use]
    pub fn new(name: &str, lang: &str) -> Self {
        Self {
            name: name.to_owned(),
            lang: lang.to_owned(),
        }
    }
}

/// Ordered name fragments used to pick a voice; earlier entries win.
const VOICE_PREFERENCES: &[&str] = &[
    "samantha", "victoria", "karen", "moira", "tessa", "fiona", "female", "woman",
];

/// Locally rendered speech for when the synthesis endpoint is down.
#[derive(Debug, Default)]
pub struct FallbackSpeech {
    voices: Vec<VoiceProfile>,
}

impl FallbackSpeech {
    #[must_use]
    pub fn new(voices: Vec<VoiceProfile>) -> Self {
        Self { voices }
    }

    /// Pick the preferred voice: the first profile matching a preference
    /// fragment, else the first installed voice, else none.
    #[must_use]
    pub fn select_voice(&self) -> Option<&VoiceProfile> {
        for fragment in VOICE_PREFERENCES {
            if let Some(voice) = self
                .voices
                .iter()
                .find(|v| v.name.to_lowercase().contains(fragment))
            {
                return Some(voice);
            }
        }
        self.voices.first()
    }

    /// Adjust text for the local voice. Excited speech pads exclamation marks
    /// so consecutive bursts get a breath between them.
    #[must_use]
    pub fn prepare_text(text: &str, sentiment: Sentiment) -> String {
        match sentiment {
            Sentiment::Excited => text.replace('!', "! "),
            _ => text.to_owned(),
        }
    }

    /// Render an item to PCM. Infallible: empty text yields a minimal clip.
    #[must_use]
    pub fn render(&self, item: &SpeechItem, sample_rate: u32) -> PcmClip {
        let text = Self::prepare_text(&item.text, item.sentiment);
        let duration = estimate_duration(&text, item.rate);
        let voice = self
            .select_voice()
            .map_or_else(|| "<none>".to_owned(), |v| v.name.clone());
        debug!(
            "fallback speech: {:.1}s via '{voice}' for {} chars",
            duration,
            text.len()
        );

        let total = (duration * sample_rate as f32) as usize;
        let samples = (0..total)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                // Slow tremolo keeps the tone voice-like rather than a beep.
                let tremolo = 0.7 + 0.3 * (2.0 * std::f32::consts::PI * 4.0 * t).sin();
                let phase = 2.0 * std::f32::consts::PI * VOICE_HZ * item.pitch * t;
                phase.sin() * AMPLITUDE * tremolo
            })
            .collect();
        PcmClip {
            samples,
            sample_rate,
        }
    }
}

/// Duration of spoken text at a natural pace, scaled by the rate multiplier.
#[must_use]
pub fn estimate_duration(text: &str, rate: f32) -> f32 {
    let words = text.split_whitespace().count().max(1) as f32;
    let base = words / WORDS_PER_MINUTE * 60.0;
    (base / rate.max(0.1)).max(0.4)
}
