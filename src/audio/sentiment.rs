//! Heuristic sentiment classifier for speech prosody.
//!
//! Analyses reply text with a fast case-insensitive keyword scan and maps it
//! to one of five sentiments. The sentiment picks the expression the avatar
//! wears while talking and the `(rate, pitch)` pair sent to the TTS engine.
//!
//! Classification is deterministic: the first matching layer wins, and
//! intensity markers (exclamations, "wow") outrank plain joyful vocabulary so
//! that an excited phrasing of a happy thought still reads as excited.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Emotional tone of a piece of speech.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Neutral,
    Happy,
    Excited,
    Enthusiastic,
    Sad,
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sentiment::Neutral => "neutral",
            Sentiment::Happy => "happy",
            Sentiment::Excited => "excited",
            Sentiment::Enthusiastic => "enthusiastic",
            Sentiment::Sad => "sad",
        };
        f.write_str(name)
    }
}

/// Rate/pitch pair derived from a sentiment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prosody {
    /// Speech rate multiplier.
    pub rate: f32,
    /// Pitch multiplier.
    pub pitch: f32,
}

// ── Keyword tables ──────────────────────────────────────────────────────

const EXCITED_MARKERS: &[&str] = &["wow", "really?", "!", "incredible", "amazing", "surprised"];

const HAPPY_KEYWORDS: &[&str] = &[
    "happy",
    "great",
    "awesome",
    "wonderful",
    "love",
    "amazing",
    "excited",
    "fantastic",
];

const SAD_KEYWORDS: &[&str] = &[
    "sad",
    "sorry",
    "bad",
    "terrible",
    "unfortunately",
    "disappointed",
];

const DOMAIN_KEYWORDS: &[&str] = &["solana", "crypto", "blockchain", "defi"];

/// Classify the emotional tone of speech text.
///
/// Layers are checked in priority order; the first hit wins:
/// 1. Intensity markers → [`Sentiment::Excited`]
/// 2. Joyful vocabulary → [`Sentiment::Happy`]
/// 3. Negative vocabulary → [`Sentiment::Sad`]
/// 4. Domain vocabulary → [`Sentiment::Enthusiastic`]
/// 5. Fallback → [`Sentiment::Neutral`]
#[must_use]
pub fn classify(text: &str) -> Sentiment {
    let lower = text.to_lowercase();
    let contains_any = |keywords: &[&str]| keywords.iter().any(|kw| lower.contains(kw));

    if contains_any(EXCITED_MARKERS) {
        Sentiment::Excited
    } else if contains_any(HAPPY_KEYWORDS) {
        Sentiment::Happy
    } else if contains_any(SAD_KEYWORDS) {
        Sentiment::Sad
    } else if contains_any(DOMAIN_KEYWORDS) {
        Sentiment::Enthusiastic
    } else {
        Sentiment::Neutral
    }
}

/// The rate/pitch pair for a sentiment.
#[must_use]
pub fn prosody(sentiment: Sentiment) -> Prosody {
    match sentiment {
        Sentiment::Excited => Prosody {
            rate: 1.00,
            pitch: 1.20,
        },
        Sentiment::Happy => Prosody {
            rate: 0.95,
            pitch: 1.15,
        },
        Sentiment::Enthusiastic => Prosody {
            rate: 0.92,
            pitch: 1.10,
        },
        Sentiment::Sad => Prosody {
            rate: 0.80,
            pitch: 1.00,
        },
        Sentiment::Neutral => Prosody {
            rate: 0.90,
            pitch: 1.10,
        },
    }
}
