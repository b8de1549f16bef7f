//! Facial expression cross-fading.
//!
//! An expression is a named morph weight, cross-faded independently of
//! skeletal motion. The fade tracks `(current, target, intensity,
//! target_intensity)` and converges at a fixed per-tick rate; the `aa`
//! mouth-open morph is driven separately while talking.

use crate::audio::sentiment::Sentiment;
use std::fmt;

/// Named morph targets exposed by the humanoid rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Angry,
    Surprised,
    Relaxed,
    Blink,
    BlinkLeft,
    BlinkRight,
    /// Mouth-open morph driven during talking.
    Aa,
}

impl Expression {
    /// Every morph the engine can address.
    pub const ALL: [Expression; 10] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Angry,
        Expression::Surprised,
        Expression::Relaxed,
        Expression::Blink,
        Expression::BlinkLeft,
        Expression::BlinkRight,
        Expression::Aa,
    ];

    /// The expression matched to a speech sentiment when talking starts.
    #[must_use]
    pub fn for_sentiment(sentiment: Sentiment) -> (Expression, f32) {
        match sentiment {
            Sentiment::Happy => (Expression::Happy, 0.6),
            Sentiment::Excited => (Expression::Happy, 0.8),
            Sentiment::Enthusiastic => (Expression::Happy, 0.5),
            Sentiment::Sad => (Expression::Sad, 0.5),
            Sentiment::Neutral => (Expression::Relaxed, 0.3),
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Angry => "angry",
            Expression::Surprised => "surprised",
            Expression::Relaxed => "relaxed",
            Expression::Blink => "blink",
            Expression::BlinkLeft => "blinkLeft",
            Expression::BlinkRight => "blinkRight",
            Expression::Aa => "aa",
        };
        f.write_str(name)
    }
}

/// Fixed per-tick cross-fade rate.
const FADE_RATE: f32 = 0.05;

/// Cross-fade state machine for the face.
///
/// While `current != target` the old expression fades out first, then the
/// new one fades in toward its target intensity. An optional revert timer
/// returns the face to neutral after a hold.
#[derive(Debug, Clone)]
pub struct ExpressionFade {
    current: Expression,
    target: Expression,
    intensity: f32,
    target_intensity: f32,
    /// Seconds until an automatic revert to neutral, when set.
    revert_in: Option<f32>,
}

impl Default for ExpressionFade {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionFade {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Expression::Neutral,
            target: Expression::Neutral,
            intensity: 0.0,
            target_intensity: 0.0,
            revert_in: None,
        }
    }

    /// Begin a cross-fade toward `(target, intensity)`, optionally reverting
    /// to neutral after `revert_ms`.
    pub fn set(&mut self, target: Expression, intensity: f32, revert_ms: Option<u64>) {
        self.target = target;
        self.target_intensity = intensity.clamp(0.0, 1.0);
        self.revert_in = revert_ms.map(|ms| ms as f32 / 1000.0);
    }

    /// Advance one tick of `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        if let Some(remaining) = self.revert_in.as_mut() {
            *remaining -= dt;
            if *remaining <= 0.0 {
                self.revert_in = None;
                self.target = Expression::Neutral;
                self.target_intensity = 0.0;
            }
        }

        if self.current != self.target {
            // Fade the old expression out before switching over.
            self.intensity -= FADE_RATE;
            if self.intensity <= 0.0 {
                self.intensity = 0.0;
                self.current = self.target;
            }
        } else if (self.intensity - self.target_intensity).abs() <= FADE_RATE {
            self.intensity = self.target_intensity;
        } else if self.intensity < self.target_intensity {
            self.intensity += FADE_RATE;
        } else {
            self.intensity -= FADE_RATE;
        }
    }

    /// The single `(expression, weight)` pair currently on the face.
    #[must_use]
    pub fn weight(&self) -> (Expression, f32) {
        (self.current, self.intensity)
    }

    /// True once the fade has converged on its target.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.current == self.target
            && (self.intensity - self.target_intensity).abs() < f32::EPSILON
    }
}
