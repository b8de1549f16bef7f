//! Gesture state machine: bounded-duration bone-orientation programs.
//!
//! Each gesture kind carries its normative math in [`GestureKind::sample`],
//! so the invariants (duration budget, touched-bone set, return-to-rest) are
//! checked at one site. At most one gesture is active; further requests queue
//! in arrival order. On completion the controller interpolates any remaining
//! deviation back to the rest pose over a short settle window.

use super::bones::{rest_pose, smooth_step, BoneId, Euler};
use super::expression::Expression;
use std::collections::VecDeque;
use std::f32::consts::{PI, TAU};

/// The gesture vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureKind {
    /// Right-arm raise, three hand oscillation cycles, settle back. 3 s.
    Wave,
    /// Single head dip. 0.8 s.
    Nod,
    /// Sideways head tilt and return. 1.0 s.
    HeadTilt,
    /// Both eyelids, triangular weight. 0.15 s.
    Blink,
    /// Left eyelid only, triangular weight. 0.5 s.
    Wink,
    /// Double nod with both arms lifted. 1.2 s.
    Excited,
    /// Head tilt with the right hand raised toward the chin. 2.0 s.
    Think,
}

impl std::fmt::Display for GestureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GestureKind::Wave => "wave",
            GestureKind::Nod => "nod",
            GestureKind::HeadTilt => "head_tilt",
            GestureKind::Blink => "blink",
            GestureKind::Wink => "wink",
            GestureKind::Excited => "excited",
            GestureKind::Think => "think",
        };
        f.write_str(name)
    }
}

impl GestureKind {
    /// Duration budget in seconds. A gesture never escapes this budget.
    #[must_use]
    pub fn duration_secs(self) -> f32 {
        match self {
            GestureKind::Wave => 3.0,
            GestureKind::Nod => 0.8,
            GestureKind::HeadTilt => 1.0,
            GestureKind::Blink => 0.15,
            GestureKind::Wink => 0.5,
            GestureKind::Excited => 1.2,
            GestureKind::Think => 2.0,
        }
    }

    /// Whether this gesture only moves eyelid morphs (skeleton untouched).
    #[must_use]
    pub fn is_eyelid_only(self) -> bool {
        matches!(self, GestureKind::Blink | GestureKind::Wink)
    }

    /// Sample the gesture at progress `p` in `[0, 1]`.
    ///
    /// Bone entries are deltas from the rest pose; morph entries are absolute
    /// weights. Sampling at `p = 1.0` returns a frame within 1e-4 rad of zero
    /// deviation for every kind.
    #[must_use]
    pub fn sample(self, p: f32) -> GestureFrame {
        let p = p.clamp(0.0, 1.0);
        match self {
            GestureKind::Wave => sample_wave(p),
            GestureKind::Nod => GestureFrame::bone(
                BoneId::Head,
                Euler::new(0.15 * (TAU * p).sin(), 0.0, 0.0),
            ),
            GestureKind::HeadTilt => GestureFrame::bone(
                BoneId::Head,
                Euler::new(0.0, 0.0, 0.2 * (PI * p).sin()),
            ),
            GestureKind::Blink => GestureFrame::morph(Expression::Blink, triangle(p)),
            GestureKind::Wink => GestureFrame::morph(Expression::BlinkLeft, triangle(p)),
            GestureKind::Excited => sample_excited(p),
            GestureKind::Think => sample_think(p),
        }
    }
}

/// One sampled animation frame: bone deltas from rest plus morph weights.
#[derive(Debug, Clone, Default)]
pub struct GestureFrame {
    /// Bone orientation deltas from the rest pose.
    pub bones: Vec<(BoneId, Euler)>,
    /// Absolute morph weights, blended by maximum with the expression fade.
    pub morphs: Vec<(Expression, f32)>,
}

impl GestureFrame {
    fn bone(bone: BoneId, delta: Euler) -> Self {
        Self {
            bones: vec![(bone, delta)],
            morphs: Vec::new(),
        }
    }

    fn morph(morph: Expression, weight: f32) -> Self {
        Self {
            bones: Vec::new(),
            morphs: vec![(morph, weight)],
        }
    }

    /// Largest absolute bone deviation in this frame.
    #[must_use]
    pub fn max_bone_deviation(&self) -> f32 {
        self.bones
            .iter()
            .map(|(_, delta)| delta.max_abs_delta(Euler::ZERO))
            .fold(0.0, f32::max)
    }
}

/// Triangular envelope peaking at `p = 0.5`.
fn triangle(p: f32) -> f32 {
    if p < 0.5 { p * 2.0 } else { (1.0 - p) * 2.0 }
}

/// Absolute orientation the right upper arm waves at, per the design pose.
const WAVE_UPPER_ARM_TARGET: Euler = Euler::new(-0.3, -0.4, 0.2);
/// Elbow bend added while waving, radians.
const WAVE_ELBOW_BEND: f32 = 0.6;

fn sample_wave(p: f32) -> GestureFrame {
    // Arm raise is expressed as a delta from rest toward the wave target.
    let rest = rest_pose(BoneId::RightUpperArm);
    let raise = Euler::new(
        WAVE_UPPER_ARM_TARGET.x - rest.x,
        WAVE_UPPER_ARM_TARGET.y - rest.y,
        WAVE_UPPER_ARM_TARGET.z - rest.z,
    );
    let elbow = Euler::new(0.0, 0.0, WAVE_ELBOW_BEND);

    // Phase envelope: ease in over [0, 0.2], hold, ease out over [0.7, 1.0].
    let lift = if p < 0.2 {
        smooth_step(p / 0.2)
    } else if p < 0.7 {
        1.0
    } else {
        1.0 - smooth_step((p - 0.7) / 0.3)
    };

    // Hand oscillation: three full side-to-side cycles during the hold phase.
    let mut hand = Euler::ZERO;
    if (0.2..0.7).contains(&p) {
        let q = (p - 0.2) / 0.5;
        hand = Euler::new(0.2 * (3.0 * TAU * q).sin(), 0.0, 0.4 * (3.0 * TAU * q).sin());
    }

    GestureFrame {
        bones: vec![
            (BoneId::RightUpperArm, raise.scale(lift)),
            (BoneId::RightLowerArm, elbow.scale(lift)),
            (BoneId::RightHand, hand.scale(lift)),
        ],
        morphs: Vec::new(),
    }
}

fn sample_excited(p: f32) -> GestureFrame {
    let envelope = (PI * p).sin();
    GestureFrame {
        bones: vec![
            (
                BoneId::Head,
                Euler::new(0.12 * (2.0 * TAU * p).sin(), 0.0, 0.0),
            ),
            // Arms lift back toward T-pose, mirrored.
            (BoneId::LeftUpperArm, Euler::new(0.0, 0.0, -0.25 * envelope)),
            (BoneId::RightUpperArm, Euler::new(0.0, 0.0, 0.25 * envelope)),
        ],
        morphs: Vec::new(),
    }
}

fn sample_think(p: f32) -> GestureFrame {
    let envelope = (PI * p).sin();
    GestureFrame {
        bones: vec![
            (BoneId::Head, Euler::new(0.0, 0.0, 0.15 * envelope)),
            // Right forearm folds up toward the chin.
            (
                BoneId::RightLowerArm,
                Euler::new(-1.1 * envelope, 0.0, 0.4 * envelope),
            ),
            (BoneId::RightHand, Euler::new(-0.3 * envelope, 0.0, 0.0)),
        ],
        morphs: Vec::new(),
    }
}

/// A gesture in flight.
#[derive(Debug, Clone)]
pub struct ActiveGesture {
    kind: GestureKind,
    duration: f32,
    elapsed: f32,
}

impl ActiveGesture {
    /// Start a gesture at progress zero.
    #[must_use]
    pub fn new(kind: GestureKind) -> Self {
        Self {
            kind,
            duration: kind.duration_secs(),
            elapsed: 0.0,
        }
    }

    /// Advance by `dt` seconds. Returns true when the budget is spent.
    pub fn advance(&mut self, dt: f32) -> bool {
        self.elapsed = (self.elapsed + dt).min(self.duration);
        self.elapsed >= self.duration
    }

    /// Progress in `[0, 1]`.
    #[must_use]
    pub fn progress(&self) -> f32 {
        self.elapsed / self.duration
    }

    #[must_use]
    pub fn kind(&self) -> GestureKind {
        self.kind
    }

    /// Sample the frame at current progress.
    #[must_use]
    pub fn frame(&self) -> GestureFrame {
        self.kind.sample(self.progress())
    }
}

/// Exactly-one-active gesture slot plus an arrival-order queue.
#[derive(Debug, Default)]
pub struct GestureQueue {
    active: Option<ActiveGesture>,
    pending: VecDeque<GestureKind>,
}

impl GestureQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a gesture. Activates immediately when the slot is free.
    pub fn push(&mut self, kind: GestureKind) {
        if self.active.is_none() {
            self.active = Some(ActiveGesture::new(kind));
        } else {
            self.pending.push_back(kind);
        }
    }

    /// The gesture currently running, if any.
    #[must_use]
    pub fn active(&self) -> Option<&ActiveGesture> {
        self.active.as_ref()
    }

    /// Whether any skeletal (non-eyelid) gesture is running.
    #[must_use]
    pub fn skeletal_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|g| !g.kind().is_eyelid_only())
    }

    /// Advance the active gesture. When it completes, its final frame is
    /// returned for the settle pass and the next queued gesture is promoted.
    pub fn advance(&mut self, dt: f32) -> Option<(GestureKind, GestureFrame)> {
        let gesture = self.active.as_mut()?;
        if !gesture.advance(dt) {
            return None;
        }
        let done = self.active.take()?;
        let final_frame = done.frame();
        if let Some(next) = self.pending.pop_front() {
            self.active = Some(ActiveGesture::new(next));
        }
        Some((done.kind(), final_frame))
    }

    /// Drop the active gesture and everything queued.
    pub fn clear(&mut self) {
        self.active = None;
        self.pending.clear();
    }

    /// Number of gestures waiting behind the active one.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
