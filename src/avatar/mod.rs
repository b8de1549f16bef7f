//! Avatar controller: owns the render loop and every visible change to the
//! humanoid.
//!
//! One `update(dt)` tick per display refresh advances, in order: the rig's
//! own simulation, breathing, idle or talking motion, the blink timer, the
//! expression cross-fade, the active gesture, the settle-to-rest pass, and
//! finally the render. All deltas are expressed relative to the rest pose so
//! that every animation decays back to relaxed standing.

pub mod bones;
pub mod expression;
pub mod gesture;
pub mod humanoid;
pub mod loader;
pub mod scene;

pub use bones::{rest_pose, BoneId, Euler};
pub use expression::{Expression, ExpressionFade};
pub use gesture::{GestureFrame, GestureKind, GestureQueue};
pub use humanoid::{HumanoidRig, LoadedRig, PlaceholderRig};
pub use loader::AvatarLoader;
pub use scene::{HeadlessScene, ScenePort};

use crate::audio::sentiment::Sentiment;
use crate::bus::{Event, EventBus};
use crate::error::{CompanionError, Result};
use gesture::ActiveGesture;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use tracing::{info, warn};

/// Chest scale amplitude for the breathing cycle.
const BREATH_AMPLITUDE: f32 = 0.025;
/// Breathing angular rate, rad/s.
const BREATH_RATE: f32 = 2.5;
/// Settle window after a gesture completes, seconds.
const SETTLE_SECS: f32 = 0.5;
/// Look-target contribution scale.
const LOOK_BLEND: f32 = 0.3;
/// Seconds for the talking envelope to ramp in or out.
const TALK_RAMP_SECS: f32 = 0.3;
/// Pause between conversational gestures while talking, seconds.
const TALK_GESTURE_SPACING: f32 = 1.5;

/// State carried while a speech item is being voiced.
struct TalkingState {
    queued: VecDeque<GestureKind>,
    next_gesture_in: f32,
}

/// Residual deviation being interpolated back to rest.
struct Settle {
    frame: GestureFrame,
    remaining: f32,
}

/// Scripted greeting played after the first successful model load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpeningStep {
    Nod,
    Wave,
    HappyFade,
    BackToNeutral,
}

struct OpeningSequence {
    steps: Vec<(f32, OpeningStep)>,
    index: usize,
    clock: f32,
}

impl OpeningSequence {
    fn new() -> Self {
        Self {
            steps: vec![
                (0.5, OpeningStep::Nod),
                (1.5, OpeningStep::Wave),
                (4.5, OpeningStep::HappyFade),
                (7.0, OpeningStep::BackToNeutral),
            ],
            index: 0,
            clock: 0.0,
        }
    }
}

/// Owns the 3D scene, the humanoid rig, and the gesture/expression state
/// machine. All mutation happens on the cooperative tick.
pub struct AvatarController {
    bus: Rc<EventBus>,
    scene: Box<dyn ScenePort>,
    loader: AvatarLoader,
    rig: Option<Box<dyn HumanoidRig>>,
    graphics_ok: bool,
    disposed: bool,

    gestures: GestureQueue,
    settle: Option<Settle>,
    /// Automatic blinks run here, parallel to skeletal gestures, so a long
    /// wave never starves the eyelids.
    eyelid: Option<ActiveGesture>,
    expression: ExpressionFade,
    talking: Option<TalkingState>,
    /// Talking-motion envelope, ramped over [`TALK_RAMP_SECS`].
    talk_level: f32,
    look_target: (f32, f32),

    clock: f32,
    blink_clock: f32,
    next_blink: f32,
    idle_clock: f32,
    next_idle_gesture: f32,
    auto_blink_count: u64,
    opening: Option<OpeningSequence>,
    first_load_done: bool,
}

impl AvatarController {
    /// Construct a controller over the given scene port.
    #[must_use]
    pub fn new(
        bus: Rc<EventBus>,
        scene: Box<dyn ScenePort>,
        client: reqwest::Client,
        load_timeout: std::time::Duration,
    ) -> Self {
        Self {
            bus,
            scene,
            loader: AvatarLoader::new(client, load_timeout),
            rig: None,
            graphics_ok: false,
            disposed: false,
            gestures: GestureQueue::new(),
            settle: None,
            eyelid: None,
            expression: ExpressionFade::new(),
            talking: None,
            talk_level: 0.0,
            look_target: (0.0, 0.0),
            clock: 0.0,
            blink_clock: 0.0,
            next_blink: 4.0,
            idle_clock: 0.0,
            next_idle_gesture: 15.0,
            auto_blink_count: 0,
            opening: None,
            first_load_done: false,
        }
    }

    /// Probe the scene and prepare for rendering.
    ///
    /// # Errors
    ///
    /// Returns `Graphics` when no 3D context is available. The controller
    /// stays usable for audio-only operation; a `GraphicsFallback` event is
    /// emitted so the shell can surface a banner.
    pub fn init(&mut self) -> Result<()> {
        if self.scene.probe() {
            self.graphics_ok = true;
            info!("3D context available, scene ready");
            return Ok(());
        }
        self.graphics_ok = false;
        let message = "no 3D context available, continuing audio-only".to_owned();
        warn!("{message}");
        self.bus.emit(Event::Error {
            context: "avatar".to_owned(),
            message: message.clone(),
        });
        self.bus.emit(Event::GraphicsFallback);
        Err(CompanionError::Graphics(message))
    }

    /// Load the avatar from `sources`, trying each in order.
    ///
    /// Success installs the rig (replacing any prior one) and emits
    /// `LoadComplete`; the opening sequence plays after the first success.
    /// Exhaustion emits `Error` and installs the placeholder so every
    /// coordinator call stays valid.
    pub async fn load_avatar(&mut self, sources: &[String]) {
        match self.loader.load(sources).await {
            Ok(rig) => {
                let name = HumanoidRig::name(&rig).to_owned();
                self.install(Box::new(rig));
                self.bus.emit(Event::LoadComplete { name });
                if !self.first_load_done {
                    self.first_load_done = true;
                    self.opening = Some(OpeningSequence::new());
                }
            }
            Err(e) => {
                self.bus.emit(Event::Error {
                    context: "avatar".to_owned(),
                    message: e.to_string(),
                });
                if self.rig.is_none() {
                    warn!("installing placeholder rig");
                    self.install(Box::new(PlaceholderRig::new()));
                }
            }
        }
    }

    fn install(&mut self, rig: Box<dyn HumanoidRig>) {
        if let Some(mut old) = self.rig.take() {
            old.dispose();
        }
        self.rig = Some(rig);
    }

    // ── Gesture API ─────────────────────────────────────────────────────

    pub fn wave(&mut self) {
        self.gestures.push(GestureKind::Wave);
    }

    pub fn nod(&mut self) {
        self.gestures.push(GestureKind::Nod);
    }

    pub fn head_tilt(&mut self) {
        self.gestures.push(GestureKind::HeadTilt);
    }

    pub fn blink(&mut self) {
        self.gestures.push(GestureKind::Blink);
    }

    pub fn wink(&mut self) {
        self.gestures.push(GestureKind::Wink);
    }

    pub fn excited(&mut self) {
        self.gestures.push(GestureKind::Excited);
    }

    pub fn think(&mut self) {
        self.gestures.push(GestureKind::Think);
    }

    // ── Speech mirroring ────────────────────────────────────────────────

    /// Enter the talking state: conversational gestures derived from the
    /// text, expression matched to the sentiment.
    pub fn start_speaking(&mut self, text: &str, sentiment: Sentiment) {
        let queued = conversational_gestures(text);
        self.talking = Some(TalkingState {
            queued,
            next_gesture_in: TALK_GESTURE_SPACING,
        });
        let (expr, intensity) = Expression::for_sentiment(sentiment);
        self.expression.set(expr, intensity, None);
    }

    /// Leave the talking state and cross-fade back to neutral.
    pub fn stop_speaking(&mut self) {
        self.talking = None;
        self.expression.set(Expression::Neutral, 0.0, None);
    }

    /// Cross-fade to an expression, optionally reverting after `duration_ms`.
    pub fn set_expression(&mut self, expr: Expression, intensity: f32, duration_ms: Option<u64>) {
        self.expression.set(expr, intensity, duration_ms);
    }

    /// Update the head-gaze target in screen-normalized coordinates.
    pub fn set_look_target(&mut self, x_norm: f32, y_norm: f32) {
        self.look_target = (x_norm.clamp(-1.0, 1.0), y_norm.clamp(-1.0, 1.0));
    }

    /// Update camera aspect and backing store.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.scene.resize(width, height);
    }

    /// Stop the loop and release GPU resources.
    pub fn dispose(&mut self) {
        if let Some(mut rig) = self.rig.take() {
            rig.dispose();
        }
        self.scene.dispose();
        self.gestures.clear();
        self.disposed = true;
    }

    // ── Render loop ─────────────────────────────────────────────────────

    /// One cooperative tick of `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        if self.disposed {
            return;
        }
        self.clock += dt;
        self.tick_opening(dt);
        self.tick_talk_level(dt);
        self.expression.tick(dt);

        if self.rig.is_none() {
            return;
        }

        // The model's own simulation (spring bones, look-at smoothing).
        if let Some(rig) = self.rig.as_mut() {
            rig.update(dt);
        }

        self.apply_breathing();

        let mut deltas: HashMap<BoneId, Euler> = HashMap::new();

        if self.talk_level > 1e-3 {
            self.apply_talking_motion(&mut deltas);
        }
        let idle = self.talking.is_none() && !self.gestures.skeletal_active();
        if idle {
            self.apply_idle_motion(&mut deltas);
            self.tick_idle_gestures(dt);
        } else {
            self.idle_clock = 0.0;
        }

        self.tick_blink(dt);
        self.tick_conversational_gestures(dt);

        // Advance first so a completing gesture hands its final frame to the
        // settle pass before the promoted gesture samples at progress zero.
        if let Some((kind, final_frame)) = self.gestures.advance(dt) {
            if kind == GestureKind::Wave {
                verify_returned_to_rest(&final_frame);
            }
            self.settle = Some(Settle {
                frame: final_frame,
                remaining: SETTLE_SECS,
            });
        }

        let mut morph_frame: Vec<(Expression, f32)> = Vec::new();
        if let Some(active) = self.gestures.active() {
            let frame = active.frame();
            for (bone, delta) in &frame.bones {
                accumulate(&mut deltas, *bone, *delta);
            }
            morph_frame.extend(frame.morphs);
        }

        if let Some(eyelid) = self.eyelid.as_mut() {
            if eyelid.advance(dt) {
                self.eyelid = None;
            } else {
                morph_frame.extend(eyelid.frame().morphs);
            }
        }

        self.tick_settle(dt, &mut deltas);
        self.apply_pose(&deltas);
        self.apply_morphs(&morph_frame);
        self.render_frame();
    }

    fn tick_opening(&mut self, dt: f32) {
        let Some(opening) = self.opening.as_mut() else {
            return;
        };
        opening.clock += dt;
        let mut fired = Vec::new();
        while opening.index < opening.steps.len() && opening.clock >= opening.steps[opening.index].0
        {
            fired.push(opening.steps[opening.index].1);
            opening.index += 1;
        }
        let finished = opening.index >= opening.steps.len();
        if finished {
            self.opening = None;
        }
        for step in fired {
            match step {
                OpeningStep::Nod => self.nod(),
                OpeningStep::Wave => self.wave(),
                OpeningStep::HappyFade => {
                    self.expression.set(Expression::Happy, 0.3, Some(2_000));
                }
                OpeningStep::BackToNeutral => {
                    self.expression.set(Expression::Neutral, 0.0, None);
                }
            }
        }
    }

    fn tick_talk_level(&mut self, dt: f32) {
        let target = if self.talking.is_some() { 1.0 } else { 0.0 };
        let step = dt / TALK_RAMP_SECS;
        if self.talk_level < target {
            self.talk_level = (self.talk_level + step).min(target);
        } else {
            self.talk_level = (self.talk_level - step).max(target);
        }
    }

    fn apply_breathing(&mut self) {
        let scale = 1.0 + BREATH_AMPLITUDE * (BREATH_RATE * self.clock).sin();
        if let Some(rig) = self.rig.as_mut() {
            rig.set_bone_scale(BoneId::Chest, scale);
            rig.set_bone_scale(BoneId::UpperChest, scale);
        }
    }

    fn apply_idle_motion(&mut self, deltas: &mut HashMap<BoneId, Euler>) {
        let t = self.clock;
        // Sub-perceptual drift plus the gaze contribution.
        let (lx, ly) = self.look_target;
        accumulate(
            deltas,
            BoneId::Head,
            Euler::new(
                0.02 * (0.6 * t).sin() + ly * LOOK_BLEND,
                0.03 * (0.5 * t).sin() + lx * LOOK_BLEND,
                0.01 * (0.8 * t).sin(),
            ),
        );
        accumulate(deltas, BoneId::Spine, Euler::new(0.0, 0.0, 0.01 * (0.4 * t).sin()));
    }

    fn apply_talking_motion(&mut self, deltas: &mut HashMap<BoneId, Euler>) {
        let t = self.clock;
        let level = self.talk_level;
        accumulate(
            deltas,
            BoneId::Head,
            Euler::new(
                0.025 * (2.5 * t).sin(),
                0.035 * (1.75 * t).sin(),
                0.015 * (3.25 * t).sin(),
            )
            .scale(level),
        );
        // Arms lift from rest by a slow envelope with elbow and hand sway.
        let raise = 0.15 + 0.1 * (0.3 * t).sin();
        accumulate(deltas, BoneId::LeftUpperArm, Euler::new(0.0, 0.0, -raise * level));
        accumulate(deltas, BoneId::RightUpperArm, Euler::new(0.0, 0.0, raise * level));
        let elbow = 0.2 * (2.0 * t).sin() * level;
        accumulate(deltas, BoneId::LeftLowerArm, Euler::new(0.0, 0.0, -elbow));
        accumulate(deltas, BoneId::RightLowerArm, Euler::new(0.0, 0.0, elbow));
        let hand = 0.1 * (3.1 * t).sin() * level;
        accumulate(deltas, BoneId::LeftHand, Euler::new(0.0, 0.0, -hand));
        accumulate(deltas, BoneId::RightHand, Euler::new(0.0, 0.0, hand));
        accumulate(
            deltas,
            BoneId::Spine,
            Euler::new(0.0, 0.015 * (1.2 * t).sin() * level, 0.0),
        );
    }

    fn tick_idle_gestures(&mut self, dt: f32) {
        self.idle_clock += dt;
        if self.idle_clock < self.next_idle_gesture {
            return;
        }
        self.idle_clock = 0.0;
        let mut rng = rand::thread_rng();
        self.next_idle_gesture = rng.gen_range(12.0..20.0);
        if rng.gen_bool(0.5) {
            self.head_tilt();
        } else {
            self.nod();
        }
    }

    fn tick_blink(&mut self, dt: f32) {
        self.blink_clock += dt;
        if self.blink_clock < self.next_blink || self.eyelid.is_some() {
            return;
        }
        self.blink_clock = 0.0;
        self.auto_blink_count += 1;
        self.eyelid = Some(ActiveGesture::new(GestureKind::Blink));
        let mut rng = rand::thread_rng();
        self.next_blink = if self.talking.is_some() {
            rng.gen_range(2.0..3.0)
        } else {
            rng.gen_range(3.0..5.0)
        };
    }

    fn tick_conversational_gestures(&mut self, dt: f32) {
        let Some(talking) = self.talking.as_mut() else {
            return;
        };
        talking.next_gesture_in -= dt;
        if talking.next_gesture_in > 0.0 || self.gestures.skeletal_active() {
            return;
        }
        if let Some(kind) = talking.queued.pop_front() {
            talking.next_gesture_in = TALK_GESTURE_SPACING;
            self.gestures.push(kind);
        }
    }

    fn tick_settle(&mut self, dt: f32, deltas: &mut HashMap<BoneId, Euler>) {
        let Some(settle) = self.settle.as_mut() else {
            return;
        };
        settle.remaining -= dt;
        if settle.remaining <= 0.0 {
            self.settle = None;
            return;
        }
        let factor = bones::smooth_step(settle.remaining / SETTLE_SECS);
        for (bone, delta) in &settle.frame.bones {
            accumulate(deltas, *bone, delta.scale(factor));
        }
    }

    fn apply_pose(&mut self, deltas: &HashMap<BoneId, Euler>) {
        let Some(rig) = self.rig.as_mut() else { return };
        for bone in BoneId::ALL {
            let delta = deltas.get(&bone).copied().unwrap_or(Euler::ZERO);
            rig.set_bone_rotation(bone, rest_pose(bone).add(delta));
        }
    }

    fn apply_morphs(&mut self, gesture_morphs: &[(Expression, f32)]) {
        let Some(rig) = self.rig.as_mut() else { return };

        let (expr, expr_weight) = self.expression.weight();
        let aa = if self.talking.is_some() {
            (10.0 * self.clock).sin().abs() * 0.3 * self.talk_level
        } else {
            0.0
        };

        for morph in Expression::ALL {
            let mut weight: f32 = if morph == expr { expr_weight } else { 0.0 };
            if morph == Expression::Aa {
                weight = weight.max(aa);
            }
            for &(m, w) in gesture_morphs {
                // Rigs without a left-only eyelid fall back to both eyes.
                let m = if m == Expression::BlinkLeft && !rig.has_morph(Expression::BlinkLeft) {
                    Expression::Blink
                } else {
                    m
                };
                if m == morph {
                    weight = weight.max(w);
                }
            }
            rig.set_morph(morph, weight);
        }
    }

    fn render_frame(&mut self) {
        if !self.graphics_ok {
            return;
        }
        let Some(rig) = self.rig.as_ref() else { return };
        if let Err(e) = self.scene.render(rig.as_ref()) {
            warn!("render failed, dropping to audio-only: {e}");
            self.graphics_ok = false;
            self.bus.emit(Event::Error {
                context: "avatar".to_owned(),
                message: e.to_string(),
            });
            self.bus.emit(Event::GraphicsFallback);
        }
    }

    // ── Observability ───────────────────────────────────────────────────

    /// Whether a speech item is currently being mirrored.
    #[must_use]
    pub fn is_talking(&self) -> bool {
        self.talking.is_some()
    }

    /// Kind of the active skeletal gesture, if any.
    #[must_use]
    pub fn active_gesture(&self) -> Option<GestureKind> {
        self.gestures.active().map(gesture::ActiveGesture::kind)
    }

    /// Current orientation of a bone on the installed rig.
    #[must_use]
    pub fn bone_rotation(&self, bone: BoneId) -> Euler {
        self.rig
            .as_ref()
            .map_or_else(|| rest_pose(bone), |r| r.bone_rotation(bone))
    }

    /// Current weight of a morph target on the installed rig.
    #[must_use]
    pub fn morph(&self, morph: Expression) -> f32 {
        self.rig.as_ref().map_or(0.0, |r| r.morph(morph))
    }

    /// Display name of the installed rig, if one is installed.
    #[must_use]
    pub fn rig_name(&self) -> Option<&str> {
        self.rig.as_deref().map(HumanoidRig::name)
    }

    /// Whether the 3D path is active (probe passed, context not lost).
    #[must_use]
    pub fn graphics_available(&self) -> bool {
        self.graphics_ok
    }

    /// Automatic blinks fired since construction.
    #[must_use]
    pub fn auto_blink_count(&self) -> u64 {
        self.auto_blink_count
    }
}

fn accumulate(deltas: &mut HashMap<BoneId, Euler>, bone: BoneId, delta: Euler) {
    let entry = deltas.entry(bone).or_insert(Euler::ZERO);
    *entry = entry.add(delta);
}

/// Derive the conversational gesture list from reply text.
///
/// Longer replies nod and tilt; exclamations nod, questions tilt.
#[must_use]
pub fn conversational_gestures(text: &str) -> VecDeque<GestureKind> {
    let words = text.split_whitespace().count();
    let mut queued = VecDeque::new();
    if words > 10 {
        queued.push_back(GestureKind::Nod);
    }
    if words > 20 {
        queued.push_back(GestureKind::HeadTilt);
    }
    if text.contains('!') {
        queued.push_back(GestureKind::Nod);
    }
    if text.contains('?') {
        queued.push_back(GestureKind::HeadTilt);
    }
    queued
}

fn verify_returned_to_rest(final_frame: &GestureFrame) {
    let deviation = final_frame.max_bone_deviation();
    if deviation > 1e-4 {
        warn!("wave ended {deviation} rad away from rest");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::time::Duration;

    const TICK: f32 = 0.016;

    fn controller() -> AvatarController {
        let bus = Rc::new(EventBus::new());
        let mut controller = AvatarController::new(
            bus,
            Box::new(HeadlessScene::new()),
            reqwest::Client::new(),
            Duration::from_secs(5),
        );
        controller.init().unwrap();
        controller
    }

    fn glb_fixture(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("companion.vrm");
        let mut bytes = b"glTF".to_vec();
        bytes.extend_from_slice(&[0u8; 8]);
        std::fs::write(&path, &bytes).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn loaded_controller(dir: &tempfile::TempDir) -> AvatarController {
        let mut controller = controller();
        controller.load_avatar(&[glb_fixture(dir)]).await;
        // Skip past the opening sequence so tests observe steady state.
        controller.opening = None;
        controller.gestures.clear();
        controller.expression = ExpressionFade::new();
        controller
    }

    fn advance(controller: &mut AvatarController, seconds: f32) {
        let mut t = 0.0;
        while t < seconds {
            controller.update(TICK);
            t += TICK;
        }
    }

    #[tokio::test]
    async fn wave_returns_to_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = loaded_controller(&dir).await;

        let before: Vec<Euler> = [
            BoneId::RightUpperArm,
            BoneId::RightLowerArm,
            BoneId::RightHand,
        ]
        .iter()
        .map(|&b| controller.bone_rotation(b))
        .collect();

        controller.wave();
        advance(&mut controller, 3.5);

        for (i, &bone) in [
            BoneId::RightUpperArm,
            BoneId::RightLowerArm,
            BoneId::RightHand,
        ]
        .iter()
        .enumerate()
        {
            let after = controller.bone_rotation(bone);
            assert!(
                after.max_abs_delta(before[i]) < 1e-3,
                "{bone} did not return to rest: {after:?} vs {:?}",
                before[i]
            );
        }
    }

    #[tokio::test]
    async fn gesture_settles_within_half_second() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = loaded_controller(&dir).await;

        controller.nod();
        // Nod duration 0.8 s plus the 0.5 s settle budget.
        advance(&mut controller, 1.4);
        let head = controller.bone_rotation(BoneId::Head);
        // Idle drift stays sub-perceptual; anything larger means the gesture
        // failed to decay.
        assert!(head.max_abs_delta(rest_pose(BoneId::Head)) < 0.1);
        assert!(controller.active_gesture().is_none());
    }

    #[tokio::test]
    async fn talking_moves_arms_and_mouth() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = loaded_controller(&dir).await;

        controller.start_speaking("hello there", Sentiment::Neutral);
        advance(&mut controller, 1.0);

        assert!(controller.is_talking());
        let right_arm = controller.bone_rotation(BoneId::RightUpperArm);
        let rest = rest_pose(BoneId::RightUpperArm);
        assert!(
            (right_arm.z - rest.z).abs() > 0.02,
            "arms should lift while talking"
        );

        // The aa morph oscillates; sample a few ticks and expect movement.
        let mut saw_open = false;
        for _ in 0..30 {
            controller.update(TICK);
            if controller.morph(Expression::Aa) > 0.05 {
                saw_open = true;
            }
        }
        assert!(saw_open, "mouth never opened while talking");

        controller.stop_speaking();
        advance(&mut controller, 1.0);
        assert!(!controller.is_talking());
        assert!(controller.morph(Expression::Aa) < 1e-3);
    }

    #[tokio::test]
    async fn blink_cadence_idle_and_talking() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = loaded_controller(&dir).await;

        advance(&mut controller, 30.0);
        let idle_blinks = controller.auto_blink_count();
        // Idle gap lies in [3, 5] s: 30 s yields 6 to 10 blinks.
        assert!(
            (5..=11).contains(&idle_blinks),
            "unexpected idle blink count {idle_blinks}"
        );

        controller.start_speaking(
            "a very long sentence that keeps the avatar talking for a while",
            Sentiment::Neutral,
        );
        let before = controller.auto_blink_count();
        advance(&mut controller, 10.0);
        let talking_blinks = controller.auto_blink_count() - before;
        // Talking gap lies in [2, 3] s: 10 s yields 3 to 5 blinks.
        assert!(
            (2..=6).contains(&talking_blinks),
            "unexpected talking blink count {talking_blinks}"
        );
    }

    #[tokio::test]
    async fn conversational_gesture_rules() {
        let long = "one two three four five six seven eight nine ten eleven";
        let gestures = conversational_gestures(long);
        assert_eq!(gestures, VecDeque::from(vec![GestureKind::Nod]));

        let excited = "Wow!";
        assert_eq!(
            conversational_gestures(excited),
            VecDeque::from(vec![GestureKind::Nod])
        );

        let question = "Is that so?";
        assert_eq!(
            conversational_gestures(question),
            VecDeque::from(vec![GestureKind::HeadTilt])
        );

        let essay = "w ".repeat(21) + "and then some more words to pass twenty total!?";
        let gestures = conversational_gestures(&essay);
        assert_eq!(
            gestures,
            VecDeque::from(vec![
                GestureKind::Nod,
                GestureKind::HeadTilt,
                GestureKind::Nod,
                GestureKind::HeadTilt,
            ])
        );
    }

    #[tokio::test]
    async fn failed_load_installs_placeholder_and_stays_posable() {
        let mut controller = controller();
        controller
            .load_avatar(&["/definitely/not/here.vrm".to_owned()])
            .await;

        assert_eq!(controller.rig_name(), Some("placeholder"));
        controller.wave();
        advance(&mut controller, 0.5);
        // Skeleton still animates even though morphs are absent.
        let arm = controller.bone_rotation(BoneId::RightUpperArm);
        assert!(arm.max_abs_delta(rest_pose(BoneId::RightUpperArm)) > 0.1);
    }

    #[tokio::test]
    async fn opening_sequence_plays_after_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller();
        controller.load_avatar(&[glb_fixture(&dir)]).await;

        // 0.5 s in: nod fires.
        advance(&mut controller, 0.6);
        assert_eq!(controller.active_gesture(), Some(GestureKind::Nod));

        // 1.5 s in: wave queued behind (or active once the nod finishes).
        advance(&mut controller, 1.2);
        assert_eq!(controller.active_gesture(), Some(GestureKind::Wave));
    }

    #[test]
    fn failed_probe_degrades_to_audio_only() {
        let bus = Rc::new(EventBus::new());
        let mut controller = AvatarController::new(
            Rc::clone(&bus),
            Box::new(HeadlessScene::unavailable()),
            reqwest::Client::new(),
            Duration::from_secs(5),
        );
        let err = controller.init().unwrap_err();
        assert!(matches!(err, CompanionError::Graphics(_)));
        assert!(!controller.graphics_available());
        // Still safe to tick and pose.
        controller.update(TICK);
        controller.nod();
        controller.update(TICK);
    }

    #[tokio::test]
    async fn set_expression_with_revert_returns_to_neutral() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = loaded_controller(&dir).await;

        controller.set_expression(Expression::Surprised, 0.8, Some(200));
        advance(&mut controller, 0.1);
        assert!(controller.morph(Expression::Surprised) > 0.0);

        advance(&mut controller, 2.0);
        assert_eq!(controller.morph(Expression::Surprised), 0.0);
    }

    #[tokio::test]
    async fn look_target_shifts_head_while_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = loaded_controller(&dir).await;

        controller.set_look_target(1.0, 0.0);
        advance(&mut controller, 0.5);
        let with_gaze = controller.bone_rotation(BoneId::Head).y;

        controller.set_look_target(-1.0, 0.0);
        advance(&mut controller, 0.5);
        let opposite = controller.bone_rotation(BoneId::Head).y;

        assert!(
            with_gaze > opposite,
            "gaze should bias head yaw: {with_gaze} vs {opposite}"
        );
    }
}
