//! Render surface abstraction.
//!
//! The controller owns a scene port rather than a concrete renderer, so the
//! engine runs against a real 3D backend, a headless surface in tests, or
//! nothing at all when the context probe fails (audio-only degradation).

use super::humanoid::HumanoidRig;
use crate::error::Result;

/// Where rendered frames go.
pub trait ScenePort {
    /// Probe for a usable 3D context. Called once from `init`.
    fn probe(&self) -> bool;

    /// Update the camera aspect and backing store.
    fn resize(&mut self, width: u32, height: u32);

    /// Draw the rig in its current pose.
    ///
    /// # Errors
    ///
    /// Returns `Graphics` if the backing context was lost.
    fn render(&mut self, rig: &dyn HumanoidRig) -> Result<()>;

    /// Release the surface.
    fn dispose(&mut self);
}

/// Surface that accepts every frame and draws nothing.
///
/// Used by tests and by embedders that drive their own renderer from the
/// rig state directly.
#[derive(Debug)]
pub struct HeadlessScene {
    width: u32,
    height: u32,
    frames: u64,
    available: bool,
}

impl Default for HeadlessScene {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessScene {
    #[must_use]
    pub fn new() -> Self {
        Self {
            width: 800,
            height: 600,
            frames: 0,
            available: true,
        }
    }

    /// A scene whose probe fails, for exercising the audio-only path.
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Frames rendered so far.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Current aspect ratio.
    #[must_use]
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

impl ScenePort for HeadlessScene {
    fn probe(&self) -> bool {
        self.available
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn render(&mut self, _rig: &dyn HumanoidRig) -> Result<()> {
        self.frames += 1;
        Ok(())
    }

    fn dispose(&mut self) {
        self.frames = 0;
    }
}
