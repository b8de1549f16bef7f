//! Humanoid bone handles and the canonical rest pose.
//!
//! Bones are addressed by role, not index. Each handle carries a mutable
//! Euler orientation in radians; the controller owns no position data beyond
//! the hips. Every animation in the engine is expressed as a delta from the
//! [`rest_pose`], and every animation decays back toward it.

use std::fmt;

/// Named reference into the humanoid skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoneId {
    Hips,
    Spine,
    Chest,
    UpperChest,
    Neck,
    Head,
    LeftShoulder,
    LeftUpperArm,
    LeftLowerArm,
    LeftHand,
    RightShoulder,
    RightUpperArm,
    RightLowerArm,
    RightHand,
}

impl BoneId {
    /// Every bone the controller poses, in skeleton order.
    pub const ALL: [BoneId; 14] = [
        BoneId::Hips,
        BoneId::Spine,
        BoneId::Chest,
        BoneId::UpperChest,
        BoneId::Neck,
        BoneId::Head,
        BoneId::LeftShoulder,
        BoneId::LeftUpperArm,
        BoneId::LeftLowerArm,
        BoneId::LeftHand,
        BoneId::RightShoulder,
        BoneId::RightUpperArm,
        BoneId::RightLowerArm,
        BoneId::RightHand,
    ];
}

impl fmt::Display for BoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoneId::Hips => "hips",
            BoneId::Spine => "spine",
            BoneId::Chest => "chest",
            BoneId::UpperChest => "upperChest",
            BoneId::Neck => "neck",
            BoneId::Head => "head",
            BoneId::LeftShoulder => "leftShoulder",
            BoneId::LeftUpperArm => "leftUpperArm",
            BoneId::LeftLowerArm => "leftLowerArm",
            BoneId::LeftHand => "leftHand",
            BoneId::RightShoulder => "rightShoulder",
            BoneId::RightUpperArm => "rightUpperArm",
            BoneId::RightLowerArm => "rightLowerArm",
            BoneId::RightHand => "rightHand",
        };
        f.write_str(name)
    }
}

/// Euler orientation triple in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Euler {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Euler {
    /// The zero rotation.
    pub const ZERO: Euler = Euler {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Component-wise sum.
    #[must_use]
    pub fn add(self, other: Euler) -> Euler {
        Euler::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Component-wise scale.
    #[must_use]
    pub fn scale(self, factor: f32) -> Euler {
        Euler::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// Largest absolute component difference to `other`.
    #[must_use]
    pub fn max_abs_delta(self, other: Euler) -> f32 {
        (self.x - other.x)
            .abs()
            .max((self.y - other.y).abs())
            .max((self.z - other.z).abs())
    }
}

/// Shoulder drop from T-pose in radians.
const SHOULDER_DROP: f32 = 0.08;
/// Upper-arm inward rotation from T-pose in radians (~70 degrees).
const ARM_DROP: f32 = 1.22;
/// Lower-arm elbow bend in radians.
const ELBOW_BEND: f32 = 0.17;

/// Canonical orientation of `bone` in the relaxed standing pose.
///
/// Upper arms hang ~70 degrees inward from T-pose along Z, lower arms add a
/// slight elbow bend, shoulders drop, and the spine/neck curve gently forward.
#[must_use]
pub fn rest_pose(bone: BoneId) -> Euler {
    match bone {
        BoneId::Hips => Euler::ZERO,
        BoneId::Spine => Euler::new(0.02, 0.0, 0.0),
        BoneId::Chest => Euler::new(0.01, 0.0, 0.0),
        BoneId::UpperChest => Euler::ZERO,
        BoneId::Neck => Euler::new(0.03, 0.0, 0.0),
        BoneId::Head => Euler::ZERO,
        BoneId::LeftShoulder => Euler::new(0.0, 0.0, SHOULDER_DROP),
        BoneId::LeftUpperArm => Euler::new(0.0, 0.0, ARM_DROP),
        BoneId::LeftLowerArm => Euler::new(0.0, 0.0, ELBOW_BEND),
        BoneId::LeftHand => Euler::ZERO,
        BoneId::RightShoulder => Euler::new(0.0, 0.0, -SHOULDER_DROP),
        BoneId::RightUpperArm => Euler::new(0.0, 0.0, -ARM_DROP),
        BoneId::RightLowerArm => Euler::new(0.0, 0.0, -ELBOW_BEND),
        BoneId::RightHand => Euler::ZERO,
    }
}

/// Hermite smooth-step easing over `t` in `[0, 1]`.
#[must_use]
pub fn smooth_step(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
