//! Humanoid rig abstraction.
//!
//! The skeleton is exposed by role through [`HumanoidRig`], so the controller
//! never depends on a concrete asset format. Two implementations ship: a rig
//! parsed from a loaded asset, and a placeholder capsule installed when every
//! asset source fails, keeping the public surface valid either way.

use super::bones::{rest_pose, BoneId, Euler};
use super::expression::Expression;
use std::collections::HashMap;
use tracing::debug;

/// A posable humanoid: named bone handles, morph weights, and a per-frame
/// update hook for the model's own simulation (spring bones, look-at).
pub trait HumanoidRig {
    /// Display name of the rig.
    fn name(&self) -> &str;

    /// Overwrite a bone's orientation.
    fn set_bone_rotation(&mut self, bone: BoneId, rotation: Euler);

    /// Current orientation of a bone.
    fn bone_rotation(&self, bone: BoneId) -> Euler;

    /// Uniform scale applied to a bone (breathing uses the chest bones).
    fn set_bone_scale(&mut self, bone: BoneId, scale: f32);

    /// Whether the rig exposes the given morph target.
    fn has_morph(&self, morph: Expression) -> bool;

    /// Set a morph weight, clamped to `[0, 1]`. No-op for missing morphs.
    fn set_morph(&mut self, morph: Expression, weight: f32);

    /// Current weight of a morph target (0 when missing).
    fn morph(&self, morph: Expression) -> f32;

    /// Advance the model's own simulation (spring bones, look-at smoothing).
    fn update(&mut self, dt: f32);

    /// Release the rig's GPU-side resources.
    fn dispose(&mut self);
}

/// Shared bone/morph storage for both rig implementations.
#[derive(Debug, Clone)]
struct RigState {
    bones: HashMap<BoneId, Euler>,
    scales: HashMap<BoneId, f32>,
    morphs: HashMap<Expression, f32>,
    morphs_supported: bool,
}

impl RigState {
    fn new(morphs_supported: bool) -> Self {
        let bones = BoneId::ALL
            .iter()
            .map(|&bone| (bone, rest_pose(bone)))
            .collect();
        Self {
            bones,
            scales: HashMap::new(),
            morphs: HashMap::new(),
            morphs_supported,
        }
    }
}

/// Rig built from a downloaded avatar asset.
#[derive(Debug)]
pub struct LoadedRig {
    name: String,
    state: RigState,
    /// Accumulated simulation time for the spring-bone pass.
    sim_clock: f32,
    disposed: bool,
}

impl LoadedRig {
    /// Build a rig from raw asset bytes.
    ///
    /// The container must be a binary glTF (VRM) blob; only the header is
    /// validated here, the mesh itself stays opaque to the engine.
    ///
    /// # Errors
    ///
    /// Returns `AssetLoad` if the bytes are too short or carry the wrong magic.
    pub fn from_bytes(name: &str, bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() < 12 {
            return Err(crate::CompanionError::AssetLoad(format!(
                "{name}: truncated container ({} bytes)",
                bytes.len()
            )));
        }
        if &bytes[0..4] != b"glTF" {
            return Err(crate::CompanionError::AssetLoad(format!(
                "{name}: not a binary glTF container"
            )));
        }
        debug!("parsed rig container '{name}' ({} bytes)", bytes.len());
        Ok(Self {
            name: name.to_owned(),
            state: RigState::new(true),
            sim_clock: 0.0,
            disposed: false,
        })
    }

    /// Whether GPU resources have been released.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl HumanoidRig for LoadedRig {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_bone_rotation(&mut self, bone: BoneId, rotation: Euler) {
        self.state.bones.insert(bone, rotation);
    }

    fn bone_rotation(&self, bone: BoneId) -> Euler {
        self.state
            .bones
            .get(&bone)
            .copied()
            .unwrap_or_else(|| rest_pose(bone))
    }

    fn set_bone_scale(&mut self, bone: BoneId, scale: f32) {
        self.state.scales.insert(bone, scale);
    }

    fn has_morph(&self, _morph: Expression) -> bool {
        self.state.morphs_supported
    }

    fn set_morph(&mut self, morph: Expression, weight: f32) {
        self.state.morphs.insert(morph, weight.clamp(0.0, 1.0));
    }

    fn morph(&self, morph: Expression) -> f32 {
        self.state.morphs.get(&morph).copied().unwrap_or(0.0)
    }

    fn update(&mut self, dt: f32) {
        // Spring-bone passthrough: the asset's own simulation advances on its
        // internal clock; the engine only feeds it time.
        self.sim_clock += dt;
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.state.morphs.clear();
    }
}

/// Minimal capsule stand-in installed when no asset source loads.
///
/// Exposes the full bone surface so coordinator calls stay valid; morph
/// targets are absent, so facial animation silently degrades.
#[derive(Debug)]
pub struct PlaceholderRig {
    state: RigState,
}

impl Default for PlaceholderRig {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaceholderRig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RigState::new(false),
        }
    }
}

impl HumanoidRig for PlaceholderRig {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn set_bone_rotation(&mut self, bone: BoneId, rotation: Euler) {
        self.state.bones.insert(bone, rotation);
    }

    fn bone_rotation(&self, bone: BoneId) -> Euler {
        self.state
            .bones
            .get(&bone)
            .copied()
            .unwrap_or_else(|| rest_pose(bone))
    }

    fn set_bone_scale(&mut self, bone: BoneId, scale: f32) {
        self.state.scales.insert(bone, scale);
    }

    fn has_morph(&self, _morph: Expression) -> bool {
        false
    }

    fn set_morph(&mut self, _morph: Expression, _weight: f32) {}

    fn morph(&self, _morph: Expression) -> f32 {
        0.0
    }

    fn update(&mut self, _dt: f32) {}

    fn dispose(&mut self) {}
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn glb_fixture() -> Vec<u8> {
        let mut bytes = b"glTF".to_vec();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&(12u32).to_le_bytes());
        bytes
    }

    #[test]
    fn loaded_rig_accepts_glb_header() {
        let rig = LoadedRig::from_bytes("companion", &glb_fixture()).unwrap();
        assert_eq!(rig.name(), "companion");
        assert!(rig.has_morph(Expression::Blink));
    }

    #[test]
    fn loaded_rig_rejects_garbage() {
        assert!(LoadedRig::from_bytes("x", b"nope").is_err());
        assert!(LoadedRig::from_bytes("x", b"JSON{}xxxxxx").is_err());
    }

    #[test]
    fn rig_starts_in_rest_pose() {
        let rig = LoadedRig::from_bytes("companion", &glb_fixture()).unwrap();
        for bone in BoneId::ALL {
            assert_eq!(rig.bone_rotation(bone), rest_pose(bone), "{bone}");
        }
    }

    #[test]
    fn morph_weights_clamp() {
        let mut rig = LoadedRig::from_bytes("companion", &glb_fixture()).unwrap();
        rig.set_morph(Expression::Aa, 3.0);
        assert_eq!(rig.morph(Expression::Aa), 1.0);
        rig.set_morph(Expression::Aa, -1.0);
        assert_eq!(rig.morph(Expression::Aa), 0.0);
    }

    #[test]
    fn placeholder_keeps_public_surface_without_morphs() {
        let mut rig = PlaceholderRig::new();
        rig.set_bone_rotation(BoneId::Head, Euler::new(0.1, 0.0, 0.0));
        assert_eq!(rig.bone_rotation(BoneId::Head).x, 0.1);

        rig.set_morph(Expression::Blink, 1.0);
        assert_eq!(rig.morph(Expression::Blink), 0.0);
        assert!(!rig.has_morph(Expression::Blink));
    }
}
