//! Cinematic camera: immutable camera configurations, shots and sequences,
//! and the controller state machine that drives a scene's camera rig.

pub mod controller;
pub mod easing;
pub mod shot;

use glam::Vec3;

use crate::engine::backend::CameraView;

pub use controller::{CinematicController, TransitionCallback};
pub use easing::Easing;
pub use shot::{
    CameraConfig, CameraConstraints, CameraMode, EmotionalPreset, Sequence, Shot, Trigger,
};

/// The live camera. `position`/`target`/`fov` form the base pose that modes
/// and transitions write; `offset` and `roll` are post-effects layered on top
/// when the view is rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraRig {
    pub position: Vec3,
    pub target: Vec3,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub offset: Vec3,
    pub roll: f32,
}

impl CameraRig {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            position: config.position,
            target: config.target,
            fov: config.fov,
            near: config.near,
            far: config.far,
            offset: Vec3::ZERO,
            roll: 0.0,
        }
    }

    pub fn rendered_position(&self) -> Vec3 {
        self.position + self.offset
    }

    /// Unit vector from the base position toward the target.
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Current base pose as a fresh configuration value.
    pub fn snapshot(&self) -> CameraConfig {
        CameraConfig::new(self.position, self.target)
            .with_fov(self.fov)
            .with_clip(self.near, self.far)
    }

    pub fn view(&self, aspect: f32) -> CameraView {
        CameraView {
            position: self.rendered_position(),
            target: self.target,
            fov_degrees: self.fov,
            roll: self.roll,
            near: self.near,
            far: self.far,
            aspect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_layers_offset_over_base_pose() {
        let mut rig = CameraRig::from_config(&CameraConfig::default());
        rig.offset = Vec3::new(0.0, 0.5, 0.0);
        let view = rig.view(16.0 / 9.0);
        assert_eq!(view.position, Vec3::new(0.0, 0.5, 10.0));
        assert_eq!(rig.snapshot().position, Vec3::new(0.0, 0.0, 10.0));
        assert_eq!(rig.forward(), Vec3::NEG_Z);
    }
}
