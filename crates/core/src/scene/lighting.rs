use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::engine::{ResourceId, ResourceKind, ResourceTracker};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub casts_shadow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
}

/// Declarative lighting: one ambient, one directional, any number of points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingDescription {
    pub ambient: AmbientLight,
    pub directional: DirectionalLight,
    pub points: Vec<PointLight>,
}

impl LightingDescription {
    pub fn new(ambient: Vec3, ambient_intensity: f32) -> Self {
        Self {
            ambient: AmbientLight {
                color: ambient,
                intensity: ambient_intensity,
            },
            directional: DirectionalLight {
                direction: Vec3::new(-0.5, -1.0, -0.3),
                color: Vec3::ONE,
                intensity: 1.0,
                casts_shadow: true,
            },
            points: Vec::new(),
        }
    }

    pub fn sun(mut self, direction: Vec3, color: Vec3, intensity: f32) -> Self {
        self.directional = DirectionalLight {
            direction,
            color,
            intensity,
            ..self.directional
        };
        self
    }

    pub fn point(mut self, position: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        self.points.push(PointLight {
            position,
            color,
            intensity,
            range,
        });
        self
    }
}

/// Lights built from a description, plus the shadow map they own.
#[derive(Debug)]
pub struct LightingRig {
    pub description: LightingDescription,
    shadow_map_size: u32,
    shadow_map: Option<ResourceId>,
}

impl LightingRig {
    pub(crate) fn build(
        description: LightingDescription,
        shadow_map_size: u32,
        tracker: &ResourceTracker,
    ) -> Self {
        let mut rig = Self {
            description,
            shadow_map_size: 0,
            shadow_map: None,
        };
        rig.set_shadow_map_size(shadow_map_size, tracker);
        rig
    }

    pub fn light_count(&self) -> u32 {
        2 + self.description.points.len() as u32
    }

    pub fn shadow_map_size(&self) -> u32 {
        self.shadow_map_size
    }

    pub(crate) fn set_shadow_map_size(&mut self, size: u32, tracker: &ResourceTracker) {
        let size = if self.description.directional.casts_shadow {
            size
        } else {
            0
        };
        if size == self.shadow_map_size && (size == 0) == self.shadow_map.is_none() {
            return;
        }
        let bytes = u64::from(size) * u64::from(size) * 4;
        match (self.shadow_map, size) {
            (Some(id), 0) => {
                tracker.release(id);
                self.shadow_map = None;
            }
            (Some(id), _) => {
                tracker.resize(id, bytes);
            }
            (None, 0) => {}
            (None, _) => {
                self.shadow_map = Some(tracker.allocate(ResourceKind::ShadowMap, "shadow-map", bytes));
            }
        }
        self.shadow_map_size = size;
    }

    pub(crate) fn release(&mut self, tracker: &ResourceTracker) {
        if let Some(id) = self.shadow_map.take() {
            tracker.release(id);
        }
        self.shadow_map_size = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_map_follows_size_changes() {
        let tracker = ResourceTracker::new();
        let description = LightingDescription::new(Vec3::splat(0.2), 0.5).point(
            Vec3::Y,
            Vec3::ONE,
            2.0,
            10.0,
        );
        let mut rig = LightingRig::build(description, 1024, &tracker);
        assert_eq!(rig.light_count(), 3);
        assert_eq!(tracker.total_bytes(), 1024 * 1024 * 4);

        rig.set_shadow_map_size(512, &tracker);
        assert_eq!(tracker.total_bytes(), 512 * 512 * 4);

        rig.set_shadow_map_size(0, &tracker);
        assert_eq!(tracker.live_count(), 0);
        rig.release(&tracker);
        assert_eq!(rig.shadow_map_size(), 0);
    }

    #[test]
    fn shadowless_sun_never_allocates() {
        let tracker = ResourceTracker::new();
        let mut description = LightingDescription::new(Vec3::ONE, 1.0);
        description.directional.casts_shadow = false;
        let rig = LightingRig::build(description, 2048, &tracker);
        assert_eq!(rig.shadow_map_size(), 0);
        assert_eq!(tracker.live_count(), 0);
    }
}
