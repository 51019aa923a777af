use glam::Vec3;

use crate::engine::{DrawItem, DrawKind, ResourceId, ResourceKind, ResourceTracker};

/// Vertex bytes per triangle (three positions and normals).
const BYTES_PER_TRIANGLE: u64 = 72;

#[derive(Debug, Clone, PartialEq)]
pub struct MeshDesc {
    pub name: String,
    pub triangles: u32,
    pub position: Vec3,
    pub scale: f32,
    pub casts_shadow: bool,
    /// Joins the audio-reactive registry when true.
    pub audio_reactive: bool,
}

impl MeshDesc {
    pub fn new(name: impl Into<String>, triangles: u32) -> Self {
        Self {
            name: name.into(),
            triangles,
            position: Vec3::ZERO,
            scale: 1.0,
            casts_shadow: true,
            audio_reactive: true,
        }
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn scaled(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn without_shadow(mut self) -> Self {
        self.casts_shadow = false;
        self
    }

    pub fn static_mesh(mut self) -> Self {
        self.audio_reactive = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub(crate) usize);

/// A structural mesh. `scale` is the rendered scale; `base_scale` is what the
/// world sets and the audio pulse multiplies.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub name: String,
    pub triangles: u32,
    pub position: Vec3,
    pub rotation: f32,
    pub base_scale: f32,
    pub scale: f32,
    pub casts_shadow: bool,
    pub visible: bool,
    pub(crate) audio_reactive: bool,
    pub(crate) resource: Option<ResourceId>,
}

impl Mesh {
    pub(crate) fn allocate(desc: MeshDesc, tracker: &ResourceTracker) -> Self {
        let resource = tracker.allocate(
            ResourceKind::Geometry,
            format!("mesh:{}", desc.name),
            u64::from(desc.triangles) * BYTES_PER_TRIANGLE,
        );
        Self {
            name: desc.name,
            triangles: desc.triangles,
            position: desc.position,
            rotation: 0.0,
            base_scale: desc.scale,
            scale: desc.scale,
            casts_shadow: desc.casts_shadow,
            visible: true,
            audio_reactive: desc.audio_reactive,
            resource: Some(resource),
        }
    }

    pub fn is_audio_reactive(&self) -> bool {
        self.audio_reactive
    }

    pub(crate) fn draw_item(&self) -> DrawItem {
        DrawItem {
            label: self.name.clone(),
            kind: DrawKind::Mesh {
                triangles: self.triangles,
            },
            resource: self.resource,
            casts_shadow: self.casts_shadow,
        }
    }

    pub(crate) fn release(&mut self, tracker: &ResourceTracker) {
        if let Some(id) = self.resource.take() {
            tracker.release(id);
        }
        self.visible = false;
    }
}

/// Clip playback clock. Worlds read `time` to drive looping animation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationMixer {
    pub name: String,
    pub time: f32,
    pub time_scale: f32,
    /// Loop length in seconds; `None` plays forever.
    pub period: Option<f32>,
}

impl AnimationMixer {
    pub fn new(name: impl Into<String>, period: Option<f32>) -> Self {
        Self {
            name: name.into(),
            time: 0.0,
            time_scale: 1.0,
            period: period.filter(|p| *p > 0.0),
        }
    }

    pub fn update(&mut self, delta: f32) {
        self.time += delta * self.time_scale;
        if let Some(period) = self.period {
            self.time = self.time.rem_euclid(period);
        }
    }

    /// Position inside the loop as a fraction in `[0, 1)`.
    pub fn phase(&self) -> f32 {
        match self.period {
            Some(period) => self.time / period,
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixer_wraps_on_period() {
        let mut mixer = AnimationMixer::new("spin", Some(2.0));
        mixer.time_scale = 1.5;
        mixer.update(1.0);
        mixer.update(1.0);
        assert!((mixer.time - 1.0).abs() < 1e-6);
        assert!((mixer.phase() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn mesh_accounts_geometry_bytes() {
        let tracker = ResourceTracker::new();
        let mut mesh = Mesh::allocate(MeshDesc::new("monolith", 100), &tracker);
        assert_eq!(tracker.total_bytes(), 100 * BYTES_PER_TRIANGLE);
        mesh.release(&tracker);
        assert_eq!(tracker.live_count(), 0);
    }
}
