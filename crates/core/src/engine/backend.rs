use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::{capability::CapabilityProfile, resources::ResourceId, shader::ShaderStage};
use crate::{QualitySettings, Result, ShadowTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowMode {
    Disabled,
    Basic,
    Pcf,
    PcfSoft,
}

impl ShadowMode {
    pub fn for_shadows(shadows: ShadowTier) -> Self {
        match shadows {
            ShadowTier::Off => Self::Disabled,
            ShadowTier::Low => Self::Basic,
            ShadowTier::Medium => Self::Pcf,
            ShadowTier::High => Self::PcfSoft,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    Srgb,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneMapping {
    None,
    AcesFilmic,
}

/// Everything the engine tells the renderer about how to draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RendererSettings {
    pub pixel_ratio: f32,
    pub render_scale: f32,
    pub color_space: ColorSpace,
    pub tone_mapping: ToneMapping,
    pub exposure: f32,
    pub shadow_mode: ShadowMode,
    pub shadow_map_size: u32,
    pub antialias: bool,
    pub post_processing: bool,
}

impl RendererSettings {
    /// Derives renderer settings from quality settings and the device's pixel
    /// ratio, capping the ratio per tier.
    pub fn from_quality(
        quality: &QualitySettings,
        device_pixel_ratio: f32,
        caps: [f32; 3],
        exposure: f32,
    ) -> Self {
        let cap = caps[quality.tier.index()];
        Self {
            pixel_ratio: device_pixel_ratio.min(cap).max(0.5),
            render_scale: quality.render_scale,
            color_space: ColorSpace::Srgb,
            tone_mapping: ToneMapping::AcesFilmic,
            exposure,
            shadow_mode: ShadowMode::for_shadows(quality.shadows),
            shadow_map_size: quality.shadows.map_size(),
            antialias: quality.antialias,
            post_processing: quality.post_processing,
        }
    }

    /// Effective drawing-buffer scale.
    pub fn effective_pixel_ratio(&self) -> f32 {
        self.pixel_ratio * self.render_scale
    }
}

/// Counters the renderer reports after each submitted frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderCounters {
    pub draw_calls: u32,
    pub triangles: u64,
    pub points: u64,
    pub geometries: u32,
    pub textures: u32,
    /// Memory held by the renderer itself (caches, render lists), in bytes.
    pub memory_bytes: u64,
}

/// Camera pose handed to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraView {
    pub position: Vec3,
    pub target: Vec3,
    pub fov_degrees: f32,
    pub roll: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DrawKind {
    Mesh { triangles: u32 },
    Points { count: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawItem {
    pub label: String,
    pub kind: DrawKind,
    pub resource: Option<ResourceId>,
    pub casts_shadow: bool,
}

/// One frame worth of work for the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSubmission {
    pub camera: CameraView,
    pub draws: Vec<DrawItem>,
    pub lights: u32,
    pub shadow_map_size: u32,
    pub post_processing: bool,
}

/// The GPU side of the engine. The host supplies one implementation per
/// rendering surface; the engine owns it exclusively.
pub trait RenderBackend: Send {
    fn name(&self) -> &str;

    /// Probes the surface. `None` means no usable rendering context.
    fn probe(&mut self) -> Option<CapabilityProfile>;

    fn configure(&mut self, settings: &RendererSettings) -> Result<()>;

    fn resize(&mut self, width: u32, height: u32);

    fn compile_shader(&mut self, source: &str, stage: ShaderStage) -> Result<()>;

    fn submit(&mut self, frame: &FrameSubmission) -> Result<()>;

    fn counters(&self) -> RenderCounters;

    /// Drops cached render lists. Returns the number of bytes freed.
    fn flush_resources(&mut self) -> u64;

    /// Releases the context. Called once from engine disposal.
    fn release(&mut self);
}
