use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{QualityTier, Result};

pub const EXT_COLOR_BUFFER_FLOAT: &str = "EXT_color_buffer_float";
pub const EXT_TEXTURE_FILTER_ANISOTROPIC: &str = "EXT_texture_filter_anisotropic";
pub const OES_TEXTURE_FLOAT_LINEAR: &str = "OES_texture_float_linear";
pub const KHR_PARALLEL_SHADER_COMPILE: &str = "KHR_parallel_shader_compile";

const HIGH_TIER_TEXTURE_SIZE: u32 = 8192;
const MEDIUM_TIER_TEXTURE_SIZE: u32 = 4096;

/// What the host GPU can do. Probed once at engine initialisation and never
/// changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    pub rendering_context: bool,
    pub renderer_name: String,
    pub max_texture_size: u32,
    pub max_vertex_uniforms: u32,
    pub max_fragment_uniforms: u32,
    pub extensions: BTreeSet<String>,
}

impl CapabilityProfile {
    pub fn supports(&self, extension: &str) -> bool {
        self.extensions.contains(extension)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Tier a fresh session starts at on this device.
    pub fn initial_tier(&self) -> QualityTier {
        if !self.rendering_context {
            return QualityTier::Low;
        }
        if self.max_texture_size >= HIGH_TIER_TEXTURE_SIZE
            && self.supports(EXT_COLOR_BUFFER_FLOAT)
            && self.max_fragment_uniforms >= 1024
        {
            QualityTier::High
        } else if self.max_texture_size >= MEDIUM_TIER_TEXTURE_SIZE {
            QualityTier::Medium
        } else {
            QualityTier::Low
        }
    }

    /// A capable desktop-class device.
    pub fn desktop() -> Self {
        Self {
            rendering_context: true,
            renderer_name: "headless-desktop".to_string(),
            max_texture_size: 16_384,
            max_vertex_uniforms: 4096,
            max_fragment_uniforms: 4096,
            extensions: [
                EXT_COLOR_BUFFER_FLOAT,
                EXT_TEXTURE_FILTER_ANISOTROPIC,
                OES_TEXTURE_FLOAT_LINEAR,
                KHR_PARALLEL_SHADER_COMPILE,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }

    /// A mid-range mobile device.
    pub fn mobile() -> Self {
        Self {
            rendering_context: true,
            renderer_name: "headless-mobile".to_string(),
            max_texture_size: 4096,
            max_vertex_uniforms: 256,
            max_fragment_uniforms: 224,
            extensions: [EXT_TEXTURE_FILTER_ANISOTROPIC]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_initial_tier_from_limits() {
        assert_eq!(CapabilityProfile::desktop().initial_tier(), QualityTier::High);
        assert_eq!(CapabilityProfile::mobile().initial_tier(), QualityTier::Medium);

        let mut weak = CapabilityProfile::mobile();
        weak.max_texture_size = 2048;
        assert_eq!(weak.initial_tier(), QualityTier::Low);
    }

    #[test]
    fn desktop_without_float_buffers_is_medium() {
        let mut profile = CapabilityProfile::desktop();
        profile.extensions.remove(EXT_COLOR_BUFFER_FLOAT);
        assert_eq!(profile.initial_tier(), QualityTier::Medium);
    }
}
