use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for the runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub monitor: MonitorConfig,
    pub scene: SceneConfig,
    pub audio: AudioConfig,
}

impl RuntimeConfig {
    /// Loads a JSON configuration file. Missing sections fall back to defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Budgets and knobs owned by the render engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of frame durations kept for the smoothed frame time.
    pub telemetry_window: usize,
    /// Memory estimate (bytes) above which the memory guard kicks in.
    pub memory_ceiling_bytes: u64,
    pub draw_call_budget: u32,
    /// Shader sources longer than this are rejected before compilation.
    pub max_shader_length: usize,
    /// Pixel ratio reported by the host display.
    pub device_pixel_ratio: f32,
    /// Pixel ratio caps for the low, medium and high tiers.
    pub pixel_ratio_caps: [f32; 3],
    pub target_fps: f32,
    pub tone_mapping_exposure: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            telemetry_window: 60,
            memory_ceiling_bytes: 256 * 1024 * 1024,
            draw_call_budget: 1000,
            max_shader_length: 50_000,
            device_pixel_ratio: 1.0,
            pixel_ratio_caps: [1.0, 1.5, 2.0],
            target_fps: 60.0,
            tone_mapping_exposure: 1.0,
        }
    }
}

/// Thresholds for the performance monitor. The numbers are tuning defaults,
/// not derived limits; override them per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub sample_interval_secs: f64,
    pub history_len: usize,
    pub max_alerts: usize,
    pub fps_critical: f32,
    pub fps_low: f32,
    pub fps_medium: f32,
    pub fps_high: f32,
    pub memory_warning_mb: f32,
    pub memory_critical_mb: f32,
    pub draw_calls_high: u32,
    /// FPS variance over `thermal_window` samples that counts as throttling.
    pub thermal_variance: f32,
    pub thermal_window: usize,
    /// Number of samples averaged by the adaptation step.
    pub adaptation_window: usize,
    pub critical_alert_window_secs: f64,
    pub upgrade_quiet_secs: f64,
    /// Minimum spacing between two alerts of the same kind.
    pub alert_cooldown_secs: f64,
    pub particle_hard_cap: u32,
    pub particle_floor: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 0.1,
            history_len: 100,
            max_alerts: 50,
            fps_critical: 15.0,
            fps_low: 25.0,
            fps_medium: 45.0,
            fps_high: 55.0,
            memory_warning_mb: 150.0,
            memory_critical_mb: 200.0,
            draw_calls_high: 1000,
            thermal_variance: 100.0,
            thermal_window: 10,
            adaptation_window: 5,
            critical_alert_window_secs: 5.0,
            upgrade_quiet_secs: 10.0,
            alert_cooldown_secs: 1.0,
            particle_hard_cap: 10_000,
            particle_floor: 500,
        }
    }
}

/// Shared scene framework settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub adaptation_interval_secs: f64,
    /// Scenes downgrade when FPS drops below `target * downgrade_ratio`.
    pub downgrade_ratio: f32,
    /// Scenes upgrade when FPS climbs above `target * upgrade_ratio`.
    pub upgrade_ratio: f32,
    pub shake_decay: f32,
    pub shake_epsilon: f32,
    /// Strength of the uniform scale pulse applied to audio-reactive meshes.
    pub audio_pulse_gain: f32,
    pub seed: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            adaptation_interval_secs: 1.0,
            downgrade_ratio: 0.8,
            upgrade_ratio: 1.1,
            shake_decay: 0.9,
            shake_epsilon: 1e-3,
            audio_pulse_gain: 0.3,
            seed: 0x5eed,
        }
    }
}

/// Configuration specific to the audio analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "monitor": { "fps_low": 30.0 } }"#).unwrap();
        assert_eq!(config.monitor.fps_low, 30.0);
        assert_eq!(config.monitor.fps_critical, 15.0);
        assert_eq!(config.engine, EngineConfig::default());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(RuntimeConfig::from_json("{ not json").is_err());
    }
}
