//! Quality tier and the derived settings shared by engine, monitor and scenes.
//!
//! The settings live behind a single-writer cell: [`QualityWriter`] is held by
//! the performance monitor alone, every other component gets a cloneable
//! [`QualityReader`]. Readers may file [`QualityRequest`]s which the writer
//! drains on its next adaptation tick.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

pub const MIN_RENDER_SCALE: f32 = 0.5;
pub const MAX_RENDER_SCALE: f32 = 1.0;
const RENDER_SCALE_STEP: f32 = 0.1;
const PARTICLE_DOWN_FACTOR: f32 = 0.7;
const PARTICLE_UP_FACTOR: f32 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl QualityTier {
    pub fn step_down(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium | Self::Low => Self::Low,
        }
    }

    pub fn step_up(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordered shadow quality ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadowTier {
    Off,
    Low,
    Medium,
    High,
}

impl ShadowTier {
    pub fn map_size(self) -> u32 {
        match self {
            Self::Off => 0,
            Self::Low => 512,
            Self::Medium => 1024,
            Self::High => 2048,
        }
    }

    pub fn step_down(self) -> Self {
        match self {
            Self::High => Self::Medium,
            Self::Medium => Self::Low,
            Self::Low | Self::Off => Self::Off,
        }
    }

    pub fn step_up(self) -> Self {
        match self {
            Self::Off => Self::Low,
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }

    pub fn enabled(self) -> bool {
        self != Self::Off
    }
}

/// Concrete resource limits derived from the tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualitySettings {
    pub tier: QualityTier,
    pub max_particles: u32,
    pub shadows: ShadowTier,
    pub render_scale: f32,
    pub post_processing: bool,
    pub antialias: bool,
}

impl QualitySettings {
    pub fn for_tier(tier: QualityTier) -> Self {
        match tier {
            QualityTier::High => Self {
                tier,
                max_particles: 10_000,
                shadows: ShadowTier::High,
                render_scale: 1.0,
                post_processing: true,
                antialias: true,
            },
            QualityTier::Medium => Self {
                tier,
                max_particles: 5_000,
                shadows: ShadowTier::Medium,
                render_scale: 0.9,
                post_processing: false,
                antialias: true,
            },
            QualityTier::Low => Self {
                tier,
                max_particles: 2_000,
                shadows: ShadowTier::Off,
                render_scale: 0.7,
                post_processing: false,
                antialias: false,
            },
        }
    }

    /// Applies one downgrade step. Post-processing goes first, then the tier
    /// and every budget drop by one notch. Never raises any resource.
    pub fn downgrade(&mut self, particle_floor: u32) {
        self.post_processing = false;
        self.tier = self.tier.step_down();
        let scaled = (self.max_particles as f32 * PARTICLE_DOWN_FACTOR).round() as u32;
        self.max_particles = scaled.max(particle_floor).min(self.max_particles);
        self.shadows = self.shadows.step_down();
        self.render_scale = snap_scale(self.render_scale - RENDER_SCALE_STEP);
        self.antialias = self.antialias && self.tier != QualityTier::Low;
    }

    /// Applies one upgrade step, capped at `particle_cap`.
    pub fn upgrade(&mut self, particle_cap: u32) {
        self.tier = self.tier.step_up();
        let scaled = (self.max_particles as f32 * PARTICLE_UP_FACTOR).round() as u32;
        self.max_particles = scaled.min(particle_cap).max(self.max_particles.min(particle_cap));
        self.shadows = self.shadows.step_up();
        self.render_scale = snap_scale(self.render_scale + RENDER_SCALE_STEP);
        self.antialias = self.tier != QualityTier::Low;
        self.post_processing = self.tier == QualityTier::High;
    }

    /// True when `self` grants no resource beyond `other`.
    pub fn within(&self, other: &QualitySettings) -> bool {
        self.tier <= other.tier
            && self.max_particles <= other.max_particles
            && self.shadows <= other.shadows
            && self.render_scale <= other.render_scale + f32::EPSILON
            && (!self.post_processing || other.post_processing)
    }
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self::for_tier(QualityTier::Medium)
    }
}

fn snap_scale(value: f32) -> f32 {
    ((value * 10.0).round() / 10.0).clamp(MIN_RENDER_SCALE, MAX_RENDER_SCALE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityStep {
    Down,
    Up,
}

/// One-shot request filed by a reader, applied by the writer on its next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRequest {
    pub step: QualityStep,
    pub source: String,
}

#[derive(Debug)]
struct SharedQuality {
    settings: RwLock<QualitySettings>,
    revision: AtomicU64,
    requests: Mutex<Vec<QualityRequest>>,
}

/// Creates the cell and returns its only writer plus a first reader.
pub fn quality_channel(initial: QualitySettings) -> (QualityWriter, QualityReader) {
    let shared = Arc::new(SharedQuality {
        settings: RwLock::new(initial),
        revision: AtomicU64::new(0),
        requests: Mutex::new(Vec::new()),
    });
    (
        QualityWriter {
            shared: shared.clone(),
        },
        QualityReader { shared },
    )
}

/// Exclusive write access. Deliberately not `Clone`.
#[derive(Debug)]
pub struct QualityWriter {
    shared: Arc<SharedQuality>,
}

impl QualityWriter {
    pub fn snapshot(&self) -> QualitySettings {
        *self.shared.settings.read()
    }

    pub fn reader(&self) -> QualityReader {
        QualityReader {
            shared: self.shared.clone(),
        }
    }

    /// Mutates the settings in place and bumps the revision counter.
    pub fn update(&self, apply: impl FnOnce(&mut QualitySettings)) -> QualitySettings {
        let mut settings = self.shared.settings.write();
        apply(&mut settings);
        self.shared.revision.fetch_add(1, Ordering::AcqRel);
        *settings
    }

    pub fn drain_requests(&self) -> Vec<QualityRequest> {
        std::mem::take(&mut *self.shared.requests.lock())
    }
}

/// Read-only view of the shared settings.
#[derive(Debug, Clone)]
pub struct QualityReader {
    shared: Arc<SharedQuality>,
}

impl QualityReader {
    pub fn snapshot(&self) -> QualitySettings {
        *self.shared.settings.read()
    }

    pub fn tier(&self) -> QualityTier {
        self.shared.settings.read().tier
    }

    /// Increments every time the writer touches the settings.
    pub fn revision(&self) -> u64 {
        self.shared.revision.load(Ordering::Acquire)
    }

    pub fn request(&self, step: QualityStep, source: impl Into<String>) {
        let source = source.into();
        tracing::debug!(?step, %source, "quality step requested");
        self.shared
            .requests
            .lock()
            .push(QualityRequest { step, source });
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.requests.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_move_one_step() {
        assert_eq!(QualityTier::High.step_down(), QualityTier::Medium);
        assert_eq!(QualityTier::Low.step_down(), QualityTier::Low);
        assert_eq!(QualityTier::Low.step_up(), QualityTier::Medium);
        assert_eq!(QualityTier::High.step_up(), QualityTier::High);
    }

    #[test]
    fn downgrade_never_adds_resources() {
        let mut settings = QualitySettings::for_tier(QualityTier::High);
        for _ in 0..6 {
            let before = settings;
            settings.downgrade(500);
            assert!(settings.within(&before));
        }
        assert_eq!(settings.tier, QualityTier::Low);
        assert_eq!(settings.shadows, ShadowTier::Off);
        assert_eq!(settings.render_scale, MIN_RENDER_SCALE);
        assert!(settings.max_particles >= 500 && settings.max_particles < 2_000);
    }

    #[test]
    fn downgrade_turns_post_processing_off_first() {
        let mut settings = QualitySettings::for_tier(QualityTier::High);
        settings.downgrade(500);
        assert!(!settings.post_processing);
        assert_eq!(settings.tier, QualityTier::Medium);
        assert_eq!(settings.max_particles, 7_000);
    }

    #[test]
    fn upgrade_respects_cap() {
        let mut settings = QualitySettings::for_tier(QualityTier::Medium);
        settings.upgrade(5_500);
        assert_eq!(settings.max_particles, 5_500);
        assert_eq!(settings.render_scale, MAX_RENDER_SCALE);
        assert!(settings.post_processing);
    }

    #[test]
    fn readers_see_writer_updates_and_file_requests() {
        let (writer, reader) = quality_channel(QualitySettings::for_tier(QualityTier::High));
        let before = reader.revision();
        writer.update(|settings| settings.downgrade(500));

        assert_eq!(reader.tier(), QualityTier::Medium);
        assert!(reader.revision() > before);

        reader.request(QualityStep::Down, "scene");
        assert_eq!(reader.pending_requests(), 1);
        assert_eq!(writer.drain_requests().len(), 1);
        assert_eq!(reader.pending_requests(), 0);
    }
}
