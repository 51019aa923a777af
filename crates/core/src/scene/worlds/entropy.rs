//! Entropy: explosive particle chaos driven by escalating metrics.
//!
//! `entropy` and `fracture` only ever grow; `turbulence` follows the music
//! and relaxes. All three scale particle velocity, so the scene gets wilder
//! the longer it plays.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    camera::{CameraConfig, CameraMode, Easing, EmotionalPreset, Sequence, Shot, Trigger},
    engine::{ResourceId, ResourceKind, WorldKind},
    scene::{
        InteractionEvent, InteractionKind, LightingDescription, LoadStatus, MeshDesc, MeshHandle,
        MovementArchetype, ParticleConfig, ParticleHandle, Stage, World,
    },
    AudioAnalysisFrame,
};

const FRACTURE_STEPS: [f32; 3] = [0.25, 0.5, 0.75];
const NOISE_FIELD_BYTES: u64 = 256 * 256 * 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChaosMetrics {
    pub entropy: f32,
    pub turbulence: f32,
    pub fracture: f32,
}

impl ChaosMetrics {
    /// Multiplier applied to particle displacement.
    pub fn velocity_scale(&self) -> f32 {
        1.0 + self.entropy * 2.0 + self.turbulence * 1.5 + self.fracture
    }

    fn advance(&mut self, delta: f32, energy: f32, high: f32) {
        self.entropy = (self.entropy + delta * (0.005 + energy * 0.02)).min(1.0);
        let pull = (delta * 2.0).min(1.0);
        self.turbulence += (high.max(energy * 0.5) - self.turbulence) * pull;
        self.turbulence = self.turbulence.clamp(0.0, 1.0);
    }

    fn strike(&mut self, energy: f32) {
        self.fracture = (self.fracture + 0.05 * (0.5 + energy)).min(1.0);
        self.turbulence = (self.turbulence + energy * 0.3).min(1.0);
    }
}

#[derive(Debug, Default)]
pub struct Entropy {
    loaded: bool,
    metrics: ChaosMetrics,
    shards: Option<ParticleHandle>,
    sparks: Option<ParticleHandle>,
    core: Option<MeshHandle>,
    fragments: Vec<MeshHandle>,
    revealed: usize,
    noise_field: Option<ResourceId>,
}

impl Entropy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> ChaosMetrics {
        self.metrics
    }

    pub fn revealed_fragments(&self) -> usize {
        self.revealed
    }

    fn reveal_fragments(&mut self, stage: &mut Stage) {
        while self.revealed < FRACTURE_STEPS.len()
            && self.metrics.fracture >= FRACTURE_STEPS[self.revealed]
        {
            if let Some(mesh) = self
                .fragments
                .get(self.revealed)
                .and_then(|h| stage.mesh_mut(*h))
            {
                mesh.visible = true;
            }
            self.revealed += 1;
            stage.cues().intensity("entropy.fracture", self.metrics.fracture);
            stage.camera_mut().shake(0.6);
            debug!(fragments = self.revealed, fracture = self.metrics.fracture, "entropy fracture");
        }
    }
}

impl World for Entropy {
    fn kind(&self) -> WorldKind {
        WorldKind::Entropy
    }

    fn initialize_world(&mut self, stage: &mut Stage) -> LoadStatus {
        if self.loaded {
            return LoadStatus::Ready;
        }
        self.noise_field = Some(stage.resources().allocate(
            ResourceKind::Texture,
            "entropy:noise-field",
            NOISE_FIELD_BYTES,
        ));
        stage.setup_lighting(
            LightingDescription::new(Vec3::new(0.6, 0.2, 0.1), 0.25)
                .sun(Vec3::new(0.4, -1.0, 0.1), Vec3::new(1.0, 0.6, 0.4), 0.9)
                .point(Vec3::ZERO, Vec3::new(1.0, 0.4, 0.1), 3.0, 18.0),
        );

        self.core = Some(stage.add_mesh(MeshDesc::new("core", 1280).scaled(2.0)));
        for i in 0..FRACTURE_STEPS.len() {
            let angle = i as f32 * 2.09;
            let handle = stage.add_mesh(
                MeshDesc::new(format!("fragment-{i}"), 96)
                    .at(Vec3::new(angle.cos() * 3.0, (i as f32 - 1.0) * 1.5, angle.sin() * 3.0)),
            );
            if let Some(mesh) = stage.mesh_mut(handle) {
                mesh.visible = false;
            }
            self.fragments.push(handle);
        }

        self.shards = Some(stage.create_particle_system(
            "shards",
            ParticleConfig::new(6000, MovementArchetype::ExplosiveChaos)
                .at(Vec3::ZERO, 8.0)
                .colored(Vec3::new(1.0, 0.45, 0.2), 0.07),
        ));
        self.sparks = Some(stage.create_particle_system(
            "sparks",
            ParticleConfig::new(2000, MovementArchetype::ExplosiveChaos)
                .at(Vec3::ZERO, 4.0)
                .colored(Vec3::new(1.0, 0.9, 0.6), 0.04),
        ));

        let wide = CameraConfig::new(Vec3::new(0.0, 3.0, 18.0), Vec3::ZERO);
        let camera = stage.camera_mut();
        camera.set_emotional_preset(EmotionalPreset::Chaotic);
        camera.start_shot(Shot::new("witness", CameraMode::Handheld, wide).reactive(1.0));
        camera.add_sequence(
            Sequence::new(
                "detonation",
                vec![
                    Shot::new(
                        "rush",
                        CameraMode::Dolly,
                        CameraConfig::new(Vec3::new(0.0, 1.0, 9.0), Vec3::ZERO).with_fov(80.0),
                    )
                    .over(0.8, Easing::EaseOutExpo)
                    .hold(2.0)
                    .reactive(1.5),
                    Shot::new("recoil", CameraMode::Handheld, wide)
                        .over(2.5, Easing::EaseInOutCubic)
                        .reactive(1.0),
                ],
            )
            .triggered_by(Trigger::AudioEnergy {
                threshold: 0.8,
                require_onset: true,
            })
            .cooldown(6.0),
        );
        camera.add_sequence(
            Sequence::new(
                "vortex",
                vec![Shot::new(
                    "spiral",
                    CameraMode::Orbit,
                    CameraConfig::new(Vec3::new(0.0, 5.0, 12.0), Vec3::ZERO),
                )
                .over(2.0, Easing::EaseInOutSine)],
            )
            .triggered_by(Trigger::Interaction {
                tag: "click".into(),
            }),
        );

        self.loaded = true;
        LoadStatus::Ready
    }

    fn update_world(&mut self, stage: &mut Stage, delta: f32, audio: Option<&AudioAnalysisFrame>) {
        let (energy, high) = audio
            .map(|a| (a.energy.total, a.energy.high))
            .unwrap_or((0.0, 0.0));
        self.metrics.advance(delta, energy, high);

        let scale = self.metrics.velocity_scale();
        for handle in [self.shards, self.sparks].into_iter().flatten() {
            stage.step_particles(handle, delta, energy, scale);
        }

        if let Some(core) = self.core.and_then(|h| stage.mesh_mut(h)) {
            core.rotation = (core.rotation + delta * (0.3 + self.metrics.turbulence * 3.0))
                % std::f32::consts::TAU;
        }
        let glow = 2.0 + self.metrics.turbulence * 4.0;
        if let Some(point) = stage.lighting_mut().and_then(|l| l.points.first_mut()) {
            point.intensity = glow;
        }
    }

    fn handle_interaction(&mut self, stage: &mut Stage, event: &InteractionEvent) {
        if event.kind == InteractionKind::Click {
            let force = event.intensity.unwrap_or(0.5).clamp(0.0, 1.0);
            self.metrics.turbulence = (self.metrics.turbulence + force * 0.3).min(1.0);
            stage.camera_mut().shake(force);
            if let Some(position) = event.world_position {
                stage.cues().at("entropy.burst", position);
            }
        }
    }

    fn handle_audio_event(&mut self, stage: &mut Stage, audio: &AudioAnalysisFrame) {
        if audio.onset {
            self.metrics.strike(audio.energy.total);
            self.reveal_fragments(stage);
        }
    }

    fn dispose_world(&mut self, stage: &mut Stage) {
        if let Some(id) = self.noise_field.take() {
            stage.resources().release(id);
        }
        self.fragments.clear();
    }

    fn status(&self) -> String {
        format!(
            "entropy={:.2} turbulence={:.2} fracture={:.2} fragments={}",
            self.metrics.entropy, self.metrics.turbulence, self.metrics.fracture, self.revealed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scene::testing, BandEnergy, QualityTier};

    fn loaded(tier: QualityTier) -> (Entropy, Stage, crate::cues::RecordingCueSink) {
        let (mut stage, _writer, sink) = testing::stage(WorldKind::Entropy, tier);
        let mut world = Entropy::new();
        assert_eq!(world.initialize_world(&mut stage), LoadStatus::Ready);
        (world, stage, sink)
    }

    #[test]
    fn particles_stay_on_at_low_tier() {
        let (_world, stage, _sink) = loaded(QualityTier::Low);
        assert!(stage.particle_systems().all(|p| p.draw_range() > 0));
    }

    #[test]
    fn entropy_and_fracture_never_decrease() {
        let (mut world, mut stage, _sink) = loaded(QualityTier::High);
        let hit = AudioAnalysisFrame::from_energy(BandEnergy::flat(0.9), true);
        let quiet = AudioAnalysisFrame::from_energy(BandEnergy::flat(0.0), false);
        let mut last = world.metrics();
        for i in 0..300 {
            let audio = if i % 10 == 0 { &hit } else { &quiet };
            stage.advance_clock(0.05);
            world.update_world(&mut stage, 0.05, Some(audio));
            world.handle_audio_event(&mut stage, audio);
            let now = world.metrics();
            assert!(now.entropy >= last.entropy);
            assert!(now.fracture >= last.fracture);
            assert!((0.0..=1.0).contains(&now.turbulence));
            last = now;
        }
    }

    #[test]
    fn metrics_feed_particle_velocity() {
        let calm = ChaosMetrics::default();
        let wild = ChaosMetrics {
            entropy: 0.5,
            turbulence: 0.8,
            fracture: 0.3,
        };
        assert_eq!(calm.velocity_scale(), 1.0);
        assert!(wild.velocity_scale() > 3.0);
    }

    #[test]
    fn fracture_reveals_fragments_once_each() {
        let (mut world, mut stage, sink) = loaded(QualityTier::High);
        let hit = AudioAnalysisFrame::from_energy(BandEnergy::flat(1.0), true);
        for _ in 0..40 {
            world.handle_audio_event(&mut stage, &hit);
        }
        assert_eq!(world.revealed_fragments(), 3);
        assert_eq!(sink.count("entropy.fracture"), 3);
        assert_eq!(stage.meshes().filter(|m| m.visible).count(), 4);
    }

    #[test]
    fn dispose_releases_the_noise_field() {
        let (mut world, mut stage, _sink) = loaded(QualityTier::High);
        let live = stage.resources().live_count();
        world.dispose_world(&mut stage);
        assert_eq!(stage.resources().live_count(), live - 1);
        stage.release_all();
        assert_eq!(stage.resources().live_count(), 0);
    }
}
