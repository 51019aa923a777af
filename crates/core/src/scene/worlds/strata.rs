//! Strata: rising particle columns, one per genre layer.
//!
//! Layers unlock in order, either on a timer or after sustained bass. Each
//! unlock breaks through a threshold exactly once: a cue, a camera shake and
//! the `break` sequence.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    camera::{CameraConfig, CameraMode, Easing, EmotionalPreset, Sequence, Shot},
    engine::WorldKind,
    scene::{
        InteractionEvent, InteractionKind, LightingDescription, LoadStatus, MeshDesc, MeshHandle,
        MovementArchetype, ParticleConfig, ParticleHandle, Stage, World,
    },
    AudioAnalysisFrame,
};

const LAYER_SECS: f64 = 20.0;
const BASS_THRESHOLD: f32 = 0.7;
const SUSTAINED_BASS_SECS: f32 = 2.0;
const LAYER_HEIGHT: f32 = 6.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenreLayer {
    Ambient,
    Downtempo,
    House,
    Techno,
    DrumAndBass,
}

impl GenreLayer {
    pub const ALL: [GenreLayer; 5] = [
        Self::Ambient,
        Self::Downtempo,
        Self::House,
        Self::Techno,
        Self::DrumAndBass,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Ambient => "ambient",
            Self::Downtempo => "downtempo",
            Self::House => "house",
            Self::Techno => "techno",
            Self::DrumAndBass => "drum_and_bass",
        }
    }

    fn color(self) -> Vec3 {
        match self {
            Self::Ambient => Vec3::new(0.4, 0.7, 1.0),
            Self::Downtempo => Vec3::new(0.5, 1.0, 0.7),
            Self::House => Vec3::new(1.0, 0.8, 0.3),
            Self::Techno => Vec3::new(1.0, 0.3, 0.5),
            Self::DrumAndBass => Vec3::new(0.9, 0.9, 1.0),
        }
    }

    fn next(self) -> Option<Self> {
        Self::ALL.get(self as usize + 1).copied()
    }
}

#[derive(Debug)]
struct LayerBank {
    layer: GenreLayer,
    emitter: ParticleHandle,
    slab: MeshHandle,
}

#[derive(Debug)]
pub struct Strata {
    loaded: bool,
    current: GenreLayer,
    unlocked_at: f64,
    timer_bonus: f64,
    bass_held: f32,
    banks: Vec<LayerBank>,
    breaks: Vec<GenreLayer>,
}

impl Default for Strata {
    fn default() -> Self {
        Self::new()
    }
}

impl Strata {
    pub fn new() -> Self {
        Self {
            loaded: false,
            current: GenreLayer::Ambient,
            unlocked_at: 0.0,
            timer_bonus: 0.0,
            bass_held: 0.0,
            banks: Vec::new(),
            breaks: Vec::new(),
        }
    }

    pub fn current_layer(&self) -> GenreLayer {
        self.current
    }

    /// Layers that have broken through, in unlock order.
    pub fn breaks(&self) -> &[GenreLayer] {
        &self.breaks
    }

    fn unlock_next(&mut self, stage: &mut Stage, reason: &'static str) {
        let Some(next) = self.current.next() else {
            return;
        };
        self.current = next;
        self.unlocked_at = stage.elapsed();
        self.timer_bonus = 0.0;
        self.bass_held = 0.0;

        for bank in self.banks.iter().filter(|b| b.layer == next) {
            if let Some(emitter) = stage.particles_mut(bank.emitter) {
                emitter.set_enabled(true);
            }
            if let Some(slab) = stage.mesh_mut(bank.slab) {
                slab.visible = true;
            }
        }

        if !self.breaks.contains(&next) {
            self.breaks.push(next);
            let intensity = 0.5 + next as u8 as f32 * 0.1;
            stage.cues().intensity("strata.threshold_break", intensity);
            let camera = stage.camera_mut();
            camera.shake(0.8);
            camera.start_sequence("break");
            info!(layer = next.name(), reason, "threshold break");
        }
    }
}

impl World for Strata {
    fn kind(&self) -> WorldKind {
        WorldKind::Strata
    }

    fn initialize_world(&mut self, stage: &mut Stage) -> LoadStatus {
        if self.loaded {
            return LoadStatus::Ready;
        }
        stage.setup_lighting(
            LightingDescription::new(Vec3::new(0.3, 0.35, 0.5), 0.4)
                .sun(Vec3::new(0.0, -1.0, 0.0), Vec3::ONE, 0.6)
                .point(Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.4, 0.7, 1.0), 1.5, 30.0),
        );

        for layer in GenreLayer::ALL {
            let height = layer as u8 as f32 * LAYER_HEIGHT;
            let emitter = stage.create_particle_system(
                layer.name(),
                ParticleConfig::new(1600, MovementArchetype::AntiGravityRise)
                    .at(Vec3::new(0.0, height, 0.0), 5.0)
                    .colored(layer.color(), 0.08),
            );
            let slab = stage.add_mesh(
                MeshDesc::new(format!("slab-{}", layer.name()), 12)
                    .at(Vec3::new(0.0, height - LAYER_HEIGHT / 2.0, 0.0))
                    .scaled(8.0)
                    .without_shadow(),
            );
            let unlocked = layer == GenreLayer::Ambient;
            if let Some(system) = stage.particles_mut(emitter) {
                system.set_enabled(unlocked);
            }
            if let Some(mesh) = stage.mesh_mut(slab) {
                mesh.visible = unlocked;
            }
            self.banks.push(LayerBank {
                layer,
                emitter,
                slab,
            });
        }

        let base = CameraConfig::new(Vec3::new(0.0, 2.0, 16.0), Vec3::new(0.0, 3.0, 0.0));
        let camera = stage.camera_mut();
        camera.set_emotional_preset(EmotionalPreset::Tense);
        camera.start_shot(Shot::new("ground", CameraMode::Crane, base));
        camera.add_sequence(Sequence::new(
            "break",
            vec![
                Shot::new(
                    "punch",
                    CameraMode::Dutch,
                    CameraConfig::new(Vec3::new(0.0, 4.0, 10.0), Vec3::new(0.0, 8.0, 0.0)).with_fov(75.0),
                )
                .over(1.2, Easing::EaseOutExpo)
                .hold(1.5)
                .reactive(1.2),
                Shot::new("settle", CameraMode::Crane, base).over(3.0, Easing::EaseInOutCubic),
            ],
        ));

        self.unlocked_at = stage.elapsed();
        self.loaded = true;
        LoadStatus::Ready
    }

    fn update_world(&mut self, stage: &mut Stage, delta: f32, audio: Option<&AudioAnalysisFrame>) {
        let energy = audio.map(|a| a.energy.total).unwrap_or(0.0);
        let now = stage.elapsed();

        if now - self.unlocked_at + self.timer_bonus >= LAYER_SECS {
            self.unlock_next(stage, "time");
        } else if self.bass_held >= SUSTAINED_BASS_SECS {
            self.unlock_next(stage, "bass");
        }

        let depth = self.current as u8 as f32;
        for bank in self.banks.iter().filter(|b| b.layer <= self.current) {
            let lift = 1.0 + (depth - bank.layer as u8 as f32) * 0.1 + depth * 0.15;
            stage.step_particles(bank.emitter, delta, energy, lift);
        }

        let camera_height = 3.0 + depth * LAYER_HEIGHT * 0.5;
        stage.camera_mut().set_track_subject(Some(Vec3::new(0.0, camera_height, 0.0)));
    }

    fn handle_interaction(&mut self, stage: &mut Stage, event: &InteractionEvent) {
        match event.kind {
            InteractionKind::Scroll => {
                self.timer_bonus += f64::from(event.intensity.unwrap_or(0.5).clamp(0.0, 1.0)) * 2.0;
            }
            InteractionKind::Click => {
                stage.camera_mut().shake(0.3);
            }
            _ => {}
        }
    }

    fn handle_audio_event(&mut self, stage: &mut Stage, audio: &AudioAnalysisFrame) {
        if audio.energy.bass >= BASS_THRESHOLD {
            self.bass_held += stage.delta();
        } else {
            self.bass_held = 0.0;
        }
    }

    fn dispose_world(&mut self, _stage: &mut Stage) {
        self.banks.clear();
    }

    fn status(&self) -> String {
        format!("layer={} breaks={}", self.current.name(), self.breaks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scene::testing, BandEnergy, QualityTier};

    fn loaded() -> (Strata, Stage, crate::cues::RecordingCueSink) {
        let (mut stage, _writer, sink) = testing::stage(WorldKind::Strata, QualityTier::High);
        let mut world = Strata::new();
        assert_eq!(world.initialize_world(&mut stage), LoadStatus::Ready);
        (world, stage, sink)
    }

    fn frame(stage: &mut Stage, world: &mut Strata, audio: Option<&AudioAnalysisFrame>) {
        stage.advance_clock(0.1);
        world.update_world(stage, 0.1, audio);
        if let Some(audio) = audio {
            world.handle_audio_event(stage, audio);
        }
    }

    fn enabled_emitters(stage: &Stage) -> usize {
        stage.particle_systems().filter(|p| p.is_enabled()).count()
    }

    #[test]
    fn starts_with_one_open_layer() {
        let (world, stage, _sink) = loaded();
        assert_eq!(world.current_layer(), GenreLayer::Ambient);
        assert_eq!(enabled_emitters(&stage), 1);
        assert_eq!(stage.particle_systems().count(), 5);
        assert_eq!(stage.shadow_map_size(), 0);
    }

    #[test]
    fn time_unlocks_layers_in_order_and_breaks_once_each() {
        let (mut world, mut stage, sink) = loaded();
        for _ in 0..1200 {
            frame(&mut stage, &mut world, None);
        }
        assert_eq!(world.current_layer(), GenreLayer::DrumAndBass);
        assert_eq!(
            world.breaks(),
            &[
                GenreLayer::Downtempo,
                GenreLayer::House,
                GenreLayer::Techno,
                GenreLayer::DrumAndBass
            ]
        );
        assert_eq!(sink.count("strata.threshold_break"), 4);
        assert_eq!(enabled_emitters(&stage), 5);
    }

    #[test]
    fn sustained_bass_unlocks_early() {
        let (mut world, mut stage, sink) = loaded();
        let heavy = AudioAnalysisFrame::from_energy(BandEnergy::new(0.9, 0.3, 0.2, 0.6), false);
        for _ in 0..25 {
            frame(&mut stage, &mut world, Some(&heavy));
        }
        assert_eq!(world.current_layer(), GenreLayer::Downtempo);
        assert_eq!(sink.count("strata.threshold_break"), 1);
        assert_eq!(stage.camera().active_sequence(), Some("break"));
        assert!(stage.camera().shake_intensity() > 0.0);
    }

    #[test]
    fn broken_bass_resets_the_hold() {
        let (mut world, mut stage, _sink) = loaded();
        let heavy = AudioAnalysisFrame::from_energy(BandEnergy::new(0.9, 0.3, 0.2, 0.6), false);
        let light = AudioAnalysisFrame::from_energy(BandEnergy::new(0.2, 0.3, 0.2, 0.2), false);
        for i in 0..60 {
            let audio = if i % 15 == 14 { &light } else { &heavy };
            frame(&mut stage, &mut world, Some(audio));
        }
        assert_eq!(world.current_layer(), GenreLayer::Ambient);
    }

    #[test]
    fn last_layer_is_terminal() {
        let (mut world, mut stage, sink) = loaded();
        for _ in 0..4000 {
            frame(&mut stage, &mut world, None);
        }
        assert_eq!(world.current_layer(), GenreLayer::DrumAndBass);
        assert_eq!(sink.count("strata.threshold_break"), 4);
    }
}
