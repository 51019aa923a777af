//! Reverie: slow-drifting dream dust and a three-act mood arc.
//!
//! The arc only leaves the first act once a mood has been chosen (or the
//! visitor has idled long enough for a default) and enough time has passed.

use std::f32::consts::TAU;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    camera::{CameraConfig, CameraMode, Easing, EmotionalPreset, Sequence, Shot, Trigger},
    engine::WorldKind,
    scene::{
        AnimationMixer, InteractionEvent, InteractionKind, LightingDescription, LoadStatus,
        MeshDesc, MeshHandle, MovementArchetype, ParticleConfig, ParticleHandle, Stage, World,
    },
    AudioAnalysisFrame,
};

const AWAKENING_MIN_SECS: f64 = 15.0;
const DEFAULT_MOOD_SECS: f64 = 45.0;
const IMMERSION_SECS: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Act {
    Awakening,
    Immersion,
    Catharsis,
}

impl Act {
    fn sequence(self) -> &'static str {
        match self {
            Self::Awakening => "awakening",
            Self::Immersion => "immersion",
            Self::Catharsis => "catharsis",
        }
    }
}

/// Moods a visitor can pick with a gesture payload.
fn parse_mood(payload: &str) -> Option<EmotionalPreset> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "calm" => Some(EmotionalPreset::Calm),
        "melancholic" | "melancholy" => Some(EmotionalPreset::Melancholic),
        "euphoric" => Some(EmotionalPreset::Euphoric),
        "tense" => Some(EmotionalPreset::Tense),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct Reverie {
    loaded_stage: u8,
    act: Option<Act>,
    act_started: f64,
    mood: Option<EmotionalPreset>,
    dust: Option<ParticleHandle>,
    petals: Option<ParticleHandle>,
    monoliths: Vec<(MeshHandle, Vec3)>,
    blooms: u32,
}

impl Reverie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn act(&self) -> Act {
        self.act.unwrap_or(Act::Awakening)
    }

    pub fn mood(&self) -> Option<EmotionalPreset> {
        self.mood
    }

    pub fn blooms(&self) -> u32 {
        self.blooms
    }

    fn enter(&mut self, stage: &mut Stage, act: Act) {
        self.act = Some(act);
        self.act_started = stage.elapsed();
        let preset = match act {
            Act::Awakening => EmotionalPreset::Calm,
            Act::Immersion => self.mood.unwrap_or(EmotionalPreset::Calm),
            Act::Catharsis => match self.mood {
                Some(EmotionalPreset::Melancholic) => EmotionalPreset::Melancholic,
                _ => EmotionalPreset::Euphoric,
            },
        };
        let camera = stage.camera_mut();
        camera.set_emotional_preset(preset);
        camera.start_sequence(act.sequence());
        stage.cues().intensity("reverie.act", 0.4 + act as u8 as f32 * 0.3);
        info!(?act, ?preset, "reverie act");
    }

    fn next_act(&self, now: f64) -> Option<Act> {
        let in_act = now - self.act_started;
        match self.act() {
            Act::Awakening if self.mood.is_some() && now >= AWAKENING_MIN_SECS => {
                Some(Act::Immersion)
            }
            Act::Immersion if in_act >= IMMERSION_SECS => Some(Act::Catharsis),
            _ => None,
        }
    }

    fn build_structure(&mut self, stage: &mut Stage) {
        stage.setup_lighting(
            LightingDescription::new(Vec3::new(0.55, 0.5, 0.8), 0.35)
                .sun(Vec3::new(-0.3, -1.0, -0.2), Vec3::new(1.0, 0.92, 0.85), 0.8)
                .point(Vec3::new(-6.0, 4.0, 0.0), Vec3::new(0.7, 0.5, 1.0), 1.2, 25.0)
                .point(Vec3::new(6.0, 3.0, -4.0), Vec3::new(1.0, 0.6, 0.8), 1.0, 25.0),
        );
        let floor = stage.add_mesh(MeshDesc::new("mist-floor", 2).scaled(40.0).static_mesh());
        stage.opt_out_of_pulse(floor);
        for i in 0..3 {
            let angle = i as f32 / 3.0 * TAU;
            let home = Vec3::new(angle.cos() * 7.0, 2.0 + i as f32, angle.sin() * 7.0);
            let handle = stage.add_mesh(MeshDesc::new(format!("monolith-{i}"), 480).at(home));
            self.monoliths.push((handle, home));
        }
        stage.add_mixer(AnimationMixer::new("float", Some(8.0)));
    }

    fn build_atmosphere(&mut self, stage: &mut Stage) {
        self.dust = Some(stage.create_particle_system(
            "dreamdust",
            ParticleConfig::new(3000, MovementArchetype::SlowDrift)
                .at(Vec3::new(0.0, 3.0, 0.0), 12.0)
                .colored(Vec3::new(0.8, 0.75, 1.0), 0.06),
        ));
        self.petals = Some(stage.create_particle_system(
            "petals",
            ParticleConfig::new(1500, MovementArchetype::SlowDrift)
                .at(Vec3::new(0.0, 6.0, 0.0), 9.0)
                .colored(Vec3::new(1.0, 0.7, 0.85), 0.12),
        ));

        let near = CameraConfig::new(Vec3::new(0.0, 2.0, 14.0), Vec3::new(0.0, 2.0, 0.0));
        let camera = stage.camera_mut();
        camera.start_shot(Shot::new("establish", CameraMode::Static, near));
        camera.add_sequence(Sequence::new(
            "awakening",
            vec![Shot::new("drift", CameraMode::Orbit, near).over(6.0, Easing::EaseInOutSine)],
        ));
        camera.add_sequence(Sequence::new(
            "immersion",
            vec![
                Shot::new(
                    "descend",
                    CameraMode::Crane,
                    CameraConfig::new(Vec3::new(4.0, 6.0, 9.0), Vec3::new(0.0, 2.0, 0.0)),
                )
                .over(5.0, Easing::EaseInOutCubic)
                .hold(4.0),
                Shot::new(
                    "float",
                    CameraMode::Orbit,
                    CameraConfig::new(Vec3::new(0.0, 3.0, 10.0), Vec3::new(0.0, 2.5, 0.0)),
                )
                .over(4.0, Easing::EaseInOutSine)
                .reactive(0.6),
            ],
        ));
        camera.add_sequence(Sequence::new(
            "catharsis",
            vec![Shot::new(
                "release",
                CameraMode::Handheld,
                CameraConfig::new(Vec3::new(0.0, 1.5, 6.0), Vec3::new(0.0, 3.0, 0.0)).with_fov(72.0),
            )
            .over(3.0, Easing::EaseOutExpo)
            .reactive(1.0)],
        ));
        camera.add_sequence(
            Sequence::new(
                "swell",
                vec![Shot::new(
                    "swell",
                    CameraMode::Dolly,
                    CameraConfig::new(Vec3::new(0.0, 2.5, 9.0), Vec3::new(0.0, 2.5, 0.0)),
                )
                .over(2.5, Easing::EaseInOutCubic)
                .reactive(0.8)],
            )
            .triggered_by(Trigger::AudioEnergy {
                threshold: 0.85,
                require_onset: true,
            })
            .cooldown(12.0),
        );
    }
}

impl World for Reverie {
    fn kind(&self) -> WorldKind {
        WorldKind::Reverie
    }

    fn initialize_world(&mut self, stage: &mut Stage) -> LoadStatus {
        match self.loaded_stage {
            0 => {
                self.build_structure(stage);
                self.loaded_stage = 1;
                LoadStatus::Pending
            }
            1 => {
                self.build_atmosphere(stage);
                self.loaded_stage = 2;
                self.enter(stage, Act::Awakening);
                LoadStatus::Ready
            }
            _ => LoadStatus::Ready,
        }
    }

    fn update_world(&mut self, stage: &mut Stage, delta: f32, audio: Option<&AudioAnalysisFrame>) {
        let energy = audio.map(|a| a.energy.total).unwrap_or(0.0);
        let now = stage.elapsed();

        if self.mood.is_none() && now >= DEFAULT_MOOD_SECS {
            self.mood = Some(EmotionalPreset::Calm);
        }
        if let Some(act) = self.next_act(now) {
            self.enter(stage, act);
        }

        let calm = match self.act() {
            Act::Awakening => 0.6,
            Act::Immersion => 1.0,
            Act::Catharsis => 1.4,
        };
        for handle in [self.dust, self.petals].into_iter().flatten() {
            stage.step_particles(handle, delta, energy, calm);
        }

        let phase = stage.mixer("float").map(|m| m.phase()).unwrap_or(0.0);
        for (i, (handle, home)) in self.monoliths.iter().enumerate() {
            if let Some(mesh) = stage.mesh_mut(*handle) {
                let offset = (phase * TAU + i as f32 * 2.1).sin() * 0.5;
                mesh.position = *home + Vec3::Y * offset;
                mesh.rotation = (mesh.rotation + delta * 0.05).rem_euclid(TAU);
            }
        }
    }

    fn handle_interaction(&mut self, stage: &mut Stage, event: &InteractionEvent) {
        match event.kind {
            InteractionKind::Gesture => {
                if let Some(mood) = event.payload.as_deref().and_then(parse_mood) {
                    self.mood = Some(mood);
                    if self.act() == Act::Immersion {
                        stage.camera_mut().set_emotional_preset(mood);
                    }
                }
            }
            InteractionKind::Click => {
                if let Some(position) = event.world_position {
                    stage.cues().at("reverie.chime", position);
                }
                stage.camera_mut().shake(event.intensity.unwrap_or(0.2));
            }
            _ => {}
        }
    }

    fn handle_audio_event(&mut self, stage: &mut Stage, audio: &AudioAnalysisFrame) {
        if audio.onset && self.act() == Act::Catharsis {
            self.blooms += 1;
            stage.cues().intensity("reverie.bloom", audio.energy.total);
            if let Some(petals) = self.petals.and_then(|h| stage.particles_mut(h)) {
                for size in petals.sizes_mut() {
                    *size = 0.12 * (1.0 + audio.energy.total);
                }
            }
        }
    }

    fn dispose_world(&mut self, _stage: &mut Stage) {
        self.dust = None;
        self.petals = None;
        self.monoliths.clear();
    }

    fn status(&self) -> String {
        format!("act={:?} mood={:?} blooms={}", self.act(), self.mood, self.blooms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scene::testing, BandEnergy, QualityTier};

    fn loaded() -> (Reverie, Stage, crate::cues::RecordingCueSink) {
        let (mut stage, _writer, sink) = testing::stage(WorldKind::Reverie, QualityTier::High);
        let mut world = Reverie::new();
        assert_eq!(world.initialize_world(&mut stage), LoadStatus::Pending);
        assert_eq!(world.initialize_world(&mut stage), LoadStatus::Ready);
        (world, stage, sink)
    }

    fn run(world: &mut Reverie, stage: &mut Stage, seconds: f32) {
        let frames = (seconds * 10.0).round() as usize;
        for _ in 0..frames {
            stage.advance_clock(0.1);
            world.update_world(stage, 0.1, None);
        }
    }

    #[test]
    fn waits_for_a_mood_before_immersion() {
        let (mut world, mut stage, _sink) = loaded();
        run(&mut world, &mut stage, 20.0);
        assert_eq!(world.act(), Act::Awakening);

        world.handle_interaction(
            &mut stage,
            &InteractionEvent::new(InteractionKind::Gesture).with_payload("melancholic"),
        );
        run(&mut world, &mut stage, 0.2);
        assert_eq!(world.act(), Act::Immersion);
        assert_eq!(stage.camera().emotional_preset(), EmotionalPreset::Melancholic);
        assert_eq!(stage.camera().active_sequence(), Some("immersion"));
    }

    #[test]
    fn idle_visitor_gets_default_mood_and_reaches_catharsis() {
        let (mut world, mut stage, sink) = loaded();
        run(&mut world, &mut stage, 46.0);
        assert_eq!(world.mood(), Some(EmotionalPreset::Calm));
        assert_eq!(world.act(), Act::Immersion);

        run(&mut world, &mut stage, 31.0);
        assert_eq!(world.act(), Act::Catharsis);
        assert_eq!(stage.camera().emotional_preset(), EmotionalPreset::Euphoric);
        assert_eq!(sink.count("reverie.act"), 3);
    }

    #[test]
    fn acts_never_go_backwards() {
        let (mut world, mut stage, _sink) = loaded();
        world.handle_interaction(
            &mut stage,
            &InteractionEvent::new(InteractionKind::Gesture).with_payload("euphoric"),
        );
        let mut last = world.act();
        for _ in 0..800 {
            run(&mut world, &mut stage, 0.1);
            assert!(world.act() >= last);
            last = world.act();
        }
        assert_eq!(last, Act::Catharsis);
    }

    #[test]
    fn onsets_bloom_only_in_catharsis() {
        let (mut world, mut stage, sink) = loaded();
        let hit = AudioAnalysisFrame::from_energy(BandEnergy::flat(0.9), true);
        world.handle_audio_event(&mut stage, &hit);
        assert_eq!(world.blooms(), 0);

        world.handle_interaction(
            &mut stage,
            &InteractionEvent::new(InteractionKind::Gesture).with_payload("calm"),
        );
        run(&mut world, &mut stage, 50.0);
        assert_eq!(world.act(), Act::Catharsis);
        world.handle_audio_event(&mut stage, &hit);
        assert_eq!(world.blooms(), 1);
        assert_eq!(sink.count("reverie.bloom"), 1);
    }

    #[test]
    fn unknown_mood_payload_is_ignored() {
        let (mut world, mut stage, _sink) = loaded();
        world.handle_interaction(
            &mut stage,
            &InteractionEvent::new(InteractionKind::Gesture).with_payload("furious"),
        );
        assert_eq!(world.mood(), None);
    }
}
