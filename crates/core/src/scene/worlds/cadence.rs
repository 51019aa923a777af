//! Cadence: jittering particles that lock onto the beat.
//!
//! `Searching` until four onsets arrive at a steady interval, `Locked` while
//! the beat holds, `Surging` when locked onsets stay loud. Losing the beat
//! drops back to `Searching`.

use std::collections::VecDeque;
use std::f32::consts::TAU;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    camera::{CameraConfig, CameraMode, Easing, EmotionalPreset, Sequence, Shot},
    engine::WorldKind,
    scene::{
        AnimationMixer, InteractionEvent, InteractionKind, LightingDescription, LoadStatus,
        MeshDesc, MeshHandle, MovementArchetype, ParticleConfig, ParticleHandle, Stage, World,
    },
    AudioAnalysisFrame,
};

const INTERVAL_WINDOW: usize = 4;
/// Relative spread of onset intervals still counted as a steady beat.
const STABILITY_TOLERANCE: f32 = 0.12;
const SURGE_ENERGY: f32 = 0.75;
const SURGE_ONSETS: u32 = 3;
const SURGE_RELEASE_ENERGY: f32 = 0.5;
const SURGE_RELEASE_SECS: f32 = 2.0;
const BAR_COUNT: usize = 8;
/// Most recent beat states kept for inspection.
const TRANSITION_HISTORY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeatState {
    Searching,
    Locked,
    Surging,
}

impl BeatState {
    fn velocity_scale(self) -> f32 {
        match self {
            Self::Searching => 0.6,
            Self::Locked => 1.0,
            Self::Surging => 1.8,
        }
    }
}

#[derive(Debug)]
pub struct Cadence {
    loaded: bool,
    state: BeatState,
    last_onset: Option<f64>,
    intervals: VecDeque<f32>,
    loud_onsets: u32,
    quiet_for: f32,
    pulses: Option<ParticleHandle>,
    bars: Vec<MeshHandle>,
    transitions: VecDeque<BeatState>,
}

impl Default for Cadence {
    fn default() -> Self {
        Self::new()
    }
}

impl Cadence {
    pub fn new() -> Self {
        Self {
            loaded: false,
            state: BeatState::Searching,
            last_onset: None,
            intervals: VecDeque::with_capacity(INTERVAL_WINDOW),
            loud_onsets: 0,
            quiet_for: 0.0,
            pulses: None,
            bars: Vec::new(),
            transitions: VecDeque::with_capacity(TRANSITION_HISTORY),
        }
    }

    pub fn state(&self) -> BeatState {
        self.state
    }

    /// The latest states entered after the initial `Searching`, oldest first.
    pub fn transitions(&self) -> impl Iterator<Item = BeatState> + '_ {
        self.transitions.iter().copied()
    }

    /// Mean onset interval when the recent beat is steady.
    pub fn beat_interval(&self) -> Option<f32> {
        if self.intervals.len() < INTERVAL_WINDOW - 1 {
            return None;
        }
        let mean = self.intervals.iter().sum::<f32>() / self.intervals.len() as f32;
        if mean <= 0.0 {
            return None;
        }
        let spread = self
            .intervals
            .iter()
            .map(|i| (i - mean).abs())
            .fold(0.0f32, f32::max);
        (spread / mean <= STABILITY_TOLERANCE).then_some(mean)
    }

    fn enter(&mut self, stage: &mut Stage, state: BeatState) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "beat state");
        self.state = state;
        if self.transitions.len() == TRANSITION_HISTORY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(state);
        self.loud_onsets = 0;
        self.quiet_for = 0.0;
        let camera = stage.camera_mut();
        match state {
            BeatState::Searching => {
                camera.set_emotional_preset(EmotionalPreset::Calm);
                camera.start_sequence("search");
            }
            BeatState::Locked => {
                camera.set_emotional_preset(EmotionalPreset::Tense);
                camera.start_sequence("lock");
            }
            BeatState::Surging => {
                camera.set_emotional_preset(EmotionalPreset::Chaotic);
                camera.start_sequence("surge");
                stage.cues().intensity("cadence.surge", 1.0);
            }
        }
        if let Some(mixer) = stage.mixer_mut("metronome") {
            mixer.time_scale = state.velocity_scale();
        }
    }

    fn record_onset(&mut self, now: f64) {
        if let Some(last) = self.last_onset {
            let interval = (now - last) as f32;
            if interval > 0.0 {
                if self.intervals.len() == INTERVAL_WINDOW - 1 {
                    self.intervals.pop_front();
                }
                self.intervals.push_back(interval);
            }
        }
        self.last_onset = Some(now);
    }
}

impl World for Cadence {
    fn kind(&self) -> WorldKind {
        WorldKind::Cadence
    }

    fn initialize_world(&mut self, stage: &mut Stage) -> LoadStatus {
        if self.loaded {
            return LoadStatus::Ready;
        }
        let mut lights = LightingDescription::new(Vec3::new(0.2, 0.2, 0.3), 0.3)
            .sun(Vec3::new(0.2, -1.0, -0.4), Vec3::new(0.9, 0.95, 1.0), 0.7);
        for i in 0..4 {
            let angle = i as f32 / 4.0 * TAU;
            lights = lights.point(
                Vec3::new(angle.cos() * 8.0, 2.0, angle.sin() * 8.0),
                Vec3::new(0.3, 1.0, 0.8),
                1.0,
                14.0,
            );
        }
        stage.setup_lighting(lights);

        for i in 0..BAR_COUNT {
            let angle = i as f32 / BAR_COUNT as f32 * TAU;
            self.bars.push(stage.add_mesh(
                MeshDesc::new(format!("bar-{i}"), 12)
                    .at(Vec3::new(angle.cos() * 5.0, 0.0, angle.sin() * 5.0))
                    .scaled(1.5),
            ));
        }
        stage.add_mixer(AnimationMixer::new("metronome", Some(1.0)));

        self.pulses = Some(stage.create_particle_system(
            "pulses",
            ParticleConfig::new(4000, MovementArchetype::ErraticJitter)
                .at(Vec3::new(0.0, 1.0, 0.0), 6.0)
                .colored(Vec3::new(0.4, 1.0, 0.9), 0.05),
        ));

        let center = Vec3::new(0.0, 1.0, 0.0);
        let camera = stage.camera_mut();
        camera.start_shot(Shot::new(
            "overview",
            CameraMode::Static,
            CameraConfig::new(Vec3::new(0.0, 6.0, 14.0), center),
        ));
        camera.add_sequence(Sequence::new(
            "search",
            vec![Shot::new(
                "scan",
                CameraMode::Orbit,
                CameraConfig::new(Vec3::new(0.0, 6.0, 14.0), center),
            )
            .over(3.0, Easing::EaseInOutSine)],
        ));
        camera.add_sequence(Sequence::new(
            "lock",
            vec![Shot::new(
                "close",
                CameraMode::Handheld,
                CameraConfig::new(Vec3::new(2.0, 2.0, 8.0), center),
            )
            .over(1.0, Easing::EaseInOutCubic)
            .reactive(0.8)],
        ));
        camera.add_sequence(Sequence::new(
            "surge",
            vec![Shot::new(
                "tilt",
                CameraMode::Dutch,
                CameraConfig::new(Vec3::new(0.0, 1.5, 6.0), center).with_fov(78.0),
            )
            .over(0.6, Easing::EaseOutExpo)
            .reactive(1.4)],
        ));

        self.loaded = true;
        LoadStatus::Ready
    }

    fn update_world(&mut self, stage: &mut Stage, delta: f32, audio: Option<&AudioAnalysisFrame>) {
        let energy = audio.map(|a| a.energy.total).unwrap_or(0.0);
        let now = stage.elapsed();

        if self.state != BeatState::Searching {
            let lost = match (self.last_onset, self.beat_interval()) {
                (Some(last), Some(interval)) => now - last > f64::from(interval) * 2.0,
                _ => true,
            };
            if lost {
                self.intervals.clear();
                self.enter(stage, BeatState::Searching);
            }
        }

        if self.state == BeatState::Surging {
            if energy < SURGE_RELEASE_ENERGY {
                self.quiet_for += delta;
                if self.quiet_for >= SURGE_RELEASE_SECS {
                    self.enter(stage, BeatState::Locked);
                }
            } else {
                self.quiet_for = 0.0;
            }
        }

        if let Some(handle) = self.pulses {
            stage.step_particles(handle, delta, energy, self.state.velocity_scale());
        }
        let phase = stage.mixer("metronome").map(|m| m.phase()).unwrap_or(0.0);
        for (i, handle) in self.bars.iter().enumerate() {
            if let Some(bar) = stage.mesh_mut(*handle) {
                bar.rotation = (phase + i as f32 / BAR_COUNT as f32) * TAU;
            }
        }
    }

    fn handle_interaction(&mut self, stage: &mut Stage, event: &InteractionEvent) {
        if event.kind == InteractionKind::Click {
            // A tap counts as a manual beat.
            self.record_onset(stage.elapsed());
            stage.cues().intensity("cadence.tap", event.intensity.unwrap_or(0.5));
        }
    }

    fn handle_audio_event(&mut self, stage: &mut Stage, audio: &AudioAnalysisFrame) {
        if !audio.onset {
            return;
        }
        self.record_onset(stage.elapsed());
        let steady = self.beat_interval().is_some();
        match self.state {
            BeatState::Searching if steady => self.enter(stage, BeatState::Locked),
            BeatState::Locked if audio.energy.total >= SURGE_ENERGY => {
                self.loud_onsets += 1;
                if self.loud_onsets >= SURGE_ONSETS {
                    self.enter(stage, BeatState::Surging);
                }
            }
            BeatState::Locked => self.loud_onsets = 0,
            _ => {}
        }
    }

    fn dispose_world(&mut self, _stage: &mut Stage) {
        self.bars.clear();
        self.pulses = None;
    }

    fn status(&self) -> String {
        let bpm = self.beat_interval().map(|i| 60.0 / i);
        format!("beat={:?} bpm={:?}", self.state, bpm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scene::testing, BandEnergy, QualityTier};

    const STEP: f32 = 0.05;

    fn loaded() -> (Cadence, Stage, crate::cues::RecordingCueSink) {
        let (mut stage, _writer, sink) = testing::stage(WorldKind::Cadence, QualityTier::High);
        let mut world = Cadence::new();
        assert_eq!(world.initialize_world(&mut stage), LoadStatus::Ready);
        (world, stage, sink)
    }

    /// Plays `seconds` of audio with an onset every `beat` frames.
    fn play(world: &mut Cadence, stage: &mut Stage, seconds: f32, beat: usize, level: f32) {
        let frames = (seconds / STEP).round() as usize;
        for i in 0..frames {
            let onset = beat > 0 && i % beat == 0;
            let audio = AudioAnalysisFrame::from_energy(BandEnergy::flat(level), onset);
            stage.advance_clock(STEP);
            world.update_world(stage, STEP, Some(&audio));
            world.handle_audio_event(stage, &audio);
        }
    }

    #[test]
    fn steady_onsets_lock() {
        let (mut world, mut stage, _sink) = loaded();
        play(&mut world, &mut stage, 2.5, 10, 0.4);
        assert_eq!(world.state(), BeatState::Locked);
        let interval = world.beat_interval().unwrap_or(0.0);
        assert!((interval - 0.5).abs() < 0.01, "{interval}");
        assert_eq!(stage.camera().active_sequence(), Some("lock"));
    }

    #[test]
    fn loud_locked_beat_surges_then_settles() {
        let (mut world, mut stage, sink) = loaded();
        play(&mut world, &mut stage, 2.5, 10, 0.4);
        play(&mut world, &mut stage, 2.0, 10, 0.9);
        assert_eq!(world.state(), BeatState::Surging);
        assert_eq!(sink.count("cadence.surge"), 1);

        play(&mut world, &mut stage, 3.0, 10, 0.2);
        assert_eq!(world.state(), BeatState::Locked);
        assert_eq!(
            world.transitions().collect::<Vec<_>>(),
            [BeatState::Locked, BeatState::Surging, BeatState::Locked]
        );
    }

    #[test]
    fn silence_loses_the_beat() {
        let (mut world, mut stage, _sink) = loaded();
        play(&mut world, &mut stage, 2.5, 10, 0.4);
        play(&mut world, &mut stage, 1.5, 0, 0.0);
        assert_eq!(world.state(), BeatState::Searching);
        assert_eq!(stage.camera().emotional_preset(), EmotionalPreset::Calm);
    }

    #[test]
    fn irregular_onsets_never_lock() {
        let (mut world, mut stage, _sink) = loaded();
        let pattern = [3usize, 11, 5, 14, 4, 9, 13, 6];
        for gap in pattern {
            play(&mut world, &mut stage, gap as f32 * STEP, gap, 0.6);
        }
        assert_eq!(world.state(), BeatState::Searching);
        assert_eq!(world.transitions().count(), 0);
    }

    #[test]
    fn flapping_beat_keeps_bounded_history() {
        let (mut world, mut stage, _sink) = loaded();
        for _ in 0..12 {
            play(&mut world, &mut stage, 2.5, 10, 0.4);
            assert_eq!(world.state(), BeatState::Locked);
            play(&mut world, &mut stage, 1.5, 0, 0.0);
            assert_eq!(world.state(), BeatState::Searching);
        }
        let history: Vec<_> = world.transitions().collect();
        assert_eq!(history.len(), TRANSITION_HISTORY);
        assert_eq!(history.last(), Some(&BeatState::Searching));
    }
}
