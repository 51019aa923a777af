use std::collections::HashSet;
use std::f32::consts::TAU;
use std::fmt;

use glam::Vec3;
use tracing::{debug, warn};

use super::{
    easing::Easing,
    shot::{CameraConfig, CameraMode, EmotionalPreset, Sequence, Shot, Trigger},
    CameraRig,
};
use crate::{config::SceneConfig, cues::Cues, engine::backend::CameraView, AudioAnalysisFrame};

/// Runs once when a transition reaches its destination.
pub type TransitionCallback = Box<dyn FnOnce() + Send>;

struct Transition {
    from_position: Vec3,
    from_target: Vec3,
    from_fov: f32,
    to: CameraConfig,
    duration: f32,
    elapsed: f32,
    easing: Easing,
    progress: f32,
    on_complete: Option<TransitionCallback>,
}

impl Transition {
    /// Advances the clock and writes the interpolated pose into `rig`.
    /// Returns true once the destination is reached.
    fn step(&mut self, delta: f32, rig: &mut CameraRig) -> bool {
        self.elapsed += delta;
        let linear = (self.elapsed / self.duration).clamp(0.0, 1.0);
        self.progress = self.progress.max(linear);
        if self.progress >= 1.0 {
            rig.position = self.to.position;
            rig.target = self.to.target;
            rig.fov = self.to.fov;
            return true;
        }
        let eased = self.easing.apply(self.progress);
        rig.position = self.from_position.lerp(self.to.position, eased);
        rig.target = self.from_target.lerp(self.to.target, eased);
        rig.fov = self.from_fov + (self.to.fov - self.from_fov) * eased;
        false
    }
}

#[derive(Debug, Clone)]
struct ActiveSequence {
    index: usize,
    shot: usize,
    shot_elapsed: f32,
}

/// Geometry a mode orbits, sweeps or tracks around, captured from the shot.
#[derive(Debug, Clone, Copy)]
struct ModeAnchor {
    center: Vec3,
    radius: f32,
    height: f32,
    angle: f32,
}

impl ModeAnchor {
    fn from_config(config: &CameraConfig) -> Self {
        let offset = config.position - config.target;
        let radius = Vec3::new(offset.x, 0.0, offset.z).length().max(0.5);
        Self {
            center: config.target,
            radius,
            height: offset.y,
            angle: offset.z.atan2(offset.x),
        }
    }
}

/// Per-scene camera state machine: one mode, at most one active sequence
/// and at most one active transition.
pub struct CinematicController {
    rig: CameraRig,
    mode: CameraMode,
    shot: Option<Shot>,
    anchor: ModeAnchor,
    transition: Option<Transition>,
    sequences: Vec<Sequence>,
    active: Option<ActiveSequence>,
    pending: Option<usize>,
    last_started: Vec<Option<f64>>,
    fired_elapsed: HashSet<(usize, usize)>,
    pending_tags: Vec<String>,
    subject: Option<Vec3>,
    preset: EmotionalPreset,
    breathing: bool,
    shake: f32,
    shake_decay: f32,
    shake_epsilon: f32,
    time: f64,
    rng: fastrand::Rng,
    cues: Cues,
}

impl CinematicController {
    pub fn new(initial: CameraConfig, config: &SceneConfig, cues: Cues) -> Self {
        Self {
            rig: CameraRig::from_config(&initial),
            mode: CameraMode::Static,
            shot: None,
            anchor: ModeAnchor::from_config(&initial),
            transition: None,
            sequences: Vec::new(),
            active: None,
            pending: None,
            last_started: Vec::new(),
            fired_elapsed: HashSet::new(),
            pending_tags: Vec::new(),
            subject: None,
            preset: EmotionalPreset::default(),
            breathing: true,
            shake: 0.0,
            shake_decay: config.shake_decay.clamp(0.0, 0.999),
            shake_epsilon: config.shake_epsilon.max(f32::EPSILON),
            time: 0.0,
            rng: fastrand::Rng::with_seed(config.seed),
            cues,
        }
    }

    /// Registers a sequence. A later sequence with the same name replaces
    /// the earlier one.
    pub fn add_sequence(&mut self, sequence: Sequence) {
        match self.sequences.iter().position(|s| s.name == sequence.name) {
            Some(index) => self.sequences[index] = sequence,
            None => {
                self.sequences.push(sequence);
                self.last_started.push(None);
            }
        }
    }

    pub fn sequence_names(&self) -> impl Iterator<Item = &str> {
        self.sequences.iter().map(|s| s.name.as_str())
    }

    /// Starts the named sequence from its first shot. Unknown names are
    /// logged and ignored.
    pub fn start_sequence(&mut self, name: &str) -> bool {
        match self.sequences.iter().position(|s| s.name == name) {
            Some(index) => {
                self.begin_sequence(index);
                true
            }
            None => {
                warn!(sequence = name, "unknown camera sequence");
                false
            }
        }
    }

    pub fn stop_sequence(&mut self) {
        self.active = None;
        self.pending = None;
    }

    pub fn start_shot(&mut self, shot: Shot) {
        self.begin_shot(shot, None);
    }

    pub fn start_shot_with(&mut self, shot: Shot, on_complete: TransitionCallback) {
        self.begin_shot(shot, Some(on_complete));
    }

    /// Adds camera shake. Intensity is scaled by the emotional preset and
    /// never lowers shake already in progress.
    pub fn shake(&mut self, intensity: f32) {
        let scaled = intensity.clamp(0.0, 1.0) * self.preset.shake_scale();
        if scaled.is_finite() {
            self.shake = self.shake.max(scaled);
        }
    }

    pub fn set_emotional_preset(&mut self, preset: EmotionalPreset) {
        if self.preset != preset {
            debug!(?preset, "camera preset");
            self.preset = preset;
        }
    }

    pub fn set_breathing(&mut self, enabled: bool) {
        self.breathing = enabled;
    }

    /// Point the `track` mode follows.
    pub fn set_track_subject(&mut self, subject: Option<Vec3>) {
        self.subject = subject;
    }

    /// Queues an interaction tag for the next trigger evaluation.
    pub fn notify_interaction(&mut self, tag: impl Into<String>) {
        self.pending_tags.push(tag.into());
    }

    /// Advances the camera by one frame.
    ///
    /// Order: deferred sequence start, mode behavior (unless a transition
    /// owns the pose), transition, shake, breathing, sequence advancement,
    /// then trigger evaluation for the next frame.
    pub fn update(&mut self, delta: f32, frame: Option<&AudioAnalysisFrame>) {
        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        self.time += f64::from(delta);
        let energy = frame.map(|f| f.energy.total).unwrap_or(0.0);

        if let Some(index) = self.pending.take() {
            self.begin_sequence(index);
        }

        self.rig.offset = Vec3::ZERO;
        self.rig.roll = 0.0;

        if self.transition.is_none() {
            self.apply_mode(delta, energy);
        }
        self.step_transition(delta);
        self.apply_shake();
        self.apply_breathing();
        self.pulse_on_onset(frame);
        self.advance_sequence(delta);
        self.evaluate_triggers(frame);
    }

    pub fn rig(&self) -> &CameraRig {
        &self.rig
    }

    pub fn view(&self, aspect: f32) -> CameraView {
        self.rig.view(aspect)
    }

    pub fn mode(&self) -> CameraMode {
        self.mode
    }

    pub fn current_shot(&self) -> Option<&Shot> {
        self.shot.as_ref()
    }

    pub fn active_sequence(&self) -> Option<&str> {
        self.active
            .as_ref()
            .and_then(|a| self.sequences.get(a.index))
            .map(|s| s.name.as_str())
    }

    /// Sequence that will start at the beginning of the next frame.
    pub fn pending_sequence(&self) -> Option<&str> {
        self.pending
            .and_then(|i| self.sequences.get(i))
            .map(|s| s.name.as_str())
    }

    pub fn is_transitioning(&self) -> bool {
        self.transition.is_some()
    }

    pub fn transition_progress(&self) -> Option<f32> {
        self.transition.as_ref().map(|t| t.progress)
    }

    pub fn shake_intensity(&self) -> f32 {
        self.shake
    }

    pub fn emotional_preset(&self) -> EmotionalPreset {
        self.preset
    }

    fn begin_sequence(&mut self, index: usize) {
        let Some(sequence) = self.sequences.get(index) else {
            return;
        };
        debug!(sequence = %sequence.name, "camera sequence start");
        let first = sequence.shots.first().cloned();
        self.active = Some(ActiveSequence {
            index,
            shot: 0,
            shot_elapsed: 0.0,
        });
        if let Some(slot) = self.last_started.get_mut(index) {
            *slot = Some(self.time);
        }
        match first {
            Some(shot) => self.begin_shot(shot, None),
            None => self.active = None,
        }
    }

    fn begin_shot(&mut self, shot: Shot, on_complete: Option<TransitionCallback>) {
        self.mode = shot.mode;
        self.anchor = ModeAnchor::from_config(&shot.config);
        self.rig.near = shot.config.near;
        self.rig.far = shot.config.far;
        match shot.duration.filter(|d| *d > 0.0) {
            Some(duration) => {
                self.transition = Some(Transition {
                    from_position: self.rig.position,
                    from_target: self.rig.target,
                    from_fov: self.rig.fov,
                    to: shot.config,
                    duration,
                    elapsed: 0.0,
                    easing: shot.easing,
                    progress: 0.0,
                    on_complete,
                });
            }
            None => {
                self.transition = None;
                self.rig.position = shot.config.position;
                self.rig.target = shot.config.target;
                self.rig.fov = shot.config.fov;
                if let Some(callback) = on_complete {
                    callback();
                }
            }
        }
        self.shot = Some(shot);
    }

    fn step_transition(&mut self, delta: f32) {
        let Some(transition) = self.transition.as_mut() else {
            return;
        };
        if transition.step(delta, &mut self.rig) {
            let callback = transition.on_complete.take();
            self.transition = None;
            if let Some(callback) = callback {
                callback();
            }
        }
    }

    fn apply_mode(&mut self, delta: f32, energy: f32) {
        let t = self.time as f32;
        match self.mode {
            CameraMode::Static => {}
            CameraMode::Orbit => {
                let anchor = &mut self.anchor;
                anchor.angle = (anchor.angle + delta * (0.2 + energy * 0.3)) % TAU;
                let radius = anchor.radius * (1.0 + 0.08 * (t * 0.3).sin() + 0.1 * energy);
                let height = anchor.height + (t * 0.2).sin() * 0.5 + energy;
                self.rig.position = anchor.center
                    + Vec3::new(anchor.angle.cos() * radius, height, anchor.angle.sin() * radius);
                self.rig.target = anchor.center;
            }
            CameraMode::Track => {
                if let Some(subject) = self.subject {
                    let follow = (delta * 3.0).min(1.0);
                    let offset = self.rig.position - self.rig.target;
                    self.rig.target = self.rig.target.lerp(subject, follow);
                    self.rig.position = self.rig.target + offset;
                }
            }
            CameraMode::Handheld => {
                let amplitude = 0.02 + energy * 0.1;
                let frequency = 1.0 + energy * 4.0;
                self.rig.offset += Vec3::new(
                    (t * frequency * 1.3).sin(),
                    (t * frequency * 1.7).cos(),
                    (t * frequency * 0.9).sin(),
                ) * amplitude;
                if self.rng.f32() < energy * 0.3 {
                    let jitter = self.jitter();
                    self.rig.offset += jitter * amplitude;
                }
            }
            CameraMode::Crane => {
                let anchor = self.anchor;
                let goal = anchor.center.y + energy * 5.0;
                let ease = (delta * 1.5).min(1.0);
                self.rig.target.y += (goal - self.rig.target.y) * ease;
                let sweep = anchor.angle + (t * 0.1).sin() * 0.6;
                self.rig.position.x = anchor.center.x + sweep.cos() * anchor.radius;
                self.rig.position.z = anchor.center.z + sweep.sin() * anchor.radius;
                self.rig.position.y += (anchor.center.y + anchor.height + energy * 3.0
                    - self.rig.position.y)
                    * ease;
            }
            CameraMode::Dolly => {
                let stop = self
                    .shot
                    .as_ref()
                    .and_then(|s| s.config.constraints)
                    .map(|c| c.min_distance)
                    .unwrap_or(1.0);
                let distance = self.rig.position.distance(self.rig.target);
                let travel = ((0.1 + energy * 2.0) * delta).min((distance - stop).max(0.0));
                self.rig.position += self.rig.forward() * travel;
            }
            CameraMode::Dutch => {
                self.rig.roll += (t * 0.5).sin() * energy * 0.3;
            }
        }

        if let Some(constraints) = self.shot.as_ref().and_then(|s| s.config.constraints) {
            self.rig.position = constraints.clamp(self.rig.position, self.rig.target);
        }
    }

    fn apply_shake(&mut self) {
        if self.shake <= 0.0 {
            return;
        }
        let jitter = self.jitter();
        self.rig.offset += jitter * self.shake;
        self.shake *= self.shake_decay;
        if self.shake < self.shake_epsilon {
            self.shake = 0.0;
        }
    }

    fn apply_breathing(&mut self) {
        if !self.breathing {
            return;
        }
        let phase = self.time as f32 * self.preset.breathing_rate();
        let amplitude = self.preset.breathing_amplitude();
        self.rig.offset.y += phase.sin() * amplitude;
        self.rig.roll += (phase * 0.5).sin() * amplitude * 0.1;
    }

    fn pulse_on_onset(&mut self, frame: Option<&AudioAnalysisFrame>) {
        let Some(frame) = frame.filter(|f| f.onset) else {
            return;
        };
        let Some(weight) = self
            .shot
            .as_ref()
            .filter(|s| s.audio_reactive)
            .map(|s| s.emotional_weight)
        else {
            return;
        };
        let intensity = frame.energy.total * weight;
        self.cues.intensity("camera.pulse", intensity);
        self.shake(intensity * 0.2);
    }

    fn advance_sequence(&mut self, delta: f32) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(sequence) = self.sequences.get(active.index) else {
            self.active = None;
            return;
        };
        active.shot_elapsed += delta;
        let Some(span) = sequence.shots.get(active.shot).and_then(Shot::span) else {
            return;
        };
        if active.shot_elapsed < span {
            return;
        }
        active.shot += 1;
        active.shot_elapsed = 0.0;
        match sequence.shots.get(active.shot).cloned() {
            Some(next) => self.begin_shot(next, None),
            None => {
                debug!(sequence = %sequence.name, "camera sequence finished");
                self.active = None;
            }
        }
    }

    fn evaluate_triggers(&mut self, frame: Option<&AudioAnalysisFrame>) {
        let tags = std::mem::take(&mut self.pending_tags);
        if self.pending.is_some() {
            return;
        }
        for (index, sequence) in self.sequences.iter().enumerate() {
            let hit = sequence.triggers.iter().enumerate().find(|(trigger_index, trigger)| {
                match trigger {
                    Trigger::AudioEnergy {
                        threshold,
                        require_onset,
                    } => frame.is_some_and(|f| {
                        f.energy.total >= *threshold && (!require_onset || f.onset)
                    }),
                    Trigger::Interaction { tag } => tags.iter().any(|t| t == tag),
                    Trigger::Elapsed { after_secs } => {
                        self.time >= *after_secs
                            && !self.fired_elapsed.contains(&(index, *trigger_index))
                    }
                }
            });
            let Some((trigger_index, trigger)) = hit else {
                continue;
            };
            // The first match owns this frame, even while it is cooling down.
            let cooled = match self.last_started.get(index).copied().flatten() {
                Some(at) => self.time - at >= sequence.cooldown_secs,
                None => true,
            };
            if !cooled {
                return;
            }
            if matches!(trigger, Trigger::Elapsed { .. }) {
                self.fired_elapsed.insert((index, trigger_index));
            }
            self.pending = Some(index);
            return;
        }
    }

    fn jitter(&mut self) -> Vec3 {
        Vec3::new(
            self.rng.f32() * 2.0 - 1.0,
            self.rng.f32() * 2.0 - 1.0,
            self.rng.f32() * 2.0 - 1.0,
        )
    }
}

impl fmt::Debug for CinematicController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CinematicController")
            .field("mode", &self.mode)
            .field("rig", &self.rig)
            .field("active_sequence", &self.active_sequence())
            .field("transitioning", &self.is_transitioning())
            .field("shake", &self.shake)
            .field("preset", &self.preset)
            .finish()
    }
}
