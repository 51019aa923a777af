use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::easing::Easing;

/// Limits applied to procedural camera motion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraConstraints {
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_height: f32,
    pub max_height: f32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            min_distance: 1.0,
            max_distance: 200.0,
            min_height: -50.0,
            max_height: 100.0,
        }
    }
}

impl CameraConstraints {
    /// Clamps `position` against these limits relative to `target`.
    pub fn clamp(&self, position: Vec3, target: Vec3) -> Vec3 {
        let offset = position - target;
        let distance = offset.length();
        let mut out = if distance > f32::EPSILON {
            target + offset * (distance.clamp(self.min_distance, self.max_distance) / distance)
        } else {
            target + Vec3::Z * self.min_distance
        };
        out.y = out.y.clamp(self.min_height, self.max_height);
        out
    }
}

/// Immutable camera pose. Builders return new values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub position: Vec3,
    pub target: Vec3,
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub constraints: Option<CameraConstraints>,
}

impl CameraConfig {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Self::default()
        }
    }

    pub fn with_fov(self, fov: f32) -> Self {
        Self { fov, ..self }
    }

    pub fn with_clip(self, near: f32, far: f32) -> Self {
        Self { near, far, ..self }
    }

    pub fn with_constraints(self, constraints: CameraConstraints) -> Self {
        Self {
            constraints: Some(constraints),
            ..self
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 10.0),
            target: Vec3::ZERO,
            fov: 60.0,
            near: 0.1,
            far: 1000.0,
            constraints: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    #[default]
    Static,
    Orbit,
    Track,
    Handheld,
    Dolly,
    Crane,
    Dutch,
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Static => "static",
            Self::Orbit => "orbit",
            Self::Track => "track",
            Self::Handheld => "handheld",
            Self::Dolly => "dolly",
            Self::Crane => "crane",
            Self::Dutch => "dutch",
        };
        f.write_str(name)
    }
}

/// A named camera mode plus the pose it heads for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub name: String,
    pub mode: CameraMode,
    pub config: CameraConfig,
    /// Transition length in seconds. `None` snaps instantly.
    pub duration: Option<f32>,
    pub easing: Easing,
    /// Extra time the shot is held after arriving, inside a sequence.
    pub hold: Option<f32>,
    pub audio_reactive: bool,
    /// Scales audio-driven cue and shake intensity.
    pub emotional_weight: f32,
}

impl Shot {
    pub fn new(name: impl Into<String>, mode: CameraMode, config: CameraConfig) -> Self {
        Self {
            name: name.into(),
            mode,
            config,
            duration: None,
            easing: Easing::default(),
            hold: None,
            audio_reactive: false,
            emotional_weight: 1.0,
        }
    }

    pub fn over(mut self, seconds: f32, easing: Easing) -> Self {
        self.duration = Some(seconds.max(0.0));
        self.easing = easing;
        self
    }

    pub fn hold(mut self, seconds: f32) -> Self {
        self.hold = Some(seconds.max(0.0));
        self
    }

    pub fn reactive(mut self, emotional_weight: f32) -> Self {
        self.audio_reactive = true;
        self.emotional_weight = emotional_weight.max(0.0);
        self
    }

    /// Total time the shot occupies inside a sequence, if bounded.
    pub fn span(&self) -> Option<f32> {
        match (self.duration, self.hold) {
            (None, None) => None,
            (duration, hold) => Some(duration.unwrap_or(0.0) + hold.unwrap_or(0.0)),
        }
    }
}

/// Condition that starts a sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Total audio energy at or above `threshold`, optionally on an onset frame.
    AudioEnergy { threshold: f32, require_onset: bool },
    /// An interaction carrying this tag.
    Interaction { tag: String },
    /// Scene time passes `after_secs`. Fires once.
    Elapsed { after_secs: f64 },
}

/// Ordered shots plus the triggers that start them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    pub shots: Vec<Shot>,
    pub triggers: Vec<Trigger>,
    /// Minimum spacing between two trigger-driven starts. Zero lets a
    /// running sequence restart on every match.
    pub cooldown_secs: f64,
}

impl Sequence {
    pub fn new(name: impl Into<String>, shots: Vec<Shot>) -> Self {
        Self {
            name: name.into(),
            shots,
            triggers: Vec::new(),
            cooldown_secs: 0.0,
        }
    }

    pub fn triggered_by(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn cooldown(mut self, seconds: f64) -> Self {
        self.cooldown_secs = seconds.max(0.0);
        self
    }
}

/// Mood presets shaping the camera's breathing and shake response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalPreset {
    #[default]
    Calm,
    Tense,
    Euphoric,
    Melancholic,
    Chaotic,
}

impl EmotionalPreset {
    pub fn breathing_amplitude(self) -> f32 {
        match self {
            Self::Calm => 0.05,
            Self::Tense => 0.02,
            Self::Euphoric => 0.08,
            Self::Melancholic => 0.04,
            Self::Chaotic => 0.1,
        }
    }

    /// Breathing cycles per second, in radians.
    pub fn breathing_rate(self) -> f32 {
        match self {
            Self::Calm => 0.8,
            Self::Tense => 1.6,
            Self::Euphoric => 1.2,
            Self::Melancholic => 0.5,
            Self::Chaotic => 2.5,
        }
    }

    pub fn shake_scale(self) -> f32 {
        match self {
            Self::Calm => 0.5,
            Self::Tense => 1.2,
            Self::Euphoric => 1.5,
            Self::Melancholic => 0.4,
            Self::Chaotic => 2.0,
        }
    }
}
