use serde::{Deserialize, Serialize};

/// Per-band energy, every value normalised to `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandEnergy {
    pub bass: f32,
    pub mid: f32,
    pub high: f32,
    pub total: f32,
}

impl BandEnergy {
    pub fn new(bass: f32, mid: f32, high: f32, total: f32) -> Self {
        Self {
            bass: clamp_unit(bass),
            mid: clamp_unit(mid),
            high: clamp_unit(high),
            total: clamp_unit(total),
        }
    }

    /// Uniform energy across every band.
    pub fn flat(level: f32) -> Self {
        Self::new(level, level, level, level)
    }
}

/// One tick worth of audio features, produced by an analyzer and handed to
/// the scene. Frames are consumed and dropped; nothing keeps them around.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioAnalysisFrame {
    /// Magnitude per frequency bin, normalised to `[0, 1]`.
    pub frequency_bins: Vec<f32>,
    pub time_domain: Vec<f32>,
    pub tempo_bpm: Option<f32>,
    pub energy: BandEnergy,
    /// Single-frame pulse raised on a detected attack.
    pub onset: bool,
    pub pitch_hz: Option<f32>,
    pub rms: f32,
}

impl AudioAnalysisFrame {
    /// Builds a frame carrying only energy and onset data. Mostly useful for
    /// hosts that run their own analysis and for tests.
    pub fn from_energy(energy: BandEnergy, onset: bool) -> Self {
        Self {
            energy: BandEnergy::new(energy.bass, energy.mid, energy.high, energy.total),
            onset,
            rms: energy.total,
            ..Default::default()
        }
    }

    /// A frame with no signal at all.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Re-applies the `[0, 1]` clamp to every normalised field. Frames coming
    /// from outside the crate go through this before the scene sees them.
    pub fn sanitized(mut self) -> Self {
        self.energy = BandEnergy::new(
            self.energy.bass,
            self.energy.mid,
            self.energy.high,
            self.energy.total,
        );
        self.rms = self.rms.max(0.0);
        for bin in &mut self.frequency_bins {
            *bin = clamp_unit(*bin);
        }
        self
    }
}

/// Tracks whether audio analysis may run. Browsers and most desktop audio
/// stacks only let playback start after a user gesture; before that every
/// start attempt fails soft.
#[derive(Debug, Clone, Default)]
pub struct AudioGate {
    gesture_seen: bool,
    running: bool,
}

impl AudioGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a user gesture, allowing a later [`AudioGate::try_start`].
    pub fn register_gesture(&mut self) {
        self.gesture_seen = true;
    }

    /// Attempts to start analysis. Returns `false` without side effects when no
    /// gesture has been seen yet.
    pub fn try_start(&mut self) -> bool {
        if !self.gesture_seen {
            tracing::debug!("audio start requested before any user gesture; skipping");
            return false;
        }
        if !self.running {
            tracing::info!("audio analysis started");
        }
        self.running = true;
        true
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Passes the frame through only while analysis is running.
    pub fn admit(&self, frame: AudioAnalysisFrame) -> Option<AudioAnalysisFrame> {
        self.running.then(|| frame.sanitized())
    }
}

pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
