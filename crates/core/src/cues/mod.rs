//! Fire-and-forget cue dispatch (haptics, spatial audio cues).
//!
//! The runtime never waits on a cue and never learns whether it played.
//! Sinks that cannot honour a cue simply drop it.

use std::{fmt, sync::Arc};

use glam::Vec3;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CuePayload {
    Intensity(f32),
    Position(Vec3),
}

/// One-way collaborator interface. Implementations must not block or panic.
pub trait CueSink: Send + Sync {
    fn trigger(&self, cue: &str, payload: CuePayload);
}

/// Drops every cue.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCueSink;

impl CueSink for NullCueSink {
    fn trigger(&self, _cue: &str, _payload: CuePayload) {}
}

/// Logs cues at trace level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCueSink;

impl CueSink for TracingCueSink {
    fn trigger(&self, cue: &str, payload: CuePayload) {
        tracing::trace!(cue, ?payload, "cue");
    }
}

/// Keeps every cue it receives. Handy for hosts that batch cues per frame
/// and for tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingCueSink {
    received: Arc<Mutex<Vec<(String, CuePayload)>>>,
}

impl RecordingCueSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<(String, CuePayload)> {
        self.received.lock().clone()
    }

    pub fn count(&self, cue: &str) -> usize {
        self.received.lock().iter().filter(|(name, _)| name == cue).count()
    }

    pub fn clear(&self) {
        self.received.lock().clear();
    }
}

impl CueSink for RecordingCueSink {
    fn trigger(&self, cue: &str, payload: CuePayload) {
        self.received.lock().push((cue.to_string(), payload));
    }
}

/// Shared handle the scene and camera fire cues through.
#[derive(Clone)]
pub struct Cues {
    sink: Arc<dyn CueSink>,
    enabled: bool,
}

impl Cues {
    pub fn new(sink: Arc<dyn CueSink>) -> Self {
        Self {
            sink,
            enabled: true,
        }
    }

    pub fn silent() -> Self {
        Self::new(Arc::new(NullCueSink))
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn intensity(&self, cue: &str, intensity: f32) {
        if self.enabled {
            self.sink
                .trigger(cue, CuePayload::Intensity(intensity.clamp(0.0, 1.0)));
        }
    }

    pub fn at(&self, cue: &str, position: Vec3) {
        if self.enabled {
            self.sink.trigger(cue, CuePayload::Position(position));
        }
    }
}

impl Default for Cues {
    fn default() -> Self {
        Self::silent()
    }
}

impl fmt::Debug for Cues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cues").field("enabled", &self.enabled).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_collects_clamped_cues() {
        let sink = RecordingCueSink::new();
        let cues = Cues::new(Arc::new(sink.clone()));
        cues.intensity("haptic.pulse", 3.0);
        cues.at("audio.swell", Vec3::Y);

        let received = sink.received();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].1, CuePayload::Intensity(1.0));
        assert_eq!(sink.count("audio.swell"), 1);
    }

    #[test]
    fn disabled_cues_are_dropped() {
        let sink = RecordingCueSink::new();
        let mut cues = Cues::new(Arc::new(sink.clone()));
        cues.set_enabled(false);
        cues.intensity("haptic.pulse", 0.5);
        assert!(sink.received().is_empty());
    }
}
