use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::backend::RenderCounters;

const BYTES_PER_MB: f32 = 1024.0 * 1024.0;

/// Live snapshot republished by the engine after every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub timestamp: f64,
    pub fps: f32,
    /// Rolling average over the telemetry window, in milliseconds.
    pub frame_time_ms: f32,
    pub memory_bytes: u64,
    pub draw_calls: u32,
    pub triangles: u64,
    pub geometries: u32,
    pub textures: u32,
}

impl PerformanceMetrics {
    pub fn memory_mb(&self) -> f32 {
        self.memory_bytes as f32 / BYTES_PER_MB
    }
}

/// Rolling frame-time window plus a once-per-second FPS counter.
#[derive(Debug, Clone)]
pub struct FrameTelemetry {
    durations_ms: VecDeque<f32>,
    capacity: usize,
    last_frame: Option<f64>,
    fps_window_start: Option<f64>,
    frames_in_window: u32,
    fps: f32,
    metrics: PerformanceMetrics,
}

impl FrameTelemetry {
    /// `seed_fps` is reported until the first full second has been measured.
    pub fn new(capacity: usize, seed_fps: f32) -> Self {
        let capacity = capacity.max(1);
        Self {
            durations_ms: VecDeque::with_capacity(capacity),
            capacity,
            last_frame: None,
            fps_window_start: None,
            frames_in_window: 0,
            fps: seed_fps,
            metrics: PerformanceMetrics {
                fps: seed_fps,
                ..Default::default()
            },
        }
    }

    /// Records a frame boundary at `now` (seconds). Returns `true` when the
    /// FPS figure was recomputed on this frame.
    pub fn record_frame(&mut self, now: f64) -> bool {
        if let Some(last) = self.last_frame {
            let delta_ms = ((now - last).max(0.0) * 1000.0) as f32;
            if self.durations_ms.len() == self.capacity {
                self.durations_ms.pop_front();
            }
            self.durations_ms.push_back(delta_ms);
        }
        self.last_frame = Some(now);

        let start = *self.fps_window_start.get_or_insert(now);
        self.frames_in_window += 1;
        let elapsed = now - start;
        if elapsed >= 1.0 {
            // The frame that opened the window is not part of the count.
            self.fps = (self.frames_in_window.saturating_sub(1)) as f32 / elapsed as f32;
            self.fps_window_start = Some(now);
            self.frames_in_window = 1;
            return true;
        }
        false
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn smoothed_frame_time_ms(&self) -> f32 {
        if self.durations_ms.is_empty() {
            return 0.0;
        }
        self.durations_ms.iter().sum::<f32>() / self.durations_ms.len() as f32
    }

    /// Rebuilds the published snapshot from the latest renderer counters.
    pub fn publish(&mut self, now: f64, counters: &RenderCounters, tracked_bytes: u64) -> PerformanceMetrics {
        self.metrics = PerformanceMetrics {
            timestamp: now,
            fps: self.fps,
            frame_time_ms: self.smoothed_frame_time_ms(),
            memory_bytes: tracked_bytes + counters.memory_bytes,
            draw_calls: counters.draw_calls,
            triangles: counters.triangles,
            geometries: counters.geometries,
            textures: counters.textures,
        };
        self.metrics
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_recomputed_once_per_second() {
        let mut telemetry = FrameTelemetry::new(60, 60.0);
        let mut recomputed = 0;
        for frame in 0..=60 {
            if telemetry.record_frame(frame as f64 / 30.0) {
                recomputed += 1;
            }
        }
        assert_eq!(recomputed, 2);
        assert!((telemetry.fps() - 30.0).abs() < 0.5);
    }

    #[test]
    fn seed_fps_until_first_second() {
        let mut telemetry = FrameTelemetry::new(10, 60.0);
        telemetry.record_frame(0.0);
        telemetry.record_frame(0.1);
        assert_eq!(telemetry.fps(), 60.0);
    }

    #[test]
    fn frame_time_window_is_bounded() {
        let mut telemetry = FrameTelemetry::new(4, 60.0);
        for frame in 0..20 {
            telemetry.record_frame(frame as f64 * 0.02);
        }
        assert!((telemetry.smoothed_frame_time_ms() - 20.0).abs() < 0.01);
    }

    #[test]
    fn publish_adds_tracked_and_backend_memory() {
        let mut telemetry = FrameTelemetry::new(4, 60.0);
        let counters = RenderCounters {
            draw_calls: 12,
            memory_bytes: 1024 * 1024,
            ..Default::default()
        };
        let metrics = telemetry.publish(1.0, &counters, 1024 * 1024);
        assert_eq!(metrics.draw_calls, 12);
        assert!((metrics.memory_mb() - 2.0).abs() < f32::EPSILON);
    }
}
