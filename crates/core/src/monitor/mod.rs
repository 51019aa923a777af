//! Closed-loop quality control.
//!
//! The monitor samples the engine's metrics on a fixed interval, keeps a
//! bounded history, raises threshold alerts and steps the shared quality
//! settings by at most one level per tick. It is the only holder of the
//! [`QualityWriter`].

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    config::MonitorConfig,
    engine::{CapabilityProfile, PerformanceMetrics},
    quality::{QualityReader, QualitySettings, QualityStep, QualityTier, QualityWriter},
    timeline::{CallbackId, FrameScheduler},
    Result,
};

const MONITOR_OWNER: &str = "monitor";
/// Average memory must sit below this share of the warning level to upgrade.
const UPGRADE_MEMORY_HEADROOM: f32 = 0.8;

/// One sampling tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub timestamp: f64,
    pub fps: f32,
    pub frame_time_ms: f32,
    pub memory_mb: f32,
    pub draw_calls: u32,
    pub triangles: u64,
    pub tier: QualityTier,
    pub capabilities: Option<Arc<CapabilityProfile>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FpsDrop,
    MemorySpike,
    DrawCallsHigh,
    ThermalThrottling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: f64,
    pub profile: PerformanceProfile,
}

impl fmt::Display for PerformanceAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}/{:?}] {} at {:.1}s",
            self.kind, self.severity, self.message, self.timestamp
        )
    }
}

/// Read-only rollup for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub average_fps: f32,
    pub memory_mb: f32,
    pub quality: String,
    pub tier: QualityTier,
    pub active_alerts: usize,
    pub recommendations: Vec<String>,
}

/// Everything the monitor knows, ready to serialise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceExport {
    pub generated_at: f64,
    pub settings: QualitySettings,
    pub summary: PerformanceSummary,
    pub capabilities: Option<Arc<CapabilityProfile>>,
    pub downgrades: u32,
    pub upgrades: u32,
    pub history: Vec<PerformanceProfile>,
    pub alerts: Vec<PerformanceAlert>,
}

impl PerformanceExport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub struct PerformanceMonitor {
    config: MonitorConfig,
    quality: QualityWriter,
    scheduler: FrameScheduler,
    timer: Option<CallbackId>,
    capabilities: Option<Arc<CapabilityProfile>>,
    history: VecDeque<PerformanceProfile>,
    alerts: VecDeque<PerformanceAlert>,
    last_alert: HashMap<AlertKind, (f64, AlertSeverity)>,
    samples_since_change: usize,
    downgrades: u32,
    upgrades: u32,
    last_tick: f64,
}

impl PerformanceMonitor {
    /// Creates the monitor and registers its sampling timer.
    pub fn new(config: MonitorConfig, quality: QualityWriter, scheduler: FrameScheduler, now: f64) -> Self {
        let timer = scheduler.set_interval(MONITOR_OWNER, config.sample_interval_secs, now);
        let history = VecDeque::with_capacity(config.history_len);
        let samples_since_change = config.adaptation_window;
        Self {
            config,
            quality,
            scheduler,
            timer: Some(timer),
            capabilities: None,
            history,
            alerts: VecDeque::new(),
            last_alert: HashMap::new(),
            samples_since_change,
            downgrades: 0,
            upgrades: 0,
            last_tick: now,
        }
    }

    /// Records the probed device and resets the settings to the tier the
    /// device should start at.
    pub fn seed_capabilities(&mut self, capabilities: CapabilityProfile) {
        let tier = capabilities.initial_tier();
        let cap = self.config.particle_hard_cap;
        self.quality.update(|settings| {
            *settings = QualitySettings::for_tier(tier);
            settings.max_particles = settings.max_particles.min(cap);
        });
        tracing::info!(%tier, "quality seeded from device capabilities");
        self.capabilities = Some(Arc::new(capabilities));
    }

    pub fn timer(&self) -> Option<CallbackId> {
        self.timer
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn quality_reader(&self) -> QualityReader {
        self.quality.reader()
    }

    /// One sampling tick: record, alert, adapt.
    pub fn tick(&mut self, now: f64, metrics: &PerformanceMetrics) -> Option<QualityStep> {
        self.record_sample(now, metrics);
        self.adapt(now)
    }

    /// Records a profile and evaluates the alert conditions against it.
    pub fn record_sample(&mut self, now: f64, metrics: &PerformanceMetrics) {
        self.last_tick = now;
        let profile = PerformanceProfile {
            timestamp: now,
            fps: metrics.fps,
            frame_time_ms: metrics.frame_time_ms,
            memory_mb: metrics.memory_mb(),
            draw_calls: metrics.draw_calls,
            triangles: metrics.triangles,
            tier: self.quality.snapshot().tier,
            capabilities: self.capabilities.clone(),
        };
        if self.history.len() == self.config.history_len.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(profile);
        self.samples_since_change = self.samples_since_change.saturating_add(1);
        self.evaluate_alerts(now);
    }

    /// Adaptation step with hysteresis. Downgrade wins over upgrade and at
    /// most one step is taken; after a change a full window of fresh samples
    /// is required before the next one.
    pub fn adapt(&mut self, now: f64) -> Option<QualityStep> {
        let window = self.config.adaptation_window.max(1);
        if self.history.is_empty() || self.samples_since_change < window {
            return None;
        }
        let requests = self.quality.drain_requests();

        let (avg_fps, avg_memory) = self.window_averages(window);
        let requested_down = requests.iter().any(|r| r.step == QualityStep::Down);
        let requested_up = requests.iter().any(|r| r.step == QualityStep::Up);
        let recent_critical = self.alerts.iter().any(|alert| {
            alert.severity == AlertSeverity::Critical
                && now - alert.timestamp <= self.config.critical_alert_window_secs
        });

        let downgrade = avg_fps < self.config.fps_low
            || avg_memory > self.config.memory_warning_mb
            || recent_critical
            || requested_down;
        if downgrade {
            let before = self.quality.snapshot();
            let floor = self.config.particle_floor;
            let after = self.quality.update(|settings| settings.downgrade(floor));
            if after == before {
                return None;
            }
            self.samples_since_change = 0;
            self.downgrades += 1;
            tracing::info!(
                from = %before.tier,
                to = %after.tier,
                avg_fps,
                avg_memory,
                recent_critical,
                requested_down,
                "quality downgraded"
            );
            return Some(QualityStep::Down);
        }

        let quiet = self
            .alerts
            .back()
            .map(|alert| now - alert.timestamp > self.config.upgrade_quiet_secs)
            .unwrap_or(true);
        let memory_ok = avg_memory < self.config.memory_warning_mb * UPGRADE_MEMORY_HEADROOM;
        let upgrade = (avg_fps > self.config.fps_high || requested_up) && memory_ok && quiet;
        if upgrade {
            let before = self.quality.snapshot();
            let cap = self.config.particle_hard_cap;
            let after = self.quality.update(|settings| settings.upgrade(cap));
            if after == before {
                return None;
            }
            self.samples_since_change = 0;
            self.upgrades += 1;
            tracing::info!(from = %before.tier, to = %after.tier, avg_fps, "quality upgraded");
            return Some(QualityStep::Up);
        }
        None
    }

    pub fn quality_settings(&self) -> QualitySettings {
        self.quality.snapshot()
    }

    pub fn history(&self) -> impl Iterator<Item = &PerformanceProfile> {
        self.history.iter()
    }

    /// Up to `limit` most recent alerts, oldest first.
    pub fn recent_alerts(&self, limit: usize) -> Vec<PerformanceAlert> {
        let skip = self.alerts.len().saturating_sub(limit);
        self.alerts.iter().skip(skip).cloned().collect()
    }

    pub fn downgrades(&self) -> u32 {
        self.downgrades
    }

    pub fn upgrades(&self) -> u32 {
        self.upgrades
    }

    pub fn summary(&self) -> PerformanceSummary {
        let window = self.config.adaptation_window.max(1);
        let (average_fps, memory_mb) = self.window_averages(window);
        let now = self.last_tick;
        let active_alerts = self
            .alerts
            .iter()
            .filter(|alert| now - alert.timestamp <= self.config.upgrade_quiet_secs)
            .count();

        PerformanceSummary {
            average_fps,
            memory_mb,
            quality: self.quality_label(average_fps).to_string(),
            tier: self.quality.snapshot().tier,
            active_alerts,
            recommendations: self.recommendations(now, average_fps, memory_mb),
        }
    }

    pub fn export(&self) -> PerformanceExport {
        PerformanceExport {
            generated_at: self.last_tick,
            settings: self.quality.snapshot(),
            summary: self.summary(),
            capabilities: self.capabilities.clone(),
            downgrades: self.downgrades,
            upgrades: self.upgrades,
            history: self.history.iter().cloned().collect(),
            alerts: self.alerts.iter().cloned().collect(),
        }
    }

    /// Cancels the sampling timer. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if let Some(timer) = self.timer.take() {
            self.scheduler.cancel(timer);
            tracing::debug!("performance monitor stopped");
        }
    }

    fn window_averages(&self, window: usize) -> (f32, f32) {
        let count = self.history.len().min(window);
        if count == 0 {
            return (0.0, 0.0);
        }
        let (fps, memory) = self
            .history
            .iter()
            .rev()
            .take(count)
            .fold((0.0, 0.0), |(fps, mem), p| (fps + p.fps, mem + p.memory_mb));
        (fps / count as f32, memory / count as f32)
    }

    fn evaluate_alerts(&mut self, now: f64) {
        let Some(profile) = self.history.back().cloned() else {
            return;
        };
        let cfg = &self.config;
        let mut raised = Vec::new();

        if profile.fps < cfg.fps_critical {
            raised.push((
                AlertKind::FpsDrop,
                AlertSeverity::Critical,
                format!("FPS critically low: {:.1}", profile.fps),
            ));
        } else if profile.fps < cfg.fps_low {
            raised.push((
                AlertKind::FpsDrop,
                AlertSeverity::High,
                format!("FPS below target: {:.1}", profile.fps),
            ));
        }

        if profile.memory_mb > cfg.memory_critical_mb {
            raised.push((
                AlertKind::MemorySpike,
                AlertSeverity::Critical,
                format!("memory critical: {:.1} MB", profile.memory_mb),
            ));
        } else if profile.memory_mb > cfg.memory_warning_mb {
            raised.push((
                AlertKind::MemorySpike,
                AlertSeverity::Medium,
                format!("memory high: {:.1} MB", profile.memory_mb),
            ));
        }

        if profile.draw_calls > cfg.draw_calls_high {
            raised.push((
                AlertKind::DrawCallsHigh,
                AlertSeverity::Medium,
                format!("draw calls high: {}", profile.draw_calls),
            ));
        }

        if let Some((variance, mean)) = self.fps_variance(cfg.thermal_window) {
            if variance > cfg.thermal_variance && mean < cfg.fps_medium {
                raised.push((
                    AlertKind::ThermalThrottling,
                    AlertSeverity::High,
                    format!("unstable frame rate (variance {variance:.0}); possible thermal throttling"),
                ));
            }
        }

        for (kind, severity, message) in raised {
            self.push_alert(now, kind, severity, message, &profile);
        }
    }

    fn push_alert(
        &mut self,
        now: f64,
        kind: AlertKind,
        severity: AlertSeverity,
        message: String,
        profile: &PerformanceProfile,
    ) {
        if let Some((last, last_severity)) = self.last_alert.get(&kind) {
            let cooling = now - last < self.config.alert_cooldown_secs;
            if cooling && severity <= *last_severity {
                return;
            }
        }
        tracing::warn!(?kind, ?severity, %message, "performance alert");
        self.last_alert.insert(kind, (now, severity));
        self.alerts.push_back(PerformanceAlert {
            kind,
            severity,
            message,
            timestamp: now,
            profile: profile.clone(),
        });
        while self.alerts.len() > self.config.max_alerts.max(1) {
            self.alerts.pop_front();
        }
    }

    /// Population variance and mean of the last `window` FPS samples.
    fn fps_variance(&self, window: usize) -> Option<(f32, f32)> {
        if window < 2 || self.history.len() < window {
            return None;
        }
        let samples: Vec<f32> = self.history.iter().rev().take(window).map(|p| p.fps).collect();
        let mean = samples.iter().sum::<f32>() / window as f32;
        let variance = samples.iter().map(|fps| (fps - mean).powi(2)).sum::<f32>() / window as f32;
        Some((variance, mean))
    }

    fn quality_label(&self, average_fps: f32) -> &'static str {
        if self.history.is_empty() {
            "unknown"
        } else if average_fps >= self.config.fps_high {
            "excellent"
        } else if average_fps >= self.config.fps_medium {
            "good"
        } else if average_fps >= self.config.fps_low {
            "fair"
        } else {
            "poor"
        }
    }

    fn recommendations(&self, now: f64, average_fps: f32, memory_mb: f32) -> Vec<String> {
        let mut out = Vec::new();
        if self.history.is_empty() {
            return out;
        }
        if average_fps < self.config.fps_low {
            out.push("Reduce particle density or drop to a lower quality tier".to_string());
        }
        if memory_mb > self.config.memory_warning_mb {
            out.push("Release unused textures and geometries".to_string());
        }
        let recent = |kind: AlertKind| {
            self.alerts
                .iter()
                .any(|a| a.kind == kind && now - a.timestamp <= self.config.upgrade_quiet_secs)
        };
        if recent(AlertKind::DrawCallsHigh) {
            out.push("Merge static meshes to cut draw calls".to_string());
        }
        if recent(AlertKind::ThermalThrottling) {
            out.push("Device may be throttling; hold quality at a lower tier".to_string());
        }
        if out.is_empty() {
            out.push("Performance is within budget".to_string());
        }
        out
    }
}

impl Drop for PerformanceMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("settings", &self.quality.snapshot())
            .field("history", &self.history.len())
            .field("alerts", &self.alerts.len())
            .field("downgrades", &self.downgrades)
            .field("upgrades", &self.upgrades)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::quality_channel;

    const MB: u64 = 1024 * 1024;

    fn build_monitor(tier: QualityTier) -> (PerformanceMonitor, QualityReader, FrameScheduler) {
        let scheduler = FrameScheduler::new();
        let (writer, reader) = quality_channel(QualitySettings::for_tier(tier));
        let monitor = PerformanceMonitor::new(MonitorConfig::default(), writer, scheduler.clone(), 0.0);
        (monitor, reader, scheduler)
    }

    fn metrics(fps: f32, memory_mb: u64) -> PerformanceMetrics {
        PerformanceMetrics {
            fps,
            frame_time_ms: 1000.0 / fps.max(1.0),
            memory_bytes: memory_mb * MB,
            draw_calls: 50,
            ..Default::default()
        }
    }

    #[test]
    fn low_fps_window_downgrades_exactly_once() {
        let (mut monitor, reader, _) = build_monitor(QualityTier::High);
        for (i, fps) in [10.0, 12.0, 11.0, 9.0, 13.0].into_iter().enumerate() {
            monitor.record_sample(i as f64 * 0.1, &metrics(fps, 50));
        }

        assert_eq!(monitor.adapt(0.5), Some(QualityStep::Down));
        assert_eq!(reader.tier(), QualityTier::Medium);
        assert_eq!(monitor.adapt(0.5), None);
        assert_eq!(monitor.downgrades(), 1);
    }

    #[test]
    fn critical_memory_downgrades_on_first_tick() {
        let (mut monitor, reader, _) = build_monitor(QualityTier::High);
        let before = reader.snapshot();
        assert_eq!(monitor.tick(0.1, &metrics(60.0, 220)), Some(QualityStep::Down));

        let after = reader.snapshot();
        assert_eq!(after.tier, QualityTier::Medium);
        assert!(after.within(&before));
        let alerts = monitor.recent_alerts(10);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::MemorySpike);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn upgrade_needs_quiet_period_and_headroom() {
        let (mut monitor, reader, _) = build_monitor(QualityTier::Low);
        // An alert at t=0.1 blocks upgrades for ten seconds.
        monitor.tick(0.1, &metrics(20.0, 50));
        let mut t = 0.2;
        while t < 10.0 {
            assert_ne!(monitor.tick(t, &metrics(60.0, 50)), Some(QualityStep::Up));
            t += 0.1;
        }
        let mut upgraded = false;
        while t < 11.0 && !upgraded {
            upgraded = monitor.tick(t, &metrics(60.0, 50)) == Some(QualityStep::Up);
            t += 0.1;
        }
        assert!(upgraded);
        assert_eq!(reader.tier(), QualityTier::Medium);
    }

    #[test]
    fn high_memory_blocks_upgrade() {
        let (mut monitor, reader, _) = build_monitor(QualityTier::Medium);
        for i in 0..20 {
            // 130 MB: below the warning level but without enough headroom.
            monitor.tick(i as f64 * 0.1, &metrics(60.0, 130));
        }
        assert_eq!(reader.tier(), QualityTier::Medium);
        assert_eq!(monitor.upgrades(), 0);
    }

    #[test]
    fn reader_requests_are_honoured_once() {
        let (mut monitor, reader, _) = build_monitor(QualityTier::High);
        reader.request(QualityStep::Down, "scene");
        reader.request(QualityStep::Down, "engine");
        assert_eq!(monitor.tick(0.1, &metrics(50.0, 50)), Some(QualityStep::Down));
        assert_eq!(reader.tier(), QualityTier::Medium);
        assert_eq!(reader.pending_requests(), 0);
    }

    #[test]
    fn thermal_heuristic_flags_unstable_low_fps() {
        let (mut monitor, _, _) = build_monitor(QualityTier::Medium);
        for i in 0..10 {
            let fps = if i % 2 == 0 { 20.0 } else { 44.0 };
            monitor.record_sample(i as f64 * 0.1, &metrics(fps, 50));
        }
        assert!(monitor
            .recent_alerts(50)
            .iter()
            .any(|alert| alert.kind == AlertKind::ThermalThrottling));
    }

    #[test]
    fn alerts_are_capped_and_cooled_down() {
        let (mut monitor, _, _) = build_monitor(QualityTier::High);
        for i in 0..2000 {
            monitor.record_sample(i as f64 * 0.1, &metrics(5.0, 50));
        }
        assert_eq!(monitor.recent_alerts(usize::MAX).len(), 50);

        let (mut monitor, _, _) = build_monitor(QualityTier::High);
        for i in 0..5 {
            monitor.record_sample(i as f64 * 0.1, &metrics(5.0, 50));
        }
        assert_eq!(monitor.recent_alerts(usize::MAX).len(), 1);
    }

    #[test]
    fn history_is_ring_buffered() {
        let (mut monitor, _, _) = build_monitor(QualityTier::High);
        for i in 0..250 {
            monitor.record_sample(i as f64 * 0.1, &metrics(60.0, 50));
        }
        assert_eq!(monitor.history().count(), 100);
    }

    #[test]
    fn summary_and_export_describe_state() {
        let (mut monitor, _, _) = build_monitor(QualityTier::High);
        for i in 0..5 {
            monitor.record_sample(i as f64 * 0.1, &metrics(20.0, 160));
        }
        let summary = monitor.summary();
        assert_eq!(summary.quality, "poor");
        assert!(summary.active_alerts >= 2);
        assert!(summary.recommendations.len() >= 2);

        let json = monitor.export().to_json().unwrap();
        let parsed: PerformanceExport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.history.len(), 5);
        assert_eq!(parsed.summary, summary);
    }

    #[test]
    fn seeding_and_dispose() {
        let (mut monitor, reader, scheduler) = build_monitor(QualityTier::High);
        monitor.seed_capabilities(CapabilityProfile::mobile());
        assert_eq!(reader.tier(), QualityTier::Medium);

        assert_eq!(scheduler.active_registrations(), 1);
        monitor.dispose();
        monitor.dispose();
        assert_eq!(scheduler.active_registrations(), 0);
    }
}
