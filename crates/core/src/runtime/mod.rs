//! Host orchestration.
//!
//! [`Runtime`] wires the scheduler to the engine's telemetry loop, the active
//! scene, the performance monitor and the scene's local adaptation timer.
//! The host calls [`Runtime::tick`] once per display frame with its own clock.

use tracing::{debug, info, warn};

use crate::{
    audio::{AudioAnalysisFrame, AudioGate},
    config::RuntimeConfig,
    cues::Cues,
    engine::{RenderBackend, RenderEngine, WorldKind},
    monitor::{PerformanceExport, PerformanceMonitor, PerformanceSummary},
    quality::{quality_channel, QualitySettings},
    scene::{worlds::create_world, InteractionEvent, InteractionKind, LoadStatus, Scene, SceneContext},
    timeline::FrameScheduler,
    QualityStep, QualityTier, Result,
};

/// What the host should put on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// The 3D scene is live (or loading).
    Immersive,
    /// No rendering context; show the non-3D presentation.
    Fallback,
}

/// What happened during one [`Runtime::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub rendered: bool,
    pub monitor_step: Option<QualityStep>,
    pub scene_step: Option<QualityStep>,
}

pub struct Runtime {
    scheduler: FrameScheduler,
    engine: RenderEngine,
    monitor: Option<PerformanceMonitor>,
    scene: Option<Scene>,
    audio: AudioGate,
    presentation: Presentation,
    last_frame: Option<f64>,
    disposed: bool,
}

impl Runtime {
    /// Probes the backend and, when it can render, builds the monitor and the
    /// requested world. On a failed probe nothing else is constructed and the
    /// runtime stays in [`Presentation::Fallback`].
    pub fn launch(
        config: RuntimeConfig,
        world: WorldKind,
        backend: Box<dyn RenderBackend>,
        cues: Cues,
        now: f64,
    ) -> Result<Self> {
        let scheduler = FrameScheduler::new();
        let (writer, reader) = quality_channel(QualitySettings::for_tier(QualityTier::Medium));
        let mut engine = RenderEngine::new(config.engine, scheduler.clone(), reader);

        if !engine.initialize(backend) {
            warn!(%world, "rendering unavailable; presenting fallback");
            return Ok(Self::assemble(scheduler, engine, None, None, Presentation::Fallback));
        }

        let mut monitor = PerformanceMonitor::new(config.monitor, writer, scheduler.clone(), now);
        if let Some(profile) = engine.capabilities().cloned() {
            monitor.seed_capabilities(profile);
        }

        let context = SceneContext::for_engine(&engine, config.scene, scheduler.clone(), cues);
        let mut scene = Scene::new(create_world(world), context);
        let status = scene.initialize(now)?;
        info!(%world, ?status, "runtime launched");
        Ok(Self::assemble(
            scheduler,
            engine,
            Some(monitor),
            Some(scene),
            Presentation::Immersive,
        ))
    }

    fn assemble(
        scheduler: FrameScheduler,
        engine: RenderEngine,
        monitor: Option<PerformanceMonitor>,
        scene: Option<Scene>,
        presentation: Presentation,
    ) -> Self {
        Self {
            scheduler,
            engine,
            monitor,
            scene,
            audio: AudioGate::new(),
            presentation,
            last_frame: None,
            disposed: false,
        }
    }

    pub fn presentation(&self) -> Presentation {
        self.presentation
    }

    pub fn engine(&self) -> &RenderEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RenderEngine {
        &mut self.engine
    }

    pub fn monitor(&self) -> Option<&PerformanceMonitor> {
        self.monitor.as_ref()
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    pub fn scene_mut(&mut self) -> Option<&mut Scene> {
        self.scene.as_mut()
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn audio_running(&self) -> bool {
        self.audio.is_running()
    }

    /// Runs every callback due at `now`. `audio` is dropped until a user
    /// gesture has unlocked analysis.
    pub fn tick(&mut self, now: f64, audio: Option<AudioAnalysisFrame>) -> Result<TickReport> {
        let mut report = TickReport::default();
        if self.disposed || self.presentation == Presentation::Fallback {
            return Ok(report);
        }
        let delta = self
            .last_frame
            .map(|last| (now - last).max(0.0) as f32)
            .unwrap_or(0.0);
        self.last_frame = Some(now);

        if let Some(scene) = self.scene.as_mut().filter(|s| s.is_loading()) {
            if scene.initialize(now)? == LoadStatus::Pending {
                debug!(world = %scene.kind(), "world still loading");
            }
        }
        let frame = audio.and_then(|frame| self.audio.admit(frame));

        for id in self.scheduler.poll(now) {
            if self.engine.frame_callback() == Some(id) {
                self.engine.on_frame(now);
                continue;
            }
            if let Some(monitor) = self.monitor.as_mut().filter(|m| m.timer() == Some(id)) {
                let metrics = self.engine.metrics();
                report.monitor_step = monitor.tick(now, &metrics);
                continue;
            }
            let Some(scene) = self.scene.as_mut() else {
                continue;
            };
            if scene.frame_callback() == Some(id) {
                scene.update(delta, frame.as_ref())?;
                scene.render(&mut self.engine)?;
                report.rendered = scene.is_ready();
            } else if scene.adaptation_timer() == Some(id) {
                report.scene_step = scene.adapt_to_performance(self.engine.metrics().fps)?;
            }
        }
        Ok(report)
    }

    /// Forwards an input event. Clicks and gestures count as user
    /// activation and unlock audio analysis.
    pub fn interact(&mut self, event: &InteractionEvent) -> Result<()> {
        if matches!(event.kind, InteractionKind::Click | InteractionKind::Gesture) {
            self.audio.register_gesture();
            self.audio.try_start();
        }
        match self.scene.as_mut() {
            Some(scene) => scene.handle_interaction(event),
            None => Ok(()),
        }
    }

    /// Starts audio analysis if a gesture has been seen. Fails soft.
    pub fn start_audio(&mut self) -> bool {
        self.audio.try_start()
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.engine.resize(width, height);
        match self.scene.as_mut() {
            Some(scene) => scene.resize(width, height),
            None => Ok(()),
        }
    }

    pub fn summary(&self) -> Option<PerformanceSummary> {
        self.monitor.as_ref().map(PerformanceMonitor::summary)
    }

    pub fn export(&self) -> Option<PerformanceExport> {
        self.monitor.as_ref().map(PerformanceMonitor::export)
    }

    /// Tears down scene, monitor and engine in that order. Safe to call
    /// more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(scene) = self.scene.as_mut() {
            scene.dispose();
        }
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.dispose();
        }
        self.engine.dispose();
        self.audio.stop();
        self.disposed = true;
        debug!(
            registrations = self.scheduler.active_registrations(),
            "runtime disposed"
        );
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        cues::RecordingCueSink,
        engine::{CapabilityProfile, HeadlessBackend},
        scene::SceneState,
        BandEnergy,
    };

    fn launch(world: WorldKind, backend: HeadlessBackend) -> Runtime {
        Runtime::launch(
            RuntimeConfig::default(),
            world,
            Box::new(backend),
            Cues::new(Arc::new(RecordingCueSink::new())),
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn missing_gpu_builds_no_scene() {
        let mut runtime = launch(WorldKind::Reverie, HeadlessBackend::without_gpu());
        assert_eq!(runtime.presentation(), Presentation::Fallback);
        assert!(runtime.scene().is_none());
        assert!(runtime.monitor().is_none());
        assert_eq!(runtime.scheduler().active_registrations(), 0);
        assert_eq!(runtime.tick(0.016, None).unwrap(), TickReport::default());
    }

    #[test]
    fn ticks_render_and_sample() {
        let backend = HeadlessBackend::new(CapabilityProfile::desktop());
        let controls = backend.controls();
        let mut runtime = launch(WorldKind::Strata, backend);
        assert_eq!(runtime.presentation(), Presentation::Immersive);

        for i in 1..=120 {
            let report = runtime.tick(i as f64 / 60.0, None).unwrap();
            assert!(report.rendered);
        }
        assert_eq!(controls.submissions(), 120);
        assert!(runtime.monitor().unwrap().history().count() >= 19);
        assert_eq!(runtime.scene().unwrap().state(), SceneState::Playing);
    }

    #[test]
    fn audio_waits_for_a_gesture() {
        let mut runtime = launch(WorldKind::Entropy, HeadlessBackend::new(CapabilityProfile::desktop()));
        let loud = AudioAnalysisFrame::from_energy(BandEnergy::flat(1.0), true);

        assert!(!runtime.start_audio());
        runtime.tick(0.016, Some(loud.clone())).unwrap();
        assert_eq!(runtime.scene().unwrap().stage().camera().shake_intensity(), 0.0);

        runtime
            .interact(&InteractionEvent::new(InteractionKind::Click))
            .unwrap();
        assert!(runtime.audio_running());
        runtime.tick(0.032, Some(loud)).unwrap();
        assert!(runtime.scene().unwrap().frames() >= 2);
    }

    #[test]
    fn dispose_leaves_nothing_registered() {
        let backend = HeadlessBackend::new(CapabilityProfile::desktop());
        let controls = backend.controls();
        let mut runtime = launch(WorldKind::Cadence, backend);
        for i in 1..=30 {
            runtime.tick(i as f64 / 60.0, None).unwrap();
        }
        runtime.dispose();
        runtime.dispose();
        assert_eq!(runtime.scheduler().active_registrations(), 0);
        assert_eq!(runtime.engine().resources().live_count(), 0);
        assert!(controls.is_released());
        assert_eq!(runtime.tick(1.0, None).unwrap(), TickReport::default());
    }
}
