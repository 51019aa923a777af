use std::sync::Arc;

use cinesonic_core::{
    engine::{EngineState, FrameSubmission},
    quality_channel, CapabilityProfile, CinesonicError, Cues, EngineConfig, FrameScheduler,
    HeadlessBackend, Presentation, QualitySettings, QualityTier, RecordingCueSink, RenderEngine,
    Runtime, RuntimeConfig, SceneState, WorldKind,
};

fn launch(world: WorldKind, backend: HeadlessBackend) -> Runtime {
    Runtime::launch(
        RuntimeConfig::default(),
        world,
        Box::new(backend),
        Cues::new(Arc::new(RecordingCueSink::new())),
        0.0,
    )
    .expect("launch")
}

fn run_frames(runtime: &mut Runtime, frames: u32) {
    for i in 1..=frames {
        runtime.tick(f64::from(i) / 60.0, None).expect("tick");
    }
}

#[test]
fn engine_without_gpu_reports_failure() {
    let scheduler = FrameScheduler::new();
    let (_writer, reader) = quality_channel(QualitySettings::for_tier(QualityTier::High));
    let mut engine = RenderEngine::new(EngineConfig::default(), scheduler.clone(), reader);

    assert!(!engine.initialize(Box::new(HeadlessBackend::without_gpu())));
    assert_eq!(engine.state(), EngineState::Unsupported);
    assert!(engine.capabilities().is_none());
    assert_eq!(scheduler.active_registrations(), 0);
}

#[test]
fn host_falls_back_and_builds_no_scene() {
    let mut runtime = launch(WorldKind::Reverie, HeadlessBackend::without_gpu());
    assert_eq!(runtime.presentation(), Presentation::Fallback);
    assert!(runtime.scene().is_none());
    assert!(runtime.summary().is_none());

    run_frames(&mut runtime, 30);
    assert_eq!(runtime.engine().resources().live_count(), 0);
    assert_eq!(runtime.scheduler().active_registrations(), 0);
}

#[test]
fn every_world_disposes_cleanly_twice() {
    for world in WorldKind::ALL {
        let backend = HeadlessBackend::new(CapabilityProfile::desktop());
        let controls = backend.controls();
        let mut runtime = launch(world, backend);
        run_frames(&mut runtime, 90);

        let scene = runtime.scene_mut().expect("scene");
        assert_eq!(scene.state(), SceneState::Playing, "{world}");
        let owner = format!("scene:{world}");
        assert_eq!(runtime.scheduler().registrations_for(&owner), 2);
        assert!(runtime.engine().resources().live_count() > 0);

        let scene = runtime.scene_mut().expect("scene");
        scene.dispose();
        scene.dispose();
        assert_eq!(scene.state(), SceneState::Disposed);
        assert_eq!(runtime.scheduler().registrations_for(&owner), 0);
        assert_eq!(runtime.engine().resources().live_count(), 0, "{world} leaked resources");

        runtime.engine_mut().dispose();
        runtime.engine_mut().dispose();
        runtime.dispose();
        runtime.dispose();
        assert_eq!(runtime.scheduler().active_registrations(), 0, "{world}");
        assert!(controls.is_released());
    }
}

#[test]
fn disposed_scene_rejects_use() {
    let mut runtime = launch(WorldKind::Strata, HeadlessBackend::new(CapabilityProfile::desktop()));
    run_frames(&mut runtime, 10);
    let scene = runtime.scene_mut().expect("scene");
    scene.dispose();

    assert!(matches!(
        scene.update(1.0 / 60.0, None),
        Err(CinesonicError::SceneDisposed(_))
    ));
    assert!(matches!(scene.start(), Err(CinesonicError::SceneDisposed(_))));
}

#[test]
fn disposed_engine_refuses_frames() {
    let mut runtime = launch(WorldKind::Cadence, HeadlessBackend::new(CapabilityProfile::desktop()));
    run_frames(&mut runtime, 5);
    let frame: FrameSubmission = runtime.scene().expect("scene").submission();
    runtime.engine_mut().dispose();

    assert!(matches!(
        runtime.engine_mut().render(frame),
        Err(CinesonicError::EngineNotInitialized)
    ));
}
