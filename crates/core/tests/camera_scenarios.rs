use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use cinesonic_core::{
    camera::Easing, AudioAnalysisFrame, CameraConfig, CameraMode, CapabilityProfile,
    CinematicController, Cues, HeadlessBackend, InteractionEvent, InteractionKind,
    RecordingCueSink, Runtime, RuntimeConfig, SceneConfig, Shot, WorldKind,
};
use glam::Vec3;
use proptest::prelude::*;

fn controller() -> CinematicController {
    let mut camera = CinematicController::new(
        CameraConfig::new(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO),
        &SceneConfig::default(),
        Cues::silent(),
    );
    camera.set_breathing(false);
    camera
}

#[test]
fn two_second_linear_shot_is_halfway_after_one_second() {
    let mut camera = controller();
    camera.start_shot(
        Shot::new(
            "push",
            CameraMode::Static,
            CameraConfig::new(Vec3::new(0.0, 5.0, 5.0), Vec3::ZERO),
        )
        .over(2.0, Easing::Linear),
    );
    for _ in 0..4 {
        camera.update(0.25, None);
    }
    let position = camera.rig().position;
    assert!(position.abs_diff_eq(Vec3::new(0.0, 2.5, 7.5), 1e-4), "{position}");
}

#[test]
fn unknown_sequence_changes_nothing() {
    let mut camera = controller();
    let before = camera.rig().position;
    assert!(!camera.start_sequence("does-not-exist"));
    camera.update(0.1, None);
    assert_eq!(camera.active_sequence(), None);
    assert_eq!(camera.rig().position, before);
}

#[test]
fn silent_stream_settles_shake() {
    let mut camera = controller();
    camera.shake(1.0);
    let silent = AudioAnalysisFrame::silent();
    for _ in 0..300 {
        camera.update(1.0 / 60.0, Some(&silent));
    }
    assert!(camera.shake_intensity() < 1e-3);
}

#[test]
fn clicks_start_interaction_sequences_on_a_later_frame() {
    let mut runtime = Runtime::launch(
        RuntimeConfig::default(),
        WorldKind::Entropy,
        Box::new(HeadlessBackend::new(CapabilityProfile::desktop())),
        Cues::new(Arc::new(RecordingCueSink::new())),
        0.0,
    )
    .expect("launch");
    runtime.tick(1.0 / 60.0, None).expect("tick");

    runtime
        .interact(&InteractionEvent::new(InteractionKind::Click).with_intensity(0.4))
        .expect("interact");
    let camera = runtime.scene().expect("scene").stage().camera();
    assert_eq!(camera.pending_sequence(), None);

    runtime.tick(2.0 / 60.0, None).expect("tick");
    let camera = runtime.scene().expect("scene").stage().camera();
    assert_eq!(camera.pending_sequence(), Some("vortex"));
    assert_ne!(camera.active_sequence(), Some("vortex"));

    runtime.tick(3.0 / 60.0, None).expect("tick");
    let camera = runtime.scene().expect("scene").stage().camera();
    assert_eq!(camera.active_sequence(), Some("vortex"));
}

proptest! {
    #[test]
    fn transitions_progress_monotonically_and_complete_once(
        duration in 0.1f32..4.0,
        steps in prop::collection::vec(0.001f32..0.2, 1..400),
    ) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let mut camera = controller();
        camera.start_shot_with(
            Shot::new("glide", CameraMode::Static, CameraConfig::new(Vec3::new(4.0, 2.0, -3.0), Vec3::Y))
                .over(duration, Easing::EaseInOutCubic),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut last = 0.0f32;
        let mut elapsed = 0.0f32;
        for delta in steps {
            camera.update(delta, None);
            elapsed += delta;
            match camera.transition_progress() {
                Some(progress) => {
                    prop_assert!(progress >= last);
                    prop_assert!(progress < 1.0);
                    last = progress;
                }
                None => {
                    prop_assert!(elapsed >= duration - 1e-3);
                    prop_assert_eq!(camera.rig().position, Vec3::new(4.0, 2.0, -3.0));
                }
            }
        }
        if elapsed >= duration + 1e-3 {
            prop_assert!(!camera.is_transitioning());
            prop_assert_eq!(fired.load(Ordering::SeqCst), 1);
        }
        prop_assert!(fired.load(Ordering::SeqCst) <= 1);
    }
}
