//! Scene framework: the lifecycle every world plugs into.
//!
//! A [`Scene`] owns one [`World`] and the [`Stage`] it builds on. Each frame
//! runs in a fixed order: clock, mixers and camera, `update_world`, the
//! audio-reactive pulse, `handle_audio_event`, then render.

pub mod lighting;
pub mod mesh;
pub mod particles;
pub mod stage;
pub mod worlds;

use std::fmt;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    config::SceneConfig,
    cues::Cues,
    engine::{FrameSubmission, RenderEngine, ResourceTracker, WorldKind},
    timeline::{CallbackId, FrameScheduler},
    AudioAnalysisFrame, CinesonicError, QualityReader, QualityStep, Result,
};

pub use lighting::{LightingDescription, LightingRig, PointLight};
pub use mesh::{AnimationMixer, Mesh, MeshDesc, MeshHandle};
pub use particles::{MovementArchetype, ParticleConfig, ParticleHandle, ParticleSystem};
pub use stage::Stage;

const DEFAULT_ASPECT: f32 = 16.0 / 9.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneState {
    Constructed,
    Initializing,
    Playing,
    Paused,
    Disposed,
}

/// Progress of a world's staged initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Pending,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Hover,
    Scroll,
    Audio,
    Gesture,
}

impl InteractionKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::Hover => "hover",
            Self::Scroll => "scroll",
            Self::Audio => "audio",
            Self::Gesture => "gesture",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    pub screen_position: Option<Vec2>,
    pub world_position: Option<Vec3>,
    pub intensity: Option<f32>,
    pub payload: Option<String>,
}

impl InteractionEvent {
    pub fn new(kind: InteractionKind) -> Self {
        Self {
            kind,
            screen_position: None,
            world_position: None,
            intensity: None,
            payload: None,
        }
    }

    pub fn at_screen(mut self, position: Vec2) -> Self {
        self.screen_position = Some(position);
        self
    }

    pub fn at_world(mut self, position: Vec3) -> Self {
        self.world_position = Some(position);
        self
    }

    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = Some(intensity);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// What a themed world supplies. The framework owns timing, resources and
/// rendering; a world only builds and animates its own content.
pub trait World: Send {
    fn kind(&self) -> WorldKind;

    /// Builds meshes, particles and lights. Called repeatedly until it
    /// returns [`LoadStatus::Ready`]; nothing renders before then.
    fn initialize_world(&mut self, stage: &mut Stage) -> LoadStatus;

    fn update_world(&mut self, stage: &mut Stage, delta: f32, audio: Option<&AudioAnalysisFrame>);

    fn handle_interaction(&mut self, stage: &mut Stage, event: &InteractionEvent);

    fn handle_audio_event(&mut self, stage: &mut Stage, audio: &AudioAnalysisFrame);

    /// Releases anything allocated outside the stage's own services.
    fn dispose_world(&mut self, stage: &mut Stage);

    /// One-line narrative status for logs.
    fn status(&self) -> String {
        String::new()
    }
}

/// Everything a scene needs from its host.
#[derive(Debug, Clone)]
pub struct SceneContext {
    pub config: SceneConfig,
    pub quality: QualityReader,
    pub resources: ResourceTracker,
    pub scheduler: FrameScheduler,
    pub cues: Cues,
}

impl SceneContext {
    /// Context sharing the engine's resource ledger and quality reader.
    pub fn for_engine(
        engine: &RenderEngine,
        config: SceneConfig,
        scheduler: FrameScheduler,
        cues: Cues,
    ) -> Self {
        Self {
            config,
            quality: engine.quality(),
            resources: engine.resources(),
            scheduler,
            cues,
        }
    }
}

pub struct Scene {
    world: Box<dyn World>,
    stage: Stage,
    state: SceneState,
    start_paused: bool,
    scheduler: FrameScheduler,
    frame_callback: Option<CallbackId>,
    adaptation_timer: Option<CallbackId>,
    viewport: (u32, u32),
    frames: u64,
}

impl Scene {
    pub fn new(world: Box<dyn World>, context: SceneContext) -> Self {
        let kind = world.kind();
        let stage = Stage::new(
            kind,
            context.config,
            context.quality,
            context.resources,
            context.cues,
        );
        Self {
            world,
            stage,
            state: SceneState::Constructed,
            start_paused: false,
            scheduler: context.scheduler,
            frame_callback: None,
            adaptation_timer: None,
            viewport: (0, 0),
            frames: 0,
        }
    }

    pub fn kind(&self) -> WorldKind {
        self.stage.kind()
    }

    pub fn state(&self) -> SceneState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SceneState::Playing | SceneState::Paused)
    }

    /// True while the host should show its loading presentation.
    pub fn is_loading(&self) -> bool {
        matches!(self.state, SceneState::Constructed | SceneState::Initializing)
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn world(&self) -> &dyn World {
        self.world.as_ref()
    }

    pub fn frame_callback(&self) -> Option<CallbackId> {
        self.frame_callback
    }

    pub fn adaptation_timer(&self) -> Option<CallbackId> {
        self.adaptation_timer
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Polls the world's initialisation. On the first `Ready` the scene
    /// registers its frame callback and adaptation timer and starts playing
    /// unless `stop` was called meanwhile.
    pub fn initialize(&mut self, now: f64) -> Result<LoadStatus> {
        match self.state {
            SceneState::Disposed => return Err(self.disposed()),
            SceneState::Playing | SceneState::Paused => return Ok(LoadStatus::Ready),
            SceneState::Constructed => {
                info!(world = %self.kind(), "initialising world");
                self.state = SceneState::Initializing;
                self.stage.sync_quality();
            }
            SceneState::Initializing => {}
        }

        if self.world.initialize_world(&mut self.stage) == LoadStatus::Pending {
            return Ok(LoadStatus::Pending);
        }

        let owner = self.owner();
        self.frame_callback = Some(self.scheduler.request_animation_frame(owner.clone()));
        self.adaptation_timer = Some(self.scheduler.set_interval(
            owner,
            self.stage.config().adaptation_interval_secs,
            now,
        ));
        self.state = if self.start_paused {
            SceneState::Paused
        } else {
            SceneState::Playing
        };
        info!(world = %self.kind(), state = ?self.state, "world ready");
        Ok(LoadStatus::Ready)
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            SceneState::Disposed => Err(self.disposed()),
            SceneState::Paused => {
                self.state = SceneState::Playing;
                debug!(world = %self.kind(), "scene resumed");
                Ok(())
            }
            _ => {
                self.start_paused = false;
                Ok(())
            }
        }
    }

    /// Pauses updates. Resources stay allocated.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            SceneState::Disposed => Err(self.disposed()),
            SceneState::Playing => {
                self.state = SceneState::Paused;
                debug!(world = %self.kind(), "scene paused");
                Ok(())
            }
            _ => {
                self.start_paused = true;
                Ok(())
            }
        }
    }

    /// Runs one frame of scene logic. A scene that is still loading or
    /// paused does nothing.
    pub fn update(&mut self, delta: f32, audio: Option<&AudioAnalysisFrame>) -> Result<()> {
        match self.state {
            SceneState::Disposed => return Err(self.disposed()),
            SceneState::Playing => {}
            _ => return Ok(()),
        }
        self.stage.sync_quality();

        let delta = self.stage.advance_clock(delta);
        self.stage.update_mixers(delta);
        self.stage.camera_mut().update(delta, audio);
        self.world.update_world(&mut self.stage, delta, audio);
        self.stage
            .pulse(audio.map(|frame| frame.energy.total).unwrap_or(0.0));
        if let Some(frame) = audio {
            self.world.handle_audio_event(&mut self.stage, frame);
        }
        self.frames += 1;
        Ok(())
    }

    /// Submits the current frame through the engine. Loading scenes submit
    /// nothing.
    pub fn render(&mut self, engine: &mut RenderEngine) -> Result<()> {
        if self.state == SceneState::Disposed {
            return Err(self.disposed());
        }
        if !self.is_ready() {
            return Ok(());
        }
        engine.render(self.submission())
    }

    /// The frame `render` would submit.
    pub fn submission(&self) -> FrameSubmission {
        let aspect = match self.viewport {
            (w, h) if w > 0 && h > 0 => w as f32 / h as f32,
            _ => DEFAULT_ASPECT,
        };
        let quality = self.stage.quality();
        FrameSubmission {
            camera: self.stage.camera().view(aspect),
            draws: self.stage.draw_items(),
            lights: self.stage.light_count(),
            shadow_map_size: self.stage.lit_shadow_map_size(),
            post_processing: quality.post_processing && self.stage.world_config().post_processing,
        }
    }

    /// Dispatched synchronously from the input layer, outside the frame.
    pub fn handle_interaction(&mut self, event: &InteractionEvent) -> Result<()> {
        match self.state {
            SceneState::Disposed => return Err(self.disposed()),
            SceneState::Playing | SceneState::Paused => {}
            _ => return Ok(()),
        }
        let camera = self.stage.camera_mut();
        camera.notify_interaction(event.kind.tag());
        if let Some(payload) = &event.payload {
            camera.notify_interaction(payload.clone());
        }
        self.world.handle_interaction(&mut self.stage, event);
        Ok(())
    }

    /// Local self-throttle, run from the scene's adaptation timer.
    pub fn adapt_to_performance(&mut self, fps: f32) -> Result<Option<QualityStep>> {
        match self.state {
            SceneState::Disposed => Err(self.disposed()),
            SceneState::Playing | SceneState::Paused => Ok(self.stage.adapt_to_performance(fps)),
            _ => Ok(None),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.state == SceneState::Disposed {
            return Err(self.disposed());
        }
        self.viewport = (width, height);
        Ok(())
    }

    /// Releases the world's and the stage's resources and cancels every
    /// scheduler registration. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.state == SceneState::Disposed {
            return;
        }
        if self.state != SceneState::Constructed {
            self.world.dispose_world(&mut self.stage);
        }
        self.stage.release_all();
        for id in [self.frame_callback.take(), self.adaptation_timer.take()]
            .into_iter()
            .flatten()
        {
            self.scheduler.cancel(id);
        }
        self.state = SceneState::Disposed;
        info!(world = %self.kind(), frames = self.frames, "scene disposed");
    }

    fn owner(&self) -> String {
        format!("scene:{}", self.kind())
    }

    fn disposed(&self) -> CinesonicError {
        CinesonicError::SceneDisposed(self.kind().to_string())
    }
}

impl Drop for Scene {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("world", &self.kind())
            .field("state", &self.state)
            .field("frames", &self.frames)
            .field("stage", &self.stage)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use super::*;
    use crate::{
        cues::RecordingCueSink,
        quality::{quality_channel, QualityWriter},
        QualitySettings, QualityTier,
    };

    /// A stage on its own ledger, for driving worlds directly.
    pub(crate) fn stage(kind: WorldKind, tier: QualityTier) -> (Stage, QualityWriter, RecordingCueSink) {
        let (writer, reader) = quality_channel(QualitySettings::for_tier(tier));
        let sink = RecordingCueSink::new();
        let mut stage = Stage::new(
            kind,
            SceneConfig::default(),
            reader,
            ResourceTracker::new(),
            Cues::new(Arc::new(sink.clone())),
        );
        stage.sync_quality();
        (stage, writer, sink)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        quality::{quality_channel, QualityWriter},
        BandEnergy, QualitySettings, QualityTier,
    };

    /// Records the order of calls and loads over two polls.
    struct ProbeWorld {
        log: Arc<Mutex<Vec<&'static str>>>,
        polls: usize,
        disposed: Arc<AtomicUsize>,
        pillar: Option<MeshHandle>,
    }

    impl World for ProbeWorld {
        fn kind(&self) -> WorldKind {
            WorldKind::Cadence
        }

        fn initialize_world(&mut self, stage: &mut Stage) -> LoadStatus {
            self.polls += 1;
            if self.polls < 2 {
                return LoadStatus::Pending;
            }
            self.pillar = Some(stage.add_mesh(MeshDesc::new("pillar", 64)));
            stage.create_particle_system("motes", ParticleConfig::new(500, MovementArchetype::ErraticJitter));
            stage.setup_lighting(LightingDescription::new(Vec3::ONE, 0.3));
            LoadStatus::Ready
        }

        fn update_world(&mut self, stage: &mut Stage, _delta: f32, _audio: Option<&AudioAnalysisFrame>) {
            let scale = self.pillar.and_then(|h| stage.mesh(h)).map(|m| m.scale);
            self.log.lock().push(if scale == Some(1.0) { "update:unpulsed" } else { "update:pulsed" });
        }

        fn handle_interaction(&mut self, _stage: &mut Stage, _event: &InteractionEvent) {
            self.log.lock().push("interaction");
        }

        fn handle_audio_event(&mut self, stage: &mut Stage, _audio: &AudioAnalysisFrame) {
            let scale = self.pillar.and_then(|h| stage.mesh(h)).map(|m| m.scale);
            self.log.lock().push(if scale > Some(1.0) { "audio:pulsed" } else { "audio:unpulsed" });
        }

        fn dispose_world(&mut self, _stage: &mut Stage) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        scene: Scene,
        scheduler: FrameScheduler,
        resources: ResourceTracker,
        log: Arc<Mutex<Vec<&'static str>>>,
        disposed: Arc<AtomicUsize>,
        _writer: QualityWriter,
    }

    fn fixture() -> Fixture {
        let (writer, reader) = quality_channel(QualitySettings::for_tier(QualityTier::High));
        let scheduler = FrameScheduler::new();
        let resources = ResourceTracker::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let disposed = Arc::new(AtomicUsize::new(0));
        let world = ProbeWorld {
            log: log.clone(),
            polls: 0,
            disposed: disposed.clone(),
            pillar: None,
        };
        let scene = Scene::new(
            Box::new(world),
            SceneContext {
                config: SceneConfig::default(),
                quality: reader,
                resources: resources.clone(),
                scheduler: scheduler.clone(),
                cues: Cues::silent(),
            },
        );
        Fixture {
            scene,
            scheduler,
            resources,
            log,
            disposed,
            _writer: writer,
        }
    }

    #[test]
    fn staged_initialisation_gates_updates() {
        let mut f = fixture();
        let loud = AudioAnalysisFrame::from_energy(BandEnergy::flat(1.0), true);

        assert_eq!(f.scene.initialize(0.0).ok(), Some(LoadStatus::Pending));
        assert!(f.scene.is_loading());
        assert!(f.scene.update(0.016, Some(&loud)).is_ok());
        assert!(f.log.lock().is_empty());
        assert!(f.scene.submission().draws.is_empty());

        assert_eq!(f.scene.initialize(0.0).ok(), Some(LoadStatus::Ready));
        assert_eq!(f.scene.state(), SceneState::Playing);
        assert_eq!(f.scheduler.registrations_for("scene:cadence"), 2);
    }

    #[test]
    fn frame_order_pulses_between_update_and_audio_event() {
        let mut f = fixture();
        f.scene.initialize(0.0).ok();
        f.scene.initialize(0.0).ok();
        let loud = AudioAnalysisFrame::from_energy(BandEnergy::flat(1.0), false);
        f.scene.update(0.016, Some(&loud)).ok();
        assert_eq!(*f.log.lock(), vec!["update:unpulsed", "audio:pulsed"]);
    }

    #[test]
    fn stop_pauses_without_releasing() {
        let mut f = fixture();
        f.scene.initialize(0.0).ok();
        f.scene.initialize(0.0).ok();
        let live = f.resources.live_count();
        assert!(f.scene.stop().is_ok());
        f.scene.update(0.016, None).ok();
        assert!(f.log.lock().is_empty());
        assert_eq!(f.resources.live_count(), live);
        assert!(f.scene.start().is_ok());
        f.scene.update(0.016, None).ok();
        assert_eq!(f.log.lock().len(), 1);
    }

    #[test]
    fn stop_before_ready_comes_up_paused() {
        let mut f = fixture();
        f.scene.stop().ok();
        f.scene.initialize(0.0).ok();
        f.scene.initialize(0.0).ok();
        assert_eq!(f.scene.state(), SceneState::Paused);
    }

    #[test]
    fn dispose_is_idempotent_and_releases_everything() {
        let mut f = fixture();
        f.scene.initialize(0.0).ok();
        f.scene.initialize(0.0).ok();
        assert_eq!(f.resources.live_count(), 3);

        f.scene.dispose();
        f.scene.dispose();
        assert_eq!(f.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(f.resources.live_count(), 0);
        assert_eq!(f.scheduler.active_registrations(), 0);
        assert!(matches!(
            f.scene.update(0.016, None),
            Err(CinesonicError::SceneDisposed(_))
        ));
        assert!(f.scene.handle_interaction(&InteractionEvent::new(InteractionKind::Click)).is_err());
        assert!(f.scene.start().is_err());
    }

    #[test]
    fn interactions_reach_world_and_camera() {
        let mut f = fixture();
        f.scene.initialize(0.0).ok();
        f.scene.initialize(0.0).ok();
        let event = InteractionEvent::new(InteractionKind::Gesture).with_payload("calm");
        assert!(f.scene.handle_interaction(&event).is_ok());
        assert_eq!(*f.log.lock(), vec!["interaction"]);
    }

    #[test]
    fn submission_reflects_stage_content() {
        let mut f = fixture();
        f.scene.initialize(0.0).ok();
        f.scene.initialize(0.0).ok();
        f.scene.resize(800, 400).ok();
        let frame = f.scene.submission();
        assert_eq!(frame.draws.len(), 2);
        assert_eq!(frame.lights, 2);
        assert_eq!(frame.shadow_map_size, 2048);
        assert_eq!(frame.camera.aspect, 2.0);
    }

    #[test]
    fn interaction_events_use_type_on_the_wire() {
        let event = InteractionEvent::new(InteractionKind::Scroll).with_intensity(0.4);
        let json = serde_json::to_string(&event).unwrap_or_default();
        assert!(json.contains("\"type\":\"scroll\""), "{json}");
    }
}
