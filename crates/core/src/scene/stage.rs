use tracing::debug;

use super::{
    lighting::{LightingDescription, LightingRig},
    mesh::{AnimationMixer, Mesh, MeshDesc, MeshHandle},
    particles::{ParticleConfig, ParticleHandle, ParticleSystem},
};
use crate::{
    camera::{CameraConfig, CinematicController},
    config::SceneConfig,
    cues::Cues,
    engine::{DrawItem, DrawKind, ResourceTracker, WorldConfig, WorldKind},
    timeline::SceneClock,
    QualityReader, QualitySettings, QualityStep,
};

const MIN_PARTICLE_SCALE: f32 = 0.1;
const MIN_SHADOW_MAP: u32 = 256;
const MAX_SHADOW_MAP: u32 = 2048;

/// Shared services a world builds on: camera, clock, lights, particle
/// systems, meshes, the audio-reactive registry and local quality.
///
/// Global quality comes from the shared reader and is never written here.
/// Local adaptation only narrows it further.
pub struct Stage {
    kind: WorldKind,
    config: SceneConfig,
    quality: QualityReader,
    applied_revision: Option<u64>,
    global: QualitySettings,
    world: WorldConfig,
    particle_scale: f32,
    shadow_cap: u32,
    resources: ResourceTracker,
    camera: CinematicController,
    clock: SceneClock,
    cues: Cues,
    lighting: Option<LightingRig>,
    particles: Vec<ParticleSystem>,
    meshes: Vec<Mesh>,
    mixers: Vec<AnimationMixer>,
    rng: fastrand::Rng,
    local_downgrades: u32,
    local_upgrades: u32,
}

impl Stage {
    pub(crate) fn new(
        kind: WorldKind,
        config: SceneConfig,
        quality: QualityReader,
        resources: ResourceTracker,
        cues: Cues,
    ) -> Self {
        let global = quality.snapshot();
        let camera = CinematicController::new(CameraConfig::default(), &config, cues.clone());
        let rng = fastrand::Rng::with_seed(config.seed ^ kind as u64);
        Self {
            kind,
            world: WorldConfig::derive(kind, global.tier),
            global,
            quality,
            applied_revision: None,
            particle_scale: 1.0,
            shadow_cap: MAX_SHADOW_MAP,
            resources,
            camera,
            clock: SceneClock::default(),
            cues,
            lighting: None,
            particles: Vec::new(),
            meshes: Vec::new(),
            mixers: Vec::new(),
            rng,
            config,
            local_downgrades: 0,
            local_upgrades: 0,
        }
    }

    pub fn kind(&self) -> WorldKind {
        self.kind
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn world_config(&self) -> &WorldConfig {
        &self.world
    }

    /// Global settings as of the last sync.
    pub fn quality(&self) -> &QualitySettings {
        &self.global
    }

    /// Local particle multiplier in `[0.1, 1.0]`.
    pub fn particle_scale(&self) -> f32 {
        self.particle_scale
    }

    pub fn camera(&self) -> &CinematicController {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut CinematicController {
        &mut self.camera
    }

    pub fn elapsed(&self) -> f64 {
        self.clock.elapsed()
    }

    /// Length of the current frame in seconds.
    pub fn delta(&self) -> f32 {
        self.clock.delta()
    }

    pub fn cues(&self) -> &Cues {
        &self.cues
    }

    pub fn rng(&mut self) -> &mut fastrand::Rng {
        &mut self.rng
    }

    pub fn resources(&self) -> &ResourceTracker {
        &self.resources
    }

    /// Files a one-shot downgrade with the quality owner.
    pub fn request_quality_downgrade(&self, source: &str) {
        self.quality.request(QualityStep::Down, source);
    }

    pub fn setup_lighting(&mut self, description: LightingDescription) {
        if let Some(mut old) = self.lighting.take() {
            old.release(&self.resources);
        }
        let size = self.shadow_map_size();
        self.lighting = Some(LightingRig::build(description, size, &self.resources));
    }

    pub fn lighting(&self) -> Option<&LightingRig> {
        self.lighting.as_ref()
    }

    pub fn lighting_mut(&mut self) -> Option<&mut LightingDescription> {
        self.lighting.as_mut().map(|rig| &mut rig.description)
    }

    /// Allocates a point cloud sized to the current budget and registers it
    /// for quality-driven draw-range changes.
    pub fn create_particle_system(&mut self, name: &str, config: ParticleConfig) -> ParticleHandle {
        let handle = ParticleHandle(self.particles.len());
        let requested = self
            .particles
            .iter()
            .map(|p| u64::from(p.config().count))
            .sum::<u64>()
            + u64::from(config.count);
        let initial = self.budget_for(config.count, requested);
        let mut system = ParticleSystem::allocate(
            name.to_string(),
            config,
            initial,
            &self.resources,
            &mut self.rng,
        );
        system.set_visible(self.world.particles);
        self.particles.push(system);
        self.apply_particle_budgets();
        handle
    }

    pub fn particles(&self, handle: ParticleHandle) -> Option<&ParticleSystem> {
        self.particles.get(handle.0)
    }

    pub fn particles_mut(&mut self, handle: ParticleHandle) -> Option<&mut ParticleSystem> {
        self.particles.get_mut(handle.0)
    }

    pub fn particle_systems(&self) -> impl Iterator<Item = &ParticleSystem> {
        self.particles.iter()
    }

    /// Moves one particle system with the stage's random source.
    pub fn step_particles(
        &mut self,
        handle: ParticleHandle,
        delta: f32,
        energy: f32,
        velocity_scale: f32,
    ) {
        if let Some(system) = self.particles.get_mut(handle.0) {
            system.step(delta, energy, velocity_scale, &mut self.rng);
        }
    }

    pub fn add_mesh(&mut self, desc: MeshDesc) -> MeshHandle {
        let handle = MeshHandle(self.meshes.len());
        self.meshes.push(Mesh::allocate(desc, &self.resources));
        handle
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(handle.0)
    }

    pub fn mesh_mut(&mut self, handle: MeshHandle) -> Option<&mut Mesh> {
        self.meshes.get_mut(handle.0)
    }

    pub fn meshes(&self) -> impl Iterator<Item = &Mesh> {
        self.meshes.iter()
    }

    /// Removes a mesh from the audio-reactive pulse and restores its scale.
    pub fn opt_out_of_pulse(&mut self, handle: MeshHandle) {
        if let Some(mesh) = self.meshes.get_mut(handle.0) {
            mesh.audio_reactive = false;
            mesh.scale = mesh.base_scale;
        }
    }

    pub fn register_audio_reactive(&mut self, handle: MeshHandle) {
        if let Some(mesh) = self.meshes.get_mut(handle.0) {
            mesh.audio_reactive = true;
        }
    }

    pub fn add_mixer(&mut self, mixer: AnimationMixer) {
        self.mixers.push(mixer);
    }

    pub fn mixer(&self, name: &str) -> Option<&AnimationMixer> {
        self.mixers.iter().find(|m| m.name == name)
    }

    pub fn mixer_mut(&mut self, name: &str) -> Option<&mut AnimationMixer> {
        self.mixers.iter_mut().find(|m| m.name == name)
    }

    pub fn shadow_map_size(&self) -> u32 {
        if !self.world.shadows {
            return 0;
        }
        self.global.shadows.map_size().min(self.shadow_cap)
    }

    pub fn local_downgrades(&self) -> u32 {
        self.local_downgrades
    }

    pub fn local_upgrades(&self) -> u32 {
        self.local_upgrades
    }

    /// Shrinks particle draw ranges and the shadow map one notch.
    pub fn downgrade_quality(&mut self) {
        self.particle_scale = (self.particle_scale * 0.7).max(MIN_PARTICLE_SCALE);
        let current = self.shadow_map_size().min(self.shadow_cap);
        self.shadow_cap = if current / 2 < MIN_SHADOW_MAP { 0 } else { current / 2 };
        self.local_downgrades += 1;
        debug!(world = %self.kind, scale = self.particle_scale, shadow_cap = self.shadow_cap, "scene downgrade");
        self.apply_local_limits();
    }

    /// Grows particle draw ranges and the shadow map one notch, never past
    /// what the global settings allow.
    pub fn upgrade_quality(&mut self) {
        let grown = self.particle_scale * 1.2;
        self.particle_scale = if grown > 0.99 { 1.0 } else { grown };
        self.shadow_cap = match self.shadow_cap {
            0 => MIN_SHADOW_MAP,
            cap => (cap * 2).min(MAX_SHADOW_MAP),
        };
        self.local_upgrades += 1;
        debug!(world = %self.kind, scale = self.particle_scale, shadow_cap = self.shadow_cap, "scene upgrade");
        self.apply_local_limits();
    }

    fn at_local_maximum(&self) -> bool {
        self.particle_scale >= 1.0 && self.shadow_cap >= MAX_SHADOW_MAP
    }

    /// Once-per-second self-throttle against the world's own FPS target.
    pub(crate) fn adapt_to_performance(&mut self, fps: f32) -> Option<QualityStep> {
        let budget_bytes = f64::from(self.world.memory_budget_mb) * 1024.0 * 1024.0;
        if self.resources.total_bytes() as f64 > budget_bytes {
            self.request_quality_downgrade("scene.memory");
            self.downgrade_quality();
            return Some(QualityStep::Down);
        }
        let target = self.world.target_fps;
        if fps < target * self.config.downgrade_ratio {
            self.downgrade_quality();
            Some(QualityStep::Down)
        } else if fps > target * self.config.upgrade_ratio && !self.at_local_maximum() {
            self.upgrade_quality();
            Some(QualityStep::Up)
        } else {
            None
        }
    }

    /// Picks up a new global quality revision. Returns true on change.
    pub(crate) fn sync_quality(&mut self) -> bool {
        let revision = self.quality.revision();
        if self.applied_revision == Some(revision) {
            return false;
        }
        self.applied_revision = Some(revision);
        self.global = self.quality.snapshot();
        self.world = WorldConfig::derive(self.kind, self.global.tier);
        for system in &mut self.particles {
            system.set_visible(self.world.particles);
        }
        self.apply_local_limits();
        true
    }

    pub(crate) fn advance_clock(&mut self, delta: f32) -> f32 {
        self.clock.advance(delta)
    }

    pub(crate) fn update_mixers(&mut self, delta: f32) {
        for mixer in &mut self.mixers {
            mixer.update(delta);
        }
    }

    /// Uniform scale pulse on every registered mesh.
    pub(crate) fn pulse(&mut self, energy: f32) {
        let gain = self.config.audio_pulse_gain;
        for mesh in self.meshes.iter_mut().filter(|m| m.audio_reactive) {
            mesh.scale = mesh.base_scale * (1.0 + energy * gain);
        }
    }

    pub(crate) fn draw_items(&self) -> Vec<DrawItem> {
        let meshes = self
            .meshes
            .iter()
            .filter(|m| m.visible && m.resource.is_some())
            .map(Mesh::draw_item);
        let points = self
            .particles
            .iter()
            .filter(|p| p.draw_range() > 0)
            .map(|p| DrawItem {
                label: p.name().to_string(),
                kind: DrawKind::Points {
                    count: p.draw_range(),
                },
                resource: p.resource(),
                casts_shadow: false,
            });
        meshes.chain(points).collect()
    }

    pub(crate) fn light_count(&self) -> u32 {
        self.lighting.as_ref().map(LightingRig::light_count).unwrap_or(0)
    }

    pub(crate) fn lit_shadow_map_size(&self) -> u32 {
        self.lighting
            .as_ref()
            .map(LightingRig::shadow_map_size)
            .unwrap_or(0)
    }

    pub(crate) fn release_all(&mut self) {
        for system in &mut self.particles {
            system.release(&self.resources);
        }
        for mesh in &mut self.meshes {
            mesh.release(&self.resources);
        }
        if let Some(lighting) = self.lighting.as_mut() {
            lighting.release(&self.resources);
        }
        self.particles.clear();
        self.meshes.clear();
        self.mixers.clear();
        self.lighting = None;
    }

    fn apply_local_limits(&mut self) {
        self.apply_particle_budgets();
        let size = self.shadow_map_size();
        if let Some(lighting) = self.lighting.as_mut() {
            lighting.set_shadow_map_size(size, &self.resources);
        }
    }

    /// Splits the global particle ceiling across systems in proportion to
    /// what each asked for, then applies the local scale.
    fn apply_particle_budgets(&mut self) {
        let requested: u64 = self.particles.iter().map(|p| u64::from(p.config().count)).sum();
        let budgets: Vec<u32> = self
            .particles
            .iter()
            .map(|p| self.budget_for(p.config().count, requested))
            .collect();
        for (system, budget) in self.particles.iter_mut().zip(budgets) {
            system.apply_budget(budget, &self.resources, &mut self.rng);
        }
    }

    fn budget_for(&self, count: u32, requested: u64) -> u32 {
        let ceiling = u64::from(self.global.max_particles);
        let share = if requested > ceiling {
            u64::from(count) * ceiling / requested
        } else {
            u64::from(count)
        };
        (share as f32 * self.particle_scale).round() as u32
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("kind", &self.kind)
            .field("world", &self.world)
            .field("particle_scale", &self.particle_scale)
            .field("shadow_cap", &self.shadow_cap)
            .field("particles", &self.particles.len())
            .field("meshes", &self.meshes.len())
            .finish()
    }
}
