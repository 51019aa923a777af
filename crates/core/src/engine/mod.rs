//! The render engine: sole owner of the rendering context.
//!
//! The engine probes the surface once, keeps the renderer configured for the
//! current quality settings, runs the per-frame telemetry loop and enforces
//! the memory and draw-call budgets. A missing GPU is reported through the
//! boolean returned by [`RenderEngine::initialize`]; renderer failures are
//! logged and turned into downgrade requests.

pub mod backend;
pub mod capability;
pub mod headless;
pub mod resources;
pub mod shader;
pub mod telemetry;
pub mod world_config;

use crate::{
    config::EngineConfig,
    timeline::{CallbackId, FrameScheduler},
    CinesonicError, QualityReader, QualitySettings, QualityStep, QualityTier, Result,
};

pub use backend::{
    CameraView, ColorSpace, DrawItem, DrawKind, FrameSubmission, RenderBackend, RenderCounters,
    RendererSettings, ShadowMode, ToneMapping,
};
pub use capability::CapabilityProfile;
pub use headless::{HeadlessBackend, HeadlessControls};
pub use resources::{ResourceId, ResourceKind, ResourceRecord, ResourceTracker};
pub use shader::{inspect_shader, ShaderRejection, ShaderStage};
pub use telemetry::{FrameTelemetry, PerformanceMetrics};
pub use world_config::{WorldConfig, WorldKind};

const ENGINE_OWNER: &str = "engine";
const GUARD_REQUEST_SPACING_SECS: f64 = 1.0;
const BUDGET_WARNING_SPACING_SECS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Unsupported,
    Ready,
    Disposed,
}

pub struct RenderEngine {
    config: EngineConfig,
    scheduler: FrameScheduler,
    quality: QualityReader,
    resources: ResourceTracker,
    backend: Option<Box<dyn RenderBackend>>,
    capabilities: Option<CapabilityProfile>,
    telemetry: FrameTelemetry,
    state: EngineState,
    frame_callback: Option<CallbackId>,
    renderer: Option<RendererSettings>,
    applied_revision: Option<u64>,
    emergency_low: bool,
    last_guard_request: Option<f64>,
    last_budget_warning: Option<f64>,
    viewport: (u32, u32),
}

impl RenderEngine {
    pub fn new(config: EngineConfig, scheduler: FrameScheduler, quality: QualityReader) -> Self {
        let telemetry = FrameTelemetry::new(config.telemetry_window, config.target_fps);
        Self {
            config,
            scheduler,
            quality,
            resources: ResourceTracker::new(),
            backend: None,
            capabilities: None,
            telemetry,
            state: EngineState::Uninitialized,
            frame_callback: None,
            renderer: None,
            applied_revision: None,
            emergency_low: false,
            last_guard_request: None,
            last_budget_warning: None,
            viewport: (0, 0),
        }
    }

    /// Probes the surface and, when a rendering context is available,
    /// configures the renderer and registers the telemetry loop. Returns
    /// `false` when the host must fall back to a non-3D presentation.
    pub fn initialize(&mut self, mut backend: Box<dyn RenderBackend>) -> bool {
        match self.state {
            EngineState::Ready => return true,
            EngineState::Disposed => {
                tracing::warn!("initialize called on a disposed engine");
                return false;
            }
            EngineState::Uninitialized | EngineState::Unsupported => {}
        }

        let profile = match backend.probe() {
            Some(profile) if profile.rendering_context => profile,
            _ => {
                tracing::warn!(backend = backend.name(), "no rendering context available");
                self.state = EngineState::Unsupported;
                return false;
            }
        };

        tracing::info!(
            backend = backend.name(),
            renderer = %profile.renderer_name,
            max_texture = profile.max_texture_size,
            tier = %profile.initial_tier(),
            "rendering context ready"
        );

        self.capabilities = Some(profile);
        self.backend = Some(backend);
        self.state = EngineState::Ready;
        self.sync_quality();
        self.frame_callback = Some(self.scheduler.request_animation_frame(ENGINE_OWNER));
        true
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == EngineState::Ready
    }

    pub fn capabilities(&self) -> Option<&CapabilityProfile> {
        self.capabilities.as_ref()
    }

    /// Tier this device should start at, if it was probed successfully.
    pub fn recommended_tier(&self) -> Option<QualityTier> {
        self.capabilities.as_ref().map(CapabilityProfile::initial_tier)
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.telemetry.metrics()
    }

    pub fn renderer_settings(&self) -> Option<RendererSettings> {
        self.renderer
    }

    pub fn resources(&self) -> ResourceTracker {
        self.resources.clone()
    }

    pub fn quality(&self) -> QualityReader {
        self.quality.clone()
    }

    pub fn frame_callback(&self) -> Option<CallbackId> {
        self.frame_callback
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True while the memory guard holds the renderer at low-tier settings.
    pub fn memory_emergency(&self) -> bool {
        self.emergency_low
    }

    /// Static shader check. Never fails loudly; rejections are logged.
    pub fn validate_shader(&self, source: &str, stage: ShaderStage) -> bool {
        match inspect_shader(source, stage, self.config.max_shader_length) {
            Ok(()) => true,
            Err(reason) => {
                tracing::warn!(%stage, %reason, "shader rejected before compilation");
                false
            }
        }
    }

    /// Validates and then compiles a shader on the backend.
    pub fn compile_shader(&mut self, source: &str, stage: ShaderStage) -> bool {
        if !self.validate_shader(source, stage) {
            return false;
        }
        let Some(backend) = self.backend.as_mut() else {
            return false;
        };
        match backend.compile_shader(source, stage) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(%stage, error = %err, "shader compilation failed");
                false
            }
        }
    }

    /// Telemetry loop body, run once per animation frame.
    pub fn on_frame(&mut self, now: f64) {
        if !self.is_ready() {
            return;
        }
        self.telemetry.record_frame(now);
        self.sync_quality();
        self.publish_metrics(now);
        self.guard_memory(now);
    }

    /// Compares live FPS with the target and asks the quality owner for a
    /// single step down (below 80%) or up (above 120%). The renderer follows
    /// once the new tier is published.
    pub fn adjust_quality(&mut self, target_fps: f32) -> Option<QualityStep> {
        if !self.is_ready() || target_fps <= 0.0 {
            return None;
        }
        let fps = self.telemetry.fps();
        let tier = self.quality.tier();
        let step = if fps < target_fps * 0.8 && tier != QualityTier::Low {
            QualityStep::Down
        } else if fps > target_fps * 1.2 && tier != QualityTier::High {
            QualityStep::Up
        } else {
            return None;
        };
        tracing::debug!(fps, target_fps, ?step, "engine quality adjustment");
        self.quality.request(step, "engine.adjust_quality");
        self.sync_quality();
        Some(step)
    }

    /// Budget for a world at the tier currently in force.
    pub fn world_config(&self, world: WorldKind) -> WorldConfig {
        let tier = if self.emergency_low {
            QualityTier::Low
        } else {
            self.quality.tier()
        };
        WorldConfig::derive(world, tier)
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        if let Some(backend) = self.backend.as_mut() {
            backend.resize(width, height);
        }
    }

    /// Submits a frame. Fails only when the engine is not initialised;
    /// renderer errors are absorbed and turned into a downgrade request.
    pub fn render(&mut self, mut frame: FrameSubmission) -> Result<()> {
        if !self.is_ready() {
            return Err(CinesonicError::EngineNotInitialized);
        }
        self.sync_quality();

        let budget = self.config.draw_call_budget as usize;
        if frame.draws.len() > budget {
            self.warn_budget(frame.draws.len());
            frame.draws.truncate(budget);
        }
        if let Some(renderer) = self.renderer {
            if renderer.shadow_mode == ShadowMode::Disabled {
                frame.shadow_map_size = 0;
                for draw in &mut frame.draws {
                    draw.casts_shadow = false;
                }
            } else {
                frame.shadow_map_size = frame.shadow_map_size.min(renderer.shadow_map_size);
            }
            frame.post_processing &= renderer.post_processing;
        }

        let Some(backend) = self.backend.as_mut() else {
            return Err(CinesonicError::EngineNotInitialized);
        };
        if let Err(err) = backend.submit(&frame) {
            tracing::warn!(error = %err, "frame submission failed; requesting downgrade");
            self.quality.request(QualityStep::Down, "engine.render");
        }
        Ok(())
    }

    /// Cancels the telemetry loop, releases every tracked resource and the
    /// context. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.state == EngineState::Disposed {
            return;
        }
        if let Some(id) = self.frame_callback.take() {
            self.scheduler.cancel(id);
        }
        let leaked = self.resources.release_all();
        if !leaked.is_empty() {
            tracing::warn!(count = leaked.len(), "engine released resources nobody freed");
        }
        if let Some(mut backend) = self.backend.take() {
            backend.release();
        }
        self.renderer = None;
        self.state = EngineState::Disposed;
        tracing::info!("render engine disposed");
    }

    fn publish_metrics(&mut self, now: f64) {
        let counters = self
            .backend
            .as_ref()
            .map(|backend| backend.counters())
            .unwrap_or_default();
        self.telemetry
            .publish(now, &counters, self.resources.total_bytes());
    }

    fn guard_memory(&mut self, now: f64) {
        let ceiling = self.config.memory_ceiling_bytes;
        let estimate = self.telemetry.metrics().memory_bytes;

        if estimate <= ceiling {
            if self.emergency_low && estimate < ceiling / 10 * 9 {
                tracing::info!("memory back under budget; lifting renderer override");
                self.emergency_low = false;
                self.applied_revision = None;
                self.sync_quality();
            }
            return;
        }

        let freed = self
            .backend
            .as_mut()
            .map(|backend| backend.flush_resources())
            .unwrap_or(0);
        self.publish_metrics(now);
        let after = self.telemetry.metrics().memory_bytes;
        tracing::debug!(estimate, freed, after, "memory guard flushed render lists");
        if after <= ceiling {
            return;
        }

        if !self.emergency_low {
            tracing::warn!(after, ceiling, "memory over budget; forcing low renderer settings");
            self.emergency_low = true;
            self.applied_revision = None;
            self.sync_quality();
        }
        // The renderer is at low from here on. The shared tier only moves one
        // step per monitor window, so it reaches low over several windows.
        let due = self
            .last_guard_request
            .map(|last| now - last >= GUARD_REQUEST_SPACING_SECS)
            .unwrap_or(true);
        if due {
            self.quality.request(QualityStep::Down, "engine.memory_guard");
            self.last_guard_request = Some(now);
        }
    }

    /// Reconfigures the renderer when the shared settings changed.
    fn sync_quality(&mut self) {
        let revision = self.quality.revision();
        if self.applied_revision == Some(revision) {
            return;
        }
        let mut quality = self.quality.snapshot();
        if self.emergency_low {
            quality = emergency_settings(&quality);
        }
        let settings = RendererSettings::from_quality(
            &quality,
            self.config.device_pixel_ratio,
            self.config.pixel_ratio_caps,
            self.config.tone_mapping_exposure,
        );

        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        match backend.configure(&settings) {
            Ok(()) => {
                if self.renderer.map(|r| r.shadow_mode) != Some(settings.shadow_mode) {
                    tracing::debug!(tier = %quality.tier, shadow_mode = ?settings.shadow_mode, "renderer reconfigured");
                }
                self.renderer = Some(settings);
                self.applied_revision = Some(revision);
            }
            Err(err) => {
                tracing::warn!(error = %err, "renderer configuration failed; requesting downgrade");
                self.quality.request(QualityStep::Down, "engine.configure");
                self.applied_revision = Some(revision);
            }
        }
    }

    fn warn_budget(&mut self, draws: usize) {
        let now = self.telemetry.metrics().timestamp;
        let due = self
            .last_budget_warning
            .map(|last| now - last >= BUDGET_WARNING_SPACING_SECS)
            .unwrap_or(true);
        if due {
            tracing::warn!(
                draws,
                budget = self.config.draw_call_budget,
                "draw calls over budget; truncating frame"
            );
            self.quality.request(QualityStep::Down, "engine.draw_budget");
            self.last_budget_warning = Some(now);
        }
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("state", &self.state)
            .field("capabilities", &self.capabilities)
            .field("renderer", &self.renderer)
            .field("emergency_low", &self.emergency_low)
            .field("metrics", &self.telemetry.metrics())
            .finish()
    }
}

fn emergency_settings(current: &QualitySettings) -> QualitySettings {
    let low = QualitySettings::for_tier(QualityTier::Low);
    QualitySettings {
        render_scale: low.render_scale.min(current.render_scale),
        max_particles: low.max_particles.min(current.max_particles),
        ..low
    }
}
