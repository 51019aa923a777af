use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    backend::{DrawKind, FrameSubmission, RenderBackend, RenderCounters, RendererSettings},
    capability::CapabilityProfile,
    shader::ShaderStage,
};
use crate::{CinesonicError, Result};

const CACHE_BYTES_PER_DRAW: u64 = 1024;
const CACHE_LIMIT_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Default)]
struct HeadlessState {
    settings: Option<RendererSettings>,
    configure_calls: u32,
    counters: RenderCounters,
    cache_bytes: u64,
    external_bytes: u64,
    submissions: u64,
    pending_failures: u32,
    compiled_shaders: u32,
    viewport: (u32, u32),
    released: bool,
}

/// Shared handle for inspecting and steering a [`HeadlessBackend`] after it
/// has been moved into the engine.
#[derive(Debug, Clone, Default)]
pub struct HeadlessControls {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessControls {
    /// Simulates memory held outside the tracked resources (driver buffers,
    /// other tabs, leaks) that counts toward the memory estimate.
    pub fn set_external_bytes(&self, bytes: u64) {
        self.state.lock().external_bytes = bytes;
    }

    /// Makes the next `count` submissions fail.
    pub fn fail_next_submits(&self, count: u32) {
        self.state.lock().pending_failures = count;
    }

    pub fn settings(&self) -> Option<RendererSettings> {
        self.state.lock().settings
    }

    pub fn configure_calls(&self) -> u32 {
        self.state.lock().configure_calls
    }

    pub fn submissions(&self) -> u64 {
        self.state.lock().submissions
    }

    pub fn compiled_shaders(&self) -> u32 {
        self.state.lock().compiled_shaders
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.state.lock().viewport
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    pub fn last_counters(&self) -> RenderCounters {
        self.state.lock().counters
    }
}

/// Renderer that draws nothing but accounts for everything. Used by the CLI
/// host and the test suite.
#[derive(Debug)]
pub struct HeadlessBackend {
    capabilities: Option<CapabilityProfile>,
    controls: HeadlessControls,
}

impl HeadlessBackend {
    pub fn new(capabilities: CapabilityProfile) -> Self {
        Self {
            capabilities: Some(capabilities),
            controls: HeadlessControls::default(),
        }
    }

    /// A surface that cannot create a rendering context at all.
    pub fn without_gpu() -> Self {
        Self {
            capabilities: None,
            controls: HeadlessControls::default(),
        }
    }

    pub fn controls(&self) -> HeadlessControls {
        self.controls.clone()
    }
}

impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &str {
        "headless"
    }

    fn probe(&mut self) -> Option<CapabilityProfile> {
        self.capabilities.clone()
    }

    fn configure(&mut self, settings: &RendererSettings) -> Result<()> {
        let mut state = self.controls.state.lock();
        if state.released {
            return Err(CinesonicError::backend("context already released"));
        }
        state.settings = Some(*settings);
        state.configure_calls += 1;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.controls.state.lock().viewport = (width, height);
    }

    fn compile_shader(&mut self, _source: &str, _stage: ShaderStage) -> Result<()> {
        self.controls.state.lock().compiled_shaders += 1;
        Ok(())
    }

    fn submit(&mut self, frame: &FrameSubmission) -> Result<()> {
        let mut state = self.controls.state.lock();
        if state.released {
            return Err(CinesonicError::backend("context already released"));
        }
        if state.pending_failures > 0 {
            state.pending_failures -= 1;
            return Err(CinesonicError::backend("simulated context loss"));
        }

        let mut counters = RenderCounters {
            draw_calls: frame.draws.len() as u32,
            ..Default::default()
        };
        for draw in &frame.draws {
            match draw.kind {
                DrawKind::Mesh { triangles } => counters.triangles += triangles as u64,
                DrawKind::Points { count } => counters.points += count as u64,
            }
            if draw.resource.is_some() {
                counters.geometries += 1;
            }
        }
        if frame.shadow_map_size > 0 {
            counters.textures += 1;
        }

        state.cache_bytes = (state.cache_bytes + frame.draws.len() as u64 * CACHE_BYTES_PER_DRAW)
            .min(CACHE_LIMIT_BYTES);
        counters.memory_bytes = state.cache_bytes + state.external_bytes;
        state.counters = counters;
        state.submissions += 1;
        Ok(())
    }

    fn counters(&self) -> RenderCounters {
        let state = self.controls.state.lock();
        RenderCounters {
            memory_bytes: state.cache_bytes + state.external_bytes,
            ..state.counters
        }
    }

    fn flush_resources(&mut self) -> u64 {
        let mut state = self.controls.state.lock();
        std::mem::take(&mut state.cache_bytes)
    }

    fn release(&mut self) {
        let mut state = self.controls.state.lock();
        state.released = true;
        state.cache_bytes = 0;
    }
}
