//! Core library for the Cinesonic runtime.
//!
//! An audio-reactive 3D presentation runtime: a capability-aware render
//! engine, a closed-loop performance monitor, a scene framework that themed
//! worlds plug into and a cinematic camera. Rendering goes through the
//! [`engine::RenderBackend`] trait, so the whole stack also runs headless.
//! Each module owns one subsystem; [`runtime::Runtime`] wires them together
//! for a host.

pub mod analysis;
pub mod audio;
pub mod camera;
pub mod config;
pub mod cues;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod quality;
pub mod runtime;
pub mod scene;
pub mod timeline;

pub use analysis::{AnalysisSummary, FrameAnalyzer};
pub use audio::{AudioAnalysisFrame, AudioGate, BandEnergy};
pub use camera::{CameraConfig, CameraMode, CinematicController, EmotionalPreset, Sequence, Shot, Trigger};
pub use config::{AudioConfig, EngineConfig, MonitorConfig, RuntimeConfig, SceneConfig};
pub use cues::{CuePayload, CueSink, Cues, RecordingCueSink};
pub use engine::{
    CapabilityProfile, HeadlessBackend, PerformanceMetrics, RenderBackend, RenderEngine,
    ShaderStage, WorldConfig, WorldKind,
};
pub use error::{CinesonicError, Result};
pub use monitor::{PerformanceExport, PerformanceMonitor, PerformanceSummary};
pub use quality::{
    quality_channel, QualityReader, QualitySettings, QualityStep, QualityTier, QualityWriter,
    ShadowTier,
};
pub use runtime::{Presentation, Runtime, TickReport};
pub use scene::{InteractionEvent, InteractionKind, Scene, SceneContext, SceneState, World};
pub use timeline::{CallbackId, FrameScheduler};
