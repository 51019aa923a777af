use std::{
    f32::consts::TAU,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand, ValueEnum};
use cinesonic_core::{
    cues::TracingCueSink, engine::inspect_shader, CapabilityProfile, CinesonicError, Cues,
    FrameAnalyzer, HeadlessBackend, InteractionEvent, InteractionKind, Presentation, Runtime,
    RuntimeConfig, ShaderStage, WorldKind,
};
use tracing_subscriber::EnvFilter;

const VIEWPORT: (u32, u32) = (1920, 1080);
/// Memory injected by `--stress`, above the default critical threshold.
const STRESS_BYTES: u64 = 220 * 1024 * 1024;

fn main() -> cinesonic_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            world,
            seconds,
            fps,
            config,
            export,
            no_gpu,
            stress,
            mood,
        } => run_world(RunOptions {
            world,
            seconds,
            fps,
            config,
            export,
            no_gpu,
            stress,
            mood,
        }),
        Commands::Probe { device } => run_probe(device),
        Commands::ValidateShader { file, stage } => run_validate(&file, stage.into()),
    }
}

struct RunOptions {
    world: String,
    seconds: f64,
    fps: f64,
    config: Option<PathBuf>,
    export: Option<PathBuf>,
    no_gpu: bool,
    stress: bool,
    mood: Option<String>,
}

fn run_world(options: RunOptions) -> cinesonic_core::Result<()> {
    let world: WorldKind = options.world.parse()?;
    if options.fps <= 0.0 || options.seconds <= 0.0 {
        return Err(CinesonicError::InvalidInput("fps and seconds must be positive"));
    }
    let config = match &options.config {
        Some(path) => RuntimeConfig::from_path(path)?,
        None => RuntimeConfig::default(),
    };
    tracing::info!(%world, seconds = options.seconds, fps = options.fps, "starting headless run");

    let backend = if options.no_gpu {
        HeadlessBackend::without_gpu()
    } else {
        HeadlessBackend::new(CapabilityProfile::desktop())
    };
    let controls = backend.controls();
    let mut analyzer = FrameAnalyzer::with_sample_rate(config.audio.sample_rate);
    let signal = SyntheticSignal::new(config.audio.sample_rate, config.audio.block_size);

    let mut runtime = Runtime::launch(
        config,
        world,
        Box::new(backend),
        Cues::new(Arc::new(TracingCueSink)),
        0.0,
    )?;
    if runtime.presentation() == Presentation::Fallback {
        println!("{world}: no rendering context, presenting fallback");
        return Ok(());
    }

    runtime.resize(VIEWPORT.0, VIEWPORT.1)?;
    let mut gesture = InteractionEvent::new(InteractionKind::Gesture);
    if let Some(mood) = &options.mood {
        gesture = gesture.with_payload(mood.clone());
    }
    runtime.interact(&gesture)?;
    if options.stress {
        controls.set_external_bytes(STRESS_BYTES);
    }

    let frames = (options.seconds * options.fps).round() as u64;
    let mut steps = 0u32;
    for i in 1..=frames {
        let now = i as f64 / options.fps;
        let samples = signal.next_block(now);
        let frame = analyzer.process_block(&samples)?;
        let report = runtime.tick(now, Some(frame))?;
        if report.monitor_step.is_some() || report.scene_step.is_some() {
            steps += 1;
        }
    }

    if let Some(scene) = runtime.scene() {
        println!("{world}: {} frames, {}", scene.frames(), scene.world().status());
    }
    if let Some(summary) = runtime.summary() {
        println!(
            "tier {} | {:.1} fps | {:.1} MB | {} alerts | {} quality steps",
            summary.tier, summary.average_fps, summary.memory_mb, summary.active_alerts, steps
        );
        for recommendation in &summary.recommendations {
            println!("  - {recommendation}");
        }
    }
    if let (Some(path), Some(export)) = (&options.export, runtime.export()) {
        std::fs::write(path, export.to_json()?)?;
        tracing::info!(?path, "performance data exported");
    }

    runtime.dispose();
    Ok(())
}

fn run_probe(device: Device) -> cinesonic_core::Result<()> {
    let profile = match device {
        Device::Desktop => CapabilityProfile::desktop(),
        Device::Mobile => CapabilityProfile::mobile(),
    };
    let tier = profile.initial_tier();
    println!("{}", profile.to_json()?);
    println!("initial tier: {tier}");
    Ok(())
}

fn run_validate(file: &Path, stage: ShaderStage) -> cinesonic_core::Result<()> {
    let source = std::fs::read_to_string(file)?;
    let limit = RuntimeConfig::default().engine.max_shader_length;
    match inspect_shader(&source, stage, limit) {
        Ok(()) => {
            println!("{}: ok ({stage})", file.display());
            Ok(())
        }
        Err(reason) => {
            tracing::warn!(?file, %stage, %reason, "shader rejected");
            Err(CinesonicError::msg(format!("{}: rejected: {reason}", file.display())))
        }
    }
}

/// A 120 BPM kick over a slow pad, rendered one block per frame.
struct SyntheticSignal {
    sample_rate: f32,
    block_size: usize,
}

impl SyntheticSignal {
    fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate: sample_rate as f32,
            block_size: block_size.max(2),
        }
    }

    fn next_block(&self, now: f64) -> Vec<f32> {
        let beat = 0.5_f32;
        (0..self.block_size)
            .map(|n| {
                let t = now as f32 + n as f32 / self.sample_rate;
                let since_beat = t % beat;
                let kick = (-since_beat * 30.0).exp() * (TAU * 55.0 * t).sin();
                let swell = 0.5 + 0.5 * (TAU * t / 16.0).sin();
                let pad = 0.15 * swell * (TAU * 220.0 * t).sin();
                let hat = if since_beat > 0.25 && since_beat < 0.27 {
                    0.1 * (TAU * 7_000.0 * t).sin()
                } else {
                    0.0
                };
                (0.8 * kick + pad + hat).clamp(-1.0, 1.0)
            })
            .collect()
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio-reactive cinematic scene runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive a world headlessly with a synthetic audio signal.
    Run {
        /// World to load: reverie, strata, entropy or cadence.
        #[arg(short, long, default_value = "reverie")]
        world: String,
        #[arg(short, long, default_value_t = 10.0)]
        seconds: f64,
        /// Simulated display refresh rate.
        #[arg(short, long, default_value_t = 60.0)]
        fps: f64,
        /// JSON configuration file; missing sections use defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write the performance export to this file.
        #[arg(short, long)]
        export: Option<PathBuf>,
        /// Simulate a surface without a rendering context.
        #[arg(long)]
        no_gpu: bool,
        /// Inject untracked memory to exercise the downgrade path.
        #[arg(long)]
        stress: bool,
        /// Payload sent with the opening gesture (e.g. a mood for reverie).
        #[arg(long)]
        mood: Option<String>,
    },
    /// Print a device capability profile and its starting tier.
    Probe {
        #[arg(value_enum, default_value_t = Device::Desktop)]
        device: Device,
    },
    /// Statically check a shader source file.
    ValidateShader {
        file: PathBuf,
        #[arg(short, long, value_enum)]
        stage: StageArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Device {
    Desktop,
    Mobile,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StageArg {
    Vertex,
    Fragment,
}

impl From<StageArg> for ShaderStage {
    fn from(value: StageArg) -> Self {
        match value {
            StageArg::Vertex => ShaderStage::Vertex,
            StageArg::Fragment => ShaderStage::Fragment,
        }
    }
}
