use anyhow::{Context, Result};
use carousel_core::headless::{HeadlessBackend, HeadlessReport};
use carousel_core::{
    AnimationCategory, AnimationGroupConfig, AtlasDescriptor, CarouselConfig, RuntimeContext,
    SlideState, SliderInstance, SliderStats,
};
use carousel_resources::{Filter, FilterDiagnostics, FilterKind, ResourceStats, ShaderPoolStats};
use carousel_scheduler::ThrottleStrategy;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "carousel-cli")]
#[command(about = "Carousel runtime CLI")]
pub struct Cli {
    /// Log debug output to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a headless slider session and print a JSON report.
    Simulate(SimulateArgs),
    /// Parse an atlas JSON file and resolve frame names.
    Atlas {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Frame name to resolve; repeatable.
        #[arg(long = "frame", value_name = "NAME")]
        frames: Vec<String>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Args)]
struct SimulateArgs {
    #[arg(long, default_value_t = 10)]
    slides: usize,
    /// Navigation steps, one slide forward each.
    #[arg(long, default_value_t = 5)]
    steps: usize,
    /// TOML configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
    #[arg(long)]
    radius: Option<usize>,
    #[arg(long)]
    fps: Option<f64>,
    /// fixed-fps, adaptive, priority or none.
    #[arg(long)]
    strategy: Option<String>,
}

#[derive(Debug, Serialize)]
struct StepReport {
    step: usize,
    active: usize,
    entered: Vec<usize>,
    left: Vec<usize>,
    evicted: usize,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    slides: usize,
    radius: usize,
    steps: Vec<StepReport>,
    mounted: SliderStats,
    diagnostics: FilterDiagnostics,
    unmounted: ResourceStats,
    shader_pool: ShaderPoolStats,
    backend: HeadlessReport,
}

#[derive(Debug, Serialize)]
struct FrameOutput {
    query: String,
    key: Option<String>,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    rotated: bool,
}

#[derive(Debug, Serialize)]
struct AtlasOutput {
    path: String,
    image: String,
    scale: f64,
    frame_count: usize,
    frames: Vec<FrameOutput>,
}

const VERTEX_SOURCE: &str = "attribute vec2 aPosition; void main() { gl_Position = vec4(aPosition, 0.0, 1.0); }";
const DISPLACEMENT_SOURCE: &str =
    "uniform sampler2D uMap; uniform vec2 uScale; void main() { gl_FragColor = texture2D(uMap, vec2(0.0)); }";

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Simulate(args) => run_simulate(&args),
        Commands::Atlas { file, frames } => run_atlas(&file, &frames),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(args: &SimulateArgs) -> Result<CarouselConfig> {
    let mut config =
        CarouselConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(radius) = args.radius {
        config.window.radius = radius;
    }
    if let Some(fps) = args.fps {
        config.throttle.target_fps = fps;
    }
    if let Some(name) = &args.strategy {
        config.throttle.strategy = ThrottleStrategy::parse(name)
            .with_context(|| format!("unknown throttle strategy {name:?}"))?;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn run_simulate(args: &SimulateArgs) -> Result<()> {
    if args.slides == 0 {
        anyhow::bail!("--slides must be >= 1");
    }
    let config = load_config(args)?;
    let radius = config.window.radius;

    let backend = HeadlessBackend::new();
    let engine = Arc::new(backend.engine());
    let context = RuntimeContext::new(config);
    let slider = context.mount(args.slides, 0, engine.clone(), Arc::new(backend.loader()));

    let start = Instant::now();
    let frame_interval = Duration::from_millis(20);
    populate_window(&slider, &backend);

    let mut steps = Vec::with_capacity(args.steps);
    for step in 1..=args.steps {
        let active = step % args.slides;
        let navigation = slider.navigate(active as isize);

        let animations = slider.animations();
        animations.queue_animation_group(
            AnimationGroupConfig::new(format!("transition-{step}"), AnimationCategory::Transition)
                .with_animation(backend.tween())
                .with_animation(backend.tween()),
        );
        animations.queue_animation_group(
            AnimationGroupConfig::new(format!("caption-{step}"), AnimationCategory::Text)
                .with_animation(backend.tween()),
        );
        populate_window(&slider, &backend);

        let now = start + frame_interval * u32::try_from(step).unwrap_or(u32::MAX);
        slider.frame(now);
        engine.complete_all();

        steps.push(StepReport {
            step,
            active,
            entered: navigation.delta.entered,
            left: navigation.delta.left,
            evicted: navigation.evicted.len(),
        });
    }

    let mounted = slider.stats();
    let diagnostics = slider.resources().run_filter_diagnostics();
    slider.unmount();

    let report = SimulationReport {
        slides: args.slides,
        radius,
        steps,
        mounted,
        diagnostics,
        unmounted: slider.resources().stats(),
        shader_pool: context.shaders().stats(),
        backend: backend.snapshot(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Give every slide in the extended window a sprite with two filters
fn populate_window(slider: &SliderInstance, backend: &HeadlessBackend) {
    let pending = slider.with_window(|window| window.slides_to_initialize());
    for index in pending {
        let Some(sprite) = slider.register_slide(index, backend.sprite(), SlideState::Loaded) else {
            continue;
        };
        let filters: Vec<Arc<dyn Filter>> = vec![
            Arc::new(
                backend
                    .filter(FilterKind::Displacement)
                    .with_sources(VERTEX_SOURCE, DISPLACEMENT_SOURCE),
            ),
            Arc::new(backend.filter(FilterKind::Blur).with_shader_key("slide-blur").with_quality(2.0)),
        ];
        let ids = slider.resources().track_filter_batch(filters);
        slider.resources().attach_filters(sprite, &ids);
    }
}

fn run_atlas(file: &Path, frames: &[String]) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("file does not exist: {}", file.display());
    }
    let json = fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let atlas = AtlasDescriptor::parse(&json).context("failed to parse atlas")?;

    let frames = frames
        .iter()
        .map(|query| match atlas.find_frame(query) {
            Some((key, data)) => FrameOutput {
                query: query.clone(),
                key: Some(key.to_string()),
                x: data.frame.x,
                y: data.frame.y,
                width: data.frame.w,
                height: data.frame.h,
                rotated: data.rotated,
            },
            None => FrameOutput {
                query: query.clone(),
                key: None,
                x: 0,
                y: 0,
                width: 0,
                height: 0,
                rotated: false,
            },
        })
        .collect();

    let payload = AtlasOutput {
        path: file.display().to_string(),
        image: atlas.meta.image.clone(),
        scale: atlas.meta.scale,
        frame_count: atlas.frames.len(),
        frames,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_simulate_flags() {
        let cli = Cli::parse_from([
            "carousel-cli",
            "--verbose",
            "simulate",
            "--slides",
            "20",
            "--strategy",
            "adaptive",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.slides, 20);
                assert_eq!(args.steps, 5);
                assert_eq!(args.strategy.as_deref(), Some("adaptive"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_populate_window_tracks_filters() {
        let backend = HeadlessBackend::new();
        let context = RuntimeContext::default();
        let slider = context.mount(10, 0, Arc::new(backend.engine()), Arc::new(backend.loader()));
        populate_window(&slider, &backend);

        // Extended window of slide 0 moving forward: 0..=3
        let stats = slider.resources().stats();
        assert_eq!(stats.display_objects, 4);
        assert_eq!(stats.filters, 8);
        assert_eq!(context.shaders().instance_count("slide-blur"), 4);
    }
}
