use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use julia_anim::{
    BackendKind, CpuDevice, ExportFormat, FractalError, RenderConfig, RunReport, VideoOutcome,
    render_animation,
};

const BUILD_LOG_PATH: &str = "kernel_build_log.txt";

#[derive(Parser, Debug)]
#[command(name = "julia-anim", version, about = "Render an animated Julia-set sweep")]
struct Cli {
    /// JSON run configuration; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frame side in pixels.
    #[arg(long)]
    size: Option<u32>,

    /// Number of frames (1 renders a still image).
    #[arg(long)]
    frames: Option<u32>,

    /// Palette image; its first row is the color map.
    #[arg(long)]
    palette: Option<PathBuf>,

    #[arg(long)]
    max_iterations: Option<u32>,

    /// Device program (WGSL) to use instead of the built-in one.
    #[arg(long)]
    kernel: Option<PathBuf>,

    /// Output directory for the numbered frames.
    #[arg(long)]
    out_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    format: Option<FormatChoice>,

    /// Compute backend.
    #[arg(long, value_enum, default_value_t = BackendKind::default())]
    backend: BackendKind,

    /// Platform index (wgpu backend group) when more than one is present.
    #[arg(long)]
    platform: Option<usize>,

    /// Device index on the chosen platform when more than one is present.
    #[arg(long)]
    device: Option<usize>,

    /// Assemble the frames into a video afterwards (requires `ffmpeg` on PATH).
    #[arg(long)]
    video: bool,

    /// Video output path.
    #[arg(long)]
    video_out: Option<PathBuf>,

    #[arg(long)]
    fps: Option<u32>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Png,
    Ppm,
}

impl Cli {
    fn resolve_config(&self) -> anyhow::Result<RenderConfig> {
        let mut cfg = match &self.config {
            Some(path) => RenderConfig::from_json_file(path)?,
            None => RenderConfig::default(),
        };
        if let Some(v) = self.size {
            cfg.size = v;
        }
        if let Some(v) = self.frames {
            cfg.frames = v;
        }
        if let Some(v) = &self.palette {
            cfg.palette = v.clone();
        }
        if let Some(v) = self.max_iterations {
            cfg.max_iterations = v;
        }
        if let Some(v) = &self.kernel {
            cfg.kernel = Some(v.clone());
        }
        if let Some(v) = &self.out_dir {
            cfg.out_dir = v.clone();
        }
        if let Some(v) = self.format {
            cfg.format = match v {
                FormatChoice::Png => ExportFormat::Png,
                FormatChoice::Ppm => ExportFormat::Ppm,
            };
        }
        if self.platform.is_some() {
            cfg.device.platform = self.platform;
        }
        if self.device.is_some() {
            cfg.device.device = self.device;
        }
        if self.video {
            cfg.video.enabled = true;
        }
        if let Some(v) = &self.video_out {
            cfg.video.out_path = v.clone();
        }
        if let Some(v) = self.fps {
            cfg.video.fps = v;
        }
        Ok(cfg)
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(report) => {
            print_summary(&report);
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            if let Some(FractalError::BuildFailure { log }) = err.downcast_ref::<FractalError>() {
                match std::fs::write(BUILD_LOG_PATH, log) {
                    Ok(()) => eprintln!("build log written to {BUILD_LOG_PATH}"),
                    Err(e) => eprintln!("could not write {BUILD_LOG_PATH}: {e}"),
                }
            }
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<RunReport> {
    let cfg = cli.resolve_config()?;
    let report = match cli.backend {
        BackendKind::Cpu => render_animation(&cfg, || Ok(CpuDevice::new()))?,
        BackendKind::Gpu => render_gpu(&cfg)?,
    };
    Ok(report)
}

#[cfg(feature = "gpu")]
fn render_gpu(cfg: &RenderConfig) -> Result<RunReport, FractalError> {
    render_animation(cfg, || julia_anim::ComputeSession::acquire(&cfg.device))
}

#[cfg(not(feature = "gpu"))]
fn render_gpu(_cfg: &RenderConfig) -> Result<RunReport, FractalError> {
    BackendKind::Gpu.ensure_available()?;
    Err(FractalError::platform_unavailable("gpu backend is not compiled in"))
}

fn print_summary(report: &RunReport) {
    eprintln!("wrote {} frame(s)", report.exported.len());
    for f in report.frame_failures.iter().chain(&report.export_failures) {
        eprintln!("frame {}: {}", f.index.0, f.error);
    }
    match &report.video {
        VideoOutcome::Skipped => {}
        VideoOutcome::Written(path) => eprintln!("wrote {}", path.display()),
        VideoOutcome::Failed(e) => eprintln!("video: {e}"),
    }
}
