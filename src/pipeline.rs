use std::path::PathBuf;

use tracing::{info, info_span, warn};

use crate::{
    compute::ComputeDevice,
    config::RenderConfig,
    encode_ffmpeg::VideoAssembler,
    export::Exporter,
    foundation::error::{FractalError, FractalResult},
    kernel::read_program,
    palette::ColorPalette,
    sequence::{AnimationSequence, FrameFailure},
};

#[derive(Debug, Default)]
pub enum VideoOutcome {
    #[default]
    Skipped,
    Written(PathBuf),
    Failed(FractalError),
}

/// What a finished run produced. Frames on disk stay valid whatever else failed.
#[derive(Debug, Default)]
pub struct RunReport {
    pub exported: Vec<PathBuf>,
    pub frame_failures: Vec<FrameFailure>,
    pub export_failures: Vec<FrameFailure>,
    pub video: VideoOutcome,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.frame_failures.is_empty()
            && self.export_failures.is_empty()
            && !matches!(self.video, VideoOutcome::Failed(_))
    }

    pub fn failed_frames(&self) -> usize {
        self.frame_failures.len() + self.export_failures.len()
    }
}

/// Runs one animation end to end.
///
/// Config validation, palette decode and program loading all happen before `acquire` is called,
/// so a bad input never touches the device. Device, build and barrier errors abort the run;
/// per-frame failures end up in the returned [`RunReport`].
pub fn render_animation<D, F>(cfg: &RenderConfig, acquire: F) -> FractalResult<RunReport>
where
    D: ComputeDevice,
    F: FnOnce() -> FractalResult<D>,
{
    cfg.validate()?;
    let palette = ColorPalette::load_path(&cfg.palette, cfg.weight_min, cfg.weight_max)?;
    let source = read_program(cfg.kernel.as_deref())?;

    let assembler = cfg.video.enabled.then(|| VideoAssembler::from_config(&cfg.video));
    if let Some(a) = &assembler {
        a.validate()?;
    }

    let device = acquire()?;
    let info = device.info();
    info!(
        platform = %info.platform,
        device = %info.name,
        kind = %info.device_type,
        frames = cfg.frames,
        size = cfg.size,
        "starting run"
    );

    let mut seq = AnimationSequence::new(&device, cfg, &palette, &source)?;
    seq.render()?;

    let exporter = Exporter::new(&cfg.out_dir, cfg.format);
    let export = seq.export(&exporter)?;

    let mut report = RunReport {
        exported: export.written,
        export_failures: export.failures,
        ..RunReport::default()
    };
    report.frame_failures = seq.into_failures();

    if let Some(a) = assembler {
        if report.exported.is_empty() {
            warn!("no frames exported; skipping video assembly");
        } else {
            let _span = info_span!("video", out = %a.out_path.display()).entered();
            report.video = match a.assemble(&exporter.file_pattern()) {
                Ok(()) => VideoOutcome::Written(a.out_path.clone()),
                Err(e) => {
                    warn!(error = %e, "video assembly failed; exported frames are kept");
                    VideoOutcome::Failed(e)
                }
            };
        }
    }

    info!(
        exported = report.exported.len(),
        failed = report.failed_frames(),
        "run finished"
    );
    Ok(report)
}
