use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{info, info_span, warn};

use crate::{
    compute::ComputeDevice,
    config::RenderConfig,
    export::Exporter,
    foundation::{
        core::{FrameIndex, JuliaParam},
        error::{FractalError, FractalResult},
    },
    frame::{Frame, FrameState},
    palette::ColorPalette,
};

/// A frame that dropped out of the pipeline, and why.
#[derive(Debug)]
pub struct FrameFailure {
    pub index: FrameIndex,
    pub error: FractalError,
}

#[derive(Debug, Default)]
pub struct ExportReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<FrameFailure>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Bound,
    CoordinatesReady,
    Computed,
    Resident,
    Exported,
}

/// Frames of one animation, advanced phase by phase in lockstep.
///
/// Every phase ends with a full queue drain, so frame kernels never race coordinate
/// generation, readbacks never race kernels and export never races readbacks.
pub struct AnimationSequence<'d, D: ComputeDevice> {
    device: &'d D,
    program: D::Program,
    shared: D::Shared,
    frames: Vec<Frame<D>>,
    failures: Vec<FrameFailure>,
    phase: Phase,
}

impl<'d, D: ComputeDevice> AnimationSequence<'d, D> {
    /// Allocates and clears every frame, compiles `program_source` and binds each frame to the
    /// shared coordinate/palette buffers and its own parameter.
    pub fn new(
        device: &'d D,
        cfg: &RenderConfig,
        palette: &ColorPalette,
        program_source: &str,
    ) -> FractalResult<Self> {
        let _span = info_span!("build_sequence", frames = cfg.frames, size = cfg.size).entered();

        let mut frames = Vec::with_capacity(cfg.frames as usize);
        for i in 0..cfg.frames {
            let mut frame = Frame::create(device, FrameIndex(i), cfg.size, cfg.sweep.param(i))?;
            frame.fill(device, cfg.background)?;
            frames.push(frame);
        }

        let program = device.compile(program_source)?;
        let shared = device.create_shared(&program, &cfg.field_spec(), palette)?;

        let mut failures = Vec::new();
        for frame in &mut frames {
            if let Err(error) = frame.bind(device, &program, &shared, cfg.max_iterations) {
                warn!(frame = frame.index().0, %error, "bind failed");
                frame.mark_failed();
                failures.push(FrameFailure {
                    index: frame.index(),
                    error,
                });
            }
        }

        info!(
            frames = frames.len(),
            device = %device.info().name,
            "sequence bound"
        );
        Ok(Self {
            device,
            program,
            shared,
            frames,
            failures,
            phase: Phase::Bound,
        })
    }

    pub fn device(&self) -> &'d D {
        self.device
    }

    pub fn program(&self) -> &D::Program {
        &self.program
    }

    /// Coordinate and palette buffers, read-only for every frame.
    pub fn shared(&self) -> &D::Shared {
        &self.shared
    }

    pub fn frames(&self) -> &[Frame<D>] {
        &self.frames
    }

    pub fn failures(&self) -> &[FrameFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<FrameFailure> {
        self.failures
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn params(&self) -> Vec<JuliaParam> {
        self.frames.iter().map(Frame::param).collect()
    }

    fn expect_phase(&self, want: Phase, op: &str) -> FractalResult<()> {
        if self.phase == want {
            Ok(())
        } else {
            Err(FractalError::lifecycle(format!(
                "cannot {op} in phase {:?} (expected {want:?})",
                self.phase
            )))
        }
    }

    fn record(&mut self, idx: usize, error: FractalError, what: &str) {
        let frame = &mut self.frames[idx];
        warn!(frame = frame.index().0, %error, "{what} failed");
        frame.mark_failed();
        self.failures.push(FrameFailure {
            index: frame.index(),
            error,
        });
    }

    /// Enqueues both coordinate kernels, then drains the queue.
    pub fn generate_coordinates(&mut self) -> FractalResult<()> {
        self.expect_phase(Phase::Bound, "generate coordinates")?;
        let _span = info_span!("coordinates").entered();
        self.device.enqueue_coordinates(&self.program, &self.shared)?;
        self.device.finish()?;
        self.phase = Phase::CoordinatesReady;
        Ok(())
    }

    /// Dispatches every bound frame, then drains the queue.
    pub fn compute(&mut self) -> FractalResult<()> {
        self.expect_phase(Phase::CoordinatesReady, "compute frames")?;
        let _span = info_span!("compute").entered();
        for idx in 0..self.frames.len() {
            if self.frames[idx].state() != FrameState::Bound {
                continue;
            }
            if let Err(e) = self.frames[idx].dispatch(self.device) {
                self.record(idx, e, "dispatch");
            }
        }
        self.device.finish()?;
        self.phase = Phase::Computed;
        Ok(())
    }

    /// Enqueues every readback, drains the queue, then moves pixels into host buffers.
    pub fn read_back(&mut self) -> FractalResult<()> {
        self.expect_phase(Phase::Computed, "read back frames")?;
        let _span = info_span!("readback").entered();
        for idx in 0..self.frames.len() {
            if self.frames[idx].state() != FrameState::Dispatched {
                continue;
            }
            if let Err(e) = self.frames[idx].readback(self.device) {
                self.record(idx, e, "readback");
            }
        }
        self.device.finish()?;
        for idx in 0..self.frames.len() {
            if self.frames[idx].state() != FrameState::ReadbackQueued {
                continue;
            }
            if let Err(e) = self.frames[idx].resolve(self.device) {
                self.record(idx, e, "readback");
            }
        }
        self.phase = Phase::Resident;
        Ok(())
    }

    /// The three device phases, in order. A barrier failure stops at that phase.
    pub fn render(&mut self) -> FractalResult<()> {
        self.generate_coordinates()?;
        self.compute()?;
        self.read_back()
    }

    /// Writes every resident frame. Frames are encoded in parallel; a failure only affects its
    /// own frame and is reported in the returned [`ExportReport`].
    pub fn export(&mut self, exporter: &Exporter) -> FractalResult<ExportReport> {
        self.expect_phase(Phase::Resident, "export frames")?;
        let _span = info_span!("export", dir = %exporter.dir().display()).entered();
        exporter.ensure_dir()?;

        let jobs: Vec<(usize, FrameIndex, u32, &[u8])> = self
            .frames
            .iter()
            .enumerate()
            .filter_map(|(idx, f)| f.pixels().ok().map(|px| (idx, f.index(), f.size(), px)))
            .collect();

        let results: Vec<(usize, FractalResult<PathBuf>)> = jobs
            .into_par_iter()
            .map(|(idx, index, size, px)| (idx, exporter.write(index, size, px)))
            .collect();

        let mut report = ExportReport::default();
        for (idx, result) in results {
            let frame = &mut self.frames[idx];
            match result {
                Ok(path) => {
                    frame.mark_exported()?;
                    info!(frame = frame.index().0, path = %path.display(), "wrote frame");
                    report.written.push(path);
                }
                Err(error) => {
                    warn!(frame = frame.index().0, %error, "export failed");
                    report.failures.push(FrameFailure {
                        index: frame.index(),
                        error,
                    });
                }
            }
        }

        self.phase = Phase::Exported;
        Ok(report)
    }
}
