use tracing::trace;

use crate::{
    compute::ComputeDevice,
    foundation::{
        core::{FrameIndex, JuliaParam, Rgba8, rgba_len},
        error::{FractalError, FractalResult},
    },
};

/// Where a [`Frame`] is in its lifecycle. Each state only advances to the next one (or to
/// `Failed`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Allocated,
    Filled,
    Bound,
    Dispatched,
    ReadbackQueued,
    Resident,
    Exported,
    Failed,
}

/// One animation frame: a device surface, its bound kernel invocation and, once read back, the
/// host copy of its pixels.
pub struct Frame<D: ComputeDevice> {
    index: FrameIndex,
    size: u32,
    param: JuliaParam,
    state: FrameState,
    surface: D::Surface,
    binding: Option<D::Binding>,
    host: Vec<u8>,
}

impl<D: ComputeDevice> Frame<D> {
    pub fn create(device: &D, index: FrameIndex, size: u32, param: JuliaParam) -> FractalResult<Self> {
        let surface = device.create_surface(size)?;
        let host = Vec::with_capacity(rgba_len(size)?);
        Ok(Self {
            index,
            size,
            param,
            state: FrameState::Allocated,
            surface,
            binding: None,
            host,
        })
    }

    pub fn index(&self) -> FrameIndex {
        self.index
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn param(&self) -> JuliaParam {
        self.param
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    fn require_state(&self, want: FrameState, op: &str) -> FractalResult<()> {
        if self.state == want {
            Ok(())
        } else {
            Err(FractalError::lifecycle(format!(
                "frame {} cannot {op} in state {:?} (expected {want:?})",
                self.index.0, self.state
            )))
        }
    }

    pub fn fill(&mut self, device: &D, color: Rgba8) -> FractalResult<()> {
        self.require_state(FrameState::Allocated, "fill")?;
        device.fill(&self.surface, color)?;
        self.state = FrameState::Filled;
        Ok(())
    }

    pub fn bind(
        &mut self,
        device: &D,
        program: &D::Program,
        shared: &D::Shared,
        max_iterations: u32,
    ) -> FractalResult<()> {
        self.require_state(FrameState::Filled, "bind")?;
        let binding = device.bind(program, &self.surface, shared, self.param, max_iterations)?;
        self.binding = Some(binding);
        self.state = FrameState::Bound;
        Ok(())
    }

    pub fn dispatch(&mut self, device: &D) -> FractalResult<()> {
        self.require_state(FrameState::Bound, "dispatch")?;
        let binding = self
            .binding
            .as_ref()
            .ok_or_else(|| FractalError::lifecycle("bound frame has no binding"))?;
        device.dispatch(binding)?;
        trace!(frame = self.index.0, "dispatched");
        self.state = FrameState::Dispatched;
        Ok(())
    }

    /// Only enqueues the copy; the pixels are valid after the next barrier and
    /// [`Frame::resolve`].
    pub fn readback(&mut self, device: &D) -> FractalResult<()> {
        self.require_state(FrameState::Dispatched, "read back")?;
        device.enqueue_readback(&self.surface)?;
        self.state = FrameState::ReadbackQueued;
        Ok(())
    }

    /// Moves a completed readback into the host buffer. Call after a barrier.
    pub fn resolve(&mut self, device: &D) -> FractalResult<()> {
        self.require_state(FrameState::ReadbackQueued, "resolve readback")?;
        device.read_pixels(&self.surface, &mut self.host)?;
        let want = rgba_len(self.size)?;
        if self.host.len() != want {
            return Err(FractalError::readback(format!(
                "frame {} read back {} bytes, expected {want}",
                self.index.0,
                self.host.len()
            )));
        }
        self.state = FrameState::Resident;
        Ok(())
    }

    /// Host pixels (`size * size * 4`, RGBA8, row-major). Only available once read back.
    pub fn pixels(&self) -> FractalResult<&[u8]> {
        match self.state {
            FrameState::Resident | FrameState::Exported => Ok(&self.host),
            other => Err(FractalError::lifecycle(format!(
                "frame {} has no host pixels in state {other:?}",
                self.index.0
            ))),
        }
    }

    pub fn mark_exported(&mut self) -> FractalResult<()> {
        match self.state {
            FrameState::Resident | FrameState::Exported => {
                self.state = FrameState::Exported;
                Ok(())
            }
            other => Err(FractalError::lifecycle(format!(
                "frame {} cannot be exported in state {other:?}",
                self.index.0
            ))),
        }
    }

    pub fn mark_failed(&mut self) {
        self.state = FrameState::Failed;
        self.binding = None;
    }
}
