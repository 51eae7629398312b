use crate::{
    coords::FieldSpec,
    foundation::{
        core::{JuliaParam, Rgba8},
        error::{FractalError, FractalResult},
    },
    palette::ColorPalette,
};

/// What a device reports about itself after acquisition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub platform: String,
    pub name: String,
    pub device_type: String,
}

/// One in-order command queue against one accelerator.
///
/// Every `enqueue_*`/`dispatch` call only records work; [`ComputeDevice::finish`] is the
/// synchronization barrier after which all previously recorded work has completed.
pub trait ComputeDevice {
    type Program;
    type Surface;
    type Shared;
    type Binding;

    fn info(&self) -> &DeviceInfo;

    fn compile(&self, source: &str) -> FractalResult<Self::Program>;

    /// Square RGBA8 surface plus the staging needed to read it back.
    fn create_surface(&self, size: u32) -> FractalResult<Self::Surface>;

    /// Clears `surface` to `color`, ordered before any work enqueued afterwards.
    fn fill(&self, surface: &Self::Surface, color: Rgba8) -> FractalResult<()>;

    /// Coordinate buffers (unpopulated) and the palette buffer, shared read-only by all frames.
    fn create_shared(
        &self,
        program: &Self::Program,
        field: &FieldSpec,
        palette: &ColorPalette,
    ) -> FractalResult<Self::Shared>;

    fn write_palette(&self, shared: &Self::Shared, palette: &ColorPalette) -> FractalResult<()>;

    fn enqueue_coordinates(
        &self,
        program: &Self::Program,
        shared: &Self::Shared,
    ) -> FractalResult<()>;

    fn bind(
        &self,
        program: &Self::Program,
        surface: &Self::Surface,
        shared: &Self::Shared,
        param: JuliaParam,
        max_iterations: u32,
    ) -> FractalResult<Self::Binding>;

    fn dispatch(&self, binding: &Self::Binding) -> FractalResult<()>;

    fn enqueue_readback(&self, surface: &Self::Surface) -> FractalResult<()>;

    /// Full queue drain.
    fn finish(&self) -> FractalResult<()>;

    /// Copies a completed readback into `out`, resized to `size * size * 4` bytes.
    fn read_pixels(&self, surface: &Self::Surface, out: &mut Vec<u8>) -> FractalResult<()>;
}

/// Pre-resolved platform/device choice. `None` picks the first entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DeviceSelector {
    pub platform: Option<usize>,
    pub device: Option<usize>,
}

/// Resolves a platform choice. A single platform is taken regardless of the request.
pub fn select_platform(available: usize, requested: Option<usize>) -> FractalResult<usize> {
    if available == 1 {
        return Ok(0);
    }
    select_index(available, requested, "platform")
}

/// Resolves a device choice; an out-of-range index is an error even with one device.
pub fn select_device(available: usize, requested: Option<usize>) -> FractalResult<usize> {
    select_index(available, requested, "device")
}

fn select_index(available: usize, requested: Option<usize>, what: &str) -> FractalResult<usize> {
    match (available, requested) {
        (0, _) => Err(FractalError::device_unavailable(format!("no {what} found"))),
        (_, None) => Ok(0),
        (n, Some(i)) if i < n => Ok(i),
        (n, Some(i)) => Err(FractalError::device_unavailable(format!(
            "{what} index {i} requested but only {n} available"
        ))),
    }
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cpu,
    Gpu,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "gpu") {
            Self::Gpu
        } else {
            Self::Cpu
        }
    }
}

impl BackendKind {
    pub fn is_available(self) -> bool {
        match self {
            Self::Cpu => true,
            Self::Gpu => cfg!(feature = "gpu"),
        }
    }

    pub fn ensure_available(self) -> FractalResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(FractalError::platform_unavailable(
                "gpu backend requested but this build was compiled without the `gpu` feature",
            ))
        }
    }
}
