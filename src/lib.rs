//! Animated Julia-set frame synthesis on a compute device.
//!
//! A run turns a [`RenderConfig`] into a directory of numbered frames (and optionally a video):
//!
//! 1. **Prepare**: validate the config, decode the [`ColorPalette`], load the device program.
//! 2. **Acquire**: open one [`ComputeDevice`] (the wgpu [`ComputeSession`] or the host
//!    [`CpuDevice`]).
//! 3. **Render**: [`AnimationSequence`] clears and binds every frame, generates the shared
//!    coordinate axes, dispatches one kernel per frame and reads the pixels back, with a full
//!    queue drain between phases.
//! 4. **Export**: frames are written as `F%04d.png` / `F%04d.ppm`; [`VideoAssembler`] can then
//!    hand the sequence to `ffmpeg`.
//!
//! [`render_animation`] drives all of the above.
#![forbid(unsafe_code)]

mod foundation {
    pub mod core;
    pub mod error;
}

pub mod compute;
pub mod compute_cpu;
#[cfg(feature = "gpu")]
pub mod compute_gpu;
pub mod config;
pub mod coords;
pub mod encode_ffmpeg;
pub mod export;
pub mod frame;
pub mod kernel;
pub mod palette;
pub mod pipeline;
pub mod sequence;

pub use compute::{
    BackendKind, ComputeDevice, DeviceInfo, DeviceSelector, select_device, select_platform,
};
pub use compute_cpu::CpuDevice;
#[cfg(feature = "gpu")]
pub use compute_gpu::ComputeSession;
pub use config::{RenderConfig, SweepConfig, VideoConfig, ViewConfig};
pub use coords::{CoordinateField, CoordinateSample, FieldSpec};
pub use encode_ffmpeg::{VideoAssembler, ensure_parent_dir, is_program_on_path};
pub use export::{ExportFormat, Exporter, encode_ppm, frame_file_name};
pub use foundation::core::{FrameIndex, JuliaParam, Rgba8, rgba_len};
pub use foundation::error::{FractalError, FractalResult};
pub use frame::{Frame, FrameState};
pub use kernel::{DEFAULT_PROGRAM, FrameUniform, read_program};
pub use palette::ColorPalette;
pub use pipeline::{RunReport, VideoOutcome, render_animation};
pub use sequence::{AnimationSequence, ExportReport, FrameFailure, Phase};
