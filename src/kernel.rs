//! Device program metadata and the host reference of the escape-time kernel.
//!
//! The WGSL in `shaders/julia.wgsl` and [`render_row`] perform the same `f32` arithmetic; the
//! CPU device runs the latter.

use std::path::Path;

use crate::{
    foundation::{
        core::{JuliaParam, Rgba8},
        error::{FractalError, FractalResult},
    },
    palette::ColorPalette,
};

/// Program shipped with the crate, used when no kernel path is configured.
pub const DEFAULT_PROGRAM: &str = include_str!("../shaders/julia.wgsl");

pub const ENTRY_EVEN_RE: &str = "even_re";
pub const ENTRY_EVEN_IM: &str = "even_im";
pub const ENTRY_RENDER: &str = "render_image";
pub const REQUIRED_ENTRY_POINTS: [&str; 3] = [ENTRY_EVEN_RE, ENTRY_EVEN_IM, ENTRY_RENDER];

/// Workgroup edge of `render_image`.
pub const RENDER_WORKGROUP: u32 = 8;
/// Workgroup width of `even_re`/`even_im`.
pub const FIELD_WORKGROUP: u32 = 64;

/// Reads the device program once. Absence is reported as a build failure.
pub fn read_program(path: Option<&Path>) -> FractalResult<String> {
    match path {
        None => Ok(DEFAULT_PROGRAM.to_string()),
        Some(p) => std::fs::read_to_string(p).map_err(|e| {
            FractalError::build_failure(format!(
                "could not read device program '{}': {e}",
                p.display()
            ))
        }),
    }
}

/// Entry points from [`REQUIRED_ENTRY_POINTS`] that `source` does not declare.
pub fn missing_entry_points(source: &str) -> Vec<&'static str> {
    REQUIRED_ENTRY_POINTS
        .iter()
        .copied()
        .filter(|name| !declares_fn(source, name))
        .collect()
}

fn declares_fn(source: &str, name: &str) -> bool {
    source.lines().any(|line| {
        let line = line.trim_start();
        line.strip_prefix("fn ")
            .map(|rest| {
                rest.trim_start()
                    .strip_prefix(name)
                    .is_some_and(|tail| tail.trim_start().starts_with('('))
            })
            .unwrap_or(false)
    })
}

/// Per-frame kernel arguments, shared by both devices.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameUniform {
    pub c_re: f32,
    pub c_im: f32,
    pub size: u32,
    pub max_iterations: u32,
    pub weight_min: f32,
    pub weight_max: f32,
    pub cmap_len: u32,
}

impl FrameUniform {
    pub fn new(param: JuliaParam, size: u32, max_iterations: u32, palette: &ColorPalette) -> Self {
        let (weight_min, weight_max) = palette.domain();
        Self::from_shared(
            param,
            size,
            max_iterations,
            (weight_min as f32, weight_max as f32),
            palette.len() as u32,
        )
    }

    /// Builds the block from what a device already holds: the narrowed weight domain and the
    /// length of its palette buffer.
    pub fn from_shared(
        param: JuliaParam,
        size: u32,
        max_iterations: u32,
        domain: (f32, f32),
        cmap_len: u32,
    ) -> Self {
        let [c_re, c_im] = param.as_f32();
        Self {
            c_re,
            c_im,
            size,
            max_iterations,
            weight_min: domain.0,
            weight_max: domain.1,
            cmap_len,
        }
    }

    /// 32-byte uniform block matching `FrameParams` in the WGSL.
    pub fn to_device_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[0..4].copy_from_slice(&self.c_re.to_le_bytes());
        out[4..8].copy_from_slice(&self.c_im.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out[12..16].copy_from_slice(&self.max_iterations.to_le_bytes());
        out[16..20].copy_from_slice(&self.weight_min.to_le_bytes());
        out[20..24].copy_from_slice(&self.weight_max.to_le_bytes());
        out[24..28].copy_from_slice(&self.cmap_len.to_le_bytes());
        out
    }
}

/// Fraction of the iteration budget spent before `z` escaped the radius-2 disc.
pub fn escape_weight(z_re: f32, z_im: f32, c_re: f32, c_im: f32, max_iterations: u32) -> f32 {
    let (mut zr, mut zi) = (z_re, z_im);
    let mut i = 0u32;
    while i < max_iterations && zr * zr + zi * zi <= 4.0 {
        let t = zr * zr - zi * zi + c_re;
        zi = 2.0 * zr * zi + c_im;
        zr = t;
        i += 1;
    }
    i as f32 / max_iterations as f32
}

/// Clamped palette index in `f32`, mirroring the device lookup.
pub fn device_index(weight: f32, uniform: &FrameUniform) -> usize {
    let span = uniform.weight_max - uniform.weight_min;
    let t = ((weight - uniform.weight_min) / span * uniform.cmap_len as f32).floor();
    (t as i64).clamp(0, i64::from(uniform.cmap_len) - 1) as usize
}

/// Fills one output row (`size * 4` bytes) of the frame at image row `y`.
pub fn render_row(
    row: &mut [u8],
    y: usize,
    re: &[f32],
    im: &[f32],
    cmap: &[Rgba8],
    uniform: &FrameUniform,
) {
    let zi = im[y];
    for (x, px) in row.chunks_exact_mut(4).enumerate() {
        let w = escape_weight(re[x], zi, uniform.c_re, uniform.c_im, uniform.max_iterations);
        px.copy_from_slice(&cmap[device_index(w, uniform)].to_array());
    }
}
