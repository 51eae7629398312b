use std::{cell::RefCell, rc::Rc};

use rayon::prelude::*;
use tracing::trace;

use crate::{
    compute::{ComputeDevice, DeviceInfo},
    coords::FieldSpec,
    foundation::{
        core::{JuliaParam, Rgba8, rgba_len},
        error::{FractalError, FractalResult},
    },
    kernel::{FrameUniform, missing_entry_points, render_row},
    palette::ColorPalette,
};

type Shared<T> = Rc<RefCell<T>>;

/// Host reference device.
///
/// Work is recorded into an in-order queue and only executed by [`ComputeDevice::finish`], so
/// results observed before a barrier are exactly what an accelerator would expose: nothing.
pub struct CpuDevice {
    info: DeviceInfo,
    queue: RefCell<Vec<CpuCommand>>,
}

pub struct CpuProgram {
    _private: (),
}

pub struct CpuSurface {
    size: u32,
    pixels: Shared<Vec<u8>>,
    staging: Shared<Option<Vec<u8>>>,
}

pub struct CpuShared {
    field: FieldSpec,
    domain: (f32, f32),
    re: Shared<Vec<f32>>,
    im: Shared<Vec<f32>>,
    cmap: Shared<Vec<Rgba8>>,
}

#[derive(Clone)]
pub struct CpuBinding {
    uniform: FrameUniform,
    pixels: Shared<Vec<u8>>,
    re: Shared<Vec<f32>>,
    im: Shared<Vec<f32>>,
    cmap: Shared<Vec<Rgba8>>,
}

enum CpuCommand {
    Fill {
        pixels: Shared<Vec<u8>>,
        color: Rgba8,
    },
    WritePalette {
        cmap: Shared<Vec<Rgba8>>,
        colors: Vec<Rgba8>,
    },
    Coordinates {
        field: FieldSpec,
        re: Shared<Vec<f32>>,
        im: Shared<Vec<f32>>,
    },
    Render(CpuBinding),
    CopyToHost {
        pixels: Shared<Vec<u8>>,
        staging: Shared<Option<Vec<u8>>>,
    },
}

impl CpuDevice {
    pub fn new() -> Self {
        Self {
            info: DeviceInfo {
                platform: "host".to_string(),
                name: "cpu reference".to_string(),
                device_type: "cpu".to_string(),
            },
            queue: RefCell::new(Vec::new()),
        }
    }

    /// Commands recorded but not yet drained by a barrier.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    fn enqueue(&self, cmd: CpuCommand) {
        self.queue.borrow_mut().push(cmd);
    }
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeDevice for CpuDevice {
    type Program = CpuProgram;
    type Surface = CpuSurface;
    type Shared = CpuShared;
    type Binding = CpuBinding;

    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn compile(&self, source: &str) -> FractalResult<CpuProgram> {
        let missing = missing_entry_points(source);
        if !missing.is_empty() {
            let log = missing
                .iter()
                .map(|name| format!("error: entry point `{name}` not found"))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(FractalError::build_failure(log));
        }
        Ok(CpuProgram { _private: () })
    }

    fn create_surface(&self, size: u32) -> FractalResult<CpuSurface> {
        if size == 0 {
            return Err(FractalError::allocation("surface size must be non-zero"));
        }
        let len = rgba_len(size)?;
        Ok(CpuSurface {
            size,
            pixels: Rc::new(RefCell::new(vec![0u8; len])),
            staging: Rc::new(RefCell::new(None)),
        })
    }

    fn fill(&self, surface: &CpuSurface, color: Rgba8) -> FractalResult<()> {
        self.enqueue(CpuCommand::Fill {
            pixels: Rc::clone(&surface.pixels),
            color,
        });
        Ok(())
    }

    fn create_shared(
        &self,
        _program: &CpuProgram,
        field: &FieldSpec,
        palette: &ColorPalette,
    ) -> FractalResult<CpuShared> {
        if field.samples == 0 {
            return Err(FractalError::allocation(
                "coordinate buffers need at least one sample",
            ));
        }
        let n = field.samples as usize;
        let (weight_min, weight_max) = palette.domain();
        Ok(CpuShared {
            field: *field,
            domain: (weight_min as f32, weight_max as f32),
            re: Rc::new(RefCell::new(vec![0.0; n])),
            im: Rc::new(RefCell::new(vec![0.0; n])),
            cmap: Rc::new(RefCell::new(palette.colors().to_vec())),
        })
    }

    fn write_palette(&self, shared: &CpuShared, palette: &ColorPalette) -> FractalResult<()> {
        if palette.len() != shared.cmap.borrow().len() {
            return Err(FractalError::validation(format!(
                "palette buffer holds {} colors, got {}",
                shared.cmap.borrow().len(),
                palette.len()
            )));
        }
        self.enqueue(CpuCommand::WritePalette {
            cmap: Rc::clone(&shared.cmap),
            colors: palette.colors().to_vec(),
        });
        Ok(())
    }

    fn enqueue_coordinates(&self, _program: &CpuProgram, shared: &CpuShared) -> FractalResult<()> {
        self.enqueue(CpuCommand::Coordinates {
            field: shared.field,
            re: Rc::clone(&shared.re),
            im: Rc::clone(&shared.im),
        });
        Ok(())
    }

    fn bind(
        &self,
        _program: &CpuProgram,
        surface: &CpuSurface,
        shared: &CpuShared,
        param: JuliaParam,
        max_iterations: u32,
    ) -> FractalResult<CpuBinding> {
        let cmap_len = shared.cmap.borrow().len() as u32;
        Ok(CpuBinding {
            uniform: FrameUniform::from_shared(
                param,
                surface.size,
                max_iterations,
                shared.domain,
                cmap_len,
            ),
            pixels: Rc::clone(&surface.pixels),
            re: Rc::clone(&shared.re),
            im: Rc::clone(&shared.im),
            cmap: Rc::clone(&shared.cmap),
        })
    }

    fn dispatch(&self, binding: &CpuBinding) -> FractalResult<()> {
        let n = binding.re.borrow().len();
        if binding.uniform.size as usize != n {
            return Err(FractalError::dispatch(format!(
                "surface side {} does not match {} coordinate samples",
                binding.uniform.size, n
            )));
        }
        if binding.uniform.max_iterations == 0 {
            return Err(FractalError::dispatch("max_iterations must be non-zero"));
        }
        self.enqueue(CpuCommand::Render(binding.clone()));
        Ok(())
    }

    fn enqueue_readback(&self, surface: &CpuSurface) -> FractalResult<()> {
        self.enqueue(CpuCommand::CopyToHost {
            pixels: Rc::clone(&surface.pixels),
            staging: Rc::clone(&surface.staging),
        });
        Ok(())
    }

    fn finish(&self) -> FractalResult<()> {
        let commands = std::mem::take(&mut *self.queue.borrow_mut());
        trace!(commands = commands.len(), "draining cpu queue");
        for cmd in commands {
            execute(cmd);
        }
        Ok(())
    }

    fn read_pixels(&self, surface: &CpuSurface, out: &mut Vec<u8>) -> FractalResult<()> {
        let staging = surface.staging.borrow();
        let Some(data) = staging.as_ref() else {
            return Err(FractalError::readback(
                "no completed readback for this surface",
            ));
        };
        out.clear();
        out.extend_from_slice(data);
        Ok(())
    }
}

fn execute(cmd: CpuCommand) {
    match cmd {
        CpuCommand::Fill { pixels, color } => {
            let rgba = color.to_array();
            for px in pixels.borrow_mut().chunks_exact_mut(4) {
                px.copy_from_slice(&rgba);
            }
        }
        CpuCommand::WritePalette { cmap, colors } => {
            *cmap.borrow_mut() = colors;
        }
        CpuCommand::Coordinates { field, re, im } => {
            re.borrow_mut().copy_from_slice(field.real().values());
            im.borrow_mut().copy_from_slice(field.imag().values());
        }
        CpuCommand::Render(binding) => {
            let re_guard = binding.re.borrow();
            let im_guard = binding.im.borrow();
            let cmap_guard = binding.cmap.borrow();
            let (re, im, cmap): (&[f32], &[f32], &[Rgba8]) = (&re_guard, &im_guard, &cmap_guard);
            let uniform = binding.uniform;
            let row_bytes = uniform.size as usize * 4;
            binding
                .pixels
                .borrow_mut()
                .par_chunks_exact_mut(row_bytes)
                .enumerate()
                .for_each(|(y, row)| render_row(row, y, re, im, cmap, &uniform));
        }
        CpuCommand::CopyToHost { pixels, staging } => {
            *staging.borrow_mut() = Some(pixels.borrow().clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::DEFAULT_PROGRAM;

    fn palette() -> ColorPalette {
        ColorPalette::from_colors(
            vec![Rgba8::opaque(10, 0, 0), Rgba8::opaque(0, 20, 0)],
            0.0,
            1.0,
        )
        .unwrap()
    }

    fn field(size: u32) -> FieldSpec {
        FieldSpec {
            center_re: 0.0,
            center_im: 0.0,
            zoom: 3.0,
            samples: size,
        }
    }

    #[test]
    fn nothing_is_visible_before_the_barrier() {
        let dev = CpuDevice::new();
        let surface = dev.create_surface(2).unwrap();
        dev.fill(&surface, Rgba8::WHITE).unwrap();
        dev.enqueue_readback(&surface).unwrap();
        assert_eq!(dev.pending(), 2);

        let mut out = Vec::new();
        assert!(dev.read_pixels(&surface, &mut out).is_err());

        dev.finish().unwrap();
        assert_eq!(dev.pending(), 0);
        dev.read_pixels(&surface, &mut out).unwrap();
        assert_eq!(out, vec![255u8; 16]);
    }

    #[test]
    fn compile_reports_missing_entry_points() {
        let dev = CpuDevice::new();
        assert!(dev.compile(DEFAULT_PROGRAM).is_ok());
        let err = dev.compile("fn main() {}").err().unwrap();
        let log = err.build_log().unwrap();
        assert!(log.contains("`even_re`"));
        assert!(log.contains("`render_image`"));
    }

    #[test]
    fn render_uses_coordinates_generated_earlier_in_the_queue() {
        let dev = CpuDevice::new();
        let program = dev.compile(DEFAULT_PROGRAM).unwrap();
        let p = palette();
        let shared = dev.create_shared(&program, &field(4), &p).unwrap();
        let surface = dev.create_surface(4).unwrap();
        let binding = dev
            .bind(&program, &surface, &shared, JuliaParam::new(0.0, 0.0), 32)
            .unwrap();

        dev.enqueue_coordinates(&program, &shared).unwrap();
        dev.dispatch(&binding).unwrap();
        dev.enqueue_readback(&surface).unwrap();
        dev.finish().unwrap();

        let mut out = Vec::new();
        dev.read_pixels(&surface, &mut out).unwrap();
        assert_eq!(out.len(), 64);
        // Corner (-1.5, -1.5) escapes at once; (0, 0) never does.
        assert_eq!(&out[0..4], &[10, 0, 0, 255]);
        let center = (2 * 4 + 2) * 4;
        assert_eq!(&out[center..center + 4], &[0, 20, 0, 255]);
    }

    #[test]
    fn mismatched_surface_is_rejected_at_dispatch() {
        let dev = CpuDevice::new();
        let program = dev.compile(DEFAULT_PROGRAM).unwrap();
        let shared = dev.create_shared(&program, &field(4), &palette()).unwrap();
        let surface = dev.create_surface(8).unwrap();
        let binding = dev
            .bind(&program, &surface, &shared, JuliaParam::new(0.0, 0.0), 32)
            .unwrap();
        let err = dev.dispatch(&binding).unwrap_err();
        assert!(matches!(err, FractalError::DispatchFailure(_)));
        assert_eq!(dev.pending(), 0);
    }

    #[test]
    fn palette_length_is_fixed_by_the_buffer() {
        let dev = CpuDevice::new();
        let program = dev.compile(DEFAULT_PROGRAM).unwrap();
        let shared = dev.create_shared(&program, &field(2), &palette()).unwrap();
        let three =
            ColorPalette::from_colors(vec![Rgba8::BLACK, Rgba8::BLACK, Rgba8::BLACK], 0.0, 1.0)
                .unwrap();
        assert!(dev.write_palette(&shared, &three).is_err());
    }
}
