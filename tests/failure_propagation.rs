use std::{
    cell::Cell,
    path::{Path, PathBuf},
};

use julia_anim::{
    ColorPalette, ComputeDevice, CpuDevice, DeviceInfo, FieldSpec, FractalError, FractalResult,
    FrameIndex, JuliaParam, RenderConfig, Rgba8, VideoConfig, VideoOutcome, render_animation,
    compute_cpu::{CpuBinding, CpuProgram, CpuShared, CpuSurface},
};

/// CPU device that fails selected dispatches or barriers.
struct FlakyDevice {
    inner: CpuDevice,
    fail_dispatch: Option<usize>,
    fail_barrier: Option<usize>,
    dispatches: Cell<usize>,
    barriers: Cell<usize>,
}

impl FlakyDevice {
    fn new() -> Self {
        Self {
            inner: CpuDevice::new(),
            fail_dispatch: None,
            fail_barrier: None,
            dispatches: Cell::new(0),
            barriers: Cell::new(0),
        }
    }
}

impl ComputeDevice for FlakyDevice {
    type Program = CpuProgram;
    type Surface = CpuSurface;
    type Shared = CpuShared;
    type Binding = CpuBinding;

    fn info(&self) -> &DeviceInfo {
        self.inner.info()
    }

    fn compile(&self, source: &str) -> FractalResult<CpuProgram> {
        self.inner.compile(source)
    }

    fn create_surface(&self, size: u32) -> FractalResult<CpuSurface> {
        self.inner.create_surface(size)
    }

    fn fill(&self, surface: &CpuSurface, color: Rgba8) -> FractalResult<()> {
        self.inner.fill(surface, color)
    }

    fn create_shared(
        &self,
        program: &CpuProgram,
        field: &FieldSpec,
        palette: &ColorPalette,
    ) -> FractalResult<CpuShared> {
        self.inner.create_shared(program, field, palette)
    }

    fn write_palette(&self, shared: &CpuShared, palette: &ColorPalette) -> FractalResult<()> {
        self.inner.write_palette(shared, palette)
    }

    fn enqueue_coordinates(&self, program: &CpuProgram, shared: &CpuShared) -> FractalResult<()> {
        self.inner.enqueue_coordinates(program, shared)
    }

    fn bind(
        &self,
        program: &CpuProgram,
        surface: &CpuSurface,
        shared: &CpuShared,
        param: JuliaParam,
        max_iterations: u32,
    ) -> FractalResult<CpuBinding> {
        self.inner.bind(program, surface, shared, param, max_iterations)
    }

    fn dispatch(&self, binding: &CpuBinding) -> FractalResult<()> {
        let n = self.dispatches.get();
        self.dispatches.set(n + 1);
        if self.fail_dispatch == Some(n) {
            return Err(FractalError::dispatch("injected dispatch failure"));
        }
        self.inner.dispatch(binding)
    }

    fn enqueue_readback(&self, surface: &CpuSurface) -> FractalResult<()> {
        self.inner.enqueue_readback(surface)
    }

    fn finish(&self) -> FractalResult<()> {
        let n = self.barriers.get();
        self.barriers.set(n + 1);
        if self.fail_barrier == Some(n) {
            return Err(FractalError::barrier("injected barrier failure"));
        }
        self.inner.finish()
    }

    fn read_pixels(&self, surface: &CpuSurface, out: &mut Vec<u8>) -> FractalResult<()> {
        self.inner.read_pixels(surface, out)
    }
}

fn test_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from("target").join("failure_propagation").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn config(dir: &Path) -> RenderConfig {
    let palette = dir.join("palette.png");
    image::save_buffer_with_format(
        &palette,
        &[0, 0, 0, 255, 255, 255],
        2,
        1,
        image::ColorType::Rgb8,
        image::ImageFormat::Png,
    )
    .unwrap();
    RenderConfig {
        size: 16,
        frames: 4,
        palette,
        max_iterations: 16,
        out_dir: dir.join("frames"),
        ..RenderConfig::default()
    }
}

#[test]
fn failed_dispatch_only_loses_its_own_frame() {
    let dir = test_dir("dispatch");
    let cfg = config(&dir);
    let report = render_animation(&cfg, || {
        Ok(FlakyDevice {
            fail_dispatch: Some(2),
            ..FlakyDevice::new()
        })
    })
    .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.frame_failures.len(), 1);
    assert_eq!(report.frame_failures[0].index, FrameIndex(2));
    assert!(matches!(
        report.frame_failures[0].error,
        FractalError::DispatchFailure(_)
    ));

    assert_eq!(report.exported.len(), 3);
    for i in [0, 1, 3] {
        assert!(cfg.out_dir.join(format!("F{i:04}.png")).exists());
    }
    assert!(!cfg.out_dir.join("F0002.png").exists());
}

#[test]
fn barrier_failure_aborts_before_export() {
    let dir = test_dir("barrier");
    let cfg = config(&dir);
    // Barrier 0 follows coordinate generation, barrier 1 follows the frame kernels.
    let err = render_animation(&cfg, || {
        Ok(FlakyDevice {
            fail_barrier: Some(1),
            ..FlakyDevice::new()
        })
    })
    .unwrap_err();

    assert!(matches!(err, FractalError::BarrierFailure(_)));
    assert!(!cfg.out_dir.exists());
}

#[test]
fn failed_export_keeps_the_rest_of_the_batch() {
    let dir = test_dir("export");
    let cfg = RenderConfig {
        frames: 3,
        ..config(&dir)
    };
    // A directory where frame 1 should land makes only that write fail.
    std::fs::create_dir_all(cfg.out_dir.join("F0001.png")).unwrap();

    let report = render_animation(&cfg, || Ok(FlakyDevice::new())).unwrap();

    assert!(!report.is_success());
    assert!(report.frame_failures.is_empty());
    assert_eq!(report.exported.len(), 2);
    assert_eq!(report.export_failures.len(), 1);
    assert_eq!(report.export_failures[0].index, FrameIndex(1));
    assert!(matches!(
        report.export_failures[0].error,
        FractalError::ExportIoFailure(_)
    ));
    assert!(cfg.out_dir.join("F0000.png").is_file());
    assert!(cfg.out_dir.join("F0002.png").is_file());
}

#[test]
fn encoder_failure_keeps_exported_frames() {
    let dir = test_dir("video");
    let cfg = RenderConfig {
        frames: 3,
        video: VideoConfig {
            enabled: true,
            program: "julia-anim-no-such-encoder".to_string(),
            out_path: dir.join("out.mp4"),
            ..VideoConfig::default()
        },
        ..config(&dir)
    };

    let report = render_animation(&cfg, || Ok(FlakyDevice::new())).unwrap();

    assert!(!report.is_success());
    assert!(report.frame_failures.is_empty());
    assert!(report.export_failures.is_empty());
    assert_eq!(report.exported.len(), 3);
    for i in 0..3 {
        assert!(cfg.out_dir.join(format!("F{i:04}.png")).is_file());
    }
    match &report.video {
        VideoOutcome::Failed(e) => {
            assert!(matches!(e, FractalError::ExternalEncoderFailure(_)));
        }
        other => panic!("expected a failed video, got {other:?}"),
    }
    assert!(!dir.join("out.mp4").exists());
}

#[test]
fn corrupt_palette_is_fatal_before_acquisition() {
    let dir = test_dir("corrupt_palette");
    let bad = dir.join("corrupt.png");
    std::fs::write(&bad, b"definitely not an image").unwrap();
    let cfg = RenderConfig {
        palette: bad,
        ..config(&dir)
    };

    let mut acquired = false;
    let err = render_animation(&cfg, || {
        acquired = true;
        Ok(FlakyDevice::new())
    })
    .unwrap_err();

    assert!(matches!(err, FractalError::PaletteDecodeFailure(_)));
    assert!(!acquired);
    assert!(!cfg.out_dir.exists());
}

#[test]
fn missing_kernel_file_is_a_build_failure_before_acquisition() {
    let dir = test_dir("missing_kernel");
    let cfg = RenderConfig {
        kernel: Some(dir.join("nope.wgsl")),
        ..config(&dir)
    };

    let mut acquired = false;
    let err = render_animation(&cfg, || {
        acquired = true;
        Ok(FlakyDevice::new())
    })
    .unwrap_err();

    assert!(!acquired);
    let log = err.build_log().unwrap();
    assert!(log.contains("nope.wgsl"));
}

#[test]
fn kernel_without_entry_points_fails_to_build() {
    let dir = test_dir("bad_kernel");
    let kernel = dir.join("empty.wgsl");
    std::fs::write(&kernel, "// nothing here\n").unwrap();
    let cfg = RenderConfig {
        kernel: Some(kernel),
        ..config(&dir)
    };

    let err = render_animation(&cfg, || Ok(FlakyDevice::new())).unwrap_err();
    let log = err.build_log().unwrap();
    assert!(log.contains("render_image"));
    assert!(!cfg.out_dir.exists());
}

#[test]
fn acquisition_failure_is_fatal() {
    let dir = test_dir("acquire");
    let cfg = config(&dir);
    let err = render_animation::<FlakyDevice, _>(&cfg, || {
        Err(FractalError::platform_unavailable("no adapters"))
    })
    .unwrap_err();
    assert!(err.is_fatal_at_startup());
    assert!(!cfg.out_dir.exists());
}
