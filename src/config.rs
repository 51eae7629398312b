use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::{
    compute::DeviceSelector,
    coords::FieldSpec,
    export::ExportFormat,
    foundation::{
        core::{JuliaParam, Rgba8},
        error::{FractalError, FractalResult},
    },
};

/// Region of the complex plane every frame samples.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub center_re: f32,
    pub center_im: f32,
    pub zoom: f32,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            center_re: 0.0,
            center_im: 0.0,
            zoom: 1.0,
        }
    }
}

/// Linear sweep of the Julia constant: `param(i) = (c_re + i*step_re, c_im + i*step_im)`.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub c_re: f64,
    pub c_im: f64,
    pub step_re: f64,
    pub step_im: f64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            c_re: 0.0,
            c_im: 0.64,
            step_re: 0.0,
            step_im: 0.0005,
        }
    }
}

impl SweepConfig {
    /// Computed from the index, never accumulated, so frame `i` does not drift.
    pub fn param(&self, index: u32) -> JuliaParam {
        let i = f64::from(index);
        JuliaParam::new(self.c_re + i * self.step_re, self.c_im + i * self.step_im)
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
    pub fps: u32,
    pub out_path: PathBuf,
    /// External encoder executable.
    pub program: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fps: 30,
            out_path: PathBuf::from("julia.mp4"),
            program: "ffmpeg".to_string(),
        }
    }
}

/// Every run parameter, resolved before the pipeline starts and immutable afterwards.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Side of the square frames, in pixels.
    pub size: u32,
    /// Number of frames; 1 renders a still image.
    pub frames: u32,
    pub palette: PathBuf,
    pub weight_min: f64,
    pub weight_max: f64,
    pub view: ViewConfig,
    pub sweep: SweepConfig,
    pub max_iterations: u32,
    pub background: Rgba8,
    /// Device program to load instead of the built-in one.
    pub kernel: Option<PathBuf>,
    pub format: ExportFormat,
    pub out_dir: PathBuf,
    pub video: VideoConfig,
    pub device: DeviceSelector,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            size: 512,
            frames: 1,
            palette: PathBuf::from("colormaps/autumn.png"),
            weight_min: 0.0,
            weight_max: 1.0,
            view: ViewConfig::default(),
            sweep: SweepConfig::default(),
            max_iterations: 256,
            background: Rgba8::WHITE,
            kernel: None,
            format: ExportFormat::Png,
            out_dir: PathBuf::from("frames"),
            video: VideoConfig::default(),
            device: DeviceSelector::default(),
        }
    }
}

impl RenderConfig {
    pub fn from_json_file(path: &Path) -> FractalResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config '{}'", path.display()))?;
        let cfg: Self = serde_json::from_str(&text)
            .with_context(|| format!("parse config '{}'", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> FractalResult<()> {
        if self.size == 0 {
            return Err(FractalError::validation("frame size must be non-zero"));
        }
        if self.frames == 0 {
            return Err(FractalError::validation("frame count must be non-zero"));
        }
        if !(self.view.zoom.is_finite() && self.view.zoom > 0.0) {
            return Err(FractalError::validation(format!(
                "zoom must be finite and positive (got {})",
                self.view.zoom
            )));
        }
        if !(self.view.center_re.is_finite() && self.view.center_im.is_finite()) {
            return Err(FractalError::validation("view center must be finite"));
        }
        if !(self.weight_min < self.weight_max) {
            return Err(FractalError::validation(format!(
                "weight domain must satisfy min < max (got [{}, {}])",
                self.weight_min, self.weight_max
            )));
        }
        if self.max_iterations == 0 {
            return Err(FractalError::validation("max_iterations must be non-zero"));
        }
        if self.video.enabled && self.video.fps == 0 {
            return Err(FractalError::validation("video fps must be non-zero"));
        }
        Ok(())
    }

    pub fn field_spec(&self) -> FieldSpec {
        FieldSpec {
            center_re: self.view.center_re,
            center_im: self.view.center_im,
            zoom: self.view.zoom,
            samples: self.size,
        }
    }

    pub fn with_frames(mut self, frames: u32) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_out_dir(mut self, out_dir: impl Into<PathBuf>) -> Self {
        self.out_dir = out_dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_progresses_linearly_from_the_index() {
        let sweep = SweepConfig {
            c_re: 0.0,
            c_im: 0.62,
            step_re: 0.0,
            step_im: 0.0005,
        };
        let ims: Vec<f64> = (0..3).map(|i| sweep.param(i).im).collect();
        assert_eq!(ims[0], 0.62);
        assert!((ims[1] - 0.6205).abs() < 1e-12);
        assert!((ims[2] - 0.6210).abs() < 1e-12);
        assert_eq!(ims[2], 0.62 + 2.0 * 0.0005);
    }

    #[test]
    fn defaults_validate() {
        RenderConfig::default().validate().unwrap();
    }

    #[test]
    fn bad_values_are_rejected() {
        let base = RenderConfig::default();
        let cases = [
            RenderConfig {
                size: 0,
                ..base.clone()
            },
            RenderConfig {
                frames: 0,
                ..base.clone()
            },
            RenderConfig {
                view: ViewConfig {
                    zoom: 0.0,
                    ..ViewConfig::default()
                },
                ..base.clone()
            },
            RenderConfig {
                view: ViewConfig {
                    zoom: f32::NAN,
                    ..ViewConfig::default()
                },
                ..base.clone()
            },
            RenderConfig {
                weight_min: 1.0,
                weight_max: 1.0,
                ..base.clone()
            },
            RenderConfig {
                max_iterations: 0,
                ..base.clone()
            },
        ];
        for cfg in cases {
            assert!(matches!(
                cfg.validate(),
                Err(FractalError::Validation(_))
            ));
        }
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: RenderConfig =
            serde_json::from_str(r#"{ "size": 64, "format": "ppm", "sweep": { "c_im": 0.7 } }"#)
                .unwrap();
        assert_eq!(cfg.size, 64);
        assert_eq!(cfg.format, ExportFormat::Ppm);
        assert_eq!(cfg.sweep.c_im, 0.7);
        assert_eq!(cfg.sweep.step_im, 0.0005);
        assert_eq!(cfg.frames, 1);
        assert_eq!(cfg.field_spec().samples, 64);
    }
}
