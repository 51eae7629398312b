use std::path::Path;

use tracing::debug;

use crate::foundation::{
    core::Rgba8,
    error::{FractalError, FractalResult},
};

/// Scalar-to-color mapping built from the first pixel row of a palette image.
///
/// `cmap` is never empty and `weight_min < weight_max`; both are checked at construction and
/// the palette is immutable afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorPalette {
    cmap: Vec<Rgba8>,
    weight_min: f64,
    weight_max: f64,
}

impl ColorPalette {
    /// Decode `bytes` (any format the `image` crate knows) and take its first row.
    ///
    /// Alpha is forced to 255 regardless of the source.
    pub fn load(bytes: &[u8], weight_min: f64, weight_max: f64) -> FractalResult<Self> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| FractalError::palette_decode(format!("decode palette image: {e}")))?
            .to_rgba8();
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(FractalError::palette_decode("palette image has no pixels"));
        }

        let cmap = img
            .as_raw()
            .chunks_exact(4)
            .take(width as usize)
            .map(|px| Rgba8::opaque(px[0], px[1], px[2]))
            .collect();

        debug!(width, height, "decoded palette image");
        Self::from_colors(cmap, weight_min, weight_max)
    }

    pub fn load_path(path: &Path, weight_min: f64, weight_max: f64) -> FractalResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            FractalError::palette_decode(format!("read palette '{}': {e}", path.display()))
        })?;
        Self::load(&bytes, weight_min, weight_max)
    }

    pub fn from_colors(cmap: Vec<Rgba8>, weight_min: f64, weight_max: f64) -> FractalResult<Self> {
        if cmap.is_empty() {
            return Err(FractalError::palette_decode("palette has no colors"));
        }
        if !(weight_min < weight_max) {
            return Err(FractalError::validation(format!(
                "palette weight domain must satisfy min < max (got [{weight_min}, {weight_max}])"
            )));
        }
        Ok(Self {
            cmap,
            weight_min,
            weight_max,
        })
    }

    pub fn colors(&self) -> &[Rgba8] {
        &self.cmap
    }

    pub fn len(&self) -> usize {
        self.cmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmap.is_empty()
    }

    pub fn domain(&self) -> (f64, f64) {
        (self.weight_min, self.weight_max)
    }

    /// Index of the color for `weight`, clamped into `[0, len - 1]`.
    ///
    /// `weight == weight_max` would land one past the end without the clamp.
    pub fn index_of(&self, weight: f64) -> usize {
        let span = self.weight_max - self.weight_min;
        let scaled = ((weight - self.weight_min) / span * self.cmap.len() as f64).floor();
        // `as` saturates and maps NaN to 0.
        let idx = scaled as i64;
        idx.clamp(0, self.cmap.len() as i64 - 1) as usize
    }

    pub fn lookup(&self, weight: f64) -> Rgba8 {
        self.cmap[self.index_of(weight)]
    }

    /// Colors packed as four little-endian `u32` per entry, the layout the device kernel reads.
    pub fn to_device_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.cmap.len() * 16);
        for c in &self.cmap {
            for ch in c.to_array() {
                out.extend_from_slice(&u32::from(ch).to_le_bytes());
            }
        }
        out
    }
}
