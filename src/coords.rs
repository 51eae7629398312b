/// Parameters of the two coordinate fields shared by every frame of a sequence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSpec {
    pub center_re: f32,
    pub center_im: f32,
    pub zoom: f32,
    pub samples: u32,
}

impl FieldSpec {
    pub fn real(&self) -> CoordinateSample {
        CoordinateField::generate(self.center_re, self.zoom, self.samples as usize)
    }

    pub fn imag(&self) -> CoordinateSample {
        CoordinateField::generate(self.center_im, self.zoom, self.samples as usize)
    }

    /// Uniform block read by the `even_re`/`even_im` kernels.
    pub fn to_device_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&self.center_re.to_le_bytes());
        out[4..8].copy_from_slice(&self.center_im.to_le_bytes());
        out[8..12].copy_from_slice(&self.zoom.to_le_bytes());
        out[12..16].copy_from_slice(&self.samples.to_le_bytes());
        out
    }
}

/// Evenly spaced positions over `[center - zoom/2, center + zoom/2)`.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordinateSample {
    values: Vec<f32>,
}

impl CoordinateSample {
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub struct CoordinateField;

impl CoordinateField {
    /// `sample[i] = min + i * (max - min) / n`, evaluated in `f32` exactly as the device
    /// kernels evaluate it.
    ///
    /// Callers guarantee `n > 0` and a finite `zoom > 0`.
    pub fn generate(center: f32, zoom: f32, n: usize) -> CoordinateSample {
        debug_assert!(n > 0, "coordinate field needs at least one sample");
        debug_assert!(zoom > 0.0, "coordinate field zoom must be positive");

        CoordinateSample {
            values: (0..n).map(|i| sample_at(center, zoom, i as u32, n as u32)).collect(),
        }
    }
}

fn sample_at(center: f32, zoom: f32, i: u32, n: u32) -> f32 {
    let min = center - zoom / 2.0;
    let max = center + zoom / 2.0;
    min + i as f32 * (max - min) / n as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_zoom_around_origin() {
        let s = CoordinateField::generate(0.0, 1.0, 4);
        assert_eq!(s.values(), &[-0.5, -0.25, 0.0, 0.25]);
    }

    #[test]
    fn first_sample_is_exactly_the_interval_start() {
        let s = CoordinateField::generate(0.3, 2.5, 17);
        assert_eq!(s.values()[0], 0.3f32 - 2.5f32 / 2.0);
        assert_eq!(s.len(), 17);
    }

    #[test]
    fn samples_are_non_decreasing() {
        let s = CoordinateField::generate(-0.7, 0.001, 3000);
        assert!(s.values().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn field_axes_use_their_own_center() {
        let field = FieldSpec {
            center_re: 1.0,
            center_im: -1.0,
            zoom: 2.0,
            samples: 2,
        };
        assert_eq!(field.real().values(), &[0.0, 1.0]);
        assert_eq!(field.imag().values(), &[-2.0, -1.0]);
    }
}
