use crate::foundation::error::{FractalError, FractalResult};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u32);

/// Straight (non-premultiplied) RGBA8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const WHITE: Self = Self::new(255, 255, 255, 255);
    pub const BLACK: Self = Self::new(0, 0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 255)
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<[u8; 4]> for Rgba8 {
    fn from(v: [u8; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// The complex constant `c` of one frame's recurrence.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JuliaParam {
    pub re: f64,
    pub im: f64,
}

impl JuliaParam {
    pub fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    /// Narrowed to the single precision the kernels run in.
    pub fn as_f32(self) -> [f32; 2] {
        [self.re as f32, self.im as f32]
    }
}

/// Byte length of a tightly packed square RGBA8 surface.
pub fn rgba_len(size: u32) -> FractalResult<usize> {
    (size as usize)
        .checked_mul(size as usize)
        .and_then(|px| px.checked_mul(4))
        .ok_or_else(|| FractalError::allocation(format!("surface {size}x{size} overflows usize")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba_len_is_four_bytes_per_pixel() {
        assert_eq!(rgba_len(3).unwrap(), 36);
        assert_eq!(rgba_len(0).unwrap(), 0);
    }

    #[test]
    fn julia_param_narrows_to_f32() {
        let p = JuliaParam::new(0.25, -0.5);
        assert_eq!(p.as_f32(), [0.25f32, -0.5f32]);
    }

    #[test]
    fn rgba_from_array_keeps_channel_order() {
        assert_eq!(Rgba8::from([1, 2, 3, 4]), Rgba8::new(1, 2, 3, 4));
        assert_eq!(Rgba8::WHITE.to_array(), [255; 4]);
    }
}
