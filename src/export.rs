use std::{
    fs::File,
    io::{BufWriter, Write as _},
    path::{Path, PathBuf},
};

use crate::foundation::{
    core::{FrameIndex, rgba_len},
    error::{FractalError, FractalResult},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Compressed raster through the `image` codec.
    #[default]
    Png,
    /// Binary PPM (`P6`), RGB only.
    Ppm,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Ppm => "ppm",
        }
    }
}

/// Writes frames as `F%04d.<ext>` into one output directory.
#[derive(Clone, Debug)]
pub struct Exporter {
    dir: PathBuf,
    format: ExportFormat,
}

impl Exporter {
    pub fn new(dir: impl Into<PathBuf>, format: ExportFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Creates the output directory; an existing one is fine.
    pub fn ensure_dir(&self) -> FractalResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            FractalError::export_io(format!(
                "create output directory '{}': {e}",
                self.dir.display()
            ))
        })
    }

    pub fn frame_path(&self, index: FrameIndex) -> PathBuf {
        self.dir.join(frame_file_name(index, self.format))
    }

    /// printf-style pattern matching every [`Exporter::frame_path`], for the video encoder.
    pub fn file_pattern(&self) -> PathBuf {
        self.dir.join(format!("F%04d.{}", self.format.extension()))
    }

    pub fn write(&self, index: FrameIndex, size: u32, rgba: &[u8]) -> FractalResult<PathBuf> {
        let path = self.frame_path(index);
        match self.format {
            ExportFormat::Png => write_png(&path, size, rgba)?,
            ExportFormat::Ppm => write_ppm(&path, size, rgba)?,
        }
        Ok(path)
    }
}

pub fn frame_file_name(index: FrameIndex, format: ExportFormat) -> String {
    format!("F{:04}.{}", index.0, format.extension())
}

fn check_len(size: u32, rgba: &[u8]) -> FractalResult<()> {
    let want = rgba_len(size)?;
    if rgba.len() != want {
        return Err(FractalError::validation(format!(
            "frame buffer is {} bytes, expected {want} for {size}x{size} rgba8",
            rgba.len()
        )));
    }
    Ok(())
}

pub fn write_png(path: &Path, size: u32, rgba: &[u8]) -> FractalResult<()> {
    check_len(size, rgba)?;
    image::save_buffer_with_format(
        path,
        rgba,
        size,
        size,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|e| match e {
        image::ImageError::IoError(io) => {
            FractalError::export_io(format!("write png '{}': {io}", path.display()))
        }
        other => FractalError::export_encode(format!("encode png '{}': {other}", path.display())),
    })
}

/// `P6` header followed by row-major RGB triples; alpha is dropped.
pub fn encode_ppm(size: u32, rgba: &[u8]) -> FractalResult<Vec<u8>> {
    check_len(size, rgba)?;
    let header = format!("P6\n{size} {size}\n255\n");
    let mut out = Vec::with_capacity(header.len() + rgba.len() / 4 * 3);
    out.extend_from_slice(header.as_bytes());
    for px in rgba.chunks_exact(4) {
        out.extend_from_slice(&px[..3]);
    }
    Ok(out)
}

pub fn write_ppm(path: &Path, size: u32, rgba: &[u8]) -> FractalResult<()> {
    let bytes = encode_ppm(size, rgba)?;
    let io_err = |e: std::io::Error| {
        FractalError::export_io(format!("write ppm '{}': {e}", path.display()))
    };
    let mut w = BufWriter::new(File::create(path).map_err(io_err)?);
    w.write_all(&bytes).map_err(io_err)?;
    w.flush().map_err(io_err)?;
    Ok(())
}
