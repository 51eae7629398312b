use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tracing::info;

use crate::{
    config::VideoConfig,
    foundation::error::{FractalError, FractalResult},
};

/// Assembles an exported frame sequence into a video with an external encoder.
///
/// The encoder is invoked once, over the `F%04d.<ext>` pattern, after every frame is on disk.
#[derive(Clone, Debug)]
pub struct VideoAssembler {
    pub program: String,
    pub fps: u32,
    pub out_path: PathBuf,
    pub overwrite: bool,
}

impl VideoAssembler {
    pub fn from_config(cfg: &VideoConfig) -> Self {
        Self {
            program: cfg.program.clone(),
            fps: cfg.fps,
            out_path: cfg.out_path.clone(),
            overwrite: true,
        }
    }

    pub fn validate(&self) -> FractalResult<()> {
        if self.fps == 0 {
            return Err(FractalError::validation("video fps must be non-zero"));
        }
        if self.program.trim().is_empty() {
            return Err(FractalError::validation("video encoder program is empty"));
        }
        Ok(())
    }

    /// Arguments passed to the encoder for `pattern`.
    pub fn args(&self, pattern: &Path) -> Vec<String> {
        vec![
            if self.overwrite { "-y" } else { "-n" }.to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-framerate".to_string(),
            self.fps.to_string(),
            "-i".to_string(),
            pattern.to_string_lossy().into_owned(),
            "-an".to_string(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            self.out_path.to_string_lossy().into_owned(),
        ]
    }

    pub fn assemble(&self, pattern: &Path) -> FractalResult<()> {
        self.validate()?;
        if !is_program_on_path(&self.program) {
            return Err(FractalError::external_encoder(format!(
                "'{}' not found on PATH",
                self.program
            )));
        }
        ensure_parent_dir(&self.out_path)?;

        if !self.overwrite && self.out_path.exists() {
            return Err(FractalError::external_encoder(format!(
                "output file '{}' already exists",
                self.out_path.display()
            )));
        }

        let output = Command::new(&self.program)
            .args(self.args(pattern))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| {
                FractalError::external_encoder(format!(
                    "failed to spawn '{}' (is it installed and on PATH?): {e}",
                    self.program
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FractalError::external_encoder(format!(
                "'{}' exited with status {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        info!(out = %self.out_path.display(), "assembled video");
        Ok(())
    }
}

pub fn is_program_on_path(program: &str) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> FractalResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}
