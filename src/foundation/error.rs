pub type FractalResult<T> = Result<T, FractalError>;

#[derive(thiserror::Error, Debug)]
pub enum FractalError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("no compute platform available: {0}")]
    PlatformUnavailable(String),

    #[error("compute device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("unsupported compute device: {0}")]
    UnsupportedDevice(String),

    #[error("device program build failed:\n{log}")]
    BuildFailure { log: String },

    #[error("device allocation failed: {0}")]
    AllocationFailure(String),

    #[error("kernel dispatch failed: {0}")]
    DispatchFailure(String),

    #[error("readback failed: {0}")]
    ReadbackFailure(String),

    #[error("synchronization barrier failed: {0}")]
    BarrierFailure(String),

    #[error("palette decode failed: {0}")]
    PaletteDecodeFailure(String),

    #[error("export encode failed: {0}")]
    ExportEncodeFailure(String),

    #[error("export i/o failed: {0}")]
    ExportIoFailure(String),

    #[error("external encoder failed: {0}")]
    ExternalEncoderFailure(String),

    #[error("frame lifecycle error: {0}")]
    Lifecycle(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FractalError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn platform_unavailable(msg: impl Into<String>) -> Self {
        Self::PlatformUnavailable(msg.into())
    }

    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    pub fn unsupported_device(msg: impl Into<String>) -> Self {
        Self::UnsupportedDevice(msg.into())
    }

    pub fn build_failure(log: impl Into<String>) -> Self {
        Self::BuildFailure { log: log.into() }
    }

    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::AllocationFailure(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::DispatchFailure(msg.into())
    }

    pub fn readback(msg: impl Into<String>) -> Self {
        Self::ReadbackFailure(msg.into())
    }

    pub fn barrier(msg: impl Into<String>) -> Self {
        Self::BarrierFailure(msg.into())
    }

    pub fn palette_decode(msg: impl Into<String>) -> Self {
        Self::PaletteDecodeFailure(msg.into())
    }

    pub fn export_encode(msg: impl Into<String>) -> Self {
        Self::ExportEncodeFailure(msg.into())
    }

    pub fn export_io(msg: impl Into<String>) -> Self {
        Self::ExportIoFailure(msg.into())
    }

    pub fn external_encoder(msg: impl Into<String>) -> Self {
        Self::ExternalEncoderFailure(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        Self::Lifecycle(msg.into())
    }

    /// The diagnostic log attached to a program build failure, if this is one.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            Self::BuildFailure { log } => Some(log),
            _ => None,
        }
    }

    /// Errors raised before any device work is dispatched abort the whole run.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::PlatformUnavailable(_)
                | Self::DeviceUnavailable(_)
                | Self::UnsupportedDevice(_)
                | Self::BuildFailure { .. }
                | Self::PaletteDecodeFailure(_)
        )
    }
}
