use thiserror::Error;

pub type Result<T> = std::result::Result<T, SplatError>;

/// Broad class of a failure, used by callers to decide what to keep alive.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Programmer or data-contract violation. Surfaced immediately, never retried.
    Configuration,
    /// Missing GPU support or a failed adapter/device/surface acquisition.
    Environment,
    /// A scene or camera file could not be read. The previous scene stays live.
    SceneData,
}

#[derive(Debug, Error)]
pub enum SplatError {
    #[error("sort length {0} is not a power of two")]
    NonPowerOfTwoSortLength(usize),

    #[error("key buffer is {actual} bytes but the sorter was built for {expected} bytes")]
    KeyBufferSizeMismatch { expected: u64, actual: u64 },

    #[error("{rest_fields} f_rest fields do not describe a spherical harmonics degree in 0..=3")]
    UnsupportedShLayout { rest_fields: usize },

    #[error("destroy requested while no frame loop is running")]
    DestroyWithoutFrameLoop,

    #[error("no compatible GPU adapter: {0}")]
    AdapterUnavailable(String),

    #[error("failed to acquire GPU device: {0}")]
    DeviceUnavailable(String),

    #[error("failed to create presentation surface: {0}")]
    SurfaceUnavailable(String),

    #[error("GPU readback failed: {0}")]
    Readback(String),

    #[error("malformed scene file: {0}")]
    MalformedScene(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid camera presets: {0}")]
    CameraPresets(#[from] serde_json::Error),
}

impl SplatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SplatError::NonPowerOfTwoSortLength(_)
            | SplatError::KeyBufferSizeMismatch { .. }
            | SplatError::UnsupportedShLayout { .. }
            | SplatError::DestroyWithoutFrameLoop => ErrorKind::Configuration,
            SplatError::AdapterUnavailable(_)
            | SplatError::DeviceUnavailable(_)
            | SplatError::SurfaceUnavailable(_)
            | SplatError::Readback(_) => ErrorKind::Environment,
            SplatError::MalformedScene(_) | SplatError::Io(_) | SplatError::CameraPresets(_) => {
                ErrorKind::SceneData
            }
        }
    }

    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        SplatError::MalformedScene(msg.into())
    }
}
