/// Result alias that carries the custom [`ShaderAudioError`] type.
pub type Result<T> = std::result::Result<T, ShaderAudioError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum ShaderAudioError {
    /// The current execution context has no audio capture binding (headless
    /// process, worker, missing host).
    #[error("audio capture is unavailable in this execution context")]
    CaptureUnavailable,
    /// Device enumeration or stream acquisition failed.
    #[error("failed to acquire audio input `{device}`: {reason}")]
    DeviceAcquisitionFailed { device: String, reason: String },
    /// Rejected session or texture configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Caller supplied data that cannot be used as-is.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A shared lock was poisoned by a panicking holder.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// FFT planning or processing failed.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
    /// Free-form message for errors without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON configuration.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl ShaderAudioError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn acquisition<D, R>(device: D, reason: R) -> Self
    where
        D: Into<String>,
        R: std::fmt::Display,
    {
        Self::DeviceAcquisitionFailed {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<&str> for ShaderAudioError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for ShaderAudioError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
