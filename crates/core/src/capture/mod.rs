//! Audio input acquisition.
//!
//! Platform access goes through [`CaptureBackend`] so the registry can be
//! exercised without audio hardware. [`DeviceCaptureRegistry`] owns the
//! process-wide cache of open inputs and the shared [`AnalysisContext`].
//!
//! [`AnalysisContext`]: crate::AnalysisContext

#[cfg(feature = "cpal")]
mod cpal_backend;
mod feed;
mod registry;

use std::{fmt, sync::Arc};

#[cfg(feature = "cpal")]
pub use cpal_backend::CpalBackend;
pub use feed::{Channel, StereoFeed};
pub use registry::{resolve_default_device, DeviceCaptureRegistry};

use crate::{Result, ShaderAudioError};

/// An input device as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub id: String,
    pub label: String,
    /// Set when the platform itself reports this device as its default.
    pub is_default: bool,
}

impl InputDevice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            is_default: false,
        }
    }

    /// Whether the device is the platform default, either flagged directly or
    /// named as such in its label.
    pub fn looks_default(&self) -> bool {
        self.is_default || self.label.to_lowercase().contains("default")
    }
}

/// Keeps a platform input stream alive. Dropping it stops capture.
pub trait CaptureStream: Send + Sync {
    fn sample_rate(&self) -> u32;
}

/// Platform audio input binding.
pub trait CaptureBackend: Send + Sync {
    /// False when the execution context has no capture capability at all.
    fn is_available(&self) -> bool {
        true
    }

    fn input_devices(&self) -> Result<Vec<InputDevice>>;

    /// Opens `device_id` and starts writing its samples into `feed`.
    fn open_input(&self, device_id: &str, feed: Arc<StereoFeed>) -> Result<Box<dyn CaptureStream>>;
}

/// Backend for headless contexts. Sessions created against it run in
/// manual-feed mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl CaptureBackend for NullBackend {
    fn is_available(&self) -> bool {
        false
    }

    fn input_devices(&self) -> Result<Vec<InputDevice>> {
        Ok(Vec::new())
    }

    fn open_input(&self, _device_id: &str, _feed: Arc<StereoFeed>) -> Result<Box<dyn CaptureStream>> {
        Err(ShaderAudioError::CaptureUnavailable)
    }
}

/// Backend used by [`AudioRuntime::shared`](crate::AudioRuntime::shared).
pub fn default_backend() -> Arc<dyn CaptureBackend> {
    #[cfg(feature = "cpal")]
    {
        Arc::new(CpalBackend::new())
    }
    #[cfg(not(feature = "cpal"))]
    {
        Arc::new(NullBackend)
    }
}

/// A live input stream shared by every session capturing the same device.
pub struct CaptureHandle {
    device_id: String,
    label: String,
    sample_rate: u32,
    feed: Arc<StereoFeed>,
    _stream: Box<dyn CaptureStream>,
}

impl CaptureHandle {
    pub(crate) fn new(device: &InputDevice, feed: Arc<StereoFeed>, stream: Box<dyn CaptureStream>) -> Self {
        Self {
            device_id: device.id.clone(),
            label: device.label.clone(),
            sample_rate: stream.sample_rate(),
            feed,
            _stream: stream,
        }
    }

    /// Returns the id the device was opened with.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the human-readable device name.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the sample rate the stream runs at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the ring the stream writes into.
    pub fn feed(&self) -> &Arc<StereoFeed> {
        &self.feed
    }
}

impl fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("device_id", &self.device_id)
            .field("label", &self.label)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_detection_is_position_independent() {
        assert!(InputDevice::new("a", "default").looks_default());
        assert!(InputDevice::new("a", "Default - Mic").looks_default());
        assert!(InputDevice::new("a", "Mic (DEFAULT)").looks_default());
        assert!(!InputDevice::new("a", "USB Mic").looks_default());

        let mut flagged = InputDevice::new("a", "USB Mic");
        flagged.is_default = true;
        assert!(flagged.looks_default());
    }

    #[test]
    fn null_backend_is_unavailable() {
        let backend = NullBackend;
        assert!(!backend.is_available());
        assert!(backend.input_devices().unwrap().is_empty());
        let err = backend
            .open_input("any", Arc::new(StereoFeed::new(16)))
            .err()
            .unwrap();
        assert!(matches!(err, ShaderAudioError::CaptureUnavailable));
    }
}
