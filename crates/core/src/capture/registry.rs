use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, OnceLock,
    },
};

use super::{CaptureBackend, CaptureHandle, InputDevice, StereoFeed};
use crate::{AnalysisContext, Result, ShaderAudioError};

/// Cache of open capture streams keyed by device id, plus the lazily created
/// analysis context every live session shares.
///
/// Entries are only ever added, and only after the platform handed back a
/// working stream; a failed open leaves no trace so the next request retries.
pub struct DeviceCaptureRegistry {
    backend: Arc<dyn CaptureBackend>,
    context: OnceLock<Arc<AnalysisContext>>,
    handles: Mutex<HashMap<String, Arc<CaptureHandle>>>,
    unavailable_logged: AtomicBool,
}

impl DeviceCaptureRegistry {
    /// Creates an empty cache over `backend`.
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            context: OnceLock::new(),
            handles: Mutex::new(HashMap::new()),
            unavailable_logged: AtomicBool::new(false),
        }
    }

    /// Whether the backend can capture at all. Cheap enough for any thread.
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }

    /// Shared analysis context, created on first access.
    pub fn analysis_context(&self) -> Arc<AnalysisContext> {
        self.context
            .get_or_init(|| {
                tracing::debug!("creating shared analysis context");
                Arc::new(AnalysisContext::new())
            })
            .clone()
    }

    /// Whether the analysis context has been created yet.
    pub fn has_analysis_context(&self) -> bool {
        self.context.get().is_some()
    }

    /// Lists the backend's input devices. May block while the platform
    /// enumerates.
    pub fn input_devices(&self) -> Result<Vec<InputDevice>> {
        self.backend.input_devices()
    }

    /// Returns the capture handle for `device_id`, opening the device on first
    /// use. Without an id the platform default input is resolved.
    pub fn acquire(&self, device_id: Option<&str>) -> Result<Arc<CaptureHandle>> {
        if !self.is_available() {
            return Err(ShaderAudioError::CaptureUnavailable);
        }

        let device = self.resolve_device(device_id)?;
        let mut handles = self.lock_handles()?;

        let handle = match handles.get(&device.id) {
            Some(existing) => {
                tracing::info!(device = %device.id, "reusing capture stream");
                existing.clone()
            }
            None => {
                let feed = Arc::new(StereoFeed::default());
                let stream = self
                    .backend
                    .open_input(&device.id, feed.clone())
                    .map_err(|err| ShaderAudioError::acquisition(&device.id, err))?;
                let handle = Arc::new(CaptureHandle::new(&device, feed, stream));
                tracing::info!(
                    device = %handle.device_id(),
                    label = %handle.label(),
                    sample_rate = handle.sample_rate(),
                    "opened capture stream"
                );
                handles.insert(device.id.clone(), handle.clone());
                handle
            }
        };
        drop(handles);

        // Some hosts keep processing suspended until an input is granted.
        self.analysis_context().resume();
        Ok(handle)
    }

    /// Ids of every device with a cached stream, sorted.
    pub fn cached_device_ids(&self) -> Result<Vec<String>> {
        let handles = self.lock_handles()?;
        let mut ids: Vec<String> = handles.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Logs the missing capture capability the first time it is hit.
    pub(crate) fn warn_unavailable_once(&self) {
        if !self.unavailable_logged.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                "{}; sessions fall back to manual feed via push_frequency_values and push_time_domain_values",
                ShaderAudioError::CaptureUnavailable
            );
        }
    }

    fn resolve_device(&self, device_id: Option<&str>) -> Result<InputDevice> {
        if let Some(id) = device_id {
            let known = self.backend.input_devices().ok().and_then(|devices| {
                devices.into_iter().find(|device| device.id == id)
            });
            return Ok(known.unwrap_or_else(|| InputDevice::new(id, id)));
        }

        let devices = self
            .backend
            .input_devices()
            .map_err(|err| ShaderAudioError::acquisition("default", err))?;
        resolve_default_device(&devices)
            .cloned()
            .ok_or_else(|| ShaderAudioError::acquisition("default", "no audio input devices found"))
    }

    fn lock_handles(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<CaptureHandle>>>> {
        self.handles
            .lock()
            .map_err(|_| ShaderAudioError::Poisoned("capture handle cache"))
    }
}

/// Picks the device the platform marks as default, falling back to the first
/// enumerated input.
pub fn resolve_default_device(devices: &[InputDevice]) -> Option<&InputDevice> {
    devices
        .iter()
        .find(|device| device.looks_default())
        .or_else(|| devices.first())
}

impl fmt::Debug for DeviceCaptureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self.handles.lock().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("DeviceCaptureRegistry")
            .field("available", &self.is_available())
            .field("cached", &cached)
            .field("has_context", &self.has_analysis_context())
            .finish()
    }
}
