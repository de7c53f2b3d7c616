use std::sync::{Arc, OnceLock};

use crate::{
    capture::{default_backend, CaptureBackend, DeviceCaptureRegistry, NullBackend},
    AudioSession, Result, SessionOptions, ShaderAudioError, TextureConsumer, TextureConsumerRegistry,
    TextureKind,
};

/// Capture cache and texture registry shared by every session created from
/// it. Applications normally use [`AudioRuntime::shared`]; tests build their
/// own with [`AudioRuntime::new`].
#[derive(Debug, Clone)]
pub struct AudioRuntime {
    captures: Arc<DeviceCaptureRegistry>,
    textures: TextureConsumerRegistry,
}

impl AudioRuntime {
    /// Creates a runtime that opens inputs through `backend`.
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            captures: Arc::new(DeviceCaptureRegistry::new(backend)),
            textures: TextureConsumerRegistry::new(),
        }
    }

    /// Runtime without capture support; sessions run on pushed data only.
    pub fn headless() -> Self {
        Self::new(Arc::new(NullBackend))
    }

    /// Process-wide runtime, created on first use with the default backend.
    pub fn shared() -> &'static AudioRuntime {
        static SHARED: OnceLock<AudioRuntime> = OnceLock::new();
        SHARED.get_or_init(|| Self::new(default_backend()))
    }

    /// Returns the device capture cache.
    pub fn captures(&self) -> &Arc<DeviceCaptureRegistry> {
        &self.captures
    }

    /// Returns the registry every session of this runtime notifies.
    pub fn textures(&self) -> &TextureConsumerRegistry {
        &self.textures
    }

    /// Creates a session bound to this runtime's registries.
    pub fn create_session(&self, options: SessionOptions) -> Result<AudioSession> {
        AudioSession::new(options, self)
    }

    /// Registers a texture consumer for `session`.
    ///
    /// A session only notifies the runtime that created it, so sessions from
    /// another runtime are rejected with [`ShaderAudioError::InvalidInput`].
    pub fn create_texture_consumer(
        &self,
        session: &AudioSession,
        kind: TextureKind,
    ) -> Result<TextureConsumer> {
        if !session.texture_registry().same_registry(&self.textures) {
            return Err(ShaderAudioError::InvalidInput(format!(
                "{} belongs to a different runtime",
                session.id()
            )));
        }
        self.textures.register(session.source(), kind, None)
    }
}
