use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard},
};

use super::{encode_into, TextureImage, TextureKind};
use crate::{Result, SessionChange, SessionSource, ShaderAudioError};

/// Stable identifier of a registered texture consumer. Ids grow
/// monotonically and are never handed out twice by the same registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture-{}", self.0)
    }
}

/// Every live texture consumer, keyed by id. Cloning yields another handle
/// to the same registry.
#[derive(Clone, Default)]
pub struct TextureConsumerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    consumers: BTreeMap<ConsumerId, ConsumerEntry>,
}

struct ConsumerEntry {
    kind: TextureKind,
    max_samples: Option<usize>,
    source: SessionSource,
    image: Arc<RwLock<TextureImage>>,
}

impl ConsumerEntry {
    fn refresh(&self) -> Result<()> {
        let Some(buffers) = self.source.upgrade() else {
            debug_assert!(
                false,
                "texture consumer refreshed after {} was destroyed",
                self.source.id()
            );
            return Ok(());
        };

        let buffers = buffers
            .read()
            .map_err(|_| ShaderAudioError::Poisoned("session buffers"))?;
        let (left, right) = buffers.channels(self.kind);
        let mut image = self
            .image
            .write()
            .map_err(|_| ShaderAudioError::Poisoned("texture image"))?;
        encode_into(&mut image, left, right, self.max_samples);
        Ok(())
    }
}

impl TextureConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether both handles point at the same registry.
    pub fn same_registry(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Registers a consumer of `source` and encodes its first image.
    pub fn register(
        &self,
        source: SessionSource,
        kind: TextureKind,
        max_samples: Option<usize>,
    ) -> Result<TextureConsumer> {
        if max_samples == Some(0) {
            return Err(ShaderAudioError::InvalidConfiguration(
                "max_samples must be at least 1".to_string(),
            ));
        }

        let image = Arc::new(RwLock::new(TextureImage::new(kind)));
        let entry = ConsumerEntry {
            kind,
            max_samples,
            source,
            image: image.clone(),
        };
        entry.refresh()?;

        let mut inner = self.lock()?;
        let id = ConsumerId(inner.next_id);
        inner.next_id += 1;
        tracing::debug!(%id, session = %entry.source.id(), kind = kind.isf_type(), "registered texture consumer");
        inner.consumers.insert(id, entry);

        Ok(TextureConsumer {
            id,
            kind,
            max_samples,
            image,
            registry: self.clone(),
        })
    }

    /// Removes a consumer. Returns false for ids that are not registered.
    pub fn deregister(&self, id: ConsumerId) -> bool {
        match self.lock() {
            Ok(mut inner) => inner.consumers.remove(&id).is_some(),
            Err(err) => {
                tracing::warn!(%id, %err, "could not deregister texture consumer");
                false
            }
        }
    }

    /// Re-encodes every consumer of the changed session whose kind the change
    /// touches, in registration order. Returns how many were re-encoded.
    pub fn notify(&self, change: SessionChange) -> usize {
        let inner = match self.lock() {
            Ok(inner) => inner,
            Err(err) => {
                tracing::warn!(session = %change.session, %err, "skipping texture notification");
                return 0;
            }
        };

        let mut refreshed = 0;
        for (id, entry) in &inner.consumers {
            if entry.source.id() != change.session
                || !change.affects(entry.kind)
                || !entry.source.is_alive()
            {
                continue;
            }
            match entry.refresh() {
                Ok(()) => refreshed += 1,
                Err(err) => tracing::warn!(%id, %err, "texture refresh failed"),
            }
        }

        tracing::trace!(session = %change.session, refreshed, "notified texture consumers");
        refreshed
    }

    /// Re-encodes a single consumer regardless of what changed.
    pub fn refresh(&self, id: ConsumerId) -> Result<()> {
        let inner = self.lock()?;
        match inner.consumers.get(&id) {
            Some(entry) => entry.refresh(),
            None => Err(ShaderAudioError::InvalidInput(format!("{id} is not registered"))),
        }
    }

    /// Number of registered consumers; zero if the registry is poisoned.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.consumers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<ConsumerId> {
        self.lock()
            .map(|inner| inner.consumers.keys().copied().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryInner>> {
        self.inner
            .lock()
            .map_err(|_| ShaderAudioError::Poisoned("texture consumer registry"))
    }
}

impl fmt::Debug for TextureConsumerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureConsumerRegistry")
            .field("consumers", &self.len())
            .finish()
    }
}

/// Handle to a registered consumer. The renderer reads [`image`](Self::image)
/// each frame; dropping the handle deregisters it.
///
/// Do not hold the image guard across a session update on the same thread,
/// the update needs the write side of the same lock.
pub struct TextureConsumer {
    id: ConsumerId,
    kind: TextureKind,
    max_samples: Option<usize>,
    image: Arc<RwLock<TextureImage>>,
    registry: TextureConsumerRegistry,
}

impl TextureConsumer {
    /// Returns the id this consumer was registered under.
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Returns which session buffers this consumer encodes.
    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn max_samples(&self) -> Option<usize> {
        self.max_samples
    }

    /// Current pixel buffer.
    pub fn image(&self) -> Result<RwLockReadGuard<'_, TextureImage>> {
        self.image
            .read()
            .map_err(|_| ShaderAudioError::Poisoned("texture image"))
    }

    /// Encode count so far, see [`TextureImage::generation`].
    pub fn generation(&self) -> u64 {
        self.image().map(|image| image.generation()).unwrap_or(0)
    }

    /// Re-encodes from the session's current buffers.
    pub fn refresh(&self) -> Result<()> {
        self.registry.refresh(self.id)
    }

    /// Deregisters the consumer. Same as dropping the handle.
    pub fn destroy(self) {}
}

impl Drop for TextureConsumer {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

impl fmt::Debug for TextureConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureConsumer")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("max_samples", &self.max_samples)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioRuntime, AudioSession, SessionOptions};

    fn manual_session(runtime: &AudioRuntime, fft_size: usize) -> AudioSession {
        runtime.create_session(SessionOptions::manual(fft_size)).unwrap()
    }

    #[test]
    fn first_encode_sizes_the_buffer() {
        let runtime = AudioRuntime::headless();
        let session = manual_session(&runtime, 2048);

        let spectrum = session.create_texture(TextureKind::Spectrum).unwrap();
        let waveform = session.create_texture(TextureKind::Waveform).unwrap();

        assert_eq!(spectrum.image().unwrap().pixels().len(), 2 * 2048 * 4);
        assert_eq!(waveform.image().unwrap().pixels().len(), 2 * 1024 * 4);
        assert_eq!(spectrum.image().unwrap().pixel(0, 0), Some([0, 0, 0, 255]));
        assert_eq!(spectrum.generation(), 1);
    }

    #[test]
    fn ids_are_never_reused() {
        let runtime = AudioRuntime::headless();
        let session = manual_session(&runtime, 64);

        let first = session.create_texture(TextureKind::Spectrum).unwrap();
        let first_id = first.id();
        first.destroy();
        let second = session.create_texture(TextureKind::Spectrum).unwrap();

        assert!(second.id() > first_id);
        assert_eq!(runtime.textures().ids(), vec![second.id()]);
    }

    #[test]
    fn dropping_the_handle_deregisters() {
        let runtime = AudioRuntime::headless();
        let session = manual_session(&runtime, 64);
        {
            let _texture = session.create_texture(TextureKind::Waveform).unwrap();
            assert_eq!(runtime.textures().len(), 1);
        }
        assert!(runtime.textures().is_empty());
    }

    #[test]
    fn notify_skips_other_sessions_and_unaffected_kinds() {
        let runtime = AudioRuntime::headless();
        let mut a = manual_session(&runtime, 64);
        let b = manual_session(&runtime, 64);

        let a_spectrum = a.create_texture(TextureKind::Spectrum).unwrap();
        let a_waveform = a.create_texture(TextureKind::Waveform).unwrap();
        let b_spectrum = b.create_texture(TextureKind::Spectrum).unwrap();

        a.push_frequency_values(vec![1; 64], vec![2; 64]).unwrap();

        assert_eq!(a_spectrum.generation(), 2);
        assert_eq!(a_waveform.generation(), 1);
        assert_eq!(b_spectrum.generation(), 1);
        assert_eq!(a_spectrum.image().unwrap().pixel(0, 0), Some([2, 2, 2, 255]));
    }

    #[test]
    fn notify_counts_refreshed_consumers() {
        let runtime = AudioRuntime::headless();
        let session = manual_session(&runtime, 64);
        let _textures: Vec<_> = (0..3)
            .map(|_| session.create_texture(TextureKind::Spectrum).unwrap())
            .collect();

        let refreshed = runtime
            .textures()
            .notify(SessionChange::time_domain(session.id()));
        assert_eq!(refreshed, 0);

        let refreshed = runtime.textures().notify(SessionChange::both(session.id()));
        assert_eq!(refreshed, 3);
    }

    #[test]
    fn max_samples_caps_width() {
        let runtime = AudioRuntime::headless();
        let session = manual_session(&runtime, 2048);
        let texture = session
            .create_texture_with_max(TextureKind::Spectrum, 32)
            .unwrap();
        assert_eq!(texture.image().unwrap().width(), 32);

        let err = session
            .create_texture_with_max(TextureKind::Spectrum, 0)
            .unwrap_err();
        assert!(matches!(err, ShaderAudioError::InvalidConfiguration(_)));
    }

    #[test]
    fn destroyed_session_is_never_notified() {
        let runtime = AudioRuntime::headless();
        let session = manual_session(&runtime, 64);
        let id = session.id();
        let texture = session.create_texture(TextureKind::Spectrum).unwrap();
        session.destroy();

        assert_eq!(runtime.textures().notify(SessionChange::both(id)), 0);
        assert_eq!(texture.image().unwrap().width(), 64);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "was destroyed")]
    fn refreshing_against_destroyed_session_fails_fast() {
        let runtime = AudioRuntime::headless();
        let session = manual_session(&runtime, 64);
        let texture = session.create_texture(TextureKind::Spectrum).unwrap();
        session.destroy();

        let _ = texture.refresh();
    }
}
