use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
        Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
    },
    thread,
    time::{Duration, Instant},
};

use crate::{
    capture::{CaptureHandle, Channel, DeviceCaptureRegistry},
    AnalysisContext, AudioRuntime, ChannelAnalyser, Result, SessionOptions, ShaderAudioError,
    TextureConsumer, TextureConsumerRegistry, TextureKind,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// The four byte sequences a session publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionBuffers {
    pub frequency_left: Vec<u8>,
    pub frequency_right: Vec<u8>,
    pub time_domain_left: Vec<u8>,
    pub time_domain_right: Vec<u8>,
}

impl SessionBuffers {
    fn zeroed(fft_size: usize) -> Self {
        let half = fft_size / 2;
        Self {
            frequency_left: vec![0; fft_size],
            frequency_right: vec![0; fft_size],
            time_domain_left: vec![0; half],
            time_domain_right: vec![0; half],
        }
    }

    /// Left and right samples a texture of `kind` encodes.
    pub fn channels(&self, kind: TextureKind) -> (&[u8], &[u8]) {
        match kind {
            TextureKind::Spectrum => (&self.frequency_left, &self.frequency_right),
            TextureKind::Waveform => (&self.time_domain_left, &self.time_domain_right),
        }
    }
}

/// What changed in a session's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionChange {
    pub session: SessionId,
    pub frequency: bool,
    pub time_domain: bool,
}

impl SessionChange {
    /// Only the frequency buffers changed.
    pub fn frequency(session: SessionId) -> Self {
        Self {
            session,
            frequency: true,
            time_domain: false,
        }
    }

    /// Only the waveform buffers changed.
    pub fn time_domain(session: SessionId) -> Self {
        Self {
            session,
            frequency: false,
            time_domain: true,
        }
    }

    /// Every buffer changed, as after a pull update.
    pub fn both(session: SessionId) -> Self {
        Self {
            session,
            frequency: true,
            time_domain: true,
        }
    }

    /// Whether a texture of `kind` has to be re-encoded.
    pub fn affects(&self, kind: TextureKind) -> bool {
        match kind {
            TextureKind::Spectrum => self.frequency,
            TextureKind::Waveform => self.time_domain,
        }
    }
}

/// Non-owning reference to a session's buffers, held by texture consumers.
#[derive(Debug, Clone)]
pub struct SessionSource {
    id: SessionId,
    buffers: Weak<RwLock<SessionBuffers>>,
}

impl SessionSource {
    /// Returns the id of the session this source reads from.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// False once the session has been destroyed.
    pub fn is_alive(&self) -> bool {
        self.buffers.strong_count() > 0
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<RwLock<SessionBuffers>>> {
        self.buffers.upgrade()
    }
}

/// Where a session's data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Only pushed values; no capture requested or none available.
    Manual,
    /// Capture setup still running.
    Pending,
    /// Pull updates read from the analysers.
    Live,
    /// Capture setup failed; behaves like manual feed until retried.
    Degraded,
}

enum LiveState {
    Manual,
    Pending(Receiver<Result<Arc<CaptureHandle>>>),
    Live(LiveAnalysis),
    Degraded,
}

struct LiveAnalysis {
    capture: Arc<CaptureHandle>,
    _context: Arc<AnalysisContext>,
    left: ChannelAnalyser,
    right: ChannelAnalyser,
}

impl LiveAnalysis {
    fn read_into(&mut self, buffers: &mut SessionBuffers) -> Result<()> {
        let feed = self.capture.feed();
        feed.copy_latest(Channel::Left, self.left.input_mut())?;
        feed.copy_latest(Channel::Right, self.right.input_mut())?;

        self.left.byte_frequency_data(&mut buffers.frequency_left)?;
        self.left.byte_time_domain_data(&mut buffers.time_domain_left);
        self.right.byte_frequency_data(&mut buffers.frequency_right)?;
        self.right.byte_time_domain_data(&mut buffers.time_domain_right);
        Ok(())
    }
}

/// One independent consumer of live or externally fed audio.
///
/// Live sessions are pumped once per frame with [`pull_update`]; manual
/// sessions receive data through [`push_frequency_values`] and
/// [`push_time_domain_values`]. Either way every registered texture of the
/// session is re-encoded after the buffers change.
///
/// [`pull_update`]: Self::pull_update
/// [`push_frequency_values`]: Self::push_frequency_values
/// [`push_time_domain_values`]: Self::push_time_domain_values
pub struct AudioSession {
    id: SessionId,
    options: SessionOptions,
    buffers: Arc<RwLock<SessionBuffers>>,
    captures: Arc<DeviceCaptureRegistry>,
    textures: TextureConsumerRegistry,
    live: LiveState,
    last_update: Option<Instant>,
    last_error: Option<ShaderAudioError>,
}

impl AudioSession {
    /// Creates a session. Invalid options fail immediately; live capture
    /// setup continues in the background.
    pub fn new(options: SessionOptions, runtime: &AudioRuntime) -> Result<Self> {
        options.validate()?;

        let mut session = Self {
            id: SessionId::next(),
            buffers: Arc::new(RwLock::new(SessionBuffers::zeroed(options.fft_size))),
            captures: runtime.captures().clone(),
            textures: runtime.textures().clone(),
            live: LiveState::Manual,
            last_update: None,
            last_error: None,
            options,
        };

        tracing::debug!(
            session = %session.id,
            fft_size = session.options.fft_size,
            live = session.options.use_live_capture,
            "created audio session"
        );

        if session.options.use_live_capture {
            match session.start_live_capture() {
                Ok(()) | Err(ShaderAudioError::CaptureUnavailable) => {}
                Err(err) => tracing::debug!(session = %session.id, %err, "live capture not started"),
            }
        }

        Ok(session)
    }

    /// Starts (or restarts, after a failure) asynchronous capture setup.
    pub fn start_live_capture(&mut self) -> Result<()> {
        if matches!(self.live, LiveState::Live(_) | LiveState::Pending(_)) {
            return Ok(());
        }
        if !self.captures.is_available() {
            self.captures.warn_unavailable_once();
            self.live = LiveState::Manual;
            return Err(ShaderAudioError::CaptureUnavailable);
        }
        self.options.use_live_capture = true;

        let (tx, rx) = mpsc::channel();
        let captures = self.captures.clone();
        let device_id = self.options.device_id.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-capture-setup", self.id))
            .spawn(move || {
                let outcome = captures.acquire(device_id.as_deref());
                // A closed channel means the session is gone; drop the result.
                let _ = tx.send(outcome);
            });

        match spawned {
            Ok(_) => {
                self.live = LiveState::Pending(rx);
                self.last_error = None;
                Ok(())
            }
            Err(err) => {
                let err = ShaderAudioError::from(err);
                let message = err.to_string();
                self.fail_setup(err);
                Err(ShaderAudioError::msg(message))
            }
        }
    }

    /// Blocks until pending capture setup completes and reports its outcome.
    pub fn wait_for_capture(&mut self, timeout: Duration) -> Result<()> {
        if matches!(self.live, LiveState::Degraded) {
            return Err(self.degraded_error());
        }

        let outcome = match &self.live {
            LiveState::Pending(rx) => match rx.recv_timeout(timeout) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(ShaderAudioError::msg(format!(
                        "capture setup for {} still pending after {timeout:?}",
                        self.id
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => Err(setup_thread_lost()),
            },
            LiveState::Live(_) => return Ok(()),
            LiveState::Manual if self.options.use_live_capture => {
                return Err(ShaderAudioError::CaptureUnavailable)
            }
            LiveState::Manual | LiveState::Degraded => return Ok(()),
        };

        self.complete_setup(outcome);
        if matches!(self.live, LiveState::Live(_)) {
            Ok(())
        } else {
            Err(self.degraded_error())
        }
    }

    /// Reads fresh analyser output into the buffers and notifies consumers.
    ///
    /// Does nothing unless live capture is active and `now` is later than the
    /// previous update, so repeated pulls within one frame are free. Failures
    /// are logged, never returned.
    pub fn pull_update(&mut self, now: Instant) {
        self.poll_setup();

        let LiveState::Live(live) = &mut self.live else {
            return;
        };
        if self.last_update.is_some_and(|last| now <= last) {
            return;
        }

        let result = match self.buffers.write() {
            Ok(mut buffers) => live.read_into(&mut buffers),
            Err(_) => Err(ShaderAudioError::Poisoned("session buffers")),
        };
        if let Err(err) = result {
            tracing::warn!(session = %self.id, %err, "pull update skipped");
            return;
        }

        self.last_update = Some(now);
        self.textures.notify(SessionChange::both(self.id));
    }

    /// Replaces the frequency buffers with externally computed values.
    ///
    /// The length is free; textures resize to it. Both channels must have the
    /// same length.
    pub fn push_frequency_values(&mut self, left: impl Into<Vec<u8>>, right: impl Into<Vec<u8>>) -> Result<()> {
        let (left, right) = matching_pair("frequency", left.into(), right.into())?;
        {
            let mut buffers = self.write_buffers()?;
            buffers.frequency_left = left;
            buffers.frequency_right = right;
        }
        self.textures.notify(SessionChange::frequency(self.id));
        Ok(())
    }

    /// Replaces the waveform buffers with externally computed values.
    pub fn push_time_domain_values(&mut self, left: impl Into<Vec<u8>>, right: impl Into<Vec<u8>>) -> Result<()> {
        let (left, right) = matching_pair("time-domain", left.into(), right.into())?;
        {
            let mut buffers = self.write_buffers()?;
            buffers.time_domain_left = left;
            buffers.time_domain_right = right;
        }
        self.textures.notify(SessionChange::time_domain(self.id));
        Ok(())
    }

    /// Registers a texture consumer fed by this session.
    pub fn create_texture(&self, kind: TextureKind) -> Result<TextureConsumer> {
        self.textures.register(self.source(), kind, None)
    }

    /// Like [`create_texture`](Self::create_texture) with a width cap.
    pub fn create_texture_with_max(&self, kind: TextureKind, max_samples: usize) -> Result<TextureConsumer> {
        self.textures.register(self.source(), kind, Some(max_samples))
    }

    /// Releases the session. Shared capture streams and the analysis context
    /// stay alive for other sessions.
    pub fn destroy(self) {
        tracing::debug!(session = %self.id, "destroying audio session");
    }

    /// Returns the process-unique id of this session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the requested configuration. `use_live_capture` records what
    /// was asked for and stays set after a failed setup; see
    /// [`status`](Self::status) and [`uses_live_capture`](Self::uses_live_capture)
    /// for the current state.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Returns the analysis window size.
    pub fn fft_size(&self) -> usize {
        self.options.fft_size
    }

    /// Returns the waveform buffer length, half the window size.
    pub fn half_fft_size(&self) -> usize {
        self.options.half_fft_size()
    }

    /// Returns where the session currently gets its data from.
    pub fn status(&self) -> CaptureStatus {
        match self.live {
            LiveState::Manual => CaptureStatus::Manual,
            LiveState::Pending(_) => CaptureStatus::Pending,
            LiveState::Live(_) => CaptureStatus::Live,
            LiveState::Degraded => CaptureStatus::Degraded,
        }
    }

    /// True while pull updates can produce data (or may once setup finishes).
    pub fn uses_live_capture(&self) -> bool {
        matches!(self.live, LiveState::Live(_) | LiveState::Pending(_))
    }

    /// Returns the timestamp of the last pull that produced data.
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    /// Capture stream in use, once setup has completed.
    pub fn capture(&self) -> Option<&Arc<CaptureHandle>> {
        match &self.live {
            LiveState::Live(live) => Some(&live.capture),
            _ => None,
        }
    }

    /// Takes the error that put the session into degraded mode, if any.
    pub fn take_error(&mut self) -> Option<ShaderAudioError> {
        self.poll_setup();
        self.last_error.take()
    }

    /// Returns a read guard over the four published byte buffers.
    pub fn buffers(&self) -> Result<RwLockReadGuard<'_, SessionBuffers>> {
        self.buffers
            .read()
            .map_err(|_| ShaderAudioError::Poisoned("session buffers"))
    }

    /// Weak reference handed to texture consumers.
    pub fn source(&self) -> SessionSource {
        SessionSource {
            id: self.id,
            buffers: Arc::downgrade(&self.buffers),
        }
    }

    pub(crate) fn texture_registry(&self) -> &TextureConsumerRegistry {
        &self.textures
    }

    fn write_buffers(&self) -> Result<RwLockWriteGuard<'_, SessionBuffers>> {
        self.buffers
            .write()
            .map_err(|_| ShaderAudioError::Poisoned("session buffers"))
    }

    fn poll_setup(&mut self) {
        let outcome = match &self.live {
            LiveState::Pending(rx) => match rx.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => Err(setup_thread_lost()),
            },
            _ => return,
        };
        self.complete_setup(outcome);
    }

    fn complete_setup(&mut self, outcome: Result<Arc<CaptureHandle>>) {
        let analysis = outcome.and_then(|capture| {
            let context = self.captures.analysis_context();
            let fft_size = self.options.fft_size;
            let settings = self.options.analyser;
            Ok(LiveAnalysis {
                left: context.create_analyser(fft_size, settings)?,
                right: context.create_analyser(fft_size, settings)?,
                _context: context,
                capture,
            })
        });

        match analysis {
            Ok(live) => {
                tracing::info!(
                    session = %self.id,
                    device = %live.capture.device_id(),
                    "live capture ready"
                );
                self.live = LiveState::Live(live);
            }
            Err(err) => self.fail_setup(err),
        }
    }

    fn fail_setup(&mut self, err: ShaderAudioError) {
        tracing::error!(session = %self.id, %err, "live capture setup failed, session degraded to manual feed");
        self.live = LiveState::Degraded;
        self.last_error = Some(err);
    }

    fn degraded_error(&mut self) -> ShaderAudioError {
        self.last_error
            .take()
            .unwrap_or_else(|| ShaderAudioError::msg(format!("live capture for {} is degraded", self.id)))
    }
}

impl fmt::Debug for AudioSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSession")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("status", &self.status())
            .field("last_update", &self.last_update)
            .finish()
    }
}

fn matching_pair(domain: &str, left: Vec<u8>, right: Vec<u8>) -> Result<(Vec<u8>, Vec<u8>)> {
    if left.len() != right.len() {
        return Err(ShaderAudioError::InvalidInput(format!(
            "{domain} channels differ in length (left {}, right {})",
            left.len(),
            right.len()
        )));
    }
    Ok((left, right))
}

fn setup_thread_lost() -> ShaderAudioError {
    ShaderAudioError::msg("capture setup thread exited without reporting")
}
