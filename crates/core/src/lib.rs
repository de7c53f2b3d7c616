//! Audio analysis published as shader textures.
//!
//! Sessions capture (or receive) stereo audio, keep byte spectra and
//! waveforms per channel, and re-encode every registered texture consumer
//! whenever those buffers change. The encoded buffers follow the ISF audio
//! texture layout: two rows (right channel, left channel) of opaque grey
//! RGBA pixels.
//!
//! ```
//! use shader_audio_core::{AudioRuntime, SessionOptions, TextureKind};
//!
//! let runtime = AudioRuntime::headless();
//! let mut session = runtime.create_session(SessionOptions::manual(64))?;
//! let texture = session.create_texture(TextureKind::Spectrum)?;
//!
//! session.push_frequency_values(vec![10, 20], vec![1, 2])?;
//! assert_eq!(
//!     texture.image()?.pixels(),
//!     &[1, 1, 1, 255, 2, 2, 2, 255, 10, 10, 10, 255, 20, 20, 20, 255]
//! );
//! # Ok::<(), shader_audio_core::ShaderAudioError>(())
//! ```

pub mod analysis;
pub mod capture;
pub mod config;
pub mod error;
pub mod runtime;
pub mod session;
pub mod texture;

pub use analysis::{AnalysisContext, ChannelAnalyser};
pub use capture::{CaptureBackend, CaptureHandle, DeviceCaptureRegistry, InputDevice, NullBackend};
pub use config::{AnalyserSettings, AppConfig, SessionOptions, TextureSpec};
pub use error::{Result, ShaderAudioError};
pub use runtime::AudioRuntime;
pub use session::{AudioSession, CaptureStatus, SessionBuffers, SessionChange, SessionId, SessionSource};
pub use texture::{encode, encode_into, ConsumerId, TextureConsumer, TextureConsumerRegistry, TextureImage, TextureKind};
