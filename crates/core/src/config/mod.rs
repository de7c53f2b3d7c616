use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Result, ShaderAudioError, TextureKind};

/// Smallest fft size an analyser accepts.
pub const MIN_FFT_SIZE: usize = 32;
/// Largest fft size an analyser accepts.
pub const MAX_FFT_SIZE: usize = 32_768;
pub const DEFAULT_FFT_SIZE: usize = 2048;

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionOptions,
    pub textures: Vec<TextureSpec>,
    pub frame_rate: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionOptions::default(),
            textures: vec![
                TextureSpec::new(TextureKind::Spectrum),
                TextureSpec::new(TextureKind::Waveform),
            ],
            frame_rate: 60,
        }
    }
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        if self.frame_rate == 0 {
            return Err(ShaderAudioError::InvalidConfiguration(
                "frame_rate must be at least 1".to_string(),
            ));
        }
        for texture in &self.textures {
            if texture.max_samples == Some(0) {
                return Err(ShaderAudioError::InvalidConfiguration(format!(
                    "{} texture max_samples must be at least 1",
                    texture.kind.isf_type()
                )));
            }
        }
        Ok(())
    }
}

/// Options accepted when creating an [`AudioSession`](crate::AudioSession).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Input device to capture from. `None` resolves the platform default.
    pub device_id: Option<String>,
    /// Analysis window length; must be a power of two.
    pub fft_size: usize,
    /// When false the session only receives pushed values.
    pub use_live_capture: bool,
    pub analyser: AnalyserSettings,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            device_id: None,
            fft_size: DEFAULT_FFT_SIZE,
            use_live_capture: true,
            analyser: AnalyserSettings::default(),
        }
    }
}

impl SessionOptions {
    /// Manual-feed options: no capture device is touched.
    pub fn manual(fft_size: usize) -> Self {
        Self {
            fft_size,
            use_live_capture: false,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn half_fft_size(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> Result<()> {
        let size = self.fft_size;
        if !size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&size) {
            return Err(ShaderAudioError::InvalidConfiguration(format!(
                "fft_size {size} must be a power of two between {MIN_FFT_SIZE} and {MAX_FFT_SIZE}"
            )));
        }
        self.analyser.validate()
    }
}

/// Decibel window and smoothing applied by each channel analyser.
///
/// The defaults (-61..0 dB, no smoothing) line up the byte output with what
/// native ISF hosts feed their audio textures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserSettings {
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub smoothing_time_constant: f32,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self {
            min_decibels: -61.0,
            max_decibels: 0.0,
            smoothing_time_constant: 0.0,
        }
    }
}

impl AnalyserSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_decibels < self.max_decibels) {
            return Err(ShaderAudioError::InvalidConfiguration(format!(
                "min_decibels ({}) must be below max_decibels ({})",
                self.min_decibels, self.max_decibels
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            return Err(ShaderAudioError::InvalidConfiguration(format!(
                "smoothing_time_constant {} must lie within 0..=1",
                self.smoothing_time_constant
            )));
        }
        Ok(())
    }
}

/// A texture the driver should register against its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureSpec {
    pub kind: TextureKind,
    /// Width cap, mirroring the ISF `MAX` attribute on audio inputs.
    #[serde(default)]
    pub max_samples: Option<usize>,
}

impl TextureSpec {
    pub fn new(kind: TextureKind) -> Self {
        Self {
            kind,
            max_samples: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_isf_hosts() {
        let options = SessionOptions::default();
        assert_eq!(options.fft_size, 2048);
        assert_eq!(options.half_fft_size(), 1024);
        assert!(options.use_live_capture);
        assert_eq!(options.analyser.min_decibels, -61.0);
        assert_eq!(options.analyser.max_decibels, 0.0);
        assert_eq!(options.analyser.smoothing_time_constant, 0.0);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_fft() {
        for size in [0, 16, 1000, 3000, 65_536] {
            let err = SessionOptions::manual(size).validate().unwrap_err();
            assert!(matches!(err, ShaderAudioError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn rejects_inverted_decibel_range() {
        let mut options = SessionOptions::default();
        options.analyser.min_decibels = 0.0;
        options.analyser.max_decibels = -10.0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn parses_partial_json() {
        let config = AppConfig::from_json_str(
            r#"{
                "session": { "device_id": "hw:1", "fft_size": 512 },
                "textures": [{ "kind": "audioFFT", "max_samples": 32 }, { "kind": "audio" }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.session.device_id.as_deref(), Some("hw:1"));
        assert_eq!(config.session.fft_size, 512);
        assert!(config.session.use_live_capture);
        assert_eq!(config.frame_rate, 60);
        assert_eq!(config.textures[0].kind, TextureKind::Spectrum);
        assert_eq!(config.textures[0].max_samples, Some(32));
        assert_eq!(config.textures[1].kind, TextureKind::Waveform);
    }

    #[test]
    fn json_validation_failures_surface() {
        let err = AppConfig::from_json_str(r#"{ "session": { "fft_size": 100 } }"#).unwrap_err();
        assert!(format!("{err}").contains("fft_size 100"));

        let err = AppConfig::from_json_str(r#"{ "frame_rate": 0 }"#).unwrap_err();
        assert!(matches!(err, ShaderAudioError::InvalidConfiguration(_)));
    }
}
