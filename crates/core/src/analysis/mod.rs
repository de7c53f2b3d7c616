use std::{
    f32::consts::PI,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::AnalyserSettings, Result, SessionOptions};

const BLACKMAN_ALPHA: f32 = 0.16;

/// Shared analysis graph. One instance is created lazily per
/// [`DeviceCaptureRegistry`](crate::DeviceCaptureRegistry) and every live
/// session builds its analysers from it.
///
/// The context starts suspended; acquiring a capture stream resumes it.
#[derive(Debug, Default)]
pub struct AnalysisContext {
    running: AtomicBool,
    analysers_created: AtomicUsize,
}

impl AnalysisContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Starts processing. Logs only on the transition.
    pub fn resume(&self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("analysis context resumed");
        }
    }

    /// Stops processing until the next resume.
    pub fn suspend(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Returns whether the context is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of analyser nodes created from this context so far.
    pub fn analysers_created(&self) -> usize {
        self.analysers_created.load(Ordering::Relaxed)
    }

    /// Builds one channel analyser for the given fft size and decibel window.
    pub fn create_analyser(
        &self,
        fft_size: usize,
        settings: AnalyserSettings,
    ) -> Result<ChannelAnalyser> {
        SessionOptions {
            fft_size,
            analyser: settings,
            ..SessionOptions::default()
        }
        .validate()?;

        let analyser = ChannelAnalyser::new(fft_size, settings);
        self.analysers_created.fetch_add(1, Ordering::Relaxed);
        Ok(analyser)
    }
}

/// Single-channel spectrum and waveform extractor.
///
/// Byte output follows the usual analyser-node conventions: a Blackman
/// windowed FFT over the latest `fft_size` samples, magnitudes converted to
/// decibels and mapped linearly from `min_decibels..max_decibels` onto
/// `0..=255`, and time-domain samples mapped from `-1.0..1.0` onto
/// `0..=255` with silence at 128.
pub struct ChannelAnalyser {
    fft_size: usize,
    settings: AnalyserSettings,
    window: Vec<f32>,
    samples: Vec<f32>,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl ChannelAnalyser {
    fn new(fft_size: usize, settings: AnalyserSettings) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(fft_size);
        let fft = FftResources {
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Self {
            fft_size,
            settings,
            window: (0..fft_size).map(|i| blackman_value(i, fft_size)).collect(),
            samples: vec![0.0; fft_size],
            smoothed: vec![0.0; fft_size / 2],
            fft,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of magnitude bins produced per read (`fft_size / 2`).
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn settings(&self) -> AnalyserSettings {
        self.settings
    }

    /// Time-domain window the next reads operate on, oldest sample first.
    pub fn input_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Replaces the analysis window. Shorter input is right-aligned so the
    /// newest sample always sits at the end of the window.
    pub fn set_input(&mut self, samples: &[f32]) {
        let take = samples.len().min(self.fft_size);
        let offset = self.fft_size - take;
        self.samples[..offset].fill(0.0);
        self.samples[offset..].copy_from_slice(&samples[samples.len() - take..]);
    }

    /// Writes the current magnitude spectrum as bytes into `out`.
    ///
    /// At most [`frequency_bin_count`](Self::frequency_bin_count) values are
    /// written; any remaining tail of `out` is left untouched.
    pub fn byte_frequency_data(&mut self, out: &mut [u8]) -> Result<()> {
        self.update_spectrum()?;

        let AnalyserSettings {
            min_decibels,
            max_decibels,
            ..
        } = self.settings;
        let range = max_decibels - min_decibels;

        for (byte, magnitude) in out.iter_mut().zip(&self.smoothed) {
            let decibels = linear_to_decibels(*magnitude);
            let scaled = 255.0 * (decibels - min_decibels) / range;
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }

        Ok(())
    }

    /// Writes the first `out.len()` samples of the window as bytes.
    pub fn byte_time_domain_data(&self, out: &mut [u8]) {
        for (byte, sample) in out.iter_mut().zip(&self.samples) {
            let scaled = 128.0 * (sample + 1.0);
            *byte = scaled.clamp(0.0, 255.0) as u8;
        }
    }

    fn update_spectrum(&mut self) -> Result<()> {
        let fft = &mut self.fft;
        for ((slot, sample), weight) in fft.input.iter_mut().zip(&self.samples).zip(&self.window) {
            *slot = sample * weight;
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)?;

        let k = self.settings.smoothing_time_constant;
        let scale = 1.0 / self.fft_size as f32;
        for (previous, bin) in self.smoothed.iter_mut().zip(&fft.spectrum) {
            let magnitude = bin.norm() * scale;
            let value = k * *previous + (1.0 - k) * magnitude;
            *previous = if value.is_finite() { value } else { 0.0 };
        }

        Ok(())
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for ChannelAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAnalyser")
            .field("fft_size", &self.fft_size)
            .field("settings", &self.settings)
            .finish()
    }
}

fn linear_to_decibels(value: f32) -> f32 {
    if value <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * value.log10()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    let a0 = 0.5 * (1.0 - BLACKMAN_ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * BLACKMAN_ALPHA;
    let x = index as f32 / len as f32;

    a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyser(fft_size: usize) -> ChannelAnalyser {
        AnalysisContext::new()
            .create_analyser(fft_size, AnalyserSettings::default())
            .unwrap()
    }

    fn sine(fft_size: usize, bin: usize, amplitude: f32) -> Vec<f32> {
        (0..fft_size)
            .map(|i| amplitude * (2.0 * PI * bin as f32 * i as f32 / fft_size as f32).sin())
            .collect()
    }

    #[test]
    fn silence_maps_to_floor_and_midline() {
        let mut analyser = analyser(256);
        let mut frequency = vec![7u8; 128];
        let mut waveform = vec![7u8; 128];

        analyser.byte_frequency_data(&mut frequency).unwrap();
        analyser.byte_time_domain_data(&mut waveform);

        assert!(frequency.iter().all(|&v| v == 0));
        assert!(waveform.iter().all(|&v| v == 128));
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let mut analyser = analyser(256);
        analyser.set_input(&sine(256, 8, 1.0));

        let mut frequency = vec![0u8; 128];
        analyser.byte_frequency_data(&mut frequency).unwrap();

        let peak = frequency
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 8);
        assert!(frequency[8] > 150);
        assert_eq!(frequency[64], 0);
    }

    #[test]
    fn frequency_output_leaves_tail_untouched() {
        let mut analyser = analyser(64);
        analyser.set_input(&sine(64, 4, 1.0));

        let mut frequency = vec![9u8; 64];
        analyser.byte_frequency_data(&mut frequency).unwrap();

        assert!(frequency[32..].iter().all(|&v| v == 9));
        assert!(frequency[4] > 0);
    }

    #[test]
    fn time_domain_scales_and_clamps() {
        let mut analyser = analyser(32);
        analyser.set_input(&[0.5, -1.0, 1.0, 0.0]);

        let mut waveform = vec![0u8; 32];
        analyser.byte_time_domain_data(&mut waveform);

        assert!(waveform[..28].iter().all(|&v| v == 128));
        assert_eq!(&waveform[28..], &[192, 0, 255, 128]);
    }

    #[test]
    fn smoothing_carries_previous_magnitudes() {
        let settings = AnalyserSettings {
            smoothing_time_constant: 0.5,
            ..AnalyserSettings::default()
        };
        let mut analyser = AnalysisContext::new().create_analyser(256, settings).unwrap();
        let mut first = vec![0u8; 128];
        let mut second = vec![0u8; 128];

        analyser.set_input(&sine(256, 8, 1.0));
        analyser.byte_frequency_data(&mut first).unwrap();
        analyser.set_input(&[]);
        analyser.byte_frequency_data(&mut second).unwrap();

        assert!(second[8] > 0);
        assert!(second[8] < first[8]);
    }

    #[test]
    fn context_counts_analysers_and_rejects_bad_sizes() {
        let context = AnalysisContext::new();
        assert!(!context.is_running());
        context.resume();
        assert!(context.is_running());

        context.create_analyser(2048, AnalyserSettings::default()).unwrap();
        assert!(context.create_analyser(1000, AnalyserSettings::default()).is_err());
        assert_eq!(context.analysers_created(), 1);
    }
}
