use std::{
    f32::consts::PI,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use shader_audio_core::{
    AppConfig, AudioRuntime, AudioSession, CaptureStatus, SessionOptions, TextureConsumer, TextureKind,
};
use tracing_subscriber::EnvFilter;

const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> shader_audio_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Live {
            config,
            device,
            fft_size,
            frames,
        } => {
            let mut config = match config {
                Some(path) => AppConfig::load(path)?,
                None => AppConfig::default(),
            };
            if device.is_some() {
                config.session.device_id = device;
            }
            if let Some(fft_size) = fft_size {
                config.session.fft_size = fft_size;
            }
            config.validate()?;
            run_live(&config, frames)
        }
        Commands::Synthetic { fft_size, frames } => run_synthetic(fft_size, frames),
    }
}

fn list_devices() -> shader_audio_core::Result<()> {
    let captures = AudioRuntime::shared().captures();
    if !captures.is_available() {
        tracing::warn!("no audio capture backend; build with `--features live`");
        return Ok(());
    }

    for device in captures.input_devices()? {
        let marker = if device.looks_default() { " (default)" } else { "" };
        println!("{}{marker}", device.id);
    }
    Ok(())
}

fn run_live(config: &AppConfig, frames: u64) -> shader_audio_core::Result<()> {
    tracing::info!(device = ?config.session.device_id, fft_size = config.session.fft_size, "starting live mode");

    let runtime = AudioRuntime::shared();
    let mut session = runtime.create_session(config.session.clone())?;
    if let Err(err) = session.wait_for_capture(CAPTURE_TIMEOUT) {
        tracing::warn!(%err, "continuing without live input");
    }

    let textures = config
        .textures
        .iter()
        .map(|spec| match spec.max_samples {
            Some(max) => session.create_texture_with_max(spec.kind, max),
            None => session.create_texture(spec.kind),
        })
        .collect::<shader_audio_core::Result<Vec<_>>>()?;

    let frame = Duration::from_secs(1) / config.frame_rate;
    pump(&mut session, &textures, frame, frames, |_, _| Ok(()))
}

fn run_synthetic(fft_size: usize, frames: u64) -> shader_audio_core::Result<()> {
    tracing::info!(fft_size, "starting synthetic feed");

    let runtime = AudioRuntime::shared();
    let mut session = runtime.create_session(SessionOptions::manual(fft_size))?;
    let textures = vec![
        session.create_texture(TextureKind::Spectrum)?,
        session.create_texture(TextureKind::Waveform)?,
    ];

    pump(
        &mut session,
        &textures,
        Duration::from_secs(1) / 60,
        frames,
        |session, index| {
            let (left, right) = synthetic_spectrum(session.fft_size(), index);
            session.push_frequency_values(left, right)?;
            let (left, right) = synthetic_waveform(session.half_fft_size(), index);
            session.push_time_domain_values(left, right)
        },
    )
}

/// Drives one session at a fixed frame interval, the way a render loop would.
fn pump<F>(
    session: &mut AudioSession,
    textures: &[TextureConsumer],
    frame: Duration,
    frames: u64,
    mut feed: F,
) -> shader_audio_core::Result<()>
where
    F: FnMut(&mut AudioSession, u64) -> shader_audio_core::Result<()>,
{
    for index in 0..frames {
        let started = Instant::now();
        feed(session, index)?;
        session.pull_update(started);

        if index % 30 == 0 {
            report(session, textures)?;
        }
        thread::sleep(frame.saturating_sub(started.elapsed()));
    }
    Ok(())
}

fn report(session: &AudioSession, textures: &[TextureConsumer]) -> shader_audio_core::Result<()> {
    for texture in textures {
        let image = texture.image()?;
        let mean = mean_level(image.row(1).unwrap_or_default());
        tracing::info!(
            session = %session.id(),
            status = ?session.status(),
            texture = %texture.id(),
            kind = texture.kind().isf_type(),
            width = image.width(),
            generation = image.generation(),
            mean,
            "texture"
        );
    }
    if session.status() == CaptureStatus::Degraded {
        tracing::warn!(session = %session.id(), "live capture degraded, textures hold their last values");
    }
    Ok(())
}

fn mean_level(row: &[u8]) -> f32 {
    let pixels = row.len() / 4;
    if pixels == 0 {
        return 0.0;
    }
    let sum: u32 = row.chunks_exact(4).map(|pixel| u32::from(pixel[0])).sum();
    sum as f32 / pixels as f32
}

fn synthetic_spectrum(len: usize, frame: u64) -> (Vec<u8>, Vec<u8>) {
    let peak = (frame as usize * 4) % len.max(1);
    let bin = |i: usize| {
        let distance = i.abs_diff(peak) as f32;
        (255.0 * (-distance / 8.0).exp()) as u8
    };
    let left = (0..len).map(bin).collect();
    let right = (0..len).map(|i| bin(i) / 2).collect();
    (left, right)
}

fn synthetic_waveform(len: usize, frame: u64) -> (Vec<u8>, Vec<u8>) {
    let phase = frame as f32 * 0.1;
    let sample = |i: usize, gain: f32| {
        let t = i as f32 / len.max(1) as f32;
        (128.0 + 127.0 * gain * (2.0 * PI * 4.0 * t + phase).sin()) as u8
    };
    let left = (0..len).map(|i| sample(i, 1.0)).collect();
    let right = (0..len).map(|i| sample(i, 0.5)).collect();
    (left, right)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Audio textures for ISF shaders", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List audio input devices.
    Devices,
    /// Capture an input device and pump its textures like a render loop.
    Live {
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Input device id; the platform default when omitted.
        #[arg(short, long)]
        device: Option<String>,
        /// Analysis window, a power of two.
        #[arg(long)]
        fft_size: Option<usize>,
        /// Frames to run before exiting.
        #[arg(long, default_value_t = 600)]
        frames: u64,
    },
    /// Feed generated spectra and waveforms without any audio hardware.
    Synthetic {
        #[arg(long, default_value_t = 2048)]
        fft_size: usize,
        #[arg(long, default_value_t = 300)]
        frames: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_data_matches_requested_lengths() {
        let (left, right) = synthetic_spectrum(2048, 3);
        assert_eq!(left.len(), 2048);
        assert_eq!(right.len(), 2048);
        assert_eq!(left[12], 255);

        let (left, right) = synthetic_waveform(1024, 0);
        assert_eq!(left.len(), 1024);
        assert_eq!(right[0], 128);
    }

    #[test]
    fn mean_level_reads_red_channel() {
        assert_eq!(mean_level(&[10, 10, 10, 255, 30, 30, 30, 255]), 20.0);
        assert_eq!(mean_level(&[]), 0.0);
    }

    #[test]
    fn cli_parses_live_overrides() {
        let cli = Cli::try_parse_from(["app", "live", "--device", "hw:1", "--fft-size", "512"]).unwrap();
        match cli.command {
            Commands::Live {
                device, fft_size, frames, ..
            } => {
                assert_eq!(device.as_deref(), Some("hw:1"));
                assert_eq!(fft_size, Some(512));
                assert_eq!(frames, 600);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
