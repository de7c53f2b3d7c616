//! Ring buffer shared between a platform capture callback and the analysers.

use std::sync::{Mutex, MutexGuard};

use crate::{config::MAX_FFT_SIZE, Result, ShaderAudioError};

/// Stereo channel selector. Channel 0 of the input is left, channel 1 right.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Left,
    Right,
}

/// Most recent captured frames, de-interleaved per channel.
///
/// Mono input is written to both channels. Inputs with more than two channels
/// contribute only their first two.
#[derive(Debug)]
pub struct StereoFeed {
    ring: Mutex<StereoRing>,
}

#[derive(Debug)]
struct StereoRing {
    left: Vec<f32>,
    right: Vec<f32>,
    write_pos: usize,
    filled: usize,
    frames_written: u64,
}

impl Default for StereoFeed {
    fn default() -> Self {
        Self::new(MAX_FFT_SIZE)
    }
}

impl StereoFeed {
    /// Creates a feed that keeps the latest `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(StereoRing {
                left: vec![0.0; capacity],
                right: vec![0.0; capacity],
                write_pos: 0,
                filled: 0,
                frames_written: 0,
            }),
        }
    }

    /// Appends interleaved samples. Called from the capture callback, so a
    /// poisoned ring drops the block instead of panicking.
    pub fn write_interleaved(&self, data: &[f32], channels: usize) {
        if channels == 0 {
            return;
        }

        let Ok(mut ring) = self.ring.lock() else {
            return;
        };
        let capacity = ring.left.len();

        for frame in data.chunks_exact(channels) {
            let left = frame[0];
            let right = frame.get(1).copied().unwrap_or(left);
            let pos = ring.write_pos;
            ring.left[pos] = left;
            ring.right[pos] = right;
            ring.write_pos = (pos + 1) % capacity;
            ring.filled = (ring.filled + 1).min(capacity);
            ring.frames_written += 1;
        }
    }

    /// Copies the newest `out.len()` samples of `channel` into `out`, oldest
    /// first. Missing history is zero-filled at the front. Returns the number
    /// of captured samples copied.
    pub fn copy_latest(&self, channel: Channel, out: &mut [f32]) -> Result<usize> {
        let ring = self.lock()?;
        let capacity = ring.left.len();
        let source = match channel {
            Channel::Left => &ring.left,
            Channel::Right => &ring.right,
        };

        let available = ring.filled.min(out.len());
        let pad = out.len() - available;
        out[..pad].fill(0.0);

        let start = (ring.write_pos + capacity - available) % capacity;
        for (offset, slot) in out[pad..].iter_mut().enumerate() {
            *slot = source[(start + offset) % capacity];
        }

        Ok(available)
    }

    /// Total frames written since creation.
    pub fn frames_written(&self) -> u64 {
        self.ring.lock().map(|ring| ring.frames_written).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, StereoRing>> {
        self.ring
            .lock()
            .map_err(|_| ShaderAudioError::Poisoned("capture feed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleaves_stereo_frames() {
        let feed = StereoFeed::new(8);
        feed.write_interleaved(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3], 2);

        let mut left = [0.0; 3];
        let mut right = [0.0; 3];
        assert_eq!(feed.copy_latest(Channel::Left, &mut left).unwrap(), 3);
        feed.copy_latest(Channel::Right, &mut right).unwrap();

        assert_eq!(left, [0.1, 0.2, 0.3]);
        assert_eq!(right, [-0.1, -0.2, -0.3]);
        assert_eq!(feed.frames_written(), 3);
    }

    #[test]
    fn mono_input_feeds_both_channels() {
        let feed = StereoFeed::new(4);
        feed.write_interleaved(&[0.5, 0.25], 1);

        let mut right = [1.0; 4];
        assert_eq!(feed.copy_latest(Channel::Right, &mut right).unwrap(), 2);
        assert_eq!(right, [0.0, 0.0, 0.5, 0.25]);
    }

    #[test]
    fn wraps_and_keeps_newest_frames() {
        let feed = StereoFeed::new(4);
        let samples: Vec<f32> = (1..=6).map(|i| i as f32).collect();
        feed.write_interleaved(&samples, 1);

        let mut out = [0.0; 4];
        feed.copy_latest(Channel::Left, &mut out).unwrap();
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);

        let mut shorter = [0.0; 2];
        feed.copy_latest(Channel::Left, &mut shorter).unwrap();
        assert_eq!(shorter, [5.0, 6.0]);
    }

    #[test]
    fn ignores_extra_channels_and_partial_frames() {
        let feed = StereoFeed::new(4);
        feed.write_interleaved(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0], 3);

        let mut left = [0.0; 2];
        let mut right = [0.0; 2];
        feed.copy_latest(Channel::Left, &mut left).unwrap();
        feed.copy_latest(Channel::Right, &mut right).unwrap();
        assert_eq!(left, [1.0, 4.0]);
        assert_eq!(right, [2.0, 5.0]);
    }
}
