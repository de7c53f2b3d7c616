//! RGBA encoding of session samples for shader audio inputs.
//!
//! Every texture is two rows tall: row 0 carries the right channel, row 1 the
//! left channel. Each sample becomes one opaque grey pixel `[v, v, v, 255]`.

mod registry;

use serde::{Deserialize, Serialize};

pub use registry::{ConsumerId, TextureConsumer, TextureConsumerRegistry};

/// Rows in every audio texture (right channel, then left).
pub const TEXTURE_ROWS: usize = 2;
pub const BYTES_PER_PIXEL: usize = 4;

/// Which session buffers a texture samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureKind {
    /// Frequency-domain magnitudes (ISF `audioFFT`).
    #[serde(rename = "audioFFT", alias = "spectrum")]
    Spectrum,
    /// Time-domain waveform (ISF `audio`).
    #[serde(rename = "audio", alias = "waveform")]
    Waveform,
}

impl TextureKind {
    /// Maps an ISF input `TYPE` onto a texture kind.
    pub fn from_isf_type(isf_type: &str) -> Option<Self> {
        match isf_type {
            "audioFFT" => Some(Self::Spectrum),
            "audio" => Some(Self::Waveform),
            _ => None,
        }
    }

    pub fn isf_type(self) -> &'static str {
        match self {
            Self::Spectrum => "audioFFT",
            Self::Waveform => "audio",
        }
    }
}

/// Pixel buffer handed to the renderer for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    kind: TextureKind,
    width: usize,
    pixels: Vec<u8>,
    generation: u64,
}

impl TextureImage {
    /// Empty image; the first encode sizes it.
    pub fn new(kind: TextureKind) -> Self {
        Self {
            kind,
            width: 0,
            pixels: Vec::new(),
            generation: 0,
        }
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    /// Pixels per row.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        TEXTURE_ROWS
    }

    /// Tightly packed RGBA8 data, `width * height * 4` bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Bumped on every encode. Renderers can skip uploads when unchanged.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// One row of RGBA data: 0 = right channel, 1 = left channel.
    pub fn row(&self, row: usize) -> Option<&[u8]> {
        let stride = self.width * BYTES_PER_PIXEL;
        self.pixels.get(row * stride..(row + 1) * stride)
    }

    pub fn pixel(&self, x: usize, row: usize) -> Option<[u8; 4]> {
        let bytes = self.row(row)?.chunks_exact(BYTES_PER_PIXEL).nth(x)?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

/// Encodes a channel pair into a new image.
pub fn encode(kind: TextureKind, left: &[u8], right: &[u8]) -> TextureImage {
    let mut image = TextureImage::new(kind);
    encode_into(&mut image, left, right, None);
    image
}

/// Re-encodes `image` in place, reusing its pixel allocation.
///
/// The width is the longer channel's length, capped at `max_samples`. A
/// shorter channel is padded with zero. When the cap applies, pixel `x` takes
/// sample `x * len / max_samples`.
pub fn encode_into(image: &mut TextureImage, left: &[u8], right: &[u8], max_samples: Option<usize>) {
    let len = left.len().max(right.len());
    let width = match max_samples {
        Some(max) if max < len => max,
        _ => len,
    };

    let stride = width * BYTES_PER_PIXEL;
    image.pixels.resize(stride * TEXTURE_ROWS, 0);
    let (right_row, left_row) = image.pixels.split_at_mut(stride);
    write_row(right_row, right, len, width);
    write_row(left_row, left, len, width);

    image.width = width;
    image.generation = image.generation.wrapping_add(1);
}

fn write_row(row: &mut [u8], samples: &[u8], len: usize, width: usize) {
    for (x, pixel) in row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
        let index = if width == len { x } else { x * len / width };
        let value = samples.get(index).copied().unwrap_or(0);
        pixel.copy_from_slice(&[value, value, value, 255]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_right_row_then_left_row() {
        let image = encode(TextureKind::Spectrum, &[10, 20], &[1, 2]);

        assert_eq!(
            image.pixels(),
            &[1, 1, 1, 255, 2, 2, 2, 255, 10, 10, 10, 255, 20, 20, 20, 255]
        );
        assert_eq!(image.width(), 2);
        assert_eq!(image.height(), 2);
        assert_eq!(image.pixel(1, 1), Some([20, 20, 20, 255]));
        assert_eq!(image.pixel(2, 0), None);
    }

    #[test]
    fn encoding_is_deterministic() {
        let left: Vec<u8> = (0..=255).collect();
        let right: Vec<u8> = left.iter().rev().copied().collect();

        let first = encode(TextureKind::Waveform, &left, &right);
        let second = encode(TextureKind::Waveform, &left, &right);
        assert_eq!(first.pixels(), second.pixels());
        assert_eq!(first.pixels().len(), 2 * 256 * 4);
    }

    #[test]
    fn reencoding_reuses_the_allocation() {
        let mut image = TextureImage::new(TextureKind::Spectrum);
        encode_into(&mut image, &[1; 512], &[2; 512], None);
        let ptr = image.pixels().as_ptr();

        encode_into(&mut image, &[3; 512], &[4; 512], None);
        assert_eq!(image.pixels().as_ptr(), ptr);
        assert_eq!(image.generation(), 2);
        assert_eq!(image.pixel(0, 0), Some([4, 4, 4, 255]));
        assert_eq!(image.pixel(511, 1), Some([3, 3, 3, 255]));
    }

    #[test]
    fn max_samples_decimates() {
        let left: Vec<u8> = (0..8).collect();
        let mut image = TextureImage::new(TextureKind::Spectrum);
        encode_into(&mut image, &left, &left, Some(4));

        assert_eq!(image.width(), 4);
        assert_eq!(image.pixels().len(), 2 * 4 * 4);
        let row: Vec<u8> = image.row(1).unwrap().chunks(4).map(|p| p[0]).collect();
        assert_eq!(row, vec![0, 2, 4, 6]);

        encode_into(&mut image, &left, &left, Some(32));
        assert_eq!(image.width(), 8);
    }

    #[test]
    fn uneven_channels_pad_with_zero() {
        let image = encode(TextureKind::Waveform, &[5, 6, 7], &[9]);
        assert_eq!(image.width(), 3);
        assert_eq!(image.pixel(0, 0), Some([9, 9, 9, 255]));
        assert_eq!(image.pixel(2, 0), Some([0, 0, 0, 255]));
        assert_eq!(image.pixel(2, 1), Some([7, 7, 7, 255]));
    }

    #[test]
    fn isf_type_names_round_trip() {
        assert_eq!(TextureKind::from_isf_type("audioFFT"), Some(TextureKind::Spectrum));
        assert_eq!(TextureKind::from_isf_type("audio"), Some(TextureKind::Waveform));
        assert_eq!(TextureKind::from_isf_type("image"), None);
        assert_eq!(TextureKind::Spectrum.isf_type(), "audioFFT");

        let kind: TextureKind = serde_json::from_str("\"spectrum\"").unwrap();
        assert_eq!(kind, TextureKind::Spectrum);
        assert_eq!(serde_json::to_string(&TextureKind::Waveform).unwrap(), "\"audio\"");
    }
}
