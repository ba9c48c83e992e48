//! Render parameters that are part of the cache identity.

use serde::{Deserialize, Serialize};
use sha2::Digest;

use super::rational::Rational;

/// Output pixel storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PixelFormat {
    #[default]
    Rgba8,
    RgbaF32,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Rgba8 => "rgba8",
            PixelFormat::RgbaF32 => "rgba32f",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoParams {
    pub width: usize,
    pub height: usize,
    /// Seconds per frame
    pub timebase: Rational,
    pub format: PixelFormat,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            width: 320,
            height: 180,
            timebase: Rational::new(1, 24),
            format: PixelFormat::Rgba8,
        }
    }
}

impl VideoParams {
    pub fn new(width: usize, height: usize, timebase: Rational) -> Self {
        Self { width, height, timebase, format: PixelFormat::Rgba8 }
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn fps(&self) -> f64 {
        1.0 / self.timebase.to_f64()
    }

    /// Feed identity-relevant fields into a digest.
    pub fn digest_into(&self, hasher: &mut sha2::Sha256) {
        hasher.update(b"video");
        hasher.update((self.width as u64).to_le_bytes());
        hasher.update((self.height as u64).to_le_bytes());
        hasher.update(self.timebase.num().to_le_bytes());
        hasher.update(self.timebase.den().to_le_bytes());
        hasher.update(self.format.as_str().as_bytes());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioParams {
    fn default() -> Self {
        Self { sample_rate: 48000, channels: 2 }
    }
}

impl AudioParams {
    /// Sample frames covering `duration` seconds, rounded down.
    pub fn frames_for(&self, duration: Rational) -> usize {
        (duration * Rational::from_int(self.sample_rate as i64)).floor().max(0) as usize
    }

    pub fn digest_into(&self, hasher: &mut sha2::Sha256) {
        hasher.update(b"audio");
        hasher.update(self.sample_rate.to_le_bytes());
        hasher.update(self.channels.to_le_bytes());
    }
}
