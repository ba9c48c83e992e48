//! Source decoders.
//!
//! A decoder is the expensive per-source resource (opened file, decoded still,
//! stream state) shared by every worker through the resource cache. Decoding
//! methods take `&self` so one instance can serve several workers at once.
//!
//! Source ids:
//! - `synthetic:<pattern>`: generated test pattern (`bars`, `ramp`, `fail`)
//! - anything else: path to a still image readable by the `image` crate

use log::debug;
use std::path::Path;
use std::sync::Arc;

use super::frame::{Frame, SampleBuffer};
use super::params::{AudioParams, VideoParams};
use super::rational::{Rational, time_to_timestamp};
use crate::core::time_range::TimeRange;
use crate::error::RenderError;

pub const SYNTHETIC_PREFIX: &str = "synthetic:";

pub trait Decoder: Send + Sync {
    fn source(&self) -> &str;

    fn decode_video(&self, time: Rational, params: &VideoParams) -> Result<Frame, RenderError>;

    fn decode_audio(&self, range: TimeRange, params: &AudioParams) -> Result<SampleBuffer, RenderError>;
}

/// Opens decoders by source id.
pub trait DecoderFactory: Send + Sync {
    fn open(&self, source: &str) -> Result<Arc<dyn Decoder>, RenderError>;
}

/// What graph evaluation needs from its environment: a decoder per source.
pub trait SourceProvider {
    fn decoder(&self, source: &str) -> Result<Arc<dyn Decoder>, RenderError>;
}

impl<T: DecoderFactory + ?Sized> DecoderFactory for Arc<T> {
    fn open(&self, source: &str) -> Result<Arc<dyn Decoder>, RenderError> {
        (**self).open(source)
    }
}

/// Synthetic patterns plus still images.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoderFactory;

impl DecoderFactory for DefaultDecoderFactory {
    fn open(&self, source: &str) -> Result<Arc<dyn Decoder>, RenderError> {
        if let Some(pattern) = source.strip_prefix(SYNTHETIC_PREFIX) {
            let decoder = SyntheticDecoder::new(source, pattern)?;
            return Ok(Arc::new(decoder));
        }
        Ok(Arc::new(StillImageDecoder::open(source)?))
    }
}

/// Provider that opens a fresh decoder on every call. Used where no resource
/// cache is around (one-off renders, tests).
pub struct DirectSources<F: DecoderFactory> {
    factory: F,
}

impl<F: DecoderFactory> DirectSources<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F: DecoderFactory> SourceProvider for DirectSources<F> {
    fn decoder(&self, source: &str) -> Result<Arc<dyn Decoder>, RenderError> {
        self.factory.open(source)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    /// Vertical bars scrolling one column per frame
    Bars,
    /// Horizontal gradient whose brightness follows the frame index
    Ramp,
    /// Always fails to decode
    Fail,
}

#[derive(Debug, Clone)]
pub struct SyntheticDecoder {
    source: String,
    pattern: Pattern,
}

impl SyntheticDecoder {
    pub fn new(source: &str, pattern: &str) -> Result<Self, RenderError> {
        let pattern = match pattern {
            "bars" => Pattern::Bars,
            "ramp" => Pattern::Ramp,
            "fail" => Pattern::Fail,
            other => return Err(RenderError::Decode(format!("unknown synthetic pattern '{}'", other))),
        };
        Ok(Self { source: source.to_string(), pattern })
    }
}

const BAR_COLORS: [[f32; 4]; 7] = [
    [0.75, 0.75, 0.75, 1.0],
    [0.75, 0.75, 0.0, 1.0],
    [0.0, 0.75, 0.75, 1.0],
    [0.0, 0.75, 0.0, 1.0],
    [0.75, 0.0, 0.75, 1.0],
    [0.75, 0.0, 0.0, 1.0],
    [0.0, 0.0, 0.75, 1.0],
];

impl Decoder for SyntheticDecoder {
    fn source(&self) -> &str {
        &self.source
    }

    fn decode_video(&self, time: Rational, params: &VideoParams) -> Result<Frame, RenderError> {
        let index = time_to_timestamp(time, params.timebase);
        let (w, h) = (params.width, params.height);
        let mut frame = Frame::new(w, h, params.format);

        match self.pattern {
            Pattern::Fail => return Err(RenderError::Decode(format!("{}: decode failed at {}", self.source, time))),
            Pattern::Bars => {
                let bar_w = (w / BAR_COLORS.len()).max(1);
                for y in 0..h {
                    for x in 0..w {
                        let col = (x as i64 + index).rem_euclid(w.max(1) as i64) as usize;
                        let color = BAR_COLORS[(col / bar_w).min(BAR_COLORS.len() - 1)];
                        frame.set_pixel(x, y, color);
                    }
                }
            }
            Pattern::Ramp => {
                let level = (index.rem_euclid(100) as f32) / 99.0;
                for y in 0..h {
                    for x in 0..w {
                        let v = level * (x as f32 + 0.5) / w as f32;
                        frame.set_pixel(x, y, [v, v, v, 1.0]);
                    }
                }
            }
        }
        Ok(frame.with_time(time))
    }

    /// 440 Hz sine, phase-continuous across requests.
    fn decode_audio(&self, range: TimeRange, params: &AudioParams) -> Result<SampleBuffer, RenderError> {
        if self.pattern == Pattern::Fail {
            return Err(RenderError::Decode(format!("{}: no audio", self.source)));
        }
        let frames = params.frames_for(range.length());
        let start = (range.in_point() * Rational::from_int(params.sample_rate as i64)).floor();
        let mut buffer = SampleBuffer::silent(*params, range.in_point(), frames);
        let channels = params.channels as usize;
        for i in 0..frames {
            let t = (start + i as i64) as f64 / params.sample_rate as f64;
            let s = (t * 440.0 * std::f64::consts::TAU).sin() as f32 * 0.25;
            for c in 0..channels {
                buffer.samples[i * channels + c] = s;
            }
        }
        Ok(buffer)
    }
}

/// Single image held for the whole timeline.
#[derive(Debug, Clone)]
pub struct StillImageDecoder {
    source: String,
    image: Frame,
}

impl StillImageDecoder {
    pub fn open(path: &str) -> Result<Self, RenderError> {
        let img = image::open(Path::new(path)).map_err(|e| RenderError::Decode(format!("{}: {}", path, e)))?;
        let (w, h) = (img.width() as usize, img.height() as usize);
        debug!("Opened still {} ({}x{})", path, w, h);
        Ok(Self {
            source: path.to_string(),
            image: Frame::from_f32_buffer(img.to_rgba32f().into_raw(), w, h),
        })
    }
}

impl Decoder for StillImageDecoder {
    fn source(&self) -> &str {
        &self.source
    }

    /// Nearest-neighbour fit to the output size.
    fn decode_video(&self, time: Rational, params: &VideoParams) -> Result<Frame, RenderError> {
        let (w, h) = (params.width, params.height);
        let (sw, sh) = (self.image.width(), self.image.height());
        if sw == 0 || sh == 0 {
            return Err(RenderError::Decode(format!("{}: empty image", self.source)));
        }
        let mut frame = Frame::new(w, h, params.format);
        for y in 0..h {
            for x in 0..w {
                frame.set_pixel(x, y, self.image.pixel(x * sw / w.max(1), y * sh / h.max(1)));
            }
        }
        Ok(frame.with_time(time))
    }

    fn decode_audio(&self, range: TimeRange, params: &AudioParams) -> Result<SampleBuffer, RenderError> {
        Ok(SampleBuffer::silent(*params, range.in_point(), params.frames_for(range.length())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::params::PixelFormat;

    fn params() -> VideoParams {
        VideoParams::new(14, 2, Rational::new(1, 24))
    }

    #[test]
    fn test_bars_scroll_with_time() {
        let dec = DefaultDecoderFactory.open("synthetic:bars").unwrap();
        let a = dec.decode_video(Rational::ZERO, &params()).unwrap();
        let b = dec.decode_video(Rational::new(1, 24), &params()).unwrap();
        assert_ne!(a.pixel_buffer(), b.pixel_buffer());
        assert_eq!(b.time(), Rational::new(1, 24));
    }

    #[test]
    fn test_unknown_pattern_and_fail_pattern() {
        assert!(DefaultDecoderFactory.open("synthetic:nope").is_err());
        let dec = DefaultDecoderFactory.open("synthetic:fail").unwrap();
        assert!(matches!(dec.decode_video(Rational::ZERO, &params()), Err(RenderError::Decode(_))));
    }

    #[test]
    fn test_missing_still_is_decode_error() {
        let err = DefaultDecoderFactory.open("/definitely/not/here.png").err().unwrap();
        assert!(matches!(err, RenderError::Decode(_)));
    }

    #[test]
    fn test_still_image_scales_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        let mut src = Frame::new(2, 2, PixelFormat::Rgba8);
        src.set_pixel(1, 1, [1.0, 0.0, 0.0, 1.0]);
        // Frame::save picks the encoder from the pixel format, not the extension
        src.save(&path).unwrap();

        let dec = DefaultDecoderFactory.open(path.to_str().unwrap()).unwrap();
        let frame = dec.decode_video(Rational::ZERO, &VideoParams::new(4, 4, Rational::new(1, 24))).unwrap();
        assert_eq!(frame.pixel(3, 3), [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(frame.pixel(0, 0), [0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sine_audio_length() {
        let dec = DefaultDecoderFactory.open("synthetic:bars").unwrap();
        let range = TimeRange::new(Rational::ZERO, Rational::new(20, 1000));
        let buf = dec.decode_audio(range, &AudioParams::default()).unwrap();
        assert_eq!(buf.frames(), 960);
        assert!(buf.samples.iter().any(|s| *s != 0.0));
    }
}
