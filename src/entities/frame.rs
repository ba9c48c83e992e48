//! Rendered frames and audio buffers.
//!
//! **Why**: Results are produced once on a worker and then shared by `Arc`
//! between the backend, playback queue and display slot, so unlike a
//! loader-side frame these are immutable after construction.
//!
//! # Pixel Formats
//!
//! - `PixelBuffer::U8`: 8-bit RGBA, persisted as PNG
//! - `PixelBuffer::F32`: float RGBA, persisted as OpenEXR
//!
//! Cache files have no extension (the name is the content hash), so loading
//! sniffs the format from the file header.

use log::debug;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::params::{AudioParams, PixelFormat};
use super::rational::Rational;
use crate::error::RenderError;

/// Pixel storage, always 4 channels per pixel
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    F32(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    buffer: PixelBuffer,
    width: usize,
    height: usize,
    time: Rational,
}

impl Frame {
    /// Transparent black frame
    pub fn new(width: usize, height: usize, format: PixelFormat) -> Self {
        let len = width * height * 4;
        let buffer = match format {
            PixelFormat::Rgba8 => PixelBuffer::U8(vec![0; len]),
            PixelFormat::RgbaF32 => PixelBuffer::F32(vec![0.0; len]),
        };
        Self { buffer, width, height, time: Rational::ZERO }
    }

    pub fn from_u8_buffer(buffer: Vec<u8>, width: usize, height: usize) -> Self {
        Self { buffer: PixelBuffer::U8(buffer), width, height, time: Rational::ZERO }
    }

    pub fn from_f32_buffer(buffer: Vec<f32>, width: usize, height: usize) -> Self {
        Self { buffer: PixelBuffer::F32(buffer), width, height, time: Rational::ZERO }
    }

    pub fn with_time(mut self, time: Rational) -> Self {
        self.time = time;
        self
    }

    pub fn time(&self) -> Rational {
        self.time
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        match self.buffer {
            PixelBuffer::U8(_) => PixelFormat::Rgba8,
            PixelBuffer::F32(_) => PixelFormat::RgbaF32,
        }
    }

    pub fn pixel_buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    /// Memory size in bytes
    pub fn mem(&self) -> usize {
        match &self.buffer {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::F32(v) => v.len() * 4,
        }
    }

    /// Read a pixel as normalized float RGBA
    pub fn pixel(&self, x: usize, y: usize) -> [f32; 4] {
        let i = (y * self.width + x) * 4;
        match &self.buffer {
            PixelBuffer::U8(v) => [
                v[i] as f32 / 255.0,
                v[i + 1] as f32 / 255.0,
                v[i + 2] as f32 / 255.0,
                v[i + 3] as f32 / 255.0,
            ],
            PixelBuffer::F32(v) => [v[i], v[i + 1], v[i + 2], v[i + 3]],
        }
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, rgba: [f32; 4]) {
        let i = (y * self.width + x) * 4;
        match &mut self.buffer {
            PixelBuffer::U8(v) => {
                for c in 0..4 {
                    v[i + c] = (rgba[c].clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            }
            PixelBuffer::F32(v) => v[i..i + 4].copy_from_slice(&rgba),
        }
    }

    /// Persist to `path`. Writes to a sibling temp file and renames, so a
    /// concurrent reader sees either nothing or the complete file.
    pub fn save(&self, path: &Path) -> Result<(), RenderError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));

        let result = {
            let file = fs::File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            match &self.buffer {
                PixelBuffer::U8(v) => {
                    let img = image::RgbaImage::from_raw(self.width as u32, self.height as u32, v.clone())
                        .ok_or_else(|| RenderError::Io("buffer size mismatch".into()))?;
                    img.write_to(&mut writer, image::ImageFormat::Png)
                }
                PixelBuffer::F32(v) => {
                    let img = image::Rgba32FImage::from_raw(self.width as u32, self.height as u32, v.clone())
                        .ok_or_else(|| RenderError::Io("buffer size mismatch".into()))?;
                    image::DynamicImage::ImageRgba32F(img).write_to(&mut writer, image::ImageFormat::OpenExr)
                }
            }
        };

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(RenderError::Io(e.to_string()));
        }
        fs::rename(&tmp, path)?;
        debug!("Saved frame {}x{} to {}", self.width, self.height, path.display());
        Ok(())
    }

    /// Load a frame persisted by [`Frame::save`].
    ///
    /// Any failure maps to `RenderError::CacheMiss` so callers treat missing
    /// and corrupt files the same way.
    pub fn load(path: &Path) -> Result<Frame, RenderError> {
        let miss = || RenderError::CacheMiss(path.to_path_buf());

        let file = fs::File::open(path).map_err(|_| miss())?;
        let reader = image::ImageReader::new(BufReader::new(file))
            .with_guessed_format()
            .map_err(|_| miss())?;
        let format = reader.format().ok_or_else(miss)?;
        let img = reader.decode().map_err(|e| {
            debug!("Cache file {} failed to decode: {}", path.display(), e);
            miss()
        })?;

        let width = img.width() as usize;
        let height = img.height() as usize;
        let frame = match format {
            image::ImageFormat::OpenExr => Frame::from_f32_buffer(img.to_rgba32f().into_raw(), width, height),
            _ => Frame::from_u8_buffer(img.to_rgba8().into_raw(), width, height),
        };
        Ok(frame)
    }
}

/// Interleaved float PCM for one audio request
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub params: AudioParams,
    pub time: Rational,
    pub samples: Vec<f32>,
}

impl SampleBuffer {
    pub fn silent(params: AudioParams, time: Rational, frames: usize) -> Self {
        Self {
            params,
            time,
            samples: vec![0.0; frames * params.channels as usize],
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frames(&self) -> usize {
        self.samples.len() / self.params.channels.max(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_roundtrip_u8() {
        let mut frame = Frame::new(4, 2, PixelFormat::Rgba8);
        frame.set_pixel(3, 1, [1.0, 0.5, 0.0, 1.0]);
        let px = frame.pixel(3, 1);
        assert_eq!(px[0], 1.0);
        assert!((px[1] - 0.5).abs() < 0.01);
        assert_eq!(frame.mem(), 4 * 2 * 4);
    }

    #[test]
    fn test_save_and_load_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("abcdef");

        let mut frame = Frame::new(8, 8, PixelFormat::Rgba8);
        frame.set_pixel(2, 2, [0.0, 1.0, 0.0, 1.0]);
        frame.save(&path).unwrap();

        let loaded = Frame::load(&path).unwrap();
        assert_eq!(loaded.pixel_format(), PixelFormat::Rgba8);
        assert_eq!(loaded.pixel_buffer(), frame.pixel_buffer());
    }

    #[test]
    fn test_save_and_load_exr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("float");

        let mut frame = Frame::new(4, 4, PixelFormat::RgbaF32);
        frame.set_pixel(1, 1, [2.5, 0.25, 0.0, 1.0]);
        frame.save(&path).unwrap();

        let loaded = Frame::load(&path).unwrap();
        assert_eq!(loaded.pixel_format(), PixelFormat::RgbaF32);
        assert_eq!(loaded.pixel(1, 1), [2.5, 0.25, 0.0, 1.0]);
    }

    #[test]
    fn test_missing_and_corrupt_are_cache_misses() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(Frame::load(&missing), Err(RenderError::CacheMiss(_))));

        let corrupt = dir.path().join("corrupt");
        fs::write(&corrupt, b"not an image at all").unwrap();
        assert!(matches!(Frame::load(&corrupt), Err(RenderError::CacheMiss(_))));
    }

    #[test]
    fn test_sample_buffer_frames() {
        let params = AudioParams { sample_rate: 48000, channels: 2 };
        let buf = SampleBuffer::silent(params, Rational::ZERO, 960);
        assert_eq!(buf.samples.len(), 1920);
        assert_eq!(buf.frames(), 960);
    }
}
