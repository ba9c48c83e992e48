//! Entities - time, frames, render parameters, node graph and decoders

pub mod decoder;
pub mod frame;
pub mod graph;
pub mod params;
pub mod rational;

pub use decoder::{Decoder, DecoderFactory, DefaultDecoderFactory};
pub use frame::{Frame, SampleBuffer};
pub use graph::{GraphSnapshot, NodeGraph, NodeId, NodeKind, Value};
pub use params::{AudioParams, PixelFormat, VideoParams};
pub use rational::Rational;
