//! rendercache - asynchronous frame render, disk cache and playback pipeline
//!
//! Re-exports all modules for use by binary targets.

// Core engine (backend, workers, caches, viewer)
pub mod core;
pub mod entities;

// App modules
pub mod cli;
pub mod config;
pub mod error;
pub mod paths;

pub use core::{RenderBackend, Viewer};
pub use entities::{Frame, NodeGraph, Rational};
pub use error::RenderError;
