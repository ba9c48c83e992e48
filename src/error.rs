//! Pipeline error type.
//!
//! Per-request failures never unwind across threads: workers turn them into
//! a failed [`TicketOutcome`](crate::core::ticket::TicketOutcome) and the
//! caller decides what to show. Only compile errors and I/O at the
//! application edge are returned directly.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// Graph could not be captured into a snapshot (missing output, cycle, ...)
    Compile(String),
    /// Source stream could not be opened or decoded
    Decode(String),
    /// Node evaluation failed
    Render(String),
    /// Cache file missing, unreadable or corrupt
    CacheMiss(PathBuf),
    /// Filesystem error while persisting a frame
    Io(String),
    /// Request was cancelled before a result was produced
    Cancelled,
    /// Backend is not compiled yet
    NotCompiled,
    /// Backend was closed
    Closed,
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Compile(e) => write!(f, "Compile error: {}", e),
            RenderError::Decode(e) => write!(f, "Decode error: {}", e),
            RenderError::Render(e) => write!(f, "Render error: {}", e),
            RenderError::CacheMiss(p) => write!(f, "Cache miss: {}", p.display()),
            RenderError::Io(e) => write!(f, "IO error: {}", e),
            RenderError::Cancelled => write!(f, "Cancelled"),
            RenderError::NotCompiled => write!(f, "Backend not compiled"),
            RenderError::Closed => write!(f, "Backend closed"),
        }
    }
}

impl std::error::Error for RenderError {}

impl From<std::io::Error> for RenderError {
    fn from(e: std::io::Error) -> Self {
        RenderError::Io(e.to_string())
    }
}
