//! Render pipeline engine - scheduling, workers, caches, playback
//!
//! Independent of any UI: a front end owns one [`RenderBackend`] per
//! sequence and drives one [`Viewer`] per preview window.

pub mod backend;
pub mod cache_timer;
pub mod frame_cache;
pub mod notify;
pub mod playback;
pub mod resource_cache;
pub mod scheduling;
pub mod task_pool;
pub mod ticket;
pub mod time_range;
pub mod viewer;
pub mod worker;

// Re-exports for convenience
pub use backend::{BackendConfig, RenderBackend};
pub use frame_cache::{CacheStats, FrameHashCache};
pub use notify::{CacheEvent, Notifier};
pub use playback::{FrameSlot, PlaybackQueue};
pub use scheduling::SchedulingContext;
pub use ticket::{OwnerId, RenderTicket, TicketOutcome, TicketState};
pub use time_range::{TimeRange, TimeRangeList};
pub use viewer::{AudioSink, NullAudioSink, Viewer};
