//! Playback queue, wall clock, boundary handling and the display slot.
//!
//! Timestamps here are integer frame indices in the sequence timebase.
//! `speed` is signed: positive plays forward, negative backward, and its
//! magnitude is the number of frames advanced per frame duration.

use log::trace;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::entities::frame::Frame;
use crate::entities::rational::Rational;

/// Upper bound on frames requested ahead of the playhead
pub const MAX_PREQUEUE: usize = 16;

#[derive(Debug, Clone)]
pub struct QueuedFrame {
    pub timestamp: i64,
    /// `None` when the render failed; shows nothing
    pub frame: Option<Arc<Frame>>,
}

/// Frames waiting to be shown, kept in play-direction order regardless of
/// the order workers finished them.
#[derive(Debug, Default)]
pub struct PlaybackQueue {
    frames: VecDeque<QueuedFrame>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert by timestamp: ascending when `speed > 0`, descending otherwise.
    pub fn append_timewise(&mut self, entry: QueuedFrame, speed: i32) {
        let pos = if speed >= 0 {
            self.frames.iter().position(|f| f.timestamp > entry.timestamp)
        } else {
            self.frames.iter().position(|f| f.timestamp < entry.timestamp)
        };
        match pos {
            Some(i) => self.frames.insert(i, entry),
            None => self.frames.push_back(entry),
        }
    }

    pub fn front(&self) -> Option<&QueuedFrame> {
        self.frames.front()
    }

    pub fn pop_front(&mut self) -> Option<QueuedFrame> {
        self.frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        self.frames.iter().map(|f| f.timestamp)
    }
}

/// How many frames to keep requested ahead of `current`.
///
/// Counts the positions `current, current + speed, ...` that still fall inside
/// `bounds` (`min <= ts < max`), capped at `max_prequeue`. A playhead outside
/// the bounds has nothing to queue.
pub fn look_ahead(max_prequeue: usize, current: i64, bounds: PlayBounds, speed: i32) -> usize {
    if speed == 0 || current < bounds.min || current >= bounds.max {
        return 0;
    }
    let step = speed.unsigned_abs() as i64;
    let room = if speed > 0 { bounds.max - 1 - current } else { current - bounds.min };
    (room / step + 1).clamp(0, max_prequeue as i64) as usize
}

/// Wall-clock to timestamp mapping for a running playback.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackClock {
    start: Instant,
    start_ts: i64,
    speed: i32,
    timebase: Rational,
}

impl PlaybackClock {
    pub fn start(start_ts: i64, speed: i32, timebase: Rational) -> Self {
        Self::start_at(Instant::now(), start_ts, speed, timebase)
    }

    pub fn start_at(now: Instant, start_ts: i64, speed: i32, timebase: Rational) -> Self {
        trace!("PlaybackClock: start {} at speed {}", start_ts, speed);
        Self { start: now, start_ts, speed, timebase }
    }

    pub fn speed(&self) -> i32 {
        self.speed
    }

    pub fn timestamp_now(&self) -> i64 {
        self.timestamp_at(Instant::now())
    }

    /// `start + floor(elapsed / timebase) * speed`
    pub fn timestamp_at(&self, now: Instant) -> i64 {
        if self.timebase <= Rational::ZERO {
            return self.start_ts;
        }
        let nanos = now.saturating_duration_since(self.start).as_nanos().min(i64::MAX as u128) as i64;
        let frames = (Rational::new(nanos, 1_000_000_000) / self.timebase).floor();
        self.start_ts + frames * self.speed as i64
    }
}

/// Playable span in timestamps, both ends inclusive as positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayBounds {
    pub min: i64,
    pub max: i64,
}

impl PlayBounds {
    /// The workarea when looping or playing the selection only, else the
    /// whole sequence.
    pub fn resolve(length: i64, workarea: Option<(i64, i64)>, looping: bool, in_to_out_only: bool) -> Self {
        match workarea {
            Some((min, max)) if looping || in_to_out_only => Self { min, max },
            _ => Self { min: 0, max: length },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockStep {
    /// Inside the bounds; show this timestamp
    Advance(i64),
    /// Looped: restart playback from here with the same signed speed
    Wrap { to: i64, speed: i32 },
    /// Hit a bound without looping; park here and pause
    Stop(i64),
}

/// Decide what a clock reading means for the playhead.
pub fn step_clock(current: i64, speed: i32, bounds: PlayBounds, looping: bool) -> ClockStep {
    let tripped = (speed < 0 && current <= bounds.min) || (speed > 0 && current >= bounds.max);
    if !tripped {
        return ClockStep::Advance(current);
    }
    // Past both ends at once counts as the lower one
    let hit = if current <= bounds.min { bounds.min } else { bounds.max };
    if looping {
        let to = if hit == bounds.min { bounds.max } else { bounds.min };
        ClockStep::Wrap { to, speed }
    } else {
        ClockStep::Stop(hit)
    }
}

/// Latest frame for display, swapped whole under a lock. The generation
/// counter lets a reader skip re-uploading a frame it already has.
#[derive(Debug, Default)]
pub struct FrameSlot {
    inner: Mutex<(u64, Option<Arc<Frame>>)>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the shown frame (`None` shows nothing). Returns the new generation.
    pub fn store(&self, frame: Option<Arc<Frame>>) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.0 += 1;
        inner.1 = frame;
        inner.0
    }

    pub fn load(&self) -> (u64, Option<Arc<Frame>>) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (inner.0, inner.1.clone())
    }

    /// The frame, if it changed since generation `seen`.
    pub fn load_if_newer(&self, seen: u64) -> Option<(u64, Option<Arc<Frame>>)> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (inner.0 > seen).then(|| (inner.0, inner.1.clone()))
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).0
    }
}

/// Per-tick consumption result.
#[derive(Debug)]
pub enum Consumed {
    /// Front matched the playhead
    Show(QueuedFrame),
    /// Front is ahead of the playhead; keep waiting
    NotYet,
    /// Queue ran dry before reaching the playhead
    Underrun,
}

/// Pop frames the playhead already passed and return the one due now.
/// `popped` counts removed frames so the caller can refill.
pub fn consume(queue: &mut PlaybackQueue, now: i64, speed: i32, popped: &mut usize) -> Consumed {
    while let Some(front) = queue.front() {
        let ts = front.timestamp;
        if ts == now {
            *popped += 1;
            return match queue.pop_front() {
                Some(f) => Consumed::Show(f),
                None => Consumed::Underrun,
            };
        }
        let passed = if speed >= 0 { ts < now } else { ts > now };
        if !passed {
            return Consumed::NotYet;
        }
        trace!("Dropping late frame {} (playhead {})", ts, now);
        queue.pop_front();
        *popped += 1;
    }
    Consumed::Underrun
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::params::PixelFormat;
    use std::time::Duration;

    fn frame(ts: i64) -> QueuedFrame {
        QueuedFrame { timestamp: ts, frame: Some(Arc::new(Frame::new(1, 1, PixelFormat::Rgba8))) }
    }

    #[test]
    fn test_out_of_order_arrivals_forward() {
        let mut q = PlaybackQueue::new();
        let speed = 2;
        assert_eq!(look_ahead(MAX_PREQUEUE, 10, PlayBounds { min: 0, max: 100 }, speed), 16);
        for ts in [10, 14, 12, 16] {
            q.append_timewise(frame(ts), speed);
        }
        assert_eq!(q.timestamps().collect::<Vec<_>>(), vec![10, 12, 14, 16]);
    }

    #[test]
    fn test_out_of_order_arrivals_backward() {
        let mut q = PlaybackQueue::new();
        for ts in [9, 7, 8, 6] {
            q.append_timewise(frame(ts), -1);
        }
        assert_eq!(q.timestamps().collect::<Vec<_>>(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_look_ahead_bounded_by_boundary() {
        let b = PlayBounds { min: 0, max: 100 };
        assert_eq!(look_ahead(16, 98, b, 1), 2);
        assert_eq!(look_ahead(16, 100, b, 1), 0);
        assert_eq!(look_ahead(4, 0, b, 1), 4);
        assert_eq!(look_ahead(16, 50, b, 0), 0);
    }

    #[test]
    fn test_look_ahead_divides_by_speed() {
        let b = PlayBounds { min: 0, max: 100 };
        // 90, 92, 94, 96, 98
        assert_eq!(look_ahead(16, 90, b, 2), 5);
        // 91 .. 99
        assert_eq!(look_ahead(16, 91, b, 2), 5);
        // 3, 2, 1, 0
        assert_eq!(look_ahead(16, 3, b, -1), 4);
        // 10, 7, 4, 1
        assert_eq!(look_ahead(16, 10, b, -3), 4);
        assert_eq!(look_ahead(16, 0, b, -2), 1);
    }

    #[test]
    fn test_look_ahead_uses_workarea() {
        let b = PlayBounds { min: 20, max: 30 };
        assert_eq!(look_ahead(16, 20, b, 1), 10);
        assert_eq!(look_ahead(16, 25, b, -1), 6);
        assert_eq!(look_ahead(16, 35, b, 1), 0);
        assert_eq!(look_ahead(16, 10, b, -1), 0);
    }

    #[test]
    fn test_clock_timestamps() {
        let start = Instant::now();
        let clock = PlaybackClock::start_at(start, 10, 2, Rational::new(1, 24));
        assert_eq!(clock.timestamp_at(start), 10);
        assert_eq!(clock.timestamp_at(start + Duration::from_millis(40)), 10);
        assert_eq!(clock.timestamp_at(start + Duration::from_millis(42)), 12);
        assert_eq!(clock.timestamp_at(start + Duration::from_secs(1)), 58);

        let back = PlaybackClock::start_at(start, 10, -1, Rational::new(1, 24));
        assert_eq!(back.timestamp_at(start + Duration::from_millis(125)), 7);
    }

    #[test]
    fn test_bounds() {
        assert_eq!(PlayBounds::resolve(100, Some((10, 20)), false, false), PlayBounds { min: 0, max: 100 });
        assert_eq!(PlayBounds::resolve(100, Some((10, 20)), true, false), PlayBounds { min: 10, max: 20 });
        assert_eq!(PlayBounds::resolve(100, Some((10, 20)), false, true), PlayBounds { min: 10, max: 20 });
        assert_eq!(PlayBounds::resolve(100, None, true, true), PlayBounds { min: 0, max: 100 });
    }

    #[test]
    fn test_step_clock() {
        let b = PlayBounds { min: 0, max: 50 };
        assert_eq!(step_clock(20, 1, b, false), ClockStep::Advance(20));
        assert_eq!(step_clock(52, 1, b, false), ClockStep::Stop(50));
        assert_eq!(step_clock(52, 2, b, true), ClockStep::Wrap { to: 0, speed: 2 });
        assert_eq!(step_clock(-3, -1, b, true), ClockStep::Wrap { to: 50, speed: -1 });
        // Moving backward but still above min is fine
        assert_eq!(step_clock(60, -1, b, false), ClockStep::Advance(60));
    }

    #[test]
    fn test_past_both_bounds_trips_lower() {
        let b = PlayBounds { min: 0, max: 0 };
        assert_eq!(step_clock(0, 1, b, false), ClockStep::Stop(0));
        assert_eq!(step_clock(0, 1, b, true), ClockStep::Wrap { to: 0, speed: 1 });
        let inverted = PlayBounds { min: 10, max: 5 };
        assert_eq!(step_clock(7, 1, inverted, true), ClockStep::Wrap { to: 5, speed: 1 });
    }

    #[test]
    fn test_consume() {
        let mut q = PlaybackQueue::new();
        for ts in [3, 4, 5] {
            q.append_timewise(frame(ts), 1);
        }
        let mut popped = 0;
        assert!(matches!(consume(&mut q, 2, 1, &mut popped), Consumed::NotYet));
        assert_eq!(popped, 0);
        match consume(&mut q, 4, 1, &mut popped) {
            Consumed::Show(f) => assert_eq!(f.timestamp, 4),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(popped, 2);
        assert!(matches!(consume(&mut q, 9, 1, &mut popped), Consumed::Underrun));
        assert!(q.is_empty());
    }

    #[test]
    fn test_frame_slot_generations() {
        let slot = FrameSlot::new();
        assert_eq!(slot.generation(), 0);
        let g = slot.store(frame(1).frame);
        assert_eq!(g, 1);
        assert!(slot.load_if_newer(1).is_none());
        let (gen2, shown) = slot.load_if_newer(0).unwrap();
        assert_eq!(gen2, 1);
        assert!(shown.is_some());
        slot.store(None);
        assert!(slot.load().1.is_none());
    }
}
