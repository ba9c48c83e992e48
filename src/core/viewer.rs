//! Viewer session: what a preview window does with the backend.
//!
//! A [`Viewer`] is driven from the UI thread by calling [`Viewer::tick`] in
//! its loop. Each tick it:
//! - drains backend reports and its own ticket inbox
//! - reacts to cache notifications (re-request the shown frame when it was
//!   invalidated or shifted, restart the cache wait timer)
//! - advances the playback clock and consumes the playback queue
//! - starts background caching once the cache wait timer fires
//!
//! Two kinds of frame requests:
//! - direct (scrubbing, seeking): newest wins; an older request that
//!   finishes after a newer one was issued is ignored
//! - queued (playback): results are kept in play order and consumed by
//!   the clock
//!
//! While a viewer plays or scrubs it holds a busy claim on the shared
//! [`SchedulingContext`], which keeps background caching off.

use crossbeam_channel::Receiver;
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use super::backend::RenderBackend;
use super::cache_timer::CacheWaitTimer;
use super::notify::{CacheEvent, Notifier, SubscriptionId};
use super::playback::{
    ClockStep, Consumed, FrameSlot, MAX_PREQUEUE, PlayBounds, PlaybackClock, PlaybackQueue, QueuedFrame, consume,
    look_ahead, step_clock,
};
use super::scheduling::{BusyGuard, SchedulingContext};
use super::ticket::{OwnerId, Watcher, WatcherInbox};
use super::time_range::TimeRange;
use crate::config::ConfigStore;
use crate::entities::frame::{Frame, SampleBuffer};
use crate::entities::rational::{Rational, time_to_timestamp, timestamp_to_time};

/// Audio pushed while scrubbing a paused viewer
pub const SCRUB_AUDIO_MS: i64 = 20;

/// Audio output device. Only scrubbing audio goes through here.
pub trait AudioSink: Send {
    fn push(&mut self, samples: &SampleBuffer);

    fn stop(&mut self) {}
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn push(&mut self, _samples: &SampleBuffer) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchTag {
    Display,
    Queue,
    Scrub,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ViewerStats {
    pub frames_shown: u64,
    pub underruns: u64,
    pub late_frames: u64,
}

pub struct Viewer {
    /// Owner of direct display and audio requests
    owner: OwnerId,
    /// Owner of playback queue requests
    queue_owner: OwnerId,
    settings: Arc<dyn ConfigStore>,
    sched: SchedulingContext,
    timebase: Rational,

    time: i64,
    speed: i32,
    in_to_out_only: bool,
    workarea: Option<TimeRange>,
    max_prequeue: usize,

    queue: PlaybackQueue,
    next_queue_ts: i64,
    prequeue_len: usize,
    prequeuing: bool,
    clock: Option<PlaybackClock>,

    inbox: WatcherInbox<WatchTag>,
    nonqueue: VecDeque<Watcher>,
    queue_watchers: Vec<Watcher>,
    slot: Arc<FrameSlot>,

    cache_timer: CacheWaitTimer,
    busy: Option<BusyGuard>,
    scrubbing: bool,
    autocache: bool,

    notifier: Notifier,
    subscription: SubscriptionId,
    events: Receiver<CacheEvent>,
    force_update: bool,

    audio: Box<dyn AudioSink>,
    stats: ViewerStats,
}

impl Viewer {
    pub fn new(
        backend: &RenderBackend,
        settings: Arc<dyn ConfigStore>,
        sched: SchedulingContext,
        audio: Box<dyn AudioSink>,
    ) -> Self {
        let notifier = backend.notifier().clone();
        let (subscription, events) = notifier.subscribe_queued();
        let cache_timer = CacheWaitTimer::new(settings.caching_delay());
        let owner = OwnerId::next();
        debug!("Viewer {} created", owner);

        Self {
            owner,
            queue_owner: OwnerId::next(),
            settings,
            sched,
            timebase: backend.video_params().timebase,
            time: 0,
            speed: 0,
            in_to_out_only: false,
            workarea: None,
            max_prequeue: MAX_PREQUEUE,
            queue: PlaybackQueue::new(),
            next_queue_ts: 0,
            prequeue_len: 0,
            prequeuing: false,
            clock: None,
            inbox: WatcherInbox::new(),
            nonqueue: VecDeque::new(),
            queue_watchers: Vec::new(),
            slot: Arc::new(FrameSlot::new()),
            cache_timer,
            busy: None,
            scrubbing: false,
            autocache: true,
            notifier,
            subscription,
            events,
            force_update: false,
            audio,
            stats: ViewerStats::default(),
        }
    }

    pub fn with_max_prequeue(mut self, max: usize) -> Self {
        self.max_prequeue = max;
        self
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Playhead as a timestamp in the sequence timebase.
    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn time_rational(&self) -> Rational {
        timestamp_to_time(self.time, self.timebase)
    }

    pub fn speed(&self) -> i32 {
        self.speed
    }

    pub fn is_playing(&self) -> bool {
        self.speed != 0
    }

    pub fn is_prequeuing(&self) -> bool {
        self.prequeuing
    }

    pub fn prequeue_len(&self) -> usize {
        self.prequeue_len
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Playback queue requests still in flight.
    pub fn pending_queue_requests(&self) -> usize {
        self.queue_watchers.len()
    }

    /// Direct requests still in flight.
    pub fn pending_display_requests(&self) -> usize {
        self.nonqueue.len()
    }

    /// Display hand-off for whatever draws the frames.
    pub fn frame_slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.slot)
    }

    pub fn stats(&self) -> ViewerStats {
        self.stats
    }

    pub fn set_workarea(&mut self, workarea: Option<TimeRange>) {
        self.workarea = workarea;
    }

    pub fn autocache(&self) -> bool {
        self.autocache
    }

    pub fn set_autocache(&mut self, backend: &mut RenderBackend, enabled: bool) {
        self.autocache = enabled;
        if enabled {
            if !self.is_playing() {
                self.restart_cache_timer();
            }
        } else {
            self.cache_timer.cancel();
            if self.sched.background_owner() == Some(self.owner) {
                backend.stop_background_cache();
            }
        }
    }

    fn length_ts(&self, backend: &RenderBackend) -> i64 {
        time_to_timestamp(backend.frame_cache().length(), self.timebase)
    }

    fn frame_exists_at(&self, backend: &RenderBackend, ts: i64) -> bool {
        ts >= 0 && timestamp_to_time(ts, self.timebase) < backend.frame_cache().length()
    }

    /// Range the playhead and the playback queue stay inside.
    fn play_bounds(&self, backend: &RenderBackend) -> PlayBounds {
        PlayBounds::resolve(
            self.length_ts(backend),
            self.workarea_ts(),
            self.settings.loop_enabled(),
            self.in_to_out_only,
        )
    }

    fn workarea_ts(&self) -> Option<(i64, i64)> {
        self.workarea.map(|w| {
            (time_to_timestamp(w.in_point(), self.timebase), time_to_timestamp(w.out_point(), self.timebase))
        })
    }

    // ---- main loop --------------------------------------------------------

    pub fn tick(&mut self, backend: &mut RenderBackend) {
        self.tick_at(backend, Instant::now());
    }

    pub fn tick_at(&mut self, backend: &mut RenderBackend, now: Instant) {
        backend.process_reports();
        self.handle_events();
        self.handle_deliveries(backend, now);

        if std::mem::take(&mut self.force_update) {
            self.update_texture(backend, self.time);
        }
        if self.clock.is_some() {
            self.playback_timer_update(backend, now);
        }
        if self.cache_timer.tick_at(now) {
            self.start_background_caching(backend);
        }
    }

    fn handle_events(&mut self) {
        let events: Vec<CacheEvent> = self.events.try_iter().collect();
        for event in events {
            match event {
                CacheEvent::Invalidated(range) => {
                    let t = self.time_rational();
                    if t >= range.in_point() && (t < range.out_point() || range.is_instant()) {
                        self.force_update = true;
                    }
                    self.invalidated_range();
                }
                CacheEvent::Shifted { from, to } => {
                    if self.time_rational() >= from.min(to) {
                        self.force_update = true;
                    }
                }
                CacheEvent::Finished { .. } => {}
            }
        }
    }

    /// Something changed: stop background caching and wait for quiet again.
    fn invalidated_range(&mut self) {
        self.cache_timer.cancel();
        self.sched.cancel_background();
        if !self.scrubbing && !self.is_playing() {
            self.restart_cache_timer();
        }
    }

    fn handle_deliveries(&mut self, backend: &mut RenderBackend, now: Instant) {
        for delivery in self.inbox.drain() {
            match delivery.tag {
                WatchTag::Display => {
                    let Some(pos) = self.nonqueue.iter().position(|w| delivery.is_from(w)) else {
                        continue;
                    };
                    // Everything requested before this one is obsolete
                    for old in self.nonqueue.drain(..=pos) {
                        old.detach();
                    }
                    if !delivery.outcome.is_cancelled() {
                        self.show(delivery.outcome.frame().cloned());
                    }
                }
                WatchTag::Queue => {
                    self.queue_watchers.retain(|w| !delivery.is_from(w));
                    if delivery.outcome.is_cancelled() || !(self.is_playing() || self.prequeuing) {
                        continue;
                    }
                    let Some(time) = delivery.ticket.time() else {
                        continue;
                    };
                    let entry = QueuedFrame {
                        timestamp: time_to_timestamp(time, self.timebase),
                        frame: delivery.outcome.frame().cloned(),
                    };
                    self.queue.append_timewise(entry, self.speed);
                    if self.prequeuing && self.queue.len() >= self.prequeue_len {
                        self.prequeuing = false;
                        self.finish_play_preprocess(backend, now);
                    }
                }
                WatchTag::Scrub => {
                    if let Some(samples) = delivery.outcome.audio() {
                        self.audio.push(samples);
                    }
                }
            }
        }
    }

    fn show(&mut self, frame: Option<Arc<Frame>>) {
        if frame.is_some() {
            self.stats.frames_shown += 1;
        }
        self.slot.store(frame);
    }

    // ---- display ------------------------------------------------------------

    /// Re-request the frame under the playhead.
    pub fn force_update(&mut self, backend: &mut RenderBackend) {
        self.update_texture(backend, self.time);
    }

    fn update_texture(&mut self, backend: &mut RenderBackend, ts: i64) {
        let exists = self.frame_exists_at(backend, ts);

        if self.is_playing() {
            let mut popped = 0;
            let consumed = consume(&mut self.queue, ts, self.speed, &mut popped);
            self.stats.late_frames += popped.saturating_sub(usize::from(matches!(consumed, Consumed::Show(_)))) as u64;
            for _ in 0..popped {
                self.refill_queue(backend);
            }
            match consumed {
                Consumed::Show(entry) => {
                    self.show(entry.frame);
                    return;
                }
                Consumed::NotYet => return,
                Consumed::Underrun => {
                    if exists {
                        self.stats.underruns += 1;
                        warn!("Playback queue failed to keep up at {}", ts);
                    }
                }
            }
        }

        if !exists {
            for w in self.nonqueue.drain(..) {
                w.detach();
            }
            self.show(None);
            return;
        }

        let ticket = backend.request_frame(timestamp_to_time(ts, self.timebase), Some(self.owner), true);
        let watcher = self.inbox.watch(&ticket, WatchTag::Display);
        self.nonqueue.push_back(watcher);
    }

    /// User moved the playhead.
    pub fn set_time(&mut self, backend: &mut RenderBackend, ts: i64) {
        if self.is_playing() {
            self.pause_internal(backend);
            self.release_busy();
        }
        self.set_time_internal(backend, ts);
        if !self.scrubbing {
            self.restart_cache_timer();
        }
    }

    fn set_time_internal(&mut self, backend: &mut RenderBackend, ts: i64) {
        if ts == self.time && self.slot.generation() > 0 {
            return;
        }
        self.time = ts;
        if !self.is_playing() {
            self.update_texture(backend, ts);
            self.push_scrubbed_audio(backend);
        }
    }

    fn push_scrubbed_audio(&mut self, backend: &mut RenderBackend) {
        if self.is_playing() || !self.settings.audio_scrubbing() {
            return;
        }
        let start = self.time_rational();
        let range = TimeRange::new(start, start + Rational::new(SCRUB_AUDIO_MS, 1000));
        let ticket = backend.request_audio(range, Some(self.owner));
        self.inbox.watch(&ticket, WatchTag::Scrub);
    }

    /// Mouse down on the time ruler.
    pub fn begin_scrub(&mut self) {
        self.scrubbing = true;
        self.cache_timer.cancel();
        self.acquire_busy();
    }

    pub fn end_scrub(&mut self) {
        self.scrubbing = false;
        if !self.is_playing() {
            self.release_busy();
            self.restart_cache_timer();
        }
    }

    // ---- transport ------------------------------------------------------------

    pub fn play(&mut self, backend: &mut RenderBackend, in_to_out_only: bool) {
        self.play_at(backend, in_to_out_only, Instant::now());
    }

    pub fn play_at(&mut self, backend: &mut RenderBackend, in_to_out_only: bool, now: Instant) {
        let mut in_to_out_only = in_to_out_only;
        if in_to_out_only {
            match self.workarea_ts() {
                Some((start, _)) => self.set_time_internal(backend, start),
                None => in_to_out_only = false,
            }
        }
        self.play_internal(backend, 1, in_to_out_only, now);
    }

    /// Start playing at an arbitrary shuttle speed. 0 is ignored.
    pub fn play_with_speed(&mut self, backend: &mut RenderBackend, speed: i32) {
        if self.is_playing() {
            self.pause_internal(backend);
        }
        self.play_internal(backend, speed, false, Instant::now());
    }

    pub fn pause(&mut self, backend: &mut RenderBackend) {
        self.pause_internal(backend);
        self.start_background_caching(backend);
    }

    pub fn toggle_play_pause(&mut self, backend: &mut RenderBackend) {
        if self.is_playing() {
            self.pause(backend);
        } else {
            self.play(backend, false);
        }
    }

    /// One speed step backward; never lands on 0.
    pub fn shuttle_left(&mut self, backend: &mut RenderBackend) {
        self.shuttle(backend, -1);
    }

    /// One speed step forward; never lands on 0.
    pub fn shuttle_right(&mut self, backend: &mut RenderBackend) {
        self.shuttle(backend, 1);
    }

    pub fn shuttle_stop(&mut self, backend: &mut RenderBackend) {
        self.pause(backend);
    }

    fn shuttle(&mut self, backend: &mut RenderBackend, step: i32) {
        let mut speed = self.speed;
        if speed != 0 {
            self.pause_internal(backend);
        }
        speed += step;
        if speed == 0 {
            speed += step;
        }
        self.play_internal(backend, speed, false, Instant::now());
    }

    pub fn go_to_start(&mut self, backend: &mut RenderBackend) {
        self.set_time(backend, 0);
    }

    pub fn go_to_end(&mut self, backend: &mut RenderBackend) {
        let end = self.length_ts(backend);
        self.set_time(backend, end);
    }

    fn play_internal(&mut self, backend: &mut RenderBackend, speed: i32, in_to_out_only: bool, now: Instant) {
        if speed == 0 {
            return;
        }
        if self.timebase <= Rational::ZERO {
            warn!("Viewer can't play with an invalid timebase");
            return;
        }

        let length = self.length_ts(backend);
        if !in_to_out_only {
            if speed > 0 && self.time >= length {
                self.set_time_internal(backend, 0);
            } else if speed < 0 && (self.time <= 0 || self.time >= length) {
                self.set_time_internal(backend, (length - 1).max(0));
            }
        }

        info!("Play at speed {} from {}", speed, self.time);
        self.speed = speed;
        self.in_to_out_only = in_to_out_only;
        self.next_queue_ts = self.time;

        self.prequeue_len = look_ahead(self.max_prequeue, self.time, self.play_bounds(backend), speed);
        if self.prequeue_len > 0 {
            self.prequeuing = true;
            for _ in 0..self.prequeue_len {
                self.request_next_frame_for_queue(backend);
            }
        }

        self.acquire_busy();
        self.cache_timer.cancel();

        if !self.prequeuing {
            self.finish_play_preprocess(backend, now);
        }
    }

    fn finish_play_preprocess(&mut self, backend: &mut RenderBackend, now: Instant) {
        debug!("Prequeue done ({} frames), clock starts at {}", self.queue.len(), self.time);
        self.clock = Some(PlaybackClock::start_at(now, self.time, self.speed, self.timebase));
        self.update_texture(backend, self.time);
        self.playback_timer_update(backend, now);
    }

    fn pause_internal(&mut self, backend: &mut RenderBackend) {
        if self.is_playing() {
            debug!("Pause at {}", self.time);
            self.audio.stop();
            self.speed = 0;
            self.clock = None;
            self.queue.clear();
            for w in self.queue_watchers.drain(..) {
                w.detach();
            }
            backend.clear_video_queue(self.queue_owner);
        }
        self.prequeuing = false;
    }

    fn request_next_frame_for_queue(&mut self, backend: &mut RenderBackend) {
        let bounds = self.play_bounds(backend);
        if self.next_queue_ts < bounds.min || self.next_queue_ts >= bounds.max {
            trace!("Queue stops at {} (bounds {}..{})", self.next_queue_ts, bounds.min, bounds.max);
            return;
        }
        let time = timestamp_to_time(self.next_queue_ts, self.timebase);
        self.next_queue_ts += self.speed as i64;
        trace!("Queue request {}", time);
        let ticket = backend.request_frame(time, Some(self.queue_owner), false);
        let watcher = self.inbox.watch(&ticket, WatchTag::Queue);
        self.queue_watchers.push(watcher);
    }

    /// After a pop: top the queue back up by one request if short.
    fn refill_queue(&mut self, backend: &mut RenderBackend) {
        let target = look_ahead(self.max_prequeue, self.time, self.play_bounds(backend), self.speed);
        if self.queue.len() < target {
            self.request_next_frame_for_queue(backend);
        }
    }

    fn playback_timer_update(&mut self, backend: &mut RenderBackend, now: Instant) {
        let Some(clock) = self.clock else {
            return;
        };
        let current = clock.timestamp_at(now);
        let looping = self.settings.loop_enabled();
        let bounds = self.play_bounds(backend);

        match step_clock(current, self.speed, bounds, looping) {
            ClockStep::Advance(ts) => {
                if ts != self.time {
                    self.time = ts;
                    self.update_texture(backend, ts);
                }
            }
            ClockStep::Wrap { to, speed } => {
                // The upper bound is exclusive; backward loops restart on the last frame
                let to = if to >= bounds.max { (bounds.max - 1).max(bounds.min) } else { to };
                debug!("Loop {} -> {}", current, to);
                let in_to_out_only = self.in_to_out_only;
                self.pause_internal(backend);
                self.set_time_internal(backend, to);
                self.play_internal(backend, speed, in_to_out_only, now);
            }
            ClockStep::Stop(ts) => {
                debug!("Playback reached {}", ts);
                self.pause(backend);
                self.set_time_internal(backend, ts);
            }
        }
    }

    // ---- background caching --------------------------------------------------

    fn restart_cache_timer(&mut self) {
        self.cache_timer.set_delay(self.settings.caching_delay());
        self.cache_timer.schedule();
    }

    fn acquire_busy(&mut self) {
        if self.busy.is_none() {
            self.busy = Some(self.sched.viewer_busy());
        }
    }

    fn release_busy(&mut self) {
        self.busy = None;
    }

    /// Start caching invalidated ranges unless something else is using the
    /// slot, in which case try again after the next delay.
    pub fn start_background_caching(&mut self, backend: &mut RenderBackend) {
        if self.is_playing() || self.scrubbing {
            return;
        }
        self.release_busy();
        if !self.autocache || backend.cache_queue().is_empty() {
            return;
        }
        if self.sched.background_active() || self.sched.busy_viewers() > 0 {
            self.restart_cache_timer();
            return;
        }
        match self.sched.start_background(self.owner) {
            Some(task) => backend.start_background_cache(task),
            None => self.restart_cache_timer(),
        }
    }

    /// Detach from the backend: stop playback and our background task.
    pub fn close(&mut self, backend: &mut RenderBackend) {
        self.pause_internal(backend);
        self.release_busy();
        self.cache_timer.cancel();
        if self.sched.background_owner() == Some(self.owner) {
            backend.stop_background_cache();
        }
        for w in self.nonqueue.drain(..) {
            w.detach();
        }
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.notifier.unsubscribe(self.subscription);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppSettings, SharedSettings};
    use crate::core::backend::BackendConfig;
    use crate::entities::decoder::{Decoder, DecoderFactory, DefaultDecoderFactory};
    use crate::entities::graph::{IN_INPUT, NodeGraph, NodeKind};
    use crate::entities::params::{AudioParams, VideoParams};
    use crate::error::RenderError;
    use std::sync::{Mutex, RwLock};
    use std::time::Duration;

    struct Recorder(Arc<Mutex<Vec<usize>>>);

    impl AudioSink for Recorder {
        fn push(&mut self, samples: &SampleBuffer) {
            self.0.lock().unwrap().push(samples.frames());
        }
    }

    /// Synthetic decoder that remembers every video time it was asked for.
    struct RecordingDecoder {
        inner: Arc<dyn Decoder>,
        decoded: Arc<Mutex<Vec<Rational>>>,
    }

    impl Decoder for RecordingDecoder {
        fn source(&self) -> &str {
            self.inner.source()
        }

        fn decode_video(&self, time: Rational, params: &VideoParams) -> Result<Frame, RenderError> {
            self.decoded.lock().unwrap().push(time);
            self.inner.decode_video(time, params)
        }

        fn decode_audio(&self, range: TimeRange, params: &AudioParams) -> Result<SampleBuffer, RenderError> {
            self.inner.decode_audio(range, params)
        }
    }

    struct RecordingFactory {
        decoded: Arc<Mutex<Vec<Rational>>>,
    }

    impl DecoderFactory for RecordingFactory {
        fn open(&self, source: &str) -> Result<Arc<dyn Decoder>, RenderError> {
            let inner = DefaultDecoderFactory.open(source)?;
            Ok(Arc::new(RecordingDecoder { inner, decoded: self.decoded.clone() }))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        backend: RenderBackend,
        settings: SharedSettings,
        sched: SchedulingContext,
        decoded: Arc<Mutex<Vec<Rational>>>,
    }

    impl Fixture {
        /// Decoded times at or past `ts` (in 1/100 s frames).
        fn decoded_from(&self, ts: i64) -> Vec<Rational> {
            let limit = Rational::new(ts, 100);
            self.decoded.lock().unwrap().iter().copied().filter(|t| *t >= limit).collect()
        }

        fn decoded_before(&self, ts: i64) -> Vec<Rational> {
            let limit = Rational::new(ts, 100);
            self.decoded.lock().unwrap().iter().copied().filter(|t| *t < limit).collect()
        }
    }

    fn fixture(length: i64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut g = NodeGraph::new();
        let out = g.add_node("out", NodeKind::ViewerOutput);
        let src = g.add_node("src", NodeKind::Footage { source: "synthetic:bars".into() });
        g.connect(out, IN_INPUT, src);
        let config = BackendConfig {
            workers: 2,
            cache_root: dir.path().to_path_buf(),
            cache_name: "viewer".into(),
            video: VideoParams::new(8, 8, Rational::new(1, 100)),
            audio: AudioParams::default(),
            history_len: 64,
            frames_per_job: 8,
        };
        let decoded = Arc::new(Mutex::new(Vec::new()));
        let factory = Arc::new(RecordingFactory { decoded: decoded.clone() });
        let mut backend = RenderBackend::new(Arc::new(RwLock::new(g)), factory, config, Notifier::new()).unwrap();
        backend.compile().unwrap();
        backend.set_length(Rational::new(length, 100));
        let settings = SharedSettings::new(AppSettings { caching_delay_ms: 60_000, ..Default::default() });
        Fixture { _dir: dir, backend, settings, sched: SchedulingContext::new(), decoded }
    }

    fn viewer(f: &Fixture) -> Viewer {
        Viewer::new(&f.backend, Arc::new(f.settings.clone()), f.sched.clone(), Box::new(NullAudioSink))
    }

    fn pump(v: &mut Viewer, backend: &mut RenderBackend, mut done: impl FnMut(&Viewer) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(v) {
            assert!(Instant::now() < deadline, "timed out");
            backend.wait_for_reports(Duration::from_millis(2));
            v.tick(backend);
        }
    }

    fn shown_time(v: &Viewer) -> Option<Rational> {
        v.frame_slot().load().1.map(|f| f.time())
    }

    #[test]
    fn test_scrub_shows_newest_frame() {
        let mut f = fixture(50);
        let mut v = viewer(&f);
        for ts in [3, 7, 11] {
            v.set_time(&mut f.backend, ts);
        }
        pump(&mut v, &mut f.backend, |v| v.pending_display_requests() == 0);
        assert_eq!(shown_time(&v), Some(Rational::new(11, 100)));
    }

    #[test]
    fn test_time_outside_sequence_shows_nothing() {
        let mut f = fixture(10);
        let mut v = viewer(&f);
        v.set_time(&mut f.backend, 4);
        pump(&mut v, &mut f.backend, |v| shown_time(v).is_some());
        v.set_time(&mut f.backend, 10);
        assert!(shown_time(&v).is_none());
        assert_eq!(v.pending_display_requests(), 0);
    }

    #[test]
    fn test_play_prequeues_then_advances() {
        let mut f = fixture(200);
        let mut v = viewer(&f);
        v.play(&mut f.backend, false);
        assert!(v.is_playing());
        assert!(v.is_prequeuing());
        assert_eq!(v.prequeue_len(), MAX_PREQUEUE);
        assert_eq!(f.sched.busy_viewers(), 1);

        pump(&mut v, &mut f.backend, |v| !v.is_prequeuing());
        pump(&mut v, &mut f.backend, |v| v.time() >= 5);
        assert!(v.stats().frames_shown > 0);

        v.pause(&mut f.backend);
        assert!(!v.is_playing());
        assert_eq!(v.queue_len(), 0);
        assert_eq!(f.sched.busy_viewers(), 0);
    }

    #[test]
    fn test_prequeue_shorter_near_end() {
        let mut f = fixture(20);
        let mut v = viewer(&f);
        v.set_time(&mut f.backend, 15);
        v.play(&mut f.backend, false);
        assert_eq!(v.prequeue_len(), 5);
    }

    #[test]
    fn test_stops_at_end_without_loop() {
        let mut f = fixture(6);
        let mut v = viewer(&f);
        v.play(&mut f.backend, false);
        pump(&mut v, &mut f.backend, |v| !v.is_playing());
        assert_eq!(v.time(), 6);
        assert_eq!(f.sched.busy_viewers(), 0);
    }

    #[test]
    fn test_loop_wraps_and_keeps_playing() {
        let mut f = fixture(6);
        f.settings.update(|s| s.loop_enabled = true);
        let mut v = viewer(&f);
        v.play(&mut f.backend, false);
        pump(&mut v, &mut f.backend, |v| v.time() >= 4);
        pump(&mut v, &mut f.backend, |v| v.time() < 3);
        assert!(v.is_playing());
        assert_eq!(v.speed(), 1);
    }

    #[test]
    fn test_restart_when_past_end() {
        let mut f = fixture(10);
        let mut v = viewer(&f);
        v.go_to_end(&mut f.backend);
        assert_eq!(v.time(), 10);
        v.play(&mut f.backend, false);
        assert_eq!(v.time(), 0);
        assert_eq!(v.prequeue_len(), 10);
    }

    #[test]
    fn test_backward_restart_from_end() {
        let mut f = fixture(10);
        let mut v = viewer(&f);
        v.go_to_end(&mut f.backend);
        v.play_with_speed(&mut f.backend, -1);
        assert_eq!(v.time(), 9);
        assert_eq!(v.prequeue_len(), 10);
    }

    #[test]
    fn test_double_speed_prequeue_stays_inside_sequence() {
        let mut f = fixture(100);
        let mut v = viewer(&f);
        v.set_time(&mut f.backend, 90);
        pump(&mut v, &mut f.backend, |v| v.pending_display_requests() == 0);

        v.play_with_speed(&mut f.backend, 2);
        // 90, 92, 94, 96, 98
        assert_eq!(v.prequeue_len(), 5);
        pump(&mut v, &mut f.backend, |v| !v.is_playing());
        assert_eq!(v.time(), 100);
        assert_eq!(f.decoded_from(100), Vec::<Rational>::new());
    }

    #[test]
    fn test_refill_never_requests_past_end() {
        let mut f = fixture(20);
        let mut v = viewer(&f).with_max_prequeue(4);
        v.play(&mut f.backend, false);
        assert_eq!(v.prequeue_len(), 4);
        pump(&mut v, &mut f.backend, |v| !v.is_playing());
        assert_eq!(f.decoded_from(20), Vec::<Rational>::new());
    }

    #[test]
    fn test_backward_play_never_requests_negative_times() {
        let mut f = fixture(20);
        let mut v = viewer(&f);
        v.set_time(&mut f.backend, 5);
        v.play_with_speed(&mut f.backend, -1);
        // 5, 4, 3, 2, 1, 0
        assert_eq!(v.prequeue_len(), 6);
        pump(&mut v, &mut f.backend, |v| !v.is_playing());
        assert_eq!(v.time(), 0);
        assert_eq!(f.decoded_before(0), Vec::<Rational>::new());
    }

    #[test]
    fn test_queue_requests_bounded_while_playing() {
        let mut f = fixture(400);
        let mut v = viewer(&f);
        v.play(&mut f.backend, false);
        pump(&mut v, &mut f.backend, |v| {
            assert!(v.pending_queue_requests() <= MAX_PREQUEUE, "{} in flight", v.pending_queue_requests());
            v.time() >= 150
        });
        v.pause(&mut f.backend);
        assert_eq!(v.pending_queue_requests(), 0);
    }

    #[test]
    fn test_shuttle_skips_zero() {
        let mut f = fixture(100);
        let mut v = viewer(&f);
        v.set_time(&mut f.backend, 50);
        v.shuttle_right(&mut f.backend);
        assert_eq!(v.speed(), 1);
        v.shuttle_right(&mut f.backend);
        assert_eq!(v.speed(), 2);
        v.shuttle_left(&mut f.backend);
        v.shuttle_left(&mut f.backend);
        assert_eq!(v.speed(), -1);
        v.shuttle_left(&mut f.backend);
        assert_eq!(v.speed(), -2);
        v.shuttle_stop(&mut f.backend);
        assert!(!v.is_playing());
    }

    #[test]
    fn test_play_workarea_only_jumps_to_in() {
        let mut f = fixture(100);
        let mut v = viewer(&f);
        v.set_workarea(Some(TimeRange::new(Rational::new(20, 100), Rational::new(30, 100))));
        // Pausing at the stop would otherwise start caching the rest of the sequence
        v.set_autocache(&mut f.backend, false);
        v.play(&mut f.backend, true);
        assert_eq!(v.time(), 20);
        assert_eq!(v.prequeue_len(), 10);
        pump(&mut v, &mut f.backend, |v| !v.is_playing());
        assert_eq!(v.time(), 30);
        // 30 itself is shown after the stop; nothing past it is ever queued
        assert_eq!(f.decoded_from(31), Vec::<Rational>::new());
    }

    #[test]
    fn test_invalidating_shown_frame_requests_again() {
        let mut f = fixture(20);
        let mut v = viewer(&f);
        v.set_time(&mut f.backend, 5);
        pump(&mut v, &mut f.backend, |v| v.pending_display_requests() == 0);
        let generation = v.frame_slot().generation();

        let t = v.time_rational();
        f.backend.invalidate_cache(t, t);
        v.tick(&mut f.backend);
        assert_eq!(v.pending_display_requests(), 1);
        pump(&mut v, &mut f.backend, |v| v.frame_slot().generation() > generation);
    }

    #[test]
    fn test_cache_timer_starts_background_caching() {
        let mut f = fixture(40);
        f.settings.update(|s| s.caching_delay_ms = 0);
        let mut v = viewer(&f);
        v.set_time(&mut f.backend, 1);
        v.tick(&mut f.backend);
        assert_eq!(f.sched.background_owner(), Some(v.owner()));
        pump(&mut v, &mut f.backend, |_| !f.sched.background_active());
        assert!(f.backend.cache_queue().is_empty());
        for ts in 0..40 {
            assert!(f.backend.frame_cache().get_hash(Rational::new(ts, 100)).is_some());
        }
    }

    #[test]
    fn test_scrubbing_blocks_background_caching() {
        let mut f = fixture(40);
        f.settings.update(|s| s.caching_delay_ms = 0);
        let mut v = viewer(&f);
        let other = viewer(&f);
        v.begin_scrub();
        v.set_time(&mut f.backend, 2);
        v.tick(&mut f.backend);
        assert!(!f.sched.background_active());
        assert!(f.sched.start_background(other.owner()).is_none());

        v.end_scrub();
        v.tick(&mut f.backend);
        assert_eq!(f.sched.background_owner(), Some(v.owner()));
    }

    #[test]
    fn test_autocache_off() {
        let mut f = fixture(40);
        f.settings.update(|s| s.caching_delay_ms = 0);
        let mut v = viewer(&f);
        v.set_autocache(&mut f.backend, false);
        v.set_time(&mut f.backend, 2);
        v.tick(&mut f.backend);
        assert!(!f.sched.background_active());
    }

    #[test]
    fn test_audio_scrubbing() {
        let mut f = fixture(40);
        let pushed = Arc::new(Mutex::new(Vec::new()));
        let mut v =
            Viewer::new(&f.backend, Arc::new(f.settings.clone()), f.sched.clone(), Box::new(Recorder(pushed.clone())));
        v.set_time(&mut f.backend, 3);
        pump(&mut v, &mut f.backend, |_| !pushed.lock().unwrap().is_empty());
        assert_eq!(pushed.lock().unwrap()[0], 960);

        f.settings.update(|s| s.audio_scrubbing = false);
        v.set_time(&mut f.backend, 4);
        pump(&mut v, &mut f.backend, |v| v.pending_display_requests() == 0);
        assert_eq!(pushed.lock().unwrap().len(), 1);
    }
}
