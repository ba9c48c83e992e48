//! Render backend: the orchestrator between the editable graph, the worker
//! pool and the content cache.
//!
//! Everything here runs on one thread, the orchestrating (UI) thread. Workers
//! and the task pool only ever talk back through the report channel, drained
//! by [`RenderBackend::process_reports`], so all scheduling state (pending
//! queue, busy flags, cache map, ticket resolution) has a single owner and no
//! locks.
//!
//! # Scheduling
//!
//! - Ticketed requests (frames, audio) always go before background caching.
//! - Background cache ranges are handed out only while a
//!   [`BackgroundCacheTask`] is attached, in chunks of `frames_per_job`.
//! - A job goes only to an idle worker, so dispatched jobs never exceed the
//!   pool size; anything else waits in the queue.
//!
//! # Edits
//!
//! Structural edits call [`queue_recompile`](RenderBackend::queue_recompile)
//! (coalesced: at most one capture per dispatch round). Value edits call
//! [`queue_value_update`](RenderBackend::queue_value_update), which
//! invalidates the affected range immediately and re-syncs parameter values
//! into the snapshot once before the next job goes out.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::frame_cache::FrameHashCache;
use super::notify::{CacheEvent, Notifier};
use super::scheduling::BackgroundCacheTask;
use super::task_pool::TaskPool;
use super::ticket::{OwnerId, RenderPayload, RenderTicket, TicketId, TicketKey, TicketKind, TicketOutcome};
use super::time_range::{TimeRange, TimeRangeList};
use super::worker::{DecoderCache, JobKind, RenderContext, RenderJob, WorkerHandle, WorkerReport};
use crate::entities::decoder::DecoderFactory;
use crate::entities::graph::{GraphSnapshot, NodeGraph};
use crate::entities::params::{AudioParams, VideoParams};
use crate::entities::rational::Rational;
use crate::error::RenderError;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Render worker threads (at least 1)
    pub workers: usize,
    pub cache_root: PathBuf,
    pub cache_name: String,
    pub video: VideoParams,
    pub audio: AudioParams,
    /// Invalidations remembered for stale-write checks
    pub history_len: usize,
    /// Frames per background cache job
    pub frames_per_job: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            cache_root: std::env::temp_dir().join("rendercache"),
            cache_name: "default".into(),
            video: VideoParams::default(),
            audio: AudioParams::default(),
            history_len: 256,
            frames_per_job: 24,
        }
    }
}

/// What a busy worker is doing.
#[derive(Debug)]
struct RunningJob {
    ticket: Option<RenderTicket>,
    range: Option<TimeRange>,
}

struct WorkerSlot {
    handle: WorkerHandle,
    busy: bool,
    job: Option<RunningJob>,
}

pub struct RenderBackend {
    graph: Arc<RwLock<NodeGraph>>,
    video: VideoParams,
    audio: AudioParams,

    snapshot: Option<Arc<GraphSnapshot>>,
    /// (structure, value) revisions the snapshot was built from
    compiled: Option<(u64, u64)>,
    recompile_queued: bool,
    value_update_queued: bool,
    last_error: Option<String>,

    cache: FrameHashCache,
    cache_queue: TimeRangeList,
    frames_per_job: usize,
    background: Option<BackgroundCacheTask>,

    decoders: Arc<DecoderCache>,
    workers: Vec<WorkerSlot>,
    task_pool: TaskPool,
    reports_tx: Sender<WorkerReport>,
    reports_rx: Receiver<WorkerReport>,

    pending: VecDeque<RenderTicket>,
    decoding: HashMap<TicketId, RenderTicket>,
    notifier: Notifier,

    max_concurrent: usize,
    closed: bool,
}

impl RenderBackend {
    pub fn new(
        graph: Arc<RwLock<NodeGraph>>,
        factory: Arc<dyn DecoderFactory>,
        config: BackendConfig,
        notifier: Notifier,
    ) -> Result<Self, RenderError> {
        let (reports_tx, reports_rx) = unbounded();
        let decoders = Arc::new(DecoderCache::new());
        let num_workers = config.workers.max(1);

        let mut workers = Vec::with_capacity(num_workers);
        for id in 0..num_workers {
            let ctx = RenderContext::new(id, Arc::clone(&decoders), Arc::clone(&factory));
            let handle = WorkerHandle::spawn(id, ctx, reports_tx.clone())?;
            workers.push(WorkerSlot { handle, busy: false, job: None });
        }
        let task_pool = TaskPool::new((num_workers / 2).max(1))?;

        let cache = FrameHashCache::new(&config.cache_root, &config.cache_name, config.video.timebase, notifier.clone())
            .with_history_len(config.history_len);

        info!(
            "RenderBackend: {} workers, cache at {}",
            num_workers,
            config.cache_root.join(&config.cache_name).display()
        );

        Ok(Self {
            graph,
            video: config.video,
            audio: config.audio,
            snapshot: None,
            compiled: None,
            recompile_queued: false,
            value_update_queued: false,
            last_error: None,
            cache,
            cache_queue: TimeRangeList::new(),
            frames_per_job: config.frames_per_job.max(1),
            background: None,
            decoders,
            workers,
            task_pool,
            reports_tx,
            reports_rx,
            pending: VecDeque::new(),
            decoding: HashMap::new(),
            notifier,
            max_concurrent: 0,
            closed: false,
        })
    }

    // ---- graph -----------------------------------------------------------

    /// Capture the live graph. Returns `Ok(false)` when nothing changed since
    /// the last capture. On failure the previous snapshot stays in use and
    /// the error is kept in [`last_error`](Self::last_error).
    pub fn compile(&mut self) -> Result<bool, RenderError> {
        if self.closed {
            return Err(RenderError::Closed);
        }
        self.recompile_queued = false;

        let captured = {
            let graph = self.graph.read().unwrap_or_else(|e| e.into_inner());
            let revs = (graph.structure_revision(), graph.value_revision());
            if self.snapshot.is_some() && self.compiled == Some(revs) {
                return Ok(false);
            }
            GraphSnapshot::capture(&graph, self.video, self.audio).map(|s| (s, revs))
        };

        let (snapshot, revs) = match captured {
            Ok(c) => c,
            Err(e) => {
                warn!("Compile failed, keeping previous snapshot: {}", e);
                self.last_error = Some(e.to_string());
                return Err(e);
            }
        };
        self.last_error = None;

        let identity_changed = self.cache.identity() != Some(snapshot.identity());
        let structure_changed = self.snapshot.as_ref().map(|s| s.structure_revision()) != Some(revs.0);

        if structure_changed {
            // Decoders belong to the snapshot that opened them
            self.decoders.clear();
        }
        self.cache.set_timebase(self.video.timebase);
        if identity_changed {
            self.cache.set_identity(snapshot.identity());
            self.enqueue_invalid();
        } else if self.compiled.map(|(_, values)| values) != Some(revs.1) {
            // Same topology, new values, no range given: everything may differ
            self.invalidate_all();
        }

        info!("Compiled {} nodes, identity {}", snapshot.len(), &snapshot.identity()[..12]);
        self.snapshot = Some(Arc::new(snapshot));
        self.compiled = Some(revs);
        self.value_update_queued = false;
        Ok(true)
    }

    /// Drop the snapshot and every decoder. Pending requests are cancelled.
    pub fn decompile(&mut self) {
        info!("Decompile");
        self.stop_background_cache();
        self.cancel_pending(|_| true);
        self.snapshot = None;
        self.compiled = None;
        self.decoders.clear();
    }

    /// Coalesce structural edits into one capture before the next dispatch.
    pub fn queue_recompile(&mut self) {
        self.recompile_queued = true;
    }

    /// A parameter changed, affecting `range`. The range is invalidated now;
    /// the new values reach the snapshot once, before the next job.
    pub fn queue_value_update(&mut self, range: TimeRange) {
        self.value_update_queued = true;
        self.invalidate_cache(range.in_point(), range.out_point());
    }

    /// Apply a queued value update to the snapshot.
    pub fn update_node_inputs(&mut self) {
        if !std::mem::take(&mut self.value_update_queued) {
            return;
        }
        let Some(current) = self.snapshot.as_ref() else {
            return;
        };
        let graph = self.graph.read().unwrap_or_else(|e| e.into_inner());
        match current.with_values_from(&graph) {
            Some(next) => {
                trace!("Value update -> revision {}", next.value_revision());
                self.compiled = Some((next.structure_revision(), next.value_revision()));
                self.snapshot = Some(Arc::new(next));
            }
            None => {
                debug!("Value update found structural change, recompiling");
                self.recompile_queued = true;
            }
        }
    }

    pub fn snapshot(&self) -> Option<&Arc<GraphSnapshot>> {
        self.snapshot.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn video_params(&self) -> &VideoParams {
        &self.video
    }

    pub fn audio_params(&self) -> &AudioParams {
        &self.audio
    }

    /// New render parameters mean a new cache identity; recompiles.
    pub fn set_params(&mut self, video: VideoParams, audio: AudioParams) -> Result<bool, RenderError> {
        if video == self.video && audio == self.audio {
            return Ok(false);
        }
        self.video = video;
        self.audio = audio;
        self.compiled = None;
        self.compile()
    }

    // ---- cache -----------------------------------------------------------

    pub fn frame_cache(&self) -> &FrameHashCache {
        &self.cache
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Invalidate `[start, end)`; `start == end` invalidates the frame at
    /// `start`. The range is queued for background caching.
    pub fn invalidate_cache(&mut self, start: Rational, end: Rational) {
        let range = TimeRange::new(start, end);
        let range = if range.is_instant() { self.cache.frame_span(start) } else { range };
        self.cache.invalidate(range);
        self.cache_queue.insert(range);
    }

    pub fn invalidate_all(&mut self) {
        self.cache.invalidate_all();
        self.enqueue_invalid();
    }

    pub fn set_length(&mut self, length: Rational) {
        let old = self.cache.length();
        self.cache.set_length(length);
        if length > old {
            self.cache_queue.insert(TimeRange::new(old, length));
        } else {
            self.cache_queue.truncate(length);
        }
    }

    /// Ripple edit at `from`, moving later content to `to`.
    pub fn shift(&mut self, from: Rational, to: Rational) {
        self.cache.shift(from, to);
        if let Some(gap) = self.cache_queue.shift(from, to) {
            self.cache_queue.insert(gap);
        }
        self.cache_queue.truncate(self.cache.length());
    }

    fn enqueue_invalid(&mut self) {
        for range in self.cache.invalidated().iter() {
            self.cache_queue.insert(*range);
        }
    }

    pub fn cache_queue(&self) -> &TimeRangeList {
        &self.cache_queue
    }

    // ---- requests --------------------------------------------------------

    /// Ask for the frame at `time`. Returns at once; the ticket resolves
    /// later through [`process_reports`](Self::process_reports).
    ///
    /// `clear_pending` cancels this owner's earlier video requests first.
    pub fn request_frame(&mut self, time: Rational, owner: Option<OwnerId>, clear_pending: bool) -> RenderTicket {
        if clear_pending {
            if let Some(owner) = owner {
                self.clear_video_queue(owner);
            }
        }

        let cached = self
            .cache
            .get_hash(time)
            .and_then(|hash| self.cache.path_for(&hash))
            .filter(|_| !self.closed && self.snapshot.is_some());

        match cached {
            Some(path) => {
                let ticket = RenderTicket::new(TicketKind::DecodeCache, TicketKey::Time(time), owner);
                self.dispatch_decode(ticket.clone(), time, path);
                ticket
            }
            None => {
                let ticket = RenderTicket::new(TicketKind::RenderVideo, TicketKey::Time(time), owner);
                self.enqueue(ticket.clone());
                ticket
            }
        }
    }

    pub fn request_audio(&mut self, range: TimeRange, owner: Option<OwnerId>) -> RenderTicket {
        let ticket = RenderTicket::new(TicketKind::RenderAudio, TicketKey::Range(range), owner);
        self.enqueue(ticket.clone());
        ticket
    }

    fn enqueue(&mut self, ticket: RenderTicket) {
        if self.closed {
            self.finish(&ticket, TicketOutcome::Cancelled);
            return;
        }
        if self.snapshot.is_none() && !self.recompile_queued {
            self.finish(&ticket, TicketOutcome::Failed(RenderError::NotCompiled.to_string()));
            return;
        }
        trace!("Queued {:?} {:?}", ticket.kind(), ticket.key());
        self.pending.push_back(ticket);
        self.cache_next();
    }

    fn dispatch_decode(&mut self, ticket: RenderTicket, time: Rational, path: PathBuf) {
        ticket.mark_running();
        self.decoding.insert(ticket.id(), ticket.clone());
        let tx = self.reports_tx.clone();
        self.task_pool.execute(move || {
            let result = if ticket.is_cancel_requested() {
                Err(RenderError::Cancelled)
            } else {
                FrameHashCache::load_cached_frame(&path).map(|f| Arc::new(f.with_time(time)))
            };
            let _ = tx.send(WorkerReport::CacheDecoded { ticket, time, result });
        });
    }

    /// Cancel this owner's queued and in-flight video requests.
    pub fn clear_video_queue(&mut self, owner: OwnerId) {
        let is_video = |t: &RenderTicket| {
            t.owner() == Some(owner) && matches!(t.kind(), TicketKind::RenderVideo | TicketKind::DecodeCache)
        };
        self.cancel_pending(&is_video);

        let mut cancelled = Vec::new();
        for slot in &self.workers {
            if let Some(ticket) = slot.job.as_ref().and_then(|j| j.ticket.as_ref()) {
                if is_video(ticket) {
                    cancelled.push(ticket.clone());
                }
            }
        }
        cancelled.extend(self.decoding.values().filter(|t| is_video(t)).cloned());
        for ticket in cancelled {
            // Worker keeps going; its report finds the ticket resolved
            ticket.cancel();
            self.finish(&ticket, TicketOutcome::Cancelled);
        }
    }

    /// Cancel one ticket wherever it is.
    pub fn cancel(&mut self, ticket: &RenderTicket) {
        ticket.cancel();
        self.pending.retain(|t| !t.ptr_eq(ticket));
        self.finish(ticket, TicketOutcome::Cancelled);
    }

    fn cancel_pending(&mut self, pred: impl Fn(&RenderTicket) -> bool) {
        let (drop, keep): (Vec<_>, Vec<_>) = self.pending.drain(..).partition(|t| pred(t));
        self.pending = keep.into();
        for ticket in drop {
            ticket.cancel();
            self.finish(&ticket, TicketOutcome::Cancelled);
        }
    }

    /// Resolve and announce. No-op for tickets already resolved.
    fn finish(&self, ticket: &RenderTicket, outcome: TicketOutcome) {
        if let TicketOutcome::Failed(e) = &outcome {
            warn!("{:?} {:?} failed: {}", ticket.kind(), ticket.key(), e);
        }
        if ticket.resolve(outcome) {
            self.notifier.emit(CacheEvent::Finished { ticket: ticket.id(), kind: ticket.kind() });
        }
    }

    // ---- background caching ---------------------------------------------

    /// Attach the process-wide background task; cache ranges start flowing
    /// to idle workers.
    pub fn start_background_cache(&mut self, task: BackgroundCacheTask) {
        debug!("Background caching started for {}", task.owner());
        self.background = Some(task);
        self.cache_next();
    }

    /// Detach the task. Range jobs in flight stop at their next checkpoint.
    pub fn stop_background_cache(&mut self) {
        if self.background.take().is_some() {
            debug!("Background caching stopped");
        }
    }

    pub fn is_background_caching(&self) -> bool {
        self.background.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// Next chunk of the cache queue inside `[0, length)`.
    fn next_cache_range(&mut self) -> Option<TimeRange> {
        let bounds = TimeRange::new(Rational::ZERO, self.cache.length());
        let chunk_len = Rational::from_int(self.frames_per_job as i64) * self.video.timebase;
        while let Some(range) = self.cache_queue.pop_first() {
            let Some(range) = range.intersection(&bounds) else {
                continue;
            };
            let end = range.out_point().min(range.in_point() + chunk_len);
            if end < range.out_point() {
                self.cache_queue.insert(TimeRange::new(end, range.out_point()));
            }
            return Some(TimeRange::new(range.in_point(), end));
        }
        None
    }

    // ---- dispatch ----------------------------------------------------------

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_is_busy(&self, worker: usize) -> bool {
        self.workers.get(worker).is_some_and(|w| w.busy)
    }

    /// The one place worker scheduling state changes.
    fn set_worker_busy(&mut self, worker: usize, job: Option<RunningJob>) {
        let Some(slot) = self.workers.get_mut(worker) else {
            return;
        };
        slot.busy = job.is_some();
        slot.job = job;
        let busy = self.busy_workers();
        self.max_concurrent = self.max_concurrent.max(busy);
    }

    pub fn busy_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.busy).count()
    }

    /// Highest number of jobs ever in flight at once.
    pub fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Nothing queued, nothing running.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.decoding.is_empty() && self.busy_workers() == 0
    }

    /// Hand queued work to idle workers. Tickets first, then cache ranges.
    pub fn cache_next(&mut self) {
        if self.closed {
            return;
        }
        if self.recompile_queued {
            if let Err(e) = self.compile() {
                // Previous snapshot stays; the error is in last_error()
                debug!("Queued recompile failed: {}", e);
            }
        }
        if self.value_update_queued {
            self.update_node_inputs();
        }

        // Requests cancelled while waiting never reach a worker
        let (cancelled, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|t| t.is_cancel_requested());
        self.pending = waiting.into();
        for ticket in cancelled {
            self.finish(&ticket, TicketOutcome::Cancelled);
        }

        if self.background.as_ref().is_some_and(|t| t.is_cancelled()) {
            self.stop_background_cache();
        }

        let Some(snapshot) = self.snapshot.clone() else {
            return;
        };

        while let Some(worker) = self.workers.iter().position(|w| !w.busy) {
            let job = if let Some(ticket) = self.pending.pop_front() {
                let kind = match ticket.key() {
                    TicketKey::Time(time) => JobKind::Frame { time },
                    TicketKey::Range(range) => JobKind::Audio { range },
                };
                ticket.mark_running();
                RenderJob {
                    kind,
                    ticket: Some(ticket),
                    snapshot: Arc::clone(&snapshot),
                    epoch: self.cache.epoch(),
                    cache_dir: self.cache.cache_dir(),
                    cancel: Arc::new(AtomicBool::new(false)),
                }
            } else if let Some(cancel) = self.background.as_ref().map(|t| t.cancel_flag()) {
                let Some(range) = self.next_cache_range() else {
                    break;
                };
                RenderJob {
                    kind: JobKind::CacheRange { range },
                    ticket: None,
                    snapshot: Arc::clone(&snapshot),
                    epoch: self.cache.epoch(),
                    cache_dir: self.cache.cache_dir(),
                    cancel,
                }
            } else {
                break;
            };

            let running = RunningJob {
                ticket: job.ticket.clone(),
                range: match &job.kind {
                    JobKind::CacheRange { range } => Some(*range),
                    _ => None,
                },
            };
            debug!("Dispatch {:?} -> worker {}", job.kind, worker);
            let failed_ticket = job.ticket.clone();
            if let Err(e) = self.workers[worker].handle.send(job) {
                if let Some(ticket) = failed_ticket {
                    self.finish(&ticket, TicketOutcome::Failed(e.to_string()));
                }
                // Dead worker stays marked busy so nothing else goes there
                self.set_worker_busy(worker, Some(RunningJob { ticket: None, range: None }));
                continue;
            }
            self.set_worker_busy(worker, Some(running));
        }

        if self.background.is_some() && self.cache_queue.is_empty() && !self.any_range_running() {
            info!("Background caching complete");
            self.stop_background_cache();
        }
    }

    fn any_range_running(&self) -> bool {
        self.workers.iter().any(|w| w.job.as_ref().is_some_and(|j| j.range.is_some()))
    }

    // ---- reports -----------------------------------------------------------

    /// Drain worker reports, resolve tickets, update the cache and dispatch
    /// more work. Returns the number of reports handled.
    pub fn process_reports(&mut self) -> usize {
        let reports: Vec<WorkerReport> = self.reports_rx.try_iter().collect();
        let count = reports.len();
        for report in reports {
            self.handle_report(report);
        }
        self.cache_next();
        count
    }

    /// Block up to `timeout` for at least one report, then process all.
    pub fn wait_for_reports(&mut self, timeout: Duration) -> usize {
        match self.reports_rx.recv_timeout(timeout) {
            Ok(first) => {
                self.handle_report(first);
                1 + self.process_reports()
            }
            Err(_) => {
                self.cache_next();
                0
            }
        }
    }

    fn handle_report(&mut self, report: WorkerReport) {
        if let Some(worker) = report.finished_worker() {
            self.set_worker_busy(worker, None);
        }

        match report {
            WorkerReport::FrameRendered { ticket, time, hash, epoch, result, .. } => {
                if let Some(hash) = hash {
                    if self.cache.set_hash(time, &hash, epoch) {
                        self.cache.stats().record_rendered();
                    }
                }
                let outcome = match result {
                    Ok(frame) => TicketOutcome::Finished(RenderPayload::Video(frame)),
                    Err(RenderError::Cancelled) => TicketOutcome::Cancelled,
                    Err(e) => TicketOutcome::Failed(e.to_string()),
                };
                self.finish(&ticket, outcome);
            }
            WorkerReport::AudioRendered { ticket, result, .. } => {
                let outcome = match result {
                    Ok(samples) => TicketOutcome::Finished(RenderPayload::Audio(samples)),
                    Err(RenderError::Cancelled) => TicketOutcome::Cancelled,
                    Err(e) => TicketOutcome::Failed(e.to_string()),
                };
                self.finish(&ticket, outcome);
            }
            WorkerReport::FrameCached { time, hash, epoch, deduplicated, .. } => {
                if self.cache.set_hash(time, &hash, epoch) {
                    if deduplicated {
                        self.cache.stats().record_deduplicated();
                    } else {
                        self.cache.stats().record_rendered();
                    }
                }
            }
            WorkerReport::RangeDone { range, cancelled, .. } => {
                if cancelled {
                    // Resume later; frames already done dedup cheaply
                    self.cache_queue.insert(range);
                }
            }
            WorkerReport::CacheDecoded { ticket, time, result } => {
                self.decoding.remove(&ticket.id());
                match result {
                    Ok(frame) => self.finish(&ticket, TicketOutcome::Finished(RenderPayload::Video(frame))),
                    Err(RenderError::Cancelled) => self.finish(&ticket, TicketOutcome::Cancelled),
                    Err(e) => {
                        if ticket.is_resolved() {
                            return;
                        }
                        // Missing or corrupt file: render it again under the same ticket
                        debug!("Cache decode {} failed ({}), rendering", time, e);
                        self.invalidate_cache(time, time);
                        if ticket.requeue_as(TicketKind::RenderVideo) {
                            self.pending.push_front(ticket);
                        }
                    }
                }
            }
        }
    }

    // ---- teardown ---------------------------------------------------------

    /// Stop dispatching, cancel every outstanding ticket, stop workers and
    /// release the snapshot and decoders. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        info!("RenderBackend closing");
        self.stop_background_cache();
        self.cancel_pending(|_| true);

        let mut outstanding: Vec<RenderTicket> = self.decoding.drain().map(|(_, t)| t).collect();
        for slot in &self.workers {
            if let Some(ticket) = slot.job.as_ref().and_then(|j| j.ticket.clone()) {
                outstanding.push(ticket);
            }
        }
        for ticket in outstanding {
            ticket.cancel();
            self.finish(&ticket, TicketOutcome::Cancelled);
        }

        self.closed = true;
        for slot in self.workers.iter_mut() {
            slot.handle.shutdown(Duration::from_millis(500));
            slot.busy = false;
            slot.job = None;
        }
        self.snapshot = None;
        self.compiled = None;
        self.decoders.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for RenderBackend {
    fn drop(&mut self) {
        self.close();
    }
}
