//! Dedicated render workers.
//!
//! Each worker is one OS thread with its own [`RenderContext`], running one
//! job at a time. Jobs arrive on the worker's private channel; results go back
//! on a report channel shared by all workers and drained by the backend,
//! which is the only place tickets get resolved and the content cache gets
//! updated.
//!
//! Cache-range jobs check their cancel flag between frames, the only
//! checkpoint: a frame that has started always completes.

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error, trace, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::resource_cache::ResourceCache;
use super::ticket::RenderTicket;
use super::time_range::TimeRange;
use crate::entities::decoder::{Decoder, DecoderFactory, SourceProvider};
use crate::entities::frame::{Frame, SampleBuffer};
use crate::entities::graph::GraphSnapshot;
use crate::entities::rational::{Rational, timestamp_to_time};
use crate::error::RenderError;

pub type DecoderCache = ResourceCache<String, Arc<dyn Decoder>>;

/// Per-worker evaluation environment. Decoders are shared through the
/// resource cache; everything else is private to the worker.
pub struct RenderContext {
    worker: usize,
    decoders: Arc<DecoderCache>,
    factory: Arc<dyn DecoderFactory>,
    frames_rendered: u64,
}

impl RenderContext {
    pub fn new(worker: usize, decoders: Arc<DecoderCache>, factory: Arc<dyn DecoderFactory>) -> Self {
        Self { worker, decoders, factory, frames_rendered: 0 }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }
}

impl SourceProvider for RenderContext {
    fn decoder(&self, source: &str) -> Result<Arc<dyn Decoder>, RenderError> {
        self.decoders.get_or_try_create(&source.to_string(), || {
            debug!("Worker {} opening source {}", self.worker, source);
            self.factory.open(source)
        })
    }
}

#[derive(Debug, Clone)]
pub enum JobKind {
    /// Render one frame for a ticket
    Frame { time: Rational },
    /// Render audio for a ticket
    Audio { range: TimeRange },
    /// Render and persist every frame in the range, no ticket
    CacheRange { range: TimeRange },
}

#[derive(Debug, Clone)]
pub struct RenderJob {
    pub kind: JobKind,
    pub ticket: Option<RenderTicket>,
    pub snapshot: Arc<GraphSnapshot>,
    /// Content-cache epoch at dispatch
    pub epoch: u64,
    /// Where to persist frames, if caching is possible
    pub cache_dir: Option<PathBuf>,
    pub cancel: Arc<AtomicBool>,
}

#[derive(Debug)]
pub enum WorkerReport {
    /// A ticketed frame finished. `hash` is set when the frame is on disk.
    FrameRendered {
        worker: usize,
        ticket: RenderTicket,
        time: Rational,
        hash: Option<String>,
        epoch: u64,
        result: Result<Arc<Frame>, RenderError>,
    },
    AudioRendered {
        worker: usize,
        ticket: RenderTicket,
        result: Result<Arc<SampleBuffer>, RenderError>,
    },
    /// One frame of a cache range is on disk (progress, not terminal)
    FrameCached {
        worker: usize,
        time: Rational,
        hash: String,
        epoch: u64,
        deduplicated: bool,
    },
    /// Cache range ended; `cancelled` if it stopped at a checkpoint
    RangeDone { worker: usize, range: TimeRange, cancelled: bool },
    /// Cache decode from the task pool (not a worker)
    CacheDecoded {
        ticket: RenderTicket,
        time: Rational,
        result: Result<Arc<Frame>, RenderError>,
    },
}

impl WorkerReport {
    /// Worker that just became idle, if this report ends a job.
    pub fn finished_worker(&self) -> Option<usize> {
        match self {
            WorkerReport::FrameRendered { worker, .. }
            | WorkerReport::AudioRendered { worker, .. }
            | WorkerReport::RangeDone { worker, .. } => Some(*worker),
            WorkerReport::FrameCached { .. } | WorkerReport::CacheDecoded { .. } => None,
        }
    }
}

enum Message {
    Job(Box<RenderJob>),
    Shutdown,
}

/// Owning handle for one worker thread.
pub struct WorkerHandle {
    id: usize,
    tx: Sender<Message>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn spawn(id: usize, mut ctx: RenderContext, reports: Sender<WorkerReport>) -> std::io::Result<Self> {
        let (tx, rx): (Sender<Message>, Receiver<Message>) = unbounded();
        let handle = thread::Builder::new().name(format!("render-{}", id)).spawn(move || {
            trace!("Render worker {} started", id);
            while let Ok(Message::Job(job)) = rx.recv() {
                run_job(id, &mut ctx, *job, &reports);
            }
            trace!("Render worker {} stopped ({} frames)", id, ctx.frames_rendered());
        })?;
        Ok(Self { id, tx, handle: Some(handle) })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Hand a job to the worker. Fails only if the thread died.
    pub fn send(&self, job: RenderJob) -> Result<(), RenderError> {
        self.tx.send(Message::Job(Box::new(job))).map_err(|_| {
            error!("Render worker {} is gone", self.id);
            RenderError::Closed
        })
    }

    /// Ask the thread to stop after its current job and wait up to `timeout`.
    pub fn shutdown(&mut self, timeout: Duration) {
        let _ = self.tx.send(Message::Shutdown);
        let Some(handle) = self.handle.take() else {
            return;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("Render worker {} did not stop in time, detaching", self.id);
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        let _ = handle.join();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown(Duration::from_millis(500));
    }
}

fn send(reports: &Sender<WorkerReport>, report: WorkerReport) {
    // Backend gone: nobody wants the result
    let _ = reports.send(report);
}

fn run_job(worker: usize, ctx: &mut RenderContext, job: RenderJob, reports: &Sender<WorkerReport>) {
    match job.kind.clone() {
        JobKind::Frame { time } => {
            let Some(ticket) = job.ticket.clone() else {
                return;
            };
            if ticket.is_cancel_requested() {
                let result = Err(RenderError::Cancelled);
                send(reports, WorkerReport::FrameRendered { worker, ticket, time, hash: None, epoch: job.epoch, result });
                return;
            }
            let (hash, result) = render_frame(ctx, &job, time);
            send(reports, WorkerReport::FrameRendered { worker, ticket, time, hash, epoch: job.epoch, result });
        }
        JobKind::Audio { range } => {
            let Some(ticket) = job.ticket.clone() else {
                return;
            };
            let result = job.snapshot.render_audio(range, &*ctx).map(Arc::new);
            send(reports, WorkerReport::AudioRendered { worker, ticket, result });
        }
        JobKind::CacheRange { range } => {
            let cancelled = cache_range(worker, ctx, &job, range, reports);
            send(reports, WorkerReport::RangeDone { worker, range, cancelled });
        }
    }
}

/// Render a ticketed frame, reusing an identical frame already on disk.
fn render_frame(ctx: &mut RenderContext, job: &RenderJob, time: Rational) -> (Option<String>, Result<Arc<Frame>, RenderError>) {
    let hash = job.snapshot.frame_hash(time);
    let path = job.cache_dir.as_ref().map(|dir| dir.join(&hash));

    if let Some(path) = path.as_ref().filter(|p| p.is_file()) {
        if let Ok(frame) = Frame::load(path) {
            trace!("Frame {} deduplicated ({})", time, &hash[..8]);
            return (Some(hash), Ok(Arc::new(frame.with_time(time))));
        }
    }

    let frame = match job.snapshot.render_video(time, &*ctx) {
        Ok(frame) => frame,
        Err(e) => return (None, Err(e)),
    };
    ctx.frames_rendered += 1;

    let stored = match path {
        Some(path) => match frame.save(&path) {
            Ok(()) => Some(hash),
            Err(e) => {
                warn!("Could not persist frame {}: {}", time, e);
                None
            }
        },
        None => None,
    };
    (stored, Ok(Arc::new(frame)))
}

/// Returns true if the range stopped early because of cancellation.
fn cache_range(
    worker: usize,
    ctx: &mut RenderContext,
    job: &RenderJob,
    range: TimeRange,
    reports: &Sender<WorkerReport>,
) -> bool {
    let Some(dir) = job.cache_dir.as_ref() else {
        return false;
    };
    let timebase = job.snapshot.video_params().timebase;
    trace!("Worker {} caching {}", worker, range);

    for ts in range.timestamps(timebase) {
        if job.cancel.load(Ordering::Acquire) {
            debug!("Worker {} cache range {} cancelled", worker, range);
            return true;
        }
        let time = timestamp_to_time(ts, timebase);
        let hash = job.snapshot.frame_hash(time);
        let path = dir.join(&hash);

        if path.is_file() {
            send(reports, WorkerReport::FrameCached { worker, time, hash, epoch: job.epoch, deduplicated: true });
            continue;
        }
        match job.snapshot.render_video(time, &*ctx).and_then(|f| f.save(&path)) {
            Ok(()) => {
                ctx.frames_rendered += 1;
                send(reports, WorkerReport::FrameCached { worker, time, hash, epoch: job.epoch, deduplicated: false });
            }
            // Frame stays invalidated; the next invalidation of it retries
            Err(e) => warn!("Cache render {} failed: {}", time, e),
        }
    }
    false
}
