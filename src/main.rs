use rendercache::cli::Args;
use rendercache::config::{AppSettings, SharedSettings};
use rendercache::core::backend::{BackendConfig, RenderBackend};
use rendercache::core::notify::Notifier;
use rendercache::core::scheduling::SchedulingContext;
use rendercache::core::viewer::{NullAudioSink, Viewer};
use rendercache::entities::decoder::DefaultDecoderFactory;
use rendercache::entities::graph::{
    IN_A, IN_B, IN_GAIN, IN_INPUT, IN_MIX, IN_OFFSET, Keyframe, NodeGraph, NodeKind, Value,
};
use rendercache::entities::params::{AudioParams, VideoParams};
use rendercache::entities::rational::Rational;
use rendercache::paths;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info, warn};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

const SETTINGS_FILE: &str = "settings.json";
const LOG_FILE: &str = "rendercache.log";

/// Two footage streams cross-faded over the whole sequence, then graded.
fn build_demo_graph(length: Rational) -> NodeGraph {
    let mut g = NodeGraph::new();
    let out = g.add_node("Output", NodeKind::ViewerOutput);
    let bars = g.add_node("Bars", NodeKind::Footage { source: "synthetic:bars".into() });
    let ramp = g.add_node("Ramp", NodeKind::Footage { source: "synthetic:ramp".into() });
    let blend = g.add_node("Crossfade", NodeKind::Blend);
    let grade = g.add_node("Grade", NodeKind::Tone);

    g.connect(blend, IN_A, bars);
    g.connect(blend, IN_B, ramp);
    g.set_keyframes(
        blend,
        IN_MIX,
        vec![Keyframe::new(Rational::ZERO, Value::Float(0.0)), Keyframe::new(length, Value::Float(1.0))],
    );
    g.connect(grade, IN_INPUT, blend);
    g.set_value(grade, IN_GAIN, Value::Float(1.1));
    g.set_value(grade, IN_OFFSET, Value::Float(0.02));
    g.connect(out, IN_INPUT, grade);
    g
}

fn init_logging(args: &Args, path_config: &paths::PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt.clone().unwrap_or_else(|| paths::config_file(LOG_FILE, path_config));
        if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Respects RUST_LOG if set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

/// Tick the viewer until `done` holds.
fn run_until(
    viewer: &mut Viewer,
    backend: &mut RenderBackend,
    mut done: impl FnMut(&Viewer, &RenderBackend) -> bool,
) {
    let mut last_report = Instant::now();
    while !done(viewer, backend) {
        backend.wait_for_reports(Duration::from_millis(4));
        viewer.tick(backend);
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            info!(
                "t={} speed={} queue={} busy workers={} pending={} uncached ranges={}",
                viewer.time(),
                viewer.speed(),
                viewer.queue_len(),
                backend.busy_workers(),
                backend.pending_len(),
                backend.cache_queue().len()
            );
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = paths::PathConfig::from_env_and_cli(args.cache_dir.clone(), args.config_dir.clone());
    init_logging(&args, &path_config)?;
    debug!("Command-line args: {:?}", args);

    if args.length <= 0 {
        bail!("--length must be positive, got {}", args.length);
    }
    if args.fps <= 0 {
        bail!("--fps must be positive, got {}", args.fps);
    }

    let settings_path = paths::config_file(SETTINGS_FILE, &path_config);
    let mut settings = match AppSettings::load(&settings_path) {
        Ok(s) => s,
        Err(e) => {
            warn!("{:#}; using defaults", e);
            AppSettings::default()
        }
    };
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    if args.loop_playback {
        settings.loop_enabled = true;
    }

    let cache_root = paths::cache_root(&path_config, settings.cache_dir.as_ref());
    if let Err(e) = paths::ensure_dirs(&path_config, &cache_root) {
        warn!("Failed to create application directories: {:#}", e);
    }
    if !settings_path.exists() {
        if let Err(e) = settings.save(&settings_path) {
            warn!("{:#}", e);
        }
    }

    info!("Config: {}", settings_path.display());
    info!("Cache:  {}", cache_root.display());

    let timebase = Rational::new(1, args.fps);
    let length = Rational::new(args.length, args.fps);
    let graph = Arc::new(RwLock::new(build_demo_graph(length)));

    let config = BackendConfig {
        workers: settings.worker_count(),
        cache_root,
        cache_name: settings.cache_name.clone(),
        video: VideoParams::new(args.width, args.height, timebase),
        audio: AudioParams::default(),
        history_len: settings.invalidation_history,
        frames_per_job: settings.frames_per_cache_job,
    };
    let mut backend = RenderBackend::new(graph, Arc::new(DefaultDecoderFactory), config, Notifier::new())?;
    backend.compile().context("Failed to compile the node graph")?;
    backend.set_length(length);

    let shared = SharedSettings::new(settings.clone());
    let sched = SchedulingContext::new();
    let mut viewer = Viewer::new(&backend, Arc::new(shared.clone()), sched.clone(), Box::new(NullAudioSink))
        .with_max_prequeue(settings.max_prequeue);
    viewer.set_autocache(&mut backend, settings.autocache);

    let started = Instant::now();

    if args.play {
        let speed = if args.speed == 0 { 1 } else { args.speed };
        if speed < 0 {
            viewer.go_to_end(&mut backend);
        }
        viewer.play_with_speed(&mut backend, speed);

        if settings.loop_enabled {
            // One pass plus one loop, then stop
            let pass = Duration::from_secs_f64(length.to_f64() / speed.unsigned_abs() as f64);
            let deadline = Instant::now() + pass * 2;
            run_until(&mut viewer, &mut backend, |_, _| Instant::now() >= deadline);
            viewer.pause(&mut backend);
        } else {
            run_until(&mut viewer, &mut backend, |v, _| !v.is_playing());
        }
        let vs = viewer.stats();
        println!(
            "Playback: {} frames shown, {} underruns, {} late frames in {:.2}s",
            vs.frames_shown,
            vs.underruns,
            vs.late_frames,
            started.elapsed().as_secs_f64()
        );
    } else {
        viewer.set_time(&mut backend, 0);
    }

    if settings.autocache {
        viewer.start_background_caching(&mut backend);
        run_until(&mut viewer, &mut backend, |_, b| {
            b.cache_queue().is_empty() && !sched.background_active() && b.is_idle()
        });
    }

    let cache = backend.frame_cache();
    let stats = cache.stats();
    println!("Cache:      {}", cache.cache_dir().map(|p| p.display().to_string()).unwrap_or_default());
    println!("Frames:     {} @ {} fps, {}x{}", args.length, args.fps, args.width, args.height);
    println!("Workers:    {}", backend.worker_count());
    println!("Hits:       {}", stats.hits());
    println!("Misses:     {}", stats.misses());
    println!("Rendered:   {}", stats.rendered());
    println!("Deduped:    {}", stats.deduplicated());
    println!("Stale:      {}", stats.stale_rejected());
    println!("Hit rate:   {:.1}%", stats.hit_rate() * 100.0);
    println!("Elapsed:    {:.2}s", started.elapsed().as_secs_f64());

    viewer.close(&mut backend);
    backend.close();
    info!("Shutdown complete");
    Ok(())
}
