//! Session orchestration.
//!
//! `CaptureController` is the only place acquisition starts or stops, and it
//! enforces one active session at a time. State machine:
//!
//! ```text
//! Idle -> Capturing -> Idle             (stop)
//! Idle -> Capturing -> Failed -> Idle   (fatal write/storage/source error,
//!                                        acquisition auto-halts; stop() reaps)
//! ```
//!
//! `start` while capturing and `stop` while idle are caller errors, never
//! panics, and leave the state untouched.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use strobe_camera::{AppliedConfig, CameraConfig, CameraError, CaptureMode, FrameSource};
use strobe_project::{ProjectError, SessionMeta, SessionState, SESSION_META_VERSION};
use strobe_timestamp::Timestamps;
use tracing::{error, info, warn};

use crate::buffer::{frame_buffer, BufferConsumer, BufferProducer, BufferWatcher};
use crate::sink::{FrameDirSink, UnitSink, WaterfallSink};
use crate::RawUnit;

#[derive(thiserror::Error, Debug)]
pub enum ControlError {
    #[error("a capture session is already active")]
    AlreadyCapturing,

    #[error("no capture session is active")]
    NotCapturing,

    #[error("camera: {0}")]
    Camera(#[from] CameraError),

    #[error("project: {0}")]
    Project(#[from] ProjectError),

    #[error("sink: {0}")]
    Sink(#[from] crate::sink::SinkError),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Units the buffer absorbs between acquisition and disk flush.
    pub buffer_capacity: usize,
    /// Stop delivering after this many units.
    pub max_units: Option<u64>,
    /// Stop delivering after this much wall time.
    pub max_duration: Option<Duration>,
    /// Poll interval for the pull loop; also bounds stop latency.
    pub poll_timeout: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 2048,
            max_units: None,
            max_duration: None,
            poll_timeout: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Capturing,
    Failed,
}

/// Live, side-effect-free snapshot of an active (or absent) session.
#[derive(Debug, Clone)]
pub struct CaptureStatus {
    pub state: CaptureState,
    pub delivered: u64,
    pub captured: u64,
    pub dropped: u64,
    pub write_failed: u64,
    pub buffer_depth: usize,
    pub elapsed: Duration,
    pub effective_fps: f64,
    /// True once the acquisition loop has exited (limit reached, stop, or
    /// failure) even though the session is not yet sealed.
    pub delivery_done: bool,
    pub failure: Option<String>,
}

impl CaptureStatus {
    fn idle() -> Self {
        Self {
            state: CaptureState::Idle,
            delivered: 0,
            captured: 0,
            dropped: 0,
            write_failed: 0,
            buffer_depth: 0,
            elapsed: Duration::ZERO,
            effective_fps: 0.0,
            delivery_done: false,
            failure: None,
        }
    }
}

#[derive(Default)]
struct SessionCounters {
    delivered: AtomicU64,
    captured: AtomicU64,
    write_failed: AtomicU64,
    written: AtomicU64,
}

/// Sticky fatal-failure flag shared by both threads.
#[derive(Default)]
struct SessionFailure {
    failed: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl SessionFailure {
    fn fail(&self, reason: String) {
        let mut slot = self.reason.lock().unwrap();
        if slot.is_none() {
            error!("session failed: {reason}");
            *slot = Some(reason);
        }
        self.failed.store(true, Ordering::Release);
    }

    fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    fn reason(&self) -> Option<String> {
        self.reason.lock().unwrap().clone()
    }
}

struct ActiveSession {
    meta: SessionMeta,
    timestamps: Timestamps,
    stop: Arc<AtomicBool>,
    delivery_done: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
    failure: Arc<SessionFailure>,
    watcher: BufferWatcher,
    acquisition: JoinHandle<Box<dyn FrameSource>>,
    writer: JoinHandle<()>,
}

pub struct CaptureController {
    // Present exactly when no session is active; moves into the acquisition
    // thread for the session's lifetime and comes back at stop.
    source: Option<Box<dyn FrameSource>>,
    active: Option<ActiveSession>,
}

impl CaptureController {
    pub fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source: Some(source),
            active: None,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.active.is_some()
    }

    /// Begin a capture session persisting into `session_path`. Returns the
    /// configuration the device actually accepted, clamps included.
    pub fn start(
        &mut self,
        mode: CaptureMode,
        config: CameraConfig,
        session_path: &Path,
        options: CaptureOptions,
    ) -> Result<AppliedConfig, ControlError> {
        self.start_with_sink_factory(mode, config, session_path, options, |meta| {
            Ok(match meta.mode {
                CaptureMode::Area => Box::new(FrameDirSink::create(meta)?),
                CaptureMode::Waterfall => Box::new(WaterfallSink::create(meta)?),
            })
        })
    }

    /// `start` with a caller-supplied sink, for tests that need to stall or
    /// fail persistence deterministically.
    #[doc(hidden)]
    pub fn start_with_sink_factory(
        &mut self,
        mode: CaptureMode,
        config: CameraConfig,
        session_path: &Path,
        options: CaptureOptions,
        sink_factory: impl FnOnce(&SessionMeta) -> Result<Box<dyn UnitSink>, ControlError>,
    ) -> Result<AppliedConfig, ControlError> {
        if self.active.is_some() {
            return Err(ControlError::AlreadyCapturing);
        }

        let mut config = config;
        if mode == CaptureMode::Waterfall {
            // Single-line readout at the sensor's maximum rate.
            config.height = 1;
            config.fps_cap = None;
        }

        let mut source = self.source.take().ok_or(ControlError::AlreadyCapturing)?;
        let applied = match source.configure(&config) {
            Ok(applied) => applied,
            Err(e) => {
                self.source = Some(source);
                return Err(e.into());
            }
        };
        for clamp in &applied.clamped {
            warn!(
                param = clamp.name,
                requested = clamp.requested,
                applied = clamp.applied,
                "configuration clamped to device limits"
            );
        }

        match spawn_session(source, mode, &applied, session_path, options, sink_factory) {
            Ok(active) => {
                info!(
                    %mode,
                    session = %session_path.display(),
                    "capture session started"
                );
                self.active = Some(active);
                Ok(applied)
            }
            Err((source, e)) => {
                self.source = Some(source);
                Err(e)
            }
        }
    }

    /// Cooperatively stop: halt delivery, drain the buffer, join both
    /// threads, seal and persist the session record.
    pub fn stop(&mut self) -> Result<SessionMeta, ControlError> {
        let active = self.active.take().ok_or(ControlError::NotCapturing)?;

        active.stop.store(true, Ordering::Release);

        let source = active
            .acquisition
            .join()
            .map_err(|_| ControlError::ThreadPanicked("acquisition"))?;
        active
            .writer
            .join()
            .map_err(|_| ControlError::ThreadPanicked("writer"))?;
        self.source = Some(source);

        let mut meta = active.meta;
        meta.ended_at = Some(Utc::now());
        meta.captured = active.counters.captured.load(Ordering::Relaxed);
        meta.dropped = active.watcher.dropped();
        meta.write_failed = active.counters.write_failed.load(Ordering::Relaxed);
        meta.state = if active.failure.is_failed() {
            SessionState::Failed
        } else {
            SessionState::Sealed
        };
        meta.save_for_session()?;

        info!(
            captured = meta.captured,
            dropped = meta.dropped,
            write_failed = meta.write_failed,
            written = active.counters.written.load(Ordering::Relaxed),
            state = ?meta.state,
            "capture session sealed"
        );
        Ok(meta)
    }

    /// Live counters; safe to call at any time, capturing or not.
    pub fn status(&self) -> CaptureStatus {
        let Some(active) = &self.active else {
            return CaptureStatus::idle();
        };

        let elapsed = active.timestamps.elapsed();
        let captured = active.counters.captured.load(Ordering::Relaxed);
        let effective_fps = if elapsed.as_secs_f64() > 0.0 {
            captured as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        CaptureStatus {
            state: if active.failure.is_failed() {
                CaptureState::Failed
            } else {
                CaptureState::Capturing
            },
            delivered: active.counters.delivered.load(Ordering::Relaxed),
            captured,
            dropped: active.watcher.dropped(),
            write_failed: active.counters.write_failed.load(Ordering::Relaxed),
            buffer_depth: active.watcher.depth(),
            elapsed,
            effective_fps,
            delivery_done: active.delivery_done.load(Ordering::Acquire),
            failure: active.failure.reason(),
        }
    }
}

/// Everything that can fail after the source is configured. Hands the source
/// back on failure so the controller stays usable.
fn spawn_session(
    mut source: Box<dyn FrameSource>,
    mode: CaptureMode,
    applied: &AppliedConfig,
    session_path: &Path,
    options: CaptureOptions,
    sink_factory: impl FnOnce(&SessionMeta) -> Result<Box<dyn UnitSink>, ControlError>,
) -> Result<ActiveSession, (Box<dyn FrameSource>, ControlError)> {
    let config = &applied.config;

    let build = || -> Result<(SessionMeta, Box<dyn UnitSink>), ControlError> {
        std::fs::create_dir_all(session_path)?;
        let meta = SessionMeta {
            session_path: session_path.to_path_buf(),
            version: SESSION_META_VERSION,
            mode,
            width: config.width,
            height: config.height,
            pixel_format: config.pixel_format,
            exposure_us: config.exposure_us,
            gain_db: config.gain_db,
            fps_cap: config.fps_cap,
            started_at: Utc::now(),
            ended_at: None,
            captured: 0,
            dropped: 0,
            write_failed: 0,
            state: SessionState::Capturing,
        };
        meta.save_for_session()?;

        let sink = sink_factory(&meta)?;
        Ok((meta, sink))
    };

    let (meta, sink) = match build() {
        Ok(parts) => parts,
        Err(e) => return Err((source, e)),
    };

    if let Err(e) = source.start_delivery(mode) {
        return Err((source, e.into()));
    }

    let timestamps = Timestamps::now();
    let stop = Arc::new(AtomicBool::new(false));
    let delivery_done = Arc::new(AtomicBool::new(false));
    let counters = Arc::new(SessionCounters::default());
    let failure = Arc::new(SessionFailure::default());
    let (producer, consumer) = frame_buffer(options.buffer_capacity);
    let watcher = consumer.watcher();

    let acquisition = std::thread::Builder::new()
        .name("strobe-acquisition".to_string())
        .spawn({
            let stop = stop.clone();
            let delivery_done = delivery_done.clone();
            let counters = counters.clone();
            let failure = failure.clone();
            move || {
                acquisition_loop(
                    source.as_mut(),
                    &producer,
                    &stop,
                    &counters,
                    &failure,
                    timestamps,
                    &options,
                );
                source.stop_delivery();
                delivery_done.store(true, Ordering::Release);
                drop(producer);
                source
            }
        })
        .expect("failed to spawn acquisition thread");

    let writer = std::thread::Builder::new()
        .name("strobe-writer".to_string())
        .spawn({
            let counters = counters.clone();
            let failure = failure.clone();
            let mut sink = sink;
            move || {
                writer_loop(sink.as_mut(), &consumer, &counters, &failure);
            }
        })
        .expect("failed to spawn writer thread");

    Ok(ActiveSession {
        meta,
        timestamps,
        stop,
        delivery_done,
        counters,
        failure,
        watcher,
        acquisition,
        writer,
    })
}

fn acquisition_loop(
    source: &mut dyn FrameSource,
    producer: &BufferProducer,
    stop: &AtomicBool,
    counters: &SessionCounters,
    failure: &SessionFailure,
    timestamps: Timestamps,
    options: &CaptureOptions,
) {
    loop {
        if stop.load(Ordering::Acquire) || failure.is_failed() {
            break;
        }
        if let Some(max) = options.max_units
            && counters.delivered.load(Ordering::Relaxed) >= max
        {
            info!(max, "unit limit reached, halting delivery");
            break;
        }
        if let Some(max) = options.max_duration
            && timestamps.elapsed() >= max
        {
            info!(?max, "duration limit reached, halting delivery");
            break;
        }

        match source.next_frame(options.poll_timeout) {
            Ok(Some(frame)) => {
                let index = counters.delivered.fetch_add(1, Ordering::Relaxed);
                let unit = RawUnit {
                    index,
                    timestamp_ns: frame.timestamp.nanos_since(timestamps),
                    width: frame.width,
                    height: frame.height,
                    pixel_format: frame.pixel_format,
                    data: frame.data,
                };
                if producer.push(unit) {
                    counters.captured.fetch_add(1, Ordering::Relaxed);
                }
            }
            Ok(None) => {}
            Err(e) => {
                failure.fail(format!("camera source: {e}"));
                break;
            }
        }
    }
}

fn writer_loop(
    sink: &mut dyn UnitSink,
    consumer: &BufferConsumer,
    counters: &SessionCounters,
    failure: &SessionFailure,
) {
    while let Some(unit) = consumer.pop() {
        match sink.write_unit(&unit) {
            Ok(()) => {
                counters.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_fatal() => {
                failure.fail(format!("disk writer: {e}"));
                break;
            }
            Err(e) => {
                warn!(index = unit.index, "unit write failed: {e}");
                counters.write_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    match sink.finish() {
        Ok(()) => {}
        Err(e) if e.is_fatal() => failure.fail(format!("disk writer finish: {e}")),
        Err(e) => warn!("sink finish failed: {e}"),
    }
}

/// Timestamped session directory name, e.g. `session_20260829_153000`.
pub fn session_dir_name(now: chrono::DateTime<Utc>) -> String {
    format!("session_{}", now.format("%Y%m%d_%H%M%S"))
}

/// Convenience for callers that want sessions under one output root.
pub fn next_session_path(output_root: &Path) -> PathBuf {
    output_root.join(session_dir_name(Utc::now()))
}
