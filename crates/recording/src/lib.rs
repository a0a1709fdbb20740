//! The acquisition-to-disk pipeline.
//!
//! Two threads per session: the acquisition thread pulls frames from the
//! [`FrameSource`](strobe_camera::FrameSource) and pushes them into a bounded
//! [`buffer`]; the writer thread drains the buffer into a [`sink`]. The
//! acquisition side never blocks on disk — a slow disk costs dropped units,
//! never capture timing. [`CaptureController`] owns both threads and the
//! session state machine.

use strobe_camera::PixelFormat;

pub mod buffer;
pub mod controller;
pub mod sink;

pub use buffer::{frame_buffer, BufferConsumer, BufferProducer, BufferWatcher};
pub use controller::{
    CaptureController, CaptureOptions, CaptureState, CaptureStatus, ControlError,
};
pub use sink::{FrameDirSink, SinkError, UnitSink, WaterfallSink};

/// One captured item flowing through the pipeline: a full frame in area mode,
/// a single scan-line (`height == 1`) in waterfall mode. The sequence index is
/// assigned by the acquisition thread at delivery time and is unique within
/// its session; dropped units consume indices too, which is what makes gaps
/// in the persisted sequence observable.
#[derive(Debug, Clone)]
pub struct RawUnit {
    pub index: u64,
    /// Nanoseconds since session start, monotonic.
    pub timestamp_ns: u64,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub data: Vec<u8>,
}
