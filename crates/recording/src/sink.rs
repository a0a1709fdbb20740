//! Persistence sinks drained by the writer thread.
//!
//! One sink per session, written sequentially in arrival order. A per-unit
//! failure is recoverable (logged, counted, next unit proceeds); running out
//! of storage is fatal to the whole session. The `strobe-fail` points let
//! tests drive both paths without a full disk.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use strobe_project::waterfall::WaterfallWriter;
use strobe_project::{frame_file_name, FrameIndexRecord, SessionMeta};
use tracing::debug;

use crate::RawUnit;

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    /// Fatal: the filesystem has no room left for this session.
    #[error("storage exhausted: {0}")]
    StorageExhausted(#[source] std::io::Error),

    /// Recoverable single-unit failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SinkError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StorageExhausted(_))
    }

    /// Classify an IO error, promoting out-of-space conditions to fatal.
    fn classify(e: std::io::Error) -> Self {
        if is_storage_full(&e) {
            Self::StorageExhausted(e)
        } else {
            Self::Io(e)
        }
    }
}

fn is_storage_full(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    if matches!(e.kind(), ErrorKind::StorageFull | ErrorKind::QuotaExceeded) {
        return true;
    }
    // ENOSPC on platforms where the kind isn't mapped.
    e.raw_os_error() == Some(28)
}

fn injected_full() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::StorageFull, "injected ENOSPC")
}

/// Consumer side of the pipeline: persists units one at a time.
pub trait UnitSink: Send {
    fn write_unit(&mut self, unit: &RawUnit) -> Result<(), SinkError>;

    /// Flush and close. Called exactly once, after the buffer has drained.
    fn finish(&mut self) -> Result<(), SinkError>;
}

/// Area-mode sink: one payload-only raw file per unit plus a `frames.jsonl`
/// record. The record is appended only after the payload write succeeds, so
/// the index lists exactly the units that made it to disk.
pub struct FrameDirSink {
    frames_dir: PathBuf,
    index: BufWriter<File>,
}

impl FrameDirSink {
    pub fn create(meta: &SessionMeta) -> Result<Self, SinkError> {
        let frames_dir = meta.frames_dir();
        std::fs::create_dir_all(&frames_dir).map_err(SinkError::classify)?;
        let index = BufWriter::new(
            File::create(meta.frames_index_path()).map_err(SinkError::classify)?,
        );
        debug!(dir = %frames_dir.display(), "frame directory sink ready");
        Ok(Self { frames_dir, index })
    }
}

impl UnitSink for FrameDirSink {
    fn write_unit(&mut self, unit: &RawUnit) -> Result<(), SinkError> {
        strobe_fail::inject_err!("frame_dir::write", SinkError::StorageExhausted(injected_full()));

        let path = self.frames_dir.join(frame_file_name(unit.index));
        let write = |path: &PathBuf| -> std::io::Result<()> {
            let mut file = File::create(path)?;
            file.write_all(&unit.data)
        };
        write(&path).map_err(SinkError::classify)?;

        let record = FrameIndexRecord {
            index: unit.index,
            timestamp_ns: unit.timestamp_ns,
        };
        serde_json::to_writer(&mut self.index, &record)?;
        self.index.write_all(b"\n").map_err(SinkError::classify)?;
        // The index record reaches the OS with its unit, not at seal time.
        self.index.flush().map_err(SinkError::classify)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.index.flush().map_err(SinkError::classify)
    }
}

/// Waterfall-mode sink: every line appends to the one container file opened
/// at session start.
pub struct WaterfallSink {
    writer: Option<WaterfallWriter>,
}

impl WaterfallSink {
    pub fn create(meta: &SessionMeta) -> Result<Self, SinkError> {
        let writer = WaterfallWriter::create(&meta.waterfall_path(), meta.width, meta.pixel_format)
            .map_err(SinkError::classify)?;
        Ok(Self {
            writer: Some(writer),
        })
    }
}

impl UnitSink for WaterfallSink {
    fn write_unit(&mut self, unit: &RawUnit) -> Result<(), SinkError> {
        strobe_fail::inject_err!("waterfall::write", SinkError::StorageExhausted(injected_full()));

        let Some(writer) = self.writer.as_mut() else {
            return Err(SinkError::Io(std::io::Error::other("sink already finished")));
        };
        writer
            .append(unit.index, unit.timestamp_ns, &unit.data)
            .map_err(SinkError::classify)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.take() {
            let lines = writer.finish().map_err(SinkError::classify)?;
            debug!(lines, "waterfall container finished");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use strobe_camera::{CaptureMode, PixelFormat};
    use strobe_project::{SessionState, SESSION_META_VERSION};

    fn meta(path: &std::path::Path, mode: CaptureMode) -> SessionMeta {
        SessionMeta {
            session_path: path.to_path_buf(),
            version: SESSION_META_VERSION,
            mode,
            width: 4,
            height: if mode == CaptureMode::Waterfall { 1 } else { 2 },
            pixel_format: PixelFormat::Mono8,
            exposure_us: 100.0,
            gain_db: 0.0,
            fps_cap: None,
            started_at: Utc::now(),
            ended_at: None,
            captured: 0,
            dropped: 0,
            write_failed: 0,
            state: SessionState::Capturing,
        }
    }

    fn unit(index: u64, bytes: usize) -> RawUnit {
        RawUnit {
            index,
            timestamp_ns: index * 100,
            width: 4,
            height: (bytes / 4) as u32,
            pixel_format: PixelFormat::Mono8,
            data: vec![index as u8; bytes],
        }
    }

    #[test]
    fn frame_dir_sink_writes_payload_and_index_record() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta(dir.path(), CaptureMode::Area);

        let mut sink = FrameDirSink::create(&meta).unwrap();
        sink.write_unit(&unit(0, 8)).unwrap();
        sink.write_unit(&unit(1, 8)).unwrap();
        sink.finish().unwrap();

        let payload = std::fs::read(meta.frames_dir().join("00000001.raw")).unwrap();
        assert_eq!(payload, vec![1u8; 8]);

        let index = std::fs::read_to_string(meta.frames_index_path()).unwrap();
        let records: Vec<FrameIndexRecord> = index
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].index, 1);
        assert_eq!(records[1].timestamp_ns, 100);
    }

    #[test]
    fn index_records_land_with_their_units_not_at_finish() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta(dir.path(), CaptureMode::Area);

        let mut sink = FrameDirSink::create(&meta).unwrap();
        sink.write_unit(&unit(0, 8)).unwrap();

        // No finish(); a crash here must still leave unit 0 addressable.
        let index = std::fs::read_to_string(meta.frames_index_path()).unwrap();
        let record: FrameIndexRecord = serde_json::from_str(index.trim()).unwrap();
        assert_eq!(record.index, 0);
    }

    #[test]
    fn waterfall_sink_appends_to_container() {
        let dir = tempfile::tempdir().unwrap();
        let meta = meta(dir.path(), CaptureMode::Waterfall);

        let mut sink = WaterfallSink::create(&meta).unwrap();
        for i in 0..3 {
            sink.write_unit(&unit(i, 4)).unwrap();
        }
        sink.finish().unwrap();

        let lines: Vec<_> = strobe_project::WaterfallReader::open(&meta.waterfall_path())
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2].index, 2);
    }

    #[test]
    fn enospc_classifies_as_fatal() {
        let e = std::io::Error::from_raw_os_error(28);
        assert!(SinkError::classify(e).is_fatal());

        let e = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(!SinkError::classify(e).is_fatal());
    }
}
