//! On-disk formats for capture sessions.
//!
//! A session directory looks like:
//!
//! ```text
//! <session>/
//!   session.json      # SessionMeta
//!   frames/           # area mode: one payload-only raw file per unit
//!     00000000.raw
//!     ...
//!   frames.jsonl      # area mode: {index, timestamp_ns} per persisted unit
//!   lines.wtf         # waterfall mode: append-only line container
//! ```
//!
//! Raw files carry no header so external tools can consume them as rawvideo;
//! dimensions and pixel format live in `session.json`, per-unit timestamps in
//! the sidecar index. The waterfall container is self-describing (see
//! [`waterfall`]).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strobe_camera::{CaptureMode, PixelFormat};

pub mod decoder;
pub mod deshear;
pub mod sequence;
pub mod waterfall;

pub use decoder::{DecodedFrame, TrailingLines, WaterfallDecoder};
pub use deshear::DeshearParams;
pub use sequence::{PersistedSequence, SequenceFrame, VideoDims};
pub use waterfall::{LineRecord, WaterfallReader, WaterfallWriter};

pub const SESSION_META_FILE: &str = "session.json";
pub const FRAMES_DIR: &str = "frames";
pub const FRAMES_INDEX_FILE: &str = "frames.jsonl";
pub const WATERFALL_FILE: &str = "lines.wtf";

#[derive(thiserror::Error, Debug)]
pub enum ProjectError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no session metadata at {0}")]
    MissingMeta(PathBuf),

    #[error("invalid waterfall container: {0}")]
    InvalidContainer(String),

    #[error("session is {mode} mode, expected {expected}")]
    WrongMode {
        mode: CaptureMode,
        expected: CaptureMode,
    },

    #[error("session is still capturing; its files may be mid-append")]
    SessionActive,

    #[error("frame height must be at least 1")]
    InvalidFrameHeight,

    #[error("corrupt frame {index}: {detail}")]
    CorruptFrame { index: u64, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Threads still running; meta on disk is provisional.
    Capturing,
    /// Stopped cleanly; totals are final.
    Sealed,
    /// Ended by a fatal error (storage exhaustion, source disconnect).
    Failed,
}

/// Per-session metadata, persisted as `session.json` in the session directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    // Convenience only, not persisted.
    #[serde(skip_serializing, default)]
    pub session_path: PathBuf,
    pub version: u32,
    pub mode: CaptureMode,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub exposure_us: f64,
    pub gain_db: f64,
    pub fps_cap: Option<f64>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub captured: u64,
    #[serde(default)]
    pub dropped: u64,
    #[serde(default)]
    pub write_failed: u64,
    pub state: SessionState,
}

pub const SESSION_META_VERSION: u32 = 1;

impl SessionMeta {
    pub fn load_for_session(session_path: &Path) -> Result<Self, ProjectError> {
        let meta_path = session_path.join(SESSION_META_FILE);
        let content = std::fs::read_to_string(&meta_path)
            .map_err(|_| ProjectError::MissingMeta(meta_path))?;
        let mut meta: Self = serde_json::from_str(&content)?;
        meta.session_path = session_path.to_path_buf();
        Ok(meta)
    }

    pub fn save_for_session(&self) -> Result<(), ProjectError> {
        let meta_path = self.session_path.join(SESSION_META_FILE);
        std::fs::write(&meta_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.session_path.join(FRAMES_DIR)
    }

    pub fn frames_index_path(&self) -> PathBuf {
        self.session_path.join(FRAMES_INDEX_FILE)
    }

    pub fn waterfall_path(&self) -> PathBuf {
        self.session_path.join(WATERFALL_FILE)
    }

    pub fn frame_byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

/// File name of an area-mode unit, keyed by sequence index.
pub fn frame_file_name(index: u64) -> String {
    format!("{index:08}.raw")
}

/// One line of `frames.jsonl`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FrameIndexRecord {
    pub index: u64,
    pub timestamp_ns: u64,
}
