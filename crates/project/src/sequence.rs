//! A sealed session's persisted units as one ordered frame stream.
//!
//! Area sessions and waterfall sessions persist differently, but the video
//! assembler wants a single contract: fixed frame dimensions plus frames in
//! strict sequence order. [`PersistedSequence`] is that tagged seam — the
//! waterfall arm runs lines through [`WaterfallDecoder`] so both arms yield
//! equally sized frames.

use std::path::Path;

use strobe_camera::{CaptureMode, PixelFormat};

use crate::decoder::{TrailingLines, WaterfallDecoder};
use crate::waterfall::WaterfallReader;
use crate::{frame_file_name, FrameIndexRecord, ProjectError, SessionMeta, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoDims {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl VideoDims {
    pub fn frame_byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

/// One frame of the sequence. `index` counts output frames from zero; for a
/// waterfall sequence that is the reconstructed frame ordinal, not the line
/// index.
#[derive(Debug, Clone)]
pub struct SequenceFrame {
    pub index: u64,
    pub data: Vec<u8>,
}

pub enum PersistedSequence {
    Area(FrameDir),
    Waterfall(WaterfallFrames),
}

impl PersistedSequence {
    pub fn open_area(session_path: &Path) -> Result<Self, ProjectError> {
        Ok(Self::Area(FrameDir::open(session_path)?))
    }

    pub fn open_waterfall(
        session_path: &Path,
        frame_height: u32,
        policy: TrailingLines,
    ) -> Result<Self, ProjectError> {
        Ok(Self::Waterfall(WaterfallFrames::open(
            session_path,
            frame_height,
            policy,
        )?))
    }

    pub fn dims(&self) -> VideoDims {
        match self {
            Self::Area(dir) => dir.dims(),
            Self::Waterfall(frames) => frames.dims(),
        }
    }

    /// Number of frames the full sequence yields.
    pub fn len(&self) -> u64 {
        match self {
            Self::Area(dir) => dir.len(),
            Self::Waterfall(frames) => frames.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frames(
        &self,
    ) -> Result<Box<dyn Iterator<Item = Result<SequenceFrame, ProjectError>> + Send>, ProjectError>
    {
        match self {
            Self::Area(dir) => dir.frames(),
            Self::Waterfall(frames) => frames.frames(),
        }
    }
}

/// Area-mode source: `frames/{index:08}.raw` files addressed through the
/// `frames.jsonl` sidecar. The sidecar lists exactly the units that were
/// persisted, so buffer drops and failed writes are already excluded.
pub struct FrameDir {
    meta: SessionMeta,
    records: Vec<FrameIndexRecord>,
}

impl FrameDir {
    pub fn open(session_path: &Path) -> Result<Self, ProjectError> {
        let meta = SessionMeta::load_for_session(session_path)?;
        if meta.state == SessionState::Capturing {
            return Err(ProjectError::SessionActive);
        }
        if meta.mode != CaptureMode::Area {
            return Err(ProjectError::WrongMode {
                mode: meta.mode,
                expected: CaptureMode::Area,
            });
        }

        let mut records = Vec::new();
        let index = std::fs::read_to_string(meta.frames_index_path())?;
        for line in index.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str::<FrameIndexRecord>(line)?);
        }
        records.sort_by_key(|r| r.index);

        Ok(Self { meta, records })
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn records(&self) -> &[FrameIndexRecord] {
        &self.records
    }

    pub fn dims(&self) -> VideoDims {
        VideoDims {
            width: self.meta.width,
            height: self.meta.height,
            pixel_format: self.meta.pixel_format,
        }
    }

    pub fn len(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn frames(
        &self,
    ) -> Result<Box<dyn Iterator<Item = Result<SequenceFrame, ProjectError>> + Send>, ProjectError>
    {
        let frames_dir = self.meta.frames_dir();
        let expected = self.meta.frame_byte_len();
        let records = self.records.clone();

        Ok(Box::new(records.into_iter().enumerate().map(
            move |(ordinal, record)| {
                let path = frames_dir.join(frame_file_name(record.index));
                let data = std::fs::read(&path)?;
                if data.len() != expected {
                    return Err(ProjectError::CorruptFrame {
                        index: record.index,
                        detail: format!("{} bytes on disk, expected {expected}", data.len()),
                    });
                }
                Ok(SequenceFrame {
                    index: ordinal as u64,
                    data,
                })
            },
        )))
    }
}

/// Waterfall-mode source: frames reconstructed on the fly from the line
/// container. A kept partial frame is zero-padded to full height so every
/// emitted frame has identical byte length (rawvideo consumers require it).
pub struct WaterfallFrames {
    meta: SessionMeta,
    frame_height: u32,
    policy: TrailingLines,
    line_count: u64,
}

impl WaterfallFrames {
    pub fn open(
        session_path: &Path,
        frame_height: u32,
        policy: TrailingLines,
    ) -> Result<Self, ProjectError> {
        if frame_height == 0 {
            return Err(ProjectError::InvalidFrameHeight);
        }

        let meta = SessionMeta::load_for_session(session_path)?;
        if meta.state == SessionState::Capturing {
            return Err(ProjectError::SessionActive);
        }
        if meta.mode != CaptureMode::Waterfall {
            return Err(ProjectError::WrongMode {
                mode: meta.mode,
                expected: CaptureMode::Waterfall,
            });
        }

        let line_count = WaterfallReader::count_records(&meta.waterfall_path())?;

        Ok(Self {
            meta,
            frame_height,
            policy,
            line_count,
        })
    }

    pub fn meta(&self) -> &SessionMeta {
        &self.meta
    }

    pub fn dims(&self) -> VideoDims {
        VideoDims {
            width: self.meta.width,
            height: self.frame_height,
            pixel_format: self.meta.pixel_format,
        }
    }

    pub fn len(&self) -> u64 {
        let full = self.line_count / self.frame_height as u64;
        match self.policy {
            TrailingLines::Discard => full,
            TrailingLines::KeepPartial if self.line_count % self.frame_height as u64 != 0 => {
                full + 1
            }
            TrailingLines::KeepPartial => full,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn frames(
        &self,
    ) -> Result<Box<dyn Iterator<Item = Result<SequenceFrame, ProjectError>> + Send>, ProjectError>
    {
        let reader = WaterfallReader::open(&self.meta.waterfall_path())?;
        let decoder = WaterfallDecoder::new(reader, self.frame_height, self.policy)?;
        let full_len = self.dims().frame_byte_len();

        Ok(Box::new(decoder.enumerate().map(move |(ordinal, frame)| {
            let frame = frame?;
            let mut data = frame.data;
            data.resize(full_len, 0);
            Ok(SequenceFrame {
                index: ordinal as u64,
                data,
            })
        })))
    }
}
