//! Offline reconstruction of 2-D frames from a waterfall line log.
//!
//! Frames are formed by stacking consecutive lines in sequence-index order.
//! The trailing lines that don't fill a complete frame follow an explicit
//! [`TrailingLines`] policy; discard is the default since a partial frame is
//! not meaningfully viewable.

use strobe_camera::PixelFormat;

use crate::waterfall::WaterfallReader;
use crate::ProjectError;

/// What to do with leftover lines at the end of the log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrailingLines {
    #[default]
    Discard,
    /// Emit a final frame with fewer than `frame_height` rows.
    KeepPartial,
}

#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Sequence index of the frame's first line.
    pub first_index: u64,
    /// Capture timestamp of the frame's first line.
    pub timestamp_ns: u64,
    pub width: u32,
    /// Rows actually present; less than `frame_height` only for a kept
    /// partial frame.
    pub rows: u32,
    pub data: Vec<u8>,
}

pub struct WaterfallDecoder {
    reader: WaterfallReader,
    frame_height: u32,
    policy: TrailingLines,
    finished: bool,
}

impl WaterfallDecoder {
    pub fn new(
        reader: WaterfallReader,
        frame_height: u32,
        policy: TrailingLines,
    ) -> Result<Self, ProjectError> {
        if frame_height == 0 {
            return Err(ProjectError::InvalidFrameHeight);
        }
        Ok(Self {
            reader,
            frame_height,
            policy,
            finished: false,
        })
    }

    pub fn width(&self) -> u32 {
        self.reader.width()
    }

    pub fn frame_height(&self) -> u32 {
        self.frame_height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.reader.pixel_format()
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>, ProjectError> {
        if self.finished {
            return Ok(None);
        }

        let line_len =
            self.reader.width() as usize * self.reader.pixel_format().bytes_per_pixel();
        let mut data = Vec::with_capacity(line_len * self.frame_height as usize);
        let mut rows = 0u32;
        let mut first: Option<(u64, u64)> = None;

        while rows < self.frame_height {
            match self.reader.next() {
                Some(Ok(record)) => {
                    if first.is_none() {
                        first = Some((record.index, record.timestamp_ns));
                    }
                    data.extend_from_slice(&record.data);
                    rows += 1;
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(e);
                }
                None => {
                    self.finished = true;
                    break;
                }
            }
        }

        let Some((first_index, timestamp_ns)) = first else {
            return Ok(None);
        };

        if rows < self.frame_height && self.policy == TrailingLines::Discard {
            return Ok(None);
        }

        Ok(Some(DecodedFrame {
            first_index,
            timestamp_ns,
            width: self.reader.width(),
            rows,
            data,
        }))
    }
}

impl Iterator for WaterfallDecoder {
    type Item = Result<DecodedFrame, ProjectError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
