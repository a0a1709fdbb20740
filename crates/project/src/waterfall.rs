//! Append-only waterfall line container (`lines.wtf`).
//!
//! Little-endian throughout. Layout:
//!
//! ```text
//! header:  magic "WTF2" | u16 version | u8 pixel format | u8 reserved | u32 line width
//! record:  u64 index | u64 timestamp_ns | u32 width | payload (width * bytes_per_pixel)
//! ```
//!
//! The width repeats in every record so a truncated file can still be scanned
//! record-by-record and so the reader can reject a record that disagrees with
//! the header instead of smearing the rest of the log.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use strobe_camera::PixelFormat;
use tracing::debug;

use crate::ProjectError;

pub const WTF_MAGIC: [u8; 4] = *b"WTF2";
pub const WTF_VERSION: u16 = 2;
pub const WTF_HEADER_LEN: u64 = 12;
const RECORD_PREFIX_LEN: u64 = 8 + 8 + 4;

fn format_code(format: PixelFormat) -> u8 {
    match format {
        PixelFormat::Mono8 => 0,
        PixelFormat::Mono16 => 1,
    }
}

fn format_from_code(code: u8) -> Option<PixelFormat> {
    match code {
        0 => Some(PixelFormat::Mono8),
        1 => Some(PixelFormat::Mono16),
        _ => None,
    }
}

/// Fixed size of one record for the given line geometry.
pub fn record_len(width: u32, format: PixelFormat) -> u64 {
    RECORD_PREFIX_LEN + width as u64 * format.bytes_per_pixel() as u64
}

pub struct WaterfallWriter {
    out: BufWriter<File>,
    width: u32,
    pixel_format: PixelFormat,
    lines: u64,
}

impl WaterfallWriter {
    /// Create the container and write its header. Opened once per session;
    /// all lines append to this one file.
    pub fn create(path: &Path, width: u32, pixel_format: PixelFormat) -> std::io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&WTF_MAGIC)?;
        out.write_all(&WTF_VERSION.to_le_bytes())?;
        out.write_all(&[format_code(pixel_format), 0])?;
        out.write_all(&width.to_le_bytes())?;
        out.flush()?;

        debug!(path = %path.display(), width, "waterfall container created");
        Ok(Self {
            out,
            width,
            pixel_format,
            lines: 0,
        })
    }

    pub fn append(&mut self, index: u64, timestamp_ns: u64, payload: &[u8]) -> std::io::Result<()> {
        let expected = self.width as usize * self.pixel_format.bytes_per_pixel();
        if payload.len() != expected {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("line payload is {} bytes, expected {expected}", payload.len()),
            ));
        }

        self.out.write_all(&index.to_le_bytes())?;
        self.out.write_all(&timestamp_ns.to_le_bytes())?;
        self.out.write_all(&self.width.to_le_bytes())?;
        self.out.write_all(payload)?;
        // Each accepted line reaches the OS whole; a crash never loses a
        // buffered tail or tears a record mid-payload.
        self.out.flush()?;
        self.lines += 1;
        Ok(())
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Flush and close, returning the number of lines written.
    pub fn finish(mut self) -> std::io::Result<u64> {
        self.out.flush()?;
        Ok(self.lines)
    }
}

#[derive(Debug, Clone)]
pub struct LineRecord {
    pub index: u64,
    pub timestamp_ns: u64,
    pub data: Vec<u8>,
}

pub struct WaterfallReader {
    input: BufReader<File>,
    width: u32,
    pixel_format: PixelFormat,
}

impl WaterfallReader {
    pub fn open(path: &Path) -> Result<Self, ProjectError> {
        let mut input = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 4];
        input.read_exact(&mut magic).map_err(|_| {
            ProjectError::InvalidContainer("file too short for header".to_string())
        })?;
        if magic != WTF_MAGIC {
            return Err(ProjectError::InvalidContainer(format!(
                "bad magic {magic:02x?}"
            )));
        }

        let mut version = [0u8; 2];
        input.read_exact(&mut version)?;
        let version = u16::from_le_bytes(version);
        if version != WTF_VERSION {
            return Err(ProjectError::InvalidContainer(format!(
                "unsupported version {version}"
            )));
        }

        let mut rest = [0u8; 6];
        input.read_exact(&mut rest)?;
        let pixel_format = format_from_code(rest[0]).ok_or_else(|| {
            ProjectError::InvalidContainer(format!("unknown pixel format code {}", rest[0]))
        })?;
        let width = u32::from_le_bytes([rest[2], rest[3], rest[4], rest[5]]);
        if width == 0 {
            return Err(ProjectError::InvalidContainer("zero line width".to_string()));
        }

        Ok(Self {
            input,
            width,
            pixel_format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Number of complete records in the container at `path`, from its size.
    pub fn count_records(path: &Path) -> Result<u64, ProjectError> {
        let reader = Self::open(path)?;
        let total = std::fs::metadata(path)?.len();
        let body = total.saturating_sub(WTF_HEADER_LEN);
        Ok(body / record_len(reader.width, reader.pixel_format))
    }

    fn read_record(&mut self) -> Result<Option<LineRecord>, ProjectError> {
        let mut prefix = [0u8; RECORD_PREFIX_LEN as usize];
        if !read_or_eof(&mut self.input, &mut prefix)? {
            return Ok(None);
        }

        let index = u64::from_le_bytes(prefix[0..8].try_into().unwrap());
        let timestamp_ns = u64::from_le_bytes(prefix[8..16].try_into().unwrap());
        let width = u32::from_le_bytes(prefix[16..20].try_into().unwrap());
        if width != self.width {
            return Err(ProjectError::InvalidContainer(format!(
                "record {index} width {width} disagrees with header width {}",
                self.width
            )));
        }

        let mut data = vec![0u8; self.width as usize * self.pixel_format.bytes_per_pixel()];
        self.input.read_exact(&mut data).map_err(|_| {
            ProjectError::InvalidContainer(format!("record {index} truncated"))
        })?;

        Ok(Some(LineRecord {
            index,
            timestamp_ns,
            data,
        }))
    }
}

impl Iterator for WaterfallReader {
    type Item = Result<LineRecord, ProjectError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Fill `buf`, returning `false` on a clean EOF before the first byte.
/// A partial fill is an error: the container ended mid-record.
fn read_or_eof(input: &mut impl Read, buf: &mut [u8]) -> Result<bool, ProjectError> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..])? {
            0 if filled == 0 => return Ok(false),
            0 => {
                return Err(ProjectError::InvalidContainer(
                    "container ends mid-record".to_string(),
                ));
            }
            n => filled += n,
        }
    }
    Ok(true)
}
