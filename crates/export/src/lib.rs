//! Assembles a persisted capture session into a video file.
//!
//! Frames are streamed in index order through a system `ffmpeg` as headerless
//! rawvideo; the encode lands in a `.part` sibling first and is renamed onto
//! the destination only after the encoder exits cleanly, so a crash or
//! timeout never leaves a truncated file at the destination path.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use strobe_ffmpeg_cli::{FFmpeg, FFmpegError, FFmpegOutput, FFmpegRawVideoInput};
use strobe_project::{PersistedSequence, ProjectError};
use tokio::time::timeout;
use tracing::{debug, info};

#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("encoder unavailable: {0}")]
    EncodingUnavailable(#[source] FFmpegError),

    #[error("encoder exited with {0}")]
    EncodingFailed(std::process::ExitStatus),

    #[error("invalid export settings: {0}")]
    InvalidSpec(String),

    #[error("no frames to assemble")]
    EmptySequence,

    #[error("project: {0}")]
    Project(#[from] ProjectError),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("assembly timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

/// Encoder settings for one assembly run.
#[derive(Debug, Clone)]
pub struct VideoSpec {
    /// Playback rate of the produced file. Decoupled from the capture rate:
    /// the same frames can be rendered as slow motion or a sped-up overview.
    pub output_fps: u32,
    pub codec: String,
    pub preset: String,
    pub crf: u32,
    /// Half-open range of output ordinals to include; `None` means all.
    pub range: Option<Range<u64>>,
    pub timeout: Option<Duration>,
}

impl Default for VideoSpec {
    fn default() -> Self {
        Self {
            output_fps: 24,
            codec: "libx264".to_string(),
            preset: "medium".to_string(),
            crf: 18,
            range: None,
            timeout: None,
        }
    }
}

impl VideoSpec {
    fn validate(&self) -> Result<(), ExportError> {
        if self.output_fps == 0 {
            return Err(ExportError::InvalidSpec(
                "output fps must be at least 1".to_string(),
            ));
        }
        if let Some(range) = &self.range
            && range.start >= range.end
        {
            return Err(ExportError::InvalidSpec(format!(
                "empty frame range {}..{}",
                range.start, range.end
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AssemblySummary {
    pub frames: u64,
    /// Playback duration implied by the frame count and output fps.
    pub duration: Duration,
}

/// Wall-clock length of `frames` frames played at `fps`.
pub fn expected_duration(frames: u64, fps: u32) -> Duration {
    if fps == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / fps as f64)
}

pub struct Assembler<TOnProgress> {
    sequence: PersistedSequence,
    output_path: PathBuf,
    spec: VideoSpec,
    on_progress: TOnProgress,
    ffmpeg_program: Option<PathBuf>,
}

impl<TOnProgress> Assembler<TOnProgress>
where
    TOnProgress: FnMut(u64) + Send + 'static,
{
    pub fn new(
        sequence: PersistedSequence,
        output_path: PathBuf,
        spec: VideoSpec,
        on_progress: TOnProgress,
    ) -> Result<Self, ExportError> {
        spec.validate()?;
        if sequence.is_empty() {
            return Err(ExportError::EmptySequence);
        }

        Ok(Self {
            sequence,
            output_path,
            spec,
            on_progress,
            ffmpeg_program: None,
        })
    }

    /// Use a specific `ffmpeg` executable instead of resolving from `PATH`.
    pub fn with_ffmpeg_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.ffmpeg_program = Some(program.into());
        self
    }

    /// Number of frames the configured range selects.
    pub fn frame_count(&self) -> u64 {
        let total = self.sequence.len();
        match &self.spec.range {
            Some(range) => range.end.min(total).saturating_sub(range.start.min(total)),
            None => total,
        }
    }

    pub async fn assemble(mut self) -> Result<AssemblySummary, ExportError> {
        if self.frame_count() == 0 {
            return Err(ExportError::EmptySequence);
        }
        if let Some(parent) = self.output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let part_path = partial_path(&self.output_path);
        let limit = self.spec.timeout;
        let fed = match limit {
            Some(limit) => match timeout(limit, self.feed_encoder(&part_path)).await {
                Ok(result) => result,
                Err(elapsed) => Err(elapsed.into()),
            },
            None => self.feed_encoder(&part_path).await,
        };

        match fed {
            Ok(frames) => {
                tokio::fs::rename(&part_path, &self.output_path).await?;
                let duration = expected_duration(frames, self.spec.output_fps);
                info!(
                    frames,
                    ?duration,
                    output = %self.output_path.display(),
                    "assembly complete"
                );
                Ok(AssemblySummary { frames, duration })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                Err(e)
            }
        }
    }

    async fn feed_encoder(&mut self, part_path: &Path) -> Result<u64, ExportError> {
        let dims = self.sequence.dims();
        let mut ffmpeg = match &self.ffmpeg_program {
            Some(program) => FFmpeg::with_program(program),
            None => FFmpeg::new(),
        };
        ffmpeg.add_input(&FFmpegRawVideoInput {
            width: dims.width,
            height: dims.height,
            fps: self.spec.output_fps,
            pix_fmt: dims.pixel_format.ffmpeg_pix_fmt(),
            input: "pipe:0".into(),
        });
        ffmpeg.add_output(&FFmpegOutput::File {
            path: part_path.to_path_buf(),
            codec: self.spec.codec.clone(),
            preset: self.spec.preset.clone(),
            crf: self.spec.crf,
        });

        let mut process = ffmpeg.start().map_err(ExportError::EncodingUnavailable)?;

        let (skip, take) = match &self.spec.range {
            Some(range) => (range.start, range.end - range.start),
            None => (0, u64::MAX),
        };

        debug!(
            total = self.sequence.len(),
            skip, "streaming frames into encoder"
        );
        let mut written = 0u64;
        let frames = self
            .sequence
            .frames()?
            .skip(skip as usize)
            .take(take.min(usize::MAX as u64) as usize);
        for frame in frames {
            let frame = frame?;
            if let Err(e) = process.write_video_frame(&frame.data).await {
                // A dying encoder closes the pipe; surface its exit status
                // rather than the broken write.
                process.kill();
                let status = process.finish().await?;
                if !status.success() {
                    return Err(ExportError::EncodingFailed(status));
                }
                return Err(e.into());
            }
            written += 1;
            (self.on_progress)(written);
        }

        let status = process.finish().await?;
        if !status.success() {
            return Err(ExportError::EncodingFailed(status));
        }
        Ok(written)
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    output.with_file_name(name)
}
