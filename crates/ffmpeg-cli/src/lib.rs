//! Thin wrapper around a system `ffmpeg` binary.
//!
//! Builds the argument list for a rawvideo-over-stdin encode and manages the
//! child process. The binary is resolved from `PATH` by default; callers can
//! point at a specific executable with [`FFmpeg::with_program`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tracing::debug;

pub const DEFAULT_FFMPEG_PROGRAM: &str = "ffmpeg";

#[derive(thiserror::Error, Debug)]
pub enum FFmpegError {
    /// The binary could not be spawned at all.
    #[error("could not launch '{program}': {source}")]
    Unavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg stdin was not captured")]
    MissingStdin,

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

pub trait ApplyFFmpegArgs {
    fn apply_ffmpeg_args(&self, command: &mut Command);
}

/// A stream of headerless video frames fed through `pipe:0`.
#[derive(Debug)]
pub struct FFmpegRawVideoInput {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pix_fmt: &'static str,
    pub input: OsString,
}

impl ApplyFFmpegArgs for FFmpegRawVideoInput {
    fn apply_ffmpeg_args(&self, command: &mut Command) {
        let size = format!("{}x{}", self.width, self.height);

        command
            .args(["-f", "rawvideo", "-pix_fmt", self.pix_fmt])
            .args(["-s", &size])
            .args(["-framerate", &self.fps.to_string()])
            .args(["-thread_queue_size", "4096", "-i"])
            .arg(&self.input);
    }
}

pub enum FFmpegOutput {
    File {
        path: PathBuf,
        codec: String,
        preset: String,
        crf: u32,
    },
}

impl FFmpegOutput {
    fn apply_ffmpeg_args(&self, command: &mut Command) {
        match self {
            Self::File {
                path,
                codec,
                preset,
                crf,
            } => {
                command
                    .args(["-c:v", codec])
                    .args(["-preset", preset])
                    .args(["-crf", &crf.to_string()])
                    .arg("-y")
                    .arg(path);
            }
        }
    }
}

pub struct FFmpeg {
    pub command: Command,
    program: String,
}

impl Default for FFmpeg {
    fn default() -> Self {
        Self::new()
    }
}

impl FFmpeg {
    pub fn new() -> Self {
        Self::with_program(DEFAULT_FFMPEG_PROGRAM)
    }

    pub fn with_program(program: impl AsRef<Path>) -> Self {
        let program = program.as_ref();
        let mut command = Command::new(program);
        command.args(["-hide_banner", "-loglevel", "error"]);

        Self {
            command,
            program: program.display().to_string(),
        }
    }

    pub fn add_input<S: ApplyFFmpegArgs>(&mut self, source: &S) {
        source.apply_ffmpeg_args(&mut self.command);
    }

    pub fn add_output(&mut self, output: &FFmpegOutput) {
        output.apply_ffmpeg_args(&mut self.command);
    }

    pub fn start(mut self) -> Result<FFmpegProcess, FFmpegError> {
        debug!(command = ?self.command.as_std(), "launching ffmpeg");

        let mut cmd = self
            .command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FFmpegError::Unavailable {
                program: self.program.clone(),
                source,
            })?;

        let ffmpeg_stdin = cmd.stdin.take().ok_or(FFmpegError::MissingStdin)?;

        Ok(FFmpegProcess {
            ffmpeg_stdin: Some(ffmpeg_stdin),
            cmd,
        })
    }
}

pub struct FFmpegProcess {
    // Taken when input ends; closing the pipe is ffmpeg's EOF.
    ffmpeg_stdin: Option<ChildStdin>,
    cmd: Child,
}

impl FFmpegProcess {
    pub async fn write_video_frame(&mut self, data: &[u8]) -> std::io::Result<()> {
        let Some(stdin) = self.ffmpeg_stdin.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "ffmpeg stdin already closed",
            ));
        };

        let mut remaining = data;
        while !remaining.is_empty() {
            match stdin.write(remaining).await {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "ffmpeg stopped accepting frame data",
                    ));
                }
                Ok(n) => {
                    remaining = &remaining[n..];
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) => {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Signal end of input and wait for the encode to complete.
    pub async fn finish(mut self) -> std::io::Result<std::process::ExitStatus> {
        if let Some(mut stdin) = self.ffmpeg_stdin.take() {
            stdin.flush().await.ok();
            drop(stdin);
        }
        self.cmd.wait().await
    }

    pub fn kill(&mut self) {
        self.ffmpeg_stdin.take();
        let _ = self.cmd.start_kill();
    }
}
