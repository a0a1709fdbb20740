use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use strobe_camera::CaptureMode;
use strobe_export::{Assembler, VideoSpec};
use strobe_project::{PersistedSequence, SessionMeta, TrailingLines};

#[derive(Args)]
pub struct AssembleArgs {
    /// Session directory produced by `strobe record`
    session: PathBuf,
    /// Output video path
    output: PathBuf,
    /// Playback frame rate of the output
    #[arg(long, default_value_t = 24)]
    fps: u32,
    #[arg(long, default_value = "libx264")]
    codec: String,
    #[arg(long, default_value = "medium")]
    preset: String,
    #[arg(long, default_value_t = 18)]
    crf: u32,
    /// First output frame to include
    #[arg(long)]
    start: Option<u64>,
    /// Output frame to stop before
    #[arg(long)]
    end: Option<u64>,
    /// Abort if the encode takes longer than this many seconds
    #[arg(long)]
    timeout: Option<f64>,
    /// Rows per reconstructed frame; required for waterfall sessions
    #[arg(long)]
    frame_height: Option<u32>,
    /// Keep a final short frame instead of discarding trailing lines
    #[arg(long)]
    keep_partial: bool,
}

impl AssembleArgs {
    pub async fn run(self) -> anyhow::Result<()> {
        let meta = SessionMeta::load_for_session(&self.session)
            .with_context(|| format!("could not open session '{}'", self.session.display()))?;

        let sequence = match meta.mode {
            CaptureMode::Area => PersistedSequence::open_area(&self.session)?,
            CaptureMode::Waterfall => {
                let Some(frame_height) = self.frame_height else {
                    bail!("waterfall sessions need --frame-height");
                };
                let policy = if self.keep_partial {
                    TrailingLines::KeepPartial
                } else {
                    TrailingLines::Discard
                };
                PersistedSequence::open_waterfall(&self.session, frame_height, policy)?
            }
        };

        let range = match (self.start, self.end) {
            (None, None) => None,
            (start, end) => Some(start.unwrap_or(0)..end.unwrap_or(sequence.len())),
        };
        let spec = VideoSpec {
            output_fps: self.fps,
            codec: self.codec,
            preset: self.preset,
            crf: self.crf,
            range,
            timeout: self.timeout.map(Duration::from_secs_f64),
        };

        let bar = ProgressBar::new(0).with_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} frames").expect("static template"),
        );
        let assembler = Assembler::new(sequence, self.output.clone(), spec, {
            let bar = bar.clone();
            move |done| bar.set_position(done)
        })?;
        bar.set_length(assembler.frame_count());

        let summary = assembler.assemble().await?;
        bar.finish_and_clear();

        println!(
            "Wrote {} ({} frames, {:.2}s at {} fps)",
            self.output.display(),
            summary.frames,
            summary.duration.as_secs_f64(),
            self.fps
        );
        Ok(())
    }
}
