use std::env::current_dir;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use strobe_camera::{
    CameraConfig, CameraLimits, CaptureMode, PixelFormat, TestPattern, TestPatternSource,
};
use strobe_recording::{CaptureController, CaptureOptions, CaptureState};
use tokio::io::AsyncBufReadExt;
use tracing::warn;

#[derive(Args)]
pub struct RecordArgs {
    /// Directory to create the session in
    #[arg(long)]
    path: Option<PathBuf>,
    /// Capture single scan-lines at maximum rate instead of full frames
    #[arg(long)]
    waterfall: bool,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 720)]
    height: u32,
    /// Exposure time in microseconds
    #[arg(long, default_value_t = 10_000.0)]
    exposure_us: f64,
    #[arg(long, default_value_t = 0.0)]
    gain_db: f64,
    /// Frame rate cap; omit to run the sensor free
    #[arg(long)]
    fps: Option<f64>,
    #[arg(long, value_enum, default_value_t = FormatArg::Mono8)]
    format: FormatArg,
    /// Stop after this many units
    #[arg(long)]
    frames: Option<u64>,
    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<f64>,
    /// Units held between acquisition and the disk writer
    #[arg(long, default_value_t = 2048)]
    buffer_capacity: usize,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum FormatArg {
    Mono8,
    Mono16,
}

impl From<FormatArg> for PixelFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Mono8 => PixelFormat::Mono8,
            FormatArg::Mono16 => PixelFormat::Mono16,
        }
    }
}

impl RecordArgs {
    pub async fn run(self) -> anyhow::Result<()> {
        let mode = if self.waterfall {
            CaptureMode::Waterfall
        } else {
            CaptureMode::Area
        };
        let config = CameraConfig {
            width: self.width,
            height: self.height,
            offset_x: 0,
            offset_y: 0,
            exposure_us: self.exposure_us,
            gain_db: self.gain_db,
            fps_cap: self.fps,
            pixel_format: self.format.into(),
        };
        let options = CaptureOptions {
            buffer_capacity: self.buffer_capacity,
            max_units: self.frames,
            max_duration: self.duration.map(Duration::from_secs_f64),
            ..Default::default()
        };

        let session_path = match self.path {
            Some(root) => strobe_recording::controller::next_session_path(&root),
            None => strobe_recording::controller::next_session_path(
                &current_dir().context("could not resolve current directory")?,
            ),
        };

        let source = TestPatternSource::new(CameraLimits::default())
            .with_pattern(TestPattern::Gradient);
        let mut controller = CaptureController::new(Box::new(source));
        let applied = controller.start(mode, config, &session_path, options)?;
        for clamp in &applied.clamped {
            warn!(
                "{} clamped from {} to {}",
                clamp.name, clamp.requested, clamp.applied
            );
        }

        println!(
            "Recording {mode} session to '{}', press Enter to stop",
            session_path.display()
        );

        let bar = ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("static template"),
        );
        let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut line = String::new();
        let mut ticker = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                _ = stdin.read_line(&mut line) => break,
                _ = ticker.tick() => {
                    let status = controller.status();
                    bar.tick();
                    bar.set_message(format!(
                        "{:.1}s  captured {}  dropped {}  queue {}  {:.1} fps",
                        status.elapsed.as_secs_f64(),
                        status.captured,
                        status.dropped,
                        status.buffer_depth,
                        status.effective_fps,
                    ));
                    if status.delivery_done || status.state == CaptureState::Failed {
                        break;
                    }
                }
            }
        }
        bar.finish_and_clear();

        let failure = controller.status().failure;
        let meta = controller.stop()?;
        println!(
            "Session {:?}: {} captured, {} dropped, {} failed writes",
            meta.state, meta.captured, meta.dropped, meta.write_failed
        );
        if let Some(reason) = failure {
            warn!("capture failed: {reason}");
        }
        Ok(())
    }
}
