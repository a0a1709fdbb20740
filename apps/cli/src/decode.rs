use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Args;
use strobe_camera::{CaptureMode, PixelFormat};
use strobe_project::{
    deshear, DecodedFrame, DeshearParams, SessionMeta, TrailingLines, WaterfallDecoder,
    WaterfallReader,
};

#[derive(Args)]
pub struct DecodeArgs {
    /// Waterfall session directory
    session: PathBuf,
    /// Directory to write PNG frames into
    out_dir: PathBuf,
    /// Rows per reconstructed frame
    #[arg(long)]
    frame_height: u32,
    /// Keep a final short frame instead of discarding trailing lines
    #[arg(long)]
    keep_partial: bool,
    /// Sensor mount angle in degrees; corrects shear when non-zero
    #[arg(long, default_value_t = 0.0)]
    deshear_angle: f64,
    /// Sensor pixel pitch in micrometers
    #[arg(long, default_value_t = 3.8)]
    pixel_pitch_um: f64,
    /// Scan advance between lines in micrometers
    #[arg(long, default_value_t = 1.0)]
    line_spacing_um: f64,
}

impl DecodeArgs {
    pub fn run(self) -> anyhow::Result<()> {
        let meta = SessionMeta::load_for_session(&self.session)
            .with_context(|| format!("could not open session '{}'", self.session.display()))?;
        if meta.mode != CaptureMode::Waterfall {
            bail!("'{}' is not a waterfall session", self.session.display());
        }

        let policy = if self.keep_partial {
            TrailingLines::KeepPartial
        } else {
            TrailingLines::Discard
        };
        if !(0.0..90.0).contains(&self.deshear_angle) {
            bail!("--deshear-angle must be in [0, 90)");
        }
        let shift_per_row = DeshearParams {
            angle_deg: self.deshear_angle,
            pixel_pitch_um: self.pixel_pitch_um,
            line_spacing_um: self.line_spacing_um,
        }
        .shift_per_row_px();

        let reader = WaterfallReader::open(&meta.waterfall_path())?;
        let decoder = WaterfallDecoder::new(reader, self.frame_height, policy)?;

        std::fs::create_dir_all(&self.out_dir)?;
        let mut frames = 0u64;
        for frame in decoder {
            let mut frame = frame?;
            if shift_per_row != 0.0 {
                frame.data = deshear::deshear(
                    &frame.data,
                    frame.width,
                    frame.rows,
                    meta.pixel_format,
                    shift_per_row,
                );
            }
            let path = self.out_dir.join(format!("{:08}.png", frames));
            write_png(&frame, meta.pixel_format, &path)?;
            frames += 1;
        }

        println!("Decoded {frames} frames into '{}'", self.out_dir.display());
        Ok(())
    }
}

fn write_png(
    frame: &DecodedFrame,
    pixel_format: PixelFormat,
    path: &std::path::Path,
) -> anyhow::Result<()> {
    match pixel_format {
        PixelFormat::Mono8 => {
            let image = image::GrayImage::from_raw(frame.width, frame.rows, frame.data.clone())
                .context("frame data does not match its dimensions")?;
            image.save(path)?;
        }
        PixelFormat::Mono16 => {
            let pixels: Vec<u16> = frame
                .data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let image = image::ImageBuffer::<image::Luma<u16>, _>::from_raw(
                frame.width,
                frame.rows,
                pixels,
            )
            .context("frame data does not match its dimensions")?;
            image.save(path)?;
        }
    }
    Ok(())
}
