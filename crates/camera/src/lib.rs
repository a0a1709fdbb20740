//! Capability-source abstraction for machine-vision cameras.
//!
//! The capture pipeline never talks to a vendor SDK directly. It consumes a
//! [`FrameSource`]: something that can report its limits, accept a clamped
//! configuration, and deliver timestamped raw frames on demand. Delivery is
//! pull-style with a short poll timeout so the acquisition loop stays in
//! control of cancellation.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strobe_timestamp::Timestamp;

mod test_pattern;

pub use test_pattern::{TestPattern, TestPatternSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Mono8,
    Mono16,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Mono8 => 1,
            Self::Mono16 => 2,
        }
    }

    /// The ffmpeg rawvideo pixel format name for this sensor format.
    pub fn ffmpeg_pix_fmt(&self) -> &'static str {
        match self {
            Self::Mono8 => "gray",
            Self::Mono16 => "gray16le",
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mono8 => write!(f, "mono8"),
            Self::Mono16 => write!(f, "mono16"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Full 2-D frames at the configured region of interest.
    Area,
    /// Single scan-lines at the sensor's maximum line rate.
    Waterfall,
}

impl Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Area => write!(f, "area"),
            Self::Waterfall => write!(f, "waterfall"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    pub exposure_us: f64,
    pub gain_db: f64,
    /// Upper bound on delivery rate. `None` lets the sensor free-run.
    pub fps_cap: Option<f64>,
    pub pixel_format: PixelFormat,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            offset_x: 0,
            offset_y: 0,
            exposure_us: 10_000.0,
            gain_db: 0.0,
            fps_cap: Some(24.0),
            pixel_format: PixelFormat::Mono8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_fps: f64,
    pub pixel_formats: Vec<PixelFormat>,
}

impl Default for CameraLimits {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            max_fps: 1000.0,
            pixel_formats: vec![PixelFormat::Mono8, PixelFormat::Mono16],
        }
    }
}

impl CameraLimits {
    pub fn supports(&self, format: PixelFormat) -> bool {
        self.pixel_formats.contains(&format)
    }

    /// Fit `config` inside these limits. Out-of-range numeric parameters are
    /// clamped and reported rather than rejected; only a pixel format the
    /// device cannot produce is unrecoverable.
    pub fn clamp(&self, config: &CameraConfig) -> Result<AppliedConfig, CameraError> {
        if !self.supports(config.pixel_format) {
            return Err(CameraError::UnsupportedParam {
                name: "pixel_format",
                detail: format!("{} not offered by this device", config.pixel_format),
            });
        }

        let mut applied = config.clone();
        let mut clamped = Vec::new();

        let mut clamp_u32 = |name: &'static str, value: &mut u32, min: u32, max: u32| {
            let requested = *value;
            let fitted = requested.clamp(min, max);
            if fitted != requested {
                clamped.push(ClampedParam {
                    name,
                    requested: requested as f64,
                    applied: fitted as f64,
                });
                *value = fitted;
            }
        };

        clamp_u32("width", &mut applied.width, 1, self.max_width);
        clamp_u32("height", &mut applied.height, 1, self.max_height);
        clamp_u32(
            "offset_x",
            &mut applied.offset_x,
            0,
            self.max_width - applied.width,
        );
        clamp_u32(
            "offset_y",
            &mut applied.offset_y,
            0,
            self.max_height - applied.height,
        );

        if let Some(fps) = applied.fps_cap
            && fps > self.max_fps
        {
            clamped.push(ClampedParam {
                name: "fps_cap",
                requested: fps,
                applied: self.max_fps,
            });
            applied.fps_cap = Some(self.max_fps);
        }

        Ok(AppliedConfig {
            config: applied,
            clamped,
        })
    }
}

/// A configuration request that exceeded device limits, recovered by clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct ClampedParam {
    pub name: &'static str,
    pub requested: f64,
    pub applied: f64,
}

/// The configuration the device actually accepted, with every adjustment it
/// made on the way.
#[derive(Debug, Clone)]
pub struct AppliedConfig {
    pub config: CameraConfig,
    pub clamped: Vec<ClampedParam>,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    #[error("unsupported parameter {name}: {detail}")]
    UnsupportedParam {
        name: &'static str,
        detail: String,
    },

    #[error("camera disconnected")]
    Disconnected,

    #[error("delivery has not been started")]
    NotDelivering,
}

/// One raw frame (or line, in waterfall mode) as delivered by the sensor.
/// Sequence indices are assigned later, by the capture controller.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub timestamp: Timestamp,
    pub data: Vec<u8>,
}

impl CapturedFrame {
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_format.bytes_per_pixel()
    }
}

/// The camera capability the pipeline consumes.
pub trait FrameSource: Send {
    fn limits(&self) -> CameraLimits;

    /// Apply `config`, clamping anything the device cannot honor exactly.
    fn configure(&mut self, config: &CameraConfig) -> Result<AppliedConfig, CameraError>;

    fn start_delivery(&mut self, mode: CaptureMode) -> Result<(), CameraError>;

    fn stop_delivery(&mut self);

    /// Pull the next frame, waiting at most `timeout`. `Ok(None)` means
    /// nothing arrived in time; the caller decides whether to poll again.
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<CapturedFrame>, CameraError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_fits_oversized_roi_and_reports() {
        let limits = CameraLimits::default();
        let config = CameraConfig {
            width: 4096,
            height: 4096,
            fps_cap: Some(5000.0),
            ..Default::default()
        };

        let applied = limits.clamp(&config).unwrap();
        assert_eq!(applied.config.width, 1920);
        assert_eq!(applied.config.height, 1080);
        assert_eq!(applied.config.fps_cap, Some(1000.0));

        let names: Vec<_> = applied.clamped.iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["width", "height", "fps_cap"]);
    }

    #[test]
    fn clamp_leaves_in_range_config_untouched() {
        let limits = CameraLimits::default();
        let applied = limits.clamp(&CameraConfig::default()).unwrap();
        assert!(applied.clamped.is_empty());
        assert_eq!(applied.config.width, 1280);
    }

    #[test]
    fn clamp_pulls_offsets_back_inside_sensor() {
        let limits = CameraLimits::default();
        let config = CameraConfig {
            width: 1920,
            offset_x: 500,
            ..Default::default()
        };

        let applied = limits.clamp(&config).unwrap();
        assert_eq!(applied.config.offset_x, 0);
    }

    #[test]
    fn unsupported_pixel_format_is_not_clamped() {
        let limits = CameraLimits {
            pixel_formats: vec![PixelFormat::Mono8],
            ..Default::default()
        };
        let config = CameraConfig {
            pixel_format: PixelFormat::Mono16,
            ..Default::default()
        };

        assert!(matches!(
            limits.clamp(&config),
            Err(CameraError::UnsupportedParam { name: "pixel_format", .. })
        ));
    }
}
