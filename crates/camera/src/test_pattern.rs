//! Deterministic synthetic camera.
//!
//! Stands in for real hardware in tests and in the CLI's simulate mode:
//! delivers generated frames at a configurable rate (or free-running), with an
//! optional frame budget and an optional scripted disconnection for exercising
//! the fatal path.

use std::time::{Duration, Instant};

use strobe_timestamp::Timestamp;
use tracing::debug;

use crate::{
    AppliedConfig, CameraConfig, CameraError, CameraLimits, CaptureMode, CapturedFrame,
    FrameSource, PixelFormat,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// Horizontal gradient that scrolls one pixel per frame.
    Gradient,
    /// Every pixel set to `frame_number % 256`.
    FrameCounter,
    SolidColor(u8),
}

pub struct TestPatternSource {
    limits: CameraLimits,
    config: CameraConfig,
    pattern: TestPattern,
    delivering: bool,
    delivered: u64,
    next_due: Option<Instant>,
    frame_budget: Option<u64>,
    disconnect_after: Option<u64>,
}

impl TestPatternSource {
    pub fn new(limits: CameraLimits) -> Self {
        Self {
            limits,
            config: CameraConfig::default(),
            pattern: TestPattern::Gradient,
            delivering: false,
            delivered: 0,
            next_due: None,
            frame_budget: None,
            disconnect_after: None,
        }
    }

    pub fn with_pattern(mut self, pattern: TestPattern) -> Self {
        self.pattern = pattern;
        self
    }

    /// Deliver at most `frames`, then report nothing available.
    pub fn with_frame_budget(mut self, frames: u64) -> Self {
        self.frame_budget = Some(frames);
        self
    }

    /// Report [`CameraError::Disconnected`] after `frames` deliveries.
    pub fn with_disconnect_after(mut self, frames: u64) -> Self {
        self.disconnect_after = Some(frames);
        self
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    fn frame_interval(&self) -> Option<Duration> {
        self.config
            .fps_cap
            .filter(|fps| *fps > 0.0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps))
    }

    fn generate(&self, frame_number: u64) -> CapturedFrame {
        let width = self.config.width;
        let height = self.config.height;
        let format = self.config.pixel_format;
        let pixels = width as usize * height as usize;

        let value_at = |x: u32| -> u8 {
            match self.pattern {
                TestPattern::Gradient => ((x as u64 + frame_number) % 256) as u8,
                TestPattern::FrameCounter => (frame_number % 256) as u8,
                TestPattern::SolidColor(v) => v,
            }
        };

        let data = match format {
            PixelFormat::Mono8 => {
                let mut data = Vec::with_capacity(pixels);
                for _y in 0..height {
                    for x in 0..width {
                        data.push(value_at(x));
                    }
                }
                data
            }
            PixelFormat::Mono16 => {
                let mut data = Vec::with_capacity(pixels * 2);
                for _y in 0..height {
                    for x in 0..width {
                        // Scale 8-bit pattern values across the 16-bit range.
                        let v = value_at(x) as u16 * 257;
                        data.extend_from_slice(&v.to_le_bytes());
                    }
                }
                data
            }
        };

        CapturedFrame {
            width,
            height,
            pixel_format: format,
            timestamp: Timestamp::now(),
            data,
        }
    }
}

impl FrameSource for TestPatternSource {
    fn limits(&self) -> CameraLimits {
        self.limits.clone()
    }

    fn configure(&mut self, config: &CameraConfig) -> Result<AppliedConfig, CameraError> {
        let applied = self.limits.clamp(config)?;
        self.config = applied.config.clone();
        debug!(
            width = self.config.width,
            height = self.config.height,
            fps_cap = ?self.config.fps_cap,
            "test pattern source configured"
        );
        Ok(applied)
    }

    fn start_delivery(&mut self, mode: CaptureMode) -> Result<(), CameraError> {
        self.delivering = true;
        self.delivered = 0;
        self.next_due = None;
        debug!(%mode, "test pattern delivery started");
        Ok(())
    }

    fn stop_delivery(&mut self) {
        self.delivering = false;
        debug!(delivered = self.delivered, "test pattern delivery stopped");
    }

    fn next_frame(&mut self, timeout: Duration) -> Result<Option<CapturedFrame>, CameraError> {
        if !self.delivering {
            return Err(CameraError::NotDelivering);
        }

        if let Some(after) = self.disconnect_after
            && self.delivered >= after
        {
            return Err(CameraError::Disconnected);
        }

        if let Some(budget) = self.frame_budget
            && self.delivered >= budget
        {
            // Sensor idle. Behave like a poll timeout so stop stays cheap.
            std::thread::sleep(timeout.min(Duration::from_millis(1)));
            return Ok(None);
        }

        if let Some(interval) = self.frame_interval() {
            let now = Instant::now();
            let due = *self.next_due.get_or_insert(now);
            if due > now {
                if due - now > timeout {
                    std::thread::sleep(timeout);
                    return Ok(None);
                }
                std::thread::sleep(due - now);
            }
            self.next_due = Some(due + interval);
        }

        let frame = self.generate(self.delivered);
        self.delivered += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_running() -> CameraConfig {
        CameraConfig {
            width: 64,
            height: 32,
            fps_cap: None,
            ..Default::default()
        }
    }

    #[test]
    fn delivers_frames_with_configured_geometry() {
        let mut source = TestPatternSource::new(CameraLimits::default());
        source.configure(&free_running()).unwrap();
        source.start_delivery(CaptureMode::Area).unwrap();

        let frame = source
            .next_frame(Duration::from_millis(5))
            .unwrap()
            .unwrap();
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 32);
        assert_eq!(frame.data.len(), frame.byte_len());
    }

    #[test]
    fn frame_counter_pattern_is_deterministic() {
        let mut source = TestPatternSource::new(CameraLimits::default())
            .with_pattern(TestPattern::FrameCounter);
        source.configure(&free_running()).unwrap();
        source.start_delivery(CaptureMode::Area).unwrap();

        for expected in 0u8..3 {
            let frame = source
                .next_frame(Duration::from_millis(5))
                .unwrap()
                .unwrap();
            assert!(frame.data.iter().all(|&b| b == expected));
        }
    }

    #[test]
    fn budget_exhaustion_reports_no_frame() {
        let mut source = TestPatternSource::new(CameraLimits::default()).with_frame_budget(2);
        source.configure(&free_running()).unwrap();
        source.start_delivery(CaptureMode::Area).unwrap();

        assert!(source.next_frame(Duration::from_millis(1)).unwrap().is_some());
        assert!(source.next_frame(Duration::from_millis(1)).unwrap().is_some());
        assert!(source.next_frame(Duration::from_millis(1)).unwrap().is_none());
    }

    #[test]
    fn scripted_disconnect_surfaces_as_error() {
        let mut source = TestPatternSource::new(CameraLimits::default()).with_disconnect_after(1);
        source.configure(&free_running()).unwrap();
        source.start_delivery(CaptureMode::Area).unwrap();

        assert!(source.next_frame(Duration::from_millis(1)).unwrap().is_some());
        assert!(matches!(
            source.next_frame(Duration::from_millis(1)),
            Err(CameraError::Disconnected)
        ));
    }

    #[test]
    fn pull_before_start_is_a_caller_error() {
        let mut source = TestPatternSource::new(CameraLimits::default());
        assert!(matches!(
            source.next_frame(Duration::from_millis(1)),
            Err(CameraError::NotDelivering)
        ));
    }

    #[test]
    fn mono16_frames_carry_two_bytes_per_pixel() {
        let mut source = TestPatternSource::new(CameraLimits::default());
        source
            .configure(&CameraConfig {
                pixel_format: PixelFormat::Mono16,
                ..free_running()
            })
            .unwrap();
        source.start_delivery(CaptureMode::Area).unwrap();

        let frame = source
            .next_frame(Duration::from_millis(5))
            .unwrap()
            .unwrap();
        assert_eq!(frame.data.len(), 64 * 32 * 2);
    }
}
